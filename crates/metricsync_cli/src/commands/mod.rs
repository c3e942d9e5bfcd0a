//! CLI command implementations.

pub mod metrics;
pub mod session;
pub mod watch;

use chrono::DateTime;
use clap::{Args, ValueEnum};
use metricsync_engine::{Client, ClientConfig, ENV_BASE_URL};
use metricsync_protocol::MetricRecord;
use std::time::Duration;

/// Result type of every command.
pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Connection options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// API base URL (falls back to METRICSYNC_BASE_URL, then a local default)
    #[arg(global = true, short, long)]
    pub base_url: Option<String>,

    /// Username to log in with before running the command
    #[arg(global = true, short, long, env = "METRICSYNC_USERNAME")]
    pub username: Option<String>,

    /// Password for --username
    #[arg(
        global = true,
        short,
        long,
        env = "METRICSYNC_PASSWORD",
        hide_env_values = true
    )]
    pub password: Option<String>,

    /// Request timeout in seconds
    #[arg(global = true, long)]
    pub timeout: Option<u64>,
}

impl GlobalArgs {
    /// Resolves the client configuration from flags and environment.
    pub fn config(&self) -> Result<ClientConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.base_url {
            Some(url) => ClientConfig::new(url.clone()),
            None if std::env::var_os(ENV_BASE_URL).is_some() => ClientConfig::from_env()?,
            None => ClientConfig::default(),
        };
        if let Some(secs) = self.timeout {
            let timeout = Duration::from_secs(secs);
            config = config.with_request_timeout(timeout);
            config.poller = config.poller.with_request_timeout(timeout);
        }
        Ok(config)
    }

    /// Builds a client and logs in if credentials were given.
    ///
    /// The session cookie lives in the client, so every invocation logs in
    /// again.
    pub async fn connect(&self) -> Result<Client, Box<dyn std::error::Error>> {
        let client = Client::connect(self.config()?)?;
        if let Some(username) = &self.username {
            let password = self.password.as_deref().unwrap_or_default();
            client.session().login(username, password).await?;
        }
        Ok(client)
    }
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable lines
    Text,
    /// One JSON document per output
    Json,
}

/// Renders a record as one line of text.
pub fn format_record(record: &MetricRecord) -> String {
    let time = DateTime::from_timestamp(record.timestamp, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| record.timestamp.to_string());

    let mut line = time;
    if !record.source.is_empty() {
        line.push_str(&format!(" [{}]", record.source));
    }
    for (name, value) in &record.values {
        match value {
            Some(value) => line.push_str(&format!(" {name}={value}")),
            None => line.push_str(&format!(" {name}=-")),
        }
    }
    line
}
