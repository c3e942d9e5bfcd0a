//! Streaming commands: follow recents or a dashboard until stopped.

use super::{format_record, CommandResult, Format, GlobalArgs};
use metricsync_engine::MetricState;
use metricsync_protocol::MetricRecord;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::info;

/// Which stream to follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stream {
    /// Recent records, `limit` kept.
    Recents {
        /// Buffer size.
        limit: usize,
    },
    /// Latest record for one source filter.
    Dashboard {
        /// Source filter (empty = all).
        source: String,
    },
}

impl Stream {
    /// Extracts what this stream shows from a snapshot.
    fn view(&self, state: &MetricState) -> Vec<MetricRecord> {
        match self {
            Stream::Recents { .. } => state.recents.items.clone(),
            Stream::Dashboard { source } => {
                state.dashboard_for(source).cloned().into_iter().collect()
            }
        }
    }
}

fn render(records: &[MetricRecord], format: Format) -> String {
    match format {
        Format::Json => serde_json::to_string(records).unwrap_or_default(),
        Format::Text => {
            let mut out = format!("--- {} record(s)", records.len());
            for record in records {
                out.push('\n');
                out.push_str(&format_record(record));
            }
            out
        }
    }
}

/// Starts the stream and prints every change of its view.
pub async fn run(
    args: &GlobalArgs,
    stream: Stream,
    duration: Option<u64>,
    format: Format,
) -> CommandResult {
    let client = args.connect().await?;

    // The store notifies on any state change; only print when the view moved.
    let printer = stream.clone();
    let last: Mutex<Option<Vec<MetricRecord>>> = Mutex::new(None);
    let subscription = client.metrics().subscribe(move |state| {
        let view = printer.view(state);
        let mut last = last.lock();
        if last.as_ref() != Some(&view) {
            println!("{}", render(&view, format));
            *last = Some(view);
        }
    });

    match &stream {
        Stream::Recents { limit } => client.metrics().start_recents(*limit)?,
        Stream::Dashboard { source } => client.metrics().start_dashboard(source),
    };
    info!(stream = ?stream, "following stream");

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = deadline => info!("duration elapsed"),
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    subscription.unsubscribe();
    client.shutdown().await;
    Ok(())
}
