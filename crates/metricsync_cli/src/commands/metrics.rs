//! One-shot metrics query.

use super::{format_record, CommandResult, Format, GlobalArgs};
use metricsync_engine::SyncError;
use metricsync_protocol::{MetricRecord, MetricsQuery};
use serde::Serialize;

/// Query result as printed with `--format json`.
#[derive(Debug, Serialize)]
pub struct QueryOutput<'a> {
    /// Rows matching the query before paging.
    pub total: u64,
    /// Returned rows, newest first.
    pub metrics: &'a [MetricRecord],
}

/// Builds the query from command-line options.
pub fn build_query(
    limit: Option<u32>,
    from: Option<i64>,
    to: Option<i64>,
    skip: Option<u32>,
    src: Option<String>,
) -> MetricsQuery {
    let mut query = MetricsQuery::new();
    if let Some(limit) = limit {
        query = query.with_limit(limit);
    }
    if let Some(from) = from {
        query = query.with_from(from);
    }
    if let Some(to) = to {
        query = query.with_to(to);
    }
    if let Some(skip) = skip {
        query = query.with_skip(skip);
    }
    if let Some(src) = src {
        query = query.with_src(src);
    }
    query
}

/// Runs the query and prints the rows.
pub async fn run(args: &GlobalArgs, query: &MetricsQuery, format: Format) -> CommandResult {
    let client = args.connect().await?;

    let response = tokio::select! {
        result = client.metrics().get_metrics(query) => result?,
        _ = tokio::signal::ctrl_c() => return Err(SyncError::Cancelled.into()),
    };

    match format {
        Format::Json => {
            let output = QueryOutput {
                total: response.total,
                metrics: &response.metrics,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Format::Text => {
            println!("{} of {} rows", response.metrics.len(), response.total);
            for record in &response.metrics {
                println!("{}", format_record(record));
            }
        }
    }
    Ok(())
}
