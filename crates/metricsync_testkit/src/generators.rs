//! Property-based test generators using proptest.

use metricsync_protocol::{MetricRecord, Timestamp};
use proptest::prelude::*;

/// Strategy for metric names.
pub fn metric_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,11}")
        .expect("Invalid regex")
        .prop_filter("src is a reserved column", |s| s != "src")
}

/// Strategy for a single record at `timestamp`.
pub fn record_at(timestamp: Timestamp) -> impl Strategy<Value = MetricRecord> {
    prop::collection::btree_map(
        metric_name_strategy(),
        prop::option::of(-1.0e6f64..1.0e6),
        0..4,
    )
    .prop_map(move |values| {
        let mut record = MetricRecord::new(timestamp);
        record.values = values;
        record
    })
}

/// Strategy for a newest-first page with distinct timestamps in `range`.
pub fn page_strategy(
    range: std::ops::Range<Timestamp>,
    size: std::ops::Range<usize>,
) -> impl Strategy<Value = Vec<MetricRecord>> {
    prop::collection::btree_set(range, size).prop_flat_map(|stamps| {
        stamps
            .into_iter()
            .rev()
            .map(record_at)
            .collect::<Vec<_>>()
    })
}

/// Strategy for a sequence of pages, each strictly newer than the last.
pub fn page_sequence_strategy(pages: usize) -> impl Strategy<Value = Vec<Vec<MetricRecord>>> {
    prop::collection::vec(0usize..6, pages).prop_map(|sizes| {
        let mut next = 1_000;
        sizes
            .into_iter()
            .map(|size| {
                let page: Vec<MetricRecord> = (0..size as i64)
                    .map(|i| MetricRecord::new(next + i))
                    .rev()
                    .collect();
                next += size as i64 + 1;
                page
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use metricsync_engine::is_ordered;

    proptest! {
        #[test]
        fn pages_are_newest_first(page in page_strategy(0..500, 0..20)) {
            prop_assert!(is_ordered(&page));
        }

        #[test]
        fn sequences_increase(pages in page_sequence_strategy(5)) {
            let newest: Vec<Timestamp> = pages
                .iter()
                .filter_map(|p| p.first().map(|r| r.timestamp))
                .collect();
            prop_assert!(newest.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
