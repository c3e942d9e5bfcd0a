//! Merging fetched pages into bounded local buffers.
//!
//! Buffers are ordered newest first. A fetched page is expected to be newest
//! first and strictly newer than the buffer, in which case a merge is a plain
//! prepend-and-truncate. The merge still sorts and checks for same-source
//! timestamp collisions so the buffer invariant holds for any input.

use crate::error::{SyncError, SyncResult};
use metricsync_protocol::MetricRecord;

/// What to do when two records share a (source, timestamp) slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Fail the merge with `SyncError::DuplicateTimestamp`.
    #[default]
    Reject,
    /// Keep the newly fetched record.
    KeepIncoming,
    /// Keep the record already in the buffer.
    KeepExisting,
}

/// Result of a merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// The merged buffer, newest first.
    pub items: Vec<MetricRecord>,
    /// Number of incoming records that ended up in the buffer.
    pub added: usize,
    /// Number of records dropped by truncation or deduplication.
    pub dropped: usize,
}

impl MergeOutcome {
    /// Returns true if the buffer differs from the one merged into.
    pub fn changed(&self) -> bool {
        self.added > 0 || self.dropped > 0
    }
}

/// Folds `incoming` in front of `existing`, keeping at most `max_size` items.
///
/// Merging an empty page returns `existing` untouched with `changed() == false`.
pub fn merge(
    existing: &[MetricRecord],
    incoming: &[MetricRecord],
    max_size: usize,
    policy: DuplicatePolicy,
) -> SyncResult<MergeOutcome> {
    if incoming.is_empty() && existing.len() <= max_size {
        return Ok(MergeOutcome {
            items: existing.to_vec(),
            added: 0,
            dropped: 0,
        });
    }

    // Tag each record with its origin; the stable sort keeps incoming ahead of
    // existing within equal timestamps.
    let mut tagged: Vec<(bool, &MetricRecord)> = incoming
        .iter()
        .map(|r| (true, r))
        .chain(existing.iter().map(|r| (false, r)))
        .collect();
    tagged.sort_by(|a, b| b.1.timestamp.cmp(&a.1.timestamp));

    let mut merged: Vec<(bool, &MetricRecord)> = Vec::with_capacity(tagged.len());
    let mut deduped = 0usize;
    for (from_incoming, record) in tagged {
        let collision = merged
            .iter()
            .rev()
            .take_while(|(_, kept)| kept.timestamp == record.timestamp)
            .position(|(_, kept)| kept.same_slot(record));

        let Some(offset) = collision else {
            merged.push((from_incoming, record));
            continue;
        };

        deduped += 1;
        let index = merged.len() - 1 - offset;
        match policy {
            DuplicatePolicy::Reject => {
                return Err(SyncError::DuplicateTimestamp {
                    tag: record.source.clone(),
                    timestamp: record.timestamp,
                });
            }
            DuplicatePolicy::KeepIncoming => {
                if from_incoming && !merged[index].0 {
                    merged[index] = (from_incoming, record);
                }
            }
            DuplicatePolicy::KeepExisting => {
                if !from_incoming && merged[index].0 {
                    merged[index] = (from_incoming, record);
                }
            }
        }
    }

    let truncated = merged.len().saturating_sub(max_size);
    merged.truncate(max_size);

    let added = merged.iter().filter(|(from_incoming, _)| *from_incoming).count();
    let items: Vec<MetricRecord> = merged.into_iter().map(|(_, r)| r.clone()).collect();
    let changed = added > 0 || items.as_slice() != existing;

    Ok(MergeOutcome {
        items,
        added,
        dropped: if changed { truncated + deduped } else { 0 },
    })
}

/// Dashboard variant: the newest incoming record replaces the current one.
///
/// Returns `None` when nothing changes, which includes an empty page and a
/// page whose newest record is older than `current`.
pub fn merge_latest(
    current: Option<&MetricRecord>,
    incoming: &[MetricRecord],
) -> Option<MetricRecord> {
    let newest = incoming.iter().max_by_key(|r| r.timestamp)?;
    match current {
        Some(current) if current.timestamp > newest.timestamp => None,
        Some(current) if current == newest => None,
        _ => Some(newest.clone()),
    }
}

/// Returns true if `items` is strictly descending by timestamp within each source.
pub fn is_ordered(items: &[MetricRecord]) -> bool {
    items.windows(2).all(|pair| {
        pair[0].timestamp > pair[1].timestamp
            || (pair[0].timestamp == pair[1].timestamp && pair[0].source != pair[1].source)
    })
}
