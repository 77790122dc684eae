//! Nearest-neighbor temporal join between playback time and recorded detections.

use tracing::{debug, instrument};

use crate::record_store::{DetectionRecord, RecordTable};

/// Time index over a record table
///
/// Timestamps are decoded once and sorted by `(time, row)`, so each query is a
/// binary search instead of a scan over the whole table.
#[derive(Debug)]
pub struct TemporalMatcher<'a> {
    table: &'a RecordTable,
    /// `(millis, row index)` sorted ascending
    index: Vec<(u64, usize)>,
}

impl<'a> TemporalMatcher<'a> {
    #[instrument(skip(table), fields(rows = table.len()))]
    pub fn new(table: &'a RecordTable) -> Self {
        let mut index: Vec<(u64, usize)> = table
            .iter()
            .enumerate()
            .map(|(row, record)| (record.timestamp().millis(), row))
            .collect();
        index.sort_unstable();

        debug!("Indexed {} records", index.len());
        Self { table, index }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Record whose timestamp is closest to `t` seconds
    ///
    /// Equidistant candidates resolve to the earliest row of the table. Returns
    /// `None` only when the table is empty.
    pub fn nearest(&self, t: f64) -> Option<&'a DetectionRecord> {
        self.nearest_row(t).map(|(row, _)| &self.table.records()[row])
    }

    /// Like [`nearest`](Self::nearest), but `None` when the best match is more
    /// than `max_gap` seconds away from `t`
    pub fn nearest_within(&self, t: f64, max_gap: f64) -> Option<&'a DetectionRecord> {
        self.nearest_row(t)
            .filter(|(_, distance)| *distance <= max_gap)
            .map(|(row, _)| &self.table.records()[row])
    }

    /// Row index and distance in seconds of the best match
    fn nearest_row(&self, t: f64) -> Option<(usize, f64)> {
        if self.index.is_empty() {
            return None;
        }

        let seconds = |pos: usize| self.index[pos].0 as f64 / 1000.0;

        // First entry at or after t; equal timestamps sit together with the
        // lowest row first, so this is already the earliest row of its group.
        let after = self.index.partition_point(|&(millis, _)| (millis as f64 / 1000.0) < t);

        // Last entry before t belongs to a group of equal timestamps; step back
        // to the first entry of that group for its lowest row.
        let before = after.checked_sub(1).map(|last| {
            let millis = self.index[last].0;
            self.index.partition_point(|&(m, _)| m < millis)
        });

        let candidate_after = (after < self.index.len()).then(|| (self.index[after].1, seconds(after) - t));
        let candidate_before = before.map(|pos| (self.index[pos].1, t - seconds(pos)));

        match (candidate_before, candidate_after) {
            (Some(b), Some(a)) => {
                if b.1 < a.1 || (b.1 == a.1 && b.0 < a.0) {
                    Some(b)
                } else {
                    Some(a)
                }
            }
            (Some(b), None) => Some(b),
            (None, Some(a)) => Some(a),
            (None, None) => None,
        }
    }
}
