//! Per-partition tracking of positions that are ready to commit.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Mutex;

use rdkafka::topic_partition_list::{Offset, TopicPartitionList};

use crate::krimson::kafka::record::{RecordPosition, TopicPartition};

/// Offsets remaining on an assigned partition at the moment a subscription
/// stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionTopicGap {
    pub topic: String,
    pub partition: i32,
    /// Next offset this subscription would consume.
    pub current_position: i64,
    /// End offset (high watermark) of the partition.
    pub end_position: i64,
}

impl SubscriptionTopicGap {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        current_position: i64,
        end_position: i64,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            current_position,
            end_position,
        }
    }

    /// Number of offsets between the current position and end-of-log.
    pub fn gap(&self) -> i64 {
        (self.end_position - self.current_position).max(0)
    }

    /// True when the subscription had consumed everything available.
    pub fn caught_up(&self) -> bool {
        self.gap() == 0
    }
}

impl fmt::Display for SubscriptionTopicGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {}/{} (gap {})",
            self.topic,
            self.partition,
            self.current_position,
            self.end_position,
            self.gap()
        )
    }
}

#[derive(Debug, Default)]
struct PartitionProgress {
    /// Highest offset for which this and every lower tracked offset is ready.
    frontier: Option<i64>,
    /// Ready offsets above the frontier, waiting for the gap to fill.
    pending: BTreeSet<i64>,
    /// Next offset included in the last successful commit.
    committed: Option<i64>,
}

impl PartitionProgress {
    fn track(&mut self, offset: i64) -> bool {
        match self.frontier {
            None => {
                // First tracked offset anchors the frontier; consumption is
                // in order per partition so this is the partition's start.
                self.frontier = Some(offset);
            }
            Some(frontier) if offset == frontier + 1 => {
                let mut frontier = offset;
                while self.pending.remove(&(frontier + 1)) {
                    frontier += 1;
                }
                self.frontier = Some(frontier);
            }
            Some(frontier) if offset > frontier + 1 => {
                self.pending.insert(offset);
                return false;
            }
            // At or below the frontier: duplicate, ignore.
            Some(_) => return false,
        }
        true
    }

    /// Next offset to commit, when it advanced past the last commit.
    fn committable(&self) -> Option<i64> {
        let next = self.frontier? + 1;
        match self.committed {
            Some(committed) if next <= committed => None,
            _ => Some(next),
        }
    }
}

/// Tracks, per partition, the highest contiguous offset whose processing
/// completed and is therefore safe to commit.
///
/// Tracking tolerates out-of-order completion: an offset tracked ahead of a
/// gap is parked until the gap fills, so the committable offset never jumps
/// past unfinished records. Committed offsets are monotonic.
#[derive(Debug, Default)]
pub struct PositionTracker {
    partitions: Mutex<HashMap<TopicPartition, PartitionProgress>>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a consumed position as ready to commit. Returns true when the
    /// partition's committable frontier advanced.
    pub fn track(&self, position: &RecordPosition) -> bool {
        let mut partitions = self.partitions.lock().unwrap();
        partitions
            .entry(position.topic_partition())
            .or_default()
            .track(position.offset)
    }

    /// Offsets ready to commit that have not been committed yet, as
    /// `(partition, next_offset)` pairs.
    pub fn committable(&self) -> Vec<(TopicPartition, i64)> {
        let partitions = self.partitions.lock().unwrap();
        let mut out: Vec<(TopicPartition, i64)> = partitions
            .iter()
            .filter_map(|(tp, progress)| progress.committable().map(|next| (tp.clone(), next)))
            .collect();
        out.sort();
        out
    }

    /// Records a successful commit so the offsets are not re-committed.
    pub fn mark_committed(&self, committed: &[(TopicPartition, i64)]) {
        let mut partitions = self.partitions.lock().unwrap();
        for (tp, next) in committed {
            if let Some(progress) = partitions.get_mut(tp) {
                match progress.committed {
                    Some(prior) if prior >= *next => {}
                    _ => progress.committed = Some(*next),
                }
            }
        }
    }

    /// Snapshot of the next-to-consume offset per tracked partition.
    pub fn current_positions(&self) -> Vec<(TopicPartition, i64)> {
        let partitions = self.partitions.lock().unwrap();
        let mut out: Vec<(TopicPartition, i64)> = partitions
            .iter()
            .filter_map(|(tp, progress)| {
                let next = progress
                    .frontier
                    .map(|f| f + 1)
                    .or(progress.committed)?;
                Some((tp.clone(), next))
            })
            .collect();
        out.sort();
        out
    }

    /// Drops tracking state for partitions that were revoked.
    pub fn remove_partitions(&self, revoked: &[TopicPartition]) {
        let mut partitions = self.partitions.lock().unwrap();
        for tp in revoked {
            partitions.remove(tp);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.lock().unwrap().is_empty()
    }
}

/// Builds a commit list from a committable snapshot.
pub fn commit_list(committable: &[(TopicPartition, i64)]) -> TopicPartitionList {
    let mut tpl = TopicPartitionList::with_capacity(committable.len());
    for (tp, next) in committable {
        // Offsets below zero cannot appear here; track() only accepts real
        // record positions.
        let _ = tpl.add_partition_offset(&tp.topic, tp.partition, Offset::Offset(*next));
    }
    tpl
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(topic: &str, partition: i32, offset: i64) -> RecordPosition {
        RecordPosition::new(topic, partition, offset)
    }

    #[test]
    fn test_in_order_tracking_advances_frontier() {
        let tracker = PositionTracker::new();
        assert!(tracker.track(&pos("orders", 0, 5)));
        assert!(tracker.track(&pos("orders", 0, 6)));
        assert!(tracker.track(&pos("orders", 0, 7)));

        assert_eq!(
            tracker.committable(),
            vec![(TopicPartition::new("orders", 0), 8)]
        );
    }

    #[test]
    fn test_out_of_order_tracking_waits_for_gap() {
        let tracker = PositionTracker::new();
        tracker.track(&pos("orders", 0, 5));
        // 7 completes before 6: frontier must not jump past 6.
        assert!(!tracker.track(&pos("orders", 0, 7)));
        assert_eq!(
            tracker.committable(),
            vec![(TopicPartition::new("orders", 0), 6)]
        );

        assert!(tracker.track(&pos("orders", 0, 6)));
        assert_eq!(
            tracker.committable(),
            vec![(TopicPartition::new("orders", 0), 8)]
        );
    }

    #[test]
    fn test_duplicates_are_ignored() {
        let tracker = PositionTracker::new();
        tracker.track(&pos("orders", 0, 5));
        assert!(!tracker.track(&pos("orders", 0, 5)));
        assert_eq!(
            tracker.committable(),
            vec![(TopicPartition::new("orders", 0), 6)]
        );
    }

    #[test]
    fn test_partitions_are_independent() {
        let tracker = PositionTracker::new();
        tracker.track(&pos("orders", 0, 5));
        tracker.track(&pos("orders", 1, 100));
        tracker.track(&pos("audit", 0, 1));

        assert_eq!(
            tracker.committable(),
            vec![
                (TopicPartition::new("audit", 0), 2),
                (TopicPartition::new("orders", 0), 6),
                (TopicPartition::new("orders", 1), 101),
            ]
        );
    }

    #[test]
    fn test_mark_committed_suppresses_recommit() {
        let tracker = PositionTracker::new();
        tracker.track(&pos("orders", 0, 5));

        let committable = tracker.committable();
        tracker.mark_committed(&committable);
        assert!(tracker.committable().is_empty());

        // Progress makes the partition committable again.
        tracker.track(&pos("orders", 0, 6));
        assert_eq!(
            tracker.committable(),
            vec![(TopicPartition::new("orders", 0), 7)]
        );
    }

    #[test]
    fn test_committed_offsets_are_monotonic() {
        let tracker = PositionTracker::new();
        tracker.track(&pos("orders", 0, 5));
        tracker.mark_committed(&[(TopicPartition::new("orders", 0), 6)]);
        // A stale lower commit must not move the committed mark backwards.
        tracker.mark_committed(&[(TopicPartition::new("orders", 0), 3)]);

        assert!(tracker.committable().is_empty());
    }

    #[test]
    fn test_remove_partitions() {
        let tracker = PositionTracker::new();
        tracker.track(&pos("orders", 0, 5));
        tracker.track(&pos("orders", 1, 9));

        tracker.remove_partitions(&[TopicPartition::new("orders", 0)]);
        assert_eq!(
            tracker.committable(),
            vec![(TopicPartition::new("orders", 1), 10)]
        );
    }

    #[test]
    fn test_gap_arithmetic() {
        let gap = SubscriptionTopicGap::new("orders", 0, 7, 10);
        assert_eq!(gap.gap(), 3);
        assert!(!gap.caught_up());

        let caught_up = SubscriptionTopicGap::new("orders", 0, 10, 10);
        assert_eq!(caught_up.gap(), 0);
        assert!(caught_up.caught_up());
    }
}
