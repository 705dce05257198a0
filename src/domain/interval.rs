use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntervalError {
    #[error("invalid interval: start {start} must be before end {end}")]
    InvalidInterval {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Half-open `[start, end)` span of time. Always non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, IntervalError> {
        if start >= end {
            return Err(IntervalError::InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn from_start(start: DateTime<Utc>, minutes: u32) -> Result<Self, IntervalError> {
        Self::new(start, start + Duration::minutes(i64::from(minutes)))
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn contains(&self, other: &TimeInterval) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Intersection with `bounds`, or `None` when they do not overlap.
    pub fn clip_to(&self, bounds: &TimeInterval) -> Option<TimeInterval> {
        let start = self.start.max(bounds.start);
        let end = self.end.min(bounds.end);
        TimeInterval::new(start, end).ok()
    }
}

pub fn duration(interval: &TimeInterval) -> i64 {
    interval.duration_minutes()
}

/// Sorted, non-overlapping busy intervals for one day.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusyIntervalSet {
    intervals: Vec<TimeInterval>,
}

impl BusyIntervalSet {
    pub fn as_slice(&self) -> &[TimeInterval] {
        &self.intervals
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn total_minutes(&self) -> i64 {
        self.intervals
            .iter()
            .map(TimeInterval::duration_minutes)
            .sum()
    }
}

pub fn merge(intervals: impl IntoIterator<Item = TimeInterval>) -> BusyIntervalSet {
    let mut sorted = intervals.into_iter().collect::<Vec<_>>();
    sorted.sort_by_key(|interval| (interval.start, interval.end));

    let mut merged: Vec<TimeInterval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        if let Some(last) = merged.last_mut() {
            if interval.start <= last.end {
                if interval.end > last.end {
                    last.end = interval.end;
                }
                continue;
            }
        }
        merged.push(interval);
    }
    BusyIntervalSet { intervals: merged }
}

/// Gaps of `window` not covered by `busy`, in ascending order and clipped to the window.
pub fn subtract(window: &TimeInterval, busy: &BusyIntervalSet) -> Vec<TimeInterval> {
    let mut gaps = Vec::new();
    let mut cursor = window.start;

    for interval in busy.as_slice() {
        if interval.end <= cursor {
            continue;
        }
        if interval.start >= window.end {
            break;
        }
        if interval.start > cursor {
            gaps.push(TimeInterval {
                start: cursor,
                end: interval.start,
            });
        }
        cursor = cursor.max(interval.end);
        if cursor >= window.end {
            break;
        }
    }

    if cursor < window.end {
        gaps.push(TimeInterval {
            start: cursor,
            end: window.end,
        });
    }
    gaps
}

/// A usable gap in the day: at least the configured minimum granularity long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FreeSlot {
    interval: TimeInterval,
}

impl FreeSlot {
    pub(crate) fn new(interval: TimeInterval) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> &TimeInterval {
        &self.interval
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.interval.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.interval.end
    }

    pub fn duration_minutes(&self) -> i64 {
        self.interval.duration_minutes()
    }

    pub fn fits(&self, minutes: u32) -> bool {
        self.duration_minutes() >= i64::from(minutes)
    }

    pub fn contains(&self, candidate: &TimeInterval) -> bool {
        self.interval.contains(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(hhmm: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&format!("2026-02-16T{hhmm}:00Z"))
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn span(start: &str, end: &str) -> TimeInterval {
        TimeInterval::new(at(start), at(end)).expect("valid interval")
    }

    #[test]
    fn new_rejects_empty_and_reversed_intervals() {
        assert!(TimeInterval::new(at("10:00"), at("10:00")).is_err());
        assert!(matches!(
            TimeInterval::new(at("11:00"), at("10:00")),
            Err(IntervalError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn merge_joins_overlapping_and_touching_intervals() {
        let merged = merge(vec![
            span("13:00", "14:00"),
            span("09:00", "10:00"),
            span("09:30", "10:30"),
            span("10:30", "11:00"),
        ]);
        assert_eq!(
            merged.as_slice(),
            &[span("09:00", "11:00"), span("13:00", "14:00")]
        );
    }

    #[test]
    fn subtract_emits_gaps_before_between_and_after() {
        let window = span("09:00", "18:00");
        let busy = merge(vec![span("10:00", "11:00"), span("14:00", "15:00")]);
        assert_eq!(
            subtract(&window, &busy),
            vec![
                span("09:00", "10:00"),
                span("11:00", "14:00"),
                span("15:00", "18:00"),
            ]
        );
    }

    #[test]
    fn subtract_clips_busy_intervals_that_cross_window_bounds() {
        let window = span("09:00", "18:00");
        let busy = merge(vec![span("08:00", "09:30"), span("17:30", "19:00")]);
        assert_eq!(subtract(&window, &busy), vec![span("09:30", "17:30")]);
    }

    #[test]
    fn clip_to_returns_none_without_overlap() {
        let bounds = span("09:00", "18:00");
        assert!(span("06:00", "08:00").clip_to(&bounds).is_none());
        assert_eq!(
            span("08:00", "10:00").clip_to(&bounds),
            Some(span("09:00", "10:00"))
        );
    }

    fn interval_strategy() -> impl Strategy<Value = TimeInterval> {
        (0i64..1_440, 1i64..240).prop_map(|(offset, length)| {
            let start = at("00:00") + Duration::minutes(offset);
            TimeInterval::new(start, start + Duration::minutes(length)).expect("positive length")
        })
    }

    fn covered_minutes(intervals: &[TimeInterval]) -> usize {
        let origin = at("00:00");
        let mut minutes = std::collections::BTreeSet::new();
        for interval in intervals {
            let from = (interval.start() - origin).num_minutes();
            let to = (interval.end() - origin).num_minutes();
            minutes.extend(from..to);
        }
        minutes.len()
    }

    proptest! {
        #[test]
        fn merge_output_is_sorted_disjoint_and_preserves_coverage(
            intervals in proptest::collection::vec(interval_strategy(), 0..24)
        ) {
            let merged = merge(intervals.clone());
            for pair in merged.as_slice().windows(2) {
                prop_assert!(pair[0].end() < pair[1].start());
            }
            prop_assert_eq!(merged.total_minutes() as usize, covered_minutes(&intervals));
        }

        #[test]
        fn subtract_and_busy_partition_the_window(
            intervals in proptest::collection::vec(interval_strategy(), 0..24)
        ) {
            let window = span("09:00", "18:00");
            let busy = merge(intervals);
            let gaps = subtract(&window, &busy);
            let busy_inside = busy
                .as_slice()
                .iter()
                .filter_map(|interval| interval.clip_to(&window))
                .map(|interval| interval.duration_minutes())
                .sum::<i64>();
            let free = gaps.iter().map(TimeInterval::duration_minutes).sum::<i64>();
            prop_assert_eq!(free + busy_inside, window.duration_minutes());
            for gap in &gaps {
                prop_assert!(window.contains(gap));
                let clear = busy
                    .as_slice()
                    .iter()
                    .all(|interval| !interval.overlaps(gap));
                prop_assert!(clear);
            }
        }
    }
}
