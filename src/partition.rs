/// One worker's contiguous slice of the output frame index space.
///
/// Bounds are 1-based and inclusive. A range with `end < start` is empty; the
/// partitioner produces such ranges when there are fewer frames than workers,
/// and the workers assigned to them must still start and settle cleanly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameRange {
    /// First frame index owned by this worker (inclusive).
    pub start: u64,
    /// Last frame index owned by this worker (inclusive).
    pub end: u64,
}

impl FrameRange {
    /// Return `true` when `frame` falls inside this range.
    pub fn contains(self, frame: u64) -> bool {
        self.start <= frame && frame <= self.end
    }

    /// Number of frames contained in the range.
    pub fn len_frames(self) -> u64 {
        if self.end >= self.start {
            self.end - self.start + 1
        } else {
            0
        }
    }

    /// Return `true` when the range has no frames.
    pub fn is_empty(self) -> bool {
        self.end < self.start
    }
}

/// Split `total_frames` across `worker_count` workers as disjoint,
/// order-preserving ranges whose union is exactly `[1, total_frames]`.
///
/// The divisor shrinks by one each step while the remainder shrinks by the
/// quotient, so the remainder is absorbed incrementally instead of being
/// dumped on the last worker; any two shares differ by at most one frame.
pub fn partition(total_frames: u64, worker_count: usize) -> Vec<FrameRange> {
    let mut remaining = total_frames;
    let mut divisor = worker_count as u64;
    let mut cursor = 0u64;
    let mut ranges = Vec::with_capacity(worker_count);

    while divisor >= 1 {
        let share = remaining / divisor;
        ranges.push(FrameRange {
            start: cursor + 1,
            end: cursor + share,
        });
        cursor += share;
        remaining -= share;
        divisor -= 1;
    }

    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn even_division_produces_equal_ranges() {
        assert_eq!(
            partition(300, 4),
            vec![
                FrameRange { start: 1, end: 75 },
                FrameRange { start: 76, end: 150 },
                FrameRange { start: 151, end: 225 },
                FrameRange { start: 226, end: 300 },
            ]
        );
    }

    #[test]
    fn remainder_is_absorbed_incrementally() {
        assert_eq!(
            partition(10, 3),
            vec![
                FrameRange { start: 1, end: 3 },
                FrameRange { start: 4, end: 6 },
                FrameRange { start: 7, end: 10 },
            ]
        );
    }

    #[test]
    fn single_worker_owns_everything() {
        assert_eq!(partition(7, 1), vec![FrameRange { start: 1, end: 7 }]);
    }

    #[test]
    fn zero_frames_yields_degenerate_ranges() {
        let ranges = partition(0, 3);
        assert_eq!(ranges.len(), 3);
        for range in ranges {
            assert!(range.is_empty());
            assert_eq!(range.len_frames(), 0);
        }
    }

    #[test]
    fn fewer_frames_than_workers_leaves_leading_empties() {
        let ranges = partition(2, 4);
        assert_eq!(ranges.iter().filter(|r| r.is_empty()).count(), 2);
        assert_eq!(
            ranges.iter().map(|r| r.len_frames()).sum::<u64>(),
            2
        );
    }

    #[test]
    fn empty_range_contains_nothing() {
        let range = FrameRange { start: 1, end: 0 };
        assert!(!range.contains(0));
        assert!(!range.contains(1));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        // Union is exactly [1, total], ranges are contiguous and disjoint in
        // assignment order, and any two shares differ by at most one frame.
        #[test]
        fn prop_partition_laws(total in 0u64..20_000, workers in 1usize..64) {
            let ranges = partition(total, workers);
            prop_assert_eq!(ranges.len(), workers);

            let mut next = 1u64;
            for range in &ranges {
                prop_assert_eq!(range.start, next);
                if !range.is_empty() {
                    next = range.end + 1;
                }
            }
            prop_assert_eq!(next, total + 1);

            let sum: u64 = ranges.iter().map(|r| r.len_frames()).sum();
            prop_assert_eq!(sum, total);

            let min = ranges.iter().map(|r| r.len_frames()).min().unwrap();
            let max = ranges.iter().map(|r| r.len_frames()).max().unwrap();
            prop_assert!(max - min <= 1);
        }
    }
}
