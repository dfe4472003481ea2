//! Static work partitioning
//!
//! Per-phase work is split once up front into contiguous slices, one per
//! worker; workers never steal from each other afterwards. The same scheme
//! covers listing pages (Phase 1), pending hospitals (Phase 2), and pending
//! doctors (Phase 3).

use std::ops::Range;

/// Split `len` items into at most `workers` contiguous ranges.
///
/// Every index is covered exactly once and slice sizes differ by at most one.
/// Deterministic for a given `(len, workers)` pair. Empty ranges are not
/// emitted, so fewer than `workers` ranges come back when `len < workers`.
pub fn partition(len: usize, workers: usize) -> Vec<Range<usize>> {
    if len == 0 || workers == 0 {
        return Vec::new();
    }
    let workers = workers.min(len);
    let base = len / workers;
    let remainder = len % workers;

    let mut ranges = Vec::with_capacity(workers);
    let mut start = 0;
    for i in 0..workers {
        // The first `remainder` slices carry one extra item
        let size = base + usize::from(i < remainder);
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}

/// Convenience wrapper slicing an owned list into per-worker chunks
pub fn partition_items<T: Clone>(items: &[T], workers: usize) -> Vec<Vec<T>> {
    partition(items.len(), workers)
        .into_iter()
        .map(|r| items[r].to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covering(len: usize, workers: usize) {
        let ranges = partition(len, workers);
        let mut covered = 0;
        let mut next = 0;
        for r in &ranges {
            assert_eq!(r.start, next, "ranges must be contiguous");
            assert!(!r.is_empty(), "no empty slices");
            covered += r.len();
            next = r.end;
        }
        assert_eq!(covered, len);

        if len > 0 && workers > 0 {
            let min = ranges.iter().map(Range::len).min().unwrap();
            let max = ranges.iter().map(Range::len).max().unwrap();
            assert!(max - min <= 1, "slice sizes differ by more than one");
        }
    }

    #[test]
    fn test_coverage_and_balance() {
        for len in 0..40 {
            for workers in 1..=8 {
                assert_covering(len, workers);
            }
        }
    }

    #[test]
    fn test_even_split() {
        assert_eq!(partition(8, 4), vec![0..2, 2..4, 4..6, 6..8]);
    }

    #[test]
    fn test_remainder_goes_to_leading_slices() {
        assert_eq!(partition(10, 3), vec![0..4, 4..7, 7..10]);
    }

    #[test]
    fn test_more_workers_than_items() {
        assert_eq!(partition(2, 5), vec![0..1, 1..2]);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(partition(0, 4).is_empty());
        assert!(partition(4, 0).is_empty());
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(partition(17, 4), partition(17, 4));
    }

    #[test]
    fn test_partition_items() {
        let items: Vec<u32> = (0..7).collect();
        let chunks = partition_items(&items, 3);
        assert_eq!(chunks, vec![vec![0, 1, 2], vec![3, 4], vec![5, 6]]);
    }
}
