//! `merge_sorted`: produces items from `n` timestamp-sorted input
//! streams in ascending timestamp order, tie-broken stably by input
//! index so that callers can encode an ordering rule (e.g.
//! "cumulative cashflows precede price updates at equal timestamps")
//! simply by choosing stream order.
//!
//! Grounded in the original implementation's `merge_sorted` (an
//! async k-way merge over `AsyncIterator`s that scans for the
//! smallest timestamp among the heads and re-primes that iterator);
//! here expressed over synchronous `Iterator`s, since ordering and
//! item equality are the contract, not the async-vs-sync mechanism.

use super::timestamped::Timestamped;
use std::iter::Peekable;

/// Lazily merges `n` already-sorted iterators into one sorted
/// iterator. All inputs are assumed sorted ascending by `timestamp()`;
/// the merge itself is single-pass and does not re-sort.
pub struct MergeSorted<T, I: Iterator<Item = T>> {
    sources: Vec<Peekable<I>>,
}

impl<T, I: Iterator<Item = T>> MergeSorted<T, I> {
    pub fn new(sources: Vec<I>) -> Self {
        Self {
            sources: sources.into_iter().map(|it| it.peekable()).collect(),
        }
    }
}

impl<T: Timestamped, I: Iterator<Item = T>> Iterator for MergeSorted<T, I> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        // Stable tie-break by input index: scanning left-to-right and
        // only replacing on a strictly smaller timestamp keeps the
        // earliest-index source as the winner on ties.
        let mut best_idx: Option<usize> = None;
        let mut best_t = None;
        for (idx, src) in self.sources.iter_mut().enumerate() {
            if let Some(item) = src.peek() {
                let t = item.timestamp();
                match &best_t {
                    None => {
                        best_idx = Some(idx);
                        best_t = Some(t);
                    },
                    Some(cur) if t < *cur => {
                        best_idx = Some(idx);
                        best_t = Some(t);
                    },
                    _ => {},
                }
            }
        }
        best_idx.and_then(|idx| self.sources[idx].next())
    }
}

pub fn merge_sorted<T: Timestamped, I: Iterator<Item = T>>(
    sources: Vec<I>,
) -> MergeSorted<T, I> {
    MergeSorted::new(sources)
}
