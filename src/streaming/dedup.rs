//! `dedup_by_timestamp`: for adjacent items sharing the full key, keep
//! only the last. Used to collapse same-timestamp emissions produced
//! by the fold kernels.
//!
//! The authoritative semantic: *for an identical full key at an
//! identical timestamp, the last emission wins*. Implemented by
//! buffering one item behind the underlying stream and flushing it
//! only once the next item's key differs — the same one-step-buffer
//! shape the original implementation uses in
//! `compute_user_product_timeline`/`compute_user_timeline`.

pub struct DedupByKey<T, K: PartialEq, I: Iterator<Item = T>, F: FnMut(&T) -> K> {
    inner: I,
    key_fn: F,
    buffered: Option<(K, T)>,
    done: bool,
}

impl<T, K: PartialEq, I: Iterator<Item = T>, F: FnMut(&T) -> K> DedupByKey<T, K, I, F> {
    pub fn new(inner: I, key_fn: F) -> Self {
        Self {
            inner,
            key_fn,
            buffered: None,
            done: false,
        }
    }
}

impl<T, K: PartialEq, I: Iterator<Item = T>, F: FnMut(&T) -> K> Iterator
    for DedupByKey<T, K, I, F>
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.done {
            return None;
        }
        loop {
            match self.inner.next() {
                Some(item) => {
                    let key = (self.key_fn)(&item);
                    match self.buffered.take() {
                        None => {
                            self.buffered = Some((key, item));
                            // Keep pulling until we know whether the
                            // next item shares this key.
                            continue;
                        },
                        Some((prev_key, prev_item)) => {
                            if prev_key == key {
                                // Same full key: the new item
                                // supersedes the buffered one.
                                self.buffered = Some((key, item));
                                continue;
                            } else {
                                self.buffered = Some((key, item));
                                return Some(prev_item);
                            }
                        },
                    }
                },
                None => {
                    self.done = true;
                    return self.buffered.take().map(|(_, item)| item);
                },
            }
        }
    }
}

pub fn dedup_by_timestamp<T, K: PartialEq, I: Iterator<Item = T>, F: FnMut(&T) -> K>(
    inner: I,
    key_fn: F,
) -> DedupByKey<T, K, I, F> {
    DedupByKey::new(inner, key_fn)
}
