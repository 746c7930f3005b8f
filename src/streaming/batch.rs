//! `batch_upsert`: buffers up to `batch_size` items, flushes a bulk
//! insert with conflict-ignore semantics on the table's primary key,
//! and forwards the original items downstream unchanged.
//!
//! Follows the `execute_in_chunks`/`insert_*_query` shape common to
//! Diesel-backed bulk writers: chunk a `Vec<Model>`, build an
//! `INSERT ... ON CONFLICT DO NOTHING` per chunk, execute each chunk
//! against the pool. This module provides the chunking/forwarding
//! shape; the `Sink` trait is implemented per cache table in
//! `crate::store`.

use async_trait::async_trait;

use crate::error::EngineResult;

/// A batch-write destination for one cache table. Implementors issue
/// `INSERT ... ON CONFLICT (pk) DO NOTHING` against a composite
/// primary key that makes repeat emission idempotent.
#[async_trait]
pub trait BatchSink<T>: Send + Sync {
    async fn upsert_batch(&self, items: &[T]) -> EngineResult<()>;
}

/// Drains `items` into `sink` in chunks of at most `batch_size`,
/// returning the original items once every chunk has been flushed, so
/// a caller can forward them downstream unchanged.
pub async fn batch_upsert<T: Clone + Send + Sync>(
    items: Vec<T>,
    sink: &dyn BatchSink<T>,
    batch_size: usize,
) -> EngineResult<Vec<T>> {
    if items.is_empty() {
        return Ok(items);
    }
    for chunk in items.chunks(batch_size.max(1)) {
        sink.upsert_batch(chunk).await?;
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        flushed_chunks: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl BatchSink<i32> for RecordingSink {
        async fn upsert_batch(&self, items: &[i32]) -> EngineResult<()> {
            self.flushed_chunks.lock().unwrap().push(items.len());
            Ok(())
        }
    }

    #[tokio::test]
    async fn chunks_at_the_configured_batch_size() {
        let sink = RecordingSink {
            flushed_chunks: Mutex::new(vec![]),
        };
        let items: Vec<i32> = (0..10).collect();
        let forwarded = batch_upsert(items.clone(), &sink, 3).await.unwrap();
        assert_eq!(forwarded, items);
        assert_eq!(*sink.flushed_chunks.lock().unwrap(), vec![3, 3, 3, 1]);
    }

    #[tokio::test]
    async fn empty_input_flushes_nothing() {
        let sink = RecordingSink {
            flushed_chunks: Mutex::new(vec![]),
        };
        let forwarded = batch_upsert(Vec::<i32>::new(), &sink, 3).await.unwrap();
        assert!(forwarded.is_empty());
        assert!(sink.flushed_chunks.lock().unwrap().is_empty());
    }
}
