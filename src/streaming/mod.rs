//! Streaming iterator toolkit: sorted-merge of heterogeneous event
//! streams, batched upsert, and timestamp-dedup, built directly on
//! `std::iter::Iterator` rather than a bespoke stream abstraction.

pub mod batch;
pub mod dedup;
pub mod merge;
pub mod timestamped;

pub use batch::{batch_upsert, BatchSink};
pub use dedup::dedup_by_timestamp;
pub use merge::merge_sorted;
pub use timestamped::Timestamped;
