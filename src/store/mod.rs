//! The external store contract expressed as a `Store` trait, so the
//! engine's core depends only on the trait — separating pure
//! orchestration from concrete Diesel query functions.
//!
//! `PgStore` is the production implementation (Diesel + `diesel-async`
//! + `bb8`). `MemStore` is an in-memory `#[cfg(test)]` implementation
//! used by the end-to-end scenario tests, since this crate's toolchain
//! is never run against a live Postgres instance in this exercise.

pub mod models;
pub mod pg;
pub mod pool;
pub mod schema;

#[cfg(test)]
pub mod mem;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::decimal::Money;
use crate::error::EngineResult;
use crate::ids::{InvestorId, ProductId};
use crate::model::{
    BucketedPriceUpdate, Cashflow, CumulativeCashflow, PriceUpdate, UserEntry, UserProductEntry,
};

pub use pg::PgStore;
#[cfg(test)]
pub use mem::MemStore;

/// Narrows a seed/watermark/stream query to the keys an operation
/// actually touches, bounding memory to the touched keys of the
/// operation rather than the whole store.
#[derive(Clone, Copy, Debug)]
pub enum Scope {
    All,
    User(InvestorId),
    Product(ProductId),
    UserProduct(InvestorId, ProductId),
}

/// The external store contract, plus the cache-layer read/write/
/// delete operations the engine requires. All methods
/// are scoped: a global refresh passes `Scope::All`; a targeted
/// invalidation or query passes the narrowest scope that covers it.
///
/// Every mutating/reading call that participates in a top-level
/// engine operation takes `tx: &mut Self::Tx<'_>` — the single
/// connection/unit-of-work opened by `begin_transaction` and closed by
/// `commit_transaction`/`rollback_transaction`, so a whole
/// delete→insert→materialize sequence commits or rolls back as one
/// atomic step rather than each call grabbing its own pooled
/// connection.
#[async_trait]
pub trait Store: Send + Sync {
    /// The connection/unit-of-work handle a transaction threads
    /// through every call made within it.
    type Tx<'c>: Send
    where
        Self: 'c;

    /// Opens a new transaction scope.
    async fn begin_transaction(&self) -> EngineResult<Self::Tx<'_>>;

    /// Commits `tx`. No effect of any call made against `tx` is
    /// visible to other transactions until this returns `Ok`.
    async fn commit_transaction(&self, tx: Self::Tx<'_>) -> EngineResult<()>;

    /// Rolls `tx` back: every call made against it since
    /// `begin_transaction` is undone.
    async fn rollback_transaction(&self, tx: Self::Tx<'_>) -> EngineResult<()>;

    // --- Raw tables --------------------------------------------------

    async fn insert_price_updates(
        &self,
        tx: &mut Self::Tx<'_>,
        items: &[PriceUpdate],
    ) -> EngineResult<()>;

    async fn insert_cashflows(&self, tx: &mut Self::Tx<'_>, items: &[Cashflow]) -> EngineResult<()>;

    /// Asks the external bucketing primitive to refresh granularity
    /// `g`'s materialized view — an opaque procedure as far as the
    /// engine is concerned.
    async fn refresh_bucketing(&self, tx: &mut Self::Tx<'_>, granularity: &str) -> EngineResult<()>;

    async fn stream_price_updates_after(
        &self,
        tx: &mut Self::Tx<'_>,
        product_id: ProductId,
        after: DateTime<Utc>,
    ) -> EngineResult<Vec<PriceUpdate>>;

    // --- Cumulative cashflow cache (layer 1) -------------------------

    /// Latest `CumulativeCashflow` per `(user_id, product_id)` within
    /// `scope` — the C.1 seed.
    async fn latest_cumulative_cashflows(
        &self,
        tx: &mut Self::Tx<'_>,
        scope: Scope,
    ) -> EngineResult<HashMap<(InvestorId, ProductId), CumulativeCashflow>>;

    async fn cumulative_cashflow_watermark(
        &self,
        tx: &mut Self::Tx<'_>,
        scope: Scope,
    ) -> EngineResult<Option<DateTime<Utc>>>;

    /// All raw cashflows in `scope` with `t > after` (or all, if
    /// `after` is `None`), ordered by `(t, id)` — stable tie-break by
    /// cashflow id.
    async fn stream_cashflows_after(
        &self,
        tx: &mut Self::Tx<'_>,
        scope: Scope,
        after: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<Cashflow>>;

    async fn upsert_cumulative_cashflows(
        &self,
        tx: &mut Self::Tx<'_>,
        rows: &[CumulativeCashflow],
        batch_size: usize,
    ) -> EngineResult<()>;

    /// Deletes cumulative cache rows for `(user_id, product_id)` with
    /// `t >= from_t`.
    async fn delete_cumulative_cashflow_rows(
        &self,
        tx: &mut Self::Tx<'_>,
        user_id: InvestorId,
        product_id: ProductId,
        from_t: DateTime<Utc>,
    ) -> EngineResult<()>;

    // --- User-product timeline cache (layer 2) -----------------------

    /// Latest `UserProductEntry[g]` per `(user_id, product_id)` within
    /// `scope` — the C.2/C.3 seed.
    async fn latest_user_product_entries(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        scope: Scope,
    ) -> EngineResult<HashMap<(InvestorId, ProductId), UserProductEntry>>;

    async fn user_product_timeline_watermark(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        scope: Scope,
    ) -> EngineResult<Option<DateTime<Utc>>>;

    /// Most recent bucketed price for `product_id` at or before `at`
    /// — the C.2 `seed_price[p]` value.
    async fn latest_bucketed_price_at_or_before(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        product_id: ProductId,
        at: DateTime<Utc>,
    ) -> EngineResult<Option<Money>>;

    /// Bucketed prices in `scope` (all products, or a single one) with
    /// `t > after`, ordered by `t`.
    async fn stream_bucketed_prices_after(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        scope: Scope,
        after: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<BucketedPriceUpdate>>;

    async fn upsert_user_product_timeline(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        rows: &[UserProductEntry],
        batch_size: usize,
    ) -> EngineResult<()>;

    async fn delete_user_product_timeline_rows(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        user_id: InvestorId,
        product_id: ProductId,
        from_t: DateTime<Utc>,
    ) -> EngineResult<()>;

    async fn query_user_product_timeline_cache(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        user_id: InvestorId,
        product_id: ProductId,
    ) -> EngineResult<Vec<UserProductEntry>>;

    // --- User timeline cache (layer 3) ---------------------------------

    async fn user_timeline_watermark(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        scope: Scope,
    ) -> EngineResult<Option<DateTime<Utc>>>;

    /// User-product timeline rows in `scope` with `t > after`, ordered
    /// by `t` — the raw input stream to C.3.
    async fn stream_user_product_timeline_after(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        scope: Scope,
        after: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<UserProductEntry>>;

    async fn upsert_user_timeline(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        rows: &[UserEntry],
        batch_size: usize,
    ) -> EngineResult<()>;

    async fn delete_user_timeline_rows(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        user_id: InvestorId,
        from_t: DateTime<Utc>,
    ) -> EngineResult<()>;

    async fn query_user_timeline_cache(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        user_id: InvestorId,
    ) -> EngineResult<Vec<UserEntry>>;

    // --- Retention GC --------------------------------------------------

    /// Deletes `user_product_timeline_cache[g]` rows older than
    /// `cutoff`, except the most recent row per `(user_id,
    /// product_id)` (needed as a seed).
    async fn retention_gc_user_product_timeline(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        cutoff: DateTime<Utc>,
    ) -> EngineResult<()>;

    /// Same as above, scoped by `user_id` alone.
    async fn retention_gc_user_timeline(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        cutoff: DateTime<Utc>,
    ) -> EngineResult<()>;
}
