//! The incremental engine: the five top-level operations that drive
//! the fold pipeline over the `Store` trait. This is the orchestration
//! layer — it owns no storage of its own, loads seeds and watermarks
//! through `Store`, drives the pure kernels in `crate::fold`, and
//! persists emissions back through `Store`.
//!
//! Mirrors a thin `ProcessorTrait`-style orchestration struct kept
//! separate from the Diesel query functions it calls: `Engine<S, C>`
//! is generic over the `Store` implementation and an injectable
//! `Clock`, so retention cutoffs are deterministic under test, and
//! takes its pool and config by value with no global state.

use std::collections::{HashMap, HashSet};

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use tracing::{debug, instrument};

use crate::config::{Clock, EngineConfig, GranularityConfig};
use crate::decimal::Money;
use crate::error::{EngineError, EngineResult};
use crate::fold::{
    cumulative_cashflows, user_product_timeline, user_timeline, CumulativeCashflowSeed, Event,
    UserProductTimelineSeed, UserTimelineSeed,
};
use crate::ids::{CashflowId, InvestorId, ProductId};
use crate::metrics::{OperationTimer, CACHE_ROWS_INVALIDATED, CACHE_ROWS_UPSERTED, RETENTION_ROWS_DELETED};
use crate::model::cashflow::{derive_cashflow, PartialCashflow};
use crate::model::{Cashflow, CumulativeCashflow, PriceUpdate, UserEntry, UserProductEntry};
use crate::streaming::merge_sorted;
use crate::store::{Scope, Store};

/// A cashflow as supplied to `Engine::append_cashflows`: any subset of
/// the five money-unit fields, to be run through the cashflow
/// derivation rule before insertion.
#[derive(Clone, Debug)]
pub struct CashflowInput {
    pub id: CashflowId,
    pub user_id: InvestorId,
    pub product_id: ProductId,
    pub t: DateTime<Utc>,
    pub partial: PartialCashflow,
}

/// The incremental materialization and repair engine. Holds no state
/// of its own beyond its configuration; all durable
/// state lives behind `S: Store`.
pub struct Engine<S: Store, C: Clock> {
    store: S,
    config: EngineConfig,
    clock: C,
}

impl<S: Store, C: Clock> Engine<S, C> {
    pub fn new(store: S, config: EngineConfig, clock: C) -> Self {
        Self { store, config, clock }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn granularity(&self, suffix: &str) -> EngineResult<&GranularityConfig> {
        self.config
            .granularities
            .get(suffix)
            .ok_or_else(|| EngineError::SchemaMismatch(format!("unknown granularity {suffix:?}")))
    }

    // --- E.1 -----------------------------------------------------------

    /// Raw append only. Cache invalidation for prices is
    /// deferred: bucketed values only become visible, and therefore
    /// only force recomputation, once a later refresh/query calls
    /// `refresh_bucketing`.
    #[instrument(skip(self, items), fields(count = items.len()))]
    pub async fn append_price_updates(&self, items: Vec<PriceUpdate>) -> EngineResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut timer = OperationTimer::start("append_price_updates");
        let mut tx = match self.store.begin_transaction().await {
            Ok(tx) => tx,
            Err(e) => {
                timer.mark_error();
                return Err(e);
            },
        };
        match self.store.insert_price_updates(&mut tx, &items).await {
            Ok(()) => self.store.commit_transaction(tx).await,
            Err(e) => {
                let _ = self.store.rollback_transaction(tx).await;
                timer.mark_error();
                Err(e)
            },
        }
    }

    // --- E.2 -------------------------------------------------------------

    /// Transactional append of a batch of cashflows: derive/validate,
    /// invalidate the future of each touched key,
    /// insert, re-materialize from the new minima, then run retention
    /// GC.
    #[instrument(skip(self, inputs), fields(count = inputs.len()))]
    pub async fn append_cashflows(&self, inputs: Vec<CashflowInput>) -> EngineResult<()> {
        if inputs.is_empty() {
            return Ok(());
        }
        let mut timer = OperationTimer::start("append_cashflows");
        let mut tx = match self.store.begin_transaction().await {
            Ok(tx) => tx,
            Err(e) => {
                timer.mark_error();
                return Err(e);
            },
        };
        match self.append_cashflows_inner(&mut tx, inputs).await {
            Ok(()) => self.store.commit_transaction(tx).await.map_err(|e| {
                timer.mark_error();
                e
            }),
            Err(e) => {
                let _ = self.store.rollback_transaction(tx).await;
                timer.mark_error();
                Err(e)
            },
        }
    }

    async fn append_cashflows_inner(
        &self,
        tx: &mut S::Tx<'_>,
        inputs: Vec<CashflowInput>,
    ) -> EngineResult<()> {
        // Component A: validate/derive every cashflow before anything
        // is written. A single bad cashflow aborts the whole batch.
        let mut cashflows: Vec<Cashflow> = Vec::with_capacity(inputs.len());
        for input in inputs {
            let cf = derive_cashflow(
                input.id,
                input.user_id,
                input.product_id,
                input.t,
                input.partial,
            )?;
            cashflows.push(cf);
        }

        // Step 1: per-(u,p) and per-u minima across the batch. Grouped
        // with `AHashMap` rather than the DoS-resistant default
        // hasher: these are short-lived per-batch grouping maps keyed
        // by internal ids, not attacker-controlled input.
        let mut m_up: AHashMap<(InvestorId, ProductId), DateTime<Utc>> = AHashMap::new();
        let mut m_u: AHashMap<InvestorId, DateTime<Utc>> = AHashMap::new();
        for cf in &cashflows {
            let up_key = (cf.user_id, cf.product_id);
            m_up.entry(up_key)
                .and_modify(|t| *t = (*t).min(cf.t))
                .or_insert(cf.t);
            m_u.entry(cf.user_id)
                .and_modify(|t| *t = (*t).min(cf.t))
                .or_insert(cf.t);
        }

        // Step 2: invalidate cache rows in the future of the new
        // events, at every layer.
        for (&(user_id, product_id), &from_t) in &m_up {
            self.store
                .delete_cumulative_cashflow_rows(tx, user_id, product_id, from_t)
                .await?;
            CACHE_ROWS_INVALIDATED
                .with_label_values(&["cumulative_cashflow"])
                .inc();
            for g in self.config.granularities.iter() {
                self.store
                    .delete_user_product_timeline_rows(tx, g.suffix, user_id, product_id, from_t)
                    .await?;
                CACHE_ROWS_INVALIDATED
                    .with_label_values(&["user_product_timeline"])
                    .inc();
            }
        }
        for (&user_id, &from_t) in &m_u {
            for g in self.config.granularities.iter() {
                self.store
                    .delete_user_timeline_rows(tx, g.suffix, user_id, from_t)
                    .await?;
                CACHE_ROWS_INVALIDATED
                    .with_label_values(&["user_timeline"])
                    .inc();
            }
        }

        // Step 3: bulk insert, conflict-ignore on id.
        self.store.insert_cashflows(tx, &cashflows).await?;

        // Step 4: re-materialize from the new minima. Seeds are
        // bounded by the touched keys, not the raw event count.
        for &(user_id, product_id) in m_up.keys() {
            let fresh_ccf = self
                .materialize_cumulative(tx, Scope::UserProduct(user_id, product_id))
                .await?;
            for g in self.config.granularities.iter() {
                self.materialize_user_product_timeline(
                    tx,
                    g,
                    Scope::UserProduct(user_id, product_id),
                    &fresh_ccf,
                )
                .await?;
            }
        }
        for &user_id in m_u.keys() {
            for g in self.config.granularities.iter() {
                self.materialize_user_timeline(tx, g, Scope::User(user_id)).await?;
            }
        }

        // Step 5: retention GC.
        self.retention_gc_inner(tx).await?;
        Ok(())
    }

    // --- E.3 -------------------------------------------------------------

    /// Global incremental refresh: advances every cache layer from its
    /// current watermark.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> EngineResult<()> {
        let mut timer = OperationTimer::start("refresh");
        let mut tx = match self.store.begin_transaction().await {
            Ok(tx) => tx,
            Err(e) => {
                timer.mark_error();
                return Err(e);
            },
        };
        match self.refresh_inner(&mut tx).await {
            Ok(()) => self.store.commit_transaction(tx).await.map_err(|e| {
                timer.mark_error();
                e
            }),
            Err(e) => {
                let _ = self.store.rollback_transaction(tx).await;
                timer.mark_error();
                Err(e)
            },
        }
    }

    async fn refresh_inner(&self, tx: &mut S::Tx<'_>) -> EngineResult<()> {
        let fresh_ccf = self.materialize_cumulative(tx, Scope::All).await?;

        // Per-granularity steps touch disjoint cache rows (keyed by
        // `g.suffix`), but now share one `tx`, so they run
        // sequentially rather than concurrently — a single connection
        // cannot be borrowed by more than one in-flight call at a
        // time.
        for g in self.config.granularities.iter() {
            self.materialize_user_product_timeline(tx, g, Scope::All, &fresh_ccf).await?;
        }

        for g in self.config.granularities.iter() {
            self.materialize_user_timeline(tx, g, Scope::All).await?;
        }

        self.retention_gc_inner(tx).await?;
        Ok(())
    }

    /// Materializes the cumulative-cashflow layer (C.1) for `scope`
    /// from its current watermark, persists the emissions, and
    /// returns them so per-granularity steps can reuse the same
    /// in-memory stream rather than each re-deriving it.
    async fn materialize_cumulative(
        &self,
        tx: &mut S::Tx<'_>,
        scope: Scope,
    ) -> EngineResult<Vec<CumulativeCashflow>> {
        let watermark = self.store.cumulative_cashflow_watermark(tx, scope).await?;
        let latest = self.store.latest_cumulative_cashflows(tx, scope).await?;
        let mut seed = build_cumulative_seed(latest)?;

        let cashflows = self.store.stream_cashflows_after(tx, scope, watermark).await?;
        let emitted: Vec<CumulativeCashflow> =
            cumulative_cashflows(cashflows.iter(), &mut seed).collect();

        if !emitted.is_empty() {
            self.store
                .upsert_cumulative_cashflows(tx, &emitted, self.config.upsert_batch_size)
                .await?;
            CACHE_ROWS_UPSERTED
                .with_label_values(&["cumulative_cashflow", "n/a"])
                .inc_by(emitted.len() as u64);
        }
        debug!(scope = ?scope, emitted = emitted.len(), "materialized cumulative cashflows");
        Ok(emitted)
    }

    /// Materializes `user_product_timeline_cache[g]` for `scope` (C.2),
    /// merging `fresh_ccf` (the just-materialized cumulative stream,
    /// filtered to events past this granularity's watermark) with
    /// bucketed prices past the same watermark.
    async fn materialize_user_product_timeline(
        &self,
        tx: &mut S::Tx<'_>,
        g: &GranularityConfig,
        scope: Scope,
        fresh_ccf: &[CumulativeCashflow],
    ) -> EngineResult<Vec<UserProductEntry>> {
        self.store.refresh_bucketing(tx, g.suffix).await?;

        let watermark = self
            .store
            .user_product_timeline_watermark(tx, g.suffix, scope)
            .await?;
        let latest_upt = self
            .store
            .latest_user_product_entries(tx, g.suffix, scope)
            .await?;
        check_upt_entries(latest_upt.values())?;

        let mut seed = UserProductTimelineSeed::default();
        let mut products: HashSet<ProductId> = HashSet::new();
        for ((user_id, product_id), entry) in &latest_upt {
            seed.ccf_by_product
                .entry(*product_id)
                .or_default()
                .insert(*user_id, cumulative_from_entry(entry));
            products.insert(*product_id);
        }
        for c in fresh_ccf {
            products.insert(c.product_id);
        }
        let anchor = watermark.unwrap_or(DateTime::<Utc>::MIN_UTC);
        for product_id in &products {
            if let Some(price) = self
                .store
                .latest_bucketed_price_at_or_before(tx, g.suffix, *product_id, anchor)
                .await?
            {
                seed.price.insert(*product_id, price);
            }
        }

        let ccf_events: Vec<Event> = fresh_ccf
            .iter()
            .filter(|c| watermark.map_or(true, |wm| c.t > wm))
            .cloned()
            .map(Event::CumulativeCashflow)
            .collect();
        let bucketed = self
            .store
            .stream_bucketed_prices_after(tx, g.suffix, scope, watermark)
            .await?;
        let price_events: Vec<Event> = bucketed
            .into_iter()
            .map(|b| Event::PriceUpdate(b.into()))
            .collect();

        // Cumulative cashflows precede price updates at equal
        // timestamps, encoded by source order.
        let merged = merge_sorted(vec![ccf_events.into_iter(), price_events.into_iter()]);
        let emitted: Vec<UserProductEntry> =
            user_product_timeline(merged, &mut seed, g.suffix).collect();

        if !emitted.is_empty() {
            self.store
                .upsert_user_product_timeline(tx, g.suffix, &emitted, self.config.upsert_batch_size)
                .await?;
            CACHE_ROWS_UPSERTED
                .with_label_values(&["user_product_timeline", g.suffix])
                .inc_by(emitted.len() as u64);
        }
        debug!(granularity = g.suffix, scope = ?scope, emitted = emitted.len(), "materialized user-product timeline");
        Ok(emitted)
    }

    /// Materializes `user_timeline_cache[g]` for `scope` (C.3). Reads
    /// its seed from the user-product cache *before* any new UPT rows
    /// from this pass were inserted by capturing it first, then
    /// streams every UPT row past the old UT watermark.
    async fn materialize_user_timeline(
        &self,
        tx: &mut S::Tx<'_>,
        g: &GranularityConfig,
        scope: Scope,
    ) -> EngineResult<Vec<UserEntry>> {
        let watermark = self.store.user_timeline_watermark(tx, g.suffix, scope).await?;
        let seed_base = self
            .store
            .latest_user_product_entries(tx, g.suffix, scope)
            .await?;
        check_upt_entries(seed_base.values())?;
        let mut seed = UserTimelineSeed::new();
        for ((user_id, product_id), entry) in seed_base {
            seed.entry(user_id).or_default().insert(product_id, entry);
        }

        let stream = self
            .store
            .stream_user_product_timeline_after(tx, g.suffix, scope, watermark)
            .await?;
        let emitted: Vec<UserEntry> = user_timeline(stream.into_iter(), &mut seed, g.suffix).collect();

        if !emitted.is_empty() {
            self.store
                .upsert_user_timeline(tx, g.suffix, &emitted, self.config.upsert_batch_size)
                .await?;
            CACHE_ROWS_UPSERTED
                .with_label_values(&["user_timeline", g.suffix])
                .inc_by(emitted.len() as u64);
        }
        debug!(granularity = g.suffix, scope = ?scope, emitted = emitted.len(), "materialized user timeline");
        Ok(emitted)
    }

    // --- E.4 / E.5 ---------------------------------------------------

    /// Splices the persisted prefix with a freshly computed suffix:
    /// nothing is written back to the cache.
    #[instrument(skip(self))]
    pub async fn query_user_product_timeline(
        &self,
        user_id: InvestorId,
        product_id: ProductId,
        granularity_suffix: &str,
    ) -> EngineResult<Vec<UserProductEntry>> {
        let mut timer = OperationTimer::start("query_user_product_timeline");
        let mut tx = match self.store.begin_transaction().await {
            Ok(tx) => tx,
            Err(e) => {
                timer.mark_error();
                return Err(e);
            },
        };
        let result = self
            .query_user_product_timeline_inner(&mut tx, user_id, product_id, granularity_suffix)
            .await;
        match result {
            Ok(rows) => match self.store.commit_transaction(tx).await {
                Ok(()) => Ok(rows),
                Err(e) => {
                    timer.mark_error();
                    Err(e)
                },
            },
            Err(e) => {
                let _ = self.store.rollback_transaction(tx).await;
                timer.mark_error();
                Err(e)
            },
        }
    }

    async fn query_user_product_timeline_inner(
        &self,
        tx: &mut S::Tx<'_>,
        user_id: InvestorId,
        product_id: ProductId,
        granularity_suffix: &str,
    ) -> EngineResult<Vec<UserProductEntry>> {
        let g = self.granularity(granularity_suffix)?;
        self.store.refresh_bucketing(tx, g.suffix).await?;

        let cached = self
            .store
            .query_user_product_timeline_cache(tx, g.suffix, user_id, product_id)
            .await?;
        check_upt_entries(cached.iter())?;
        let watermark = cached.last().map(|e| e.t);

        let (_, fresh) = self
            .compute_fresh_user_product_timeline(tx, g, user_id, product_id, watermark)
            .await?;

        Ok(cached.into_iter().chain(fresh).collect())
    }

    /// As the product-scoped query but at user scope: seeds at the
    /// user timeline's watermark, built from every product the investor
    /// has ever touched, fresh suffix computed by running C.1/C.2 in
    /// memory per product then C.3 over the merged result.
    #[instrument(skip(self))]
    pub async fn query_user_timeline(
        &self,
        user_id: InvestorId,
        granularity_suffix: &str,
    ) -> EngineResult<Vec<UserEntry>> {
        let mut timer = OperationTimer::start("query_user_timeline");
        let mut tx = match self.store.begin_transaction().await {
            Ok(tx) => tx,
            Err(e) => {
                timer.mark_error();
                return Err(e);
            },
        };
        let result = self.query_user_timeline_inner(&mut tx, user_id, granularity_suffix).await;
        match result {
            Ok(rows) => match self.store.commit_transaction(tx).await {
                Ok(()) => Ok(rows),
                Err(e) => {
                    timer.mark_error();
                    Err(e)
                },
            },
            Err(e) => {
                let _ = self.store.rollback_transaction(tx).await;
                timer.mark_error();
                Err(e)
            },
        }
    }

    async fn query_user_timeline_inner(
        &self,
        tx: &mut S::Tx<'_>,
        user_id: InvestorId,
        granularity_suffix: &str,
    ) -> EngineResult<Vec<UserEntry>> {
        let g = self.granularity(granularity_suffix)?;
        self.store.refresh_bucketing(tx, g.suffix).await?;

        let cached = self.store.query_user_timeline_cache(tx, g.suffix, user_id).await?;
        let watermark = cached.last().map(|e| e.t);

        // Every product the user has ever transacted in, bounded by
        // this user's own cashflow count.
        let all_cashflows = self
            .store
            .stream_cashflows_after(tx, Scope::User(user_id), None)
            .await?;
        let products: Vec<ProductId> = all_cashflows
            .iter()
            .map(|c| c.product_id)
            .sorted_by_key(|p| p.0)
            .unique()
            .collect();

        let mut seed = UserTimelineSeed::new();
        let mut per_product_streams: Vec<std::vec::IntoIter<UserProductEntry>> = Vec::new();
        for product_id in products {
            let (seed_entry, fresh) = self
                .compute_fresh_user_product_timeline(tx, g, user_id, product_id, watermark)
                .await?;
            if let Some(entry) = seed_entry {
                seed.entry(user_id).or_default().insert(product_id, entry);
            }
            per_product_streams.push(fresh.into_iter());
        }

        let merged = merge_sorted(per_product_streams);
        let fresh_ut: Vec<UserEntry> = user_timeline(merged, &mut seed, g.suffix).collect();

        Ok(cached.into_iter().chain(fresh_ut).collect())
    }

    /// Shared core of E.4/E.5: for one `(user, product)` pair, folds
    /// all cashflows up to `watermark` (no persistence) to reconstruct
    /// the cumulative state at the watermark, then folds everything
    /// past it merged with bucketed (and, if `include_realtime`, raw)
    /// prices — purely in memory.
    ///
    /// Returns `(seed_entry_at_watermark, fresh_entries_after)`; the
    /// seed entry is `None` when the pair has no position as of
    /// `watermark` (no price observed yet, or no cashflow at all).
    async fn compute_fresh_user_product_timeline(
        &self,
        tx: &mut S::Tx<'_>,
        g: &GranularityConfig,
        user_id: InvestorId,
        product_id: ProductId,
        watermark: Option<DateTime<Utc>>,
    ) -> EngineResult<(Option<UserProductEntry>, Vec<UserProductEntry>)> {
        let scope = Scope::UserProduct(user_id, product_id);
        let all_cashflows = self.store.stream_cashflows_after(tx, scope, None).await?;
        let (up_to, after): (Vec<Cashflow>, Vec<Cashflow>) = all_cashflows
            .into_iter()
            .partition(|c| watermark.map_or(false, |wm| c.t <= wm));

        let mut ccf_seed = CumulativeCashflowSeed::new();
        let seed_ccf = cumulative_cashflows(up_to.iter(), &mut ccf_seed).last();

        let anchor = watermark.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let seed_price = self
            .store
            .latest_bucketed_price_at_or_before(tx, g.suffix, product_id, anchor)
            .await?;

        let seed_entry = match (&seed_ccf, &seed_price) {
            (Some(ccf), Some(price)) => {
                Some(UserProductEntry::from_cumulative(ccf, anchor, g.suffix, price))
            },
            _ => None,
        };

        let mut upt_seed = UserProductTimelineSeed::default();
        if let Some(ccf) = seed_ccf.clone() {
            upt_seed.ccf_by_product.entry(product_id).or_default().insert(user_id, ccf);
        }
        if let Some(price) = seed_price {
            upt_seed.price.insert(product_id, price);
        }

        let fresh_ccf: Vec<CumulativeCashflow> =
            cumulative_cashflows(after.iter(), &mut ccf_seed).collect();

        let mut price_events: Vec<PriceUpdate> = self
            .store
            .stream_bucketed_prices_after(tx, g.suffix, Scope::Product(product_id), watermark)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();

        if g.include_realtime {
            let newest_bucket_t = price_events
                .last()
                .map(|p| p.t)
                .or(watermark)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            let realtime = self
                .store
                .stream_price_updates_after(tx, product_id, newest_bucket_t)
                .await?;
            price_events.extend(realtime);
        }

        let merged = merge_sorted(vec![
            fresh_ccf.into_iter().map(Event::CumulativeCashflow).collect::<Vec<_>>().into_iter(),
            price_events.into_iter().map(Event::PriceUpdate).collect::<Vec<_>>().into_iter(),
        ]);
        let fresh: Vec<UserProductEntry> = user_product_timeline(merged, &mut upt_seed, g.suffix).collect();

        Ok((seed_entry, fresh))
    }

    // --- Retention GC --------------------------------------------------

    /// Drops cache rows older than each granularity's retention
    /// window, except the most recent row per key, which is needed as
    /// a seed.
    #[instrument(skip(self))]
    pub async fn retention_gc(&self) -> EngineResult<()> {
        let mut timer = OperationTimer::start("retention_gc");
        let mut tx = match self.store.begin_transaction().await {
            Ok(tx) => tx,
            Err(e) => {
                timer.mark_error();
                return Err(e);
            },
        };
        match self.retention_gc_inner(&mut tx).await {
            Ok(()) => self.store.commit_transaction(tx).await.map_err(|e| {
                timer.mark_error();
                e
            }),
            Err(e) => {
                let _ = self.store.rollback_transaction(tx).await;
                timer.mark_error();
                Err(e)
            },
        }
    }

    async fn retention_gc_inner(&self, tx: &mut S::Tx<'_>) -> EngineResult<()> {
        let now = self.clock.now();
        for g in self.config.granularities.iter() {
            let Some(retention) = g.cache_retention else {
                continue;
            };
            let window = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
            let cutoff = now - window;
            self.store
                .retention_gc_user_product_timeline(tx, g.suffix, cutoff)
                .await?;
            self.store.retention_gc_user_timeline(tx, g.suffix, cutoff).await?;
            RETENTION_ROWS_DELETED
                .with_label_values(&["user_product_timeline", g.suffix])
                .inc();
            RETENTION_ROWS_DELETED
                .with_label_values(&["user_timeline", g.suffix])
                .inc();
        }
        Ok(())
    }
}

fn build_cumulative_seed(
    latest: HashMap<(InvestorId, ProductId), CumulativeCashflow>,
) -> EngineResult<CumulativeCashflowSeed> {
    let mut seed = CumulativeCashflowSeed::new();
    for ((user_id, product_id), ccf) in latest {
        ccf.check_invariants().map_err(EngineError::Corruption)?;
        seed.entry(user_id).or_default().insert(product_id, ccf);
    }
    Ok(seed)
}

/// Validates every loaded `user_product_timeline_cache` row before it
/// seeds a fold: a corrupt row would otherwise silently propagate
/// through every later emission derived from it.
fn check_upt_entries<'a>(entries: impl Iterator<Item = &'a UserProductEntry>) -> EngineResult<()> {
    for entry in entries {
        entry.check_invariants().map_err(EngineError::Corruption)?;
    }
    Ok(())
}

/// Reconstructs a `CumulativeCashflow` from a persisted
/// `UserProductEntry`: every cumulative field the fold kernels read
/// (`units`, `net_investment`, ...) round-trips exactly; `cashflow_id`
/// is not carried by the UPT cache (it only matters within the
/// cumulative layer itself) and is seeded with a nil placeholder,
/// which no downstream kernel reads.
fn cumulative_from_entry(entry: &UserProductEntry) -> CumulativeCashflow {
    CumulativeCashflow {
        user_id: entry.user_id,
        product_id: entry.product_id,
        t: entry.t,
        cashflow_id: CashflowId::from_uuid(uuid::Uuid::nil()),
        units: entry.units.clone(),
        net_investment: entry.net_investment.clone(),
        deposits: entry.deposits.clone(),
        withdrawals: entry.withdrawals.clone(),
        fees: entry.fees.clone(),
        buy_units: entry.buy_units.clone(),
        sell_units: entry.sell_units.clone(),
        buy_cost: entry.buy_cost.clone(),
        sell_proceeds: entry.sell_proceeds.clone(),
    }
}
