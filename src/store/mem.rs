//! `MemStore`: an in-memory `Store` implementation used by this
//! crate's own tests (end-to-end scenarios, invariants). It implements
//! the same contract `PgStore` does, including performing the
//! bucketing itself rather than delegating to a real materialized
//! view — there is no external store here to delegate to, so
//! `MemStore` stands in for both the engine side and the storage side
//! of the `refresh_bucketing(g)` contract.
//!
//! Keeping a `Store`-shaped trait means tests never need a live
//! Postgres instance; this crate's core has no GRPC/on-chain event
//! source to mock, so the in-memory store is the whole test fixture.
//!
//! `MemTx` gives the in-memory store the same transaction semantics as
//! `PgStore`: `begin_transaction` takes the lock and clones the guarded
//! state into a shadow copy; every call during the transaction mutates
//! only the shadow; `commit_transaction` splices the shadow back over
//! the guarded state, `rollback_transaction` just drops it, leaving the
//! original untouched.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::GranularityTable;
use crate::decimal::Money;
use crate::error::EngineResult;
use crate::ids::{InvestorId, ProductId};
use crate::model::{
    BucketedPriceUpdate, Cashflow, CumulativeCashflow, PriceUpdate, UserEntry, UserProductEntry,
};
use crate::streaming::batch::{batch_upsert, BatchSink};

use super::{Scope, Store};

#[derive(Default, Clone)]
struct Inner {
    price_updates: HashMap<ProductId, Vec<PriceUpdate>>,
    cashflows: Vec<Cashflow>,
    // granularity suffix -> product -> bucketed rows, sorted by t.
    bucketed: HashMap<&'static str, HashMap<ProductId, Vec<PriceUpdate>>>,
    cumulative_cache: Vec<CumulativeCashflow>,
    upt_cache: HashMap<&'static str, Vec<UserProductEntry>>,
    ut_cache: HashMap<&'static str, Vec<UserEntry>>,
}

pub struct MemStore {
    granularities: GranularityTable,
    inner: Mutex<Inner>,
}

/// `MemStore`'s unit of work: the lock held for the transaction's
/// whole lifetime, plus a shadow copy every call mutates.
pub struct MemTx<'c> {
    guard: MutexGuard<'c, Inner>,
    shadow: Inner,
}

struct VecSink<'a, T> {
    target: std::sync::Mutex<&'a mut Vec<T>>,
    key_eq: fn(&T, &T) -> bool,
}

#[async_trait]
impl<T: Clone + Send + Sync> BatchSink<T> for VecSink<'_, T> {
    async fn upsert_batch(&self, items: &[T]) -> EngineResult<()> {
        let mut target = self.target.lock().unwrap();
        for item in items {
            let exists = target.iter().any(|r| (self.key_eq)(r, item));
            if !exists {
                target.push(item.clone());
            }
        }
        Ok(())
    }
}

impl MemStore {
    pub fn new(granularities: GranularityTable) -> Self {
        Self {
            granularities,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn interval_secs(&self, granularity: &str) -> i64 {
        self.granularities
            .get(granularity)
            .map(|g| g.interval.as_secs() as i64)
            .unwrap_or(900)
    }
}

fn bucket_start(t: DateTime<Utc>, interval_secs: i64) -> DateTime<Utc> {
    let secs = t.timestamp();
    let aligned = secs - secs.rem_euclid(interval_secs);
    DateTime::from_timestamp(aligned, 0).expect("valid bucket-aligned instant")
}

fn matches_scope_up(user_id: InvestorId, product_id: ProductId, scope: Scope) -> bool {
    match scope {
        Scope::All => true,
        Scope::User(u) => u == user_id,
        Scope::Product(p) => p == product_id,
        Scope::UserProduct(u, p) => u == user_id && p == product_id,
    }
}

fn matches_scope_product(product_id: ProductId, scope: Scope) -> bool {
    match scope {
        Scope::All => true,
        Scope::User(_) => true,
        Scope::Product(p) | Scope::UserProduct(_, p) => p == product_id,
    }
}

#[async_trait]
impl Store for MemStore {
    type Tx<'c> = MemTx<'c>;

    async fn begin_transaction(&self) -> EngineResult<Self::Tx<'_>> {
        let guard = self.inner.lock().unwrap();
        let shadow = guard.clone();
        Ok(MemTx { guard, shadow })
    }

    async fn commit_transaction(&self, mut tx: Self::Tx<'_>) -> EngineResult<()> {
        *tx.guard = tx.shadow;
        Ok(())
    }

    async fn rollback_transaction(&self, _tx: Self::Tx<'_>) -> EngineResult<()> {
        Ok(())
    }

    async fn insert_price_updates(
        &self,
        tx: &mut Self::Tx<'_>,
        items: &[PriceUpdate],
    ) -> EngineResult<()> {
        for item in items {
            let list = tx.shadow.price_updates.entry(item.product_id).or_default();
            if !list.iter().any(|p| p.t == item.t) {
                list.push(item.clone());
            }
        }
        for list in tx.shadow.price_updates.values_mut() {
            list.sort_by_key(|p| p.t);
        }
        Ok(())
    }

    async fn insert_cashflows(&self, tx: &mut Self::Tx<'_>, items: &[Cashflow]) -> EngineResult<()> {
        for item in items {
            if !tx.shadow.cashflows.iter().any(|c| c.id == item.id) {
                tx.shadow.cashflows.push(item.clone());
            }
        }
        tx.shadow.cashflows.sort_by(|a, b| (a.t, a.id.0).cmp(&(b.t, b.id.0)));
        Ok(())
    }

    async fn refresh_bucketing(&self, tx: &mut Self::Tx<'_>, granularity: &str) -> EngineResult<()> {
        let interval = self.interval_secs(granularity);
        let granularity = intern(granularity);

        let mut per_product: HashMap<ProductId, Vec<PriceUpdate>> = HashMap::new();
        for (product_id, updates) in tx.shadow.price_updates.iter() {
            let mut buckets: HashMap<DateTime<Utc>, Money> = HashMap::new();
            for pu in updates {
                buckets.insert(bucket_start(pu.t, interval), pu.price.clone());
            }
            let mut rows: Vec<PriceUpdate> = buckets
                .into_iter()
                .map(|(t, price)| PriceUpdate {
                    product_id: *product_id,
                    t,
                    price,
                })
                .collect();
            rows.sort_by_key(|r| r.t);
            per_product.insert(*product_id, rows);
        }
        tx.shadow.bucketed.insert(granularity, per_product);
        Ok(())
    }

    async fn stream_price_updates_after(
        &self,
        tx: &mut Self::Tx<'_>,
        product_id: ProductId,
        after: DateTime<Utc>,
    ) -> EngineResult<Vec<PriceUpdate>> {
        Ok(tx
            .shadow
            .price_updates
            .get(&product_id)
            .map(|list| list.iter().filter(|p| p.t > after).cloned().collect())
            .unwrap_or_default())
    }

    async fn latest_cumulative_cashflows(
        &self,
        tx: &mut Self::Tx<'_>,
        scope: Scope,
    ) -> EngineResult<HashMap<(InvestorId, ProductId), CumulativeCashflow>> {
        let mut latest: HashMap<(InvestorId, ProductId), CumulativeCashflow> = HashMap::new();
        for row in &tx.shadow.cumulative_cache {
            if !matches_scope_up(row.user_id, row.product_id, scope) {
                continue;
            }
            let key = (row.user_id, row.product_id);
            match latest.get(&key) {
                Some(cur) if cur.t >= row.t => {},
                _ => {
                    latest.insert(key, row.clone());
                },
            }
        }
        Ok(latest)
    }

    async fn cumulative_cashflow_watermark(
        &self,
        tx: &mut Self::Tx<'_>,
        scope: Scope,
    ) -> EngineResult<Option<DateTime<Utc>>> {
        Ok(tx
            .shadow
            .cumulative_cache
            .iter()
            .filter(|r| matches_scope_up(r.user_id, r.product_id, scope))
            .map(|r| r.t)
            .max())
    }

    async fn stream_cashflows_after(
        &self,
        tx: &mut Self::Tx<'_>,
        scope: Scope,
        after: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<Cashflow>> {
        Ok(tx
            .shadow
            .cashflows
            .iter()
            .filter(|c| matches_scope_up(c.user_id, c.product_id, scope))
            .filter(|c| after.map_or(true, |after| c.t > after))
            .cloned()
            .collect())
    }

    async fn upsert_cumulative_cashflows(
        &self,
        tx: &mut Self::Tx<'_>,
        rows: &[CumulativeCashflow],
        batch_size: usize,
    ) -> EngineResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let sink = VecSink {
            target: std::sync::Mutex::new(&mut tx.shadow.cumulative_cache),
            key_eq: |r: &CumulativeCashflow, row: &CumulativeCashflow| {
                r.user_id == row.user_id && r.product_id == row.product_id && r.t == row.t
            },
        };
        batch_upsert(rows.to_vec(), &sink, batch_size).await?;
        Ok(())
    }

    async fn delete_cumulative_cashflow_rows(
        &self,
        tx: &mut Self::Tx<'_>,
        user_id: InvestorId,
        product_id: ProductId,
        from_t: DateTime<Utc>,
    ) -> EngineResult<()> {
        tx.shadow
            .cumulative_cache
            .retain(|r| !(r.user_id == user_id && r.product_id == product_id && r.t >= from_t));
        Ok(())
    }

    async fn latest_user_product_entries(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        scope: Scope,
    ) -> EngineResult<HashMap<(InvestorId, ProductId), UserProductEntry>> {
        let mut latest: HashMap<(InvestorId, ProductId), UserProductEntry> = HashMap::new();
        if let Some(rows) = tx.shadow.upt_cache.get(granularity) {
            for row in rows {
                if !matches_scope_up(row.user_id, row.product_id, scope) {
                    continue;
                }
                let key = (row.user_id, row.product_id);
                match latest.get(&key) {
                    Some(cur) if cur.t >= row.t => {},
                    _ => {
                        latest.insert(key, row.clone());
                    },
                }
            }
        }
        Ok(latest)
    }

    async fn user_product_timeline_watermark(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        scope: Scope,
    ) -> EngineResult<Option<DateTime<Utc>>> {
        Ok(tx.shadow.upt_cache.get(granularity).and_then(|rows| {
            rows.iter()
                .filter(|r| matches_scope_up(r.user_id, r.product_id, scope))
                .map(|r| r.t)
                .max()
        }))
    }

    async fn latest_bucketed_price_at_or_before(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        product_id: ProductId,
        at: DateTime<Utc>,
    ) -> EngineResult<Option<Money>> {
        Ok(tx
            .shadow
            .bucketed
            .get(granularity)
            .and_then(|by_product| by_product.get(&product_id))
            .and_then(|rows| rows.iter().filter(|r| r.t <= at).last())
            .map(|r| r.price.clone()))
    }

    async fn stream_bucketed_prices_after(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        scope: Scope,
        after: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<BucketedPriceUpdate>> {
        let Some(by_product) = tx.shadow.bucketed.get(granularity) else {
            return Ok(vec![]);
        };
        let mut out: Vec<BucketedPriceUpdate> = by_product
            .iter()
            .filter(|(product_id, _)| matches_scope_product(**product_id, scope))
            .flat_map(|(_, rows)| rows.iter().cloned())
            .filter(|r| after.map_or(true, |after| r.t > after))
            .map(|r| BucketedPriceUpdate {
                product_id: r.product_id,
                t: r.t,
                price: r.price,
            })
            .collect();
        out.sort_by_key(|r| r.t);
        Ok(out)
    }

    async fn upsert_user_product_timeline(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        rows: &[UserProductEntry],
        batch_size: usize,
    ) -> EngineResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let cache = tx.shadow.upt_cache.entry(intern(granularity)).or_default();
        let sink = VecSink {
            target: std::sync::Mutex::new(cache),
            key_eq: |r: &UserProductEntry, row: &UserProductEntry| {
                r.user_id == row.user_id && r.product_id == row.product_id && r.t == row.t
            },
        };
        batch_upsert(rows.to_vec(), &sink, batch_size).await?;
        Ok(())
    }

    async fn delete_user_product_timeline_rows(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        user_id: InvestorId,
        product_id: ProductId,
        from_t: DateTime<Utc>,
    ) -> EngineResult<()> {
        if let Some(rows) = tx.shadow.upt_cache.get_mut(granularity) {
            rows.retain(|r| !(r.user_id == user_id && r.product_id == product_id && r.t >= from_t));
        }
        Ok(())
    }

    async fn query_user_product_timeline_cache(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        user_id: InvestorId,
        product_id: ProductId,
    ) -> EngineResult<Vec<UserProductEntry>> {
        let mut out: Vec<UserProductEntry> = tx
            .shadow
            .upt_cache
            .get(granularity)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.user_id == user_id && r.product_id == product_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by_key(|r| r.t);
        Ok(out)
    }

    async fn user_timeline_watermark(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        scope: Scope,
    ) -> EngineResult<Option<DateTime<Utc>>> {
        Ok(tx.shadow.ut_cache.get(granularity).and_then(|rows| {
            rows.iter()
                .filter(|r| match scope {
                    Scope::User(u) => u == r.user_id,
                    _ => true,
                })
                .map(|r| r.t)
                .max()
        }))
    }

    async fn stream_user_product_timeline_after(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        scope: Scope,
        after: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<UserProductEntry>> {
        let mut out: Vec<UserProductEntry> = tx
            .shadow
            .upt_cache
            .get(granularity)
            .map(|rows| {
                rows.iter()
                    .filter(|r| matches_scope_up(r.user_id, r.product_id, scope))
                    .filter(|r| after.map_or(true, |after| r.t > after))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by_key(|r| r.t);
        Ok(out)
    }

    async fn upsert_user_timeline(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        rows: &[UserEntry],
        batch_size: usize,
    ) -> EngineResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let cache = tx.shadow.ut_cache.entry(intern(granularity)).or_default();
        let sink = VecSink {
            target: std::sync::Mutex::new(cache),
            key_eq: |r: &UserEntry, row: &UserEntry| r.user_id == row.user_id && r.t == row.t,
        };
        batch_upsert(rows.to_vec(), &sink, batch_size).await?;
        Ok(())
    }

    async fn delete_user_timeline_rows(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        user_id: InvestorId,
        from_t: DateTime<Utc>,
    ) -> EngineResult<()> {
        if let Some(rows) = tx.shadow.ut_cache.get_mut(granularity) {
            rows.retain(|r| !(r.user_id == user_id && r.t >= from_t));
        }
        Ok(())
    }

    async fn query_user_timeline_cache(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        user_id: InvestorId,
    ) -> EngineResult<Vec<UserEntry>> {
        let mut out: Vec<UserEntry> = tx
            .shadow
            .ut_cache
            .get(granularity)
            .map(|rows| rows.iter().filter(|r| r.user_id == user_id).cloned().collect())
            .unwrap_or_default();
        out.sort_by_key(|r| r.t);
        Ok(out)
    }

    async fn retention_gc_user_product_timeline(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        cutoff: DateTime<Utc>,
    ) -> EngineResult<()> {
        let Some(rows) = tx.shadow.upt_cache.get_mut(granularity) else {
            return Ok(());
        };
        let mut latest_t: HashMap<(InvestorId, ProductId), DateTime<Utc>> = HashMap::new();
        for row in rows.iter() {
            let key = (row.user_id, row.product_id);
            let entry = latest_t.entry(key).or_insert(row.t);
            if row.t > *entry {
                *entry = row.t;
            }
        }
        rows.retain(|r| {
            r.t >= cutoff || latest_t.get(&(r.user_id, r.product_id)) == Some(&r.t)
        });
        Ok(())
    }

    async fn retention_gc_user_timeline(
        &self,
        tx: &mut Self::Tx<'_>,
        granularity: &str,
        cutoff: DateTime<Utc>,
    ) -> EngineResult<()> {
        let Some(rows) = tx.shadow.ut_cache.get_mut(granularity) else {
            return Ok(());
        };
        let mut latest_t: HashMap<InvestorId, DateTime<Utc>> = HashMap::new();
        for row in rows.iter() {
            let entry = latest_t.entry(row.user_id).or_insert(row.t);
            if row.t > *entry {
                *entry = row.t;
            }
        }
        rows.retain(|r| r.t >= cutoff || latest_t.get(&r.user_id) == Some(&r.t));
        Ok(())
    }
}

/// Interns a runtime granularity suffix into `&'static str`, the same
/// leak-once-and-cache approach `PgStore::leak_granularity` uses, so
/// `Inner`'s maps (keyed by `&'static str` to match
/// `UserProductEntry`/`UserEntry`'s `granularity` field) never grow
/// unboundedly under repeated calls with the same suffix.
fn intern(g: &str) -> &'static str {
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    static INTERNED: once_cell::sync::Lazy<StdMutex<HashSet<&'static str>>> =
        once_cell::sync::Lazy::new(|| StdMutex::new(HashSet::new()));
    let mut set = INTERNED.lock().unwrap();
    if let Some(found) = set.get(g) {
        return found;
    }
    let leaked: &'static str = Box::leak(g.to_string().into_boxed_str());
    set.insert(leaked);
    leaked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GranularityConfig;
    use std::str::FromStr;
    use std::time::Duration;

    fn granularities() -> GranularityTable {
        GranularityTable::new(vec![GranularityConfig {
            suffix: "15min",
            interval: Duration::from_secs(15 * 60),
            cache_retention: None,
            include_realtime: false,
        }])
        .unwrap()
    }

    #[tokio::test]
    async fn buckets_last_price_per_window() {
        let store = MemStore::new(granularities());
        let product = ProductId::new();
        let mut tx = store.begin_transaction().await.unwrap();
        store
            .insert_price_updates(
                &mut tx,
                &[
                    PriceUpdate {
                        product_id: product,
                        t: DateTime::from_timestamp(12 * 3600, 0).unwrap(),
                        price: Money::from_str("100").unwrap(),
                    },
                    PriceUpdate {
                        product_id: product,
                        t: DateTime::from_timestamp(12 * 3600 + 5 * 60, 0).unwrap(),
                        price: Money::from_str("110").unwrap(),
                    },
                ],
            )
            .await
            .unwrap();
        store.refresh_bucketing(&mut tx, "15min").await.unwrap();
        let price = store
            .latest_bucketed_price_at_or_before(
                &mut tx,
                "15min",
                product,
                DateTime::from_timestamp(12 * 3600 + 10 * 60, 0).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(price, Some(Money::from_str("110").unwrap()));
        store.commit_transaction(tx).await.unwrap();
    }
}
