//! `user_timeline`: per-user running totals across every product.
//! Canonical `cost_basis`/`sell_basis` formula: the delta-applied
//! running total, chosen because it stays additive across insertions
//! and removals and matches the same-timestamp invariants a
//! same-instant buy-and-sell must satisfy.

use std::collections::HashMap;

use crate::decimal::Money;
use crate::ids::{InvestorId, ProductId};
use crate::model::{UserEntry, UserProductEntry};
use crate::streaming::dedup_by_timestamp;

/// `seed_upt[user][product] -> latest UserProductEntry`.
pub type UserTimelineSeed = HashMap<InvestorId, HashMap<ProductId, UserProductEntry>>;

/// Maintains per-user running totals seeded from `seed`, applying
/// each input entry's delta against the previously seen entry for
/// that `(user, product)` (a zero entry if none). Same-timestamp
/// inputs for the same user collapse to the last via
/// `dedup_by_timestamp`, matching the canonical "last wins" rule.
pub fn user_timeline<'a, I: Iterator<Item = UserProductEntry> + 'a>(
    entries: I,
    seed: &'a mut UserTimelineSeed,
    granularity: &'static str,
) -> impl Iterator<Item = UserEntry> + 'a {
    // `totals[user]` starts from the sum over the user's seeded
    // per-product entries.
    let mut totals: HashMap<InvestorId, UserEntry> = HashMap::new();
    for (user_id, by_product) in seed.iter() {
        let mut running = UserEntry::zero(*user_id, chrono::DateTime::<chrono::Utc>::MIN_UTC, granularity);
        for upt in by_product.values() {
            accumulate(&mut running, upt, &zero_product_entry(upt));
        }
        totals.insert(*user_id, running);
    }

    let emissions = entries.map(move |upt| {
        let prev = seed
            .get(&upt.user_id)
            .and_then(|by_product| by_product.get(&upt.product_id))
            .cloned()
            .unwrap_or_else(|| {
                UserProductEntry::zero(
                    upt.user_id,
                    upt.product_id,
                    chrono::DateTime::<chrono::Utc>::MIN_UTC,
                    granularity,
                )
            });

        let running = totals
            .entry(upt.user_id)
            .or_insert_with(|| UserEntry::zero(upt.user_id, upt.t, granularity));
        accumulate(running, &upt, &prev);
        running.t = upt.t;

        seed.entry(upt.user_id)
            .or_default()
            .insert(upt.product_id, upt.clone());

        running.clone()
    });

    dedup_by_timestamp(emissions, |entry: &UserEntry| entry.full_key())
}

fn zero_product_entry(like: &UserProductEntry) -> UserProductEntry {
    UserProductEntry::zero(
        like.user_id,
        like.product_id,
        chrono::DateTime::<chrono::Utc>::MIN_UTC,
        like.granularity,
    )
}

/// `running += upt - prev`, componentwise, including the two basis
/// aggregates computed as `units * avg_buy_price` /
/// `sell_units * avg_buy_price` deltas.
fn accumulate(running: &mut UserEntry, upt: &UserProductEntry, prev: &UserProductEntry) {
    running.net_investment = &running.net_investment + (&upt.net_investment - &prev.net_investment);
    running.market_value = &running.market_value + (&upt.market_value - &prev.market_value);
    running.deposits = &running.deposits + (&upt.deposits - &prev.deposits);
    running.withdrawals = &running.withdrawals + (&upt.withdrawals - &prev.withdrawals);
    running.fees = &running.fees + (&upt.fees - &prev.fees);
    running.buy_units = &running.buy_units + (&upt.buy_units - &prev.buy_units);
    running.sell_units = &running.sell_units + (&upt.sell_units - &prev.sell_units);
    running.buy_cost = &running.buy_cost + (&upt.buy_cost - &prev.buy_cost);
    running.sell_proceeds = &running.sell_proceeds + (&upt.sell_proceeds - &prev.sell_proceeds);

    let cost_basis_delta: Money =
        &upt.units * &upt.avg_buy_price - &prev.units * &prev.avg_buy_price;
    running.cost_basis = &running.cost_basis + cost_basis_delta;

    let sell_basis_delta: Money =
        &upt.sell_units * &upt.avg_buy_price - &prev.sell_units * &prev.avg_buy_price;
    running.sell_basis = &running.sell_basis + sell_basis_delta;
}
