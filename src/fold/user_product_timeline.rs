//! `user_product_timeline`: per-product market-valued position over
//! time, for one granularity.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::decimal::Money;
use crate::ids::{InvestorId, ProductId};
use crate::model::{CumulativeCashflow, PriceUpdate, UserProductEntry};
use crate::streaming::{dedup_by_timestamp, Timestamped};

/// The merge input: a cumulative-cashflow stream merged with a
/// bucketed-price stream.
#[derive(Clone, Debug)]
pub enum Event {
    CumulativeCashflow(CumulativeCashflow),
    PriceUpdate(PriceUpdate),
}

impl Timestamped for Event {
    fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::CumulativeCashflow(e) => e.t,
            Event::PriceUpdate(e) => e.t,
        }
    }
}

/// `seed_ccf[product][user] -> latest CumulativeCashflow`.
pub type CcfByProductSeed = HashMap<ProductId, HashMap<InvestorId, CumulativeCashflow>>;
/// `seed_price[product] -> latest price`.
pub type PriceSeed = HashMap<ProductId, Money>;

#[derive(Clone, Debug, Default)]
pub struct UserProductTimelineSeed {
    pub ccf_by_product: CcfByProductSeed,
    pub price: PriceSeed,
}

/// Runs the merged event stream through the kernel, buffering one
/// emission behind (`dedup_by_timestamp`) so that a cashflow and a
/// price bucket sharing a timestamp for the same `(u, p)` collapse to
/// the later-in-the-ordering entry.
pub fn user_product_timeline<I: Iterator<Item = Event>>(
    events: I,
    seed: &mut UserProductTimelineSeed,
    granularity: &'static str,
) -> impl Iterator<Item = UserProductEntry> + '_ {
    let emissions = events.flat_map(move |event| -> Vec<UserProductEntry> {
        match event {
            Event::CumulativeCashflow(ccf) => {
                let Some(price) = seed.price.get(&ccf.product_id).cloned() else {
                    // No price seen yet for this product: no market
                    // value is definable, so the position stays
                    // invisible.
                    return vec![];
                };
                let entry =
                    UserProductEntry::from_cumulative(&ccf, ccf.t, granularity, &price);
                seed.ccf_by_product
                    .entry(ccf.product_id)
                    .or_default()
                    .insert(ccf.user_id, ccf);
                vec![entry]
            },
            Event::PriceUpdate(pu) => {
                let mut out = Vec::new();
                if let Some(by_user) = seed.ccf_by_product.get(&pu.product_id) {
                    for ccf in by_user.values() {
                        out.push(UserProductEntry::from_cumulative(
                            ccf,
                            pu.t,
                            granularity,
                            &pu.price,
                        ));
                    }
                }
                seed.price.insert(pu.product_id, pu.price);
                out
            },
        }
    });

    dedup_by_timestamp(emissions, |entry: &UserProductEntry| entry.full_key())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Money;
    use crate::ids::CashflowId;
    use crate::streaming::merge_sorted;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn m(s: &str) -> Money {
        Money::from_str(s).unwrap()
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn ccf(user: InvestorId, product: ProductId, units: &str, secs: i64) -> CumulativeCashflow {
        CumulativeCashflow {
            user_id: user,
            product_id: product,
            t: t(secs),
            cashflow_id: CashflowId::new(),
            units: m(units),
            net_investment: &m(units) * m("100"),
            deposits: zero_or(units),
            withdrawals: m("0"),
            fees: m("0"),
            buy_units: m(units),
            sell_units: m("0"),
            buy_cost: &m(units) * m("100"),
            sell_proceeds: m("0"),
        }
    }

    fn zero_or(units: &str) -> Money {
        &m(units) * m("100")
    }

    fn price(product: ProductId, p: &str, secs: i64) -> PriceUpdate {
        PriceUpdate {
            product_id: product,
            t: t(secs),
            price: m(p),
        }
    }

    // Single buy, later price move.
    #[test]
    fn emits_market_value_once_price_exists() {
        let user = InvestorId::new();
        let product = ProductId::new();

        let prices = vec![price(product, "100", 59 * 60 + 11 * 3600)]; // 11:59
        let cashflows = vec![ccf(user, product, "10", 10 * 60 + 12 * 3600)]; // 12:10

        let mut seed = UserProductTimelineSeed::default();
        let merged = merge_sorted(vec![
            cashflows
                .into_iter()
                .map(Event::CumulativeCashflow)
                .collect::<Vec<_>>()
                .into_iter(),
            prices
                .into_iter()
                .map(Event::PriceUpdate)
                .collect::<Vec<_>>()
                .into_iter(),
        ]);
        let out: Vec<_> = user_product_timeline(merged, &mut seed, "15min").collect();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].units, m("10"));
        assert_eq!(out[0].market_value, m("1000"));
    }

    #[test]
    fn skips_cashflow_with_no_price_seen_yet() {
        let user = InvestorId::new();
        let product = ProductId::new();
        let cashflows = vec![Event::CumulativeCashflow(ccf(user, product, "10", 100))];
        let mut seed = UserProductTimelineSeed::default();
        let out: Vec<_> =
            user_product_timeline(cashflows.into_iter(), &mut seed, "15min").collect();
        assert!(out.is_empty());
        assert!(seed.ccf_by_product.is_empty());
    }

    // A cashflow and a price bucket at the same timestamp for the
    // same (u,p) collapse to the later-in-the-merge entry, which
    // reflects the post-cashflow position at the new price.
    #[test]
    fn same_timestamp_cashflow_and_price_collapse_to_post_cashflow_value() {
        let user = InvestorId::new();
        let product = ProductId::new();

        let mut seed = UserProductTimelineSeed::default();
        seed.price.insert(product, m("100"));

        let events = vec![
            Event::CumulativeCashflow(ccf(user, product, "10", 100)),
            Event::PriceUpdate(price(product, "110", 100)),
        ];
        let out: Vec<_> = user_product_timeline(events.into_iter(), &mut seed, "15min").collect();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].market_value, m("1100"));
    }
}
