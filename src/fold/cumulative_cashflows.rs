//! `cumulative_cashflows`: the additive fold over a user-product's
//! full cashflow history.

use std::collections::HashMap;

use crate::ids::{InvestorId, ProductId};
use crate::model::{Cashflow, CumulativeCashflow};

/// `seed[user][product] -> latest CumulativeCashflow`. Plain nested
/// maps, never back-pointers.
pub type CumulativeCashflowSeed = HashMap<InvestorId, HashMap<ProductId, CumulativeCashflow>>;

/// For each cashflow in timestamp order, looks up the previous
/// cumulative (or a zero record), emits `seed ⊕ cashflow`, and
/// updates the seed in place so a chained computation sees the latest
/// state.
///
/// The input iterator must already be in timestamp order, stable
/// tie-break by `cashflow_id` — callers are responsible for
/// establishing this order before handing the stream to the kernel,
/// since the kernel itself is a pure, order-preserving transform.
pub fn cumulative_cashflows<'a, I: Iterator<Item = &'a Cashflow> + 'a>(
    cashflows: I,
    seed: &'a mut CumulativeCashflowSeed,
) -> impl Iterator<Item = CumulativeCashflow> + 'a {
    cashflows.map(move |c| {
        let start = seed
            .get(&c.user_id)
            .and_then(|by_product| by_product.get(&c.product_id))
            .cloned()
            .unwrap_or_else(|| CumulativeCashflow::zero(c.user_id, c.product_id, c.id, c.t));

        let emitted = CumulativeCashflow::combine(&start, c);
        seed.entry(c.user_id)
            .or_default()
            .insert(c.product_id, emitted.clone());
        emitted
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Money;
    use chrono::{TimeZone, Utc};
    use std::str::FromStr;

    fn m(s: &str) -> Money {
        Money::from_str(s).unwrap()
    }

    fn cf(
        user: InvestorId,
        product: ProductId,
        units: &str,
        price: &str,
        fees: &str,
        secs: i64,
    ) -> Cashflow {
        let units_delta = m(units);
        let exec_price = m(price);
        let exec_money = &units_delta * &exec_price;
        let fees = m(fees);
        let user_money = &exec_money + &fees;
        Cashflow {
            id: crate::ids::CashflowId::new(),
            user_id: user,
            product_id: product,
            t: Utc.timestamp_opt(secs, 0).unwrap(),
            units_delta,
            exec_price,
            exec_money,
            user_money,
            fees,
        }
    }

    // A sequence of buys and a sell, checking the running `units` at
    // each cumulative point.
    #[test]
    fn folds_in_timestamp_order_and_updates_seed() {
        let user = InvestorId::new();
        let product = ProductId::new();
        let cashflows = vec![
            cf(user, product, "10", "100", "0", 100),
            cf(user, product, "-4", "110", "0", 200),
            cf(user, product, "8", "120", "0", 300),
        ];

        let mut seed = CumulativeCashflowSeed::new();
        let out: Vec<_> = cumulative_cashflows(cashflows.iter(), &mut seed).collect();

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].units, m("10"));
        assert_eq!(out[1].units, m("6"));
        assert_eq!(out[2].units, m("14"));

        let seeded = &seed[&user][&product];
        assert_eq!(seeded.units, m("14"));
    }

    #[test]
    fn resumes_from_a_non_zero_seed() {
        let user = InvestorId::new();
        let product = ProductId::new();
        let prior = cf(user, product, "10", "100", "0", 100);
        let mut seed = CumulativeCashflowSeed::new();
        seed.entry(user).or_default().insert(
            product,
            CumulativeCashflow::combine(
                &CumulativeCashflow::zero(user, product, prior.id, prior.t),
                &prior,
            ),
        );

        let next = cf(user, product, "5", "100", "0", 200);
        let out: Vec<_> = cumulative_cashflows(std::iter::once(&next), &mut seed).collect();
        assert_eq!(out[0].units, m("15"));
    }
}
