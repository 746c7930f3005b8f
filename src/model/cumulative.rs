//! `CumulativeCashflow` and the componentwise combine `s ⊕ c`
//! that is the heart of the cumulative-cashflow fold kernel.

use crate::decimal::{within_epsilon, zero, Money};
use crate::ids::{CashflowId, InvestorId, ProductId};
use crate::model::cashflow::Cashflow;
use chrono::{DateTime, Utc};

/// Running fold of all cashflows for one `(user, product)` pair
/// through `t`.
#[derive(Clone, Debug, PartialEq)]
pub struct CumulativeCashflow {
    pub user_id: InvestorId,
    pub product_id: ProductId,
    pub t: DateTime<Utc>,
    pub cashflow_id: CashflowId,

    pub units: Money,
    pub net_investment: Money,
    pub deposits: Money,
    pub withdrawals: Money,
    pub fees: Money,
    pub buy_units: Money,
    pub sell_units: Money,
    pub buy_cost: Money,
    pub sell_proceeds: Money,
}

impl CumulativeCashflow {
    /// The zero record for a `(user, product)` pair that has not yet
    /// transacted, anchored at a cashflow so it can be combined.
    pub fn zero(user_id: InvestorId, product_id: ProductId, cashflow_id: CashflowId, t: DateTime<Utc>) -> Self {
        Self {
            user_id,
            product_id,
            t,
            cashflow_id,
            units: zero(),
            net_investment: zero(),
            deposits: zero(),
            withdrawals: zero(),
            fees: zero(),
            buy_units: zero(),
            sell_units: zero(),
            buy_cost: zero(),
            sell_proceeds: zero(),
        }
    }

    /// `s ⊕ c`: the componentwise combine at the heart of the cumulative-cashflow fold.
    /// `seed` is the previous cumulative for this `(user, product)`,
    /// or a zero record if none exists yet.
    pub fn combine(seed: &CumulativeCashflow, c: &Cashflow) -> CumulativeCashflow {
        let is_buy = c.is_buy();
        let is_sell = c.is_sell();

        let deposit_delta: Money = if is_buy { c.user_money.clone() } else { zero() };
        let withdrawal_delta: Money = if is_sell { -c.user_money.clone() } else { zero() };
        let buy_units_delta: Money = if is_buy { c.units_delta.clone() } else { zero() };
        let sell_units_delta: Money = if is_sell { -c.units_delta.clone() } else { zero() };
        let buy_cost_delta: Money = if is_buy { c.exec_money.clone() } else { zero() };
        let sell_proceeds_delta: Money = if is_sell { -c.exec_money.clone() } else { zero() };

        CumulativeCashflow {
            user_id: c.user_id,
            product_id: c.product_id,
            t: c.t,
            cashflow_id: c.id,
            units: &seed.units + &c.units_delta,
            net_investment: &seed.net_investment + &c.user_money,
            deposits: &seed.deposits + deposit_delta,
            withdrawals: &seed.withdrawals + withdrawal_delta,
            fees: &seed.fees + &c.fees,
            buy_units: &seed.buy_units + buy_units_delta,
            sell_units: &seed.sell_units + sell_units_delta,
            buy_cost: &seed.buy_cost + buy_cost_delta,
            sell_proceeds: &seed.sell_proceeds + sell_proceeds_delta,
        }
    }

    /// Checks the invariants a loaded cache row must satisfy:
    /// non-negative buy/sell/deposit/withdrawal/fee components, and
    /// the two identities `units = buy_units - sell_units` and
    /// `net_investment = deposits - withdrawals`. Returns a
    /// human-readable description of the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        for (name, value) in [
            ("buy_units", &self.buy_units),
            ("sell_units", &self.sell_units),
            ("buy_cost", &self.buy_cost),
            ("sell_proceeds", &self.sell_proceeds),
            ("deposits", &self.deposits),
            ("withdrawals", &self.withdrawals),
            ("fees", &self.fees),
        ] {
            if *value < zero() {
                return Err(format!(
                    "cumulative_cashflow_cache row for ({}, {}) at {}: {name} is negative ({value})",
                    self.user_id.0, self.product_id.0, self.t
                ));
            }
        }
        let units_expected = &self.buy_units - &self.sell_units;
        if !within_epsilon(&self.units, &units_expected) {
            return Err(format!(
                "cumulative_cashflow_cache row for ({}, {}) at {}: units {} != buy_units - sell_units {}",
                self.user_id.0, self.product_id.0, self.t, self.units, units_expected
            ));
        }
        let net_investment_expected = &self.deposits - &self.withdrawals;
        if !within_epsilon(&self.net_investment, &net_investment_expected) {
            return Err(format!(
                "cumulative_cashflow_cache row for ({}, {}) at {}: net_investment {} != deposits - withdrawals {}",
                self.user_id.0, self.product_id.0, self.t, self.net_investment, net_investment_expected
            ));
        }
        Ok(())
    }
}

impl crate::streaming::Timestamped for CumulativeCashflow {
    fn timestamp(&self) -> DateTime<Utc> {
        self.t
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Money;
    use std::str::FromStr;

    fn m(s: &str) -> Money {
        Money::from_str(s).unwrap()
    }

    fn cf(user: InvestorId, product: ProductId, units: &str, price: &str, fees: &str, t: DateTime<Utc>) -> Cashflow {
        let units_delta = m(units);
        let exec_price = m(price);
        let exec_money = &units_delta * &exec_price;
        let fees = m(fees);
        let user_money = &exec_money + &fees;
        Cashflow {
            id: CashflowId::new(),
            user_id: user,
            product_id: product,
            t,
            units_delta,
            exec_price,
            exec_money,
            user_money,
            fees,
        }
    }

    // Same-timestamp buy and sell, buys/sells tracked separately.
    #[test]
    fn tracks_buys_and_sells_separately_at_same_timestamp() {
        let user = InvestorId::new();
        let product = ProductId::new();
        let t = Utc::now();

        let buy = cf(user, product, "10", "100", "10", t);
        let sell = cf(user, product, "-5", "105", "5", t);

        let zero_seed = CumulativeCashflow::zero(user, product, buy.id, t);
        let after_buy = CumulativeCashflow::combine(&zero_seed, &buy);
        let after_sell = CumulativeCashflow::combine(&after_buy, &sell);

        assert_eq!(after_sell.buy_units, m("10"));
        assert_eq!(after_sell.sell_units, m("5"));
        assert_eq!(after_sell.buy_cost, m("1000"));
        assert_eq!(after_sell.sell_proceeds, m("525"));
        assert_eq!(after_sell.deposits, m("1010"));
        assert_eq!(after_sell.withdrawals, m("520"));
        assert_eq!(after_sell.fees, m("15"));
        assert_eq!(after_sell.units, m("5"));
        assert_eq!(after_sell.net_investment, m("490"));
    }

    // Invariant: units = buy_units - sell_units, net_investment = deposits - withdrawals.
    #[test]
    fn net_identity_holds() {
        let user = InvestorId::new();
        let product = ProductId::new();
        let t = Utc::now();
        let buy = cf(user, product, "10", "100", "0", t);
        let zero_seed = CumulativeCashflow::zero(user, product, buy.id, t);
        let after = CumulativeCashflow::combine(&zero_seed, &buy);
        assert_eq!(after.units, &after.buy_units - &after.sell_units);
        assert_eq!(
            after.net_investment,
            &after.deposits - &after.withdrawals
        );
    }
}
