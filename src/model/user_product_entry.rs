//! `UserProductEntry[g]`, the output of the user-product timeline fold
//! kernel.

use crate::decimal::{safe_div, within_epsilon, zero, Money};
use crate::ids::{InvestorId, ProductId};
use crate::model::cumulative::CumulativeCashflow;
use chrono::{DateTime, Utc};

#[derive(Clone, Debug, PartialEq)]
pub struct UserProductEntry {
    pub user_id: InvestorId,
    pub product_id: ProductId,
    pub t: DateTime<Utc>,
    pub granularity: &'static str,

    pub units: Money,
    pub net_investment: Money,
    pub deposits: Money,
    pub withdrawals: Money,
    pub fees: Money,
    pub buy_units: Money,
    pub sell_units: Money,
    pub buy_cost: Money,
    pub sell_proceeds: Money,

    pub market_value: Money,
    pub avg_buy_price: Money,
    pub avg_sell_price: Money,
}

impl UserProductEntry {
    /// Builds an entry from a cumulative cashflow and the price in
    /// effect at `t`: `market_value = units * price`,
    /// averages derived with the zero-denominator guard.
    pub fn from_cumulative(
        ccf: &CumulativeCashflow,
        t: DateTime<Utc>,
        granularity: &'static str,
        price: &Money,
    ) -> Self {
        Self {
            user_id: ccf.user_id,
            product_id: ccf.product_id,
            t,
            granularity,
            units: ccf.units.clone(),
            net_investment: ccf.net_investment.clone(),
            deposits: ccf.deposits.clone(),
            withdrawals: ccf.withdrawals.clone(),
            fees: ccf.fees.clone(),
            buy_units: ccf.buy_units.clone(),
            sell_units: ccf.sell_units.clone(),
            buy_cost: ccf.buy_cost.clone(),
            sell_proceeds: ccf.sell_proceeds.clone(),
            market_value: &ccf.units * price,
            avg_buy_price: safe_div(&ccf.buy_cost, &ccf.buy_units),
            avg_sell_price: safe_div(&ccf.sell_proceeds, &ccf.sell_units),
        }
    }

    pub fn zero(
        user_id: InvestorId,
        product_id: ProductId,
        t: DateTime<Utc>,
        granularity: &'static str,
    ) -> Self {
        Self {
            user_id,
            product_id,
            t,
            granularity,
            units: zero(),
            net_investment: zero(),
            deposits: zero(),
            withdrawals: zero(),
            fees: zero(),
            buy_units: zero(),
            sell_units: zero(),
            buy_cost: zero(),
            sell_proceeds: zero(),
            market_value: zero(),
            avg_buy_price: zero(),
            avg_sell_price: zero(),
        }
    }

    /// The same `(user_id, product_id, t)` full key — used by
    /// `dedup_by_timestamp` to decide whether two
    /// consecutive emissions collapse.
    pub fn full_key(&self) -> (InvestorId, ProductId, DateTime<Utc>) {
        (self.user_id, self.product_id, self.t)
    }

    /// Checks the same non-negativity and identity invariants
    /// `CumulativeCashflow::check_invariants` does, on the cache row
    /// loaded back from `user_product_timeline_cache`.
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
                    "user_product_timeline_cache[{}] row for ({}, {}) at {}: {name} is negative ({value})",
                    self.granularity, self.user_id.0, self.product_id.0, self.t
                ));
            }
        }
        let units_expected = &self.buy_units - &self.sell_units;
        if !within_epsilon(&self.units, &units_expected) {
            return Err(format!(
                "user_product_timeline_cache[{}] row for ({}, {}) at {}: units {} != buy_units - sell_units {}",
                self.granularity, self.user_id.0, self.product_id.0, self.t, self.units, units_expected
            ));
        }
        let net_investment_expected = &self.deposits - &self.withdrawals;
        if !within_epsilon(&self.net_investment, &net_investment_expected) {
            return Err(format!(
                "user_product_timeline_cache[{}] row for ({}, {}) at {}: net_investment {} != deposits - withdrawals {}",
                self.granularity, self.user_id.0, self.product_id.0, self.t, self.net_investment, net_investment_expected
            ));
        }
        Ok(())
    }
}
