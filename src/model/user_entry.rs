//! `UserEntry[g]`, the output of the per-user fold kernel: per-product
//! sums plus the two basis aggregates.

use crate::decimal::{zero, Money};
use crate::ids::InvestorId;
use chrono::{DateTime, Utc};

#[derive(Clone, Debug, PartialEq)]
pub struct UserEntry {
    pub user_id: InvestorId,
    pub t: DateTime<Utc>,
    pub granularity: &'static str,

    pub net_investment: Money,
    pub market_value: Money,
    pub deposits: Money,
    pub withdrawals: Money,
    pub fees: Money,
    pub buy_units: Money,
    pub sell_units: Money,
    pub buy_cost: Money,
    pub sell_proceeds: Money,
    pub cost_basis: Money,
    pub sell_basis: Money,
}

impl UserEntry {
    pub fn zero(user_id: InvestorId, t: DateTime<Utc>, granularity: &'static str) -> Self {
        Self {
            user_id,
            t,
            granularity,
            net_investment: zero(),
            market_value: zero(),
            deposits: zero(),
            withdrawals: zero(),
            fees: zero(),
            buy_units: zero(),
            sell_units: zero(),
            buy_cost: zero(),
            sell_proceeds: zero(),
            cost_basis: zero(),
            sell_basis: zero(),
        }
    }

    pub fn full_key(&self) -> (InvestorId, DateTime<Utc>) {
        (self.user_id, self.t)
    }
}
