//! Insertable/Queryable row structs for every table in `schema.rs`,
//! plus `From`/`TryFrom` conversions to and from the domain types in
//! `crate::model`. One `Queryable` struct per cache table suffices,
//! unlike a split `*Model`/`*ModelQuery` pair (needed when a
//! store-populated column like `inserted_at` must be read back
//! separately from what gets inserted) — these cache rows have no
//! store-populated column beyond the row itself.

use chrono::{DateTime, Utc};
use field_count::FieldCount;

use crate::decimal::Money;
use crate::ids::{CashflowId, InvestorId, ProductId};
use crate::model::{Cashflow, CumulativeCashflow, PriceUpdate, UserEntry, UserProductEntry};

use super::schema::{
    bucketed_price_update, cashflow, cumulative_cashflow_cache, price_update,
    user_product_timeline_cache, user_timeline_cache,
};

#[derive(Clone, Debug, FieldCount, Insertable, Queryable)]
#[diesel(table_name = price_update)]
pub struct PriceUpdateRow {
    pub product_id: ProductId,
    pub t: DateTime<Utc>,
    pub price: Money,
}

impl From<&PriceUpdate> for PriceUpdateRow {
    fn from(p: &PriceUpdate) -> Self {
        Self {
            product_id: p.product_id,
            t: p.t,
            price: p.price.clone(),
        }
    }
}

#[derive(Clone, Debug, FieldCount, Insertable, Queryable)]
#[diesel(table_name = cashflow)]
pub struct CashflowRow {
    pub id: CashflowId,
    pub user_id: InvestorId,
    pub product_id: ProductId,
    pub t: DateTime<Utc>,
    pub units_delta: Money,
    pub exec_price: Money,
    pub exec_money: Money,
    pub user_money: Money,
    pub fees: Money,
}

impl From<&Cashflow> for CashflowRow {
    fn from(c: &Cashflow) -> Self {
        Self {
            id: c.id,
            user_id: c.user_id,
            product_id: c.product_id,
            t: c.t,
            units_delta: c.units_delta.clone(),
            exec_price: c.exec_price.clone(),
            exec_money: c.exec_money.clone(),
            user_money: c.user_money.clone(),
            fees: c.fees.clone(),
        }
    }
}

impl From<CashflowRow> for Cashflow {
    fn from(r: CashflowRow) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            product_id: r.product_id,
            t: r.t,
            units_delta: r.units_delta,
            exec_price: r.exec_price,
            exec_money: r.exec_money,
            user_money: r.user_money,
            fees: r.fees,
        }
    }
}

#[derive(Clone, Debug, Queryable)]
#[diesel(table_name = bucketed_price_update)]
pub struct BucketedPriceRow {
    pub product_id: ProductId,
    pub granularity: String,
    pub bucket_start: DateTime<Utc>,
    pub price: Money,
}

#[derive(Clone, Debug, FieldCount, Insertable, Queryable)]
#[diesel(table_name = cumulative_cashflow_cache)]
#[diesel(primary_key(user_id, product_id, t))]
pub struct CumulativeCashflowRow {
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

impl From<&CumulativeCashflow> for CumulativeCashflowRow {
    fn from(c: &CumulativeCashflow) -> Self {
        Self {
            user_id: c.user_id,
            product_id: c.product_id,
            t: c.t,
            cashflow_id: c.cashflow_id,
            units: c.units.clone(),
            net_investment: c.net_investment.clone(),
            deposits: c.deposits.clone(),
            withdrawals: c.withdrawals.clone(),
            fees: c.fees.clone(),
            buy_units: c.buy_units.clone(),
            sell_units: c.sell_units.clone(),
            buy_cost: c.buy_cost.clone(),
            sell_proceeds: c.sell_proceeds.clone(),
        }
    }
}

impl From<CumulativeCashflowRow> for CumulativeCashflow {
    fn from(r: CumulativeCashflowRow) -> Self {
        Self {
            user_id: r.user_id,
            product_id: r.product_id,
            t: r.t,
            cashflow_id: r.cashflow_id,
            units: r.units,
            net_investment: r.net_investment,
            deposits: r.deposits,
            withdrawals: r.withdrawals,
            fees: r.fees,
            buy_units: r.buy_units,
            sell_units: r.sell_units,
            buy_cost: r.buy_cost,
            sell_proceeds: r.sell_proceeds,
        }
    }
}

#[derive(Clone, Debug, FieldCount, Insertable, Queryable)]
#[diesel(table_name = user_product_timeline_cache)]
#[diesel(primary_key(user_id, product_id, t, granularity))]
pub struct UserProductTimelineRow {
    pub user_id: InvestorId,
    pub product_id: ProductId,
    pub t: DateTime<Utc>,
    pub granularity: String,
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

impl From<&UserProductEntry> for UserProductTimelineRow {
    fn from(e: &UserProductEntry) -> Self {
        Self {
            user_id: e.user_id,
            product_id: e.product_id,
            t: e.t,
            granularity: e.granularity.to_string(),
            units: e.units.clone(),
            net_investment: e.net_investment.clone(),
            deposits: e.deposits.clone(),
            withdrawals: e.withdrawals.clone(),
            fees: e.fees.clone(),
            buy_units: e.buy_units.clone(),
            sell_units: e.sell_units.clone(),
            buy_cost: e.buy_cost.clone(),
            sell_proceeds: e.sell_proceeds.clone(),
            market_value: e.market_value.clone(),
            avg_buy_price: e.avg_buy_price.clone(),
            avg_sell_price: e.avg_sell_price.clone(),
        }
    }
}

impl UserProductTimelineRow {
    /// `granularity` is interned against the configured table so the
    /// domain type can keep a `&'static str` rather than an owned
    /// `String`.
    pub fn into_entry(self, granularity: &'static str) -> UserProductEntry {
        UserProductEntry {
            user_id: self.user_id,
            product_id: self.product_id,
            t: self.t,
            granularity,
            units: self.units,
            net_investment: self.net_investment,
            deposits: self.deposits,
            withdrawals: self.withdrawals,
            fees: self.fees,
            buy_units: self.buy_units,
            sell_units: self.sell_units,
            buy_cost: self.buy_cost,
            sell_proceeds: self.sell_proceeds,
            market_value: self.market_value,
            avg_buy_price: self.avg_buy_price,
            avg_sell_price: self.avg_sell_price,
        }
    }
}

#[derive(Clone, Debug, FieldCount, Insertable, Queryable)]
#[diesel(table_name = user_timeline_cache)]
#[diesel(primary_key(user_id, t, granularity))]
pub struct UserTimelineRow {
    pub user_id: InvestorId,
    pub t: DateTime<Utc>,
    pub granularity: String,
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

impl From<&UserEntry> for UserTimelineRow {
    fn from(e: &UserEntry) -> Self {
        Self {
            user_id: e.user_id,
            t: e.t,
            granularity: e.granularity.to_string(),
            net_investment: e.net_investment.clone(),
            market_value: e.market_value.clone(),
            deposits: e.deposits.clone(),
            withdrawals: e.withdrawals.clone(),
            fees: e.fees.clone(),
            buy_units: e.buy_units.clone(),
            sell_units: e.sell_units.clone(),
            buy_cost: e.buy_cost.clone(),
            sell_proceeds: e.sell_proceeds.clone(),
            cost_basis: e.cost_basis.clone(),
            sell_basis: e.sell_basis.clone(),
        }
    }
}

impl UserTimelineRow {
    pub fn into_entry(self, granularity: &'static str) -> UserEntry {
        UserEntry {
            user_id: self.user_id,
            t: self.t,
            granularity,
            net_investment: self.net_investment,
            market_value: self.market_value,
            deposits: self.deposits,
            withdrawals: self.withdrawals,
            fees: self.fees,
            buy_units: self.buy_units,
            sell_units: self.sell_units,
            buy_cost: self.buy_cost,
            sell_proceeds: self.sell_proceeds,
            cost_basis: self.cost_basis,
            sell_basis: self.sell_basis,
        }
    }
}
