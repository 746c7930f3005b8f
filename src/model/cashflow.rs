//! `Cashflow` and its derivation rule. Kept as close as possible, in
//! meaning and in pass ordering, to the original implementation's
//! `Cashflow.__post_init__` fixed-point loop, which is the
//! authoritative reference for rule ordering and termination.

use crate::decimal::{within_epsilon, zero};
use crate::error::CashflowDerivationError;
use crate::ids::{CashflowId, ProductId};
use crate::{decimal::Money, ids::InvestorId};
use chrono::{DateTime, Utc};

/// A cashflow with any subset of its five money-unit fields set, prior
/// to derivation.
#[derive(Clone, Debug, Default)]
pub struct PartialCashflow {
    pub units_delta: Option<Money>,
    pub exec_price: Option<Money>,
    pub exec_money: Option<Money>,
    pub user_money: Option<Money>,
    pub fees: Option<Money>,
}

/// A fully specified, validated cashflow. `units_delta > 0` is a buy,
/// `< 0` a sell.
#[derive(Clone, Debug, PartialEq)]
pub struct Cashflow {
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

/// Runs the fixed-point derivation rules until no field changes, then
/// validates both invariants within `ε`.
///
/// Rules, applied every pass in this fixed order (matching the
/// original's field-by-field pass):
/// 1. `units_delta = exec_money / exec_price`
/// 2. `exec_price = exec_money / units_delta`
/// 3. `exec_money = units_delta * exec_price`, else `user_money - fees`
/// 4. `user_money = exec_money + fees`
/// 5. `fees = user_money - exec_money`
pub fn derive_cashflow(
    id: CashflowId,
    user_id: InvestorId,
    product_id: ProductId,
    t: DateTime<Utc>,
    mut partial: PartialCashflow,
) -> Result<Cashflow, CashflowDerivationError> {
    loop {
        let mut found_missing = false;
        let mut changed = false;

        if partial.units_delta.is_none() {
            found_missing = true;
            if let (Some(em), Some(ep)) = (&partial.exec_money, &partial.exec_price) {
                if !crate::decimal::is_zero(ep) {
                    partial.units_delta = Some(em / ep);
                    changed = true;
                }
            }
        }
        if partial.exec_price.is_none() {
            found_missing = true;
            if let (Some(em), Some(ud)) = (&partial.exec_money, &partial.units_delta) {
                if !crate::decimal::is_zero(ud) {
                    partial.exec_price = Some(em / ud);
                    changed = true;
                }
            }
        }
        if partial.exec_money.is_none() {
            found_missing = true;
            if let (Some(ud), Some(ep)) = (&partial.units_delta, &partial.exec_price) {
                partial.exec_money = Some(ud * ep);
                changed = true;
            } else if let (Some(um), Some(f)) = (&partial.user_money, &partial.fees) {
                partial.exec_money = Some(um - f);
                changed = true;
            }
        }
        if partial.user_money.is_none() {
            found_missing = true;
            if let (Some(em), Some(f)) = (&partial.exec_money, &partial.fees) {
                partial.user_money = Some(em + f);
                changed = true;
            }
        }
        if partial.fees.is_none() {
            found_missing = true;
            if let (Some(um), Some(em)) = (&partial.user_money, &partial.exec_money) {
                partial.fees = Some(um - em);
                changed = true;
            }
        }

        if !found_missing {
            break;
        }
        if !changed {
            let missing = missing_field_names(&partial);
            return Err(CashflowDerivationError::InsufficientData { missing });
        }
    }

    let units_delta = partial.units_delta.unwrap();
    let exec_price = partial.exec_price.unwrap();
    let exec_money = partial.exec_money.unwrap();
    let user_money = partial.user_money.unwrap();
    let fees = partial.fees.unwrap();

    let lhs1 = &units_delta * &exec_price;
    if !within_epsilon(&lhs1, &exec_money) {
        return Err(CashflowDerivationError::Inconsistent(format!(
            "units_delta({units_delta}) * exec_price({exec_price}) = {lhs1} != exec_money({exec_money})"
        )));
    }
    let lhs2 = &exec_money + &fees;
    if !within_epsilon(&lhs2, &user_money) {
        return Err(CashflowDerivationError::Inconsistent(format!(
            "exec_money({exec_money}) + fees({fees}) = {lhs2} != user_money({user_money})"
        )));
    }

    Ok(Cashflow {
        id,
        user_id,
        product_id,
        t,
        units_delta,
        exec_price,
        exec_money,
        user_money,
        fees,
    })
}

fn missing_field_names(partial: &PartialCashflow) -> Vec<&'static str> {
    let mut missing = vec![];
    if partial.units_delta.is_none() {
        missing.push("units_delta");
    }
    if partial.exec_price.is_none() {
        missing.push("exec_price");
    }
    if partial.exec_money.is_none() {
        missing.push("exec_money");
    }
    if partial.user_money.is_none() {
        missing.push("user_money");
    }
    if partial.fees.is_none() {
        missing.push("fees");
    }
    missing
}

impl Cashflow {
    pub fn is_buy(&self) -> bool {
        self.units_delta > zero()
    }

    pub fn is_sell(&self) -> bool {
        self.units_delta < zero()
    }
}

impl crate::streaming::Timestamped for Cashflow {
    fn timestamp(&self) -> DateTime<Utc> {
        self.t
    }
}
