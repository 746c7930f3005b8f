//! Diesel `table!` definitions for the raw event tables, the
//! externally maintained bucketing view, and the three persisted
//! cache layers.
//!
//! Timestamps are `timestamptz` mapped to `chrono::DateTime<Utc>`
//! (diesel's `chrono` feature), not a plain `timestamp` /
//! `NaiveDateTime` — tz-aware absolute instants are required, and
//! this crate has no transaction-version-ordered blockchain clock to
//! fall back on.

diesel::table! {
    use diesel::sql_types::{Numeric, Timestamptz, Uuid};

    price_update (product_id, t) {
        product_id -> Uuid,
        t -> Timestamptz,
        price -> Numeric,
    }
}

diesel::table! {
    use diesel::sql_types::{Numeric, Timestamptz, Uuid};

    cashflow (id) {
        id -> Uuid,
        user_id -> Uuid,
        product_id -> Uuid,
        t -> Timestamptz,
        units_delta -> Numeric,
        exec_price -> Numeric,
        exec_money -> Numeric,
        user_money -> Numeric,
        fees -> Numeric,
    }
}

diesel::table! {
    use diesel::sql_types::{Numeric, Text, Timestamptz, Uuid};

    // Externally maintained materialized view: one row per
    // `(product_id, granularity, bucket_start)`. This crate only reads
    // it and asks the store to refresh it; it never writes here.
    bucketed_price_update (product_id, granularity, bucket_start) {
        product_id -> Uuid,
        granularity -> Text,
        bucket_start -> Timestamptz,
        price -> Numeric,
    }
}

diesel::table! {
    use diesel::sql_types::{Numeric, Timestamptz, Uuid};

    cumulative_cashflow_cache (user_id, product_id, t) {
        user_id -> Uuid,
        product_id -> Uuid,
        t -> Timestamptz,
        cashflow_id -> Uuid,
        units -> Numeric,
        net_investment -> Numeric,
        deposits -> Numeric,
        withdrawals -> Numeric,
        fees -> Numeric,
        buy_units -> Numeric,
        sell_units -> Numeric,
        buy_cost -> Numeric,
        sell_proceeds -> Numeric,
    }
}

diesel::table! {
    use diesel::sql_types::{Numeric, Text, Timestamptz, Uuid};

    // One physical table for every granularity `g`: `granularity`
    // carries the config suffix and is part of the composite primary
    // key, the same way a periodic-state table keys on a window label.
    user_product_timeline_cache (user_id, product_id, t, granularity) {
        user_id -> Uuid,
        product_id -> Uuid,
        t -> Timestamptz,
        granularity -> Text,
        units -> Numeric,
        net_investment -> Numeric,
        deposits -> Numeric,
        withdrawals -> Numeric,
        fees -> Numeric,
        buy_units -> Numeric,
        sell_units -> Numeric,
        buy_cost -> Numeric,
        sell_proceeds -> Numeric,
        market_value -> Numeric,
        avg_buy_price -> Numeric,
        avg_sell_price -> Numeric,
    }
}

diesel::table! {
    use diesel::sql_types::{Numeric, Text, Timestamptz, Uuid};

    user_timeline_cache (user_id, t, granularity) {
        user_id -> Uuid,
        t -> Timestamptz,
        granularity -> Text,
        net_investment -> Numeric,
        market_value -> Numeric,
        deposits -> Numeric,
        withdrawals -> Numeric,
        fees -> Numeric,
        buy_units -> Numeric,
        sell_units -> Numeric,
        buy_cost -> Numeric,
        sell_proceeds -> Numeric,
        cost_basis -> Numeric,
        sell_basis -> Numeric,
    }
}
