//! Incremental materialization engine for per-investor portfolio time
//! series: folds a cashflow and price-update event log into three
//! layered, persistently cached timelines (cumulative cashflows,
//! per-product timelines, per-user timelines) and keeps them current
//! as new events arrive out of order.
//!
//! Module layout mirrors a processor crate: pure domain
//! types (`model`), pure transforms (`fold`, `streaming`), an external
//! store boundary (`store`), and the orchestration layer that ties
//! them together (`engine`). `config`, `decimal`, `error`, `ids`, and
//! `metrics` are the ambient crate-wide concerns every other module
//! depends on.

pub mod config;
pub mod decimal;
pub mod engine;
pub mod error;
pub mod fold;
pub mod ids;
pub mod metrics;
pub mod model;
pub mod store;
pub mod streaming;

pub use config::{Clock, EngineConfig, GranularityConfig, GranularityTable, SystemClock};
pub use decimal::Money;
pub use engine::{CashflowInput, Engine};
pub use error::{CashflowDerivationError, EngineError, EngineResult};
pub use ids::{CashflowId, InvestorId, ProductId};
pub use model::{
    BucketedPriceUpdate, Cashflow, CumulativeCashflow, PartialCashflow, PriceUpdate, UserEntry,
    UserProductEntry,
};
pub use store::{PgStore, Scope, Store};
