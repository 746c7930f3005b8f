//! Pure fold kernels: `(seed, ordered input stream) -> ordered output
//! stream`. None of these touch storage; the engine (`crate::engine`)
//! is responsible for loading seeds, cursoring raw events, and
//! persisting emissions.

pub mod cumulative_cashflows;
pub mod user_product_timeline;
pub mod user_timeline;

pub use cumulative_cashflows::{cumulative_cashflows, CumulativeCashflowSeed};
pub use user_product_timeline::{user_product_timeline, Event, UserProductTimelineSeed};
pub use user_timeline::{user_timeline, UserTimelineSeed};
