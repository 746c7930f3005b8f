pub mod cashflow;
pub mod cumulative;
pub mod price;
pub mod user_entry;
pub mod user_product_entry;

pub use cashflow::{Cashflow, PartialCashflow};
pub use cumulative::CumulativeCashflow;
pub use price::{BucketedPriceUpdate, PriceUpdate};
pub use user_entry::UserEntry;
pub use user_product_entry::UserProductEntry;
