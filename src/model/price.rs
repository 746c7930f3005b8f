use crate::decimal::Money;
use crate::ids::ProductId;
use crate::streaming::Timestamped;
use chrono::{DateTime, Utc};

/// Raw, append-only price update. Source of
/// truth for a product's price.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceUpdate {
    pub product_id: ProductId,
    pub t: DateTime<Utc>,
    pub price: Money,
}

/// Derived row produced by the external bucketing primitive for one
/// granularity: `t` is the bucket's
/// lower edge, `price` the last raw price observed in that bucket.
#[derive(Clone, Debug, PartialEq)]
pub struct BucketedPriceUpdate {
    pub product_id: ProductId,
    pub t: DateTime<Utc>,
    pub price: Money,
}

impl Timestamped for PriceUpdate {
    fn timestamp(&self) -> DateTime<Utc> {
        self.t
    }
}

impl Timestamped for BucketedPriceUpdate {
    fn timestamp(&self) -> DateTime<Utc> {
        self.t
    }
}

impl From<BucketedPriceUpdate> for PriceUpdate {
    fn from(b: BucketedPriceUpdate) -> Self {
        PriceUpdate {
            product_id: b.product_id,
            t: b.t,
            price: b.price,
        }
    }
}
