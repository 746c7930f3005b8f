use chrono::{DateTime, Utc};

/// Anything exposing a timestamp accessor can be merge-sorted.
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}
