use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A measured value together with the instant it became available to
/// the service. Updates of one kind are delivered with non-decreasing
/// timestamps.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Update<T> {
    pub value: T,
    pub when: DateTime<Utc>,
}

impl<T> Update<T> {
    pub fn new(value: T, when: DateTime<Utc>) -> Self {
        Self { value, when }
    }

    pub fn now(value: T) -> Self {
        Self::new(value, Utc::now())
    }
}
