use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::firestore::error::{invalid_argument, FirestoreError};

/// Server-side aggregations a query can be reduced to.
///
/// Only [`Aggregation::Count`] is supported by the generic store; the other
/// kinds exist so drivers can describe their capabilities and so callers get
/// an `invalid-argument` error instead of a silent fallback.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Aggregation {
    Count,
    Sum(String),
    Average(String),
}

impl Aggregation {
    /// Alias under which the result is reported by the database.
    pub fn alias(&self) -> &'static str {
        match self {
            Aggregation::Count => "count",
            Aggregation::Sum(_) => "sum",
            Aggregation::Average(_) => "avg",
        }
    }
}

impl FromStr for Aggregation {
    type Err = FirestoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "count" => Ok(Aggregation::Count),
            other => Err(invalid_argument(format!("unsupported aggregation: {other}"))),
        }
    }
}

impl Display for Aggregation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Aggregation::Count => f.write_str("count"),
            Aggregation::Sum(field) => write!(f, "sum({field})"),
            Aggregation::Average(field) => write!(f, "avg({field})"),
        }
    }
}

/// An aggregation request sent to the driver, keyed by result alias.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateDefinition {
    alias: String,
    aggregation: Aggregation,
}

impl AggregateDefinition {
    pub fn new(alias: impl Into<String>, aggregation: Aggregation) -> Self {
        Self {
            alias: alias.into(),
            aggregation,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn aggregation(&self) -> &Aggregation {
        &self.aggregation
    }
}
