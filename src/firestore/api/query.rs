use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::firestore::error::{invalid_argument, FirestoreError, FirestoreResult};
use crate::firestore::model::{DocumentKey, FieldPath};
use crate::firestore::value::FirestoreValue;

/// Comparison operators accepted in a [`QueryParameter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    LessThan,
    LessThanOrEqual,
    Equal,
    GreaterThanOrEqual,
    GreaterThan,
    NotEqual,
    In,
    NotIn,
    ArrayContains,
    ArrayContainsAny,
}

impl FilterOperator {
    /// The operator spelling used by the Firestore client libraries.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::LessThan => "<",
            FilterOperator::LessThanOrEqual => "<=",
            FilterOperator::Equal => "==",
            FilterOperator::GreaterThanOrEqual => ">=",
            FilterOperator::GreaterThan => ">",
            FilterOperator::NotEqual => "!=",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not-in",
            FilterOperator::ArrayContains => "array-contains",
            FilterOperator::ArrayContainsAny => "array-contains-any",
        }
    }

    /// Operators whose value must be an array of candidates.
    pub fn expects_array_value(&self) -> bool {
        matches!(
            self,
            FilterOperator::In | FilterOperator::NotIn | FilterOperator::ArrayContainsAny
        )
    }
}

impl FromStr for FilterOperator {
    type Err = FirestoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let operator = match value {
            "<" => FilterOperator::LessThan,
            "<=" => FilterOperator::LessThanOrEqual,
            "==" => FilterOperator::Equal,
            ">=" => FilterOperator::GreaterThanOrEqual,
            ">" => FilterOperator::GreaterThan,
            "!=" => FilterOperator::NotEqual,
            "in" => FilterOperator::In,
            "not-in" => FilterOperator::NotIn,
            "array-contains" => FilterOperator::ArrayContains,
            "array-contains-any" => FilterOperator::ArrayContainsAny,
            other => return Err(invalid_argument(format!("unsupported filter operator: {other}"))),
        };
        Ok(operator)
    }
}

impl Display for FilterOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single filter condition over a document field.
///
/// The field path is kept as written; malformed paths are reported by the
/// database when the query runs.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryParameter {
    path: String,
    op: FilterOperator,
    value: FirestoreValue,
}

impl QueryParameter {
    pub fn new(path: impl Into<String>, op: FilterOperator, value: impl Into<FirestoreValue>) -> Self {
        Self {
            path: path.into(),
            op,
            value: value.into(),
        }
    }

    /// Builds a parameter from the textual operator form (`"=="`, `"array-contains"`, ...).
    pub fn parse(
        path: impl Into<String>,
        op: &str,
        value: impl Into<FirestoreValue>,
    ) -> FirestoreResult<Self> {
        Ok(Self::new(path, op.parse()?, value))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn op(&self) -> FilterOperator {
        self.op
    }

    pub fn value(&self) -> &FirestoreValue {
        &self.value
    }

    pub fn field_path(&self) -> FirestoreResult<FieldPath> {
        FieldPath::from_dot_separated(&self.path)
    }
}

/// An executable query over one collection: the collection plus the
/// conjunction of its filters, in the order they were added.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    collection_id: String,
    filters: Vec<QueryParameter>,
}

impl Query {
    /// The unfiltered query over `collection_id`.
    pub fn new(collection_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            filters: Vec::new(),
        }
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    pub fn filters(&self) -> &[QueryParameter] {
        &self.filters
    }

    pub fn is_unfiltered(&self) -> bool {
        self.filters.is_empty()
    }

    /// Returns a new query with `parameter` appended to the filter chain.
    pub fn where_field(&self, parameter: QueryParameter) -> Query {
        let mut filters = self.filters.clone();
        filters.push(parameter);
        Query {
            collection_id: self.collection_id.clone(),
            filters,
        }
    }

    pub(crate) fn matches_collection(&self, key: &DocumentKey) -> bool {
        key.collection_id() == self.collection_id
    }
}

/// Folds `predicates` onto `base`.
pub fn build_query(base: &Query, predicates: &[QueryParameter]) -> Query {
    predicates
        .iter()
        .cloned()
        .fold(base.clone(), |query, predicate| query.where_field(predicate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_round_trip_through_strings() {
        for op in [
            FilterOperator::LessThan,
            FilterOperator::LessThanOrEqual,
            FilterOperator::Equal,
            FilterOperator::GreaterThanOrEqual,
            FilterOperator::GreaterThan,
            FilterOperator::NotEqual,
            FilterOperator::In,
            FilterOperator::NotIn,
            FilterOperator::ArrayContains,
            FilterOperator::ArrayContainsAny,
        ] {
            assert_eq!(op.as_str().parse::<FilterOperator>().unwrap(), op);
        }
    }

    #[test]
    fn unknown_operator_is_invalid_argument() {
        let err = QueryParameter::parse("age", "~=", 3_i64).unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn empty_predicates_yield_base_query() {
        let base = Query::new("cities");
        let built = build_query(&base, &[]);
        assert_eq!(built, base);
        assert!(built.is_unfiltered());
    }

    #[test]
    fn build_preserves_predicate_order_and_base() {
        let base = Query::new("cities");
        let predicates = vec![
            QueryParameter::new("state", FilterOperator::Equal, "CA"),
            QueryParameter::new("population", FilterOperator::GreaterThan, 1_000_i64),
        ];
        let built = build_query(&base, &predicates);
        assert_eq!(built.collection_id(), "cities");
        assert_eq!(built.filters(), predicates.as_slice());
        assert!(base.is_unfiltered());
        assert_eq!(build_query(&base, &predicates), built);
    }

    #[test]
    fn malformed_paths_are_kept_until_execution() {
        let parameter = QueryParameter::new("a..b", FilterOperator::Equal, 1_i64);
        assert_eq!(parameter.path(), "a..b");
        assert!(parameter.field_path().is_err());
    }
}
