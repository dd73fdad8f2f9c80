use std::cmp::Ordering;

use crate::firestore::api::{DocumentSnapshot, FilterOperator, Query};
use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::FieldPath;
use crate::firestore::value::{ArrayValue, FirestoreValue, ValueKind};

struct CompiledFilter<'a> {
    field: FieldPath,
    operator: FilterOperator,
    value: &'a FirestoreValue,
}

/// Applies the filters of `query` to candidate documents, preserving their order.
///
/// Field paths and operator/value shapes are validated here, at execution
/// time, the same way the database rejects a malformed structured query.
pub(crate) fn apply_query_to_documents(
    documents: Vec<DocumentSnapshot>,
    query: &Query,
) -> FirestoreResult<Vec<DocumentSnapshot>> {
    let filters = compile_filters(query)?;
    Ok(documents
        .into_iter()
        .filter(|snapshot| snapshot.exists())
        .filter(|snapshot| query.matches_collection(snapshot.reference().key()))
        .filter(|snapshot| document_satisfies_filters(snapshot, &filters))
        .collect())
}

fn compile_filters(query: &Query) -> FirestoreResult<Vec<CompiledFilter<'_>>> {
    query
        .filters()
        .iter()
        .map(|parameter| {
            let field = parameter.field_path()?;
            if parameter.op().expects_array_value()
                && !matches!(parameter.value().kind(), ValueKind::Array(_))
            {
                return Err(invalid_argument(format!(
                    "'{}' filters on '{}' require an array value",
                    parameter.op(),
                    parameter.path()
                )));
            }
            Ok(CompiledFilter {
                field,
                operator: parameter.op(),
                value: parameter.value(),
            })
        })
        .collect()
}

fn document_satisfies_filters(snapshot: &DocumentSnapshot, filters: &[CompiledFilter<'_>]) -> bool {
    filters
        .iter()
        .all(|filter| match get_field_value(snapshot, &filter.field) {
            Some(value) => evaluate_filter(filter, &value),
            // Documents missing the field never match, `!=` and `not-in` included.
            None => false,
        })
}

fn evaluate_filter(filter: &CompiledFilter<'_>, value: &FirestoreValue) -> bool {
    match filter.operator {
        FilterOperator::Equal => values_equal(value, filter.value),
        FilterOperator::NotEqual => !value.is_null() && !values_equal(value, filter.value),
        FilterOperator::LessThan => compare_values(value, filter.value) == Some(Ordering::Less),
        FilterOperator::LessThanOrEqual => matches!(
            compare_values(value, filter.value),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOperator::GreaterThan => compare_values(value, filter.value) == Some(Ordering::Greater),
        FilterOperator::GreaterThanOrEqual => matches!(
            compare_values(value, filter.value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOperator::ArrayContains => match value.kind() {
            ValueKind::Array(array) => array_contains(array, filter.value),
            _ => false,
        },
        FilterOperator::ArrayContainsAny => match (value.kind(), filter.value.kind()) {
            (ValueKind::Array(array), ValueKind::Array(needles)) => needles
                .values()
                .iter()
                .any(|needle| array_contains(array, needle)),
            _ => false,
        },
        FilterOperator::In => match filter.value.kind() {
            ValueKind::Array(candidates) => array_contains(candidates, value),
            _ => false,
        },
        FilterOperator::NotIn => match filter.value.kind() {
            ValueKind::Array(candidates) => !value.is_null() && !array_contains(candidates, value),
            _ => false,
        },
    }
}

/// Resolves `field` on a document. The `__name__` path resolves to the document ID.
fn get_field_value(snapshot: &DocumentSnapshot, field: &FieldPath) -> Option<FirestoreValue> {
    if field.is_document_id() {
        return Some(FirestoreValue::from_string(snapshot.id()));
    }
    snapshot.get(field).cloned()
}

fn values_equal(left: &FirestoreValue, right: &FirestoreValue) -> bool {
    match (left.kind(), right.kind()) {
        (ValueKind::Integer(_), ValueKind::Double(_)) | (ValueKind::Double(_), ValueKind::Integer(_)) => {
            compare_values(left, right) == Some(Ordering::Equal)
        }
        _ => left == right,
    }
}

fn compare_values(left: &FirestoreValue, right: &FirestoreValue) -> Option<Ordering> {
    match (left.kind(), right.kind()) {
        (ValueKind::Null, ValueKind::Null) => Some(Ordering::Equal),
        (ValueKind::Boolean(a), ValueKind::Boolean(b)) => Some(a.cmp(b)),
        (ValueKind::Integer(a), ValueKind::Integer(b)) => Some(a.cmp(b)),
        (ValueKind::Double(a), ValueKind::Double(b)) => a.partial_cmp(b),
        (ValueKind::Integer(a), ValueKind::Double(b)) => (*a as f64).partial_cmp(b),
        (ValueKind::Double(a), ValueKind::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (ValueKind::Timestamp(a), ValueKind::Timestamp(b)) => Some(a.cmp(b)),
        (ValueKind::String(a), ValueKind::String(b)) => Some(a.cmp(b)),
        (ValueKind::Reference(a), ValueKind::Reference(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn array_contains(array: &ArrayValue, needle: &FirestoreValue) -> bool {
    array.values().iter().any(|candidate| values_equal(candidate, needle))
}
