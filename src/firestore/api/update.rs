use crate::firestore::error::FirestoreResult;
use crate::firestore::model::{FieldPath, IntoFieldPath};
use crate::firestore::value::FirestoreValue;

/// A single field-level mutation applied by `update_doc`.
///
/// The value may be one of the write sentinels
/// ([`FirestoreValue::delete_field`], [`FirestoreValue::server_timestamp`],
/// [`FirestoreValue::numeric_increment`]).
#[derive(Clone, Debug, PartialEq)]
pub struct FieldUpdate {
    path: FieldPath,
    value: FirestoreValue,
}

impl FieldUpdate {
    pub fn new<P>(path: P, value: impl Into<FirestoreValue>) -> FirestoreResult<Self>
    where
        P: IntoFieldPath,
    {
        Ok(Self {
            path: path.into_field_path()?,
            value: value.into(),
        })
    }

    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    pub fn value(&self) -> &FirestoreValue {
        &self.value
    }
}
