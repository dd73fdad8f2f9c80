use std::collections::BTreeMap;

use crate::firestore::model::{FieldPath, Timestamp};
use crate::firestore::value::{FirestoreValue, MapValue, ValueKind};

use super::reference::DocumentReference;

#[derive(Clone, Debug, PartialEq)]
pub struct DocumentSnapshot {
    reference: DocumentReference,
    data: Option<MapValue>,
    update_time: Option<Timestamp>,
}

impl DocumentSnapshot {
    pub fn new(reference: DocumentReference, data: Option<MapValue>) -> Self {
        Self {
            reference,
            data,
            update_time: None,
        }
    }

    pub fn with_update_time(mut self, update_time: Timestamp) -> Self {
        self.update_time = Some(update_time);
        self
    }

    /// Returns whether the document exists on the backend.
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    pub fn id(&self) -> &str {
        self.reference.id()
    }

    pub fn reference(&self) -> &DocumentReference {
        &self.reference
    }

    /// Returns the decoded document fields if the snapshot contains data.
    pub fn data(&self) -> Option<&BTreeMap<String, FirestoreValue>> {
        self.data.as_ref().map(|map| map.fields())
    }

    pub fn map_value(&self) -> Option<&MapValue> {
        self.data.as_ref()
    }

    /// Time of the last write to the document, when the driver reports it.
    pub fn update_time(&self) -> Option<Timestamp> {
        self.update_time
    }

    /// Reads a (possibly nested) field.
    pub fn get(&self, field: &FieldPath) -> Option<&FirestoreValue> {
        let map = self.data.as_ref()?;
        find_in_map(map, field.segments())
    }
}

fn find_in_map<'a>(map: &'a MapValue, segments: &[String]) -> Option<&'a FirestoreValue> {
    let (first, rest) = segments.split_first()?;
    let value = map.fields().get(first)?;
    if rest.is_empty() {
        Some(value)
    } else if let ValueKind::Map(child) = value.kind() {
        find_in_map(child, rest)
    } else {
        None
    }
}
