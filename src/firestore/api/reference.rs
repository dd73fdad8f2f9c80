use std::fmt::{Display, Formatter};

use crate::firestore::error::FirestoreResult;
use crate::firestore::model::DocumentKey;

/// Handle to one document in a collection. Snapshots carry the reference of
/// the document they were read from; it is the value used to update or
/// delete that exact document.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocumentReference {
    key: DocumentKey,
}

impl DocumentReference {
    pub fn new(collection_id: &str, document_id: &str) -> FirestoreResult<Self> {
        Ok(Self {
            key: DocumentKey::new(collection_id, document_id)?,
        })
    }

    pub fn from_key(key: DocumentKey) -> Self {
        Self { key }
    }

    /// The document identifier (the last segment of its path).
    pub fn id(&self) -> &str {
        self.key.id()
    }

    /// The identifier of the collection containing the document.
    pub fn collection_id(&self) -> &str {
        self.key.collection_id()
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    /// The `collection/document` path.
    pub fn path(&self) -> String {
        self.key.canonical_string()
    }
}

impl Display for DocumentReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "DocumentReference({})", self.key)
    }
}
