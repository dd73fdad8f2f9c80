use std::fmt::{Display, Formatter};

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::firestore::constants::AUTO_ID_LENGTH;
use crate::firestore::error::{invalid_argument, FirestoreResult};

/// Identifies a single document inside a top-level collection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentKey {
    collection_id: String,
    document_id: String,
}

impl DocumentKey {
    pub fn new(collection_id: impl Into<String>, document_id: impl Into<String>) -> FirestoreResult<Self> {
        let collection_id = collection_id.into();
        let document_id = document_id.into();
        validate_segment("Collection ID", &collection_id)?;
        validate_segment("Document ID", &document_id)?;
        Ok(Self {
            collection_id,
            document_id,
        })
    }

    /// Parses a `collection/document` path.
    pub fn from_string(path: &str) -> FirestoreResult<Self> {
        let segments: Vec<&str> = path.split('/').filter(|segment| !segment.is_empty()).collect();
        match segments.as_slice() {
            [collection, document] => Self::new(*collection, *document),
            _ => Err(invalid_argument(format!(
                "Document keys must have the form collection/document, got '{path}'"
            ))),
        }
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    pub fn id(&self) -> &str {
        &self.document_id
    }

    pub fn canonical_string(&self) -> String {
        format!("{}/{}", self.collection_id, self.document_id)
    }
}

impl Display for DocumentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection_id, self.document_id)
    }
}

fn validate_segment(label: &str, segment: &str) -> FirestoreResult<()> {
    if segment.is_empty() {
        return Err(invalid_argument(format!("{label} cannot be empty.")));
    }
    if segment.contains('/') {
        return Err(invalid_argument(format!("{label} cannot contain '/'.")));
    }
    if segment == "." || segment == ".." {
        return Err(invalid_argument(format!("{label} cannot be '.' or '..'.")));
    }
    Ok(())
}

/// Generates a fresh document identifier in the Firestore auto-id format.
pub fn generate_auto_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(AUTO_ID_LENGTH)
        .collect()
}
