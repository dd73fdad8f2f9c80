use serde::{Deserialize, Serialize};

use crate::firestore::constants::{DATABASE_ID_ENV, PROJECT_ID_ENV};
use crate::firestore::error::{missing_project_id, FirestoreResult};
use crate::firestore::model::DatabaseId;

/// Settings used to construct a Firestore datastore.
///
/// Nothing is read from the environment unless [`FirestoreClientConfig::from_env`]
/// is called explicitly.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirestoreClientConfig {
    pub project_id: Option<String>,
    /// Database name; `None` selects the `(default)` database.
    pub database_id: Option<String>,
}

impl FirestoreClientConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            database_id: None,
        }
    }

    pub fn with_database(mut self, database_id: impl Into<String>) -> Self {
        self.database_id = Some(database_id.into());
        self
    }

    /// Loads `FIRESTORE_PROJECTID` and `FIRESTORE_DATABASEID`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        Self {
            project_id: read(PROJECT_ID_ENV),
            database_id: read(DATABASE_ID_ENV),
        }
    }

    /// Resolves the fully qualified database identifier.
    pub fn database_id(&self) -> FirestoreResult<DatabaseId> {
        let project_id = self
            .project_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(missing_project_id)?;
        let database_id = DatabaseId::default(project_id);
        Ok(match self.database_id.as_deref() {
            Some(database) if !database.trim().is_empty() => database_id.with_database(database),
            _ => database_id,
        })
    }
}
