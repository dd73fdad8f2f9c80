pub const DEFAULT_DATABASE_ID: &str = "(default)";

/// Environment variable holding the Google Cloud project id.
pub const PROJECT_ID_ENV: &str = "FIRESTORE_PROJECTID";
/// Environment variable holding the Firestore database id.
pub const DATABASE_ID_ENV: &str = "FIRESTORE_DATABASEID";

/// Reserved field path that addresses the document name in queries.
pub const DOCUMENT_ID_FIELD: &str = "__name__";

pub const AUTO_ID_LENGTH: usize = 20;
