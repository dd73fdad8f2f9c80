mod database_id;
mod document_key;
mod field_path;
mod timestamp;

pub use database_id::DatabaseId;
pub use document_key::{generate_auto_id, DocumentKey};
pub use field_path::{FieldPath, IntoFieldPath};
pub use timestamp::Timestamp;
