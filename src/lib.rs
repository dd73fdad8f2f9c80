//! Generic access layer for a Firestore-shaped document database.
//!
//! The crate composes filter predicates into queries, performs batched
//! multi-document writes with per-item outcomes, runs count aggregations and
//! turns change feeds into callback-driven snapshot watches. The database is
//! reached only through the driver traits in [`firestore::remote`], and an
//! in-memory driver is bundled for tests and demos.
//!
//! ```no_run
//! use std::sync::Arc;
//! use firestore_generic_store::firestore::{
//!     FilterOperator, FirestoreClientConfig, GenericStore, InMemoryDatastore, QueryParameter,
//! };
//!
//! # async fn run() -> firestore_generic_store::firestore::FirestoreResult<()> {
//! let config = FirestoreClientConfig::new("demo-project");
//! let datastore = Arc::new(InMemoryDatastore::from_config(&config)?);
//! let users = GenericStore::new(datastore, "users")?;
//! let adults = users
//!     .read_collection(&[QueryParameter::new("age", FilterOperator::GreaterThanOrEqual, 18_i64)])
//!     .await?;
//! println!("{} adults", adults.len());
//! # Ok(())
//! # }
//! ```

pub mod firestore;
pub mod platform;
