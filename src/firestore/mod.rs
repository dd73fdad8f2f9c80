//! Generic document store over a Firestore-shaped database.
//!
//! [`GenericStore`] binds to one collection of a [`remote::Datastore`] and
//! offers predicate queries, bulk writes, count aggregation and snapshot
//! watches on top of it.

pub mod api;
pub mod config;
mod constants;
pub mod error;
pub mod model;
pub(crate) mod query_evaluator;
pub mod remote;
pub mod value;

pub use api::{
    build_query, Aggregation, DocumentReference, DocumentSnapshot, FieldUpdate, FilterOperator,
    GenericStore, Query, QueryParameter, WatchHandle, WatchState,
};
pub use config::FirestoreClientConfig;
pub use error::{FirestoreError, FirestoreErrorCode, FirestoreResult};
pub use remote::{Datastore, InMemoryDatastore};
pub use value::FirestoreValue;
