//! Capability traits describing the document database driver.
//!
//! The store only ever talks to these traits, so any transport (gRPC, REST,
//! the in-memory fake) can sit underneath it.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;

use crate::firestore::api::{
    AggregateDefinition, DocumentReference, DocumentSnapshot, FieldUpdate, Query,
};
use crate::firestore::error::{internal_error, FirestoreError, FirestoreResult};
use crate::firestore::model::{generate_auto_id, DatabaseId};
use crate::firestore::value::{FirestoreValue, MapValue};

pub mod in_memory;

#[async_trait]
pub trait Datastore: Send + Sync + 'static {
    fn database_id(&self) -> &DatabaseId;

    /// Acquires a handle to the top-level collection `collection_id`.
    fn collection(&self, collection_id: &str) -> FirestoreResult<Arc<dyn CollectionHandle>>;

    /// Opens a new batching writer. Each call returns an independent writer.
    fn bulk_writer(&self) -> Box<dyn BulkWriter>;

    async fn close(&self) -> FirestoreResult<()>;
}

#[async_trait]
pub trait CollectionHandle: Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Allocates a fresh document ID without creating a document.
    fn new_document_id(&self) -> String {
        generate_auto_id()
    }

    fn doc(&self, document_id: &str) -> FirestoreResult<DocumentReference> {
        DocumentReference::new(self.id(), document_id)
    }

    /// Creates a document under a driver-generated ID.
    async fn add_document(&self, data: MapValue) -> FirestoreResult<DocumentReference>;

    /// Reads a document. Missing documents yield a snapshot without data.
    async fn get_document(&self, reference: &DocumentReference) -> FirestoreResult<DocumentSnapshot>;

    /// Applies `updates` to an existing document; fails with `not-found` otherwise.
    async fn update_document(
        &self,
        reference: &DocumentReference,
        updates: Vec<FieldUpdate>,
    ) -> FirestoreResult<()>;

    /// Deletes an existing document; fails with `not-found` otherwise.
    async fn delete_document(&self, reference: &DocumentReference) -> FirestoreResult<()>;

    async fn run_query(&self, query: &Query) -> FirestoreResult<Vec<DocumentSnapshot>>;

    /// Runs the aggregations server-side, returning one value per alias.
    async fn run_aggregation(
        &self,
        query: &Query,
        aggregations: &[AggregateDefinition],
    ) -> FirestoreResult<BTreeMap<String, FirestoreValue>>;

    /// Opens a change feed for `query`.
    async fn listen(&self, query: &Query) -> FirestoreResult<Box<dyn SnapshotStream>>;
}

/// Pipelines single-document writes and reports an outcome per write.
///
/// `set` and `delete` fail only when the write cannot be enqueued; the
/// outcome of an enqueued write is delivered through its [`BulkWriterJob`]
/// once [`BulkWriter::end`] has flushed the queue.
#[async_trait]
pub trait BulkWriter: Send {
    fn set(&mut self, reference: &DocumentReference, data: MapValue) -> FirestoreResult<BulkWriterJob>;

    fn delete(&mut self, reference: &DocumentReference) -> FirestoreResult<BulkWriterJob>;

    /// Flushes every pending write and closes the writer.
    async fn end(&mut self);
}

/// Outcome of one enqueued bulk write.
#[derive(Debug)]
pub struct BulkWriterJob {
    receiver: async_channel::Receiver<FirestoreResult<()>>,
}

/// Driver-side half of a [`BulkWriterJob`].
#[derive(Debug)]
pub struct BulkWriterJobResolver {
    sender: async_channel::Sender<FirestoreResult<()>>,
}

impl BulkWriterJob {
    pub fn channel() -> (BulkWriterJobResolver, BulkWriterJob) {
        let (sender, receiver) = async_channel::bounded(1);
        (BulkWriterJobResolver { sender }, BulkWriterJob { receiver })
    }

    /// Waits for the write to be applied.
    pub async fn result(self) -> FirestoreResult<()> {
        match self.receiver.recv().await {
            Ok(result) => result,
            Err(_) => Err(internal_error(
                "bulk writer dropped the write without reporting an outcome",
            )),
        }
    }
}

impl BulkWriterJobResolver {
    pub fn resolve(self, result: FirestoreResult<()>) {
        // A dropped job means nobody is waiting for the outcome.
        let _ = self.sender.try_send(result);
    }
}

/// Push-based change feed for a standing query.
#[async_trait]
pub trait SnapshotStream: Send {
    /// Waits for the next snapshot. `None` means the feed closed cleanly.
    async fn next(&mut self) -> Option<FirestoreResult<Box<dyn SnapshotDocuments>>>;

    /// Releases the feed. Further calls to `next` return `None`.
    async fn stop(&mut self);
}

/// The documents of one snapshot, in query order.
#[async_trait]
pub trait SnapshotDocuments: Send {
    async fn next(&mut self) -> Option<FirestoreResult<DocumentSnapshot>>;
}

/// [`SnapshotDocuments`] over an already materialised result set, optionally
/// terminated by an error after the last document.
pub struct BufferedSnapshotDocuments {
    documents: VecDeque<DocumentSnapshot>,
    trailing_error: Option<FirestoreError>,
}

impl BufferedSnapshotDocuments {
    pub fn new(documents: Vec<DocumentSnapshot>) -> Self {
        Self {
            documents: documents.into(),
            trailing_error: None,
        }
    }

    pub fn with_trailing_error(mut self, error: FirestoreError) -> Self {
        self.trailing_error = Some(error);
        self
    }
}

#[async_trait]
impl SnapshotDocuments for BufferedSnapshotDocuments {
    async fn next(&mut self) -> Option<FirestoreResult<DocumentSnapshot>> {
        match self.documents.pop_front() {
            Some(document) => Some(Ok(document)),
            None => self.trailing_error.take().map(Err),
        }
    }
}

pub use in_memory::{DriverCall, DriverOperation, InMemoryDatastore};
