use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::firestore::api::bulk_writer::BulkWriterSession;
use crate::firestore::api::watch::{start_watch, WatchHandle};
use crate::firestore::api::{
    build_query, AggregateDefinition, Aggregation, DocumentReference, DocumentSnapshot, FieldUpdate,
    Query, QueryParameter,
};
use crate::firestore::error::{
    failed_precondition, internal_error, invalid_argument, not_found, FirestoreResult,
};
use crate::firestore::remote::datastore::{CollectionHandle, Datastore};
use crate::firestore::value::{FirestoreValue, MapValue};

/// Document data keyed by top-level field name.
pub type DocumentData = BTreeMap<String, FirestoreValue>;

/// Access layer bound to a single collection.
///
/// All reads and writes go through the [`Datastore`] it was built with, so
/// the same store code runs against a remote driver or the in-memory one.
#[derive(Clone)]
pub struct GenericStore {
    datastore: Arc<dyn Datastore>,
    collection: Arc<dyn CollectionHandle>,
}

impl GenericStore {
    pub fn new(datastore: Arc<dyn Datastore>, collection_id: &str) -> FirestoreResult<Self> {
        let collection = datastore.collection(collection_id)?;
        log::debug!(
            "generic store bound to collection {collection_id} in database {}",
            datastore.database_id().database()
        );
        Ok(Self {
            datastore,
            collection,
        })
    }

    /// The underlying driver, for operations the store does not cover.
    pub fn client(&self) -> Arc<dyn Datastore> {
        Arc::clone(&self.datastore)
    }

    pub fn collection_id(&self) -> &str {
        self.collection.id()
    }

    /// Returns `n` fresh document IDs without creating any document.
    pub fn generate_n_ids(&self, n: usize) -> Vec<String> {
        (0..n).map(|_| self.collection.new_document_id()).collect()
    }

    /// Creates a document under a generated ID and returns that ID.
    pub async fn create_doc(&self, body: DocumentData) -> FirestoreResult<String> {
        let reference = self.collection.add_document(MapValue::new(body)).await?;
        log::debug!("created document {}", reference.path());
        Ok(reference.id().to_string())
    }

    /// Writes every document in `docs` through one bulk writer.
    ///
    /// When `ids` is empty or absent, an ID is generated for each document.
    /// Otherwise it must have the same length as `docs`. Every write is
    /// attempted; the first failure in input order is returned afterwards.
    pub async fn create_docs_batch(
        &self,
        docs: Vec<DocumentData>,
        ids: Option<Vec<String>>,
    ) -> FirestoreResult<Vec<String>> {
        let ids = match ids {
            Some(ids) if !ids.is_empty() => {
                if ids.len() != docs.len() {
                    return Err(invalid_argument(format!(
                        "create_docs_batch received {} documents but {} ids",
                        docs.len(),
                        ids.len()
                    )));
                }
                ids
            }
            _ => self.generate_n_ids(docs.len()),
        };
        let references = ids
            .iter()
            .map(|id| self.collection.doc(id))
            .collect::<FirestoreResult<Vec<_>>>()?;

        let mut session = BulkWriterSession::new(self.datastore.bulk_writer());
        for (reference, body) in references.iter().zip(docs) {
            session.set(reference, MapValue::new(body));
        }
        session.finish().await.into_result()?;

        log::debug!(
            "created {} documents in collection {}",
            ids.len(),
            self.collection_id()
        );
        Ok(ids)
    }

    /// Runs the predicates against the collection and returns every match.
    pub async fn read_collection(
        &self,
        predicates: &[QueryParameter],
    ) -> FirestoreResult<Vec<DocumentSnapshot>> {
        let query = self.query(predicates);
        self.collection.run_query(&query).await
    }

    pub async fn get_doc(&self, id: &str) -> FirestoreResult<DocumentSnapshot> {
        let reference = self.collection.doc(id)?;
        let snapshot = self.collection.get_document(&reference).await?;
        if !snapshot.exists() {
            return Err(not_found(format!("document {} not found", reference.path())));
        }
        Ok(snapshot)
    }

    /// Returns the single document matching `predicates`.
    pub async fn get_doc_by_query(
        &self,
        predicates: &[QueryParameter],
    ) -> FirestoreResult<DocumentSnapshot> {
        let mut matches = self.read_collection(predicates).await?;
        match matches.len() {
            0 => Err(not_found(format!(
                "no document in collection {} matches the query",
                self.collection_id()
            ))),
            1 => Ok(matches.remove(0)),
            count => Err(failed_precondition(format!(
                "expected exactly one document in collection {} to match the query, found {count}",
                self.collection_id()
            ))),
        }
    }

    pub async fn update_doc(&self, id: &str, updates: Vec<FieldUpdate>) -> FirestoreResult<()> {
        if updates.is_empty() {
            return Err(invalid_argument("update_doc requires at least one field update"));
        }
        let reference = self.collection.doc(id)?;
        self.collection
            .update_document(&reference, updates)
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    not_found(format!("document {} not found", reference.path()))
                } else {
                    err
                }
            })?;
        log::debug!("updated document {}", reference.path());
        Ok(())
    }

    pub async fn delete_doc(&self, id: &str) -> FirestoreResult<()> {
        let reference = self.collection.doc(id)?;
        self.delete_reference(&reference).await
    }

    /// Deletes the single document matching `predicates`.
    pub async fn delete_doc_by_query(&self, predicates: &[QueryParameter]) -> FirestoreResult<()> {
        let snapshot = self.get_doc_by_query(predicates).await?;
        self.delete_reference(snapshot.reference()).await
    }

    /// Deletes every document matching `predicates` through one bulk writer.
    ///
    /// Every match is attempted even when some deletions fail; the first
    /// failure in result order is returned afterwards.
    pub async fn delete_docs_by_query(&self, predicates: &[QueryParameter]) -> FirestoreResult<()> {
        let matches = self.read_collection(predicates).await?;
        if matches.is_empty() {
            return Err(not_found(format!(
                "no document in collection {} matches the query",
                self.collection_id()
            )));
        }

        let mut session = BulkWriterSession::new(self.datastore.bulk_writer());
        for snapshot in &matches {
            session.delete(snapshot.reference());
        }
        session.finish().await.into_result()?;

        log::debug!(
            "deleted {} documents from collection {}",
            matches.len(),
            self.collection_id()
        );
        Ok(())
    }

    /// Runs a server-side aggregation over the matching documents.
    ///
    /// Only [`Aggregation::Count`] is supported.
    pub async fn get_aggregation_with_query(
        &self,
        predicates: &[QueryParameter],
        aggregation: Aggregation,
    ) -> FirestoreResult<i64> {
        if aggregation != Aggregation::Count {
            return Err(invalid_argument(format!(
                "unsupported aggregation '{aggregation}', only count is supported"
            )));
        }

        let alias = aggregation.alias();
        let query = self.query(predicates);
        let results = self
            .collection
            .run_aggregation(&query, &[AggregateDefinition::new(alias, aggregation.clone())])
            .await?;

        let value = results
            .get(alias)
            .ok_or_else(|| internal_error(format!("aggregation result is missing '{alias}'")))?;
        value.as_integer().ok_or_else(|| {
            internal_error(format!(
                "aggregation result '{alias}' is not an integer: {:?}",
                value.kind()
            ))
        })
    }

    /// Streams the matching set to `callback` until the returned handle is
    /// stopped or dropped, or `parent` is cancelled.
    ///
    /// The callback receives the complete matching set on every change, never a diff.
    pub async fn watch_collection<F>(
        &self,
        parent: &CancellationToken,
        predicates: &[QueryParameter],
        callback: F,
    ) -> FirestoreResult<WatchHandle>
    where
        F: FnMut(Vec<DocumentSnapshot>) + Send + 'static,
    {
        let query = self.query(predicates);
        start_watch(Arc::clone(&self.collection), parent, query, callback).await
    }

    fn query(&self, predicates: &[QueryParameter]) -> Query {
        build_query(&Query::new(self.collection_id()), predicates)
    }

    async fn delete_reference(&self, reference: &DocumentReference) -> FirestoreResult<()> {
        self.collection.delete_document(reference).await?;
        log::debug!("deleted document {}", reference.path());
        Ok(())
    }
}
