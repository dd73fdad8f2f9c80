use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::firestore::api::{
    AggregateDefinition, Aggregation, DocumentReference, DocumentSnapshot, FieldUpdate, Query,
};
use crate::firestore::config::FirestoreClientConfig;
use crate::firestore::error::{
    already_exists, failed_precondition, invalid_argument, not_found, unavailable, FirestoreError,
    FirestoreResult,
};
use crate::firestore::model::{generate_auto_id, DatabaseId, DocumentKey, FieldPath, Timestamp};
use crate::firestore::query_evaluator::apply_query_to_documents;
use crate::firestore::value::{FirestoreValue, MapValue, SentinelValue, ValueKind};

use super::{
    BufferedSnapshotDocuments, BulkWriter, BulkWriterJob, BulkWriterJobResolver, CollectionHandle,
    Datastore, SnapshotDocuments, SnapshotStream,
};

const IN_MEMORY_PROJECT_ID: &str = "in-memory";

/// Kind of request a driver received.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DriverOperation {
    Add,
    Get,
    Update,
    Delete,
    Query,
    Aggregate,
    Listen,
    BulkSet,
    BulkDelete,
}

impl DriverOperation {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            DriverOperation::Add
                | DriverOperation::Update
                | DriverOperation::Delete
                | DriverOperation::BulkSet
                | DriverOperation::BulkDelete
        )
    }
}

/// One request observed by the in-memory driver, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverCall {
    pub operation: DriverOperation,
    /// The collection or `collection/document` path the request targeted.
    pub target: String,
}

/// Document database kept entirely in process memory.
///
/// Besides serving reads and writes it records every request it receives and
/// can be told to fail specific writes or change feeds, which makes it usable
/// as a test spy for code built on the [`Datastore`] traits.
#[derive(Clone)]
pub struct InMemoryDatastore {
    inner: Arc<Inner>,
}

struct Inner {
    database_id: DatabaseId,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    documents: BTreeMap<DocumentKey, StoredDocument>,
    listeners: Vec<Listener>,
    calls: Vec<DriverCall>,
    faults: Faults,
    closed: bool,
}

struct StoredDocument {
    data: MapValue,
    update_time: Timestamp,
}

struct Listener {
    collection_id: String,
    notify: async_channel::Sender<()>,
    failure: PendingFailure,
}

/// Failure armed on one open change feed, consumed when it fires.
type PendingFailure = Arc<Mutex<Option<(StreamFailure, FirestoreError)>>>;

#[derive(Default)]
struct Faults {
    writes: BTreeMap<DocumentKey, FirestoreError>,
    listen: BTreeMap<String, FirestoreError>,
    omit_aggregation_results: bool,
}

#[derive(Clone, Copy)]
enum StreamFailure {
    OnSnapshot,
    WhileDraining,
}

enum PendingWrite {
    Create { key: DocumentKey, data: MapValue },
    Set { key: DocumentKey, data: MapValue },
    Update { key: DocumentKey, updates: Vec<FieldUpdate> },
    Delete { key: DocumentKey },
}

impl PendingWrite {
    fn key(&self) -> &DocumentKey {
        match self {
            PendingWrite::Create { key, .. }
            | PendingWrite::Set { key, .. }
            | PendingWrite::Update { key, .. }
            | PendingWrite::Delete { key } => key,
        }
    }
}

impl Default for InMemoryDatastore {
    fn default() -> Self {
        Self::new(DatabaseId::default(IN_MEMORY_PROJECT_ID))
    }
}

impl InMemoryDatastore {
    pub fn new(database_id: DatabaseId) -> Self {
        Self {
            inner: Arc::new(Inner {
                database_id,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn from_config(config: &FirestoreClientConfig) -> FirestoreResult<Self> {
        Ok(Self::new(config.database_id()?))
    }

    /// Makes every write to `collection_id/document_id` fail with `error`.
    pub fn fail_writes_to(&self, collection_id: &str, document_id: &str, error: FirestoreError) -> FirestoreResult<()> {
        let key = DocumentKey::new(collection_id, document_id)?;
        self.state().faults.writes.insert(key, error);
        Ok(())
    }

    /// Makes opening a change feed on `collection_id` fail with `error`.
    pub fn fail_listen(&self, collection_id: &str, error: FirestoreError) {
        self.state().faults.listen.insert(collection_id.to_string(), error);
    }

    /// Makes every change feed currently open on `collection_id` report
    /// `error` in place of its next snapshot, and wakes those feeds up.
    /// Each feed fails once; feeds opened later are unaffected.
    pub fn break_streams(&self, collection_id: &str, error: FirestoreError) {
        self.inject_stream_failure(collection_id, StreamFailure::OnSnapshot, error);
    }

    /// Like [`InMemoryDatastore::break_streams`], but the failure surfaces
    /// after the documents of the next snapshot have been delivered.
    pub fn break_streams_while_draining(&self, collection_id: &str, error: FirestoreError) {
        self.inject_stream_failure(collection_id, StreamFailure::WhileDraining, error);
    }

    /// Makes aggregation requests answer with an empty result set.
    pub fn omit_aggregation_results(&self, omit: bool) {
        self.state().faults.omit_aggregation_results = omit;
    }

    /// Removes every injected fault, including stream failures that have not fired yet.
    pub fn clear_faults(&self) {
        let mut state = self.state();
        state.faults = Faults::default();
        for listener in &state.listeners {
            take_failure(&listener.failure);
        }
    }

    /// Every request received so far.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, operation: DriverOperation) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    pub fn write_calls(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.operation.is_write())
            .count()
    }

    pub fn document_count(&self, collection_id: &str) -> usize {
        self.state()
            .documents
            .keys()
            .filter(|key| key.collection_id() == collection_id)
            .count()
    }

    pub fn contains_document(&self, collection_id: &str, document_id: &str) -> bool {
        match DocumentKey::new(collection_id, document_id) {
            Ok(key) => self.state().documents.contains_key(&key),
            Err(_) => false,
        }
    }

    /// Number of change feeds still attached to the datastore.
    pub fn active_listeners(&self) -> usize {
        let mut state = self.state();
        state.listeners.retain(|listener| !listener.notify.is_closed());
        state.listeners.len()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn inject_stream_failure(&self, collection_id: &str, failure: StreamFailure, error: FirestoreError) {
        log::debug!("injecting change feed failure on collection {collection_id}: {error}");
        let mut state = self.state();
        for listener in state
            .listeners
            .iter()
            .filter(|listener| listener.collection_id == collection_id)
        {
            *listener.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some((failure, error.clone()));
        }
        notify_listeners(&mut state, collection_id);
    }

    fn record(state: &mut State, operation: DriverOperation, target: String) -> FirestoreResult<()> {
        state.calls.push(DriverCall { operation, target });
        if state.closed {
            return Err(unavailable("the datastore has been closed"));
        }
        Ok(())
    }

    fn apply_write(&self, operation: DriverOperation, write: PendingWrite) -> FirestoreResult<()> {
        let mut state = self.state();
        let key = write.key().clone();
        Self::record(&mut state, operation, key.canonical_string())?;
        if let Some(error) = state.faults.writes.get(&key) {
            return Err(error.clone());
        }

        let now = Timestamp::now();
        match write {
            PendingWrite::Create { key, data } => {
                if state.documents.contains_key(&key) {
                    return Err(already_exists(format!("Document {key} already exists")));
                }
                let data = resolve_set_data(data, now)?;
                state.documents.insert(key, StoredDocument { data, update_time: now });
            }
            PendingWrite::Set { key, data } => {
                let data = resolve_set_data(data, now)?;
                state.documents.insert(key, StoredDocument { data, update_time: now });
            }
            PendingWrite::Update { key, updates } => {
                let current = state
                    .documents
                    .get(&key)
                    .ok_or_else(|| not_found(format!("Document {key} does not exist")))?;
                let mut fields = current.data.fields().clone();
                for update in &updates {
                    apply_field_update(&mut fields, update, now)?;
                }
                state.documents.insert(
                    key,
                    StoredDocument {
                        data: MapValue::new(fields),
                        update_time: now,
                    },
                );
            }
            PendingWrite::Delete { key } => {
                if state.documents.remove(&key).is_none() {
                    return Err(not_found(format!("Document {key} does not exist")));
                }
            }
        }

        notify_listeners(&mut state, key.collection_id());
        Ok(())
    }

    fn snapshot(&self, query: &Query) -> FirestoreResult<Vec<DocumentSnapshot>> {
        let state = self.state();
        let candidates = state
            .documents
            .iter()
            .filter(|(key, _)| key.collection_id() == query.collection_id())
            .map(|(key, stored)| {
                DocumentSnapshot::new(DocumentReference::from_key(key.clone()), Some(stored.data.clone()))
                    .with_update_time(stored.update_time)
            })
            .collect();
        drop(state);
        apply_query_to_documents(candidates, query)
    }
}

fn take_failure(failure: &PendingFailure) -> Option<(StreamFailure, FirestoreError)> {
    failure.lock().unwrap_or_else(PoisonError::into_inner).take()
}

fn notify_listeners(state: &mut State, collection_id: &str) {
    state.listeners.retain(|listener| !listener.notify.is_closed());
    for listener in state
        .listeners
        .iter()
        .filter(|listener| listener.collection_id == collection_id)
    {
        // A full channel already holds a pending wake-up.
        let _ = listener.notify.try_send(());
    }
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    fn database_id(&self) -> &DatabaseId {
        &self.inner.database_id
    }

    fn collection(&self, collection_id: &str) -> FirestoreResult<Arc<dyn CollectionHandle>> {
        if collection_id.is_empty() || collection_id.contains('/') {
            return Err(invalid_argument(format!(
                "Collection ID must be a single non-empty path segment, got '{collection_id}'"
            )));
        }
        Ok(Arc::new(InMemoryCollection {
            datastore: self.clone(),
            collection_id: collection_id.to_string(),
        }))
    }

    fn bulk_writer(&self) -> Box<dyn BulkWriter> {
        Box::new(InMemoryBulkWriter {
            datastore: self.clone(),
            pending: Vec::new(),
            enqueued: BTreeSet::new(),
            ended: false,
        })
    }

    async fn close(&self) -> FirestoreResult<()> {
        let mut state = self.state();
        state.closed = true;
        // Dropping the senders ends every open change feed.
        state.listeners.clear();
        log::debug!("in-memory datastore {} closed", self.inner.database_id.database());
        Ok(())
    }
}

struct InMemoryCollection {
    datastore: InMemoryDatastore,
    collection_id: String,
}

#[async_trait]
impl CollectionHandle for InMemoryCollection {
    fn id(&self) -> &str {
        &self.collection_id
    }

    async fn add_document(&self, data: MapValue) -> FirestoreResult<DocumentReference> {
        let key = DocumentKey::new(self.collection_id.as_str(), generate_auto_id())?;
        self.datastore.apply_write(
            DriverOperation::Add,
            PendingWrite::Create {
                key: key.clone(),
                data,
            },
        )?;
        Ok(DocumentReference::from_key(key))
    }

    async fn get_document(&self, reference: &DocumentReference) -> FirestoreResult<DocumentSnapshot> {
        let mut state = self.datastore.state();
        InMemoryDatastore::record(&mut state, DriverOperation::Get, reference.path())?;
        let snapshot = match state.documents.get(reference.key()) {
            Some(stored) => DocumentSnapshot::new(reference.clone(), Some(stored.data.clone()))
                .with_update_time(stored.update_time),
            None => DocumentSnapshot::new(reference.clone(), None),
        };
        Ok(snapshot)
    }

    async fn update_document(
        &self,
        reference: &DocumentReference,
        updates: Vec<FieldUpdate>,
    ) -> FirestoreResult<()> {
        self.datastore.apply_write(
            DriverOperation::Update,
            PendingWrite::Update {
                key: reference.key().clone(),
                updates,
            },
        )
    }

    async fn delete_document(&self, reference: &DocumentReference) -> FirestoreResult<()> {
        self.datastore.apply_write(
            DriverOperation::Delete,
            PendingWrite::Delete {
                key: reference.key().clone(),
            },
        )
    }

    async fn run_query(&self, query: &Query) -> FirestoreResult<Vec<DocumentSnapshot>> {
        {
            let mut state = self.datastore.state();
            InMemoryDatastore::record(&mut state, DriverOperation::Query, query.collection_id().to_string())?;
        }
        self.datastore.snapshot(query)
    }

    async fn run_aggregation(
        &self,
        query: &Query,
        aggregations: &[AggregateDefinition],
    ) -> FirestoreResult<BTreeMap<String, FirestoreValue>> {
        let omit = {
            let mut state = self.datastore.state();
            InMemoryDatastore::record(
                &mut state,
                DriverOperation::Aggregate,
                query.collection_id().to_string(),
            )?;
            state.faults.omit_aggregation_results
        };
        let documents = self.datastore.snapshot(query)?;
        if omit {
            return Ok(BTreeMap::new());
        }

        aggregations
            .iter()
            .map(|definition| {
                let value = aggregate_documents(&documents, definition.aggregation())?;
                Ok((definition.alias().to_string(), value))
            })
            .collect()
    }

    async fn listen(&self, query: &Query) -> FirestoreResult<Box<dyn SnapshotStream>> {
        let mut state = self.datastore.state();
        InMemoryDatastore::record(&mut state, DriverOperation::Listen, query.collection_id().to_string())?;
        if let Some(error) = state.faults.listen.get(query.collection_id()) {
            return Err(error.clone());
        }
        let (notify, notifications) = async_channel::bounded(1);
        let failure = PendingFailure::default();
        state.listeners.push(Listener {
            collection_id: query.collection_id().to_string(),
            notify,
            failure: Arc::clone(&failure),
        });
        Ok(Box::new(InMemorySnapshotStream {
            datastore: self.datastore.clone(),
            query: query.clone(),
            notifications,
            failure,
            initial_pending: true,
            stopped: false,
        }))
    }
}

fn aggregate_documents(
    documents: &[DocumentSnapshot],
    aggregation: &Aggregation,
) -> FirestoreResult<FirestoreValue> {
    let numeric_values = |field: &str| -> FirestoreResult<Vec<FirestoreValue>> {
        let path = FieldPath::from_dot_separated(field)?;
        Ok(documents
            .iter()
            .filter_map(|document| document.get(&path))
            .filter(|value| matches!(value.kind(), ValueKind::Integer(_) | ValueKind::Double(_)))
            .cloned()
            .collect())
    };

    match aggregation {
        Aggregation::Count => Ok(FirestoreValue::from_integer(documents.len() as i64)),
        Aggregation::Sum(field) => {
            let values = numeric_values(field)?;
            Ok(values
                .iter()
                .fold(FirestoreValue::from_integer(0), |total, value| add_numbers(&total, value)))
        }
        Aggregation::Average(field) => {
            let values = numeric_values(field)?;
            if values.is_empty() {
                return Ok(FirestoreValue::null());
            }
            let total: f64 = values.iter().filter_map(as_f64).sum();
            Ok(FirestoreValue::from_double(total / values.len() as f64))
        }
    }
}

struct InMemorySnapshotStream {
    datastore: InMemoryDatastore,
    query: Query,
    notifications: async_channel::Receiver<()>,
    failure: PendingFailure,
    initial_pending: bool,
    stopped: bool,
}

#[async_trait]
impl SnapshotStream for InMemorySnapshotStream {
    async fn next(&mut self) -> Option<FirestoreResult<Box<dyn SnapshotDocuments>>> {
        if self.stopped {
            return None;
        }
        if self.initial_pending {
            self.initial_pending = false;
        } else if self.notifications.recv().await.is_err() {
            return None;
        }

        let failure = take_failure(&self.failure);
        if let Some((StreamFailure::OnSnapshot, error)) = failure {
            return Some(Err(error));
        }

        let documents = match self.datastore.snapshot(&self.query) {
            Ok(documents) => documents,
            Err(error) => return Some(Err(error)),
        };
        let mut buffered = BufferedSnapshotDocuments::new(documents);
        if let Some((StreamFailure::WhileDraining, error)) = failure {
            buffered = buffered.with_trailing_error(error);
        }
        Some(Ok(Box::new(buffered)))
    }

    async fn stop(&mut self) {
        self.stopped = true;
        self.notifications.close();
    }
}

struct InMemoryBulkWriter {
    datastore: InMemoryDatastore,
    pending: Vec<(DriverOperation, PendingWrite, BulkWriterJobResolver)>,
    enqueued: BTreeSet<DocumentKey>,
    ended: bool,
}

impl InMemoryBulkWriter {
    fn enqueue(&mut self, operation: DriverOperation, write: PendingWrite) -> FirestoreResult<BulkWriterJob> {
        if self.ended {
            return Err(failed_precondition("the bulk writer has already been ended"));
        }
        if !self.enqueued.insert(write.key().clone()) {
            return Err(invalid_argument(format!(
                "bulk writer received duplicate write for {}",
                write.key()
            )));
        }
        let (resolver, job) = BulkWriterJob::channel();
        self.pending.push((operation, write, resolver));
        Ok(job)
    }
}

#[async_trait]
impl BulkWriter for InMemoryBulkWriter {
    fn set(&mut self, reference: &DocumentReference, data: MapValue) -> FirestoreResult<BulkWriterJob> {
        self.enqueue(
            DriverOperation::BulkSet,
            PendingWrite::Set {
                key: reference.key().clone(),
                data,
            },
        )
    }

    fn delete(&mut self, reference: &DocumentReference) -> FirestoreResult<BulkWriterJob> {
        self.enqueue(
            DriverOperation::BulkDelete,
            PendingWrite::Delete {
                key: reference.key().clone(),
            },
        )
    }

    async fn end(&mut self) {
        self.ended = true;
        for (operation, write, resolver) in self.pending.drain(..) {
            resolver.resolve(self.datastore.apply_write(operation, write));
        }
    }
}

fn resolve_set_data(data: MapValue, now: Timestamp) -> FirestoreResult<MapValue> {
    let fields = data
        .into_fields()
        .into_iter()
        .map(|(key, value)| {
            let resolved = match value.kind() {
                ValueKind::Sentinel(SentinelValue::Delete) => {
                    return Err(invalid_argument(format!(
                        "delete_field() cannot be used when writing a whole document (field '{key}')"
                    )))
                }
                _ => resolve_value(&value, None, now)?,
            };
            Ok((key, resolved))
        })
        .collect::<FirestoreResult<BTreeMap<_, _>>>()?;
    Ok(MapValue::new(fields))
}

fn resolve_value(
    value: &FirestoreValue,
    current: Option<&FirestoreValue>,
    now: Timestamp,
) -> FirestoreResult<FirestoreValue> {
    match value.kind() {
        ValueKind::Sentinel(SentinelValue::ServerTimestamp) => Ok(FirestoreValue::from_timestamp(now)),
        ValueKind::Sentinel(SentinelValue::NumericIncrement(operand)) => {
            if as_f64(operand).is_none() {
                return Err(invalid_argument("numeric_increment() requires a numeric operand"));
            }
            Ok(match current.filter(|value| as_f64(value).is_some()) {
                Some(current) => add_numbers(current, operand),
                None => (**operand).clone(),
            })
        }
        ValueKind::Sentinel(SentinelValue::Delete) => Err(invalid_argument(
            "delete_field() can only appear at the top level of an update",
        )),
        ValueKind::Array(array) => {
            if array.values().iter().any(FirestoreValue::is_sentinel) {
                return Err(invalid_argument("Sentinel values cannot be used inside arrays"));
            }
            Ok(value.clone())
        }
        ValueKind::Map(map) => {
            let fields = map
                .fields()
                .iter()
                .map(|(key, child)| Ok((key.clone(), resolve_value(child, None, now)?)))
                .collect::<FirestoreResult<BTreeMap<_, _>>>()?;
            Ok(FirestoreValue::from_map(fields))
        }
        _ => Ok(value.clone()),
    }
}

fn apply_field_update(
    fields: &mut BTreeMap<String, FirestoreValue>,
    update: &FieldUpdate,
    now: Timestamp,
) -> FirestoreResult<()> {
    let segments = update.path().segments();
    if matches!(update.value().kind(), ValueKind::Sentinel(SentinelValue::Delete)) {
        remove_value_at_segments(fields, segments);
        return Ok(());
    }
    let current = value_at_segments(fields, segments);
    let resolved = resolve_value(update.value(), current.as_ref(), now)?;
    set_value_at_segments(fields, segments, resolved);
    Ok(())
}

fn value_at_segments(fields: &BTreeMap<String, FirestoreValue>, segments: &[String]) -> Option<FirestoreValue> {
    let (first, rest) = segments.split_first()?;
    let value = fields.get(first)?;
    if rest.is_empty() {
        return Some(value.clone());
    }
    match value.kind() {
        ValueKind::Map(child) => value_at_segments(child.fields(), rest),
        _ => None,
    }
}

fn set_value_at_segments(fields: &mut BTreeMap<String, FirestoreValue>, segments: &[String], value: FirestoreValue) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        fields.insert(first.clone(), value);
        return;
    }

    let mut child_fields = match fields.get(first).map(FirestoreValue::kind) {
        Some(ValueKind::Map(map)) => map.fields().clone(),
        _ => BTreeMap::new(),
    };
    set_value_at_segments(&mut child_fields, rest, value);
    fields.insert(first.clone(), FirestoreValue::from_map(child_fields));
}

fn remove_value_at_segments(fields: &mut BTreeMap<String, FirestoreValue>, segments: &[String]) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        fields.remove(first);
        return;
    }
    if let Some(ValueKind::Map(map)) = fields.get(first).map(FirestoreValue::kind) {
        let mut child_fields = map.fields().clone();
        remove_value_at_segments(&mut child_fields, rest);
        fields.insert(first.clone(), FirestoreValue::from_map(child_fields));
    }
}

fn as_f64(value: &FirestoreValue) -> Option<f64> {
    match value.kind() {
        ValueKind::Integer(integer) => Some(*integer as f64),
        ValueKind::Double(double) => Some(*double),
        _ => None,
    }
}

fn add_numbers(left: &FirestoreValue, right: &FirestoreValue) -> FirestoreValue {
    match (left.kind(), right.kind()) {
        (ValueKind::Integer(a), ValueKind::Integer(b)) => FirestoreValue::from_integer(a.saturating_add(*b)),
        _ => FirestoreValue::from_double(as_f64(left).unwrap_or(0.0) + as_f64(right).unwrap_or(0.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::api::{FilterOperator, QueryParameter};

    fn fields(entries: Vec<(&str, FirestoreValue)>) -> MapValue {
        MapValue::new(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[tokio::test]
    async fn add_then_get_round_trips_data() {
        let datastore = InMemoryDatastore::default();
        let cities = datastore.collection("cities").unwrap();
        let data = fields(vec![("name", "SF".into())]);
        let reference = cities.add_document(data.clone()).await.unwrap();

        let snapshot = cities.get_document(&reference).await.unwrap();
        assert!(snapshot.exists());
        assert_eq!(snapshot.map_value(), Some(&data));
        assert!(snapshot.update_time().is_some());
        assert_eq!(datastore.count_calls(DriverOperation::Add), 1);
    }

    #[tokio::test]
    async fn update_applies_nested_paths_and_sentinels() {
        let datastore = InMemoryDatastore::default();
        let cities = datastore.collection("cities").unwrap();
        let stats = FirestoreValue::from_map(BTreeMap::from([
            ("visits".to_string(), FirestoreValue::from_integer(1)),
            ("likes".to_string(), FirestoreValue::from_integer(5)),
        ]));
        let reference = cities
            .add_document(fields(vec![("stats", stats), ("draft", true.into())]))
            .await
            .unwrap();

        cities
            .update_document(
                &reference,
                vec![
                    FieldUpdate::new("stats.visits", FirestoreValue::numeric_increment(2_i64.into())).unwrap(),
                    FieldUpdate::new("stats.shares", 9_i64).unwrap(),
                    FieldUpdate::new("draft", FirestoreValue::delete_field()).unwrap(),
                    FieldUpdate::new("edited_at", FirestoreValue::server_timestamp()).unwrap(),
                ],
            )
            .await
            .unwrap();

        let snapshot = cities.get_document(&reference).await.unwrap();
        let visits = FieldPath::from_dot_separated("stats.visits").unwrap();
        let shares = FieldPath::from_dot_separated("stats.shares").unwrap();
        let likes = FieldPath::from_dot_separated("stats.likes").unwrap();
        assert_eq!(snapshot.get(&visits), Some(&FirestoreValue::from_integer(3)));
        assert_eq!(snapshot.get(&shares), Some(&FirestoreValue::from_integer(9)));
        assert_eq!(snapshot.get(&likes), Some(&FirestoreValue::from_integer(5)));
        assert!(snapshot.data().unwrap().get("draft").is_none());
        assert!(matches!(
            snapshot.data().unwrap().get("edited_at").map(FirestoreValue::kind),
            Some(ValueKind::Timestamp(_))
        ));
    }

    #[tokio::test]
    async fn writes_to_missing_documents_are_not_found() {
        let datastore = InMemoryDatastore::default();
        let cities = datastore.collection("cities").unwrap();
        let reference = cities.doc("ghost").unwrap();

        let err = cities.delete_document(&reference).await.unwrap_err();
        assert_eq!(err.code_str(), "firestore/not-found");
        let err = cities
            .update_document(&reference, vec![FieldUpdate::new("a", 1_i64).unwrap()])
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/not-found");
    }

    #[tokio::test]
    async fn bulk_writer_rejects_duplicates_and_applies_on_end() {
        let datastore = InMemoryDatastore::default();
        let cities = datastore.collection("cities").unwrap();
        let sf = cities.doc("sf").unwrap();
        let mut writer = datastore.bulk_writer();

        let job = writer.set(&sf, fields(vec![("name", "SF".into())])).unwrap();
        let err = writer.set(&sf, MapValue::default()).unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
        assert!(!datastore.contains_document("cities", "sf"));

        writer.end().await;
        job.result().await.unwrap();
        assert!(datastore.contains_document("cities", "sf"));

        let err = writer.delete(&sf).unwrap_err();
        assert_eq!(err.code_str(), "firestore/failed-precondition");
    }

    #[tokio::test]
    async fn injected_write_failures_surface_per_job() {
        let datastore = InMemoryDatastore::default();
        datastore
            .fail_writes_to("cities", "la", unavailable("shard offline"))
            .unwrap();
        let cities = datastore.collection("cities").unwrap();
        let mut writer = datastore.bulk_writer();
        let la = writer.set(&cities.doc("la").unwrap(), MapValue::default()).unwrap();
        let sf = writer.set(&cities.doc("sf").unwrap(), MapValue::default()).unwrap();
        writer.end().await;

        assert_eq!(la.result().await.unwrap_err().code_str(), "firestore/unavailable");
        sf.result().await.unwrap();
        assert_eq!(datastore.count_calls(DriverOperation::BulkSet), 2);
    }

    #[tokio::test]
    async fn aggregation_counts_matching_documents() {
        let datastore = InMemoryDatastore::default();
        let cities = datastore.collection("cities").unwrap();
        for (state, population) in [("CA", 10_i64), ("CA", 20), ("NY", 30)] {
            cities
                .add_document(fields(vec![("state", state.into()), ("population", population.into())]))
                .await
                .unwrap();
        }
        let query = Query::new("cities").where_field(QueryParameter::new("state", FilterOperator::Equal, "CA"));
        let result = cities
            .run_aggregation(
                &query,
                &[
                    AggregateDefinition::new("count", Aggregation::Count),
                    AggregateDefinition::new("sum", Aggregation::Sum("population".into())),
                    AggregateDefinition::new("avg", Aggregation::Average("population".into())),
                ],
            )
            .await
            .unwrap();
        assert_eq!(result.get("count"), Some(&FirestoreValue::from_integer(2)));
        assert_eq!(result.get("sum"), Some(&FirestoreValue::from_integer(30)));
        assert_eq!(result.get("avg"), Some(&FirestoreValue::from_double(15.0)));
    }

    #[tokio::test]
    async fn change_feed_emits_initial_and_updated_sets() {
        let datastore = InMemoryDatastore::default();
        let cities = datastore.collection("cities").unwrap();
        let mut stream = cities.listen(&Query::new("cities")).await.unwrap();

        let mut initial = stream.next().await.unwrap().unwrap();
        assert!(initial.next().await.is_none());

        cities.add_document(MapValue::default()).await.unwrap();
        let mut update = stream.next().await.unwrap().unwrap();
        assert!(update.next().await.unwrap().is_ok());
        assert!(update.next().await.is_none());

        stream.stop().await;
        assert!(stream.next().await.is_none());
        assert_eq!(datastore.active_listeners(), 0);
    }

    #[tokio::test]
    async fn closing_ends_change_feeds() {
        let datastore = InMemoryDatastore::default();
        let cities = datastore.collection("cities").unwrap();
        let mut stream = cities.listen(&Query::new("cities")).await.unwrap();
        stream.next().await.unwrap().unwrap();

        datastore.close().await.unwrap();
        assert!(stream.next().await.is_none());
        let err = cities.run_query(&Query::new("cities")).await.unwrap_err();
        assert_eq!(err.code_str(), "firestore/unavailable");
    }

    #[tokio::test]
    async fn stream_failure_fires_once_per_open_feed() {
        let datastore = InMemoryDatastore::default();
        let cities = datastore.collection("cities").unwrap();
        let mut broken = cities.listen(&Query::new("cities")).await.unwrap();
        broken.next().await.unwrap().unwrap();

        datastore.break_streams("cities", unavailable("connection reset"));
        let err = broken.next().await.unwrap().err().unwrap();
        assert_eq!(err.code_str(), "firestore/unavailable");

        let mut fresh = cities.listen(&Query::new("cities")).await.unwrap();
        assert!(fresh.next().await.unwrap().is_ok());
        cities.add_document(MapValue::default()).await.unwrap();
        assert!(broken.next().await.unwrap().is_ok());
        assert!(fresh.next().await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn clear_faults_disarms_pending_failures() {
        let datastore = InMemoryDatastore::default();
        let cities = datastore.collection("cities").unwrap();
        let mut stream = cities.listen(&Query::new("cities")).await.unwrap();
        stream.next().await.unwrap().unwrap();
        datastore
            .fail_writes_to("cities", "sf", unavailable("offline"))
            .unwrap();
        datastore.break_streams("cities", unavailable("connection reset"));

        datastore.clear_faults();

        assert!(stream.next().await.unwrap().is_ok());
        let mut writer = datastore.bulk_writer();
        let job = writer.set(&cities.doc("sf").unwrap(), MapValue::default()).unwrap();
        writer.end().await;
        job.result().await.unwrap();
    }
}
