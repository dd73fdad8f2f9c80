use futures::future::join_all;

use crate::firestore::api::DocumentReference;
use crate::firestore::error::{FirestoreError, FirestoreResult};
use crate::firestore::remote::datastore::{BulkWriter, BulkWriterJob};
use crate::firestore::value::MapValue;

/// Batching context for one multi-document call.
///
/// Every enqueued write is tracked by its position, including writes the
/// driver refused to enqueue, so [`BulkWriterSession::finish`] can report an
/// outcome for each input item.
pub struct BulkWriterSession {
    writer: Box<dyn BulkWriter>,
    pending: Vec<PendingItem>,
}

enum PendingItem {
    Enqueued(BulkWriterJob),
    Rejected(FirestoreError),
}

impl BulkWriterSession {
    pub fn new(writer: Box<dyn BulkWriter>) -> Self {
        Self {
            writer,
            pending: Vec::new(),
        }
    }

    pub fn set(&mut self, reference: &DocumentReference, data: MapValue) {
        let item = self.writer.set(reference, data);
        self.track(item);
    }

    pub fn delete(&mut self, reference: &DocumentReference) {
        let item = self.writer.delete(reference);
        self.track(item);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn track(&mut self, item: FirestoreResult<BulkWriterJob>) {
        self.pending.push(match item {
            Ok(job) => PendingItem::Enqueued(job),
            Err(err) => PendingItem::Rejected(err),
        });
    }

    /// Flushes the writer and collects one outcome per enqueued item.
    pub async fn finish(mut self) -> BulkWriteOutcome {
        self.writer.end().await;

        let results = join_all(self.pending.into_iter().map(|item| async move {
            match item {
                PendingItem::Enqueued(job) => job.result().await,
                PendingItem::Rejected(err) => Err(err),
            }
        }))
        .await;

        let outcome = BulkWriteOutcome { results };
        if outcome.failure_count() > 0 {
            log::warn!(
                "bulk write finished with {} of {} writes failed",
                outcome.failure_count(),
                outcome.results.len()
            );
        }
        outcome
    }
}

/// Per-item outcomes of a flushed [`BulkWriterSession`], in input order.
#[derive(Debug)]
pub struct BulkWriteOutcome {
    results: Vec<FirestoreResult<()>>,
}

impl BulkWriteOutcome {
    pub fn results(&self) -> &[FirestoreResult<()>] {
        &self.results
    }

    pub fn failure_count(&self) -> usize {
        self.results.iter().filter(|result| result.is_err()).count()
    }

    pub fn first_error(&self) -> Option<&FirestoreError> {
        self.results.iter().find_map(|result| result.as_ref().err())
    }

    /// Fails with the first error in input order, if any.
    pub fn into_result(self) -> FirestoreResult<()> {
        self.results.into_iter().collect()
    }
}
