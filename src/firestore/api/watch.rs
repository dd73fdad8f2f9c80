use std::fmt::{Display, Formatter};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::firestore::api::{DocumentSnapshot, Query};
use crate::firestore::error::{internal_error, FirestoreError, FirestoreResult};
use crate::firestore::remote::datastore::{CollectionHandle, SnapshotDocuments, SnapshotStream};
use crate::platform::runtime::spawn_detached;

/// Lifecycle of a watch session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchState {
    Starting,
    Streaming,
    /// Cancelled through [`WatchHandle::stop`], the parent token or by dropping the handle.
    Stopped,
    /// The change feed reported an error. Sessions are never restarted.
    Failed,
    /// The change feed closed on its own.
    Ended,
}

impl WatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WatchState::Stopped | WatchState::Failed | WatchState::Ended)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WatchState::Starting => "starting",
            WatchState::Streaming => "streaming",
            WatchState::Stopped => "stopped",
            WatchState::Failed => "failed",
            WatchState::Ended => "ended",
        }
    }
}

impl Display for WatchState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live subscription returned by `GenericStore::watch_collection`.
///
/// Dropping the handle stops the session.
#[must_use = "dropping a WatchHandle stops the watch session"]
#[derive(Debug)]
pub struct WatchHandle {
    token: CancellationToken,
    state: watch::Receiver<WatchState>,
    task: Option<JoinHandle<WatchState>>,
}

impl WatchHandle {
    /// Cancels the session. Once this returns no new callback invocation
    /// starts; one already running may still complete. Safe to call from
    /// inside the callback.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn state(&self) -> WatchState {
        *self.state.borrow()
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled() && !self.state().is_terminal()
    }

    /// Token that stops this session when cancelled. Handy for stopping the
    /// session from within its own callback.
    pub fn stopper(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Waits until the session reaches a terminal state without consuming the handle.
    pub async fn terminated(&self) -> WatchState {
        let mut state = self.state.clone();
        let terminal = match state.wait_for(WatchState::is_terminal).await {
            Ok(terminal) => *terminal,
            // The task went away without publishing a terminal state.
            Err(_) => WatchState::Failed,
        };
        terminal
    }

    /// Waits for the background task to finish and returns its terminal state.
    pub async fn join(mut self) -> WatchState {
        let Some(task) = self.task.take() else {
            return self.state();
        };
        match task.await {
            Ok(state) => state,
            Err(err) => {
                log::warn!("watch task did not complete: {err}");
                WatchState::Failed
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Opens the change feed for `query` and spawns the task that feeds `callback`.
pub(crate) async fn start_watch<F>(
    collection: Arc<dyn CollectionHandle>,
    parent: &CancellationToken,
    query: Query,
    callback: F,
) -> FirestoreResult<WatchHandle>
where
    F: FnMut(Vec<DocumentSnapshot>) + Send + 'static,
{
    let token = parent.child_token();
    let (state_tx, state_rx) = watch::channel(WatchState::Starting);

    let stream = collection.listen(&query).await?;
    state_tx.send_replace(WatchState::Streaming);
    log::debug!("watch on collection {} streaming", query.collection_id());

    let session = WatchSession {
        collection_id: query.collection_id().to_string(),
        stream,
        token: token.clone(),
        state: state_tx,
        callback,
    };
    let task = spawn_detached(session.run())
        .ok_or_else(|| internal_error("no async runtime available to run the watch session"))?;

    Ok(WatchHandle {
        token,
        state: state_rx,
        task: Some(task),
    })
}

struct WatchSession<F> {
    collection_id: String,
    stream: Box<dyn SnapshotStream>,
    token: CancellationToken,
    state: watch::Sender<WatchState>,
    callback: F,
}

enum StreamEvent {
    Cancelled,
    Snapshot(Option<FirestoreResult<Box<dyn SnapshotDocuments>>>),
}

enum Drained {
    Documents(Vec<DocumentSnapshot>),
    Cancelled,
    Failed(FirestoreError),
}

impl<F> WatchSession<F>
where
    F: FnMut(Vec<DocumentSnapshot>) + Send + 'static,
{
    async fn run(mut self) -> WatchState {
        let terminal = loop {
            let event = tokio::select! {
                biased;
                _ = self.token.cancelled() => StreamEvent::Cancelled,
                next = self.stream.next() => StreamEvent::Snapshot(next),
            };

            match event {
                StreamEvent::Cancelled => break WatchState::Stopped,
                StreamEvent::Snapshot(None) => break WatchState::Ended,
                StreamEvent::Snapshot(Some(Err(err))) => {
                    log::warn!("watch on collection {} failed: {err}", self.collection_id);
                    break WatchState::Failed;
                }
                StreamEvent::Snapshot(Some(Ok(documents))) => match drain(&self.token, documents).await {
                    Drained::Documents(documents) => {
                        if self.token.is_cancelled() {
                            break WatchState::Stopped;
                        }
                        (self.callback)(documents);
                    }
                    Drained::Cancelled => break WatchState::Stopped,
                    Drained::Failed(err) => {
                        log::warn!(
                            "watch on collection {} failed while reading a snapshot: {err}",
                            self.collection_id
                        );
                        break WatchState::Failed;
                    }
                },
            }
        };

        self.stream.stop().await;
        self.state.send_replace(terminal);
        log::debug!("watch on collection {} {terminal}", self.collection_id);
        terminal
    }
}

async fn drain(token: &CancellationToken, mut documents: Box<dyn SnapshotDocuments>) -> Drained {
    let mut collected = Vec::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return Drained::Cancelled,
            next = documents.next() => next,
        };
        match next {
            Some(Ok(document)) => collected.push(document),
            Some(Err(err)) => return Drained::Failed(err),
            None => return Drained::Documents(collected),
        }
    }
}
