use std::future::Future;
use std::sync::LazyLock;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

static BACKGROUND_RUNTIME: LazyLock<Option<Runtime>> = LazyLock::new(|| {
    match Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("generic-store-background")
        .enable_all()
        .build()
    {
        Ok(runtime) => Some(runtime),
        Err(err) => {
            log::warn!("failed to build background tokio runtime: {err}");
            None
        }
    }
});

/// Spawns `future` onto the caller's Tokio runtime, or onto a shared
/// background runtime when called from outside one.
///
/// Returns `None` only when no runtime is available at all.
pub fn spawn_detached<F>(future: F) -> Option<JoinHandle<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    if let Ok(handle) = Handle::try_current() {
        return Some(handle.spawn(future));
    }
    BACKGROUND_RUNTIME.as_ref().map(|runtime| runtime.spawn(future))
}
