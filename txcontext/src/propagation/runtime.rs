//! Tokio entry points that carry the caller's transaction context.

use super::adapter::Propagated;
use super::future::PropagatedFuture;
use crate::errors::TxContextError;
use std::future::Future;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Spawns `future` on the current tokio runtime in the caller's context.
///
/// # Panics
///
/// Panics if called outside a tokio runtime, like [`tokio::spawn`].
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(PropagatedFuture::capture(future))
}

/// Spawns `future` on the runtime behind `handle` in the caller's context.
pub fn spawn_on<F>(handle: &Handle, future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    handle.spawn(PropagatedFuture::capture(future))
}

/// Runs `task` on tokio's blocking pool in the caller's context.
///
/// # Panics
///
/// Panics if called outside a tokio runtime, like
/// [`tokio::task::spawn_blocking`].
pub fn spawn_blocking<F, R>(task: F) -> JoinHandle<Result<R, TxContextError>>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let task = Propagated::capture(task);
    tokio::task::spawn_blocking(move || task.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawn_propagates() {
        context::clear();
        context::set("async-caller");
        let observed = spawn(async {
            tokio::task::yield_now().await;
            context::get()
        })
        .await
        .unwrap();
        assert_eq!(observed, "async-caller");
        context::clear();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawn_blocking_propagates_and_clears() {
        context::clear();
        context::set("blocking-caller");
        context::put_metadata("k", 7).unwrap();

        let (id, k) = spawn_blocking(|| (context::get(), context::get_metadata("k").unwrap()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(id, "blocking-caller");
        assert_eq!(k, Some(serde_json::json!(7)));

        let leaked = tokio::task::spawn_blocking(context::is_within_created_context)
            .await
            .unwrap();
        assert!(!leaked);
        context::clear();
    }

    #[test]
    fn test_spawn_on_handle() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        context::clear();
        context::set("handle-caller");

        let handle = spawn_on(runtime.handle(), async { context::get() });
        let observed = runtime.block_on(handle).unwrap();

        assert_eq!(observed, "handle-caller");
        context::clear();
    }
}
