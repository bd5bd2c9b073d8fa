//! Work-stealing thread pool that propagates transaction contexts.

use super::adapter::Propagated;
use crate::config::PoolConfig;
use crate::errors::{panic_message, TxContextError};
use crate::hooks;
use futures::channel::oneshot;
use rayon::prelude::*;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{error, info};

/// Handle to the result of a task submitted with [`PropagatingPool::submit`].
///
/// The handle can be joined synchronously or awaited.
#[derive(Debug)]
pub struct TaskHandle<R> {
    receiver: oneshot::Receiver<Result<R, TxContextError>>,
}

impl<R> TaskHandle<R> {
    pub(crate) fn new(receiver: oneshot::Receiver<Result<R, TxContextError>>) -> Self {
        Self { receiver }
    }

    /// Blocks until the task finishes and returns its result.
    ///
    /// Do not call this from a pool worker of the same pool or from inside
    /// an async runtime; await the handle there instead.
    ///
    /// # Errors
    ///
    /// Returns `TaskPanicked` if the task panicked, `Cancelled` if it was
    /// dropped before running, or the propagation error that stopped it.
    pub fn join(self) -> Result<R, TxContextError> {
        futures::executor::block_on(self)
    }

    /// Returns the result if the task already finished.
    pub fn try_join(&mut self) -> Option<Result<R, TxContextError>> {
        match self.receiver.try_recv() {
            Ok(outcome) => outcome,
            Err(oneshot::Canceled) => Some(Err(TxContextError::Cancelled)),
        }
    }
}

impl<R> Future for TaskHandle<R> {
    type Output = Result<R, TxContextError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TxContextError::Cancelled)))
    }
}

/// Runs a task, turning a panic into `TaskPanicked`.
fn run_caught<F, R>(task: Propagated<F>) -> Result<R, TxContextError>
where
    F: FnOnce() -> R,
{
    panic::catch_unwind(AssertUnwindSafe(|| task.run()))
        .unwrap_or_else(|payload| Err(TxContextError::from_panic(&*payload)))
}

/// Where a panic in a fire-and-forget task goes when no failure handler is
/// installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnhandledPanic {
    /// Keep unwinding into the pool's own panic handler.
    Resume,
    /// Log it here; the pool running the task may abort on panics.
    Log,
}

/// Runs a fire-and-forget task.
///
/// Failures go to the installed failure handler. Without one, propagation
/// failures are logged and panics are handled as `unhandled` says.
fn run_detached<F>(call: &str, task: Propagated<F>, unhandled: UnhandledPanic)
where
    F: FnOnce(),
{
    let args = [serde_json::json!(task.snapshot().identifier())];
    match panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            if !hooks::notify(call, &args, &err) {
                error!(call = %call, error = %err, "Fire-and-forget task failed");
            }
        }
        Err(payload) => {
            let err = TxContextError::from_panic(&*payload);
            if hooks::notify(call, &args, &err) {
                return;
            }
            match unhandled {
                UnhandledPanic::Resume => panic::resume_unwind(payload),
                UnhandledPanic::Log => {
                    error!(call = %call, error = %err, "Unhandled panic in spawned task");
                }
            }
        }
    }
}

/// A thread pool whose every task runs in the submitter's context.
///
/// Each submission captures the calling thread's context. The worker that
/// picks the task up installs it, runs the body, and is cleared afterwards,
/// whether the body returned or panicked.
pub struct PropagatingPool {
    pool: rayon::ThreadPool,
    config: PoolConfig,
}

impl PropagatingPool {
    /// Builds a pool from `config`.
    ///
    /// # Errors
    ///
    /// Returns `TxContextError::Pool` if the worker threads cannot be started.
    pub fn new(config: PoolConfig) -> Result<Self, TxContextError> {
        let prefix = config.thread_name_prefix.clone();
        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(move |index| format!("{prefix}-{index}"))
            .panic_handler(|payload| {
                error!(panic = %panic_message(&*payload), "Unhandled panic in pool task");
            });
        if config.num_threads > 0 {
            builder = builder.num_threads(config.num_threads);
        }
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let pool = builder
            .build()
            .map_err(|e| TxContextError::Pool(e.to_string()))?;
        info!(
            threads = pool.current_num_threads(),
            prefix = %config.thread_name_prefix,
            "Started propagating pool"
        );
        Ok(Self { pool, config })
    }

    /// Builds a pool with default settings.
    ///
    /// # Errors
    ///
    /// Returns `TxContextError::Pool` if the worker threads cannot be started.
    pub fn with_defaults() -> Result<Self, TxContextError> {
        Self::new(PoolConfig::default())
    }

    /// Returns the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Returns the number of worker threads.
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `task` on the pool without waiting for it.
    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let task = Propagated::capture(task);
        self.pool
            .spawn(move || run_detached("execute", task, UnhandledPanic::Resume));
    }

    /// Runs `task` on the pool and returns a handle to its result.
    pub fn submit<F, R>(&self, task: F) -> TaskHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let task = Propagated::capture(task);
        let (sender, receiver) = oneshot::channel();
        self.pool.spawn(move || {
            let _ = sender.send(run_caught(task));
        });
        TaskHandle::new(receiver)
    }

    /// Runs `task` on the pool and blocks until it returns.
    ///
    /// A panic in `task` resumes on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns a propagation error if the context could not be installed or
    /// cleared and no failure handler is installed.
    pub fn invoke<F, R>(&self, task: F) -> Result<R, TxContextError>
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        let task = Propagated::capture(task);
        self.pool.install(move || task.run())
    }

    /// Runs every task on the pool and waits for all of them.
    ///
    /// Results are returned in submission order. A panicking task yields
    /// `TaskPanicked` without affecting the others.
    pub fn invoke_all<I, F, R>(&self, tasks: I) -> Vec<Result<R, TxContextError>>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> R + Send,
        R: Send,
    {
        let tasks: Vec<Propagated<F>> = tasks.into_iter().map(Propagated::capture).collect();
        self.pool
            .install(move || tasks.into_par_iter().map(run_caught).collect())
    }

    /// Runs `a` and `b` in parallel on the pool, fork/join style.
    ///
    /// Both branches see the caller's context. Either branch may itself call
    /// [`join`] to fork further.
    ///
    /// # Errors
    ///
    /// Returns the first propagation error of the two branches.
    pub fn join<A, B, RA, RB>(&self, a: A, b: B) -> Result<(RA, RB), TxContextError>
    where
        A: FnOnce() -> RA + Send,
        B: FnOnce() -> RB + Send,
        RA: Send,
        RB: Send,
    {
        let a = Propagated::capture(a);
        let b = Propagated::capture(b);
        let (ra, rb) = self.pool.install(move || rayon::join(move || a.run(), move || b.run()));
        Ok((ra?, rb?))
    }

    /// Runs `probe` once on every worker, outside of any propagation.
    #[cfg(test)]
    pub(crate) fn inspect_workers<R, P>(&self, probe: P) -> Vec<R>
    where
        P: Fn() -> R + Sync,
        R: Send,
    {
        self.pool.broadcast(|_| probe())
    }
}

impl std::fmt::Debug for PropagatingPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropagatingPool")
            .field("num_threads", &self.num_threads())
            .field("config", &self.config)
            .finish()
    }
}

/// Forks `a` and `b` from inside a running task, fork/join style.
///
/// Both branches capture the context installed on the calling thread right
/// now, including any mutations the caller made. Runs on the current rayon
/// pool, or the global pool outside of one.
///
/// # Errors
///
/// Returns the first propagation error of the two branches.
pub fn join<A, B, RA, RB>(a: A, b: B) -> Result<(RA, RB), TxContextError>
where
    A: FnOnce() -> RA + Send,
    B: FnOnce() -> RB + Send,
    RA: Send,
    RB: Send,
{
    let a = Propagated::capture(a);
    let b = Propagated::capture(b);
    let (ra, rb) = rayon::join(move || a.run(), move || b.run());
    Ok((ra?, rb?))
}

/// Spawns a fire-and-forget child task in the current context.
///
/// Runs on the current rayon pool, or the global pool outside of one. The
/// pool may not have a panic handler, so with no failure handler installed a
/// panic in `task` is logged rather than rethrown.
pub fn spawn<F>(task: F)
where
    F: FnOnce() + Send + 'static,
{
    let task = Propagated::capture(task);
    rayon::spawn(move || run_detached("spawn", task, UnhandledPanic::Log));
}
