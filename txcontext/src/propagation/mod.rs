//! Moving transaction contexts across threads.
//!
//! Every adapter follows the same cycle for one task: the submitting thread's
//! context is captured when the task is wrapped, installed on the executing
//! thread right before the body runs, and cleared once it returns or panics.
//!
//! This module provides:
//! - [`Propagated`], the wrapper binding a closure to a captured context
//! - [`PropagatedFuture`], its async counterpart, installed per poll
//! - [`PropagatingPool`], a rayon pool whose every task propagates
//! - [`runtime`] entry points for tokio

mod adapter;
mod future;
mod pool;
pub mod runtime;

pub use adapter::{install, wrap, InstalledContext, Propagated};
pub use future::{PropagatedFuture, WithTransactionContext};
pub use pool::{join, spawn, PropagatingPool, TaskHandle};
