//! # txcontext
//!
//! Transaction context propagation across worker pools, fork/join tasks and
//! async runtimes.
//!
//! Every thread owns a transaction context: a correlation identifier plus a
//! tagged metadata bag. When work is handed to another thread, the context of
//! the submitting thread is captured, installed on the executing thread for
//! the duration of the task, and cleared afterwards so pooled threads never
//! leak one transaction into the next.
//!
//! txcontext provides:
//!
//! - **Context store**: thread-confined identifier, metadata and tag index
//! - **Reserved namespace**: keys under `$` are rejected on read and write
//! - **Propagation**: closures, futures, rayon pools and tokio tasks
//! - **Failure hook**: a process-wide handler for failures on intercepted paths
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use txcontext::prelude::*;
//!
//! # fn main() -> Result<(), TxContextError> {
//! let id = context::create();
//! context::put_metadata("tenant", "acme")?;
//!
//! let pool = PropagatingPool::new(PoolConfig::new().with_num_threads(4))?;
//! let seen = pool.submit(context::get).join()?;
//! assert_eq!(seen, id);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod api;
pub mod config;
pub mod context;
pub mod errors;
pub mod hooks;
pub mod observability;
pub mod propagation;
pub mod protocol;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{LoggingConfig, PoolConfig};
    pub use crate::context::{self, ContextSnapshot, UNINITIALIZED_TRANSACTION_CONTEXT};
    pub use crate::errors::{
        PropagationFailure, PropagationPhase, ReservedKeyViolation, TxContextError,
    };
    pub use crate::hooks::{
        CollectingFailureHandler, LoggingFailureHandler, UncaughtFailureHandler,
    };
    pub use crate::observability::init_logging;
    pub use crate::propagation::{
        Propagated, PropagatedFuture, PropagatingPool, TaskHandle, WithTransactionContext,
    };
    pub use crate::protocol::{HeaderMap, ProtocolEvent, HEADER_TAG};
}
