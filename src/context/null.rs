//! The no-context adapter.

use super::ContextAdapter;
use super::ContextHandle;
use crate::error::{ContextError, Panic, RunError};
use crate::types::ContextKind;
use crate::work::ErasedWork;
use futures_lite::FutureExt;
use futures_lite::future::block_on;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, OnceLock};

/// Runs work in place on the calling thread.
///
/// Nothing is allocated and nothing is handed off: sync work is a plain call,
/// async work is driven on the caller with `block_on`. There is no context to
/// spawn onto, so `spawn_local` inside a null-context body fails with
/// [`ContextError::NoCurrentContext`] unless an outer context is current.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAdapter;

impl NullAdapter {
    /// The process-wide instance.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<NullAdapter>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(Self)))
    }

    /// Blocks the calling thread directly on `operation`.
    ///
    /// This is the null context's only stand-in for draining: it has no queue
    /// of its own to pump. [`ContextAdapter::drain_until`] still reports
    /// [`ContextError::DrainUnsupported`].
    pub fn wait<F: Future>(&self, operation: F) -> F::Output {
        block_on(operation)
    }
}

impl ContextAdapter for NullAdapter {
    fn kind(&self) -> ContextKind {
        ContextKind::None
    }

    fn name(&self) -> &str {
        "null"
    }

    fn supports_drain(&self) -> bool {
        false
    }

    fn create_context(&self) -> Result<Option<ContextHandle>, ContextError> {
        Ok(None)
    }

    fn dispatch(&self, work: ErasedWork) -> Result<(), RunError> {
        let outcome = match work {
            ErasedWork::Sync(job) => catch_unwind(AssertUnwindSafe(job)),
            ErasedWork::Future(build) => catch_unwind(AssertUnwindSafe(build))
                .and_then(|future| block_on(AssertUnwindSafe(future).catch_unwind())),
        };
        outcome.map_err(|payload| RunError::Panicked(Panic::new(payload)))
    }
}
