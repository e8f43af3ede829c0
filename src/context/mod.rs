//! Execution contexts and the adapter contract.
//!
//! A [`SyncContext`] is a place work can be posted to: a dedicated message
//! loop thread, a native UI main loop, or anything else with a single owning
//! thread. A [`ContextHandle`] is the cloneable reference the rest of the
//! crate passes around.
//!
//! A [`ContextAdapter`] binds one [`ContextKind`] to a context and knows how
//! to run a work unit there while blocking the caller. [`ContextAdapterExt`]
//! layers the typed `run` family on top of the object-safe core.
//!
//! # Variants
//!
//! - [`NullAdapter`]: no context; work runs in place on the caller
//! - [`PortableAdapter`]: a [`MessageLoop`] thread owned by the adapter
//! - [`PlatformAdapter`]: any [`NativeLoop`] standing for a native main loop

pub mod message_loop;
pub mod native;
pub mod null;
pub mod platform;
pub mod portable;
pub(crate) mod task;

pub use message_loop::{LoopThread, MessageLoop};
pub use native::{NativeContext, NativeLoop};
pub use null::NullAdapter;
pub use platform::PlatformAdapter;
pub use portable::PortableAdapter;
pub use task::spawn_local;

use crate::error::{ContextError, RunError};
use crate::types::ContextKind;
use crate::work::{BoxOperation, ErasedWork, Job, WorkUnit};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// A single-threaded place that runs posted jobs in order.
pub trait SyncContext: Send + Sync + 'static {
    /// Human-readable name (usually the thread name).
    fn name(&self) -> &str;

    /// Kind this context serves.
    fn kind(&self) -> ContextKind;

    /// Enqueues `job`; it runs later on the context thread.
    fn post(&self, job: Job) -> Result<(), ContextError>;

    /// Returns `true` when called on the context thread.
    fn is_current(&self) -> bool;

    /// Returns `true` if [`pump_until`](Self::pump_until) can service queued
    /// jobs re-entrantly from the context thread.
    fn can_pump(&self) -> bool {
        false
    }

    /// Services queued jobs on the context thread until `done` holds.
    fn pump_until(&self, done: &dyn Fn() -> bool) -> Result<(), ContextError> {
        if done() {
            return Ok(());
        }
        Err(ContextError::ReentrantWait {
            context: self.name().to_owned(),
        })
    }
}

/// Cloneable reference to a [`SyncContext`].
///
/// A handle made by `create_context` may own the underlying thread; the
/// thread shuts down when the last owning handle is dropped. Handles observed
/// through [`ContextHandle::current`] never own it.
#[derive(Clone)]
pub struct ContextHandle {
    context: Arc<dyn SyncContext>,
    keep_alive: Option<Arc<dyn Any + Send + Sync>>,
}

impl ContextHandle {
    /// Wraps a context without taking ownership of its thread.
    #[must_use]
    pub fn new(context: Arc<dyn SyncContext>) -> Self {
        Self {
            context,
            keep_alive: None,
        }
    }

    /// Wraps a context and keeps `owner` alive for as long as any clone of
    /// this handle exists.
    #[must_use]
    pub fn owning(context: Arc<dyn SyncContext>, owner: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            context,
            keep_alive: Some(owner),
        }
    }

    /// A clone that does not keep the context thread alive.
    #[must_use]
    pub fn borrowed(&self) -> Self {
        Self::new(Arc::clone(&self.context))
    }

    /// Returns `true` if this handle keeps its context thread alive.
    #[must_use]
    pub fn is_owning(&self) -> bool {
        self.keep_alive.is_some()
    }

    /// Context name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.context.name()
    }

    /// Context kind.
    #[must_use]
    pub fn kind(&self) -> ContextKind {
        self.context.kind()
    }

    /// Returns `true` when called on the context thread.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.context.is_current()
    }

    /// Returns `true` if both handles refer to the same context.
    #[must_use]
    pub fn same_context(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.context), Arc::as_ptr(&other.context))
    }

    /// The context whose thread is executing the caller, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Enqueues `f` without waiting. It runs with this context current.
    ///
    /// Posted from work running under a dispatch, `f` joins that dispatch:
    /// the blocked caller is released only after `f` has run, and a panic in
    /// `f` is re-raised to that caller.
    pub fn post<F>(&self, f: F) -> Result<(), ContextError>
    where
        F: FnOnce() + Send + 'static,
    {
        match task::current_scope() {
            Some(scope) => task::post_in_scope(self, &scope, f),
            None => self.post_detached(f),
        }
    }

    /// Enqueues `f` outside any dispatch.
    pub(crate) fn post_detached<F>(&self, f: F) -> Result<(), ContextError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = self.borrowed();
        self.context.post(Box::new(move || enter(&handle, f)))
    }

    /// Runs `f` on the context and blocks until it returns.
    ///
    /// From the context's own thread `f` runs inline. A panic in `f` is
    /// resumed on the caller.
    pub fn send<F, R>(&self, f: F) -> Result<R, ContextError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Ok(enter(self, f));
        }
        let (source, op) = crate::work::operation();
        self.post_detached(move || source.complete(catch_unwind(AssertUnwindSafe(f))))?;
        match op.wait() {
            Some(Ok(value)) => Ok(value),
            Some(Err(payload)) => std::panic::resume_unwind(payload),
            None => Err(ContextError::WorkAbandoned {
                context: self.name().to_owned(),
            }),
        }
    }

    /// Starts a task on the context.
    ///
    /// The future is built on the context thread. Started from work running
    /// under a dispatch, the task joins that dispatch like
    /// [`spawn_local`]. Otherwise nobody waits for it and a panic is logged.
    pub fn spawn<F, Fut>(&self, make: F) -> Result<(), ContextError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.post(move || {
            if let Err(err) = spawn_local(make()) {
                crate::tracing_compat::warn!(error = %err, "detached spawn failed");
            }
        })
    }

    pub(crate) fn can_pump(&self) -> bool {
        self.context.can_pump()
    }

    pub(crate) fn pump_until(&self, done: &dyn Fn() -> bool) -> Result<(), ContextError> {
        self.context.pump_until(done)
    }
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextHandle")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("owning", &self.is_owning())
            .finish()
    }
}

thread_local! {
    static CURRENT: RefCell<Option<ContextHandle>> = const { RefCell::new(None) };
}

struct Restore(Option<ContextHandle>);

impl Drop for Restore {
    fn drop(&mut self) {
        let previous = self.0.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

/// Runs `f` with `handle` installed as the current context.
pub(crate) fn enter<R>(handle: &ContextHandle, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT.with(|current| current.borrow_mut().replace(handle.borrowed()));
    let _restore = Restore(previous);
    f()
}

/// Runs work units on one kind of execution context.
///
/// Implementations are process-lifetime values, one per [`ContextKind`], and
/// are never mutated after construction from the caller's point of view.
pub trait ContextAdapter: Send + Sync + 'static {
    /// Kind served by this adapter.
    fn kind(&self) -> ContextKind;

    /// Adapter name for diagnostics.
    fn name(&self) -> &str;

    /// Returns `true` if [`drain_until`](Self::drain_until) is available from
    /// the calling thread.
    fn supports_drain(&self) -> bool;

    /// Allocates a context instance appropriate to this adapter, or `None`
    /// when there is nothing to hand out.
    fn create_context(&self) -> Result<Option<ContextHandle>, ContextError>;

    /// Blocks the caller, servicing this adapter's context, until
    /// `operation` settles.
    ///
    /// Adapters that cannot drain return [`ContextError::DrainUnsupported`].
    fn drain_until(&self, operation: BoxOperation) -> Result<(), ContextError> {
        drop(operation);
        Err(ContextError::DrainUnsupported { kind: self.kind() })
    }

    /// Blocks the caller, servicing this adapter's context, until every job
    /// queued on it before the call has run.
    ///
    /// Adapters that cannot drain return [`ContextError::DrainUnsupported`].
    fn drain_pending(&self) -> Result<(), ContextError> {
        Err(ContextError::DrainUnsupported { kind: self.kind() })
    }

    /// Runs `work` to completion on this adapter's context, blocking the
    /// caller until the work and every task it spawned have settled.
    ///
    /// A panic anywhere in the work is returned as [`RunError::Panicked`].
    fn dispatch(&self, work: ErasedWork) -> Result<(), RunError>;
}

/// Typed entry points over [`ContextAdapter`].
///
/// `try_*` variants hand panics back as values. The plain variants resume a
/// captured panic on the caller with its original payload and only return
/// structural errors.
pub trait ContextAdapterExt: ContextAdapter {
    /// Runs a work unit and returns its value or the captured failure.
    fn try_run_work<T>(&self, work: WorkUnit<T>) -> Result<T, RunError>
    where
        T: Send + 'static,
    {
        let (erased, slot) = work.into_erased();
        self.dispatch(erased)?;
        slot.take().ok_or_else(|| {
            RunError::Context(ContextError::WorkAbandoned {
                context: self.name().to_owned(),
            })
        })
    }

    /// Runs a plain closure on the context.
    fn try_run<T, F>(&self, f: F) -> Result<T, RunError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.try_run_work(WorkUnit::sync(f))
    }

    /// Builds a future on the context and drives it, plus everything it
    /// spawned, to completion.
    fn try_run_async<T, F, Fut>(&self, f: F) -> Result<T, RunError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + 'static,
        T: Send + 'static,
    {
        self.try_run_work(WorkUnit::future(f))
    }

    /// Like [`try_run_work`](Self::try_run_work), resuming panics.
    fn run_work<T>(&self, work: WorkUnit<T>) -> Result<T, ContextError>
    where
        T: Send + 'static,
    {
        match self.try_run_work(work) {
            Ok(value) => Ok(value),
            Err(RunError::Context(err)) => Err(err),
            Err(RunError::Panicked(panic)) => panic.resume(),
        }
    }

    /// Like [`try_run`](Self::try_run), resuming panics.
    fn run<T, F>(&self, f: F) -> Result<T, ContextError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.run_work(WorkUnit::sync(f))
    }

    /// Like [`try_run_async`](Self::try_run_async), resuming panics.
    fn run_async<T, F, Fut>(&self, f: F) -> Result<T, ContextError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + 'static,
        T: Send + 'static,
    {
        self.run_work(WorkUnit::future(f))
    }
}

impl<A: ContextAdapter + ?Sized> ContextAdapterExt for A {}
