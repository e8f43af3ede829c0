//! Work scopes and the per-thread task table.
//!
//! Every dispatch opens a [`WorkScope`]. The root work item and every task
//! spawned or job posted while a member of the scope is running hold a
//! [`Membership`]; the dispatching caller is released once the outstanding
//! count drops to zero. A task or job that is dropped without finishing (its
//! context shut down) marks the scope abandoned instead of leaving the caller
//! parked.
//!
//! Futures live in a thread-local slab on the context thread and are only
//! polled there. A waker may fire from any thread: it posts a poll message
//! back to the owning context.

use super::{ContextHandle, enter};
use crate::error::{ContextError, Panic, RunError};
use crate::tracing_compat::{debug, error, trace};
use crate::work::{BoxOperation, ErasedWork, LocalBoxFuture};
use parking_lot::{Condvar, Mutex};
use slab::Slab;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Wake, Waker};

#[derive(Debug, Default)]
struct ScopeState {
    outstanding: usize,
    panic: Option<Panic>,
    abandoned: bool,
}

enum Leave {
    Finished(Result<(), Panic>),
    Abandoned,
}

/// Tracks everything one dispatch started.
#[derive(Debug)]
pub(crate) struct WorkScope {
    context: String,
    detached: bool,
    state: Mutex<ScopeState>,
    settled: Condvar,
}

impl WorkScope {
    pub(crate) fn new(context: &str) -> Arc<Self> {
        Self::with_mode(context, false)
    }

    fn detached(context: &str) -> Arc<Self> {
        Self::with_mode(context, true)
    }

    fn with_mode(context: &str, detached: bool) -> Arc<Self> {
        Arc::new(Self {
            context: context.to_owned(),
            detached,
            state: Mutex::new(ScopeState::default()),
            settled: Condvar::new(),
        })
    }

    pub(crate) fn enlist(self: &Arc<Self>) -> Membership {
        self.state.lock().outstanding += 1;
        Membership {
            scope: Arc::clone(self),
            finished: false,
        }
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.state.lock().outstanding == 0
    }

    /// Parks the calling thread until every member has left.
    pub(crate) fn wait(&self) {
        let mut state = self.state.lock();
        while state.outstanding > 0 {
            self.settled.wait(&mut state);
        }
    }

    fn leave(&self, leave: Leave) {
        let unobserved = {
            let mut state = self.state.lock();
            state.outstanding = state.outstanding.saturating_sub(1);
            match leave {
                Leave::Finished(Ok(())) => None,
                Leave::Finished(Err(panic)) if self.detached || state.panic.is_some() => {
                    Some(panic)
                }
                Leave::Finished(Err(panic)) => {
                    state.panic = Some(panic);
                    None
                }
                Leave::Abandoned => {
                    state.abandoned = true;
                    None
                }
            }
        };
        self.settled.notify_all();
        if let Some(panic) = unobserved {
            error!(
                context = %self.context,
                panic = %panic,
                "task panic not reported to any caller"
            );
        }
    }

    /// Outcome once settled: the first panic wins over abandonment.
    pub(crate) fn result(&self) -> Result<(), RunError> {
        let mut state = self.state.lock();
        if let Some(panic) = state.panic.take() {
            return Err(RunError::Panicked(panic));
        }
        if state.abandoned {
            return Err(RunError::Context(ContextError::WorkAbandoned {
                context: self.context.clone(),
            }));
        }
        Ok(())
    }
}

/// One outstanding unit of a [`WorkScope`].
#[derive(Debug)]
pub(crate) struct Membership {
    scope: Arc<WorkScope>,
    finished: bool,
}

impl Membership {
    pub(crate) fn finish(mut self, result: Result<(), Panic>) {
        self.finished = true;
        self.scope.leave(Leave::Finished(result));
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        if !self.finished {
            self.scope.leave(Leave::Abandoned);
        }
    }
}

struct TaskSlot {
    generation: u64,
    future: Option<LocalBoxFuture<()>>,
    membership: Option<Membership>,
    scope: Arc<WorkScope>,
    waker: Waker,
    woken_while_polling: bool,
}

struct TaskWaker {
    context: ContextHandle,
    key: usize,
    generation: u64,
    scheduled: AtomicBool,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let waker = Arc::clone(self);
        let posted = self.context.post_detached(move || {
            waker.scheduled.store(false, Ordering::Release);
            poll_task(waker.key, waker.generation);
        });
        if let Err(err) = posted {
            self.scheduled.store(false, Ordering::Release);
            trace!(error = %err, key = self.key, "wake after context shutdown ignored");
        }
    }
}

thread_local! {
    static TASKS: RefCell<Slab<TaskSlot>> = RefCell::new(Slab::new());
    static NEXT_GENERATION: Cell<u64> = const { Cell::new(0) };
    static CURRENT_SCOPE: RefCell<Option<Arc<WorkScope>>> = const { RefCell::new(None) };
}

struct ScopeRestore(Option<Arc<WorkScope>>);

impl Drop for ScopeRestore {
    fn drop(&mut self) {
        let previous = self.0.take();
        CURRENT_SCOPE.with(|current| *current.borrow_mut() = previous);
    }
}

fn with_scope<R>(scope: &Arc<WorkScope>, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT_SCOPE.with(|current| current.borrow_mut().replace(Arc::clone(scope)));
    let _restore = ScopeRestore(previous);
    f()
}

pub(crate) fn current_scope() -> Option<Arc<WorkScope>> {
    CURRENT_SCOPE.with(|current| current.borrow().clone())
}

fn next_generation() -> u64 {
    NEXT_GENERATION.with(|next| {
        let generation = next.get();
        next.set(generation.wrapping_add(1));
        generation
    })
}

fn spawn_in(context: &ContextHandle, scope: &Arc<WorkScope>, future: LocalBoxFuture<()>) {
    let membership = scope.enlist();
    let waker = TASKS.with(|tasks| {
        let mut tasks = tasks.borrow_mut();
        let entry = tasks.vacant_entry();
        let key = entry.key();
        let generation = next_generation();
        let waker = Waker::from(Arc::new(TaskWaker {
            context: context.borrowed(),
            key,
            generation,
            scheduled: AtomicBool::new(false),
        }));
        entry.insert(TaskSlot {
            generation,
            future: Some(future),
            membership: Some(membership),
            scope: Arc::clone(scope),
            waker: waker.clone(),
            woken_while_polling: false,
        });
        waker
    });
    waker.wake();
}

type PollTarget = (LocalBoxFuture<()>, Waker, Arc<WorkScope>);

fn take_for_poll(key: usize, generation: u64) -> Option<PollTarget> {
    TASKS.with(|tasks| {
        let mut tasks = tasks.borrow_mut();
        let slot = tasks.get_mut(key)?;
        if slot.generation != generation {
            return None;
        }
        if let Some(future) = slot.future.take() {
            Some((future, slot.waker.clone(), Arc::clone(&slot.scope)))
        } else {
            // Already being polled further up this thread's stack (nested
            // pump); poll again once that returns.
            slot.woken_while_polling = true;
            None
        }
    })
}

fn poll_task(key: usize, generation: u64) {
    let Some((mut future, waker, scope)) = take_for_poll(key, generation) else {
        return;
    };
    let mut cx = Context::from_waker(&waker);
    let polled = with_scope(&scope, || {
        catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)))
    });

    match polled {
        Ok(Poll::Pending) => {
            let (stale, repoll) = TASKS.with(|tasks| {
                let mut tasks = tasks.borrow_mut();
                match tasks.get_mut(key) {
                    Some(slot) if slot.generation == generation => {
                        slot.future = Some(future);
                        (None, std::mem::take(&mut slot.woken_while_polling))
                    }
                    _ => (Some(future), false),
                }
            });
            drop(stale);
            if repoll {
                waker.wake();
            }
        }
        Ok(Poll::Ready(())) => {
            drop(future);
            complete_task(key, generation, Ok(()));
        }
        Err(payload) => {
            let _ = catch_unwind(AssertUnwindSafe(move || drop(future)));
            complete_task(key, generation, Err(Panic::new(payload)));
        }
    }
}

fn complete_task(key: usize, generation: u64, result: Result<(), Panic>) {
    let slot = TASKS.with(|tasks| {
        let mut tasks = tasks.borrow_mut();
        match tasks.get(key) {
            Some(slot) if slot.generation == generation => Some(tasks.remove(key)),
            _ => None,
        }
    });
    if let Some(mut slot) = slot
        && let Some(membership) = slot.membership.take()
    {
        membership.finish(result);
    }
}

/// Drops every task still parked on this thread, releasing their scopes as
/// abandoned. Called by a loop thread on its way out.
pub(crate) fn abandon_all() {
    let slots: Vec<TaskSlot> = TASKS.with(|tasks| tasks.borrow_mut().drain().collect());
    let count = slots.len();
    drop(slots);
    if count > 0 {
        debug!(count, "abandoned unfinished tasks");
    }
}

/// Posts `f` to `context` as a member of `scope`.
///
/// If the context refuses the job the membership is released cleanly; the
/// caller sees the error instead of an abandoned scope.
pub(crate) fn post_in_scope<F>(
    context: &ContextHandle,
    scope: &Arc<WorkScope>,
    f: F,
) -> Result<(), ContextError>
where
    F: FnOnce() + Send + 'static,
{
    let slot = Arc::new(Mutex::new(Some(scope.enlist())));
    let held = Arc::clone(&slot);
    let job_scope = Arc::clone(scope);
    let posted = context.post_detached(move || {
        let result = with_scope(&job_scope, || catch_unwind(AssertUnwindSafe(f)));
        if let Some(membership) = held.lock().take() {
            membership.finish(result.map_err(Panic::new));
        }
    });
    if posted.is_err()
        && let Some(membership) = slot.lock().take()
    {
        membership.finish(Ok(()));
    }
    posted
}

/// An operation that settles once every job queued on `context` ahead of it
/// has run.
pub(crate) fn barrier(context: &ContextHandle) -> Result<BoxOperation, ContextError> {
    let (source, op) = crate::work::operation::<()>();
    context.post_detached(move || source.complete(()))?;
    Ok(op.settled())
}

/// Starts `future` on the current context.
///
/// When called from work running under a dispatch, the task joins that
/// dispatch: the blocked caller is released only after this task finishes,
/// and a panic in it is re-raised to that caller. Otherwise the task is
/// detached and its panic is logged.
///
/// Fails with [`ContextError::NoCurrentContext`] off any context thread.
pub fn spawn_local<F>(future: F) -> Result<(), ContextError>
where
    F: Future<Output = ()> + 'static,
{
    let context = ContextHandle::current().ok_or(ContextError::NoCurrentContext)?;
    let scope = current_scope().unwrap_or_else(|| WorkScope::detached(context.name()));
    spawn_in(&context, &scope, Box::pin(future));
    Ok(())
}

/// Runs `work` on `context` and blocks until its scope settles.
///
/// Off the context thread the root item is posted and the caller parks. On
/// the context thread the root item runs inline and the context is pumped
/// re-entrantly until the scope settles.
pub(crate) fn dispatch(context: &ContextHandle, work: ErasedWork) -> Result<(), RunError> {
    let on_context = context.is_current();
    if on_context && matches!(work, ErasedWork::Future(_)) && !context.can_pump() {
        return Err(RunError::Context(ContextError::ReentrantWait {
            context: context.name().to_owned(),
        }));
    }

    let scope = WorkScope::new(context.name());
    let membership = scope.enlist();
    let root_scope = Arc::clone(&scope);
    let target = context.borrowed();
    let root = move || {
        let result = with_scope(&root_scope, || {
            catch_unwind(AssertUnwindSafe(|| match work {
                ErasedWork::Sync(job) => job(),
                ErasedWork::Future(build) => spawn_in(&target, &root_scope, build()),
            }))
        });
        membership.finish(result.map_err(Panic::new));
    };

    trace!(context = %context.name(), inline = on_context, "dispatching work");
    if on_context {
        enter(context, root);
        if !scope.is_settled() {
            context.pump_until(&|| scope.is_settled())?;
        }
    } else {
        context.post_detached(root)?;
        scope.wait();
    }
    scope.result()
}
