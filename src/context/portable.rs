//! The portable adapter: a cooperative message loop that works anywhere.

use super::message_loop::MessageLoop;
use super::{ContextAdapter, ContextHandle, task};
use crate::config::{self, HarnessConfig, LoopConfig};
use crate::error::{ContextError, RunError};
use crate::tracing_compat::debug;
use crate::types::ContextKind;
use crate::work::{BoxOperation, ErasedWork};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Runs work on a dedicated [`MessageLoop`] thread.
///
/// The adapter's own loop is started on first use and lives as long as the
/// adapter. [`create_context`](ContextAdapter::create_context) hands out a
/// fresh, independently owned loop per call.
#[derive(Debug)]
pub struct PortableAdapter {
    loop_config: LoopConfig,
    config: HarnessConfig,
    context: Mutex<Option<ContextHandle>>,
    created: AtomicUsize,
}

impl PortableAdapter {
    /// Creates an adapter whose loop thread is configured by `config`.
    #[must_use]
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            loop_config: config.portable.clone(),
            config: config.clone(),
            context: Mutex::new(None),
            created: AtomicUsize::new(0),
        }
    }

    /// The process-wide instance, configured from the active harness
    /// configuration.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<PortableAdapter>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(Self::new(config::active()))))
    }

    /// The adapter's loop, started on first call.
    pub fn context(&self) -> Result<ContextHandle, ContextError> {
        let mut slot = self.context.lock();
        if let Some(handle) = slot.as_ref() {
            return Ok(handle.clone());
        }
        let handle = MessageLoop::spawn(&self.loop_config)?.into_handle(ContextKind::Portable);
        debug!(context = %handle.name(), "portable context started");
        *slot = Some(handle.clone());
        Ok(handle)
    }

    /// Number of contexts handed out by `create_context` so far.
    #[must_use]
    pub fn created_contexts(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

impl Default for PortableAdapter {
    fn default() -> Self {
        Self::new(&HarnessConfig::default())
    }
}

impl ContextAdapter for PortableAdapter {
    fn kind(&self) -> ContextKind {
        ContextKind::Portable
    }

    fn name(&self) -> &str {
        &self.loop_config.thread_name
    }

    fn supports_drain(&self) -> bool {
        true
    }

    fn create_context(&self) -> Result<Option<ContextHandle>, ContextError> {
        let index = self.created.fetch_add(1, Ordering::Relaxed);
        let handle = MessageLoop::spawn(&self.config.context_loop(index))?
            .into_handle(ContextKind::Portable);
        Ok(Some(handle))
    }

    fn drain_until(&self, operation: BoxOperation) -> Result<(), ContextError> {
        match self.dispatch(ErasedWork::from_operation(operation)) {
            Ok(()) => Ok(()),
            Err(RunError::Context(err)) => Err(err),
            Err(RunError::Panicked(panic)) => panic.resume(),
        }
    }

    fn drain_pending(&self) -> Result<(), ContextError> {
        let context = self.context()?;
        self.drain_until(task::barrier(&context)?)
    }

    fn dispatch(&self, work: ErasedWork) -> Result<(), RunError> {
        let context = self.context()?;
        task::dispatch(&context, work)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextAdapterExt, spawn_local};
    use crate::work::{operation, yield_now};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    fn adapter(thread: &str) -> PortableAdapter {
        PortableAdapter::new(&HarnessConfig {
            portable: LoopConfig::named(thread),
            context_thread_prefix: format!("{thread}-ctx"),
        })
    }

    #[test]
    fn runs_on_loop_thread_not_caller() {
        init_test("runs_on_loop_thread_not_caller");
        let adapter = adapter("portable-affinity");
        let caller = std::thread::current().id();
        let (id, name) = adapter
            .run(|| {
                let current = std::thread::current();
                (current.id(), current.name().map(str::to_owned))
            })
            .unwrap();
        assert_ne!(id, caller);
        assert_eq!(name.as_deref(), Some("portable-affinity"));
        crate::test_complete!("runs_on_loop_thread_not_caller");
    }

    #[test]
    fn run_async_waits_for_delayed_continuation() {
        init_test("run_async_waits_for_delayed_continuation");
        let adapter = adapter("portable-delayed");
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        adapter
            .run_async(move || async move {
                let (source, op) = operation();
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(30));
                    source.complete(());
                });
                op.await;
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();
        assert!(fired.load(Ordering::SeqCst));
        crate::test_complete!("run_async_waits_for_delayed_continuation");
    }

    #[test]
    fn run_async_waits_for_spawned_tasks() {
        init_test("run_async_waits_for_spawned_tasks");
        let adapter = adapter("portable-spawn");
        let done = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&done);
        adapter
            .run_async(move || async move {
                for _ in 0..3 {
                    let counter = Arc::clone(&counter);
                    spawn_local(async move {
                        yield_now().await;
                        yield_now().await;
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
                }
            })
            .unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 3);
        crate::test_complete!("run_async_waits_for_spawned_tasks");
    }

    #[test]
    fn panic_in_spawned_task_reaches_caller() {
        init_test("panic_in_spawned_task_reaches_caller");
        let adapter = adapter("portable-task-panic");
        let err = adapter
            .try_run_async(|| async {
                spawn_local(async {
                    yield_now().await;
                    panic!("late failure");
                })
                .unwrap();
            })
            .unwrap_err();
        assert_eq!(err.into_panic().unwrap().message(), Some("late failure"));
        crate::test_complete!("panic_in_spawned_task_reaches_caller");
    }

    #[test]
    fn panic_in_posted_job_reaches_caller() {
        init_test("panic_in_posted_job_reaches_caller");
        let adapter = adapter("portable-post-panic");
        let err = adapter
            .try_run_async(|| async {
                ContextHandle::current()
                    .unwrap()
                    .post(|| -> () { panic!("posted continuation failed") })
                    .unwrap();
            })
            .unwrap_err();
        assert_eq!(
            err.into_panic().unwrap().message(),
            Some("posted continuation failed")
        );
        crate::test_complete!("panic_in_posted_job_reaches_caller");
    }

    #[test]
    fn run_waits_for_posted_job() {
        init_test("run_waits_for_posted_job");
        let adapter = adapter("portable-post-wait");
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        adapter
            .run(move || {
                ContextHandle::current()
                    .unwrap()
                    .post(move || {
                        std::thread::sleep(Duration::from_millis(30));
                        flag.store(true, Ordering::SeqCst);
                    })
                    .unwrap();
            })
            .unwrap();
        crate::assert_with_log!(
            finished.load(Ordering::SeqCst),
            "posted job finished before run returned",
            true,
            finished.load(Ordering::SeqCst)
        );
        crate::test_complete!("run_waits_for_posted_job");
    }

    #[test]
    fn spawn_from_work_joins_the_run() {
        init_test("spawn_from_work_joins_the_run");
        let adapter = adapter("portable-handle-spawn");
        let err = adapter
            .try_run(|| {
                ContextHandle::current()
                    .unwrap()
                    .spawn(|| async {
                        yield_now().await;
                        panic!("spawned through handle");
                    })
                    .unwrap();
            })
            .unwrap_err();
        assert_eq!(
            err.into_panic().unwrap().message(),
            Some("spawned through handle")
        );
        crate::test_complete!("spawn_from_work_joins_the_run");
    }

    #[test]
    fn drain_pending_runs_everything_queued() {
        init_test("drain_pending_runs_everything_queued");
        let adapter = Arc::new(adapter("portable-drain-pending"));
        let context = adapter.context().unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let ran = Arc::clone(&ran);
            context
                .post(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        adapter.drain_pending().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 5);

        // From the loop thread the queue is pumped re-entrantly.
        let inner = Arc::clone(&adapter);
        let counter = Arc::clone(&ran);
        let seen = adapter
            .run(move || {
                let queued = Arc::clone(&counter);
                ContextHandle::current()
                    .unwrap()
                    .post_detached(move || {
                        queued.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
                inner.drain_pending().unwrap();
                counter.load(Ordering::SeqCst)
            })
            .unwrap();
        assert_eq!(seen, 6);
        crate::test_complete!("drain_pending_runs_everything_queued");
    }

    #[test]
    fn nested_run_on_loop_thread_pumps() {
        init_test("nested_run_on_loop_thread_pumps");
        let adapter = Arc::new(adapter("portable-nested"));
        let inner = Arc::clone(&adapter);
        let value = adapter
            .run(move || {
                inner
                    .run_async(|| async {
                        yield_now().await;
                        21
                    })
                    .unwrap()
                    * 2
            })
            .unwrap();
        assert_eq!(value, 42);
        crate::test_complete!("nested_run_on_loop_thread_pumps");
    }

    #[test]
    fn drain_until_settles_host_operation() {
        init_test("drain_until_settles_host_operation");
        let adapter = adapter("portable-drain");
        assert!(adapter.supports_drain());
        let (source, op) = operation::<u8>();
        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            source.complete(1);
        });
        adapter.drain_until(op.settled()).unwrap();
        worker.join().unwrap();
        crate::test_complete!("drain_until_settles_host_operation");
    }

    #[test]
    fn create_context_hands_out_fresh_loops() {
        init_test("create_context_hands_out_fresh_loops");
        let adapter = adapter("portable-create");
        let first = adapter.create_context().unwrap().unwrap();
        let second = adapter.create_context().unwrap().unwrap();
        assert!(!first.same_context(&second));
        assert_eq!(first.name(), "portable-create-ctx-0");
        assert_eq!(second.name(), "portable-create-ctx-1");
        assert_eq!(first.kind(), ContextKind::Portable);
        assert_eq!(adapter.created_contexts(), 2);

        let main = adapter.context().unwrap();
        assert!(!main.same_context(&first));
        assert!(main.same_context(&adapter.context().unwrap()));
        crate::test_complete!("create_context_hands_out_fresh_loops");
    }

    #[test]
    fn dropping_created_context_abandons_pending_task() {
        init_test("dropping_created_context_abandons_pending_task");
        let adapter = adapter("portable-abandon");
        let handle = adapter.create_context().unwrap().unwrap();
        let (source, op) = operation::<()>();
        let (parked_source, parked) = operation::<()>();
        handle
            .spawn(move || async move {
                parked_source.complete(());
                let _ = op.await;
            })
            .unwrap();
        assert_eq!(parked.wait(), Some(()));
        drop(handle);
        drop(source);
        crate::test_complete!("dropping_created_context_abandons_pending_task");
    }
}
