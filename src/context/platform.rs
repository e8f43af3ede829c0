//! Platform adapters over a native main loop.

use super::message_loop::MessageLoop;
use super::native::{NativeContext, NativeLoop};
use super::{ContextAdapter, ContextHandle, task};
use crate::config::LoopConfig;
use crate::error::{ContextError, RunError};
use crate::types::ContextKind;
use crate::work::{BoxOperation, ErasedWork};
use std::sync::Arc;

/// Runs work on the process's native main loop for one UI affinity.
///
/// Most UI affinities are process singletons, so
/// [`create_context`](ContextAdapter::create_context) returns the same thin
/// handle every time rather than allocating anything.
pub struct PlatformAdapter<L: NativeLoop> {
    kind: ContextKind,
    native: Arc<L>,
    context: ContextHandle,
}

impl<L: NativeLoop> PlatformAdapter<L> {
    /// Binds `native` to `kind`.
    pub fn new(kind: ContextKind, native: Arc<L>) -> Self {
        let context = ContextHandle::new(Arc::new(NativeContext::new(kind, Arc::clone(&native))));
        Self {
            kind,
            native,
            context,
        }
    }

    /// The driven native loop.
    pub fn native(&self) -> &Arc<L> {
        &self.native
    }

    /// Handle to the native loop's context.
    pub fn context(&self) -> &ContextHandle {
        &self.context
    }
}

impl PlatformAdapter<MessageLoop> {
    /// A platform adapter backed by a dedicated affine thread, for
    /// message-pump style affinities and for tests.
    pub fn dedicated(kind: ContextKind, config: &LoopConfig) -> Result<Self, ContextError> {
        let owner = MessageLoop::spawn(config)?;
        let native = Arc::clone(owner.message_loop());
        Ok(Self {
            kind,
            native,
            context: owner.into_handle(kind),
        })
    }
}

impl<L: NativeLoop> ContextAdapter for PlatformAdapter<L> {
    fn kind(&self) -> ContextKind {
        self.kind
    }

    fn name(&self) -> &str {
        self.native.name()
    }

    fn supports_drain(&self) -> bool {
        !self.native.is_loop_thread() || self.native.can_pump()
    }

    fn create_context(&self) -> Result<Option<ContextHandle>, ContextError> {
        Ok(Some(self.context.clone()))
    }

    fn drain_until(&self, operation: BoxOperation) -> Result<(), ContextError> {
        if !self.supports_drain() {
            return Err(ContextError::DrainUnsupported { kind: self.kind });
        }
        match self.dispatch(ErasedWork::from_operation(operation)) {
            Ok(()) => Ok(()),
            Err(RunError::Context(err)) => Err(err),
            Err(RunError::Panicked(panic)) => panic.resume(),
        }
    }

    fn drain_pending(&self) -> Result<(), ContextError> {
        if !self.supports_drain() {
            return Err(ContextError::DrainUnsupported { kind: self.kind });
        }
        self.drain_until(task::barrier(&self.context)?)
    }

    fn dispatch(&self, work: ErasedWork) -> Result<(), RunError> {
        task::dispatch(&self.context, work)
    }
}

impl<L: NativeLoop> std::fmt::Debug for PlatformAdapter<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformAdapter")
            .field("kind", &self.kind)
            .field("native", &self.native.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextAdapterExt;
    use crate::work::{Job, operation};
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::thread::{self, ThreadId};

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    /// A native loop that cannot pump re-entrantly.
    struct ChannelLoop {
        sender: Mutex<mpsc::Sender<Job>>,
        thread: ThreadId,
    }

    impl ChannelLoop {
        fn start() -> Arc<Self> {
            let (sender, receiver) = mpsc::channel::<Job>();
            let worker = thread::Builder::new()
                .name("channel-loop".into())
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                })
                .unwrap();
            Arc::new(Self {
                sender: Mutex::new(sender),
                thread: worker.thread().id(),
            })
        }
    }

    impl NativeLoop for ChannelLoop {
        fn name(&self) -> &str {
            "channel-loop"
        }

        fn invoke(&self, job: Job) -> Result<(), ContextError> {
            self.sender
                .lock()
                .send(job)
                .map_err(|_| ContextError::ContextClosed {
                    context: "channel-loop".into(),
                })
        }

        fn is_loop_thread(&self) -> bool {
            thread::current().id() == self.thread
        }
    }

    #[test]
    fn dedicated_runs_on_its_thread() {
        init_test("dedicated_runs_on_its_thread");
        let config = LoopConfig::named("win32-pump");
        let adapter = PlatformAdapter::dedicated(ContextKind::Win32, &config).unwrap();
        let name = adapter
            .run(|| thread::current().name().map(str::to_owned))
            .unwrap();
        assert_eq!(name.as_deref(), Some("win32-pump"));
        assert_eq!(adapter.kind(), ContextKind::Win32);
        crate::test_complete!("dedicated_runs_on_its_thread");
    }

    #[test]
    fn create_context_returns_same_wrapper() {
        init_test("create_context_returns_same_wrapper");
        let config = LoopConfig::named("gtk-main");
        let adapter = PlatformAdapter::dedicated(ContextKind::Gtk, &config).unwrap();
        let a = adapter.create_context().unwrap().unwrap();
        let b = adapter.create_context().unwrap().unwrap();
        assert!(a.same_context(&b));
        assert_eq!(a.kind(), ContextKind::Gtk);
        crate::test_complete!("create_context_returns_same_wrapper");
    }

    #[test]
    fn drain_until_off_loop_thread_settles() {
        init_test("drain_until_off_loop_thread_settles");
        let config = LoopConfig::named("gtk-drain");
        let adapter = PlatformAdapter::dedicated(ContextKind::Gtk, &config).unwrap();
        assert!(!adapter.native().is_loop_thread());
        assert!(adapter.supports_drain());

        let (source, op) = operation::<u8>();
        let completed = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&completed);
        let worker = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(20));
            source.complete(3);
        });
        adapter
            .drain_until(Box::pin(async move {
                let value = op.await;
                let name = thread::current().name().map(str::to_owned);
                *seen.lock() = value.map(|v| (v, name));
            }))
            .unwrap();
        worker.join().unwrap();
        assert_eq!(*completed.lock(), Some((3, Some("gtk-drain".to_owned()))));

        let ran = Arc::new(Mutex::new(0_u32));
        for _ in 0..4 {
            let ran = Arc::clone(&ran);
            adapter.context().post(move || *ran.lock() += 1).unwrap();
        }
        adapter.drain_pending().unwrap();
        assert_eq!(*ran.lock(), 4);
        crate::test_complete!("drain_until_off_loop_thread_settles");
    }

    #[test]
    fn custom_native_loop_runs_sync_and_async() {
        init_test("custom_native_loop_runs_sync_and_async");
        let adapter = PlatformAdapter::new(ContextKind::Cocoa, ChannelLoop::start());
        assert!(adapter.supports_drain());
        let on_loop = adapter
            .run(|| thread::current().name().map(str::to_owned))
            .unwrap();
        assert_eq!(on_loop.as_deref(), Some("channel-loop"));

        let value = adapter
            .run_async(|| async {
                crate::work::yield_now().await;
                "settled"
            })
            .unwrap();
        assert_eq!(value, "settled");
        crate::test_complete!("custom_native_loop_runs_sync_and_async");
    }

    #[test]
    fn non_pumping_loop_rejects_reentrant_async_wait() {
        init_test("non_pumping_loop_rejects_reentrant_async_wait");
        let adapter = Arc::new(PlatformAdapter::new(ContextKind::Cocoa, ChannelLoop::start()));
        let inner = Arc::clone(&adapter);
        let (drain_supported, nested) = adapter
            .run(move || {
                let supported = inner.supports_drain();
                let nested = inner.run_async(|| async { 1 });
                (supported, nested)
            })
            .unwrap();
        assert!(!drain_supported);
        assert!(matches!(nested, Err(ContextError::ReentrantWait { .. })));

        let (source, op) = operation::<()>();
        source.complete(());
        let inner = Arc::clone(&adapter);
        let drained = adapter.run(move || inner.drain_until(op.settled())).unwrap();
        assert_eq!(
            drained,
            Err(ContextError::DrainUnsupported {
                kind: ContextKind::Cocoa
            })
        );

        let inner = Arc::clone(&adapter);
        let pending = adapter.run(move || inner.drain_pending()).unwrap();
        assert_eq!(
            pending,
            Err(ContextError::DrainUnsupported {
                kind: ContextKind::Cocoa
            })
        );
        crate::test_complete!("non_pumping_loop_rejects_reentrant_async_wait");
    }
}
