//! Work units and completion operations.
//!
//! A [`WorkUnit`] is the deferred computation handed to a context: either a
//! plain closure, or a closure that builds a future *on* the context. The
//! builder closure crosses threads, so it must be `Send`; the future it
//! produces is polled only on the context thread and need not be `Send`.
//!
//! An [`Operation`] is a completion token for asynchronous work started
//! elsewhere (e.g. by the host pipeline), suitable for `drain_until`.

pub mod operation;

pub use operation::{Operation, OperationSource, operation};

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// A message posted to a context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A boxed future that is polled on a single thread.
pub type LocalBoxFuture<T> = Pin<Box<dyn Future<Output = T> + 'static>>;

/// A boxed, `Send` future whose completion is all that matters.
pub type BoxOperation = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

type FutureBuilder<T> = Box<dyn FnOnce() -> LocalBoxFuture<T> + Send + 'static>;

/// A deferred computation submitted for execution on a context.
pub enum WorkUnit<T> {
    /// A plain callable producing a value.
    Sync(Box<dyn FnOnce() -> T + Send + 'static>),
    /// A callable producing an asynchronous chain.
    Future(FutureBuilder<T>),
}

impl<T: 'static> WorkUnit<T> {
    /// Wraps a plain callable.
    pub fn sync<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::Sync(Box::new(f))
    }

    /// Wraps a callable that creates a future on the context.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + 'static,
    {
        Self::Future(Box::new(move || Box::pin(f()) as LocalBoxFuture<T>))
    }

    /// Returns `true` for asynchronous work.
    #[must_use]
    pub const fn is_async(&self) -> bool {
        matches!(self, Self::Future(_))
    }

    /// Maps the produced value.
    pub fn map<U, M>(self, map: M) -> WorkUnit<U>
    where
        U: 'static,
        M: FnOnce(T) -> U + Send + 'static,
    {
        match self {
            Self::Sync(f) => WorkUnit::Sync(Box::new(move || map(f()))),
            Self::Future(build) => WorkUnit::Future(Box::new(move || {
                let fut = build();
                Box::pin(async move { map(fut.await) }) as LocalBoxFuture<U>
            })),
        }
    }
}

impl<T: Send + 'static> WorkUnit<T> {
    /// Erases the output type, returning the erased work and the slot the
    /// value lands in once the work completes.
    #[must_use]
    pub fn into_erased(self) -> (ErasedWork, OutputSlot<T>) {
        let slot = OutputSlot::new();
        let sink = slot.clone();
        let erased = match self {
            Self::Sync(f) => ErasedWork::Sync(Box::new(move || sink.put(f()))),
            Self::Future(build) => ErasedWork::Future(Box::new(move || {
                let fut = build();
                Box::pin(async move { sink.put(fut.await) }) as LocalBoxFuture<()>
            })),
        };
        (erased, slot)
    }
}

impl<T> std::fmt::Debug for WorkUnit<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("WorkUnit::Sync(..)"),
            Self::Future(_) => f.write_str("WorkUnit::Future(..)"),
        }
    }
}

/// Type-erased work as seen by adapters.
pub enum ErasedWork {
    /// Run a job to completion.
    Sync(Job),
    /// Build a future on the context and drive it to completion.
    Future(FutureBuilder<()>),
}

impl ErasedWork {
    /// Wraps a `Send` future that is already running elsewhere (used for
    /// draining a host operation).
    #[must_use]
    pub fn from_operation(operation: BoxOperation) -> Self {
        Self::Future(Box::new(move || operation as LocalBoxFuture<()>))
    }
}

impl std::fmt::Debug for ErasedWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("ErasedWork::Sync(..)"),
            Self::Future(_) => f.write_str("ErasedWork::Future(..)"),
        }
    }
}

/// Where the value of an erased work unit is delivered.
#[derive(Debug)]
pub struct OutputSlot<T> {
    value: Arc<Mutex<Option<T>>>,
}

impl<T> OutputSlot<T> {
    fn new() -> Self {
        Self {
            value: Arc::new(Mutex::new(None)),
        }
    }

    fn put(&self, value: T) {
        *self.value.lock() = Some(value);
    }

    /// Takes the delivered value, if the work completed.
    pub fn take(&self) -> Option<T> {
        self.value.lock().take()
    }
}

impl<T> Clone for OutputSlot<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
        }
    }
}

/// Future that yields once back to the context's queue.
#[derive(Debug)]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Yields to other messages queued on the current context.
#[must_use]
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Wake, Waker};

    #[derive(Default)]
    struct WakeCounter {
        wakes: AtomicUsize,
    }

    impl Wake for WakeCounter {
        fn wake(self: Arc<Self>) {
            self.wakes.fetch_add(1, Ordering::Relaxed);
        }

        fn wake_by_ref(self: &Arc<Self>) {
            self.wakes.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn sync_work_delivers_value_through_slot() {
        init_test("sync_work_delivers_value_through_slot");
        let work = WorkUnit::sync(|| 40 + 2);
        assert!(!work.is_async());

        let (erased, slot) = work.into_erased();
        assert!(slot.take().is_none());
        let ErasedWork::Sync(job) = erased else {
            panic!("expected sync work");
        };
        job();
        assert_eq!(slot.take(), Some(42));
        assert_eq!(slot.take(), None);
        crate::test_complete!("sync_work_delivers_value_through_slot");
    }

    #[test]
    fn future_work_delivers_value_after_completion() {
        init_test("future_work_delivers_value_after_completion");
        let work = WorkUnit::future(|| async {
            yield_now().await;
            "done".to_string()
        })
        .map(|s| s.len());
        assert!(work.is_async());

        let (erased, slot) = work.into_erased();
        let ErasedWork::Future(build) = erased else {
            panic!("expected future work");
        };
        let counter = Arc::new(WakeCounter::default());
        let waker = Waker::from(Arc::clone(&counter));
        let mut cx = Context::from_waker(&waker);
        let mut fut = build();

        assert!(fut.as_mut().poll(&mut cx).is_pending());
        assert!(slot.take().is_none());
        assert_eq!(counter.wakes.load(Ordering::Relaxed), 1);

        assert!(fut.as_mut().poll(&mut cx).is_ready());
        assert_eq!(slot.take(), Some(4));
        crate::test_complete!("future_work_delivers_value_after_completion");
    }

    #[test]
    fn futures_need_not_be_send() {
        init_test("futures_need_not_be_send");
        let work = WorkUnit::future(|| {
            let local = std::rc::Rc::new(5);
            async move { *local * 2 }
        });
        let (erased, slot) = work.into_erased();
        let ErasedWork::Future(build) = erased else {
            panic!("expected future work");
        };
        futures_lite::future::block_on(build());
        assert_eq!(slot.take(), Some(10));
        crate::test_complete!("futures_need_not_be_send");
    }

    #[test]
    fn yield_now_pending_then_ready_with_single_wake() {
        init_test("yield_now_pending_then_ready_with_single_wake");
        let wake_counter = Arc::new(WakeCounter::default());
        let waker = Waker::from(Arc::clone(&wake_counter));
        let mut cx = Context::from_waker(&waker);
        let mut fut = Box::pin(yield_now());

        assert!(matches!(fut.as_mut().poll(&mut cx), Poll::Pending));
        assert_eq!(wake_counter.wakes.load(Ordering::Relaxed), 1);
        assert!(matches!(fut.as_mut().poll(&mut cx), Poll::Ready(())));
        assert_eq!(wake_counter.wakes.load(Ordering::Relaxed), 1);
        crate::test_complete!("yield_now_pending_then_ready_with_single_wake");
    }
}
