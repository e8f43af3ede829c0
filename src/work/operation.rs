//! One-shot completion operations.
//!
//! [`operation`] creates a linked pair. The [`OperationSource`] completes the
//! operation exactly once; dropping it without completing settles the
//! operation as abandoned. The [`Operation`] side can be awaited from any
//! context or blocked on from a plain thread.

use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use super::BoxOperation;

#[derive(Debug)]
struct State<T> {
    value: Option<T>,
    settled: bool,
    wakers: Vec<Waker>,
}

#[derive(Debug)]
struct Shared<T> {
    state: Mutex<State<T>>,
    settled: Condvar,
}

impl<T> Shared<T> {
    fn settle(&self, value: Option<T>) {
        let wakers = {
            let mut state = self.state.lock();
            if state.settled {
                return;
            }
            state.value = value;
            state.settled = true;
            std::mem::take(&mut state.wakers)
        };
        self.settled.notify_all();
        for waker in wakers {
            waker.wake();
        }
    }
}

/// Creates a linked source/operation pair.
#[must_use]
pub fn operation<T>() -> (OperationSource<T>, Operation<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            value: None,
            settled: false,
            wakers: Vec::new(),
        }),
        settled: Condvar::new(),
    });
    (
        OperationSource {
            shared: Arc::clone(&shared),
        },
        Operation { shared },
    )
}

/// Completing side of an [`Operation`].
#[derive(Debug)]
pub struct OperationSource<T> {
    shared: Arc<Shared<T>>,
}

impl<T> OperationSource<T> {
    /// Completes the operation with `value`.
    pub fn complete(self, value: T) {
        self.shared.settle(Some(value));
    }
}

impl<T> Drop for OperationSource<T> {
    fn drop(&mut self) {
        self.shared.settle(None);
    }
}

/// Awaitable side of a one-shot operation.
///
/// Resolves to `Some(value)` when completed, `None` when the source was
/// dropped without completing.
#[derive(Debug)]
pub struct Operation<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Operation<T> {
    /// Returns `true` once the operation reached a terminal state.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.shared.state.lock().settled
    }

    /// Blocks the calling thread until the operation settles.
    ///
    /// Never call this from a context thread that must run the completing
    /// work; use `drain_until` there instead.
    pub fn wait(self) -> Option<T> {
        let mut state = self.shared.state.lock();
        while !state.settled {
            self.shared.settled.wait(&mut state);
        }
        state.value.take()
    }
}

impl<T: Send + 'static> Operation<T> {
    /// Discards the value, keeping only completion.
    #[must_use]
    pub fn settled(self) -> BoxOperation {
        Box::pin(async move {
            let _ = self.await;
        })
    }
}

impl<T> Future for Operation<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();
        if state.settled {
            return Poll::Ready(state.value.take());
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}
