//! Portable single-threaded message loop.
//!
//! [`MessageLoop`] owns a FIFO of jobs serviced by one dedicated OS thread.
//! It is the engine of the portable context and also implements
//! [`NativeLoop`], so a dedicated affine thread can stand in for a platform
//! main loop.
//!
//! The loop thread lives as long as its [`LoopThread`] owner. Dropping the
//! owner closes the queue and joins the thread; messages still queued at that
//! point are dropped, which releases any caller waiting on them.

use super::native::{NativeContext, NativeLoop};
use super::{ContextHandle, task};
use crate::config::LoopConfig;
use crate::error::{ContextError, Panic};
use crate::tracing_compat::{debug, error, trace, warn};
use crate::types::ContextKind;
use crate::work::Job;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

#[derive(Default)]
struct Queue {
    messages: VecDeque<Job>,
    closed: bool,
}

/// A FIFO of jobs serviced by a single thread.
pub struct MessageLoop {
    name: String,
    queue: Mutex<Queue>,
    ready: Condvar,
    thread: OnceLock<ThreadId>,
}

impl MessageLoop {
    /// Starts a loop thread configured by `config`.
    pub fn spawn(config: &LoopConfig) -> Result<LoopThread, ContextError> {
        config.validate().map_err(|err| ContextError::Spawn {
            name: config.thread_name.clone(),
            message: err.to_string(),
        })?;

        let message_loop = Arc::new(Self {
            name: config.thread_name.clone(),
            queue: Mutex::new(Queue::default()),
            ready: Condvar::new(),
            thread: OnceLock::new(),
        });

        let mut builder = thread::Builder::new().name(config.thread_name.clone());
        if let Some(size) = config.stack_size {
            builder = builder.stack_size(size);
        }
        let runner = Arc::clone(&message_loop);
        let handle = builder
            .spawn(move || runner.run())
            .map_err(|err| ContextError::Spawn {
                name: config.thread_name.clone(),
                message: err.to_string(),
            })?;
        let _ = message_loop.thread.set(handle.thread().id());

        debug!(context = %config.thread_name, "message loop spawned");
        Ok(LoopThread {
            message_loop,
            thread: Some(handle),
        })
    }

    /// Loop name (the thread name).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends `job` to the queue.
    pub fn post(&self, job: Job) -> Result<(), ContextError> {
        let mut queue = self.queue.lock();
        if queue.closed {
            drop(queue);
            drop(job);
            return Err(ContextError::ContextClosed {
                context: self.name.clone(),
            });
        }
        queue.messages.push_back(job);
        drop(queue);
        self.ready.notify_one();
        Ok(())
    }

    /// Stops accepting messages and wakes the loop so it can exit.
    pub fn close(&self) {
        self.queue.lock().closed = true;
        self.ready.notify_all();
    }

    /// Returns `true` once the loop stopped accepting messages.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.queue.lock().closed
    }

    /// Returns `true` when called on the loop thread.
    #[must_use]
    pub fn is_loop_thread(&self) -> bool {
        self.thread.get() == Some(&thread::current().id())
    }

    fn next(&self) -> Option<Job> {
        let mut queue = self.queue.lock();
        loop {
            if queue.closed {
                return None;
            }
            if let Some(job) = queue.messages.pop_front() {
                return Some(job);
            }
            self.ready.wait(&mut queue);
        }
    }

    fn service(&self, job: Job) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
            let panic = Panic::new(payload);
            error!(context = %self.name, panic = %panic, "message panicked; loop continues");
        }
    }

    fn run(&self) {
        let _ = self.thread.set(thread::current().id());
        trace!(context = %self.name, "message loop running");

        while let Some(job) = self.next() {
            self.service(job);
        }

        let dropped = std::mem::take(&mut self.queue.lock().messages);
        let dropped_count = dropped.len();
        drop(dropped);
        task::abandon_all();
        debug!(context = %self.name, dropped = dropped_count, "message loop stopped");
    }
}

impl NativeLoop for MessageLoop {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, job: Job) -> Result<(), ContextError> {
        self.post(job)
    }

    fn is_loop_thread(&self) -> bool {
        Self::is_loop_thread(self)
    }

    fn can_pump(&self) -> bool {
        true
    }

    fn pump_once(&self) -> Result<(), ContextError> {
        let job = self.next().ok_or_else(|| ContextError::ContextClosed {
            context: self.name.clone(),
        })?;
        self.service(job);
        Ok(())
    }
}

impl std::fmt::Debug for MessageLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.queue.lock();
        f.debug_struct("MessageLoop")
            .field("name", &self.name)
            .field("pending", &queue.messages.len())
            .field("closed", &queue.closed)
            .finish()
    }
}

/// Owner of a running [`MessageLoop`] thread.
pub struct LoopThread {
    message_loop: Arc<MessageLoop>,
    thread: Option<JoinHandle<()>>,
}

impl LoopThread {
    /// The loop serviced by this thread.
    #[must_use]
    pub fn message_loop(&self) -> &Arc<MessageLoop> {
        &self.message_loop
    }

    /// Converts the owner into a context handle for `kind`.
    ///
    /// The loop shuts down when the last clone of the returned handle that
    /// owns it is dropped.
    #[must_use]
    pub fn into_handle(self, kind: ContextKind) -> ContextHandle {
        let context = Arc::new(NativeContext::new(kind, Arc::clone(&self.message_loop)));
        ContextHandle::owning(context, Arc::new(self))
    }
}

impl Drop for LoopThread {
    fn drop(&mut self) {
        self.message_loop.close();
        let Some(thread) = self.thread.take() else {
            return;
        };
        if self.message_loop.is_loop_thread() {
            // Dropped from a job on the loop itself; the thread exits once
            // that job returns.
            return;
        }
        if thread.join().is_err() {
            warn!(context = %self.message_loop.name, "message loop thread panicked");
        }
    }
}

impl std::fmt::Debug for LoopThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopThread")
            .field("message_loop", &self.message_loop)
            .finish()
    }
}
