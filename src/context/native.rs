//! Native loop abstraction.
//!
//! A [`NativeLoop`] is the opaque primitive a platform adapter drives: the
//! process's Win32 message-pump thread, the GLib main context, the Cocoa main
//! run loop. The harness only needs to post a job to it, recognise its
//! thread, and optionally service one pending message re-entrantly.

use super::SyncContext;
use crate::error::ContextError;
use crate::types::ContextKind;
use crate::work::Job;
use std::sync::Arc;

/// A native main loop that runs posted jobs on its own thread.
pub trait NativeLoop: Send + Sync + 'static {
    /// Loop name for diagnostics.
    fn name(&self) -> &str;

    /// Posts `job` to the loop thread.
    fn invoke(&self, job: Job) -> Result<(), ContextError>;

    /// Returns `true` when called on the loop thread.
    fn is_loop_thread(&self) -> bool;

    /// Returns `true` if [`pump_once`](Self::pump_once) is supported.
    fn can_pump(&self) -> bool {
        false
    }

    /// Services one pending message from the loop thread, blocking until one
    /// is available.
    fn pump_once(&self) -> Result<(), ContextError> {
        Err(ContextError::ReentrantWait {
            context: self.name().to_owned(),
        })
    }
}

/// [`SyncContext`] over a [`NativeLoop`].
pub struct NativeContext<L> {
    kind: ContextKind,
    native: Arc<L>,
}

impl<L: NativeLoop> NativeContext<L> {
    /// Binds `native` to `kind`.
    pub fn new(kind: ContextKind, native: Arc<L>) -> Self {
        Self { kind, native }
    }
}

impl<L: NativeLoop> SyncContext for NativeContext<L> {
    fn name(&self) -> &str {
        self.native.name()
    }

    fn kind(&self) -> ContextKind {
        self.kind
    }

    fn post(&self, job: Job) -> Result<(), ContextError> {
        self.native.invoke(job)
    }

    fn is_current(&self) -> bool {
        self.native.is_loop_thread()
    }

    fn can_pump(&self) -> bool {
        self.native.can_pump()
    }

    fn pump_until(&self, done: &dyn Fn() -> bool) -> Result<(), ContextError> {
        while !done() {
            if !self.native.can_pump() {
                return Err(ContextError::ReentrantWait {
                    context: self.native.name().to_owned(),
                });
            }
            self.native.pump_once()?;
        }
        Ok(())
    }
}

impl<L: NativeLoop> std::fmt::Debug for NativeContext<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeContext")
            .field("kind", &self.kind)
            .field("name", &self.native.name())
            .finish()
    }
}
