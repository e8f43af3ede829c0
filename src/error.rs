//! Error types.
//!
//! Two families, kept apart on purpose of reporting:
//!
//! - [`ContextError`]: structural failures. The harness could not execute the
//!   work under the requested context at all (unknown kind, misregistered
//!   adapter, draining an adapter that cannot drain, a context that closed).
//! - [`Panic`]: a panic raised by the work itself, captured on the context
//!   thread and carried back to the caller with its original payload.
//!
//! [`RunError`] joins both for the `try_run*` entry points.

use crate::types::ContextKind;
use std::any::Any;
use std::fmt;
use thiserror::Error;

/// A structural (infrastructure) failure.
///
/// These are never retried: they indicate misconfiguration, not flaky tests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// No registration matched the requested kind.
    #[error("unsupported context kind: {kind}")]
    UnsupportedKind {
        /// The kind that was requested.
        kind: ContextKind,
    },
    /// A registration matched but its factory produced no instance.
    #[error("adapter `{adapter}` registered for {kind} does not provide an instance")]
    MissingInstance {
        /// The kind that was requested.
        kind: ContextKind,
        /// Type identity advertised by the registration.
        adapter: &'static str,
    },
    /// A registration matched but its instance serves a different kind.
    #[error("adapter `{adapter}` registered for {requested} serves {actual}")]
    AdapterKindMismatch {
        /// The kind that was requested.
        requested: ContextKind,
        /// The kind reported by the produced instance.
        actual: ContextKind,
        /// Type identity advertised by the registration.
        adapter: &'static str,
    },
    /// `drain_until` was called on an adapter that cannot drain.
    #[error("context adapter for {kind} does not support draining")]
    DrainUnsupported {
        /// Kind served by the adapter.
        kind: ContextKind,
    },
    /// The context no longer accepts work.
    #[error("context `{context}` is closed")]
    ContextClosed {
        /// Name of the closed context.
        context: String,
    },
    /// The context shut down before the dispatched work settled.
    #[error("context `{context}` shut down before the work settled")]
    WorkAbandoned {
        /// Name of the context.
        context: String,
    },
    /// A blocking wait was requested on the context's own thread and the
    /// context cannot service its messages re-entrantly.
    #[error("cannot wait on context `{context}` from its own thread")]
    ReentrantWait {
        /// Name of the context.
        context: String,
    },
    /// `spawn_local` was called outside any execution context.
    #[error("no execution context is current on this thread")]
    NoCurrentContext,
    /// The context thread could not be started.
    #[error("failed to start context thread `{name}`: {message}")]
    Spawn {
        /// Requested thread name.
        name: String,
        /// OS error text.
        message: String,
    },
}

impl ContextError {
    /// Returns the context kind this error is about, if it names one.
    #[must_use]
    pub const fn kind(&self) -> Option<ContextKind> {
        match self {
            Self::UnsupportedKind { kind }
            | Self::MissingInstance { kind, .. }
            | Self::DrainUnsupported { kind } => Some(*kind),
            Self::AdapterKindMismatch { requested, .. } => Some(*requested),
            _ => None,
        }
    }

    /// Returns `true` if this error comes from adapter resolution.
    #[must_use]
    pub const fn is_resolution(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedKind { .. }
                | Self::MissingInstance { .. }
                | Self::AdapterKindMismatch { .. }
        )
    }
}

/// A panic captured on an execution context.
///
/// The original payload is preserved; [`resume`](Self::resume) re-raises it
/// on the current thread so the caller sees the same type and message the
/// work panicked with.
pub struct Panic {
    payload: Box<dyn Any + Send + 'static>,
}

impl Panic {
    /// Wraps a payload obtained from `catch_unwind`.
    #[must_use]
    pub fn new(payload: Box<dyn Any + Send + 'static>) -> Self {
        Self { payload }
    }

    /// Returns the panic message when the payload is a string.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        if let Some(s) = self.payload.downcast_ref::<&'static str>() {
            Some(s)
        } else if let Some(s) = self.payload.downcast_ref::<String>() {
            Some(s.as_str())
        } else {
            None
        }
    }

    /// Describes the payload type: `&str`, `String`, or `opaque`.
    #[must_use]
    pub fn payload_type(&self) -> &'static str {
        if self.payload.is::<&'static str>() {
            "&str"
        } else if self.payload.is::<String>() {
            "String"
        } else {
            "opaque"
        }
    }

    /// Attempts to view the payload as `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Returns the raw payload.
    #[must_use]
    pub fn into_payload(self) -> Box<dyn Any + Send + 'static> {
        self.payload
    }

    /// Re-raises the panic on the current thread with its original payload.
    pub fn resume(self) -> ! {
        std::panic::resume_unwind(self.payload)
    }
}

impl fmt::Debug for Panic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Panic")
            .field("payload_type", &self.payload_type())
            .field("message", &self.message())
            .finish()
    }
}

impl fmt::Display for Panic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "panicked: {msg}"),
            None => write!(f, "panicked with a non-string payload"),
        }
    }
}

impl std::error::Error for Panic {}

/// Failure of a `try_run*` call.
#[derive(Debug, Error)]
pub enum RunError {
    /// The work could not be executed under the requested context.
    #[error(transparent)]
    Context(#[from] ContextError),
    /// The work ran and panicked.
    #[error("{0}")]
    Panicked(Panic),
}

impl RunError {
    /// Returns `true` for infrastructure failures.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(self, Self::Context(_))
    }

    /// Returns the captured panic, if this is one.
    #[must_use]
    pub fn into_panic(self) -> Option<Panic> {
        match self {
            Self::Panicked(panic) => Some(panic),
            Self::Context(_) => None,
        }
    }
}

impl From<Panic> for RunError {
    fn from(panic: Panic) -> Self {
        Self::Panicked(panic)
    }
}
