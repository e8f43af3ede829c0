//! Syncfact: run test bodies on a designated execution context.
//!
//! # Overview
//!
//! A test declares the execution context it needs: no context at all, a
//! portable single-threaded message loop, or a platform UI affinity (a Win32
//! message-pump thread, the GLib main context, the Cocoa main run loop). The
//! runner thread hands the body to that context, blocks until the body and
//! every asynchronous continuation it started have settled, and gets panics
//! back with their original payloads.
//!
//! # Core Guarantees
//!
//! - **Affinity**: work dispatched to a Portable or Platform context runs on
//!   that context's thread, never on the calling thread
//! - **Settle before return**: `run` returns only after the root work item and
//!   every task it spawned with [`spawn_local`](context::spawn_local) finished
//! - **Panic fidelity**: a panic on the context is carried back as a value and
//!   resumed on the caller with the same payload
//! - **Stable adapters**: one adapter instance per [`ContextKind`], resolved
//!   lazily and cached for the life of the registry
//! - **Structural errors are not test failures**: an unresolvable kind or a
//!   misregistered adapter surfaces as [`ContextError`], never as a panic
//!
//! # Module Structure
//!
//! - [`types`]: Context kinds and cooperative cancellation
//! - [`work`]: Work units and completion operations
//! - [`context`]: The adapter contract, context handles, and the built-in adapters
//! - [`registry`]: Kind to adapter resolution with extension discovery
//! - [`runner`]: Test cases, invocations, outcomes, and the result channel
//! - [`harness`]: Process-scoped registry used by `#[context_test]`
//! - [`config`]: Harness configuration (env, optional TOML)
//! - [`error`](mod@error): Error types
//!
//! # Example
//!
//! ```ignore
//! use syncfact::context::{ContextAdapterExt, PortableAdapter};
//!
//! let adapter = PortableAdapter::shared();
//! let on_loop = adapter.run(|| std::thread::current().name().map(str::to_owned))?;
//! assert_eq!(on_loop.as_deref(), Some("syncfact-portable"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]

// Lets `#[context_test]` expansions resolve `::syncfact` inside this crate's own tests.
extern crate self as syncfact;

pub(crate) mod tracing_compat;

pub mod config;
pub mod context;
pub mod error;
pub mod harness;
pub mod registry;
pub mod runner;
pub mod types;
pub mod work;

// ── Test-only modules ───────────────────────────────────────────────────
#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

// Re-exports for convenient access to core types
pub use config::{ConfigError, HarnessConfig, LoopConfig};
pub use context::{
    ContextAdapter, ContextAdapterExt, ContextHandle, NullAdapter, PlatformAdapter,
    PortableAdapter, spawn_local,
};
pub use error::{ContextError, Panic, RunError};
pub use registry::{AdapterRegistry, ExtensionModule, ProvideAdapter, RegistrationDescriptor};
pub use runner::{
    CollectingSink, ExecutionRunner, ResultSink, TestBody, TestCase, TestInvocation, TestOutcome,
    TestStatus,
};
pub use types::{CancelKind, CancelReason, CancellationToken, ContextKind, ParseContextKindError};
pub use work::{Operation, OperationSource, WorkUnit, operation};

#[cfg(feature = "proc-macros")]
pub use syncfact_macros::context_test;

#[doc(hidden)]
pub mod __private {
    pub use inventory;
}
