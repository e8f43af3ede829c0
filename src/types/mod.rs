//! Core types shared across the harness.
//!
//! - [`kind`]: The closed enumeration of execution context kinds
//! - [`cancel`]: Cancellation reason, kind, and the cooperative token

pub mod cancel;
pub mod kind;

pub use cancel::{CancelKind, CancelReason, CancellationToken};
pub use kind::{ContextKind, ParseContextKindError};
