//! Optional tracing integration.
//!
//! With the `tracing-integration` feature (on by default) the logging macros
//! used across the crate are `tracing`'s own. Without it they expand to
//! nothing.

#[cfg(feature = "tracing-integration")]
pub(crate) use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
macro_rules! discard {
    ($($arg:tt)*) => {{}};
}

#[cfg(not(feature = "tracing-integration"))]
pub(crate) use {
    discard as debug, discard as error, discard as info, discard as trace, discard as warn,
};
