//! Test logging helpers.
//!
//! Call [`init_test_logging`] at the top of a test, then mark progress with
//! [`test_phase!`](crate::test_phase), [`test_section!`](crate::test_section)
//! and [`test_complete!`](crate::test_complete). The filter follows
//! `RUST_LOG` and defaults to `syncfact=debug`.

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per process.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("syncfact=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_thread_names(true)
            .try_init();
    });
}

/// Logs the start of a test.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        ::tracing::info!(test = %$name, "=== test phase ===");
    };
}

/// Logs a named section inside a test.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        ::tracing::debug!(section = %$name, "--- section ---");
    };
}

/// Logs the successful end of a test.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        ::tracing::info!(test = %$name, "=== test complete ===");
    };
}

/// Asserts `cond`, logging the expected and actual values first.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr $(,)?) => {{
        let passed = $cond;
        ::tracing::debug!(
            check = %$msg,
            expected = ?$expected,
            actual = ?$actual,
            passed,
            "assertion"
        );
        assert!(
            passed,
            "{}: expected {:?}, got {:?}",
            $msg, $expected, $actual
        );
    }};
}
