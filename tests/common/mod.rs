//! Shared helpers for integration tests.

#![allow(dead_code, unused_macros)]

use std::sync::Once;
use std::thread;

static INIT: Once = Once::new();

/// Installs a test-writer tracing subscriber once per test binary.
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

/// Name of the current thread, if it has one.
pub fn thread_name() -> Option<String> {
    thread::current().name().map(str::to_owned)
}

macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(test = %$name, "=== test phase ===");
    };
}

macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- section ---");
    };
}

macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "=== test complete ===");
    };
}

macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr $(,)?) => {{
        let passed = $cond;
        tracing::debug!(
            check = %$msg,
            expected = ?$expected,
            actual = ?$actual,
            passed,
            "assertion"
        );
        assert!(passed, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    }};
}
