//! Execution context kinds.
//!
//! A [`ContextKind`] is chosen when a test is declared and persisted verbatim
//! with the test case. Nothing about an adapter is resolved at (de)serialization
//! time; the kind is only mapped to an adapter when the case executes.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which execution affinity a test requires.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// No context: the body runs in place on the calling thread.
    #[default]
    None,
    /// A portable single-threaded message loop.
    Portable,
    /// A Windows message-pump thread.
    Win32,
    /// The GLib main context.
    Gtk,
    /// The macOS main run loop.
    Cocoa,
}

impl ContextKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::None,
        Self::Portable,
        Self::Win32,
        Self::Gtk,
        Self::Cocoa,
    ];

    /// Stable lowercase name, identical to the serialized form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Portable => "portable",
            Self::Win32 => "win32",
            Self::Gtk => "gtk",
            Self::Cocoa => "cocoa",
        }
    }

    /// Returns `true` for kinds served by a built-in adapter.
    #[must_use]
    pub const fn is_builtin(self) -> bool {
        matches!(self, Self::None | Self::Portable)
    }

    /// Returns `true` for native UI affinities.
    #[must_use]
    pub const fn is_platform(self) -> bool {
        !self.is_builtin()
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown context kind name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown context kind `{input}` (expected one of: none, portable, win32, gtk, cocoa)")]
pub struct ParseContextKindError {
    input: String,
}

impl ParseContextKindError {
    /// The rejected input.
    #[must_use]
    pub fn input(&self) -> &str {
        &self.input
    }
}

impl FromStr for ContextKind {
    type Err = ParseContextKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ParseContextKindError {
                input: s.to_owned(),
            })
    }
}
