//! PTY (Pseudo-Terminal) abstraction layer.
//!
//! This module provides a platform-independent interface for working with
//! pseudo-terminals. It supports both Unix PTY and Windows ConPTY.

mod async_adapter;
mod native;

pub use async_adapter::{AsyncPtyReader, AsyncPtyWriter};
pub use native::{default_shell, resize, NativePty, SpawnedShell};

/// Size of a PTY in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    /// Number of rows (height).
    pub rows: u16,
    /// Number of columns (width).
    pub cols: u16,
}

impl PtySize {
    /// Create a new PtySize with the given dimensions.
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Clamp client-reported dimensions to something a PTY accepts.
    pub fn clamped(rows: u16, cols: u16) -> Self {
        Self {
            rows: rows.clamp(1, 1000),
            cols: cols.clamp(1, 1000),
        }
    }
}

impl Default for PtySize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}
