//! Session workspaces.
//!
//! A workspace is a directory private to one session. The [`WorkspaceGuard`]
//! is the only way from a client-supplied path to a filesystem path, and the
//! [`files`] operations (list, read, save, delete) all go through it.

pub mod files;
mod guard;

pub use files::{FileKind, FileNode};
pub use guard::{normalize, WorkspaceGuard};
