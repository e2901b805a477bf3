//! Interactive terminals.
//!
//! Each session owns at most one shell running on a pty with its workspace
//! as working directory. The [`TerminalMultiplexer`] spawns shells, routes
//! client input to them and pushes their output, as [`TerminalEvent`]s, to
//! whichever channel is currently attached.

mod decoder;
mod handle;
mod multiplexer;

pub use decoder::Utf8Decoder;
pub use handle::{EventSink, Terminal};
pub use multiplexer::{TerminalMultiplexer, TerminalSettings};

/// Event pushed from a terminal to its session channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    /// A channel was attached to the terminal; always precedes its output
    /// on that channel.
    Created { term_id: String },
    /// Output produced by the shell, in order.
    Output { term_id: String, data: String },
    /// The shell exited; sent exactly once per terminal.
    Exited { term_id: String, exit_code: Option<u32> },
}
