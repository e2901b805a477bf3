//! Terminal lifecycle state machine.

/// Lifecycle state of a session's interactive terminal.
///
/// A session without a terminal has no state at all; a handle starts in
/// `Starting` and only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminalState {
    /// Handle allocated, shell not yet confirmed spawned.
    #[default]
    Starting,
    /// Shell process is alive and relaying bytes.
    Running,
    /// Shell process has exited; the handle cannot be reused.
    Exited,
}

impl TerminalState {
    /// Check if transition to target state is valid.
    ///
    /// Valid transitions:
    /// - Starting -> Running
    /// - Starting -> Exited (spawn failed or died immediately)
    /// - Running -> Exited
    pub fn can_transition_to(&self, target: TerminalState) -> bool {
        use TerminalState::*;
        matches!(
            (*self, target),
            (Starting, Running) | (Starting, Exited) | (Running, Exited)
        )
    }

    /// Attempt to transition to a new state.
    ///
    /// Returns `true` if the transition happened.
    pub fn transition_to(&mut self, target: TerminalState) -> bool {
        if self.can_transition_to(target) {
            *self = target;
            true
        } else {
            false
        }
    }

    /// Check if this is the terminal state (no further transitions possible).
    pub fn is_exited(&self) -> bool {
        matches!(self, TerminalState::Exited)
    }

    /// Check if the shell accepts input.
    pub fn is_running(&self) -> bool {
        matches!(self, TerminalState::Running)
    }
}
