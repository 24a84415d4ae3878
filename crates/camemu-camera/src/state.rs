//! Camera lifecycle: `disconnected → connected → armed → running`.
//!
//! Only adjacent moves are legal. A rejected command leaves the state as it
//! was.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraState {
    #[default]
    Disconnected,
    Connected,
    Armed,
    Running,
}

impl CameraState {
    pub fn as_str(self) -> &'static str {
        match self {
            CameraState::Disconnected => "disconnected",
            CameraState::Connected => "connected",
            CameraState::Armed => "armed",
            CameraState::Running => "running",
        }
    }
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commands that move the camera one step along its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleCommand {
    Connect,
    Disconnect,
    Arm,
    Disarm,
    Start,
    Stop,
}

impl LifecycleCommand {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "connect" => Some(LifecycleCommand::Connect),
            "disconnect" => Some(LifecycleCommand::Disconnect),
            "arm" => Some(LifecycleCommand::Arm),
            "disarm" => Some(LifecycleCommand::Disarm),
            "start" => Some(LifecycleCommand::Start),
            "stop" => Some(LifecycleCommand::Stop),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleCommand::Connect => "connect",
            LifecycleCommand::Disconnect => "disconnect",
            LifecycleCommand::Arm => "arm",
            LifecycleCommand::Disarm => "disarm",
            LifecycleCommand::Start => "start",
            LifecycleCommand::Stop => "stop",
        }
    }
}

impl fmt::Display for LifecycleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command that is not valid in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{command} is not valid in {state} state")]
pub struct TransitionError {
    pub command: &'static str,
    pub state: CameraState,
}

/// Next state for `command` from `state`.
pub fn transition(
    state: CameraState,
    command: LifecycleCommand,
) -> Result<CameraState, TransitionError> {
    use CameraState::*;
    use LifecycleCommand::*;

    match (state, command) {
        (Disconnected, Connect) => Ok(Connected),
        (Connected, Disconnect) => Ok(Disconnected),
        (Connected, Arm) => Ok(Armed),
        (Armed, Disarm) => Ok(Connected),
        (Armed, Start) => Ok(Running),
        (Running, Stop) => Ok(Armed),
        _ => Err(TransitionError {
            command: command.as_str(),
            state,
        }),
    }
}

/// Holds the current lifecycle state.
#[derive(Debug, Clone, Default)]
pub struct CameraStateMachine {
    state: CameraState,
}

impl CameraStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CameraState {
        self.state
    }

    /// Check a command without applying it.
    pub fn peek(&self, command: LifecycleCommand) -> Result<CameraState, TransitionError> {
        transition(self.state, command)
    }

    /// Apply a command, leaving the state untouched on error.
    pub fn handle(&mut self, command: LifecycleCommand) -> Result<CameraState, TransitionError> {
        let next = transition(self.state, command)?;
        self.state = next;
        Ok(next)
    }

    /// Configuration changes are refused only while running.
    pub fn check_configure(&self) -> Result<(), TransitionError> {
        if self.state == CameraState::Running {
            return Err(TransitionError {
                command: "configure",
                state: self.state,
            });
        }
        Ok(())
    }

    /// Acquisition ended on its own; drop back to armed.
    pub fn complete_run(&mut self) -> bool {
        if self.state == CameraState::Running {
            self.state = CameraState::Armed;
            return true;
        }
        false
    }

    /// Return to `disconnected` from any state.
    pub fn reset(&mut self) {
        self.state = CameraState::Disconnected;
    }
}
