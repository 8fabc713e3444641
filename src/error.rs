//! Connection, control, and engine error handling.

use crate::id::TalkgroupId;
use flume::RecvError;
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
};
use tokio::time::error::Elapsed;

/// Errors found in the connection details before any session is opened.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ConfigError {
    /// No server URL was supplied.
    MissingServerUrl,
    /// The server URL did not parse.
    InvalidServerUrl,
    /// The participant credential was empty.
    MissingCredential,
    /// The room list was empty; there is nothing to coordinate.
    NoRooms,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "invalid connection details: ")?;
        match self {
            ConfigError::MissingServerUrl => write!(f, "no server URL"),
            ConfigError::InvalidServerUrl => write!(f, "server URL failed to parse"),
            ConfigError::MissingCredential => write!(f, "participant credential is empty"),
            ConfigError::NoRooms => write!(f, "room list is empty"),
        }
    }
}

impl StdError for ConfigError {}

/// Errors encountered while establishing the set of talkgroup sessions.
#[derive(Debug)]
#[non_exhaustive]
pub enum ConnectError {
    /// The supplied connection details were rejected before any session
    /// was opened.
    Config(ConfigError),
    /// A session failed and no retry budget remained.
    AllAttemptsFailed {
        /// Talkgroup whose session exhausted its retries.
        talkgroup: TalkgroupId,
        /// Number of attempts made.
        attempts: usize,
        /// Error reported by the final attempt.
        source: SessionError,
    },
    /// A session missed its overall connection deadline.
    TimedOut {
        /// Talkgroup whose session timed out.
        talkgroup: TalkgroupId,
    },
    /// The coordinator was disconnected while the connect was in flight.
    Cancelled,
}

impl Display for ConnectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "failed to connect talkgroup sessions: ")?;
        match self {
            ConnectError::Config(e) => e.fmt(f),
            ConnectError::AllAttemptsFailed {
                talkgroup,
                attempts,
                source,
            } => write!(
                f,
                "session for {} failed after {} attempts ({})",
                talkgroup, attempts, source
            ),
            ConnectError::TimedOut { talkgroup } => {
                write!(f, "session for {} missed its connection deadline", talkgroup)
            },
            ConnectError::Cancelled => write!(f, "connect was cancelled by disconnect"),
        }
    }
}

impl StdError for ConnectError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConnectError::Config(e) => Some(e),
            ConnectError::AllAttemptsFailed { source, .. } => Some(source),
            ConnectError::TimedOut { .. } | ConnectError::Cancelled => None,
        }
    }
}

impl From<ConfigError> for ConnectError {
    fn from(e: ConfigError) -> Self {
        ConnectError::Config(e)
    }
}

/// Convenience type for session-establishment results.
pub type ConnectResult<T> = Result<T, ConnectError>;

/// Errors associated with the coordinator's control surface.
///
/// Unless otherwise stated these do not invalidate the session set; they
/// advise on valid operations against the current state.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ControlError {
    /// No session set is connected.
    NotConnected,
    /// A transmit target was requested on a talkgroup the participant has
    /// not joined.
    NotJoined,
    /// The named talkgroup is not part of the admitted set.
    UnknownTalkgroup,
    /// An emergency override was requested on a non-emergency talkgroup.
    InvalidEmergencyTarget,
    /// The session's microphone could not be enabled, or the talkgroup
    /// carries no publish grant.
    DeviceError,
    /// The engine task has shut down and can no longer be commanded.
    Finished,
}

impl Display for ControlError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "failed to operate on coordinator: ")?;
        match self {
            ControlError::NotConnected => write!(f, "no session set is connected"),
            ControlError::NotJoined => write!(f, "talkgroup is not joined"),
            ControlError::UnknownTalkgroup => write!(f, "talkgroup is not in the admitted set"),
            ControlError::InvalidEmergencyTarget => {
                write!(f, "emergency override targets a non-emergency talkgroup")
            },
            ControlError::DeviceError => write!(f, "microphone could not be enabled"),
            ControlError::Finished => write!(f, "engine task has shut down"),
        }
    }
}

impl StdError for ControlError {}

impl From<RecvError> for ControlError {
    fn from(_: RecvError) -> Self {
        ControlError::Finished
    }
}

/// Alias for most calls on the coordinator's control surface.
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors reported by the ducking engine's own state machine.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum EngineError {
    /// `initialize` was called again with a different talkgroup set.
    KindMismatch,
    /// An emergency override was requested on a non-emergency talkgroup.
    InvalidEmergencyTarget,
    /// The named talkgroup is not tracked by the engine.
    ///
    /// Operations hitting this are logged and swallowed by the engine task;
    /// it only crosses a channel for explicitly fallible commands.
    UnknownTalkgroup,
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "ducking engine rejected operation: ")?;
        match self {
            EngineError::KindMismatch => {
                write!(f, "initialize called with a different talkgroup set")
            },
            EngineError::InvalidEmergencyTarget => {
                write!(f, "override target is not priority-static")
            },
            EngineError::UnknownTalkgroup => write!(f, "talkgroup is not tracked"),
        }
    }
}

impl StdError for EngineError {}

impl From<EngineError> for ControlError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::InvalidEmergencyTarget => ControlError::InvalidEmergencyTarget,
            EngineError::UnknownTalkgroup => ControlError::UnknownTalkgroup,
            EngineError::KindMismatch => ControlError::NotConnected,
        }
    }
}

/// Errors surfaced by the external media-session layer.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum SessionError {
    /// The server refused the credential or the room grant.
    Denied,
    /// The session was closed underneath the caller.
    Closed,
    /// The transport gave up waiting on the server.
    Timeout,
    /// Any other transport-level failure.
    Transport(String),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "media session error: ")?;
        match self {
            SessionError::Denied => write!(f, "credential or grant refused"),
            SessionError::Closed => write!(f, "session closed"),
            SessionError::Timeout => write!(f, "transport timed out"),
            SessionError::Transport(msg) => write!(f, "transport failure ({})", msg),
        }
    }
}

impl StdError for SessionError {}

impl From<Elapsed> for SessionError {
    fn from(_: Elapsed) -> Self {
        SessionError::Timeout
    }
}

/// Convenience type for the session layer.
pub type SessionResult<T> = Result<T, SessionError>;
