//! Error types shared across the bot.
//!
//! Startup and lifecycle failures surface as [`BotError`] and abort the
//! process. Failures inside a single command surface as [`CommandError`]
//! and are always contained by the router.

use std::time::Duration;

use crate::http::HttpError;
use crate::reply::ReplyError;
use crate::session::SessionState;

/// Errors raised while building, connecting or publishing.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Missing or invalid startup settings.
    #[error("configuration: {0}")]
    Configuration(String),

    /// The gateway rejected our credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Socket, DNS, TLS or timeout failure talking to Discord.
    #[error("network: {0}")]
    Network(String),

    /// Two commands share a name.
    #[error("duplicate command name: /{0}")]
    DuplicateName(String),

    /// A command declaration breaks Discord's naming rules.
    #[error("invalid command /{name}: {reason}")]
    InvalidCommand { name: String, reason: String },

    /// Discord answered with a non-success status.
    #[error("remote rejected request ({status}): {body}")]
    RemoteRejected { status: u16, body: String },

    /// The operation is not valid in the session's current state.
    #[error("session is {actual}, expected {expected}")]
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },

    /// Another connect/disconnect is already running.
    #[error("a session transition is already in progress")]
    TransitionInProgress,
}

impl From<HttpError> for BotError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Api { status, body, .. } => BotError::RemoteRejected { status, body },
            HttpError::Transport(e) => BotError::Network(e),
            HttpError::Serde(e) => BotError::Network(format!("malformed payload: {e}")),
        }
    }
}

/// A command failed to run to completion.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("missing required option `{0}`")]
    MissingOption(String),

    #[error("invalid value for option `{name}`: {reason}")]
    InvalidOption { name: String, reason: String },

    #[error("reply failed: {0}")]
    Reply(#[from] ReplyError),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_become_remote_rejections() {
        let err: BotError = HttpError::Api {
            status: 400,
            body: "bad option".to_string(),
            route: "PUT /applications/1/guilds/2/commands".to_string(),
        }
        .into();
        assert!(matches!(err, BotError::RemoteRejected { status: 400, .. }));
    }

    #[test]
    fn transport_errors_become_network_errors() {
        let err: BotError = HttpError::Transport("connection reset".to_string()).into();
        assert!(matches!(err, BotError::Network(ref m) if m == "connection reset"));
    }

    #[test]
    fn invalid_state_message_names_both_states() {
        let err = BotError::InvalidState {
            expected: SessionState::Connected,
            actual: SessionState::Disconnected,
        };
        assert_eq!(err.to_string(), "session is disconnected, expected connected");
    }
}
