//! Error and result types for the session API.
//!
//! Lower layers keep their own error enums; [`SessionError`] is the single
//! surface returned by [`StreamingSession`](crate::session::StreamingSession)
//! operations.

use std::time::Duration;

use thiserror::Error;

use crate::{disassembler::DisassemblyError, sender::SendError};

/// Errors returned by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Sending a payload failed.
    #[error("failed to send payload: {0}")]
    Disassembly(#[from] DisassemblyError),
    /// The connection closed before the operation completed.
    #[error("connection closed")]
    Disconnected,
    /// No response arrived within the configured request timeout.
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

impl SessionError {
    /// Whether the error means the connection is gone.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        matches!(
            self,
            Self::Disconnected
                | Self::Disassembly(DisassemblyError::Send(
                    SendError::Disconnected | SendError::Transport(_)
                ))
        )
    }
}

/// Result type for session operations.
pub type Result<T, E = SessionError> = std::result::Result<T, E>;
