//! Fault taxonomy for inbound action processing
//!
//! A [`ProtocolFault`] only concerns the message that caused it: the
//! offending client may get a corrective payload back and the connection
//! carries on. A [`FatalFault`] means the connection cannot continue and
//! must be torn down by the transport layer.

use shared::DataBlock;
use thiserror::Error;

/// Recoverable error for a single inbound message.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProtocolFault {
    message: String,
    response: Option<DataBlock>,
}

impl ProtocolFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            response: None,
        }
    }

    /// Fault answered by sending `response` back to the origin connection.
    pub fn with_response(message: impl Into<String>, response: DataBlock) -> Self {
        Self {
            message: message.into(),
            response: Some(response),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn response(&self) -> Option<&DataBlock> {
        self.response.as_ref()
    }

    pub fn into_response(self) -> Option<DataBlock> {
        self.response
    }
}

/// Unrecoverable error; no further actions are processed for the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalFault {
    #[error("connection {connection_id} already faulted")]
    ConnectionFaulted { connection_id: u32 },
    #[error("{0}")]
    Session(String),
}

/// Outcome of forwarding data into session state.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error("protocol fault: {0}")]
    Protocol(#[from] ProtocolFault),
    #[error("fatal fault: {0}")]
    Fatal(#[from] FatalFault),
}
