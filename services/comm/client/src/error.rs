//! Client error types.

use comm_transport::TransportError;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by communication clients
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// Send attempted on a closed client
    #[error("Client was closed: {client}")]
    Closed {
        /// Client description
        client: String,
    },

    /// Send failed for a reason other than a transport fault
    #[error("Failed to send message [client={client}]")]
    SendFailed {
        /// Client description
        client: String,
        /// Underlying failure
        #[source]
        source: Arc<TransportError>,
    },

    /// Operation not supported by this client variant
    #[error("Operation '{operation}' is not supported by {client}")]
    Unsupported {
        /// Operation name
        operation: &'static str,
        /// Client description
        client: String,
    },

    /// Explicit destination passed to a session-bound client
    #[error("Session-bound client {client} does not accept an explicit target ({target})")]
    UnexpectedTarget {
        /// Client description
        client: String,
        /// Target that was passed
        target: String,
    },
}

impl ClientError {
    /// Whether this is the client-closed error
    pub fn is_closed(&self) -> bool {
        matches!(self, ClientError::Closed { .. })
    }

    /// Whether this is an unsupported-operation error
    pub fn is_unsupported(&self) -> bool {
        matches!(self, ClientError::Unsupported { .. })
    }
}
