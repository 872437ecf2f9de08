//! Error taxonomy of the transport layer.
//!
//! Higher layers decide on retrying based on the variant: everything except [TransportError::Temporary]
//!  and [TransportError::Timeout] means that a connection is no longer usable in the direction
//!  that failed.

use std::io;

use crate::network::address::{Address, ConnType};
use crate::network::message_type::MessageTypeId;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection or its peer is gone.
    #[error("connection closed")]
    Closed,

    /// The caller cancelled the operation.
    #[error("operation canceled")]
    Canceled,

    /// The peer ended the stream in the middle of a packet.
    #[error("end of stream")]
    Eof,

    /// A transient condition, the operation may succeed if it is retried.
    #[error("temporary error: {0}")]
    Temporary(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("unknown error: {0}")]
    Unknown(String),

    #[error("{local} can't connect to {remote}: it's not listening")]
    NotListening {
        local: Address,
        remote: Address,
    },

    #[error("{0} is already listening: can't listen again")]
    AlreadyListening(Address),

    #[error("{address} is not a {expected} address")]
    WrongConnType {
        address: Address,
        expected: ConnType,
    },

    #[error("could not connect to {address}: {source}")]
    Connect {
        address: Address,
        #[source]
        source: io::Error,
    },

    #[error("error opening listener on {address}: {reason}")]
    Bind {
        address: Address,
        reason: String,
    },

    #[error("error decoding message type {msg_type}: {reason}")]
    Decode {
        msg_type: MessageTypeId,
        reason: String,
    },

    #[error("no decoder registered for message type {0}")]
    UnknownMessageType(MessageTypeId),

    #[error("error receiving message: {0}")]
    ReceivePanic(String),

    #[error("message of {len} bytes exceeds the maximum of {max} bytes")]
    MessageTooLarge {
        len: usize,
        max: usize,
    },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid network configuration: {0}")]
    InvalidConfig(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

impl TransportError {
    /// Only transient errors are worth retrying at a higher layer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Temporary(_) | TransportError::Timeout(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::Closed)
    }
}

/// Maps an I/O error to the domain error kinds, first by its [io::ErrorKind] and falling back to
///  the error message for errors the OS reports without a specific kind.
pub fn classify_io_error(err: &io::Error) -> TransportError {
    use io::ErrorKind::*;

    match err.kind() {
        BrokenPipe | ConnectionReset | ConnectionAborted | NotConnected => return TransportError::Closed,
        UnexpectedEof => return TransportError::Eof,
        WouldBlock | Interrupted => return TransportError::Temporary(err.to_string()),
        TimedOut => return TransportError::Timeout(err.to_string()),
        _ => {}
    }

    let msg = err.to_string().to_lowercase();
    if msg.contains("use of closed") || msg.contains("broken pipe") {
        TransportError::Closed
    }
    else if msg.contains("canceled") || msg.contains("cancelled") {
        TransportError::Canceled
    }
    else if msg.contains("eof") {
        TransportError::Eof
    }
    else {
        TransportError::Unknown(err.to_string())
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        classify_io_error(&err)
    }
}
