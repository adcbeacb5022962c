// ABOUTME: Crate-wide error type for the gateway: protocol, transport, store and wiring failures
// ABOUTME: Wire-level decoding errors stay in codec::CodecError and convert in via From

use crate::codec::CodecError;
use crate::datatypes::CommandStatus;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// I/O error during network operations (connect, read, write)
    #[error("Connection error: {0}")]
    Io(#[from] io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The peer answered with a non-OK command_status
    #[error("Protocol error: {0}")]
    Protocol(CommandStatus),

    #[error("Operation timeout")]
    Timeout,

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    #[error("Vendor connector not connected")]
    NotConnected,

    #[error("Unexpected PDU: expected {expected}, got {actual}")]
    UnexpectedPdu { expected: String, actual: String },

    /// A listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Vendor not found: {0}")]
    VendorNotFound(String),

    #[error("No vendor available for routing")]
    NoVendorAvailable,

    #[error("No active receiver session for customer {0}")]
    NoReceiverSession(String),

    #[error("DLR queue full for customer {0}")]
    DlrQueueFull(String),

    #[error("Rate limit store error: {0}")]
    RateLimitStore(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("DLR tracker error: {0}")]
    Tracker(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<redis::RedisError> for GatewayError {
    fn from(err: redis::RedisError) -> Self {
        GatewayError::RateLimitStore(err.to_string())
    }
}

impl From<tokio_postgres::Error> for GatewayError {
    fn from(err: tokio_postgres::Error) -> Self {
        GatewayError::Database(err.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for GatewayError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        GatewayError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Tracker(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for GatewayError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        GatewayError::Timeout
    }
}
