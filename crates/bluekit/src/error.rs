//! Error types for the bluekit library
//!
//! Wire-level ATT failures are represented by [`crate::att::AttError`] and
//! become Error Response PDUs inside the server. The types here cover
//! failures that surface through the public API instead.

use thiserror::Error;

/// General errors that can occur in the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection {0} not found")]
    NotConnected(u16),

    #[error("Peer on connection {conn_handle} has not subscribed to handle {handle}")]
    NotSubscribed { conn_handle: u16, handle: u16 },

    #[error("An indication is already outstanding on connection {0}")]
    IndicationPending(u16),

    #[error("Attribute handle space exhausted")]
    HandleSpaceExhausted,

    #[error("Unknown attribute handle: {0}")]
    UnknownHandle(u16),

    #[error("Input truncated while decoding")]
    TruncatedInput,

    #[error("Advertising payload of {0} bytes exceeds the 31 byte limit")]
    AdvertisingDataTooLong(usize),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("ATT error: {0}")]
    Att(#[from] crate::att::AttError),

    #[error("Scan error: {0}")]
    Scan(#[from] crate::hci::advertising::ScanError),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type used throughout the library API
pub type Result<T> = std::result::Result<T, Error>;
