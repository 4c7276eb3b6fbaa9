//! Per-module error leaves, composed upward into `CentralError`.

use thiserror::Error;

/// Errors raised while decoding or encoding a wire frame.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CodecError {
    #[error("frame too short: need at least 9 bytes, got {0}")]
    TooShort(usize),
    #[error("length byte {declared} does not match body: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        declared: u8,
        expected: usize,
        actual: usize,
    },
    #[error("payload exceeds 54 bytes ({0})")]
    PayloadTooLong(usize),
    #[error("sub-byte field at byte {byte_offset} bit {bit_offset} size {bit_size} straddles the payload end")]
    FieldOutOfRange {
        byte_offset: u8,
        bit_offset: u8,
        bit_size: u16,
    },
    #[error("invalid hex text: {0}")]
    InvalidHex(String),
}

/// Errors raised by the message-registry access check.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum AccessError {
    #[error("no descriptor matched this packet")]
    NoDescriptor,
    #[error("access denied by access mask")]
    Denied,
}

/// Errors raised by packet-queue operations.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum QueueError {
    #[error("queue has no active peer")]
    NoPeer,
    #[error("queue exhausted retries without a match")]
    RetriesExhausted,
    #[error("no physical interface bound to this queue")]
    NoInterface,
}

/// Errors raised by a `RadioInterface` implementation.
#[derive(Debug, Error)]
pub enum InterfaceError {
    #[error("interface is not open")]
    NotOpen,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("duty cycle limit reached (LOVF)")]
    DutyCycleLimit,
    #[error("RPC fault {code}: {message}")]
    RpcFault { code: i32, message: String },
    #[error("gateway response timed out")]
    Timeout,
    #[cfg(feature = "gateway")]
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
}

/// Top-level error type surfaced by `Central` operations to RPC callers.
#[derive(Debug, Error)]
pub enum CentralError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Interface(#[from] InterfaceError),
    #[error("unknown device or channel")]
    UnknownDevice,
    #[error("unknown paramset, or device not paired")]
    UnknownParamset,
    #[error("unknown parameter, or empty input")]
    UnknownParameter,
    #[error("parameter is not settable or not supported")]
    NotSettable,
    #[error("no answer from device")]
    NoAnswer,
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("unknown application error: {0}")]
    Other(String),
}

impl CentralError {
    /// Maps to the exit/RPC error codes
    pub fn rpc_code(&self) -> i32 {
        match self {
            CentralError::NoAnswer => -1,
            CentralError::UnknownDevice => -2,
            CentralError::UnknownParamset => -3,
            CentralError::UnknownParameter => -5,
            CentralError::NotSettable => -6,
            CentralError::Other(_) => -32500,
            _ => -32500,
        }
    }
}

pub type Result<T, E = CentralError> = std::result::Result<T, E>;
