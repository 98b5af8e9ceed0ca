//! Error types for the voice relay

use std::net::SocketAddr;
use thiserror::Error;

/// Main error type for the relay
#[derive(Error, Debug)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(#[from] DecodeError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire decoding errors
///
/// Produced for malformed or truncated datagrams. The relay discards the
/// datagram and keeps serving.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Truncated packet: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("Negative length prefix: {0}")]
    NegativeLength(i32),

    #[error("String field is not valid UTF-8")]
    InvalidUtf8,

    #[error("Unknown control message type: {0:?}")]
    UnknownControlType(String),

    #[error("Server port out of range: {0}")]
    InvalidPort(i32),

    #[error("Invalid server address: {0:?}")]
    InvalidAddress(String),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed on {addr}: {reason}")]
    BindFailed { addr: SocketAddr, reason: String },

    #[error("Send to {to} failed: {reason}")]
    SendFailed { to: SocketAddr, reason: String },

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("No server endpoint resolved, handshake required")]
    NotConnected,

    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("Timeout")]
    Timeout,
}

/// Configuration errors, fatal to startup only
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("max_range must be a finite value greater than zero, got {0}")]
    InvalidMaxRange(f32),

    #[error("Invalid listening port: {0}")]
    InvalidPort(u16),

    #[error("position_sync_ms must be greater than zero")]
    InvalidSyncInterval,

    #[error("Failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Result type alias for the relay
pub type Result<T> = std::result::Result<T, Error>;
