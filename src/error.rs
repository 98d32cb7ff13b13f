//! Error types for keeponline
//!
//! This module defines the error types used throughout the crate.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.

use thiserror::Error;

/// Errors reported by an [`AccountClient`](crate::telegram::AccountClient).
///
/// The heartbeat loop never inspects these directly; it asks
/// [`classify`](crate::heartbeat::classify) which bucket an error falls into.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Transport-level failures: dropped connection, I/O, failed dial.
    #[error("Connection error: {0}")]
    Connection(String),

    /// An RPC error returned by the server.
    #[error("RPC error {code}: {name}")]
    Rpc { code: i32, name: String },

    /// The session is not (or no longer) authorized.
    #[error("Authorization error: {0}")]
    Auth(String),

    /// Anything the adapter could not classify further.
    #[error("{0}")]
    Other(String),
}

/// The primary error type for keeponline operations.
#[derive(Error, Debug)]
pub enum KeepOnlineError {
    /// Missing or malformed settings (api id, api hash, session token).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Login could not be completed or the stored session was rejected.
    #[error("Authorization failed: {0}")]
    Auth(String),

    /// Errors surfaced by the Telegram client.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Session lock or session file problems.
    #[error("Session error: {0}")]
    Session(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` type for keeponline operations.
pub type Result<T> = std::result::Result<T, KeepOnlineError>;
