//! Error types shared across the proxy.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// A DNS message that could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("message truncated")]
    Truncated,

    #[error("expected a query, got a response")]
    NotAQuery,

    #[error("expected a response, got a query")]
    NotAResponse,

    #[error("expected exactly one question, got {0}")]
    QuestionCount(u16),

    #[error("invalid label in question name")]
    BadLabel,

    #[error("name exceeds 255 bytes")]
    NameTooLong,

    #[error("invalid compression pointer at offset {0}")]
    BadPointer(usize),
}

/// Failure of a single upstream query.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("malformed reply: {0}")]
    Malformed(#[from] WireError),

    #[error("no name servers configured")]
    NoServers,
}

/// Invalid command line configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid name server address: {0}")]
    InvalidServer(String),

    #[error("resolver group is empty")]
    EmptyGroup,
}
