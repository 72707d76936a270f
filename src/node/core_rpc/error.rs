//! Errors surfaced by the Bitcoin Core JSON-RPC transport.
//!
//! Mirrors the shape `reqwest`/the RPC server can actually produce; the
//! [`super::client::Client::call`] retry loop matches on the recoverable
//! variants (`MalformedResponse`, `Connection`, `Timeout`, `Request`) and
//! gives up after `max_retries`, returning [`ClientError::MaxRetriesExceeded`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The `error` field of a `bitcoind` JSON-RPC response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BitcoinRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid parameter: {0}")]
    Param(String),

    #[error("{0}")]
    Other(String),

    #[error("server returned error {0}: {1}")]
    Server(i64, String),

    #[error("HTTP status {0}: {1}")]
    Status(u16, String),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("request body error: {0}")]
    Body(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out")]
    Timeout,

    #[error("request error: {0}")]
    Request(String),

    #[error("failed to build request: {0}")]
    ReqBuilder(String),

    #[error("unexpected HTTP redirect: {0}")]
    HttpRedirect(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("exceeded {0} retries")]
    MaxRetriesExceeded(u8),
}
