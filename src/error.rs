//! Errors returned by client operations.
use redis::RedisError;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure: dialing, a broken pipe, or a dropped
    /// connection. Never retried by the client.
    #[error("connection error: {0}")]
    Connection(#[source] RedisError),
    /// No job became available before the configured timeout elapsed.
    #[error("timed out")]
    Timeout,
    /// The caller misused an operation; no request was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The broker's reply didn't have the shape expected for the operation,
    /// typically because of a protocol or broker version mismatch.
    #[error("unexpected reply: {field}")]
    InvalidReply { field: &'static str },
    /// The broker replied with nil where data was required.
    #[error("no data available")]
    NoData,
    /// The broker rejected the command, e.g. `MAXLEN` or `NOREPL`.
    #[error("broker error: {code} {message}")]
    Broker { code: String, message: String },
    /// The pool has no free connection and is configured not to wait.
    #[error("connection pool exhausted")]
    PoolExhausted,
    #[error("connection pool closed")]
    PoolClosed,
}

impl Error {
    pub(crate) fn invalid_reply(field: &'static str) -> Self {
        Self::InvalidReply { field }
    }

    /// Whether this error means the connection it came from can't be reused.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<RedisError> for Error {
    fn from(error: RedisError) -> Self {
        // Only replies the broker sent as `-CODE message` carry a code.
        match error.code() {
            Some(code) => Self::Broker {
                code: code.to_owned(),
                message: error.detail().unwrap_or_default().to_owned(),
            },
            None => Self::Connection(error),
        }
    }
}
