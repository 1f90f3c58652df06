//! Typed error enums for each subsystem, following the teacher's
//! one-`thiserror`-enum-per-concern layout.

use thiserror::Error;

/// Failures raised while tokenizing a request line, header line, or
/// form body.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum ParseError {
    /// The method token wasn't one of the recognized verbs.
    #[error("unrecognized method")]
    Method,
    /// The request target was empty, or not a valid `origin-form`.
    #[error("malformed request target")]
    Target,
    /// The version token wasn't `HTTP/1.0` or `HTTP/1.1`.
    #[error("unsupported HTTP version")]
    Version,
    /// A header line had no `:` separator.
    #[error("malformed header line")]
    HeaderName,
    /// A header value contained a disallowed control character.
    #[error("malformed header value")]
    HeaderValue,
    /// Expected `\r\n` but found something else.
    #[error("expected CRLF")]
    NewLine,
    /// Request line, headers, or body exceeded the configured limit.
    #[error("request exceeded configured size limit")]
    TooLarge,
}

/// Failures raised while building or sending a response.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// Underlying I/O failure while reading or mapping a file.
    #[error("response I/O failure: {0}")]
    Io(#[from] std::io::Error),
    /// The resolved path escaped the configured document root.
    #[error("path escapes document root")]
    PathTraversal,
    /// The requested path doesn't exist, or isn't a regular file.
    #[error("requested resource was not found")]
    NotFound,
}

/// Failures raised by the reactor's accept/poll/dispatch loop.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// Underlying I/O failure on the listening or a client socket.
    #[error("reactor I/O failure: {0}")]
    Io(#[from] std::io::Error),
    /// The connection slab has no free slot and the accept loop must
    /// shed the new connection.
    #[error("connection table exhausted (limit {0})")]
    TableFull(usize),
}

/// Failures raised by the database connection pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Underlying MySQL client failure.
    #[error("database error: {0}")]
    Mysql(#[from] mysql::Error),
    /// The pool was closed while a caller was waiting for a connection.
    #[error("connection pool is shutting down")]
    Closed,
}
