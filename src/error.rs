use thiserror::Error;

use crate::protocol::pdu::{CloseReason, Diagnostic};
use crate::session::SessionState;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(std::io::Error),

    #[error("Timed out waiting for the server")]
    Timeout,

    /// Not a failure: the buffer ends before the PDU does.
    #[error("Incomplete PDU: need at least {needed} more bytes")]
    Incomplete { needed: usize },

    #[error("Malformed PDU: {0}")]
    MalformedPdu(String),

    #[error("Unexpected PDU: expected {expected}, got {actual}")]
    UnexpectedPdu {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Connection rejected by server{}", fmt_message(.message))]
    ConnectionRejected { message: Option<String> },

    #[error("Connection closed by server ({reason:?}){}", fmt_message(.message))]
    ClosedByPeer {
        reason: CloseReason,
        message: Option<String>,
    },

    #[error("Search failed: {}", fmt_diagnostic(.code, .add_info))]
    SearchFailed { code: i64, add_info: Option<String> },

    #[error("Present failed: {}", fmt_diagnostic(.code, .add_info))]
    PresentFailed { code: i64, add_info: Option<String> },

    #[error("Record diagnostic: {0}")]
    SurrogateDiagnostic(Diagnostic),

    #[error("Server returned no record for position {position}")]
    NoRecord { position: usize },

    #[error("Unsupported query type: {0}")]
    UnsupportedQueryType(String),

    #[error("Query parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Position out of range (result set size {size})")]
    OutOfRange { size: usize },

    #[error("Unknown record syntax: {0}")]
    UnknownSyntax(String),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Cannot {operation} while session is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Result set was replaced or belongs to another session")]
    StaleResultSet,

    #[error("Bad config error: {0}")]
    BadConfigError(String),
}

/// A PQF syntax error pointing at the first offending byte of the query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

impl Error {
    /// Whether the error leaves the transport unusable. The session closes
    /// itself when one of these escapes an exchange.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::Timeout
                | Error::Incomplete { .. }
                | Error::MalformedPdu(_)
                | Error::UnexpectedPdu { .. }
                | Error::ConnectionRejected { .. }
                | Error::ClosedByPeer { .. }
        )
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Error::MalformedPdu(reason.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Error::Timeout,
            _ => Error::Transport(err),
        }
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

fn fmt_diagnostic(code: &i64, add_info: &Option<String>) -> String {
    Diagnostic::describe(*code, add_info.as_deref())
}

fn fmt_message(message: &Option<String>) -> String {
    match message {
        Some(message) => format!(": {message}"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
