//! The control channel error type.

use derive_more::Display;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error raised while servicing a control connection.
#[derive(Debug, Error)]
#[error("control channel error: {kind}")]
pub struct ControlChanError {
    kind: ControlChanErrorKind,
    #[source]
    source: Option<BoxError>,
}

/// Categories of control channel errors.
#[derive(Eq, PartialEq, Debug, Display)]
pub enum ControlChanErrorKind {
    /// We encountered a system IO error.
    #[display("Failed to perform IO")]
    IoError,
    /// We encountered a non-UTF8 character in the command.
    #[display("Non-UTF8 character in command")]
    Utf8Error,
    /// The client issued a command we don't know about.
    #[display("Unknown command: {}", command)]
    UnknownCommand {
        /// The verb we don't know.
        command: String,
    },
    /// The client issued a known command in an invalid way.
    #[display("Invalid command (invalid parameter)")]
    InvalidCommand,
    /// A control line exceeded the 8 KiB buffer.
    #[display("Command line too long")]
    LineTooLong,
    /// The control channel is out of sync, e.g. a TLS upgrade was started
    /// with no stream present.
    #[display("Control channel in illegal state")]
    IllegalState,
    /// The TLS handshake failed; the connection must close.
    #[display("TLS handshake failed")]
    TlsHandshake,
}

impl ControlChanError {
    /// A new error of the given kind without an underlying cause.
    pub fn new(kind: ControlChanErrorKind) -> ControlChanError {
        ControlChanError { kind, source: None }
    }

    /// A new error wrapping an underlying cause.
    pub fn with_source<E: Into<BoxError>>(kind: ControlChanErrorKind, source: E) -> ControlChanError {
        ControlChanError {
            kind,
            source: Some(source.into()),
        }
    }

    /// The error kind.
    pub fn kind(&self) -> &ControlChanErrorKind {
        &self.kind
    }
}

impl From<ControlChanErrorKind> for ControlChanError {
    fn from(kind: ControlChanErrorKind) -> ControlChanError {
        ControlChanError { kind, source: None }
    }
}

impl From<std::io::Error> for ControlChanError {
    fn from(err: std::io::Error) -> ControlChanError {
        ControlChanError::with_source(ControlChanErrorKind::IoError, err)
    }
}

impl From<std::str::Utf8Error> for ControlChanError {
    fn from(err: std::str::Utf8Error) -> ControlChanError {
        ControlChanError::with_source(ControlChanErrorKind::Utf8Error, err)
    }
}
