// error.rs

use crate::*;

/// Failures of one request/response exchange with the meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame checksum mismatch (read {read:04X}, calc {calc:04X})")]
    Checksum { read: u16, calc: u16 },
    #[error("frame timeout: got {got} of {want} bytes")]
    FrameTimeout { got: usize, want: usize },
    #[error("serial link closed")]
    LinkClosed,
    #[error("serial link i/o error: {0:?}")]
    Io(std::io::ErrorKind),
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        ProtocolError::Io(e.kind())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    #[error("command {pending:?} still pending, {rejected:?} not accepted")]
    Busy { pending: Command, rejected: Command },
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error("credential too long: {field} is {len} bytes, max {max}")]
    CredentialTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Message(String),
}

pub type AppResult<T> = Result<T, AppError>;

// EOF
