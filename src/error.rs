use crate::{connection::Phase, messages::backend::MessageCode, messages::PgErrorResponse};

pub type Result<T> = std::result::Result<T, Error>;

/// The error type for decoding, protocol sequencing and transport
/// failures encountered while driving a Postgres connection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A frame or field is malformed in a way that desynchronizes the stream.
    #[error("framing error: {0}")]
    Framing(&'static str),
    #[error("truncated buffer: needed {needed} bytes but only {remaining} remain")]
    TruncatedBuffer { needed: usize, remaining: usize },
    #[error("invalid UTF-8 in message: {0}")]
    Decode(#[from] std::str::Utf8Error),
    #[error("invalid {type_name} value: {reason}")]
    InvalidValue {
        type_name: &'static str,
        reason: String,
    },
    /// A message arrived in a phase that does not expect it.
    #[error("unexpected {message} while {phase}")]
    ProtocolSequence { message: MessageCode, phase: Phase },
    /// The caller asked for something the current phase does not allow.
    #[error("operation not permitted while {phase}")]
    ProtocolState { phase: Phase },
    /// Query text cannot carry a NUL byte inside a Query message.
    #[error("query text contains a NUL byte")]
    NulInQuery,
    #[error("unsupported authentication method {0}")]
    UnsupportedAuthMethod(i32),
    #[error("unsupported column type oid {0}")]
    UnsupportedType(u32),
    #[error("unknown message type 0x{0:02x}")]
    UnknownMessageType(u8),
    #[error("password is required")]
    PasswordRequired,
    #[error("encountered Postgres error response: {0}")]
    Server(PgErrorResponse),
    #[error("encountered I/O error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("connection closed by server")]
    ConnectionClosed,
}

impl Error {
    /// Returns true when the connection can no longer be trusted and
    /// should be abandoned rather than driven further.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Framing(_)
                | Error::TruncatedBuffer { .. }
                | Error::Decode(_)
                | Error::ProtocolSequence { .. }
                | Error::UnknownMessageType(_)
                | Error::Transport(_)
                | Error::ConnectionClosed
        )
    }
}
