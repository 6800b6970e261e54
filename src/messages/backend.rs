//! Logic for handling and representing Postgres backend messages.

use bytes::Bytes;

use crate::{Error, Result};

// Postgres won't allocate memory greater 1GiB. It probably won't
// write messages anywhere close to this size either, but this
// gives us a nice upper bound to prevent misbehaving servers
// from OOMing the client.
// <https://github.com/postgres/postgres/blob/879c492480d0e9ad8155c4269f95c5e8add41901/src/include/utils/memutils.h#L40>
pub const MAX_FRAME_SIZE_BYTES: usize = 1 << 30; // 1GiB

/// Size of the tag byte plus the length field that start every backend frame.
pub const HEADER_LEN: usize = 5;

/// Postgres backend messages are framed by a 1 byte message code,
/// followed by an i32 delineating the length of the rest of
/// the message.
///
/// The message code identifies the type of message and format of its
/// payload.
///
/// For more information, see the official Postgres docs:
/// <https://www.postgresql.org/docs/current/protocol-message-formats.html>
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageCode(u8);

impl MessageCode {
    pub const AUTHENTICATION: Self = Self(b'R');
    pub const BACKEND_KEY_DATA: Self = Self(b'K');
    pub const BIND_COMPLETE: Self = Self(b'2');
    pub const CLOSE_COMPLETE: Self = Self(b'3');
    pub const COMMAND_COMPLETE: Self = Self(b'C');
    pub const COPY_DATA: Self = Self(b'd');
    pub const COPY_DONE: Self = Self(b'c');
    pub const COPY_IN_RESPONSE: Self = Self(b'G');
    pub const COPY_OUT_RESPONSE: Self = Self(b'H');
    pub const COPY_BOTH_RESPONSE: Self = Self(b'W');
    pub const DATA_ROW: Self = Self(b'D');
    pub const EMPTY_QUERY_RESPONSE: Self = Self(b'I');
    pub const ERROR_RESPONSE: Self = Self(b'E');
    pub const FUNCTION_CALL_RESPONSE: Self = Self(b'V');
    pub const NEGOTIATE_PROTOCOL_VERSION: Self = Self(b'v');
    pub const NO_DATA: Self = Self(b'n');
    pub const NOTICE_RESPONSE: Self = Self(b'N');
    pub const NOTIFICATION_RESPONSE: Self = Self(b'A');
    pub const PARAMETER_DESCRIPTION: Self = Self(b't');
    pub const PARAMETER_STATUS: Self = Self(b'S');
    pub const PARSE_COMPLETE: Self = Self(b'1');
    pub const PORTAL_SUSPENDED: Self = Self(b's');
    pub const READY_FOR_QUERY: Self = Self(b'Z');
    pub const ROW_DESCRIPTION: Self = Self(b'T');

    const KNOWN: [Self; 24] = [
        Self::AUTHENTICATION,
        Self::BACKEND_KEY_DATA,
        Self::BIND_COMPLETE,
        Self::CLOSE_COMPLETE,
        Self::COMMAND_COMPLETE,
        Self::COPY_DATA,
        Self::COPY_DONE,
        Self::COPY_IN_RESPONSE,
        Self::COPY_OUT_RESPONSE,
        Self::COPY_BOTH_RESPONSE,
        Self::DATA_ROW,
        Self::EMPTY_QUERY_RESPONSE,
        Self::ERROR_RESPONSE,
        Self::FUNCTION_CALL_RESPONSE,
        Self::NEGOTIATE_PROTOCOL_VERSION,
        Self::NO_DATA,
        Self::NOTICE_RESPONSE,
        Self::NOTIFICATION_RESPONSE,
        Self::PARAMETER_DESCRIPTION,
        Self::PARAMETER_STATUS,
        Self::PARSE_COMPLETE,
        Self::PORTAL_SUSPENDED,
        Self::READY_FOR_QUERY,
        Self::ROW_DESCRIPTION,
    ];

    /// Whether this code belongs to the documented set of backend messages.
    pub fn is_known(self) -> bool {
        Self::KNOWN.contains(&self)
    }
}

impl From<u8> for MessageCode {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<MessageCode> for u8 {
    fn from(value: MessageCode) -> Self {
        value.0
    }
}

impl PartialEq<u8> for MessageCode {
    fn eq(&self, other: &u8) -> bool {
        self.0 == *other
    }
}

impl PartialEq<MessageCode> for u8 {
    fn eq(&self, other: &MessageCode) -> bool {
        *self == other.0
    }
}

impl std::fmt::Display for MessageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match *self {
            MessageCode::AUTHENTICATION => "Authentication",
            MessageCode::BACKEND_KEY_DATA => "BackendKeyData",
            MessageCode::BIND_COMPLETE => "BindComplete",
            MessageCode::CLOSE_COMPLETE => "CloseComplete",
            MessageCode::COMMAND_COMPLETE => "CommandComplete",
            MessageCode::COPY_DATA => "CopyData",
            MessageCode::COPY_DONE => "CopyDone",
            MessageCode::COPY_IN_RESPONSE => "CopyInResponse",
            MessageCode::COPY_OUT_RESPONSE => "CopyOutResponse",
            MessageCode::COPY_BOTH_RESPONSE => "CopyBothResponse",
            MessageCode::DATA_ROW => "DataRow",
            MessageCode::EMPTY_QUERY_RESPONSE => "EmptyQueryResponse",
            MessageCode::ERROR_RESPONSE => "ErrorResponse",
            MessageCode::FUNCTION_CALL_RESPONSE => "FunctionCallResponse",
            MessageCode::NEGOTIATE_PROTOCOL_VERSION => "NegotiateProtocolVersion",
            MessageCode::NO_DATA => "NoData",
            MessageCode::NOTICE_RESPONSE => "NoticeResponse",
            MessageCode::NOTIFICATION_RESPONSE => "NotificationResponse",
            MessageCode::PARAMETER_DESCRIPTION => "ParameterDescription",
            MessageCode::PARAMETER_STATUS => "ParameterStatus",
            MessageCode::PARSE_COMPLETE => "ParseComplete",
            MessageCode::PORTAL_SUSPENDED => "PortalSuspended",
            MessageCode::READY_FOR_QUERY => "ReadyForQuery",
            MessageCode::ROW_DESCRIPTION => "RowDescription",
            _ => "Unknown",
        };
        write!(f, "{name}({})", self.0 as char)
    }
}

impl std::fmt::Debug for MessageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageCode({})", self.0 as char)
    }
}

/// The 5 byte prefix of every backend message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub code: MessageCode,
    /// Counts the length field itself but not the tag byte.
    pub declared_len: i32,
}

impl FrameHeader {
    /// Parses a header from exactly [`HEADER_LEN`] bytes.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let Ok(header) = <[u8; HEADER_LEN]>::try_from(buf) else {
            return Err(Error::Framing("frame header must be exactly 5 bytes"));
        };
        let [code, len @ ..] = header;
        let declared_len = i32::from_be_bytes(len);

        if declared_len < size_of::<i32>() as i32 {
            return Err(Error::Framing("declared frame length is smaller than 4"));
        }
        if declared_len as usize - size_of::<i32>() > MAX_FRAME_SIZE_BYTES {
            return Err(Error::Framing("frame size exceeds 1GiB"));
        }

        Ok(Self {
            code: code.into(),
            declared_len,
        })
    }

    /// Number of payload bytes that follow the header.
    pub fn payload_len(&self) -> usize {
        self.declared_len as usize - size_of::<i32>()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgFrame {
    pub code: MessageCode,
    pub body: Bytes,
}

impl PgFrame {
    pub fn new(code: impl Into<MessageCode>, body: impl Into<Bytes>) -> Self {
        Self {
            code: code.into(),
            body: body.into(),
        }
    }

    /// Builds a frame from a header and its already collected payload.
    pub fn from_parts(header: FrameHeader, body: impl Into<Bytes>) -> Result<Self> {
        let body = body.into();
        if body.len() != header.payload_len() {
            return Err(Error::TruncatedBuffer {
                needed: header.payload_len(),
                remaining: body.len(),
            });
        }
        Ok(Self::new(header.code, body))
    }

    /// Decodes one complete frame (header and payload) from the front of
    /// `buf`, returning it with the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let Some(header) = buf.get(..HEADER_LEN) else {
            return Err(Error::Framing("frame header must be exactly 5 bytes"));
        };
        let header = FrameHeader::parse(header)?;
        let end = HEADER_LEN + header.payload_len();
        let Some(body) = buf.get(HEADER_LEN..end) else {
            return Err(Error::TruncatedBuffer {
                needed: header.payload_len(),
                remaining: buf.len() - HEADER_LEN,
            });
        };
        Ok((Self::new(header.code, Bytes::copy_from_slice(body)), end))
    }
}

impl std::fmt::Display for PgFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:?}", self.code, self.body)
    }
}
