//! Logic for building Postgres frontend messages.

use bytes::{BufMut, Bytes, BytesMut};

/// Postgres frontend messages are framed by a 1 byte message code,
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
    pub const PASSWORD_MESSAGE: Self = Self(b'p');
    pub const QUERY: Self = Self(b'Q');
    pub const TERMINATE: Self = Self(b'X');

    #[inline]
    pub fn frame(self, buf: &mut BytesMut, payload_fn: impl FnOnce(&mut BytesMut)) {
        buf.put_u8(self.0);
        frame(buf, payload_fn);
    }
}

impl From<MessageCode> for u8 {
    fn from(value: MessageCode) -> Self {
        value.0
    }
}

impl std::fmt::Display for MessageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match *self {
            MessageCode::PASSWORD_MESSAGE => "PasswordMessage",
            MessageCode::QUERY => "Query",
            MessageCode::TERMINATE => "Terminate",
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

/// Writes a length-prefixed frame. The length counts itself and the
/// payload written by `payload_fn`, never a preceding tag byte.
#[inline]
pub fn frame(buf: &mut BytesMut, payload_fn: impl FnOnce(&mut BytesMut)) {
    let base = buf.len();
    buf.put_i32(0);

    payload_fn(buf);

    let len = (buf.len() - base) as i32;
    buf[base..base + size_of::<i32>()].copy_from_slice(&len.to_be_bytes());
}

#[inline]
pub fn put_cstring(buf: &mut impl BufMut, s: &[u8]) {
    buf.put_slice(s);
    buf.put_u8(0);
}

/// The untagged StartupMessage: protocol version followed by
/// `name\0value\0` pairs in the given order and a closing null byte.
pub fn startup<K, V>(major: u16, minor: u16, params: &[(K, V)]) -> Bytes
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut buf = BytesMut::new();
    frame(&mut buf, |b| {
        b.put_u16(major);
        b.put_u16(minor);
        for (name, value) in params {
            put_cstring(b, name.as_ref().as_bytes());
            put_cstring(b, value.as_ref().as_bytes());
        }
        b.put_u8(0);
    });
    buf.freeze()
}

pub fn termination() -> Bytes {
    let mut buf = BytesMut::with_capacity(5);
    MessageCode::TERMINATE.frame(&mut buf, |_| {});
    buf.freeze()
}

/// Encodes a Query message.
///
/// The text is written as a C string, so a NUL byte inside `stmt` ends the
/// query early on the server. [`Connection::submit_query`] rejects such text.
///
/// [`Connection::submit_query`]: crate::Connection::submit_query
pub fn simple_query(stmt: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(stmt.len() + 6);
    MessageCode::QUERY.frame(&mut buf, |b| put_cstring(b, stmt.as_bytes()));
    buf.freeze()
}

/// PasswordMessage answering an AuthenticationMD5Password challenge.
///
/// The payload is `"md5" + hex(md5(hex(md5(password + user)) + salt))`.
pub fn password_response_md5(user: &str, password: &str, salt: [u8; 4]) -> Bytes {
    let digest = md5_password(user, password, salt);
    let mut buf = BytesMut::with_capacity(digest.len() + 6);
    MessageCode::PASSWORD_MESSAGE.frame(&mut buf, |b| put_cstring(b, digest.as_bytes()));
    buf.freeze()
}

fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let mut inner = md5::Context::new();
    inner.consume(password.as_bytes());
    inner.consume(user.as_bytes());
    let inner_hex = format!("{:x}", inner.compute());

    let mut outer = md5::Context::new();
    outer.consume(inner_hex.as_bytes());
    outer.consume(salt);
    format!("md5{:x}", outer.compute())
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};

    use super::*;

    #[test]
    fn test_startup() {
        let msg = startup(3, 0, &[("user", "alice"), ("database", "db1")]);

        let params = b"user\0alice\0database\0db1\0\0";
        let mut expected = BytesMut::new();
        expected.put_i32(4 + 4 + params.len() as i32);
        expected.put_u16(3);
        expected.put_u16(0);
        expected.put_slice(params);

        assert_eq!(msg, expected.freeze());
    }

    #[test]
    fn test_startup_keeps_parameter_order() {
        let msg = startup(3, 0, &[("database", "db1"), ("user", "alice")]);
        assert_eq!(&msg[8..], b"database\0db1\0user\0alice\0\0");
    }

    #[test]
    fn test_startup_no_params() {
        let msg = startup(3, 0, &[] as &[(&str, &str)]);
        assert_eq!(msg.as_ref(), &[0, 0, 0, 9, 0, 3, 0, 0, 0]);
    }

    #[test]
    fn test_termination() {
        assert_eq!(termination().as_ref(), &[b'X', 0, 0, 0, 4]);
    }

    #[test]
    fn test_simple_query() {
        let mut expected = BytesMut::new();
        expected.put_u8(b'Q');
        expected.put_i32(13);
        expected.put(&b"SELECT 1\0"[..]);

        assert_eq!(simple_query("SELECT 1"), expected.freeze());
    }

    #[test]
    fn test_simple_query_counts_utf8_bytes() {
        let msg = simple_query("SELECT 'λ'");
        // 'λ' is two bytes in UTF-8
        assert_eq!(&msg[1..5], &(4 + 11 + 1i32).to_be_bytes());
    }

    #[test]
    fn test_md5_password_formula() {
        let salt = [0x01, 0x02, 0x03, 0x04];
        let inner = format!("{:x}", md5::compute(b"secretalice"));
        let mut outer = inner.into_bytes();
        outer.extend_from_slice(&salt);
        let expected = format!("md5{:x}", md5::compute(&outer));

        assert_eq!(md5_password("alice", "secret", salt), expected);
    }

    #[test]
    fn test_password_response_md5() {
        let salt = [0x01, 0x02, 0x03, 0x04];
        let msg = password_response_md5("alice", "secret", salt);

        assert_eq!(msg[0], b'p');
        assert_eq!(&msg[1..5], &(4 + 3 + 32 + 1i32).to_be_bytes());
        assert_eq!(&msg[5..8], b"md5");
        assert!(msg[8..40].iter().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(msg[40], 0);
        assert_eq!(msg, password_response_md5("alice", "secret", salt));
    }

    #[test]
    fn test_password_response_depends_on_salt() {
        assert_ne!(
            password_response_md5("alice", "secret", [1, 2, 3, 4]),
            password_response_md5("alice", "secret", [4, 3, 2, 1])
        );
    }
}
