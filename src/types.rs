//! Decoding of column values by type OID.
//!
//! Only a small, closed set of types is understood. Anything else is
//! reported as [`Error::UnsupportedType`] instead of leaking raw bytes.

use bytes::Bytes;

use crate::{Error, Result};

/// Column value format as advertised in a RowDescription.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatCode {
    Text = 0,
    Binary = 1,
}

impl TryFrom<i16> for FormatCode {
    type Error = Error;

    fn try_from(value: i16) -> Result<Self> {
        match value {
            0 => Ok(FormatCode::Text),
            1 => Ok(FormatCode::Binary),
            _ => Err(Error::Framing("format code must be 0 or 1")),
        }
    }
}

/// The column types this crate knows how to decode.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Bool = 16,
    Bytea = 17,
    Name = 19,
    Int8 = 20,
    Int2 = 21,
    Int4 = 23,
    Text = 25,
    Oid = 26,
    Bpchar = 1042,
    Varchar = 1043,
}

impl TypeKind {
    pub fn from_oid(oid: u32) -> Result<Self> {
        let kind = match oid {
            16 => TypeKind::Bool,
            17 => TypeKind::Bytea,
            19 => TypeKind::Name,
            20 => TypeKind::Int8,
            21 => TypeKind::Int2,
            23 => TypeKind::Int4,
            25 => TypeKind::Text,
            26 => TypeKind::Oid,
            1042 => TypeKind::Bpchar,
            1043 => TypeKind::Varchar,
            _ => return Err(Error::UnsupportedType(oid)),
        };
        Ok(kind)
    }

    pub fn oid(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeKind::Bool => "bool",
            TypeKind::Bytea => "bytea",
            TypeKind::Name => "name",
            TypeKind::Int8 => "int8",
            TypeKind::Int2 => "int2",
            TypeKind::Int4 => "int4",
            TypeKind::Text => "text",
            TypeKind::Oid => "oid",
            TypeKind::Bpchar => "bpchar",
            TypeKind::Varchar => "varchar",
        }
    }

    /// Decodes one non-null column value.
    pub fn decode(self, format: FormatCode, raw: &[u8]) -> Result<Value> {
        match (self, format) {
            (TypeKind::Bool, FormatCode::Text) => match raw {
                b"t" => Ok(Value::Bool(true)),
                b"f" => Ok(Value::Bool(false)),
                _ => Err(self.invalid(format!("expected 't' or 'f', got {raw:?}"))),
            },
            (TypeKind::Bool, FormatCode::Binary) => match raw {
                [b] => Ok(Value::Bool(*b != 0)),
                _ => Err(self.invalid(format!("expected 1 byte, got {}", raw.len()))),
            },
            (
                TypeKind::Int2 | TypeKind::Int4 | TypeKind::Int8 | TypeKind::Oid,
                FormatCode::Text,
            ) => {
                let text = std::str::from_utf8(raw)?;
                text.parse::<i64>()
                    .map(Value::Int)
                    .map_err(|e| self.invalid(format!("{text:?}: {e}")))
            }
            (TypeKind::Int2, FormatCode::Binary) => {
                let v = i16::from_be_bytes(self.fixed(raw)?);
                Ok(Value::Int(v.into()))
            }
            (TypeKind::Int4, FormatCode::Binary) => {
                let v = i32::from_be_bytes(self.fixed(raw)?);
                Ok(Value::Int(v.into()))
            }
            (TypeKind::Oid, FormatCode::Binary) => {
                let v = u32::from_be_bytes(self.fixed(raw)?);
                Ok(Value::Int(v.into()))
            }
            (TypeKind::Int8, FormatCode::Binary) => {
                Ok(Value::Int(i64::from_be_bytes(self.fixed(raw)?)))
            }
            (TypeKind::Bytea, FormatCode::Text) => {
                let bytes = match raw.strip_prefix(b"\\x") {
                    Some(hex) => hex::decode(hex).map_err(|e| self.invalid(e.to_string()))?,
                    None => decode_bytea_escape(raw)
                        .ok_or_else(|| self.invalid("malformed escape sequence".into()))?,
                };
                Ok(Value::Bytes(bytes.into()))
            }
            (TypeKind::Bytea, FormatCode::Binary) => {
                Ok(Value::Bytes(Bytes::copy_from_slice(raw)))
            }
            (TypeKind::Name | TypeKind::Text | TypeKind::Bpchar | TypeKind::Varchar, _) => {
                Ok(Value::Text(std::str::from_utf8(raw)?.to_owned()))
            }
        }
    }

    fn fixed<const N: usize>(self, raw: &[u8]) -> Result<[u8; N]> {
        raw.try_into()
            .map_err(|_| self.invalid(format!("expected {N} bytes, got {}", raw.len())))
    }

    fn invalid(self, reason: String) -> Error {
        Error::InvalidValue {
            type_name: self.name(),
            reason,
        }
    }
}

/// Decodes the legacy `bytea_output = escape` format, where a backslash
/// is written as `\\` and other bytes may appear as `\ooo` octal escapes.
fn decode_bytea_escape(raw: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(raw.len());
    let mut rest = raw;
    while let Some((&b, tail)) = rest.split_first() {
        if b != b'\\' {
            out.push(b);
            rest = tail;
            continue;
        }
        match tail {
            [b'\\', tail @ ..] => {
                out.push(b'\\');
                rest = tail;
            }
            [d0 @ b'0'..=b'3', d1 @ b'0'..=b'7', d2 @ b'0'..=b'7', tail @ ..] => {
                out.push((d0 - b'0') << 6 | (d1 - b'0') << 3 | (d2 - b'0'));
                rest = tail;
            }
            _ => return None,
        }
    }
    Some(out)
}

/// A decoded column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// SQL NULL, sent on the wire as length `-1`.
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Bytes),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl PartialEq<i64> for Value {
    fn eq(&self, other: &i64) -> bool {
        self.as_i64() == Some(*other)
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == Some(*other)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", if *b { "t" } else { "f" }),
            Value::Int(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Bytes(b) => {
                write!(f, "\\x")?;
                b.iter().try_for_each(|byte| write!(f, "{byte:02x}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FormatCode, TypeKind, Value};
    use crate::Error;

    #[test]
    fn test_from_oid() {
        assert_eq!(TypeKind::from_oid(23).unwrap(), TypeKind::Int4);
        assert_eq!(TypeKind::from_oid(1043).unwrap(), TypeKind::Varchar);
        assert_eq!(TypeKind::Int8.oid(), 20);
        assert!(matches!(
            TypeKind::from_oid(700),
            Err(Error::UnsupportedType(700))
        ));
    }

    #[test]
    fn test_decode_text_integers() {
        let v = TypeKind::Int4.decode(FormatCode::Text, b"-42").unwrap();
        assert_eq!(v, Value::Int(-42));
        let v = TypeKind::Int8
            .decode(FormatCode::Text, b"9223372036854775807")
            .unwrap();
        assert_eq!(v, i64::MAX);
        assert!(matches!(
            TypeKind::Int2.decode(FormatCode::Text, b"one"),
            Err(Error::InvalidValue {
                type_name: "int2",
                ..
            })
        ));
    }

    #[test]
    fn test_decode_binary_integers() {
        let v = TypeKind::Int4
            .decode(FormatCode::Binary, &7i32.to_be_bytes())
            .unwrap();
        assert_eq!(v, Value::Int(7));
        let v = TypeKind::Int2
            .decode(FormatCode::Binary, &(-2i16).to_be_bytes())
            .unwrap();
        assert_eq!(v, Value::Int(-2));
        let v = TypeKind::Oid
            .decode(FormatCode::Binary, &u32::MAX.to_be_bytes())
            .unwrap();
        assert_eq!(v, Value::Int(u32::MAX as i64));
        assert!(matches!(
            TypeKind::Int4.decode(FormatCode::Binary, &[0, 1]),
            Err(Error::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_decode_text() {
        let v = TypeKind::Text.decode(FormatCode::Text, b"hello").unwrap();
        assert_eq!(v, "hello");
        let v = TypeKind::Varchar.decode(FormatCode::Text, b"").unwrap();
        assert_eq!(v, Value::Text(String::new()));
        assert!(!v.is_null());
        assert!(matches!(
            TypeKind::Text.decode(FormatCode::Text, &[0xff]),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_decode_bool() {
        assert_eq!(
            TypeKind::Bool.decode(FormatCode::Text, b"t").unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            TypeKind::Bool.decode(FormatCode::Binary, &[0]).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_decode_bytea() {
        let v = TypeKind::Bytea
            .decode(FormatCode::Text, b"\\xdeadBEEF")
            .unwrap();
        assert_eq!(v.as_bytes(), Some(&[0xde, 0xad, 0xbe, 0xef][..]));
        assert_eq!(v.to_string(), "\\xdeadbeef");

        let v = TypeKind::Bytea.decode(FormatCode::Binary, b"\x00\x01").unwrap();
        assert_eq!(v.as_bytes(), Some(&[0, 1][..]));

        assert!(matches!(
            TypeKind::Bytea.decode(FormatCode::Text, b"\\xabc"),
            Err(Error::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_decode_bytea_escape_format() {
        let v = TypeKind::Bytea
            .decode(FormatCode::Text, b"a\\000\\\\b\\377")
            .unwrap();
        assert_eq!(v.as_bytes(), Some(&[b'a', 0, b'\\', b'b', 0xff][..]));

        let v = TypeKind::Bytea.decode(FormatCode::Text, b"plain").unwrap();
        assert_eq!(v.as_bytes(), Some(&b"plain"[..]));

        for bad in [&b"\\"[..], &b"\\12"[..], &b"\\400"[..], &b"a\\q"[..]] {
            assert!(matches!(
                TypeKind::Bytea.decode(FormatCode::Text, bad),
                Err(Error::InvalidValue {
                    type_name: "bytea",
                    ..
                })
            ));
        }
    }

    #[test]
    fn test_format_code() {
        assert_eq!(FormatCode::try_from(0).unwrap(), FormatCode::Text);
        assert_eq!(FormatCode::try_from(1).unwrap(), FormatCode::Binary);
        assert!(FormatCode::try_from(2).is_err());
    }
}
