use crate::{
    Error, Result,
    messages::Reader,
    types::{FormatCode, TypeKind, Value},
};

/// Column metadata from a RowDescription plus the value a DataRow
/// filled in for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// OID of the source table, or zero.
    pub table_id: u32,
    /// Attribute number of the source column, or zero.
    pub attr_num: i16,
    pub type_id: u32,
    /// `pg_type.typlen`; negative for variable-width types.
    pub type_size: i16,
    /// `pg_attribute.atttypmod`.
    pub type_mod: i32,
    /// 0 for text, 1 for binary.
    pub format_code: i16,
    /// `None` until a DataRow arrives; SQL NULL is `Some(Value::Null)`.
    pub value: Option<Value>,
}

impl Field {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            table_id: reader.read_i32()? as u32,
            attr_num: reader.read_i16()?,
            type_id: reader.read_i32()? as u32,
            type_size: reader.read_i16()?,
            type_mod: reader.read_i32()?,
            format_code: reader.read_i16()?,
            value: None,
        })
    }

    fn decode_value(&self, raw: Option<&[u8]>) -> Result<Value> {
        let kind = TypeKind::from_oid(self.type_id)?;
        match raw {
            None => Ok(Value::Null),
            Some(raw) => kind.decode(FormatCode::try_from(self.format_code)?, raw),
        }
    }
}

/// One result row: `(name, field)` pairs in the backend's column order.
///
/// Names are not unique; `SELECT 1 AS a, 2 AS a` yields two `a` columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub fields: Vec<(String, Field)>,
    populated: bool,
}

impl Row {
    pub(crate) fn decode_description(reader: &mut Reader<'_>) -> Result<Self> {
        let count = reader.read_i16()?;
        let count = usize::try_from(count).map_err(|_| Error::Framing("negative field count"))?;

        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let name = reader.read_cstring()?.to_owned();
            fields.push((name, Field::decode(reader)?));
        }

        Ok(Self {
            fields,
            populated: false,
        })
    }

    /// Whether a DataRow has filled this row's values.
    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The value of the first column called `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, f)| f.value.as_ref())
    }

    pub fn values(&self) -> impl Iterator<Item = Option<&Value>> {
        self.fields.iter().map(|(_, f)| f.value.as_ref())
    }

    /// Decodes every value of a DataRow against this row's template,
    /// leaving the row untouched unless all of them decode.
    pub(crate) fn decode_values(&self, reader: &mut Reader<'_>) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(self.fields.len());
        for (_, field) in &self.fields {
            let len = reader.read_i32()?;
            let raw = match len {
                -1 => None,
                len if len < 0 => return Err(Error::Framing("negative column length")),
                len => Some(reader.read_bytes(len as usize)?),
            };
            values.push(field.decode_value(raw)?);
        }
        Ok(values)
    }

    /// A copy of this row's column metadata with no values.
    pub(crate) fn template(&self) -> Self {
        let fields = self
            .fields
            .iter()
            .map(|(name, field)| {
                let field = Field {
                    value: None,
                    ..field.clone()
                };
                (name.clone(), field)
            })
            .collect();
        Self {
            fields,
            populated: false,
        }
    }

    pub(crate) fn fill(&mut self, values: Vec<Value>) {
        for ((_, field), value) in self.fields.iter_mut().zip(values) {
            field.value = Some(value);
        }
        self.populated = true;
    }
}

/// A submitted simple query and the rows it has produced so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub query_text: String,
    pub rows: Vec<Row>,
    /// Set once a CommandComplete or EmptyQueryResponse arrives.
    pub completed: bool,
    /// The tag of the latest CommandComplete, e.g. `SELECT 1`.
    pub tag: Option<String>,
}

impl Command {
    pub(crate) fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            rows: Vec::new(),
            completed: false,
            tag: None,
        }
    }

    /// Rows that carry values, skipping descriptions of empty results.
    pub fn populated_rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter().filter(|r| r.is_populated())
    }

    /// Rows affected or returned, parsed from the last command tag.
    pub fn rows_affected(&self) -> Option<u64> {
        self.tag.as_deref()?.rsplit(' ').next()?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};

    use super::{Command, Row};
    use crate::{Error, messages::Reader, types::Value};

    fn put_field(buf: &mut BytesMut, name: &str, type_id: u32, format: i16) {
        buf.put_slice(name.as_bytes());
        buf.put_u8(0);
        buf.put_u32(16384);
        buf.put_i16(1);
        buf.put_u32(type_id);
        buf.put_i16(4);
        buf.put_i32(-1);
        buf.put_i16(format);
    }

    fn description(fields: &[(&str, u32)]) -> Row {
        let mut buf = BytesMut::new();
        buf.put_i16(fields.len() as i16);
        for (name, type_id) in fields {
            put_field(&mut buf, name, *type_id, 0);
        }
        Row::decode_description(&mut Reader::new(&buf)).unwrap()
    }

    #[test]
    fn test_decode_description() {
        let row = description(&[("id", 23), ("name", 25)]);

        assert_eq!(row.len(), 2);
        assert!(!row.is_populated());
        let (name, field) = &row.fields[0];
        assert_eq!(name, "id");
        assert_eq!(field.table_id, 16384);
        assert_eq!(field.attr_num, 1);
        assert_eq!(field.type_id, 23);
        assert_eq!(field.type_size, 4);
        assert_eq!(field.type_mod, -1);
        assert_eq!(field.format_code, 0);
        assert_eq!(field.value, None);
    }

    #[test]
    fn test_duplicate_names_are_kept() {
        let row = description(&[("a", 23), ("a", 23)]);
        assert_eq!(row.len(), 2);
        assert!(row.fields.iter().all(|(n, _)| n == "a"));
    }

    #[test]
    fn test_decode_values_null_and_empty() {
        let row = description(&[("a", 25), ("b", 25)]);

        let mut buf = BytesMut::new();
        buf.put_i32(-1);
        buf.put_i32(0);
        let values = row.decode_values(&mut Reader::new(&buf)).unwrap();

        assert_eq!(values, vec![Value::Null, Value::Text(String::new())]);
    }

    #[test]
    fn test_decode_values_unknown_type() {
        let row = description(&[("f", 700)]);

        let mut buf = BytesMut::new();
        buf.put_i32(3);
        buf.put_slice(b"1.5");
        assert!(matches!(
            row.decode_values(&mut Reader::new(&buf)),
            Err(Error::UnsupportedType(700))
        ));
    }

    #[test]
    fn test_decode_values_truncated() {
        let row = description(&[("a", 25)]);

        let mut buf = BytesMut::new();
        buf.put_i32(10);
        buf.put_slice(b"short");
        assert!(matches!(
            row.decode_values(&mut Reader::new(&buf)),
            Err(Error::TruncatedBuffer {
                needed: 10,
                remaining: 5
            })
        ));
    }

    #[test]
    fn test_decode_values_negative_length() {
        let row = description(&[("a", 25)]);

        let mut buf = BytesMut::new();
        buf.put_i32(-2);
        assert!(matches!(
            row.decode_values(&mut Reader::new(&buf)),
            Err(Error::Framing(_))
        ));
    }

    #[test]
    fn test_decode_description_negative_count() {
        let mut buf = BytesMut::new();
        buf.put_i16(-1);
        assert!(matches!(
            Row::decode_description(&mut Reader::new(&buf)),
            Err(Error::Framing(_))
        ));
    }

    #[test]
    fn test_template_and_fill() {
        let mut row = description(&[("id", 23)]);
        row.fill(vec![Value::Int(1)]);
        assert_eq!(row.get("id"), Some(&Value::Int(1)));

        let copy = row.template();
        assert!(!copy.is_populated());
        assert_eq!(copy.get("id"), None);
        assert_eq!(copy.fields[0].1.type_id, 23);
    }

    #[test]
    fn test_rows_affected() {
        let mut cmd = Command::new("INSERT INTO t VALUES (1)");
        assert_eq!(cmd.rows_affected(), None);
        cmd.tag = Some("INSERT 0 3".into());
        assert_eq!(cmd.rows_affected(), Some(3));
        cmd.tag = Some("CREATE TABLE".into());
        assert_eq!(cmd.rows_affected(), None);
    }
}
