use crate::{Result, messages::Reader};

/// A decoded Postgres ErrorResponse or NoticeResponse.
///
/// Each field is keyed on the wire by a single byte. Fields the server
/// did not send stay `None`.
/// <https://www.postgresql.org/docs/current/protocol-error-fields.html>
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PgErrorResponse {
    pub local_severity: Option<String>,    // S
    pub severity: Option<String>,          // V
    pub code: Option<String>,              // C
    pub message: Option<String>,           // M
    pub detail: Option<String>,            // D
    pub hint: Option<String>,              // H
    pub position: Option<String>,          // P
    pub internal_position: Option<String>, // p
    pub internal_query: Option<String>,    // q
    pub r#where: Option<String>,           // W
    pub schema: Option<String>,            // s
    pub table: Option<String>,             // t
    pub column: Option<String>,            // c
    pub datatype: Option<String>,          // d
    pub constraint: Option<String>,        // n
    pub file: Option<String>,              // F
    pub line: Option<String>,              // L
    pub routine: Option<String>,           // R
}

impl std::fmt::Display for PgErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sev = self.local_severity.as_deref().unwrap_or("UNKNOWN");
        let code = self.code.as_deref().unwrap_or("?????");
        let msg = self.message.as_deref().unwrap_or("<no message>");
        write!(f, "[{sev}] {code}: {msg}")
    }
}

impl std::fmt::Debug for PgErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgErrorResponse")
            .field("local_severity", &self.local_severity)
            .field("severity", &self.severity)
            .field("code", &self.code)
            .field("message", &self.message)
            .field("detail", &self.detail)
            .field("hint", &self.hint)
            .field("position", &self.position)
            .field("where", &self.r#where)
            .field("file", &self.file)
            .field("line", &self.line)
            .field("routine", &self.routine)
            .finish_non_exhaustive()
    }
}

impl PgErrorResponse {
    /// Decodes `(code, cstring)` pairs until the terminating zero byte.
    pub fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let mut resp = PgErrorResponse::default();

        loop {
            let tag = reader.read_u8()?;
            if tag == 0 {
                break;
            }

            let value = reader.read_cstring()?.to_owned();
            let slot = match tag {
                b'S' => &mut resp.local_severity,
                b'V' => &mut resp.severity,
                b'C' => &mut resp.code,
                b'M' => &mut resp.message,
                b'D' => &mut resp.detail,
                b'H' => &mut resp.hint,
                b'P' => &mut resp.position,
                b'p' => &mut resp.internal_position,
                b'q' => &mut resp.internal_query,
                b'W' => &mut resp.r#where,
                b's' => &mut resp.schema,
                b't' => &mut resp.table,
                b'c' => &mut resp.column,
                b'd' => &mut resp.datatype,
                b'n' => &mut resp.constraint,
                b'F' => &mut resp.file,
                b'L' => &mut resp.line,
                b'R' => &mut resp.routine,
                // frontends should silently ignore fields of unrecognized type
                _ => continue,
            };
            *slot = Some(value);
        }

        Ok(resp)
    }

    /// The non-localized severity when present, falling back to the
    /// localized one.
    pub fn effective_severity(&self) -> Option<&str> {
        self.severity
            .as_deref()
            .or(self.local_severity.as_deref())
    }

    /// `FATAL` and `PANIC` errors end the backend session.
    pub fn is_fatal(&self) -> bool {
        matches!(self.effective_severity(), Some("FATAL" | "PANIC"))
    }
}
