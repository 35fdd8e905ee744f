//! Tag-keyed field map carried by `ErrorResponse` and `NoticeResponse`.

use std::collections::BTreeMap;
use std::fmt;

use crate::core::wire::WireReader;
use crate::error::Result;

/// Field type codes.
pub mod codes {
    pub const SEVERITY: u8 = b'S';
    pub const SEVERITY_NONLOCALIZED: u8 = b'V';
    pub const CODE: u8 = b'C';
    pub const MESSAGE: u8 = b'M';
    pub const DETAIL: u8 = b'D';
    pub const HINT: u8 = b'H';
    pub const POSITION: u8 = b'P';
    pub const INTERNAL_POSITION: u8 = b'p';
    pub const INTERNAL_QUERY: u8 = b'q';
    pub const WHERE: u8 = b'W';
    pub const SCHEMA: u8 = b's';
    pub const TABLE: u8 = b't';
    pub const COLUMN: u8 = b'c';
    pub const DATA_TYPE: u8 = b'd';
    pub const CONSTRAINT: u8 = b'n';
    pub const FILE: u8 = b'F';
    pub const LINE: u8 = b'L';
    pub const ROUTINE: u8 = b'R';
}

/// Structured error or notice reported by the server.
///
/// Every field the server sent is kept in [`fields`](Self::fields); the
/// accessors cover the documented ones.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerError {
    fields: BTreeMap<u8, String>,
}

impl ServerError {
    /// Parse the `{code: u8, value: C-string}* 0` body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(body);
        let mut fields = BTreeMap::new();
        loop {
            let code = r.read_u8()?;
            if code == 0 {
                break;
            }
            let value = String::from_utf8_lossy(r.read_cstr_bytes()?).into_owned();
            fields.insert(code, value);
        }
        r.finish()?;
        Ok(Self { fields })
    }

    /// Build from explicit fields, mainly for tests and local reporting.
    pub fn from_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (u8, S)>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(|(k, v)| (k, v.into())).collect(),
        }
    }

    pub fn field(&self, code: u8) -> Option<&str> {
        self.fields.get(&code).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<u8, String> {
        &self.fields
    }

    /// Severity, preferring the non-localized form.
    pub fn severity(&self) -> &str {
        self.field(codes::SEVERITY_NONLOCALIZED)
            .or_else(|| self.field(codes::SEVERITY))
            .unwrap_or("ERROR")
    }

    /// Five-character SQLSTATE.
    pub fn code(&self) -> &str {
        self.field(codes::CODE).unwrap_or("")
    }

    pub fn message(&self) -> &str {
        self.field(codes::MESSAGE).unwrap_or("")
    }

    pub fn detail(&self) -> Option<&str> {
        self.field(codes::DETAIL)
    }

    pub fn hint(&self) -> Option<&str> {
        self.field(codes::HINT)
    }

    /// 1-based character offset into the query text.
    pub fn position(&self) -> Option<u32> {
        self.field(codes::POSITION).and_then(|p| p.parse().ok())
    }

    pub fn where_(&self) -> Option<&str> {
        self.field(codes::WHERE)
    }

    pub fn schema(&self) -> Option<&str> {
        self.field(codes::SCHEMA)
    }

    pub fn table(&self) -> Option<&str> {
        self.field(codes::TABLE)
    }

    pub fn column(&self) -> Option<&str> {
        self.field(codes::COLUMN)
    }

    pub fn datatype(&self) -> Option<&str> {
        self.field(codes::DATA_TYPE)
    }

    pub fn constraint(&self) -> Option<&str> {
        self.field(codes::CONSTRAINT)
    }

    pub fn file(&self) -> Option<&str> {
        self.field(codes::FILE)
    }

    pub fn line(&self) -> Option<u32> {
        self.field(codes::LINE).and_then(|l| l.parse().ok())
    }

    pub fn routine(&self) -> Option<&str> {
        self.field(codes::ROUTINE)
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity(), self.message())?;
        if !self.code().is_empty() {
            write!(f, " (SQLSTATE {})", self.code())?;
        }
        if let Some(detail) = self.detail() {
            write!(f, "\nDETAIL: {detail}")?;
        }
        if let Some(hint) = self.hint() {
            write!(f, "\nHINT: {hint}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ServerError {}
