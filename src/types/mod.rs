//! # Value Codecs
//!
//! Conversion between host [`Value`]s and PostgreSQL's binary and text wire
//! representations, keyed by type OID.
//!
//! The [`TypeRegistry`] maps each OID to a stateless [`ValueProcessor`]. It is
//! immutable once built and can be shared across sessions without locking.
//!
//! ## Components
//! - **Value**: the closed set of host value categories
//! - **Registry**: OID to processor map, default OID inference, custom types
//! - **Scalar / Numeric / Datetime / Array / Json / Custom**: processors per type family

pub mod array;
pub mod custom;
pub mod datetime;
pub mod json;
pub mod numeric;
pub mod registry;
pub mod scalar;
pub mod value;

pub use custom::CustomType;
pub use datetime::Interval;
pub use json::{JsonCodec, SerdeJsonCodec};
pub use numeric::Numeric;
pub use registry::{CodecContext, CodecParams, TypeRegistry, TypeRegistryBuilder, ValueProcessor};
pub use value::Value;

/// PostgreSQL type identifier.
pub type Oid = u32;

/// Wire format of a parameter or result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    Text,
    Binary,
}

impl Format {
    pub fn code(self) -> i16 {
        match self {
            Format::Text => 0,
            Format::Binary => 1,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Format::Text),
            1 => Some(Format::Binary),
            _ => None,
        }
    }
}

/// Well-known type OIDs from `pg_type`.
pub mod oid {
    use super::Oid;

    /// Lets the server infer the type.
    pub const UNSPECIFIED: Oid = 0;
    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const CHAR: Oid = 18;
    pub const NAME: Oid = 19;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const OID: Oid = 26;
    pub const JSON: Oid = 114;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const UNKNOWN: Oid = 705;
    pub const BPCHAR: Oid = 1042;
    pub const VARCHAR: Oid = 1043;
    pub const DATE: Oid = 1082;
    pub const TIME: Oid = 1083;
    pub const TIMESTAMP: Oid = 1114;
    pub const TIMESTAMPTZ: Oid = 1184;
    pub const INTERVAL: Oid = 1186;
    pub const TIMETZ: Oid = 1266;
    pub const NUMERIC: Oid = 1700;
    pub const UUID: Oid = 2950;
    pub const JSONB: Oid = 3802;

    pub const JSON_ARRAY: Oid = 199;
    pub const BOOL_ARRAY: Oid = 1000;
    pub const BYTEA_ARRAY: Oid = 1001;
    pub const CHAR_ARRAY: Oid = 1002;
    pub const NAME_ARRAY: Oid = 1003;
    pub const INT2_ARRAY: Oid = 1005;
    pub const INT4_ARRAY: Oid = 1007;
    pub const TEXT_ARRAY: Oid = 1009;
    pub const BPCHAR_ARRAY: Oid = 1014;
    pub const VARCHAR_ARRAY: Oid = 1015;
    pub const INT8_ARRAY: Oid = 1016;
    pub const FLOAT4_ARRAY: Oid = 1021;
    pub const FLOAT8_ARRAY: Oid = 1022;
    pub const OID_ARRAY: Oid = 1028;
    pub const TIMESTAMP_ARRAY: Oid = 1115;
    pub const DATE_ARRAY: Oid = 1182;
    pub const TIME_ARRAY: Oid = 1183;
    pub const TIMESTAMPTZ_ARRAY: Oid = 1185;
    pub const INTERVAL_ARRAY: Oid = 1187;
    pub const NUMERIC_ARRAY: Oid = 1231;
    pub const TIMETZ_ARRAY: Oid = 1270;
    pub const UUID_ARRAY: Oid = 2951;
    pub const JSONB_ARRAY: Oid = 3807;

    /// Array type for a built-in element type.
    pub fn array_of(element: Oid) -> Option<Oid> {
        ARRAYS
            .iter()
            .find(|(_, elem, _)| *elem == element)
            .map(|(array, _, _)| *array)
    }

    /// `(array oid, element oid, array type name)` for every built-in array type.
    pub const ARRAYS: &[(Oid, Oid, &str)] = &[
        (JSON_ARRAY, JSON, "_json"),
        (BOOL_ARRAY, BOOL, "_bool"),
        (BYTEA_ARRAY, BYTEA, "_bytea"),
        (CHAR_ARRAY, CHAR, "_char"),
        (NAME_ARRAY, NAME, "_name"),
        (INT2_ARRAY, INT2, "_int2"),
        (INT4_ARRAY, INT4, "_int4"),
        (TEXT_ARRAY, TEXT, "_text"),
        (BPCHAR_ARRAY, BPCHAR, "_bpchar"),
        (VARCHAR_ARRAY, VARCHAR, "_varchar"),
        (INT8_ARRAY, INT8, "_int8"),
        (FLOAT4_ARRAY, FLOAT4, "_float4"),
        (FLOAT8_ARRAY, FLOAT8, "_float8"),
        (OID_ARRAY, OID, "_oid"),
        (TIMESTAMP_ARRAY, TIMESTAMP, "_timestamp"),
        (DATE_ARRAY, DATE, "_date"),
        (TIME_ARRAY, TIME, "_time"),
        (TIMESTAMPTZ_ARRAY, TIMESTAMPTZ, "_timestamptz"),
        (INTERVAL_ARRAY, INTERVAL, "_interval"),
        (NUMERIC_ARRAY, NUMERIC, "_numeric"),
        (TIMETZ_ARRAY, TIMETZ, "_timetz"),
        (UUID_ARRAY, UUID, "_uuid"),
        (JSONB_ARRAY, JSONB, "_jsonb"),
    ];
}
