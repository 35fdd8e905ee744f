//! Arbitrary-precision `numeric`.
//!
//! The binary form stores base-10000 digit groups:
//!
//! ```text
//! [ndigits: i16] [weight: i16] [sign: u16] [dscale: u16] [digit: i16]*
//! ```
//!
//! `weight` is the power of 10000 of the first group, so the decimal point sits
//! after group `weight`. Leading and trailing zero groups are never sent.

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, BytesMut};
use thiserror::Error;

use super::registry::{CodecContext, ValueProcessor};
use super::{oid, Oid, Value};
use crate::core::wire::WireReader;
use crate::error::CodecError;

const SIGN_POSITIVE: u16 = 0x0000;
const SIGN_NEGATIVE: u16 = 0x4000;
const SIGN_NAN: u16 = 0xC000;
const SIGN_POS_INF: u16 = 0xD000;
const SIGN_NEG_INF: u16 = 0xF000;

const MAX_DSCALE: usize = 0x3FFF;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Repr {
    Finite {
        negative: bool,
        // No leading zeros; empty means zero.
        integer: String,
        // Exactly `scale` digits.
        fraction: String,
    },
    NaN,
    Infinity,
    NegInfinity,
}

/// Exact decimal value with a display scale.
///
/// Values compare by their decimal rendering, so `1.50` and `1.5` differ in the
/// same way PostgreSQL keeps them apart on output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Numeric {
    repr: Repr,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid numeric literal: {0:?}")]
pub struct ParseNumericError(String);

impl Default for Numeric {
    fn default() -> Self {
        Self::finite(false, String::new(), String::new())
    }
}

impl Numeric {
    fn finite(negative: bool, integer: String, fraction: String) -> Self {
        let integer = integer.trim_start_matches('0').to_string();
        let is_zero = integer.is_empty() && fraction.bytes().all(|b| b == b'0');
        Self {
            repr: Repr::Finite {
                negative: negative && !is_zero,
                integer,
                fraction,
            },
        }
    }

    pub fn nan() -> Self {
        Self { repr: Repr::NaN }
    }

    pub fn infinity() -> Self {
        Self {
            repr: Repr::Infinity,
        }
    }

    pub fn neg_infinity() -> Self {
        Self {
            repr: Repr::NegInfinity,
        }
    }

    pub fn is_nan(&self) -> bool {
        matches!(self.repr, Repr::NaN)
    }

    pub fn is_finite(&self) -> bool {
        matches!(self.repr, Repr::Finite { .. })
    }

    pub fn is_negative(&self) -> bool {
        matches!(
            self.repr,
            Repr::Finite { negative: true, .. } | Repr::NegInfinity
        )
    }

    /// Number of digits after the decimal point.
    pub fn scale(&self) -> usize {
        match &self.repr {
            Repr::Finite { fraction, .. } => fraction.len(),
            _ => 0,
        }
    }

    /// Lossy conversion for callers that only need an approximation.
    pub fn to_f64(&self) -> f64 {
        match &self.repr {
            Repr::NaN => f64::NAN,
            Repr::Infinity => f64::INFINITY,
            Repr::NegInfinity => f64::NEG_INFINITY,
            Repr::Finite { .. } => self.to_string().parse().unwrap_or(f64::NAN),
        }
    }

    /// Encode into the base-10000 binary layout.
    pub fn write_binary(&self, out: &mut BytesMut) -> Result<(), CodecError> {
        let (negative, integer, fraction) = match &self.repr {
            Repr::NaN => return write_special(out, SIGN_NAN),
            Repr::Infinity => return write_special(out, SIGN_POS_INF),
            Repr::NegInfinity => return write_special(out, SIGN_NEG_INF),
            Repr::Finite {
                negative,
                integer,
                fraction,
            } => (*negative, integer, fraction),
        };
        if fraction.len() > MAX_DSCALE {
            return Err(CodecError::malformed(
                oid::NUMERIC,
                "scale exceeds the numeric limit",
                self,
            ));
        }

        let int_pad = (4 - integer.len() % 4) % 4;
        let frac_pad = (4 - fraction.len() % 4) % 4;
        let int_digits = format!("{}{}", "0".repeat(int_pad), integer);
        let frac_digits = format!("{}{}", fraction, "0".repeat(frac_pad));

        let mut groups: Vec<i16> = Vec::with_capacity((int_digits.len() + frac_digits.len()) / 4);
        for chunk in int_digits.as_bytes().chunks(4).chain(frac_digits.as_bytes().chunks(4)) {
            groups.push(chunk.iter().fold(0i16, |acc, d| acc * 10 + i16::from(d - b'0')));
        }
        let mut weight = (int_digits.len() / 4) as i32 - 1;

        let leading = groups.iter().take_while(|g| **g == 0).count();
        groups.drain(..leading);
        weight -= leading as i32;
        while groups.last() == Some(&0) {
            groups.pop();
        }
        if groups.is_empty() {
            weight = 0;
        }

        let ndigits = i16::try_from(groups.len())
            .map_err(|_| CodecError::malformed(oid::NUMERIC, "too many digit groups", self))?;
        let weight = i16::try_from(weight)
            .map_err(|_| CodecError::malformed(oid::NUMERIC, "weight out of range", self))?;

        out.reserve(8 + groups.len() * 2);
        out.put_i16(ndigits);
        out.put_i16(weight);
        out.put_u16(if negative { SIGN_NEGATIVE } else { SIGN_POSITIVE });
        out.put_u16(fraction.len() as u16);
        for g in groups {
            out.put_i16(g);
        }
        Ok(())
    }

    /// Decode the base-10000 binary layout.
    pub fn read_binary(raw: &[u8]) -> Result<Self, CodecError> {
        let bad = |reason: &str| CodecError::malformed(oid::NUMERIC, reason, raw);
        let mut r = WireReader::new(raw);
        let (ndigits, weight, sign, dscale) =
            read_header(&mut r).map_err(|_| bad("truncated header"))?;

        match sign {
            SIGN_NAN => return Ok(Self::nan()),
            SIGN_POS_INF => return Ok(Self::infinity()),
            SIGN_NEG_INF => return Ok(Self::neg_infinity()),
            SIGN_POSITIVE | SIGN_NEGATIVE => {}
            _ => return Err(bad("unknown sign flag")),
        }
        if ndigits < 0 {
            return Err(bad("negative digit count"));
        }

        let mut groups = Vec::with_capacity(ndigits as usize);
        for _ in 0..ndigits {
            let g = r.read_i16().map_err(|_| bad("truncated digits"))?;
            if !(0..10000).contains(&g) {
                return Err(bad("digit group out of range"));
            }
            groups.push(g);
        }
        if !r.is_empty() {
            return Err(bad("trailing bytes"));
        }

        let group_at = |power: i32| -> i16 {
            let index = i32::from(weight) - power;
            if index >= 0 && (index as usize) < groups.len() {
                groups[index as usize]
            } else {
                0
            }
        };

        let mut integer = String::new();
        for power in (0..=i32::from(weight)).rev() {
            integer.push_str(&format!("{:04}", group_at(power)));
        }

        let dscale = usize::from(dscale);
        let last_power = i32::from(weight) + 1 - groups.len() as i32;
        let frac_groups = (dscale + 3) / 4;
        let frac_groups = frac_groups.max((-last_power).max(0) as usize);
        let mut fraction = String::with_capacity(frac_groups * 4);
        for k in 1..=frac_groups as i32 {
            fraction.push_str(&format!("{:04}", group_at(-k)));
        }
        fraction.truncate(dscale);
        while fraction.len() < dscale {
            fraction.push('0');
        }

        Ok(Self::finite(sign == SIGN_NEGATIVE, integer, fraction))
    }
}

fn write_special(out: &mut BytesMut, sign: u16) -> Result<(), CodecError> {
    out.put_i16(0);
    out.put_i16(0);
    out.put_u16(sign);
    out.put_u16(0);
    Ok(())
}

fn read_header(r: &mut WireReader<'_>) -> crate::error::Result<(i16, i16, u16, u16)> {
    Ok((r.read_i16()?, r.read_i16()?, r.read_u16()?, r.read_u16()?))
}

impl FromStr for Numeric {
    type Err = ParseNumericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseNumericError(s.to_string());
        let t = s.trim();
        match t.to_ascii_lowercase().as_str() {
            "nan" => return Ok(Self::nan()),
            "infinity" | "+infinity" | "inf" | "+inf" => return Ok(Self::infinity()),
            "-infinity" | "-inf" => return Ok(Self::neg_infinity()),
            _ => {}
        }

        let (negative, unsigned) = match t.as_bytes().first() {
            Some(b'-') => (true, &t[1..]),
            Some(b'+') => (false, &t[1..]),
            _ => (false, t),
        };
        let (integer, fraction) = match unsigned.split_once('.') {
            Some((i, f)) => (i, f),
            None => (unsigned, ""),
        };
        if integer.is_empty() && fraction.is_empty() {
            return Err(err());
        }
        let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if !digits(integer) || !digits(fraction) {
            return Err(err());
        }
        Ok(Self::finite(
            negative,
            integer.to_string(),
            fraction.to_string(),
        ))
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::NaN => f.write_str("NaN"),
            Repr::Infinity => f.write_str("Infinity"),
            Repr::NegInfinity => f.write_str("-Infinity"),
            Repr::Finite {
                negative,
                integer,
                fraction,
            } => {
                if *negative {
                    f.write_str("-")?;
                }
                f.write_str(if integer.is_empty() { "0" } else { integer })?;
                if !fraction.is_empty() {
                    write!(f, ".{fraction}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<i64> for Numeric {
    fn from(v: i64) -> Self {
        Self::finite(v < 0, v.unsigned_abs().to_string(), String::new())
    }
}

#[derive(Debug)]
pub struct NumericProcessor;

impl NumericProcessor {
    fn coerce(value: &Value) -> Result<Numeric, CodecError> {
        match value {
            Value::Numeric(n) => Ok(n.clone()),
            Value::Int2(_) | Value::Int4(_) | Value::Int8(_) => {
                Ok(Numeric::from(value.as_i64().unwrap_or_default()))
            }
            Value::Float4(_) | Value::Float8(_) => {
                let v = value.as_f64().unwrap_or(f64::NAN);
                if v.is_nan() {
                    Ok(Numeric::nan())
                } else if v.is_infinite() {
                    Ok(if v > 0.0 {
                        Numeric::infinity()
                    } else {
                        Numeric::neg_infinity()
                    })
                } else {
                    v.to_string()
                        .parse()
                        .map_err(|_| CodecError::wrong_value(oid::NUMERIC, value))
                }
            }
            Value::Text(s) => s
                .parse()
                .map_err(|_| CodecError::wrong_value(oid::NUMERIC, value)),
            other => Err(CodecError::wrong_value(oid::NUMERIC, other)),
        }
    }
}

impl ValueProcessor for NumericProcessor {
    fn oid(&self) -> Oid {
        oid::NUMERIC
    }

    fn name(&self) -> &str {
        "numeric"
    }

    fn encode_binary(
        &self,
        value: &Value,
        _ctx: &CodecContext<'_>,
        out: &mut BytesMut,
    ) -> Result<(), CodecError> {
        Self::coerce(value)?.write_binary(out)
    }

    fn encode_text(&self, value: &Value, _ctx: &CodecContext<'_>) -> Result<String, CodecError> {
        Ok(Self::coerce(value)?.to_string())
    }

    fn decode_binary(&self, raw: &[u8], _ctx: &CodecContext<'_>) -> Result<Value, CodecError> {
        Numeric::read_binary(raw).map(Value::Numeric)
    }

    fn decode_text(&self, raw: &str, _ctx: &CodecContext<'_>) -> Result<Value, CodecError> {
        raw.parse()
            .map(Value::Numeric)
            .map_err(|e: ParseNumericError| CodecError::malformed(oid::NUMERIC, e.to_string(), raw))
    }
}
