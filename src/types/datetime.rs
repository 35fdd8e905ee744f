//! Date, time and interval processors.
//!
//! Binary timestamps count microseconds from the PostgreSQL epoch
//! (2000-01-01 00:00:00 UTC) and dates count days from the same instant. The
//! shift to and from the Unix epoch happens only here. Text forms follow the
//! ISO `DateStyle`; other styles are reported as unsupported.

use std::borrow::Cow;

use bytes::{BufMut, BytesMut};
use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc,
};

use super::registry::{CodecContext, ValueProcessor};
use super::{oid, Oid, Value};
use crate::core::wire::WireReader;
use crate::error::CodecError;

/// Microseconds between the Unix epoch and the PostgreSQL epoch.
pub const PG_EPOCH_OFFSET_MICROS: i64 = 946_684_800_000_000;

/// `num_days_from_ce` of 2000-01-01.
const PG_EPOCH_DAYS_FROM_CE: i32 = 730_120;

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_DAY: i64 = 86_400 * MICROS_PER_SECOND;

const NAIVE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// PostgreSQL `interval`: months, days and microseconds are kept apart
/// because their lengths vary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Interval {
    pub months: i32,
    pub days: i32,
    pub microseconds: i64,
}

impl Interval {
    pub fn new(months: i32, days: i32, microseconds: i64) -> Self {
        Self {
            months,
            days,
            microseconds,
        }
    }
}

fn require_integer_datetimes(oid: Oid, raw: &[u8], ctx: &CodecContext<'_>) -> Result<(), CodecError> {
    if ctx.params.integer_datetimes {
        Ok(())
    } else {
        Err(CodecError::unsupported(oid, "floating-point binary datetimes", raw))
    }
}

fn require_iso(oid: Oid, raw: &str, ctx: &CodecContext<'_>) -> Result<(), CodecError> {
    if ctx.params.iso_dates() {
        Ok(())
    } else {
        Err(CodecError::unsupported(oid, "non-ISO DateStyle text", raw))
    }
}

/// Text values are parsed with the target processor before binary encoding.
fn coerce<'v>(
    p: &dyn ValueProcessor,
    value: &'v Value,
    ctx: &CodecContext<'_>,
) -> Result<Cow<'v, Value>, CodecError> {
    match value {
        Value::Text(s) => p.decode_text(s, ctx).map(Cow::Owned),
        other => Ok(Cow::Borrowed(other)),
    }
}

fn read_i64(oid: Oid, raw: &[u8]) -> Result<i64, CodecError> {
    let mut r = WireReader::new(raw);
    let v = r
        .read_i64()
        .map_err(|_| CodecError::malformed(oid, "expected 8 bytes", raw))?;
    r.finish()
        .map_err(|_| CodecError::malformed(oid, "expected 8 bytes", raw))?;
    Ok(v)
}

fn micros_to_utc(oid: Oid, pg_micros: i64) -> Result<DateTime<Utc>, CodecError> {
    pg_micros
        .checked_add(PG_EPOCH_OFFSET_MICROS)
        .and_then(DateTime::<Utc>::from_timestamp_micros)
        .ok_or_else(|| CodecError::malformed(oid, "timestamp out of range", pg_micros))
}

fn utc_to_micros(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_micros() - PG_EPOCH_OFFSET_MICROS
}

fn time_to_micros(t: &NaiveTime) -> i64 {
    i64::from(t.num_seconds_from_midnight()) * MICROS_PER_SECOND + i64::from(t.nanosecond() / 1_000)
}

fn micros_to_time(oid: Oid, micros: i64) -> Result<NaiveTime, CodecError> {
    if !(0..MICROS_PER_DAY).contains(&micros) {
        return Err(CodecError::malformed(oid, "time of day out of range", micros));
    }
    NaiveTime::from_num_seconds_from_midnight_opt(
        (micros / MICROS_PER_SECOND) as u32,
        ((micros % MICROS_PER_SECOND) * 1_000) as u32,
    )
    .ok_or_else(|| CodecError::malformed(oid, "time of day out of range", micros))
}

/// Unsigned decimal field; signs and empty input are rejected.
fn digits<T: std::str::FromStr>(s: &str) -> Option<T> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Parse a `+HH`, `+HH:MM` or `+HH:MM:SS` offset.
fn parse_offset(oid: Oid, s: &str) -> Result<FixedOffset, CodecError> {
    let bad = || CodecError::malformed(oid, "invalid UTC offset", s);
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => return Err(bad()),
    };
    let mut seconds = 0i32;
    for (i, part) in rest.split(':').enumerate() {
        let unit = *[3600, 60, 1].get(i).ok_or_else(bad)?;
        let n: i32 = digits(part).ok_or_else(bad)?;
        seconds = n
            .checked_mul(unit)
            .and_then(|v| seconds.checked_add(v))
            .ok_or_else(bad)?;
    }
    FixedOffset::east_opt(sign * seconds).ok_or_else(bad)
}

fn format_offset(offset: &FixedOffset) -> String {
    let total = offset.local_minus_utc();
    let sign = if total < 0 { '-' } else { '+' };
    let abs = total.abs();
    let (h, m, s) = (abs / 3600, abs % 3600 / 60, abs % 60);
    match (m, s) {
        (0, 0) => format!("{sign}{h:02}"),
        (_, 0) => format!("{sign}{h:02}:{m:02}"),
        _ => format!("{sign}{h:02}:{m:02}:{s:02}"),
    }
}

/// Split `13:45:00.5+05:30` into the clock and offset parts.
fn split_offset(s: &str) -> Option<(&str, &str)> {
    let idx = s.rfind(['+', '-'])?;
    Some((&s[..idx], &s[idx..]))
}

#[derive(Debug)]
pub struct DateProcessor;

impl DateProcessor {
    fn days(value: &Value) -> Result<i32, CodecError> {
        match value {
            Value::Date(d) => Ok(d.num_days_from_ce() - PG_EPOCH_DAYS_FROM_CE),
            other => Err(CodecError::wrong_value(oid::DATE, other)),
        }
    }
}

impl ValueProcessor for DateProcessor {
    fn oid(&self) -> Oid {
        oid::DATE
    }

    fn name(&self) -> &str {
        "date"
    }

    fn encode_binary(&self, value: &Value, ctx: &CodecContext<'_>, out: &mut BytesMut) -> Result<(), CodecError> {
        out.put_i32(Self::days(coerce(self, value, ctx)?.as_ref())?);
        Ok(())
    }

    fn encode_text(&self, value: &Value, _: &CodecContext<'_>) -> Result<String, CodecError> {
        match value {
            Value::Date(d) => Ok(d.format("%Y-%m-%d").to_string()),
            Value::Text(s) => Ok(s.clone()),
            other => Err(CodecError::wrong_value(oid::DATE, other)),
        }
    }

    fn decode_binary(&self, raw: &[u8], _: &CodecContext<'_>) -> Result<Value, CodecError> {
        let days = <[u8; 4]>::try_from(raw)
            .map(i32::from_be_bytes)
            .map_err(|_| CodecError::malformed(oid::DATE, "expected 4 bytes", raw))?;
        if days == i32::MAX || days == i32::MIN {
            return Err(CodecError::unsupported(oid::DATE, "infinite dates", days));
        }
        days.checked_add(PG_EPOCH_DAYS_FROM_CE)
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .map(Value::Date)
            .ok_or_else(|| CodecError::malformed(oid::DATE, "date out of range", days))
    }

    fn decode_text(&self, raw: &str, ctx: &CodecContext<'_>) -> Result<Value, CodecError> {
        require_iso(oid::DATE, raw, ctx)?;
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Value::Date)
            .map_err(|e| CodecError::malformed(oid::DATE, e.to_string(), raw))
    }
}

#[derive(Debug)]
pub struct TimeProcessor;

impl ValueProcessor for TimeProcessor {
    fn oid(&self) -> Oid {
        oid::TIME
    }

    fn name(&self) -> &str {
        "time"
    }

    fn encode_binary(&self, value: &Value, ctx: &CodecContext<'_>, out: &mut BytesMut) -> Result<(), CodecError> {
        match coerce(self, value, ctx)?.as_ref() {
            Value::Time(t) => out.put_i64(time_to_micros(t)),
            other => return Err(CodecError::wrong_value(oid::TIME, other)),
        }
        Ok(())
    }

    fn encode_text(&self, value: &Value, _: &CodecContext<'_>) -> Result<String, CodecError> {
        match value {
            Value::Time(t) => Ok(t.format("%H:%M:%S%.f").to_string()),
            Value::Text(s) => Ok(s.clone()),
            other => Err(CodecError::wrong_value(oid::TIME, other)),
        }
    }

    fn decode_binary(&self, raw: &[u8], ctx: &CodecContext<'_>) -> Result<Value, CodecError> {
        require_integer_datetimes(oid::TIME, raw, ctx)?;
        micros_to_time(oid::TIME, read_i64(oid::TIME, raw)?).map(Value::Time)
    }

    fn decode_text(&self, raw: &str, _: &CodecContext<'_>) -> Result<Value, CodecError> {
        NaiveTime::parse_from_str(raw, "%H:%M:%S%.f")
            .map(Value::Time)
            .map_err(|e| CodecError::malformed(oid::TIME, e.to_string(), raw))
    }
}

/// `timetz`: time of day plus a UTC offset stored negated (seconds west).
#[derive(Debug)]
pub struct TimeTzProcessor;

impl ValueProcessor for TimeTzProcessor {
    fn oid(&self) -> Oid {
        oid::TIMETZ
    }

    fn name(&self) -> &str {
        "timetz"
    }

    fn encode_binary(&self, value: &Value, ctx: &CodecContext<'_>, out: &mut BytesMut) -> Result<(), CodecError> {
        match coerce(self, value, ctx)?.as_ref() {
            Value::TimeTz(t, offset) => {
                out.put_i64(time_to_micros(t));
                out.put_i32(-offset.local_minus_utc());
            }
            other => return Err(CodecError::wrong_value(oid::TIMETZ, other)),
        }
        Ok(())
    }

    fn encode_text(&self, value: &Value, _: &CodecContext<'_>) -> Result<String, CodecError> {
        match value {
            Value::TimeTz(t, offset) => Ok(format!("{}{}", t.format("%H:%M:%S%.f"), format_offset(offset))),
            Value::Text(s) => Ok(s.clone()),
            other => Err(CodecError::wrong_value(oid::TIMETZ, other)),
        }
    }

    fn decode_binary(&self, raw: &[u8], ctx: &CodecContext<'_>) -> Result<Value, CodecError> {
        require_integer_datetimes(oid::TIMETZ, raw, ctx)?;
        let mut r = WireReader::new(raw);
        let bad = |_| CodecError::malformed(oid::TIMETZ, "expected 12 bytes", raw);
        let micros = r.read_i64().map_err(bad)?;
        let west = r.read_i32().map_err(bad)?;
        r.finish().map_err(bad)?;
        let offset = FixedOffset::east_opt(-west)
            .ok_or_else(|| CodecError::malformed(oid::TIMETZ, "offset out of range", west))?;
        Ok(Value::TimeTz(micros_to_time(oid::TIMETZ, micros)?, offset))
    }

    fn decode_text(&self, raw: &str, _: &CodecContext<'_>) -> Result<Value, CodecError> {
        let (clock, offset) = split_offset(raw)
            .ok_or_else(|| CodecError::malformed(oid::TIMETZ, "missing UTC offset", raw))?;
        let t = NaiveTime::parse_from_str(clock, "%H:%M:%S%.f")
            .map_err(|e| CodecError::malformed(oid::TIMETZ, e.to_string(), raw))?;
        Ok(Value::TimeTz(t, parse_offset(oid::TIMETZ, offset)?))
    }
}

#[derive(Debug)]
pub struct TimestampProcessor;

impl ValueProcessor for TimestampProcessor {
    fn oid(&self) -> Oid {
        oid::TIMESTAMP
    }

    fn name(&self) -> &str {
        "timestamp"
    }

    fn encode_binary(&self, value: &Value, ctx: &CodecContext<'_>, out: &mut BytesMut) -> Result<(), CodecError> {
        match coerce(self, value, ctx)?.as_ref() {
            Value::Timestamp(ts) => out.put_i64(utc_to_micros(&ts.and_utc())),
            other => return Err(CodecError::wrong_value(oid::TIMESTAMP, other)),
        }
        Ok(())
    }

    fn encode_text(&self, value: &Value, _: &CodecContext<'_>) -> Result<String, CodecError> {
        match value {
            Value::Timestamp(ts) => Ok(ts.format(NAIVE_FORMAT).to_string()),
            Value::Text(s) => Ok(s.clone()),
            other => Err(CodecError::wrong_value(oid::TIMESTAMP, other)),
        }
    }

    fn decode_binary(&self, raw: &[u8], ctx: &CodecContext<'_>) -> Result<Value, CodecError> {
        require_integer_datetimes(oid::TIMESTAMP, raw, ctx)?;
        let micros = read_i64(oid::TIMESTAMP, raw)?;
        if micros == i64::MAX || micros == i64::MIN {
            return Err(CodecError::unsupported(oid::TIMESTAMP, "infinite timestamps", micros));
        }
        Ok(Value::Timestamp(micros_to_utc(oid::TIMESTAMP, micros)?.naive_utc()))
    }

    fn decode_text(&self, raw: &str, ctx: &CodecContext<'_>) -> Result<Value, CodecError> {
        require_iso(oid::TIMESTAMP, raw, ctx)?;
        NaiveDateTime::parse_from_str(raw, NAIVE_FORMAT)
            .map(Value::Timestamp)
            .map_err(|e| CodecError::malformed(oid::TIMESTAMP, e.to_string(), raw))
    }
}

/// `timestamptz`, decoded to UTC. Naive input is taken as UTC.
#[derive(Debug)]
pub struct TimestampTzProcessor;

impl TimestampTzProcessor {
    fn utc(value: &Value) -> Result<DateTime<Utc>, CodecError> {
        match value {
            Value::TimestampTz(ts) => Ok(*ts),
            Value::Timestamp(ts) => Ok(ts.and_utc()),
            other => Err(CodecError::wrong_value(oid::TIMESTAMPTZ, other)),
        }
    }
}

impl ValueProcessor for TimestampTzProcessor {
    fn oid(&self) -> Oid {
        oid::TIMESTAMPTZ
    }

    fn name(&self) -> &str {
        "timestamptz"
    }

    fn encode_binary(&self, value: &Value, ctx: &CodecContext<'_>, out: &mut BytesMut) -> Result<(), CodecError> {
        out.put_i64(utc_to_micros(&Self::utc(coerce(self, value, ctx)?.as_ref())?));
        Ok(())
    }

    fn encode_text(&self, value: &Value, _: &CodecContext<'_>) -> Result<String, CodecError> {
        if let Value::Text(s) = value {
            return Ok(s.clone());
        }
        Ok(format!("{}+00", Self::utc(value)?.format(NAIVE_FORMAT)))
    }

    fn decode_binary(&self, raw: &[u8], ctx: &CodecContext<'_>) -> Result<Value, CodecError> {
        require_integer_datetimes(oid::TIMESTAMPTZ, raw, ctx)?;
        let micros = read_i64(oid::TIMESTAMPTZ, raw)?;
        if micros == i64::MAX || micros == i64::MIN {
            return Err(CodecError::unsupported(oid::TIMESTAMPTZ, "infinite timestamps", micros));
        }
        micros_to_utc(oid::TIMESTAMPTZ, micros).map(Value::TimestampTz)
    }

    fn decode_text(&self, raw: &str, ctx: &CodecContext<'_>) -> Result<Value, CodecError> {
        require_iso(oid::TIMESTAMPTZ, raw, ctx)?;
        let bad = |reason: String| CodecError::malformed(oid::TIMESTAMPTZ, reason, raw);
        // The offset follows the clock, so search only after the date part.
        let time_start = raw.find(' ').ok_or_else(|| bad("missing time part".into()))?;
        let (clock, offset) = split_offset(&raw[time_start..])
            .ok_or_else(|| bad("missing UTC offset".into()))?;
        let naive = NaiveDateTime::parse_from_str(&format!("{}{}", &raw[..time_start], clock), NAIVE_FORMAT)
            .map_err(|e| bad(e.to_string()))?;
        let offset = parse_offset(oid::TIMESTAMPTZ, offset)?;
        offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| Value::TimestampTz(dt.with_timezone(&Utc)))
            .ok_or_else(|| bad("ambiguous local time".into()))
    }
}

/// Add a truncated amount, failing when it leaves the field's range.
fn add_scaled_i32(field: &mut i32, amount: f64) -> Option<()> {
    let amount = amount.trunc();
    if !(f64::from(i32::MIN)..=f64::from(i32::MAX)).contains(&amount) {
        return None;
    }
    *field = field.checked_add(amount as i32)?;
    Some(())
}

fn add_scaled_i64(field: &mut i64, amount: f64) -> Option<()> {
    let amount = amount.trunc();
    // `i64::MAX as f64` rounds up to 2^63
    if !(i64::MIN as f64..i64::MAX as f64).contains(&amount) {
        return None;
    }
    *field = field.checked_add(amount as i64)?;
    Some(())
}

#[derive(Debug)]
pub struct IntervalProcessor;

impl IntervalProcessor {
    /// Render in the `postgres` IntervalStyle.
    pub fn format(iv: &Interval) -> String {
        let mut parts = Vec::new();
        if iv.months != 0 {
            parts.push(format!("{} mons", iv.months));
        }
        if iv.days != 0 {
            parts.push(format!("{} days", iv.days));
        }
        if iv.microseconds != 0 || parts.is_empty() {
            let sign = if iv.microseconds < 0 { "-" } else { "" };
            let abs = iv.microseconds.unsigned_abs();
            let secs = abs / 1_000_000;
            let frac = abs % 1_000_000;
            let mut clock = format!("{sign}{:02}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60);
            if frac != 0 {
                clock.push_str(format!(".{frac:06}").trim_end_matches('0'));
            }
            parts.push(clock);
        }
        parts.join(" ")
    }

    /// Parse the `postgres` IntervalStyle output, e.g. `1 year 2 mons -3 days 04:05:06.5`.
    pub fn parse(raw: &str) -> Result<Interval, CodecError> {
        let bad = || CodecError::malformed(oid::INTERVAL, "invalid interval literal", raw);
        let mut iv = Interval::default();
        let mut tokens = raw.split_whitespace().peekable();
        while let Some(tok) = tokens.next() {
            if tok.contains(':') {
                let clock = Self::parse_clock(tok).ok_or_else(bad)?;
                iv.microseconds = iv.microseconds.checked_add(clock).ok_or_else(bad)?;
                continue;
            }
            if tok == "ago" {
                iv = Interval::new(
                    iv.months.checked_neg().ok_or_else(bad)?,
                    iv.days.checked_neg().ok_or_else(bad)?,
                    iv.microseconds.checked_neg().ok_or_else(bad)?,
                );
                continue;
            }
            let n: f64 = tok.parse().map_err(|_| bad())?;
            let unit = tokens.next().ok_or_else(bad)?.to_ascii_lowercase();
            let unit = unit.trim_end_matches('s');
            let added = match unit {
                "year" => add_scaled_i32(&mut iv.months, n * 12.0),
                "mon" | "month" => add_scaled_i32(&mut iv.months, n),
                "week" => add_scaled_i32(&mut iv.days, n * 7.0),
                "day" => add_scaled_i32(&mut iv.days, n),
                "hour" => add_scaled_i64(&mut iv.microseconds, n * 3_600_000_000.0),
                "min" | "minute" => add_scaled_i64(&mut iv.microseconds, n * 60_000_000.0),
                "sec" | "second" => add_scaled_i64(&mut iv.microseconds, n * 1_000_000.0),
                _ => None,
            };
            added.ok_or_else(bad)?;
        }
        Ok(iv)
    }

    fn parse_clock(tok: &str) -> Option<i64> {
        let (negative, body) = match tok.as_bytes().first() {
            Some(b'-') => (true, &tok[1..]),
            Some(b'+') => (false, &tok[1..]),
            _ => (false, tok),
        };
        let mut fields = body.split(':');
        let hours: i64 = digits(fields.next()?)?;
        let minutes: i64 = digits(fields.next()?)?;
        let seconds = match fields.next() {
            Some(s) => {
                let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
                let whole: i64 = digits(whole)?;
                if !frac.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                // sub-microsecond digits are truncated
                let micros = frac
                    .bytes()
                    .chain(std::iter::repeat(b'0'))
                    .take(6)
                    .fold(0i64, |acc, b| acc * 10 + i64::from(b - b'0'));
                whole.checked_mul(MICROS_PER_SECOND)?.checked_add(micros)?
            }
            None => 0,
        };
        if fields.next().is_some() {
            return None;
        }
        let total = hours
            .checked_mul(3600)?
            .checked_add(minutes.checked_mul(60)?)?
            .checked_mul(MICROS_PER_SECOND)?
            .checked_add(seconds)?;
        Some(if negative { -total } else { total })
    }
}

impl ValueProcessor for IntervalProcessor {
    fn oid(&self) -> Oid {
        oid::INTERVAL
    }

    fn name(&self) -> &str {
        "interval"
    }

    fn encode_binary(&self, value: &Value, ctx: &CodecContext<'_>, out: &mut BytesMut) -> Result<(), CodecError> {
        match coerce(self, value, ctx)?.as_ref() {
            Value::Interval(iv) => {
                out.put_i64(iv.microseconds);
                out.put_i32(iv.days);
                out.put_i32(iv.months);
            }
            other => return Err(CodecError::wrong_value(oid::INTERVAL, other)),
        }
        Ok(())
    }

    fn encode_text(&self, value: &Value, _: &CodecContext<'_>) -> Result<String, CodecError> {
        match value {
            Value::Interval(iv) => Ok(Self::format(iv)),
            Value::Text(s) => Ok(s.clone()),
            other => Err(CodecError::wrong_value(oid::INTERVAL, other)),
        }
    }

    fn decode_binary(&self, raw: &[u8], ctx: &CodecContext<'_>) -> Result<Value, CodecError> {
        require_integer_datetimes(oid::INTERVAL, raw, ctx)?;
        let mut r = WireReader::new(raw);
        let bad = |_| CodecError::malformed(oid::INTERVAL, "expected 16 bytes", raw);
        let microseconds = r.read_i64().map_err(bad)?;
        let days = r.read_i32().map_err(bad)?;
        let months = r.read_i32().map_err(bad)?;
        r.finish().map_err(bad)?;
        Ok(Value::Interval(Interval::new(months, days, microseconds)))
    }

    fn decode_text(&self, raw: &str, _: &CodecContext<'_>) -> Result<Value, CodecError> {
        Self::parse(raw).map(Value::Interval)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{CodecParams, TypeRegistry};

    fn with_ctx<R>(params: CodecParams, f: impl FnOnce(&CodecContext<'_>) -> R) -> R {
        let reg = TypeRegistry::shared();
        f(&CodecContext::new(&params, &reg))
    }

    fn round_trip(p: &dyn ValueProcessor, v: Value) {
        with_ctx(CodecParams::default(), |ctx| {
            let mut buf = BytesMut::new();
            p.encode_binary(&v, ctx, &mut buf).unwrap();
            assert_eq!(p.decode_binary(&buf, ctx).unwrap(), v, "binary {v:?}");
            let text = p.encode_text(&v, ctx).unwrap();
            assert_eq!(p.decode_text(&text, ctx).unwrap(), v, "text {text}");
        });
    }

    #[test]
    fn epoch_is_zero() {
        with_ctx(CodecParams::default(), |ctx| {
            let mut buf = BytesMut::new();
            let epoch = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
            DateProcessor.encode_binary(&Value::Date(epoch), ctx, &mut buf).unwrap();
            assert_eq!(&buf[..], &[0, 0, 0, 0]);

            buf.clear();
            let ts = epoch.and_hms_opt(0, 0, 1).unwrap();
            TimestampProcessor.encode_binary(&Value::Timestamp(ts), ctx, &mut buf).unwrap();
            assert_eq!(i64::from_be_bytes(buf[..].try_into().unwrap()), 1_000_000);
        });
    }

    #[test]
    fn datetimes_round_trip() {
        let date = NaiveDate::from_ymd_opt(1999, 12, 31).unwrap();
        round_trip(&DateProcessor, Value::Date(date));
        let ts = date.and_hms_micro_opt(23, 59, 59, 123_456).unwrap();
        round_trip(&TimestampProcessor, Value::Timestamp(ts));
        round_trip(&TimestampTzProcessor, Value::TimestampTz(ts.and_utc()));
        round_trip(&TimeProcessor, Value::Time(NaiveTime::from_hms_opt(13, 45, 0).unwrap()));
        round_trip(
            &TimeTzProcessor,
            Value::TimeTz(
                NaiveTime::from_hms_micro_opt(8, 0, 0, 500).unwrap(),
                FixedOffset::east_opt(5 * 3600 + 1800).unwrap(),
            ),
        );
        round_trip(&IntervalProcessor, Value::Interval(Interval::new(14, -3, 4_500_000)));
        round_trip(&IntervalProcessor, Value::Interval(Interval::new(0, 0, -1)));
    }

    #[test]
    fn timetz_offset_is_stored_negated() {
        with_ctx(CodecParams::default(), |ctx| {
            let mut buf = BytesMut::new();
            let v = Value::TimeTz(NaiveTime::MIN, FixedOffset::east_opt(3600).unwrap());
            TimeTzProcessor.encode_binary(&v, ctx, &mut buf).unwrap();
            assert_eq!(i32::from_be_bytes(buf[8..12].try_into().unwrap()), -3600);
        });
    }

    #[test]
    fn timestamptz_text_with_offset() {
        with_ctx(CodecParams::default(), |ctx| {
            let v = TimestampTzProcessor
                .decode_text("2024-03-01 12:00:00+02", ctx)
                .unwrap();
            let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap()
                .and_utc();
            assert_eq!(v, Value::TimestampTz(expected));
        });
    }

    #[test]
    fn interval_postgres_style() {
        assert_eq!(
            IntervalProcessor::parse("1 year 2 mons -3 days 04:05:06.5").unwrap(),
            Interval::new(14, -3, 14_706_500_000)
        );
        assert_eq!(IntervalProcessor::format(&Interval::default()), "00:00:00");
        assert!(IntervalProcessor::parse("3 fortnights").is_err());
    }

    #[test]
    fn out_of_range_text_is_malformed() {
        with_ctx(CodecParams::default(), |ctx| {
            for raw in [
                "12:00:00+99999999",
                "12:00:00+9999999999",
                "12:00:00+05:30:00:00",
                "12:00:00+-5",
                "12:00:00+",
                "12:00:00+24:00:01",
            ] {
                let err = TimeTzProcessor.decode_text(raw, ctx).unwrap_err();
                assert!(matches!(err, CodecError::Malformed { .. }), "{raw}: {err:?}");
            }
            for raw in [
                "2024-03-01 12:00:00+99999999",
                "2024-03-01 12:00:00",
                "2024-03-01",
                "2024-13-01 12:00:00+00",
            ] {
                assert!(TimestampTzProcessor.decode_text(raw, ctx).is_err(), "{raw}");
            }
            for raw in ["2024-02-30 00:00:00", "99999999999-01-01 00:00:00", "2024-01-01T00:00:00"] {
                assert!(TimestampProcessor.decode_text(raw, ctx).is_err(), "{raw}");
            }
            for raw in [
                "9999999999999:00:00",
                "99999999999999999999:00:00",
                "00:00:9223372036854.775808",
                "00:00:01.5é",
                "00:+1:00",
                "1e300 years",
                "nan days",
                "2147483647 mons 1 mon",
                "-2147483648 days ago",
                "9223372036854 secs 9223372036854 secs",
            ] {
                let err = IntervalProcessor.decode_text(raw, ctx).unwrap_err();
                assert!(matches!(err, CodecError::Malformed { .. }), "{raw}: {err:?}");
            }
        });
    }

    #[test]
    fn text_values_are_checked_before_binary_encoding() {
        with_ctx(CodecParams::default(), |ctx| {
            let mut buf = BytesMut::new();
            assert!(TimeTzProcessor
                .encode_binary(&Value::from("12:00:00+99999999"), ctx, &mut buf)
                .is_err());
            assert!(IntervalProcessor
                .encode_binary(&Value::from("9999999999999:00:00"), ctx, &mut buf)
                .is_err());
            assert!(buf.is_empty());

            DateProcessor.encode_binary(&Value::from("2000-01-02"), ctx, &mut buf).unwrap();
            assert_eq!(&buf[..], &[0, 0, 0, 1]);
            buf.clear();
            TimestampTzProcessor
                .encode_binary(&Value::from("2000-01-01 01:00:00+01"), ctx, &mut buf)
                .unwrap();
            assert_eq!(&buf[..], &[0; 8]);
        });
    }

    #[test]
    fn legacy_settings_are_unsupported() {
        let mut params = CodecParams::default();
        params.apply("integer_datetimes", "off");
        params.apply("DateStyle", "SQL, DMY");
        with_ctx(params, |ctx| {
            let err = TimestampProcessor.decode_binary(&[0; 8], ctx).unwrap_err();
            assert!(matches!(err, CodecError::Unsupported { .. }));
            let err = DateProcessor.decode_text("31/12/1999", ctx).unwrap_err();
            assert!(matches!(err, CodecError::Unsupported { .. }));
        });
    }
}
