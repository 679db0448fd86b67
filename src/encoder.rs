//! LOAD DATA row encoder.
//!
//! Renders `Value`s into the tab-delimited text format the server parses
//! for `LOAD DATA LOCAL INFILE`:
//! - NULL: `\N`
//! - Boolean: `1` or `0`
//! - Integers: decimal digits
//! - Float: shortest round-trip digits, `%g` layout
//! - Timestamp: `YYYY-MM-DD HH:MM:SS[.ffffff]` in the connection location
//! - Text/bytes: `\\`, `\n`, `\r`, `\t` escaped, everything else verbatim
//!
//! This is field-delimiter escaping, not SQL string quoting: quotes pass
//! through untouched.

use std::borrow::Cow;
use std::fmt;

use bytes::BytesMut;
use chrono::{DateTime, Datelike, TimeDelta, Timelike, Utc};

use crate::config::Location;
use crate::value::{Value, is_zero_timestamp};

/// The encoded form of a single value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedValue<'a>(Cow<'a, [u8]>);

impl EncodedValue<'_> {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The encoded text, if the source bytes were valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Whether the encoding still points into the source value.
    pub fn is_borrowed(&self) -> bool {
        matches!(self.0, Cow::Borrowed(_))
    }
}

impl PartialEq<str> for EncodedValue<'_> {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&str> for EncodedValue<'_> {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl fmt::Display for EncodedValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Encode one value, borrowing text and bytes that need no escaping.
pub fn encode_value<'a>(value: &'a Value, location: &Location) -> EncodedValue<'a> {
    match value {
        Value::Text(s) => EncodedValue(escape_row_bytes(s.as_bytes())),
        Value::Bytes(Some(b)) => EncodedValue(escape_row_bytes(b)),
        _ => {
            let mut buf = BytesMut::with_capacity(32);
            write_value(&mut buf, value, location);
            EncodedValue(Cow::Owned(buf.to_vec()))
        }
    }
}

/// Append the encoding of `value` to `buf`.
#[inline]
pub fn write_value(buf: &mut BytesMut, value: &Value, location: &Location) {
    match value {
        Value::Null | Value::Bytes(None) => buf.extend_from_slice(b"\\N"),

        Value::Bool(b) => buf.extend_from_slice(if *b { b"1" } else { b"0" }),

        Value::Int(n) => {
            let mut tmp = itoa::Buffer::new();
            buf.extend_from_slice(tmp.format(*n).as_bytes());
        }

        Value::UInt(n) => {
            let mut tmp = itoa::Buffer::new();
            buf.extend_from_slice(tmp.format(*n).as_bytes());
        }

        Value::Float(n) => write_float(buf, *n),

        Value::Timestamp(ts) => write_timestamp(buf, ts, location),

        Value::Bytes(Some(b)) => escape_into(buf, b),

        Value::Text(s) => escape_into(buf, s.as_bytes()),

        Value::Unsupported(kind) => {
            tracing::warn!("unsupported type '{}' in LOAD DATA row, sending empty field", kind);
        }
    }
}

/// Append one row: values joined by tabs, terminated by a newline.
pub fn write_row(buf: &mut BytesMut, values: &[Value], location: &Location) {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            buf.extend_from_slice(b"\t");
        }
        write_value(buf, value, location);
    }
    buf.extend_from_slice(b"\n");
}

#[inline]
fn needs_escape(c: u8) -> bool {
    matches!(c, b'\\' | b'\n' | b'\r' | b'\t')
}

/// Escape the row delimiters in `text`. Returns the input untouched when
/// nothing needs escaping.
pub fn escape_row_text(text: &str) -> Cow<'_, str> {
    let Some(start) = text.bytes().position(needs_escape) else {
        return Cow::Borrowed(text);
    };

    let mut out = String::with_capacity(text.len() + 8);
    out.push_str(&text[..start]);
    for c in text[start..].chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Byte-level `escape_row_text`, for values that need not be UTF-8.
pub fn escape_row_bytes(bytes: &[u8]) -> Cow<'_, [u8]> {
    if !bytes.iter().copied().any(needs_escape) {
        return Cow::Borrowed(bytes);
    }
    let mut buf = BytesMut::with_capacity(bytes.len() + 8);
    escape_into(&mut buf, bytes);
    Cow::Owned(buf.to_vec())
}

fn escape_into(buf: &mut BytesMut, bytes: &[u8]) {
    let Some(start) = bytes.iter().copied().position(needs_escape) else {
        buf.extend_from_slice(bytes);
        return;
    };

    buf.extend_from_slice(&bytes[..start]);
    for &c in &bytes[start..] {
        match c {
            b'\\' => buf.extend_from_slice(b"\\\\"),
            b'\n' => buf.extend_from_slice(b"\\n"),
            b'\r' => buf.extend_from_slice(b"\\r"),
            b'\t' => buf.extend_from_slice(b"\\t"),
            _ => buf.extend_from_slice(&[c]),
        }
    }
}

#[inline]
fn push_two_digits(buf: &mut BytesMut, n: u32) {
    buf.extend_from_slice(&[b'0' + (n / 10 % 10) as u8, b'0' + (n % 10) as u8]);
}

fn write_timestamp(buf: &mut BytesMut, ts: &DateTime<Utc>, location: &Location) {
    if is_zero_timestamp(ts) {
        buf.extend_from_slice(b"0000-00-00");
        return;
    }

    // +500ns turns the truncation below into round-half-up at microseconds
    let local = location.to_naive(ts);
    let local = local
        .checked_add_signed(TimeDelta::nanoseconds(500))
        .unwrap_or(local);

    let year = local.year();
    if (0..=9999).contains(&year) {
        push_two_digits(buf, year as u32 / 100);
        push_two_digits(buf, year as u32 % 100);
    } else {
        let mut tmp = itoa::Buffer::new();
        buf.extend_from_slice(tmp.format(year).as_bytes());
    }
    buf.extend_from_slice(b"-");
    push_two_digits(buf, local.month());
    buf.extend_from_slice(b"-");
    push_two_digits(buf, local.day());
    buf.extend_from_slice(b" ");
    push_two_digits(buf, local.hour());
    buf.extend_from_slice(b":");
    push_two_digits(buf, local.minute());
    buf.extend_from_slice(b":");
    push_two_digits(buf, local.second());

    // leap seconds carry nanos >= 1e9
    let micro = local.nanosecond() % 1_000_000_000 / 1000;
    if micro != 0 {
        buf.extend_from_slice(b".");
        push_two_digits(buf, micro / 10_000);
        push_two_digits(buf, micro / 100 % 100);
        push_two_digits(buf, micro % 100);
    }
}

/// Shortest round-trip float in `%g` layout: exponent form when the decimal
/// exponent is below -4 or at least 6 (`1e+06`, `1.5e-07`), plain decimal
/// otherwise (`42.23`, `0.001`).
fn write_float(buf: &mut BytesMut, n: f64) {
    if n.is_nan() {
        buf.extend_from_slice(b"NaN");
        return;
    }
    if n.is_infinite() {
        buf.extend_from_slice(if n > 0.0 { b"+Inf" } else { b"-Inf" });
        return;
    }

    let mut tmp = ryu::Buffer::new();
    let (negative, digits, point) = split_decimal(tmp.format_finite(n));

    if negative {
        buf.extend_from_slice(b"-");
    }
    if digits.is_empty() {
        buf.extend_from_slice(b"0");
        return;
    }

    let exp = point - 1;
    if !(-4..6).contains(&exp) {
        buf.extend_from_slice(&digits[..1]);
        if digits.len() > 1 {
            buf.extend_from_slice(b".");
            buf.extend_from_slice(&digits[1..]);
        }
        buf.extend_from_slice(if exp < 0 { b"e-" } else { b"e+" });
        let abs = exp.unsigned_abs();
        if abs < 10 {
            buf.extend_from_slice(b"0");
        }
        let mut tmp = itoa::Buffer::new();
        buf.extend_from_slice(tmp.format(abs).as_bytes());
        return;
    }

    let digit_at = |i: i32| -> u8 {
        if i >= 0 && (i as usize) < digits.len() {
            digits[i as usize]
        } else {
            b'0'
        }
    };

    if point > 0 {
        for i in 0..point {
            buf.extend_from_slice(&[digit_at(i)]);
        }
    } else {
        buf.extend_from_slice(b"0");
    }

    let decimals = digits.len() as i32 - point;
    if decimals > 0 {
        buf.extend_from_slice(b".");
        for i in 0..decimals {
            buf.extend_from_slice(&[digit_at(point + i)]);
        }
    }
}

/// Split a finite float rendering into sign, significant digits (no leading
/// or trailing zeros) and the decimal point position relative to them.
fn split_decimal(text: &str) -> (bool, Vec<u8>, i32) {
    let (negative, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (mantissa, exp10) = match text.split_once(['e', 'E']) {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (text, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));

    let mut digits: Vec<u8> = int_part.bytes().chain(frac_part.bytes()).collect();
    let mut point = int_part.len() as i32 + exp10;

    let leading = digits.iter().take_while(|&&d| d == b'0').count();
    digits.drain(..leading);
    point -= leading as i32;
    while digits.last() == Some(&b'0') {
        digits.pop();
    }

    (negative, digits, point)
}
