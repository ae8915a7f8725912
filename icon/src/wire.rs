//! Bidirectional codecs for every wire-level primitive (component A of the
//! schema engine): integers, addresses, hashes, binary data, signatures,
//! strings and timestamps. Each codec's `load` accepts the permissive set
//! of encodings the node tolerates; `dump` always emits the single
//! canonical form.

use chrono::{DateTime, TimeZone, Utc};
use primitive_types::U256;
use serde_json::Value;
use std::fmt;

/// A signed wire integer: `"0x"` + lowercase hex of the absolute value,
/// with an optional leading `-`. Backed by [`U256`] since on-chain values
/// (balances, total supply) routinely exceed `i128`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Int {
    negative: bool,
    magnitude: U256,
}

impl Int {
    pub fn zero() -> Int {
        Int {
            negative: false,
            magnitude: U256::zero(),
        }
    }

    pub fn from_magnitude(negative: bool, magnitude: U256) -> Self {
        let negative = negative && !magnitude.is_zero();
        Int { negative, magnitude }
    }

    pub fn is_negative(self) -> bool {
        self.negative
    }

    pub fn is_positive(self) -> bool {
        !self.negative && !self.magnitude.is_zero()
    }

    pub fn magnitude(self) -> U256 {
        self.magnitude
    }

    pub fn to_i64(self) -> Option<i64> {
        if self.magnitude > U256::from(i64::MAX as u64) {
            return None;
        }
        let v = self.magnitude.as_u64() as i64;
        Some(if self.negative { -v } else { v })
    }

    pub fn to_u64(self) -> Option<u64> {
        if self.negative || self.magnitude > U256::from(u64::MAX) {
            return None;
        }
        Some(self.magnitude.as_u64())
    }
}

impl From<i64> for Int {
    fn from(v: i64) -> Self {
        if v < 0 {
            Int::from_magnitude(true, U256::from(v.unsigned_abs()))
        } else {
            Int::from_magnitude(false, U256::from(v as u64))
        }
    }
}

impl From<u64> for Int {
    fn from(v: u64) -> Self {
        Int::from_magnitude(false, U256::from(v))
    }
}

impl fmt::Display for Int {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            write!(f, "-0x{:x}", self.magnitude)
        } else {
            write!(f, "0x{:x}", self.magnitude)
        }
    }
}

/// Range restriction applied to an [`Int`] after loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegerConstraint {
    Any,
    NonNegative,
    Positive,
    Negative,
    NonPositive,
}

impl IntegerConstraint {
    pub fn check(self, value: Int) -> bool {
        match self {
            IntegerConstraint::Any => true,
            IntegerConstraint::NonNegative => !value.is_negative(),
            IntegerConstraint::Positive => value.is_positive(),
            IntegerConstraint::Negative => value.is_negative(),
            IntegerConstraint::NonPositive => value.is_negative() || value.magnitude().is_zero(),
        }
    }
}

/// Parse an integer from any of the accepted load encodings: a native
/// JSON number, a decimal string, or a `"0x"`-prefixed hex string (either
/// case), each optionally prefixed with `-`.
pub fn load_int(value: &Value) -> Result<Int, String> {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Ok(Int::from(v))
            } else if let Some(v) = n.as_u64() {
                Ok(Int::from(v))
            } else {
                Err("is invalid".to_string())
            }
        }
        Value::String(s) => parse_int_str(s),
        _ => Err("is invalid".to_string()),
    }
}

fn parse_int_str(s: &str) -> Result<Int, String> {
    let (negative, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let magnitude = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        U256::from_str_radix(hex, 16).map_err(|_| "is invalid".to_string())?
    } else {
        U256::from_dec_str(rest).map_err(|_| "is invalid".to_string())?
    };
    Ok(Int::from_magnitude(negative, magnitude))
}

/// Always emits the canonical lowercase `"0x"`-prefixed form.
pub fn dump_int(value: Int) -> Value {
    Value::String(value.to_string())
}

/// `"0x0"`/`"0x1"` on dump; also accepts `"0"`/`"1"` and a native bool on
/// load.
pub fn load_bool(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.as_str() {
            "0x0" | "0" => Ok(false),
            "0x1" | "1" => Ok(true),
            _ => Err("is invalid".to_string()),
        },
        Value::Number(n) => match n.as_u64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err("is invalid".to_string()),
        },
        _ => Err("is invalid".to_string()),
    }
}

pub fn dump_bool(value: bool) -> Value {
    Value::String(if value { "0x1" } else { "0x0" }.to_string())
}

/// Which address prefix(es) a field accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Eoa,
    Score,
    Either,
}

/// `"hx"`/`"cx"` + 40 hex chars, normalized to lowercase.
pub fn load_address(value: &Value, kind: AddressKind) -> Result<String, String> {
    let s = value.as_str().ok_or_else(|| "is invalid".to_string())?;
    if s.len() != 42 {
        return Err("is invalid".to_string());
    }
    let (prefix, hex) = s.split_at(2);
    let prefix_ok = match kind {
        AddressKind::Eoa => prefix.eq_ignore_ascii_case("hx"),
        AddressKind::Score => prefix.eq_ignore_ascii_case("cx"),
        AddressKind::Either => prefix.eq_ignore_ascii_case("hx") || prefix.eq_ignore_ascii_case("cx"),
    };
    if !prefix_ok || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("is invalid".to_string());
    }
    Ok(format!("{}{}", prefix.to_ascii_lowercase(), hex.to_ascii_lowercase()))
}

pub fn dump_address(value: &str) -> Value {
    Value::String(value.to_ascii_lowercase())
}

/// `"0x"` + 64 lowercase hex chars; bare 64 hex accepted on load.
pub fn load_hash(value: &Value) -> Result<String, String> {
    let s = value.as_str().ok_or_else(|| "is invalid".to_string())?;
    let hex = s.strip_prefix("0x").unwrap_or(s);
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("is invalid".to_string());
    }
    Ok(format!("0x{}", hex.to_ascii_lowercase()))
}

pub fn dump_hash(value: &str) -> Value {
    let hex = value.strip_prefix("0x").unwrap_or(value);
    Value::String(format!("0x{}", hex.to_ascii_lowercase()))
}

/// `"0x"` + even-length lowercase hex on dump; on load also accepts a raw
/// byte array (for values already decoded by an earlier pass).
pub fn load_bytes(value: &Value) -> Result<Vec<u8>, String> {
    match value {
        Value::String(s) => {
            let hex = s.strip_prefix("0x").ok_or_else(|| "is invalid".to_string())?;
            if hex.len() % 2 != 0 {
                return Err("is invalid".to_string());
            }
            hex::decode(hex).map_err(|_| "is invalid".to_string())
        }
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()).ok_or_else(|| "is invalid".to_string()))
            .collect(),
        _ => Err("is invalid".to_string()),
    }
}

pub fn dump_bytes(value: &[u8]) -> Value {
    Value::String(format!("0x{}", hex::encode(value)))
}

/// A base64 string that decodes successfully. Stored as the base64 string
/// itself; decoding happens lazily where the raw bytes are needed
/// (signature recovery).
pub fn load_signature(value: &Value) -> Result<String, String> {
    use base64::Engine;
    let s = value.as_str().ok_or_else(|| "is invalid".to_string())?;
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|_| "is invalid".to_string())?;
    Ok(s.to_string())
}

pub fn dump_signature(value: &str) -> Value {
    Value::String(value.to_string())
}

pub fn load_string(value: &Value) -> Result<String, String> {
    value.as_str().map(str::to_string).ok_or_else(|| "is invalid".to_string())
}

pub fn dump_string(value: &str) -> Value {
    Value::String(value.to_string())
}

/// Signed integer microseconds since the Unix epoch.
pub fn load_timestamp(value: &Value) -> Result<DateTime<Utc>, String> {
    let micros = load_int(value)?.to_i64().ok_or_else(|| "is invalid".to_string())?;
    Utc.timestamp_micros(micros).single().ok_or_else(|| "is invalid".to_string())
}

pub fn dump_timestamp(value: DateTime<Utc>) -> Value {
    dump_int(Int::from(value.timestamp_micros()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn integer_round_trips() {
        assert_eq!(dump_int(load_int(&Value::String("0x2A".into())).unwrap()), Value::String("0x2a".into()));
        assert_eq!(load_int(&Value::String("-0x2a".into())).unwrap().to_i64(), Some(-42));
        assert_eq!(dump_int(Int::from(42i64)), Value::String("0x2a".into()));
    }

    #[test]
    fn positive_integer_rejects_zero() {
        let zero = load_int(&Value::Number(0.into())).unwrap();
        assert!(!IntegerConstraint::Positive.check(zero));
    }

    #[test]
    fn eoa_address_is_lowercased() {
        let loaded = load_address(&Value::String("hxBE258CEB872E08851F1F59694DAC2558708ECE11".into()), AddressKind::Eoa).unwrap();
        assert_eq!(loaded, "hxbe258ceb872e08851f1f59694dac2558708ece11");
    }

    #[test]
    fn hash_accepts_bare_hex() {
        let bare = "c".repeat(64);
        let loaded = load_hash(&Value::String(bare)).unwrap();
        assert!(loaded.starts_with("0x"));
        assert_eq!(loaded.len(), 66);
    }

    #[test]
    fn bytes_round_trip() {
        let loaded = load_bytes(&Value::String("0xDEADBEEF".into())).unwrap();
        assert_eq!(loaded, hex!("deadbeef"));
        assert_eq!(dump_bytes(&loaded), Value::String("0xdeadbeef".into()));
    }

    #[test]
    fn boolean_accepts_multiple_encodings() {
        assert_eq!(load_bool(&Value::String("0x1".into())), Ok(true));
        assert_eq!(load_bool(&Value::String("0".into())), Ok(false));
        assert_eq!(load_bool(&Value::Bool(true)), Ok(true));
        assert_eq!(dump_bool(true), Value::String("0x1".into()));
    }
}
