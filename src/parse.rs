//! Tolerant parsing of shape-polymorphic service responses.
//!
//! The proof endpoints (and, to a lesser extent, the decryption service)
//! disagree on how they encode numbers and booleans: a plain JSON number, a
//! decimal string, a big-integer wrapper object (`{"_bn": "5"}`), or a
//! stringified boolean (`"true"` / `"1"`). Every field read from any of
//! those endpoints goes through this module so the rest of the crate never
//! pattern-matches on response shapes.
//!
//! All functions return `Option` and never error on a shape mismatch: an
//! unrecognized shape is simply "no value", and the caller decides what an
//! absent field means.

use serde_json::Value;

/// Wrapper keys that big-integer objects show up under.
const BIGINT_WRAPPER_KEYS: &[&str] = &["_bn", "bn", "hex", "value"];

pub fn lenient_u128(v: &Value) -> Option<u128> {
    match v {
        Value::Number(n) => n.as_u64().map(u128::from),
        Value::String(s) => parse_decimal_u128(s),
        Value::Object(map) => {
            for key in BIGINT_WRAPPER_KEYS {
                if let Some(inner) = map.get(*key) {
                    if let Some(parsed) = lenient_u128(inner) {
                        return Some(parsed);
                    }
                }
            }
            // Single-keyed container of any name: recurse into the value.
            if map.len() == 1 {
                return lenient_u128(map.values().next()?);
            }
            None
        }
        _ => None,
    }
}

pub fn lenient_u64(v: &Value) -> Option<u64> {
    lenient_u128(v).and_then(|n| u64::try_from(n).ok())
}

pub fn lenient_u32(v: &Value) -> Option<u32> {
    lenient_u128(v).and_then(|n| u32::try_from(n).ok())
}

pub fn lenient_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_u64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        Value::Object(map) if map.len() == 1 => lenient_bool(map.values().next()?),
        _ => None,
    }
}

/// Parse a fixed-width byte string: a JSON array of numbers or a hex string
/// (with or without `0x`). Proof points come back in both encodings.
pub fn lenient_bytes<const N: usize>(v: &Value) -> Option<[u8; N]> {
    match v {
        Value::Array(items) => {
            if items.len() != N {
                return None;
            }
            let mut out = [0u8; N];
            for (i, item) in items.iter().enumerate() {
                let byte = item.as_u64()?;
                out[i] = u8::try_from(byte).ok()?;
            }
            Some(out)
        }
        Value::String(s) => {
            let s = s.trim().trim_start_matches("0x");
            let bytes = hex::decode(s).ok()?;
            bytes.try_into().ok()
        }
        _ => None,
    }
}

fn parse_decimal_u128(s: &str) -> Option<u128> {
    let s = s.trim();
    if let Some(hex_digits) = s.strip_prefix("0x") {
        return u128::from_str_radix(hex_digits, 16).ok();
    }
    s.parse::<u128>().ok()
}
