//! Ed25519 verification of signed result documents.
//!
//! The signed message is the `result` array written the way Python's
//! `json.dumps(result, sort_keys=True, separators=(",", ":"))` writes it:
//! compact, object keys sorted at every depth, non-ASCII characters escaped as
//! `\uXXXX`, and floats in `repr` form (`1e-05`, `1e+16`, `10.0`).

use crate::artifact::RawResult;
use ed25519_dalek::pkcs8::DecodePublicKey;
use ed25519_dalek::{PUBLIC_KEY_LENGTH, Signature, Verifier, VerifyingKey};
use log::debug;
use serde_json::{Number, Value};

/// Format a float like Python's `repr`: shortest round-trip digits, exponent
/// form below `1e-4` and from `1e16` up.
fn python_float_repr(value: f64) -> String {
    let scientific = format!("{:e}", value.abs());
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let sign = if value.is_sign_negative() { "-" } else { "" };
    let point = exponent + 1;

    if point <= -4 || point > 16 {
        let (first, rest) = digits.split_at(1);
        let fraction = if rest.is_empty() {
            String::new()
        } else {
            format!(".{rest}")
        };
        let exponent_sign = if exponent < 0 { '-' } else { '+' };
        return format!(
            "{sign}{first}{fraction}e{exponent_sign}{:02}",
            exponent.unsigned_abs()
        );
    }

    let point = usize::try_from(point.max(0)).unwrap_or(0);
    if exponent < 0 {
        let zeros = "0".repeat(exponent.unsigned_abs() as usize - 1);
        format!("{sign}0.{zeros}{digits}")
    } else if point >= digits.len() {
        let zeros = "0".repeat(point - digits.len());
        format!("{sign}{digits}{zeros}.0")
    } else {
        let (whole, fraction) = digits.split_at(point);
        format!("{sign}{whole}.{fraction}")
    }
}

fn write_number(number: &Number, out: &mut String) {
    match number.as_f64() {
        Some(value) if number.is_f64() => out.push_str(&python_float_repr(value)),
        _ => out.push_str(&number.to_string()),
    }
}

fn write_string(text: &str, out: &mut String) {
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            ' '..='~' => out.push(c),
            _ => {
                let mut units = [0_u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{unit:04x}"));
                }
            }
        }
    }
    out.push('"');
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
    }
}

/// The exact bytes a result signature covers.
#[must_use]
pub fn canonical_message(trials: &[Value]) -> Vec<u8> {
    let mut out = String::new();
    out.push('[');
    for (i, trial) in trials.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_canonical(trial, &mut out);
    }
    out.push(']');
    out.into_bytes()
}

/// Parse a registered key: PEM `SubjectPublicKeyInfo`, or the raw 32-byte key in hex.
#[must_use]
pub fn parse_verification_key(key: &str) -> Option<VerifyingKey> {
    let key = key.trim();
    if key.starts_with("-----BEGIN") {
        return VerifyingKey::from_public_key_pem(key).ok();
    }
    let bytes = hex::decode(key).ok()?;
    let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

/// Check a hex signature over `message` against a registered key.
///
/// Missing signature, bad hex, bad key material and a failed check all return
/// `false`.
#[must_use]
pub fn verify_signature(verification_key: &str, message: &[u8], signature_hex: Option<&str>) -> bool {
    let Some(signature_hex) = signature_hex else {
        debug!("No signature present");
        return false;
    };
    let Ok(signature_bytes) = hex::decode(signature_hex.trim()) else {
        debug!("Signature is not valid hex");
        return false;
    };
    let Ok(signature) = Signature::from_slice(&signature_bytes) else {
        debug!("Signature has the wrong length");
        return false;
    };
    let Some(key) = parse_verification_key(verification_key) else {
        debug!("Registered key is not a valid Ed25519 public key");
        return false;
    };
    key.verify(message, &signature).is_ok()
}

/// True only if `raw` carries a valid signature by the holder of `verification_key`.
#[must_use]
pub fn verify_result(raw: &RawResult, verification_key: &str) -> bool {
    let message = canonical_message(&raw.result);
    verify_signature(verification_key, &message, raw.signature.as_deref())
}
