//! # Order-Preserving Value Encodings
//!
//! Encodings such that byte-wise lexicographic comparison of the encoded
//! form matches the natural order of the source value:
//!
//! | Type    | Encoding                                                  |
//! |---------|-----------------------------------------------------------|
//! | i64     | big-endian, sign bit flipped                              |
//! | f64     | to_bits; negative → invert all, else flip sign; then +1   |
//! | date    | its millisecond value, as i64                             |
//! | string  | UTF-8 bytes +2 each, 0x01-terminated, truncated to 128    |
//! | bytes   | SHA-1 digest (identity, not order)                        |
//! | nil     | fixed zero digest                                         |
//! | list/map| SHA-1 of canonical serialization (identity, not order)    |
//!
//! Descending variants are the bitwise NOT of the ascending form; the
//! bitemporal index uses them so newest-first is a forward scan.

use tempora_core::canonical;
use tempora_core::error::{Error, Result};
use tempora_core::types::DIGEST_LEN;
use tempora_core::value::Value;

/// Strings longer than this are truncated in index keys.
pub const MAX_STRING_KEY_BYTES: usize = 128;
/// Terminator after shifted string bytes; below any shifted byte.
pub const STRING_TERMINATOR: u8 = 0x01;
/// Encoding of nil, and the tombstone content hash.
pub const NIL_DIGEST: [u8; DIGEST_LEN] = [0u8; DIGEST_LEN];

const SIGN_BIT: u64 = 0x8000_0000_0000_0000;

/// Signed 64-bit integer, ascending.
pub fn encode_i64(x: i64) -> [u8; 8] {
    ((x as u64) ^ SIGN_BIT).to_be_bytes()
}

pub fn decode_i64(bytes: &[u8]) -> Result<i64> {
    Ok((u64::from_be_bytes(fixed8(bytes)?) ^ SIGN_BIT) as i64)
}

/// Signed 64-bit integer, descending (larger values sort first).
pub fn encode_i64_desc(x: i64) -> [u8; 8] {
    let mut bytes = encode_i64(x);
    for b in &mut bytes {
        *b = !*b;
    }
    bytes
}

pub fn decode_i64_desc(bytes: &[u8]) -> Result<i64> {
    let mut fixed = fixed8(bytes)?;
    for b in &mut fixed {
        *b = !*b;
    }
    decode_i64(&fixed)
}

/// Unsigned 64-bit integer, descending.
pub fn encode_u64_desc(x: u64) -> [u8; 8] {
    let mut bytes = x.to_be_bytes();
    for b in &mut bytes {
        *b = !*b;
    }
    bytes
}

pub fn decode_u64_desc(bytes: &[u8]) -> Result<u64> {
    let mut fixed = fixed8(bytes)?;
    for b in &mut fixed {
        *b = !*b;
    }
    Ok(u64::from_be_bytes(fixed))
}

/// Unsigned 16-bit integer, descending.
pub fn encode_u16_desc(x: u16) -> [u8; 2] {
    let bytes = x.to_be_bytes();
    [!bytes[0], !bytes[1]]
}

pub fn decode_u16_desc(bytes: &[u8]) -> Result<u16> {
    if bytes.len() != 2 {
        return Err(Error::CorruptIndex {
            details: format!("expected 2-byte field, got {}", bytes.len()),
        });
    }
    Ok(u16::from_be_bytes([!bytes[0], !bytes[1]]))
}

/// IEEE-754 double, ascending. Total order with -0.0 just below 0.0.
pub fn encode_f64(x: f64) -> [u8; 8] {
    let bits = x.to_bits();
    let reordered = if bits & SIGN_BIT != 0 { !bits } else { bits ^ SIGN_BIT };
    reordered.wrapping_add(1).to_be_bytes()
}

pub fn decode_f64(bytes: &[u8]) -> Result<f64> {
    let reordered = u64::from_be_bytes(fixed8(bytes)?).wrapping_sub(1);
    let bits = if reordered & SIGN_BIT != 0 {
        reordered ^ SIGN_BIT
    } else {
        !reordered
    };
    Ok(f64::from_bits(bits))
}

/// Value encoding per the table above. Identity encodings (bytes, nil,
/// composites) are digests: equal values collide to equal keys, but their
/// byte order carries no meaning.
pub fn encode_value(value: &Value) -> Vec<u8> {
    match value {
        Value::Null => NIL_DIGEST.to_vec(),
        Value::Long(x) => encode_i64(*x).to_vec(),
        Value::Double(x) => encode_f64(*x).to_vec(),
        Value::Date(t) => encode_i64(t.millis()).to_vec(),
        Value::String(s) => encode_string(s),
        Value::Bytes(b) => canonical::digest(b).to_vec(),
        Value::List(_) | Value::Map(_) => canonical::hash_value(value).to_vec(),
    }
}

fn encode_string(s: &str) -> Vec<u8> {
    let raw = s.as_bytes();
    let truncated = &raw[..raw.len().min(MAX_STRING_KEY_BYTES)];
    let mut out = Vec::with_capacity(truncated.len() + 1);
    // UTF-8 bytes never exceed 0xF4, so the +2 shift cannot overflow
    for b in truncated {
        out.push(b + 2);
    }
    out.push(STRING_TERMINATOR);
    out
}

fn fixed8(bytes: &[u8]) -> Result<[u8; 8]> {
    bytes.try_into().map_err(|_| Error::CorruptIndex {
        details: format!("expected 8-byte field, got {}", bytes.len()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use tempora_core::types::Timestamp;

    fn assert_ordered<T: PartialOrd + std::fmt::Debug + Copy>(
        a: T,
        b: T,
        enc: impl Fn(T) -> [u8; 8],
    ) {
        if a < b {
            assert!(enc(a) < enc(b), "{:?} < {:?} but encodings disagree", a, b);
        } else if b < a {
            assert!(enc(b) < enc(a), "{:?} < {:?} but encodings disagree", b, a);
        }
    }

    #[test]
    fn test_i64_order_preservation() {
        let mut rng = rand::thread_rng();
        let mut samples: Vec<i64> = (0..500).map(|_| rng.gen()).collect();
        samples.extend([i64::MIN, -1, 0, 1, i64::MAX]);
        for pair in samples.windows(2) {
            assert_ordered(pair[0], pair[1], encode_i64);
        }
    }

    #[test]
    fn test_i64_roundtrip() {
        for x in [i64::MIN, -12345, -1, 0, 1, 12345, i64::MAX] {
            assert_eq!(decode_i64(&encode_i64(x)).unwrap(), x);
            assert_eq!(decode_i64_desc(&encode_i64_desc(x)).unwrap(), x);
        }
    }

    #[test]
    fn test_i64_desc_reverses_order() {
        assert!(encode_i64_desc(10) < encode_i64_desc(9));
        assert!(encode_i64_desc(0) < encode_i64_desc(-1));
        assert!(encode_i64_desc(i64::MAX) < encode_i64_desc(i64::MIN));
    }

    #[test]
    fn test_u64_desc_roundtrip_and_order() {
        for x in [0u64, 1, 42, u64::MAX] {
            assert_eq!(decode_u64_desc(&encode_u64_desc(x)).unwrap(), x);
        }
        assert!(encode_u64_desc(5) < encode_u64_desc(4));
    }

    #[test]
    fn test_f64_order_preservation() {
        let mut rng = rand::thread_rng();
        let mut samples: Vec<f64> = (0..500).map(|_| rng.gen::<f64>() * 1e12 - 5e11).collect();
        samples.extend([f64::MIN, -1.5, -0.0, 0.0, 1.5, f64::MAX]);
        for a in &samples {
            for b in &samples {
                assert_ordered(*a, *b, encode_f64);
            }
        }
    }

    #[test]
    fn test_f64_roundtrip() {
        for x in [f64::MIN, -1.5, -0.0, 0.0, 0.1, 1.5, f64::MAX] {
            let decoded = decode_f64(&encode_f64(x)).unwrap();
            assert_eq!(decoded.to_bits(), x.to_bits());
        }
    }

    #[test]
    fn test_string_order_preservation() {
        let samples = ["", "a", "ab", "abc", "b", "ba", "zzz"];
        for a in &samples {
            for b in &samples {
                let (ea, eb) = (encode_value(&Value::from(*a)), encode_value(&Value::from(*b)));
                match a.cmp(b) {
                    std::cmp::Ordering::Less => assert!(ea < eb, "{} vs {}", a, b),
                    std::cmp::Ordering::Greater => assert!(ea > eb, "{} vs {}", a, b),
                    std::cmp::Ordering::Equal => assert_eq!(ea, eb),
                }
            }
        }
    }

    #[test]
    fn test_string_truncated_at_limit() {
        let long = "x".repeat(MAX_STRING_KEY_BYTES + 50);
        let encoded = encode_string(&long);
        assert_eq!(encoded.len(), MAX_STRING_KEY_BYTES + 1);
        assert_eq!(*encoded.last().unwrap(), STRING_TERMINATOR);
    }

    #[test]
    fn test_date_encodes_as_millis() {
        let t = Timestamp::from_millis(1_700_000_000_000);
        assert_eq!(
            encode_value(&Value::Date(t)),
            encode_i64(1_700_000_000_000).to_vec()
        );
    }

    #[test]
    fn test_nil_is_zero_digest() {
        assert_eq!(encode_value(&Value::Null), NIL_DIGEST.to_vec());
    }

    #[test]
    fn test_identity_encodings_are_digest_width() {
        assert_eq!(encode_value(&Value::Bytes(vec![1, 2, 3])).len(), DIGEST_LEN);
        assert_eq!(
            encode_value(&Value::List(vec![Value::Long(1)])).len(),
            DIGEST_LEN
        );
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        assert!(decode_i64(&[1, 2, 3]).is_err());
        assert!(decode_u64_desc(&[0; 9]).is_err());
        assert!(decode_u16_desc(&[0; 3]).is_err());
    }
}
