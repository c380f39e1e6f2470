/// Decodes a field from an export of unknown encoding. Pure 7-bit input
/// passes through; otherwise every byte becomes the code point of the same
/// value (Latin-1). Identity keys depend on this staying byte-for-byte stable.
pub fn decode_latin1(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(s) if data.is_ascii() => s.to_string(),
        _ => data.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Truncates a scaled amount toward zero. Values that are not finite or
/// whose negation would not fit an `i64` are rejected.
fn truncate_cents(scaled: f64) -> Option<i64> {
    if scaled.is_nan() || scaled.abs() >= i64::MAX as f64 {
        return None;
    }
    Some(scaled as i64)
}

/// Parses a decimal amount at single precision and truncates the scaled
/// value toward zero, so `-3.14` gives `-314` and `0.29` gives `28`.
pub fn cents_f32(s: &str) -> Option<i64> {
    let value: f32 = s.trim().parse().ok()?;
    truncate_cents(f64::from(value) * 100.0)
}

/// Parses a decimal amount at double precision after dropping thousands
/// separators, spaces and currency symbols, then truncates the scaled value.
pub fn cents_f64(s: &str) -> Option<i64> {
    let cleaned: String = s
        .chars()
        .filter(|c| !matches!(c, ',' | ' ' | '$' | '€' | '£' | '¥'))
        .collect();
    let value: f64 = cleaned.parse().ok()?;
    truncate_cents(value * 100.0)
}
