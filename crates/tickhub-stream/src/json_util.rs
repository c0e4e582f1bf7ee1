//! JSON parsing helpers for inbound price messages.
//!
//! Upstream feeds are inconsistent about numeric encoding, so prices may
//! arrive as JSON numbers (`65000.5`) or as strings (`"65000.5"`).

/// Parse a JSON value (string or number) as `f64`.
///
/// Non-finite results are rejected.
#[inline]
pub fn parse_str_f64(v: Option<&serde_json::Value>) -> Option<f64> {
    let v = v?;
    let n = if let Some(s) = v.as_str() { fast_float2::parse(s.trim()).ok()? } else { v.as_f64()? };
    n.is_finite().then_some(n)
}

/// Parse a named field on a JSON object as `f64` (string or number).
#[inline]
pub fn parse_f64_field(v: &serde_json::Value, key: &str) -> Option<f64> {
    parse_str_f64(v.get(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_and_strings() {
        let v = json!({ "a": 1.5, "b": "2.25", "c": "x", "d": null });
        assert_eq!(parse_f64_field(&v, "a"), Some(1.5));
        assert_eq!(parse_f64_field(&v, "b"), Some(2.25));
        assert_eq!(parse_f64_field(&v, "c"), None);
        assert_eq!(parse_f64_field(&v, "d"), None);
        assert_eq!(parse_f64_field(&v, "missing"), None);
    }

    #[test]
    fn rejects_non_finite_strings() {
        assert_eq!(parse_str_f64(Some(&json!("inf"))), None);
        assert_eq!(parse_str_f64(Some(&json!("NaN"))), None);
    }
}
