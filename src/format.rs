//! Locale-independent value rendering for payloads and topic segments

use crate::record::Value;

/// Scalar stringification used for MQTT payloads and topic segments
pub struct ValueFormatter;

impl ValueFormatter {
    /// Decimal, sign only when negative
    pub fn format_int(value: i64) -> String {
        value.to_string()
    }

    /// Fixed notation with at most 5 decimals and at least one, switching to
    /// `%g`-style scientific notation when `|value| >= 1e7` or `|value| < 1e-4`.
    pub fn format_double(value: f64) -> String {
        if value.is_nan() {
            return "nan".to_string();
        }
        if value.is_infinite() {
            return if value > 0.0 { "inf" } else { "-inf" }.to_string();
        }
        // fold -0.0 into 0.0
        let value = if value == 0.0 { 0.0 } else { value };
        let magnitude = value.abs();
        if magnitude != 0.0 && !(1e-4..1e7).contains(&magnitude) {
            return Self::format_scientific(value);
        }

        let mut rendered = format!("{value:.5}");
        while rendered.ends_with('0') && !rendered.ends_with(".0") {
            rendered.pop();
        }
        rendered
    }

    /// Six significant digits, trailing mantissa zeros removed, signed
    /// two-digit exponent: `1.23457e+07`, `1e-05`.
    fn format_scientific(value: f64) -> String {
        let raw = format!("{value:.5e}");
        let (mantissa, exponent) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
        let mantissa = if mantissa.contains('.') {
            mantissa.trim_end_matches('0').trim_end_matches('.')
        } else {
            mantissa
        };
        let exponent: i32 = exponent.parse().unwrap_or(0);
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
    }

    /// Replace every character outside `[A-Za-z0-9.-]` with `_`
    pub fn sanitize_segment(segment: &str) -> String {
        segment
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// Payload text for a scalar value; `None` for nulls, arrays and records
    pub fn format_scalar(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Integer(i) => Some(Self::format_int(*i)),
            Value::Double(d) => Some(Self::format_double(*d)),
            Value::Null | Value::Array(_) | Value::Record(_) => None,
        }
    }
}
