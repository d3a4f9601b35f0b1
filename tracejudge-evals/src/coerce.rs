// Copyright 2025 Tracejudge Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Tolerant coercion of loosely-typed metric configuration values.
//!
//! Span attributes arrive as JSON with no schema guarantees: booleans may be
//! real booleans, strings, or numbers, and thresholds may be integers,
//! floats, or numeric strings. Every config consumer in this crate goes
//! through these two functions so that the accepted spellings stay
//! identical everywhere.

use serde_json::Value;

/// Coerce a JSON value into a boolean.
///
/// Accepts real booleans, the (case-insensitive) string literals `"true"`,
/// `"1"`, `"yes"` and `"on"`, and nonzero numbers. Anything else, including
/// an absent value, coerces to `false`.
pub fn coerce_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => {
            matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
        }
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    }
}

/// Coerce a JSON value into a passing threshold, defaulting to 0.5.
///
/// Accepts numbers and numeric strings. Unparseable or absent values fall
/// back to the default rather than failing the whole evaluation.
pub fn coerce_threshold(value: Option<&Value>) -> f64 {
    const DEFAULT: f64 = 0.5;
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(DEFAULT),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(DEFAULT),
        _ => DEFAULT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bool_spellings() {
        assert!(coerce_bool(Some(&json!(true))));
        assert!(coerce_bool(Some(&json!("true"))));
        assert!(coerce_bool(Some(&json!("True"))));
        assert!(coerce_bool(Some(&json!("YES"))));
        assert!(coerce_bool(Some(&json!("on"))));
        assert!(coerce_bool(Some(&json!("1"))));
        assert!(coerce_bool(Some(&json!(1))));
        assert!(coerce_bool(Some(&json!(2.5))));

        assert!(!coerce_bool(Some(&json!(false))));
        assert!(!coerce_bool(Some(&json!("false"))));
        assert!(!coerce_bool(Some(&json!("no"))));
        assert!(!coerce_bool(Some(&json!("enabled"))));
        assert!(!coerce_bool(Some(&json!(0))));
        assert!(!coerce_bool(Some(&json!(null))));
        assert!(!coerce_bool(None));
    }

    #[test]
    fn threshold_spellings() {
        assert_eq!(coerce_threshold(Some(&json!(0.7))), 0.7);
        assert_eq!(coerce_threshold(Some(&json!(1))), 1.0);
        assert_eq!(coerce_threshold(Some(&json!("0.8"))), 0.8);
        assert_eq!(coerce_threshold(Some(&json!(" 0.25 "))), 0.25);
    }

    #[test]
    fn threshold_falls_back_to_default() {
        assert_eq!(coerce_threshold(None), 0.5);
        assert_eq!(coerce_threshold(Some(&json!(null))), 0.5);
        assert_eq!(coerce_threshold(Some(&json!("high"))), 0.5);
        assert_eq!(coerce_threshold(Some(&json!([0.5]))), 0.5);
    }
}
