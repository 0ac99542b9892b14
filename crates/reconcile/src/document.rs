//! Structural comparison of configuration bodies

use serde_json::Value;

/// Deep structural equality.
///
/// Object key order is irrelevant, arrays compare by position and numbers
/// compare by value, so `1` equals `1.0`.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| deep_equal(v, w)))
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(v, w)| deep_equal(v, w))
        }
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Whether the live properties already satisfy every field of the desired body.
///
/// This is a subset check: extra live fields are ignored. Devices report
/// many numeric fields as strings, so scalars also match on their text form.
pub fn fields_satisfied(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Object(want), Value::Object(have)) => want.iter().all(|(k, v)| match have.get(k) {
            Some(h) => fields_satisfied(v, h),
            None => v.is_null(),
        }),
        (Value::Object(_), _) => false,
        (Value::Array(want), Value::Array(have)) => {
            want.len() == have.len()
                && want.iter().zip(have).all(|(v, h)| fields_satisfied(v, h))
        }
        (Value::Array(_), _) => false,
        (Value::Null, h) => h.is_null(),
        (w, h) => deep_equal(w, h) || scalar_text(w) == scalar_text(h),
    }
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deep_equal_ignores_key_order() {
        let a = json!({"a": 1, "b": {"c": [1, 2]}});
        let b = json!({"b": {"c": [1, 2]}, "a": 1});
        assert!(deep_equal(&a, &b));
    }

    #[test]
    fn test_deep_equal_array_order_matters() {
        assert!(!deep_equal(&json!([1, 2]), &json!([2, 1])));
    }

    #[test]
    fn test_deep_equal_numbers_by_value() {
        assert!(deep_equal(&json!(1), &json!(1.0)));
        assert!(!deep_equal(&json!(1), &json!("1")));
    }

    #[test]
    fn test_deep_equal_extra_key() {
        assert!(!deep_equal(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
    }

    #[test]
    fn test_fields_satisfied_subset() {
        let desired = json!({"members": ["10.0.0.1:80"], "monitor": "http"});
        let live = json!({
            "name": "p1",
            "members": ["10.0.0.1:80"],
            "monitor": "http",
            "generation": 12
        });
        assert!(fields_satisfied(&desired, &live));
    }

    #[test]
    fn test_fields_satisfied_missing_field() {
        let desired = json!({"members": [], "description": "web"});
        let live = json!({"members": []});
        assert!(!fields_satisfied(&desired, &live));
    }

    #[test]
    fn test_fields_satisfied_string_numbers() {
        assert!(fields_satisfied(&json!({"port": 80}), &json!({"port": "80"})));
        assert!(!fields_satisfied(&json!({"port": 80}), &json!({"port": "81"})));
    }

    #[test]
    fn test_fields_satisfied_null() {
        assert!(fields_satisfied(&json!({"x": null}), &json!({})));
        assert!(!fields_satisfied(&json!({"x": null}), &json!({"x": 1})));
    }

    #[test]
    fn test_fields_satisfied_nested() {
        let desired = json!({"profiles": [{"name": "tcp"}]});
        let live = json!({"profiles": [{"name": "tcp", "context": "all"}]});
        assert!(fields_satisfied(&desired, &live));
        assert!(!fields_satisfied(&desired, &json!({"profiles": "tcp"})));
    }
}
