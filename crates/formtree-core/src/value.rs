#![forbid(unsafe_code)]

//! Field values and the helpers that slice them per child.
//!
//! A field value is `Option<serde_json::Value>`: `None` is "no value"
//! (undefined). JSON `null` is folded into `None` whenever a value enters the
//! tree through [`normalize`] or is read back out of a parent through
//! [`field_of`] / [`item_of`].

use serde_json::{Map, Value};

/// Value held by a single control. `None` means no value.
pub type FieldValue = Option<Value>;

/// Opaque caller data passed to validators.
pub type Context = Value;

/// Fold the "empty" encodings into `None`: JSON `null` and `""`.
#[must_use]
pub fn normalize(value: FieldValue) -> FieldValue {
    match value {
        Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        other => other,
    }
}

/// Value of object field `key`, or `None` when absent or `null`.
#[must_use]
pub fn field_of(value: Option<&Value>, key: &str) -> FieldValue {
    match value? {
        Value::Object(map) => map.get(key).filter(|v| !v.is_null()).cloned(),
        _ => None,
    }
}

/// Value of array item `index`, or `None` when absent or `null`.
#[must_use]
pub fn item_of(value: Option<&Value>, index: usize) -> FieldValue {
    match value? {
        Value::Array(items) => items.get(index).filter(|v| !v.is_null()).cloned(),
        _ => None,
    }
}

/// Items of an array value; anything that is not an array has none.
#[must_use]
pub fn items(value: Option<&Value>) -> &[Value] {
    match value {
        Some(Value::Array(items)) => items,
        _ => &[],
    }
}

/// Number of items in an array value, `None` when the value is not an array.
#[inline]
#[must_use]
pub fn array_len(value: Option<&Value>) -> Option<usize> {
    match value {
        Some(Value::Array(items)) => Some(items.len()),
        _ => None,
    }
}

/// Object value with `key` replaced by `child`.
///
/// A `None` child removes the key. When the object ends up empty and is not
/// `required` the whole value collapses to `None`.
#[must_use]
pub fn with_field(base: FieldValue, key: &str, child: FieldValue, required: bool) -> FieldValue {
    let mut map = match base {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    match child {
        Some(v) => {
            map.insert(key.to_owned(), v);
        }
        None => {
            map.remove(key);
        }
    }
    if map.is_empty() && !required {
        return None;
    }
    Some(Value::Object(map))
}

/// Array items with position `index` replaced by `item` (`None` becomes `null`).
pub fn set_item(items: &mut Vec<Value>, index: usize, item: FieldValue) {
    let item = item.unwrap_or(Value::Null);
    if index < items.len() {
        items[index] = item;
    } else {
        items.resize(index, Value::Null);
        items.push(item);
    }
}

/// Whether `value` differs from `default` the way a user would notice.
///
/// Two falsy strings (`""` against nothing) are not a difference.
#[must_use]
pub fn is_dirty(value: Option<&Value>, default: Option<&Value>) -> bool {
    if value == default {
        return false;
    }
    if matches!(value, Some(Value::String(_))) && is_falsy(value) && is_falsy(default) {
        return false;
    }
    true
}

fn is_falsy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => !b,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(Value::Array(_) | Value::Object(_)) => false,
    }
}
