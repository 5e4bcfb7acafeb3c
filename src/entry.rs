//! Schema-free log entries.
//!
//! An entry is an insertion-ordered mapping from string keys to JSON-like
//! values. Keys may differ from one entry to the next; nothing is enforced.

use serde::Serialize;
use serde_json::Value;

use crate::error::CodecError;

/// One structured record logged at a point in time.
pub type Entry = serde_json::Map<String, Value>;

/// Converts any serializable record into an [`Entry`].
///
/// Fails when the record does not serialize to a mapping (a bare number or a
/// list, say) or when serde cannot represent it as a JSON value, e.g. a map
/// with non-string keys.
///
/// # Examples
///
/// ```
/// # use exp_logger::entry::to_entry;
/// #[derive(serde::Serialize)]
/// struct Step { epoch: u32, loss: f64 }
///
/// let entry = to_entry(&Step { epoch: 1, loss: 0.25 }).unwrap();
/// assert_eq!(entry["epoch"], 1);
/// assert!(to_entry(&42).is_err());
/// ```
pub fn to_entry<T: Serialize + ?Sized>(record: &T) -> Result<Entry, CodecError> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(CodecError::NotAMapping(value_kind(&other))),
    }
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

/// Builds an [`Entry`] with `serde_json::json!` object syntax.
///
/// Anything `json!` accepts as a value works, including nested literals and
/// interpolated expressions. Key order is kept.
///
/// # Examples
///
/// ```
/// # use exp_logger::entry;
/// let loss = 0.5;
/// let e = entry! { "epoch": 3, "loss": loss, "tags": ["warmup"] };
/// assert_eq!(e.keys().collect::<Vec<_>>(), ["epoch", "loss", "tags"]);
/// ```
#[macro_export]
macro_rules! entry {
    ($($body:tt)*) => {
        match $crate::serde_json::json!({ $($body)* }) {
            $crate::serde_json::Value::Object(map) => map,
            _ => unreachable!("json! object literal is always a mapping"),
        }
    };
}
