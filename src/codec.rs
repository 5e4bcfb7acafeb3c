//! Pluggable entry serialization.
//!
//! The [`Codec`] is the only place that knows how entries become bytes. The
//! durable writer and the broadcast hub both ship whatever the codec produces,
//! one record per line.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::entry::{value_kind, Entry};
use crate::error::CodecError;

/// Encode/decode strategy for entries.
///
/// Implementations must produce single-line output; the logger rejects
/// records containing a raw `\n`.
pub trait Codec: Send + Sync {
    /// Serializes one entry.
    fn encode(&self, entry: &Entry) -> Result<Vec<u8>, CodecError>;

    /// Parses one serialized record (without its trailing newline).
    fn decode(&self, bytes: &[u8]) -> Result<Entry, CodecError>;
}

/// Replaces a value before it is written. `Ok(None)` leaves it untouched.
pub type EncodeHook = Arc<dyn Fn(&Value) -> Result<Option<Value>, CodecError> + Send + Sync>;

/// Replaces a nested mapping after it is read. `None` leaves it untouched.
pub type DecodeHook = Arc<dyn Fn(&Map<String, Value>) -> Option<Value> + Send + Sync>;

/// Compact JSON codec with optional hook chains for extension value kinds.
///
/// Encode hooks run depth first from the root. For each value, hooks are
/// tried in registration order and the first `Some` wins; the replacement is
/// written as is, without running hooks on its children.
///
/// Decode hooks run bottom-up on every nested mapping once the line is
/// parsed. The top-level entry itself is never replaced.
///
/// # Examples
///
/// ```
/// # use exp_logger::{entry, Codec, JsonCodec};
/// # use serde_json::{json, Value};
/// // Store complex numbers as tagged pairs and read them back as [re, im].
/// let codec = JsonCodec::new()
///     .with_encode_hook(|v| Ok(v.as_str().and_then(|s| s.strip_prefix("c:")).map(|s| {
///         let (re, im) = s.split_once(',').unwrap_or((s, "0"));
///         json!({"__complex__": [re.parse::<f64>().unwrap_or(0.0), im.parse::<f64>().unwrap_or(0.0)]})
///     })))
///     .with_decode_hook(|m| m.get("__complex__").cloned());
///
/// let bytes = codec.encode(&entry! { "z": "c:1,2" }).unwrap();
/// let back = codec.decode(&bytes).unwrap();
/// assert_eq!(back["z"], json!([1.0, 2.0]));
/// ```
#[derive(Clone, Default)]
pub struct JsonCodec {
    encode_hooks: Vec<EncodeHook>,
    decode_hooks: Vec<DecodeHook>,
}

impl JsonCodec {
    /// Creates a codec with no hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an encode hook to the chain.
    pub fn with_encode_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Value) -> Result<Option<Value>, CodecError> + Send + Sync + 'static,
    {
        self.encode_hooks.push(Arc::new(hook));
        self
    }

    /// Appends a decode hook to the chain.
    pub fn with_decode_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Option<Value> + Send + Sync + 'static,
    {
        self.decode_hooks.push(Arc::new(hook));
        self
    }

    fn apply_encode_hooks(&self, value: &Value) -> Result<Value, CodecError> {
        for hook in &self.encode_hooks {
            if let Some(replaced) = hook(value)? {
                return Ok(replaced);
            }
        }
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| self.apply_encode_hooks(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => self.encode_map(map).map(Value::Object),
            scalar => Ok(scalar.clone()),
        }
    }

    fn encode_map(&self, map: &Map<String, Value>) -> Result<Map<String, Value>, CodecError> {
        let mut out = Map::with_capacity(map.len());
        for (key, value) in map {
            out.insert(key.clone(), self.apply_encode_hooks(value)?);
        }
        Ok(out)
    }

    fn apply_decode_hooks(&self, value: Value) -> Value {
        match value {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.apply_decode_hooks(item))
                    .collect(),
            ),
            Value::Object(map) => {
                let map = self.decode_children(map);
                self.decode_hooks
                    .iter()
                    .find_map(|hook| hook(&map))
                    .unwrap_or(Value::Object(map))
            }
            scalar => scalar,
        }
    }

    fn decode_children(&self, map: Map<String, Value>) -> Map<String, Value> {
        map.into_iter()
            .map(|(key, value)| (key, self.apply_decode_hooks(value)))
            .collect()
    }
}

impl Codec for JsonCodec {
    fn encode(&self, entry: &Entry) -> Result<Vec<u8>, CodecError> {
        if self.encode_hooks.is_empty() {
            return Ok(serde_json::to_vec(entry)?);
        }
        let hooked = self.encode_map(entry)?;
        Ok(serde_json::to_vec(&hooked)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Entry, CodecError> {
        match serde_json::from_slice::<Value>(bytes)? {
            Value::Object(map) if self.decode_hooks.is_empty() => Ok(map),
            Value::Object(map) => Ok(self.decode_children(map)),
            other => Err(CodecError::NotAMapping(value_kind(&other))),
        }
    }
}

impl std::fmt::Debug for JsonCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonCodec")
            .field("encode_hooks", &self.encode_hooks.len())
            .field("decode_hooks", &self.decode_hooks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry;
    use serde_json::json;

    #[test]
    fn test_plain_round_trip_keeps_key_order() {
        let codec = JsonCodec::new();
        let e = entry! { "z": 1, "a": [1, 2], "m": {"k": null} };
        let bytes = codec.encode(&e).unwrap();
        assert_eq!(bytes, br#"{"z":1,"a":[1,2],"m":{"k":null}}"#);
        assert_eq!(codec.decode(&bytes).unwrap(), e);
    }

    #[test]
    fn test_output_has_no_raw_newline() {
        let codec = JsonCodec::new();
        let bytes = codec.encode(&entry! { "text": "line one\nline two" }).unwrap();
        assert!(!bytes.contains(&b'\n'));
    }

    #[test]
    fn test_decode_rejects_non_mapping() {
        let codec = JsonCodec::new();
        assert!(matches!(codec.decode(b"[1,2]"), Err(CodecError::NotAMapping("a sequence"))));
        assert!(matches!(codec.decode(b"{not json"), Err(CodecError::Json(_))));
    }

    #[test]
    fn test_encode_hook_error_is_surfaced() {
        let codec = JsonCodec::new().with_encode_hook(|v| match v {
            Value::String(s) if s == "forbidden" => Err(CodecError::Hook("no".into())),
            _ => Ok(None),
        });
        assert!(codec.encode(&entry! { "ok": "fine" }).is_ok());
        assert!(matches!(
            codec.encode(&entry! { "nested": {"x": "forbidden"} }),
            Err(CodecError::Hook(_))
        ));
    }

    #[test]
    fn test_hooks_chain_in_order() {
        let codec = JsonCodec::new()
            .with_encode_hook(|v| Ok(v.as_i64().filter(|n| *n < 0).map(|_| json!("negative"))))
            .with_encode_hook(|v| Ok(v.as_i64().map(|n| json!(n * 10))));
        let bytes = codec.encode(&entry! { "a": -1, "b": 2, "c": [3] }).unwrap();
        assert_eq!(bytes, br#"{"a":"negative","b":20,"c":[30]}"#);
    }

    #[test]
    fn test_decode_hook_runs_bottom_up_on_nested_maps() {
        let codec = JsonCodec::new().with_decode_hook(|m| {
            m.get("__set__").and_then(Value::as_array).map(|items| json!(items.len()))
        });
        let decoded = codec
            .decode(br#"{"outer":{"inner":{"__set__":[1,2,3]}},"__set__":[9]}"#)
            .unwrap();
        assert_eq!(decoded["outer"]["inner"], json!(3));
        // the top-level entry is never replaced
        assert_eq!(decoded["__set__"], json!([9]));
    }
}
