use exp_logger::{entry, read_log, CodecError, Compression, JsonCodec, LogError, LogReader};
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

fn codec() -> Arc<JsonCodec> {
    Arc::new(JsonCodec::new())
}

#[test]
fn test_empty_log() {
    let mut reader = LogReader::from_bytes(&[], Compression::None, codec()).unwrap();
    assert!(reader.read_entry().unwrap().is_none());

    let mut reader = LogReader::from_bytes(&[], Compression::Lz4, codec()).unwrap();
    assert!(reader.read_entry().unwrap().is_none());
}

#[test]
fn test_multiple_records() {
    let data = b"{\"i\":0}\n{\"i\":1,\"extra\":[1,2]}\n{\"msg\":\"done\"}\n";
    let mut reader = LogReader::from_bytes(data, Compression::None, codec()).unwrap();

    assert_eq!(reader.read_entry().unwrap(), Some(entry! { "i": 0 }));
    assert_eq!(reader.read_entry().unwrap(), Some(entry! { "i": 1, "extra": [1, 2] }));
    assert_eq!(reader.read_entry().unwrap(), Some(entry! { "msg": "done" }));
    assert_eq!(reader.read_entry().unwrap(), None);
    assert_eq!(reader.line_number(), 3);
}

#[test]
fn test_blank_lines_are_skipped() {
    let data = b"{\"i\":0}\n\n{\"i\":1}\n";
    let entries: Vec<_> = LogReader::from_bytes(data, Compression::None, codec())
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(entries, vec![entry! { "i": 0 }, entry! { "i": 1 }]);
}

#[test]
fn test_torn_final_line_is_ignored() {
    let data = b"{\"i\":0}\n{\"i\":1}\n{\"i\":";
    let entries: Vec<_> = LogReader::from_bytes(data, Compression::None, codec())
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(entries.len(), 2);
}

#[test]
fn test_corrupt_line_is_a_serialization_error() {
    let data = b"{\"i\":0}\nnot json at all\n{\"i\":2}\n";
    let mut reader = LogReader::from_bytes(data, Compression::None, codec()).unwrap();
    assert!(reader.read_entry().unwrap().is_some());
    assert!(matches!(
        reader.read_entry(),
        Err(LogError::Serialization(CodecError::Json(_)))
    ));
    // the reader moves past the bad line
    assert_eq!(reader.read_entry().unwrap(), Some(entry! { "i": 2 }));
}

#[test]
fn test_non_lz4_data_in_lz4_mode_fails() {
    let result = LogReader::from_bytes(b"{\"i\":0}\n", Compression::Lz4, codec());
    assert!(matches!(result, Err(LogError::Io(_))));
}

#[test]
fn test_decode_hooks_apply_when_reading() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("hooked.jsonl");
    fs::write(&path, "{\"when\":{\"__ts__\":1700000000}}\n").unwrap();

    let hooked = JsonCodec::new().with_decode_hook(|m| {
        m.get("__ts__")
            .and_then(Value::as_u64)
            .map(|secs| json!(format!("t+{}", secs)))
    });
    let entries = read_log(&path, Arc::new(hooked)).unwrap();
    assert_eq!(entries, vec![entry! { "when": "t+1700000000" }]);
}

#[test]
fn test_missing_file_is_an_io_error() {
    let dir = tempdir().unwrap();
    let result = read_log(dir.path().join("nope.jsonl"), codec());
    assert!(matches!(result, Err(LogError::Io(_))));
}
