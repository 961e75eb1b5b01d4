//! Reviewer annotations per verse (`comment`, `hasProblem`, `suggestion`, ...), stored with the
//! verse line grammar and a compact JSON object as payload.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde_json::{Map, Value};

use crate::verse::{format_verse_line, parse_verses, read_text_or_empty, write_text_file, VerseBody};

pub type ExtraRecord = Map<String, Value>;

/// Malformed or non-object payloads are logged and dropped; the rest of the file survives.
pub fn parse_extra_data(text: &str) -> BTreeMap<u64, ExtraRecord> {
    let mut out = BTreeMap::new();
    for verse in parse_verses(text) {
        let payload = verse.body.as_str();
        match serde_json::from_str::<Value>(payload) {
            Ok(Value::Object(obj)) => {
                out.insert(verse.number, obj);
            }
            Ok(other) => {
                tracing::warn!(
                    verse = verse.number,
                    kind = json_kind(&other),
                    "extra data payload is not a JSON object, dropped"
                );
            }
            Err(err) => {
                tracing::warn!(verse = verse.number, %err, "malformed extra data JSON, dropped");
            }
        }
    }
    out
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub fn serialize_extra_data(records: &BTreeMap<u64, ExtraRecord>) -> String {
    records
        .iter()
        .filter(|(_, rec)| !rec.is_empty())
        .map(|(n, rec)| {
            let json = Value::Object(rec.clone()).to_string();
            format_verse_line(*n, &VerseBody::Text(json))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Property-level merge: new keys overwrite, `null` deletes, an emptied record disappears.
pub fn apply_patch(records: &mut BTreeMap<u64, ExtraRecord>, verse: u64, patch: &ExtraRecord) {
    let rec = records.entry(verse).or_default();
    for (key, value) in patch {
        if value.is_null() {
            rec.remove(key);
        } else {
            rec.insert(key.clone(), value.clone());
        }
    }
    if rec.is_empty() {
        records.remove(&verse);
    }
}

pub fn merge_extra_data(existing: &str, updates: &BTreeMap<u64, ExtraRecord>) -> String {
    let mut records = parse_extra_data(existing);
    for (verse, patch) in updates {
        apply_patch(&mut records, *verse, patch);
    }
    serialize_extra_data(&records)
}

pub fn read_extra_data_file(path: &Path) -> anyhow::Result<BTreeMap<u64, ExtraRecord>> {
    Ok(parse_extra_data(&read_text_or_empty(path)?))
}

/// Merge one patch into the extra data file. Callers must serialize writes per path.
pub fn update_extra_data_file(
    path: &Path,
    verse: u64,
    patch: &ExtraRecord,
) -> anyhow::Result<Option<ExtraRecord>> {
    let mut records = read_extra_data_file(path)?;
    apply_patch(&mut records, verse, patch);
    write_text_file(path, &serialize_extra_data(&records))
        .with_context(|| format!("update extra data for verse {verse}"))?;
    Ok(records.get(&verse).cloned())
}

pub fn parse_patch(json: &str) -> anyhow::Result<ExtraRecord> {
    match serde_json::from_str::<Value>(json).context("parse extra data patch")? {
        Value::Object(obj) => Ok(obj),
        other => Err(anyhow::anyhow!(
            "extra data patch must be a JSON object, got {}",
            json_kind(&other)
        )),
    }
}
