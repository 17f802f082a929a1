//! Serialization of task results for storage and their restoration.
//!
//! A cache entry is a pretty-printed JSON array. Each item holds the value
//! projection of one task output plus four bookkeeping keys recording where
//! the input lived and whether the task moved it.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value};

use crate::Error;
use crate::options::{RestoreFn, ValueFn, ValueMap};
use crate::record::{Contents, Record};

pub const META_ORIGINAL_PATH: &str = "taskcache$originalPath";
pub const META_ORIGINAL_BASE: &str = "taskcache$originalBase";
pub const META_PATH_CHANGED: &str = "taskcache$pathChangedInsideTask";
pub const META_BASE_CHANGED: &str = "taskcache$baseChangedInsideTask";

/// Fields covered by the standard value projection.
pub const STANDARD_FIELDS: &[&str] = &["cwd", "base", "contents", "stat", "history", "path"];

/// Key used when a stored entry cannot be parsed.
pub const FALLBACK_FIELD: &str = "cached";

/// Bookkeeping stored with every result item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultMeta {
    pub original_path: Option<PathBuf>,
    pub original_base: Option<PathBuf>,
    pub path_changed_inside_task: bool,
    pub base_changed_inside_task: bool,
}

impl ResultMeta {
    /// Compare a task output against the input location it came from.
    pub fn observe(output: &Record, original_path: Option<&Path>, original_base: &Path) -> Self {
        Self {
            original_path: original_path.map(Path::to_path_buf),
            original_base: Some(original_base.to_path_buf()),
            path_changed_inside_task: output.path() != original_path,
            base_changed_inside_task: output.base.as_path() != original_base,
        }
    }

    /// Whether this item may be replayed for `input`.
    ///
    /// A moved item is only valid for the exact location it was computed from.
    pub fn matches(&self, input: &Record) -> bool {
        (!self.path_changed_inside_task || self.original_path.as_deref() == input.path())
            && (!self.base_changed_inside_task || self.original_base.as_deref() == Some(input.base.as_path()))
    }

    fn stamp(&self, map: &mut ValueMap) {
        map.insert(META_ORIGINAL_PATH.into(), path_value(self.original_path.as_deref()));
        map.insert(META_ORIGINAL_BASE.into(), path_value(self.original_base.as_deref()));
        map.insert(META_PATH_CHANGED.into(), Value::Bool(self.path_changed_inside_task));
        map.insert(META_BASE_CHANGED.into(), Value::Bool(self.base_changed_inside_task));
    }

    fn take(map: &mut ValueMap) -> Self {
        let path = |v: Option<Value>| v.and_then(|v| v.as_str().map(PathBuf::from));
        let flag = |v: Option<Value>| v.and_then(|v| v.as_bool()).unwrap_or(false);
        Self {
            original_path: path(map.remove(META_ORIGINAL_PATH)),
            original_base: path(map.remove(META_ORIGINAL_BASE)),
            path_changed_inside_task: flag(map.remove(META_PATH_CHANGED)),
            base_changed_inside_task: flag(map.remove(META_BASE_CHANGED)),
        }
    }
}

/// A fresh task output awaiting storage.
#[derive(Debug, Clone)]
pub struct PendingOutput {
    pub record: Record,
    pub meta: ResultMeta,
}

/// A stored item restored into a live record.
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub record: Record,
    pub meta: ResultMeta,
    /// Whether the stored item carried a payload.
    pub has_contents: bool,
    /// Whether the stored item carried a base.
    pub has_base: bool,
}

/// Serialize outputs into an entry value.
pub fn encode(items: &[PendingOutput], value: &ValueFn) -> Result<String, Error> {
    let values: Vec<Value> = items
        .iter()
        .map(|item| {
            let mut map = value.project(&item.record);
            item.meta.stamp(&mut map);
            Value::Object(map)
        })
        .collect();

    Ok(serde_json::to_string_pretty(&values)?)
}

/// Parse an entry value into result items.
///
/// Unparseable entries become a single `{ "cached": raw }` item instead of an error.
pub fn decode(raw: &str) -> Vec<ValueMap> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => map,
                other => fallback(other),
            })
            .collect(),
        Ok(_) | Err(_) => {
            tracing::warn!(len = raw.len(), "cache entry is not a result array, wrapping raw contents");
            vec![fallback(Value::String(raw.to_string()))]
        }
    }
}

/// Whether a decoded item is the raw-content fallback rather than a stored result.
pub fn is_fallback(item: &ValueMap) -> bool {
    item.len() == 1 && item.contains_key(FALLBACK_FIELD)
}

fn fallback(value: Value) -> ValueMap {
    let mut map = Map::new();
    map.insert(FALLBACK_FIELD.into(), value);
    map
}

/// Restore decoded items, keeping their bookkeeping out of the restore fn.
pub fn restore_items(items: Vec<ValueMap>, restore: &RestoreFn) -> Result<Vec<CachedResult>, Error> {
    items
        .into_iter()
        .map(|mut item| {
            let meta = ResultMeta::take(&mut item);
            let present = |name: &str| item.get(name).is_some_and(|v| !v.is_null());
            let (has_contents, has_base) = (present("contents"), present("base"));
            let record = restore.call(item)?;
            Ok(CachedResult { record, meta, has_contents, has_base })
        })
        .collect()
}

/// Path-consistency check over a whole entry.
pub fn is_replayable(results: &[CachedResult], input: &Record) -> bool {
    results.iter().all(|result| result.meta.matches(input))
}

/// Payload as a storable value: base64 text, or null when absent.
pub fn contents_value(record: &Record) -> Value {
    record
        .bytes()
        .map_or(Value::Null, |bytes| Value::String(BASE64.encode(bytes)))
}

/// Standard projection of a record's structural fields.
pub fn standard_value(record: &Record) -> ValueMap {
    let mut map = Map::new();
    map.insert("cwd".into(), path_value(Some(&record.cwd)));
    map.insert("base".into(), path_value(Some(&record.base)));
    map.insert("contents".into(), contents_value(record));
    map.insert(
        "stat".into(),
        record
            .stat
            .as_ref()
            .and_then(|stat| serde_json::to_value(stat).ok())
            .unwrap_or(Value::Null),
    );
    map.insert(
        "history".into(),
        Value::Array(record.history().iter().map(|p| path_value(Some(p))).collect()),
    );
    map.insert("path".into(), path_value(record.path()));
    map
}

/// Rebuild a record from a stored item.
///
/// Standard fields are parsed; every other key becomes a custom field.
pub fn default_restore(mut item: ValueMap) -> Result<Record, Error> {
    let mut record = Record::default();

    if let Some(cwd) = take_path(&mut item, "cwd")? {
        record.cwd = cwd;
    }
    if let Some(base) = take_path(&mut item, "base")? {
        record.base = base;
    }
    if let Some(history) = item.remove("history") {
        let history = match history {
            Value::Array(entries) => entries
                .into_iter()
                .map(|entry| match entry {
                    Value::String(s) => Ok(PathBuf::from(s)),
                    other => Err(Error::Codec(format!("invalid history entry: {other}"))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Value::Null => Vec::new(),
            other => return Err(Error::Codec(format!("invalid history: {other}"))),
        };
        record.set_history(history);
    }
    if let Some(path) = take_path(&mut item, "path")? {
        record.set_path(path);
    }
    match item.remove("stat") {
        None | Some(Value::Null) => {}
        Some(stat) => record.stat = Some(serde_json::from_value(stat)?),
    }
    if let Some(contents) = item.remove("contents") {
        record.contents = decode_contents(contents)?;
    }

    record.fields = item;
    Ok(record)
}

/// Accepts base64 text plus the legacy byte-array and `{type, data}` buffer forms.
fn decode_contents(value: Value) -> Result<Contents, Error> {
    match value {
        Value::Null => Ok(Contents::Null),
        Value::String(encoded) => BASE64
            .decode(encoded.as_bytes())
            .map(|bytes| Contents::Buffer(bytes.into()))
            .map_err(|e| Error::Codec(format!("invalid base64 contents: {e}"))),
        Value::Array(bytes) => byte_array(bytes),
        Value::Object(mut buffer) => match buffer.remove("data") {
            Some(Value::Array(bytes)) => byte_array(bytes),
            _ => Err(Error::Codec("buffer object without data".to_string())),
        },
        other => Err(Error::Codec(format!("invalid contents: {other}"))),
    }
}

fn byte_array(values: Vec<Value>) -> Result<Contents, Error> {
    let bytes = values
        .into_iter()
        .map(|v| {
            v.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| Error::Codec(format!("invalid byte: {v}")))
        })
        .collect::<Result<Vec<u8>, _>>()?;
    Ok(Contents::Buffer(bytes.into()))
}

fn take_path(item: &mut ValueMap, name: &str) -> Result<Option<PathBuf>, Error> {
    match item.remove(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(PathBuf::from(s))),
        Some(other) => Err(Error::Codec(format!("invalid {name}: {other}"))),
    }
}

fn path_value(path: Option<&Path>) -> Value {
    path.map_or(Value::Null, |p| Value::String(p.to_string_lossy().into_owned()))
}
