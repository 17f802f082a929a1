//! Records flowing through a cached pipeline.
//!
//! A record is a file-like unit: a location (`cwd`, `base`, path history),
//! optional stat metadata, a payload and any custom fields a task attaches.

use std::fmt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncRead;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Shared handle to a streamed payload.
pub type StreamPayload = Arc<Mutex<Pin<Box<dyn AsyncRead + Send>>>>;

/// Stat metadata carried alongside a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub size: u64,
    pub mode: u32,
    pub mtime: Option<DateTime<Utc>>,
}

/// Record payload.
#[derive(Clone, Default)]
pub enum Contents {
    /// No payload: directories and other non-files.
    #[default]
    Null,
    /// Fully materialized payload.
    Buffer(Bytes),
    /// Streamed payload. Never fingerprinted or cached.
    Stream(StreamPayload),
}

impl fmt::Debug for Contents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Contents::Null => f.write_str("Null"),
            Contents::Buffer(bytes) => f.debug_tuple("Buffer").field(bytes).finish(),
            Contents::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl PartialEq for Contents {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Contents::Null, Contents::Null) => true,
            (Contents::Buffer(a), Contents::Buffer(b)) => a == b,
            (Contents::Stream(a), Contents::Stream(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Per-invocation tag used to attribute task outputs to their input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationToken(Uuid);

impl CorrelationToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A file-like unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub cwd: PathBuf,
    pub base: PathBuf,
    history: Vec<PathBuf>,
    pub stat: Option<Stat>,
    pub contents: Contents,
    pub fields: Map<String, Value>,
    pub(crate) token: Option<CorrelationToken>,
}

impl Default for Record {
    fn default() -> Self {
        Self {
            cwd: PathBuf::from("."),
            base: PathBuf::from("."),
            history: Vec::new(),
            stat: None,
            contents: Contents::Null,
            fields: Map::new(),
            token: None,
        }
    }
}

impl Record {
    /// A record without a payload.
    pub fn null() -> Self {
        Self::default()
    }

    /// A record holding a materialized payload.
    pub fn buffer(contents: impl Into<Bytes>) -> Self {
        Self { contents: Contents::Buffer(contents.into()), ..Self::default() }
    }

    /// A record holding a streamed payload.
    pub fn stream(reader: impl AsyncRead + Send + 'static) -> Self {
        let payload: StreamPayload = Arc::new(Mutex::new(Box::pin(reader)));
        Self { contents: Contents::Stream(payload), ..Self::default() }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn with_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.base = base.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.set_path(path);
        self
    }

    pub fn with_stat(mut self, stat: Stat) -> Self {
        self.stat = Some(stat);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Current path: the last entry of the history.
    pub fn path(&self) -> Option<&Path> {
        self.history.last().map(PathBuf::as_path)
    }

    /// Set the path, recording it in the history when it differs.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if self.path() != Some(path.as_path()) {
            self.history.push(path);
        }
    }

    pub fn history(&self) -> &[PathBuf] {
        &self.history
    }

    /// Replace the whole history. The last entry becomes the path.
    pub fn set_history(&mut self, history: Vec<PathBuf>) {
        self.history = history;
    }

    pub fn is_null(&self) -> bool {
        matches!(self.contents, Contents::Null)
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self.contents, Contents::Buffer(_))
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.contents, Contents::Stream(_))
    }

    /// Payload bytes when the record is buffered.
    pub fn bytes(&self) -> Option<&Bytes> {
        match &self.contents {
            Contents::Buffer(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn set_contents(&mut self, contents: impl Into<Bytes>) {
        self.contents = Contents::Buffer(contents.into());
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn remove_field(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// The correlation token stamped by an in-flight invocation, if any.
    pub fn correlation_token(&self) -> Option<CorrelationToken> {
        self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_path_tracks_history() {
        let mut record = Record::buffer("abc").with_path("/src/a.txt");
        record.set_path("/src/a.txt");
        assert_eq!(record.history().len(), 1);

        record.set_path("/src/a.txt2");
        assert_eq!(record.path(), Some(Path::new("/src/a.txt2")));
        assert_eq!(record.history().len(), 2);
    }

    #[test]
    fn test_payload_states() {
        assert!(Record::null().is_null());
        assert!(Record::buffer("x").is_buffer());
        assert!(Record::stream(tokio::io::empty()).is_stream());
        assert_eq!(Record::buffer("x").bytes().map(|b| b.as_ref()), Some(&b"x"[..]));
    }

    #[test]
    fn test_stream_equality_is_identity() {
        let a = Record::stream(tokio::io::empty());
        let b = Record::stream(tokio::io::empty());
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_clone_keeps_token() {
        let mut record = Record::buffer("x");
        record.token = Some(CorrelationToken::new());
        assert_eq!(record.clone().correlation_token(), record.correlation_token());
    }

    #[test]
    fn test_fields() {
        let mut record = Record::buffer("x").with_field("ran", true);
        assert_eq!(record.field("ran"), Some(&Value::Bool(true)));
        assert_eq!(record.remove_field("ran"), Some(Value::Bool(true)));
        assert!(record.field("ran").is_none());
    }
}
