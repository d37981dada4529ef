//! The request port: one generic primitive every endpoint goes through.

use std::{
    fmt,
    path::{Path, PathBuf},
    pin::Pin,
    time::Duration,
};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::AsyncRead;

use crate::Result;

/// Executes a single remote API method and returns its `result` payload.
#[async_trait]
pub trait BotApi: Send + Sync {
    async fn call(&self, request: ApiRequest) -> Result<Value>;
}

#[derive(Debug)]
pub struct ApiRequest {
    pub method: String,
    pub params: Params,
    /// Overrides the client-wide timeout for this call.
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: Params::new(),
            timeout: None,
        }
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug)]
pub enum ParamValue {
    Value(Value),
    File(InputFile),
}

/// Ordered request parameters.
#[derive(Debug, Default)]
pub struct Params(Vec<(String, ParamValue)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter, replacing an earlier one with the same name.
    pub fn set(&mut self, name: impl Into<String>, value: ParamValue) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, ParamValue::Value(value.into()));
        self
    }

    /// Set an optional parameter; `None` leaves the list untouched.
    pub fn with_opt<V: Into<Value>>(self, name: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.with(name, v),
            None => self,
        }
    }

    /// Set a structured parameter (keyboard, entities, ...) from any serializable value.
    pub fn with_json<T: Serialize>(mut self, name: impl Into<String>, value: &T) -> Result<Self> {
        self.set(name, ParamValue::Value(serde_json::to_value(value)?));
        Ok(self)
    }

    pub fn with_file(mut self, name: impl Into<String>, file: InputFile) -> Self {
        self.set(name, ParamValue::File(file));
        self
    }

    /// Merge every entry of `extra` that is not already set.
    pub fn merge_missing(mut self, extra: &Map<String, Value>) -> Self {
        for (k, v) in extra {
            if self.get(k).is_none() && !self.is_file(k) {
                self.0.push((k.clone(), ParamValue::Value(v.clone())));
            }
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find_map(|(n, v)| match v {
            ParamValue::Value(v) if n == name => Some(v),
            _ => None,
        })
    }

    fn is_file(&self, name: &str) -> bool {
        self.0
            .iter()
            .any(|(n, v)| n == name && matches!(v, ParamValue::File(_)))
    }

    pub fn has_files(&self) -> bool {
        self.0.iter().any(|(_, v)| matches!(v, ParamValue::File(_)))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<(String, ParamValue)> {
        self.0
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Params(
            map.into_iter()
                .map(|(k, v)| (k, ParamValue::Value(v)))
                .collect(),
        )
    }
}

/// Encode a JSON parameter the way the remote form/query decoder expects it.
///
/// Strings go verbatim, scalars as their JSON text, objects and arrays as a
/// JSON string. `null` means "not set".
pub fn encode_param(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub type ByteStream = Pin<Box<dyn AsyncRead + Send + Sync>>;

/// A file argument for upload-capable methods.
pub enum InputFile {
    /// An open byte stream; `file_name` and `content_type` are its metadata.
    Reader {
        reader: ByteStream,
        file_name: Option<String>,
        content_type: Option<String>,
    },
    /// In-memory bytes; content type is sniffed from magic bytes.
    Bytes {
        data: Vec<u8>,
        file_name: Option<String>,
    },
    /// A local path (uploaded when it exists and path resolution is enabled),
    /// otherwise a file id or URL understood by the remote service.
    Text(String),
}

impl InputFile {
    /// Open a local file as a stream, named after its base name.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await?;
        Ok(InputFile::Reader {
            reader: Box::pin(file),
            file_name: base_name(path),
            content_type: None,
        })
    }

    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        InputFile::Bytes {
            data: data.into(),
            file_name: None,
        }
    }

    pub fn id(file_id: impl Into<String>) -> Self {
        InputFile::Text(file_id.into())
    }
}

impl From<&str> for InputFile {
    fn from(s: &str) -> Self {
        InputFile::Text(s.to_string())
    }
}

impl From<String> for InputFile {
    fn from(s: String) -> Self {
        InputFile::Text(s)
    }
}

impl From<PathBuf> for InputFile {
    fn from(p: PathBuf) -> Self {
        InputFile::Text(p.to_string_lossy().into_owned())
    }
}

impl From<Vec<u8>> for InputFile {
    fn from(data: Vec<u8>) -> Self {
        InputFile::bytes(data)
    }
}

impl fmt::Debug for InputFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputFile::Reader { file_name, .. } => f
                .debug_struct("Reader")
                .field("file_name", file_name)
                .finish_non_exhaustive(),
            InputFile::Bytes { data, file_name } => f
                .debug_struct("Bytes")
                .field("len", &data.len())
                .field("file_name", file_name)
                .finish(),
            InputFile::Text(s) => f.debug_tuple("Text").field(s).finish(),
        }
    }
}

pub fn base_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encodes_nested_structures_as_json_strings() {
        assert_eq!(encode_param(&json!("plain")).as_deref(), Some("plain"));
        assert_eq!(encode_param(&json!(42)).as_deref(), Some("42"));
        assert_eq!(encode_param(&json!(true)).as_deref(), Some("true"));
        assert_eq!(encode_param(&Value::Null), None);
        assert_eq!(
            encode_param(&json!({"inline_keyboard": [[{"text": "a", "callback_data": "b"}]]}))
                .as_deref(),
            Some(r#"{"inline_keyboard":[[{"callback_data":"b","text":"a"}]]}"#)
        );
    }

    #[test]
    fn params_replace_and_merge() {
        let mut extra = Map::new();
        extra.insert("timeout".to_string(), json!(99));
        extra.insert("allowed_updates".to_string(), json!(["message"]));

        let p = Params::new()
            .with("offset", 5)
            .with("timeout", 10)
            .with("offset", 6)
            .with_opt::<i64>("limit", None)
            .merge_missing(&extra);

        assert_eq!(p.get("offset"), Some(&json!(6)));
        assert_eq!(p.get("timeout"), Some(&json!(10)));
        assert_eq!(p.get("allowed_updates"), Some(&json!(["message"])));
        assert_eq!(p.get("limit"), None);
        assert!(!p.has_files());
        assert!(Params::new().with_file("photo", InputFile::id("abc")).has_files());
    }
}
