//! Per-call parameters: fields, attachments, header overrides and the tag.
//!
//! # Design
//! Fields keep insertion order for the wire but the cache key
//! (`serialized`) sorts them, so the same logical request always maps to the
//! same cache row no matter how the caller assembled it.

use std::collections::BTreeMap;
use std::path::Path;

use indexmap::IndexMap;

use crate::config::ContentKind;
use crate::error::Result;

/// A file sent as one part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            data,
        }
    }

    /// Read a file from disk, keeping its base name as the part file name.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self { file_name, data })
    }
}

/// Everything a caller attaches to one call.
///
/// Built with the consuming setters below, then handed to the facade, after
/// which it is shared read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestParams {
    fields: IndexMap<String, String>,
    files: IndexMap<String, Attachment>,
    headers: IndexMap<String, String>,
    raw_body: Option<String>,
    content_kind: Option<ContentKind>,
    tag: String,
}

impl Default for RequestParams {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParams {
    /// Empty parameters tagged with the current time in milliseconds.
    pub fn new() -> Self {
        Self {
            fields: IndexMap::new(),
            files: IndexMap::new(),
            headers: IndexMap::new(),
            raw_body: None,
            content_kind: None,
            tag: chrono::Utc::now().timestamp_millis().to_string(),
        }
    }

    /// Set a field. A repeated key replaces the earlier value in place.
    pub fn field(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.insert(key.into(), value.to_string());
        self
    }

    pub fn attach(mut self, field: impl Into<String>, attachment: Attachment) -> Self {
        self.files.insert(field.into(), attachment);
        self
    }

    /// Per-call header; wins over a default header with the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value.into());
        self
    }

    pub fn raw_body(mut self, body: impl Into<String>) -> Self {
        self.raw_body = Some(body.into());
        self
    }

    /// Override the configured content kind for this call only.
    pub fn content_kind(mut self, kind: ContentKind) -> Self {
        self.content_kind = Some(kind);
        self
    }

    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn fields(&self) -> &IndexMap<String, String> {
        &self.fields
    }

    pub fn files(&self) -> &IndexMap<String, Attachment> {
        &self.files
    }

    pub fn headers(&self) -> &IndexMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> Option<&str> {
        self.raw_body.as_deref()
    }

    pub fn content_kind_override(&self) -> Option<ContentKind> {
        self.content_kind
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Canonical text form used as the second half of the cache key.
    ///
    /// Fields are sorted by key. Attachments are named but their bytes are
    /// not part of the key. The tag never is.
    pub fn serialized(&self) -> String {
        let fields: BTreeMap<&str, &str> = self
            .fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let mut files: Vec<&str> = self.files.keys().map(String::as_str).collect();
        files.sort_unstable();

        let mut doc = serde_json::Map::new();
        doc.insert("fields".to_string(), serde_json::json!(fields));
        if !files.is_empty() {
            doc.insert("files".to_string(), serde_json::json!(files));
        }
        if let Some(body) = &self.raw_body {
            doc.insert("body".to_string(), serde_json::json!(body));
        }
        serde_json::Value::Object(doc).to_string()
    }
}
