//! `multipart/form-data` encoding and content sniffing for file parts.

use indexmap::IndexMap;

use crate::params::Attachment;

/// Signatures checked in order against the first bytes of a file.
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"BM", "image/bmp"),
    (b"%PDF-", "application/pdf"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b", "application/gzip"),
];

/// Guess the MIME type of `data` from its leading bytes.
///
/// Falls back to `text/plain` for valid UTF-8 and to
/// `application/octet-stream` otherwise.
pub fn sniff_mime(data: &[u8]) -> &'static str {
    if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return "image/webp";
    }
    if let Some((_, mime)) = SIGNATURES.iter().find(|(sig, _)| data.starts_with(sig)) {
        return *mime;
    }
    if std::str::from_utf8(data).is_ok() {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

pub fn is_image(mime: &str) -> bool {
    mime.starts_with("image/")
}

/// A multipart body under construction.
pub struct MultipartBuilder {
    boundary: String,
    buf: Vec<u8>,
}

impl Default for MultipartBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartBuilder {
    pub fn new() -> Self {
        Self::with_boundary(format!("courier-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            buf: Vec::new(),
        }
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn text(&mut self, name: &str, value: &str) -> &mut Self {
        self.open_part();
        self.line(&format!(
            "Content-Disposition: form-data; name=\"{}\"",
            escape_quoted(name)
        ));
        self.line("");
        self.buf.extend_from_slice(value.as_bytes());
        self.line("");
        self
    }

    pub fn file(&mut self, name: &str, file_name: &str, mime: &str, data: &[u8]) -> &mut Self {
        self.open_part();
        self.line(&format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"",
            escape_quoted(name),
            escape_quoted(file_name)
        ));
        self.line(&format!("Content-Type: {mime}"));
        self.line("");
        self.buf.extend_from_slice(data);
        self.line("");
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        let closing = format!("--{}--\r\n", self.boundary);
        self.buf.extend_from_slice(closing.as_bytes());
        self.buf
    }

    fn open_part(&mut self) {
        let open = format!("--{}", self.boundary);
        self.line(&open);
    }

    fn line(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.extend_from_slice(b"\r\n");
    }
}

fn escape_quoted(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(['\r', '\n'], " ")
}

/// Encode text fields followed by files. Returns (content type, body).
pub fn encode(
    fields: &IndexMap<String, String>,
    files: &[(String, Attachment)],
) -> (String, Vec<u8>) {
    let mut builder = MultipartBuilder::new();
    for (name, value) in fields {
        builder.text(name, value);
    }
    for (name, file) in files {
        builder.file(name, &file.file_name, sniff_mime(&file.data), &file.data);
    }
    let content_type = builder.content_type();
    (content_type, builder.finish())
}
