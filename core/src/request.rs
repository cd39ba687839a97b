//! Turns a call (url + `RequestParams` + merged headers) into an
//! `HttpRequest` ready for either transport.
//!
//! # Design
//! Both transports go through `prepare`, so header policy, query building,
//! body encoding and the TLS host allow-list are identical whichever one the
//! configuration selects.

use indexmap::IndexMap;
use url::Url;

use crate::config::{ContentKind, RequestConfig};
use crate::error::{CourierError, Result};
use crate::http::{HttpMethod, HttpRequest};
use crate::multipart;
use crate::params::{Attachment, RequestParams};

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Shrinks image attachments before upload.
///
/// Image decoding lives outside this crate; hosts plug their codec in here.
pub trait ImageCompressor: Send + Sync {
    /// Return bytes no larger than `max_bytes` when possible.
    fn compress(&self, data: &[u8], mime: &str, max_bytes: usize) -> Result<Vec<u8>>;
}

/// Sends images unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl ImageCompressor for Passthrough {
    fn compress(&self, data: &[u8], _mime: &str, _max_bytes: usize) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// Overlay per-call headers on the default set. A call header replaces a
/// default with the same name (case-insensitive); defaults keep their order.
pub fn merge_headers(
    defaults: &IndexMap<String, String>,
    call: &IndexMap<String, String>,
) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = defaults
        .iter()
        .filter(|(name, _)| !call.keys().any(|c| c.eq_ignore_ascii_case(name)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    merged.extend(call.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

fn find<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Build the wire request for one call.
pub fn prepare(
    method: HttpMethod,
    url: &str,
    params: &RequestParams,
    headers: &[(String, String)],
    config: &RequestConfig,
    compressor: &dyn ImageCompressor,
) -> Result<HttpRequest> {
    let mut parsed = Url::parse(url).map_err(|_| CourierError::InvalidUrl(url.to_string()))?;
    if parsed.scheme() == "https" {
        let host = parsed.host_str().unwrap_or_default();
        if !config.tls.is_trusted(host) {
            return Err(CourierError::UntrustedHost(host.to_string()));
        }
    }

    let user_agent = find(headers, "user-agent").unwrap_or(&config.user_agent);
    let mut wire: Vec<(String, String)> = vec![
        ("Connection".to_string(), "close".to_string()),
        ("User-Agent".to_string(), user_agent.to_string()),
    ];
    wire.extend(
        headers
            .iter()
            .filter(|(k, _)| {
                !k.eq_ignore_ascii_case("user-agent")
                    && !k.eq_ignore_ascii_case("connection")
                    && !k.eq_ignore_ascii_case("content-type")
            })
            .cloned(),
    );
    let content_type_override = find(headers, "content-type");

    if !method.carries_body() {
        if !params.fields().is_empty() {
            let mut pairs = parsed.query_pairs_mut();
            for (k, v) in params.fields() {
                pairs.append_pair(k, v);
            }
        }
        if let Some(ct) = content_type_override {
            wire.push(("Content-Type".to_string(), ct.to_string()));
        }
        return Ok(HttpRequest {
            method,
            url: parsed.into(),
            headers: wire,
            body: None,
        });
    }

    let (content_type, body) = if !params.files().is_empty() {
        let files = normalize_files(params, config.max_upload_bytes(), compressor)?;
        multipart::encode(params.fields(), &files)
    } else {
        let kind = params.content_kind_override().unwrap_or(config.content_kind);
        let (default_ct, body) = encode_body(kind, params)?;
        match content_type_override {
            // A multipart body is only readable with its own boundary.
            Some(ct) if kind != ContentKind::Form => (ct.to_string(), body),
            _ => (default_ct, body),
        }
    };
    wire.push(("Content-Type".to_string(), content_type));

    Ok(HttpRequest {
        method,
        url: parsed.into(),
        headers: wire,
        body: Some(body),
    })
}

fn encode_body(kind: ContentKind, params: &RequestParams) -> Result<(String, Vec<u8>)> {
    match kind {
        ContentKind::Json => {
            let text = match params.body() {
                Some(raw) => escape_json_controls(raw),
                None => serde_json::to_string(params.fields())?,
            };
            Ok((JSON_CONTENT_TYPE.to_string(), text.into_bytes()))
        }
        ContentKind::Raw => match params.body() {
            Some(raw) => Ok((TEXT_CONTENT_TYPE.to_string(), raw.as_bytes().to_vec())),
            None => {
                let form = serde_urlencoded::to_string(params.fields())
                    .map_err(|e| CourierError::Serialization(e.to_string()))?;
                Ok((FORM_URLENCODED.to_string(), form.into_bytes()))
            }
        },
        ContentKind::Form => Ok(multipart::encode(params.fields(), &[])),
    }
}

/// Run images through the compressor and enforce the upload limit on the
/// rest.
fn normalize_files(
    params: &RequestParams,
    max_bytes: usize,
    compressor: &dyn ImageCompressor,
) -> Result<Vec<(String, Attachment)>> {
    params
        .files()
        .iter()
        .map(|(name, file)| {
            let mime = multipart::sniff_mime(&file.data);
            let data = if multipart::is_image(mime) {
                compressor.compress(&file.data, mime, max_bytes)?
            } else if file.data.len() > max_bytes {
                tracing::warn!(
                    field = %name,
                    size = file.data.len(),
                    "attachment over upload limit"
                );
                return Err(CourierError::AttachmentTooLarge {
                    name: file.file_name.clone(),
                    size: file.data.len(),
                    limit: max_bytes,
                });
            } else {
                file.data.clone()
            };
            Ok((name.clone(), Attachment::new(file.file_name.clone(), data)))
        })
        .collect()
}

/// Escape raw control characters that appear inside JSON string literals.
///
/// Text outside string literals is left alone, so already valid JSON comes
/// back unchanged.
pub fn escape_json_controls(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in raw.chars() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(c);
                continue;
            }
            match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                '\u{08}' => out.push_str("\\b"),
                '\u{0c}' => out.push_str("\\f"),
                c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
                c => out.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
        }
    }
    out
}
