//! Process-wide request configuration.
//!
//! # Design
//! `RequestConfig` is a plain value: built once (from code through
//! `RequestConfig::builder()` or from TOML), validated, and handed to
//! `Courier::init`. Every field has a default so a config file only needs to
//! name the knobs it changes. The only part that stays mutable after init is
//! the default header set, which the facade copies into its own lock.

use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{CourierError, Result};

/// Which `Transport` implementation executes network calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Shared keep-alive client with a connection pool.
    #[default]
    Pooled,
    /// A fresh connection for every call.
    Direct,
}

/// How fields and raw bodies of POST/PUT calls are encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    #[default]
    Json,
    /// `multipart/form-data`, one part per field and per file.
    Form,
    /// The raw body string as-is.
    Raw,
}

/// TLS trust material and hostname pinning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// PEM files with extra root certificates (self-signed servers). One
    /// certificate per file.
    pub ca_certificates: Vec<PathBuf>,
    /// When non-empty, https requests may only target these hosts.
    pub trusted_hosts: Vec<String>,
    pub accept_invalid_certs: bool,
}

impl TlsSettings {
    /// Whether `host` passes the allow-list. An empty list trusts every host.
    pub fn is_trusted(&self, host: &str) -> bool {
        self.trusted_hosts.is_empty()
            || self
                .trusted_hosts
                .iter()
                .any(|h| h.eq_ignore_ascii_case(host))
    }

    /// Read every configured certificate file.
    pub fn load_certificates(&self) -> Result<Vec<Vec<u8>>> {
        self.ca_certificates
            .iter()
            .map(|path| {
                std::fs::read(path).map_err(|e| {
                    CourierError::Tls(format!("cannot read {}: {e}", path.display()))
                })
            })
            .collect()
    }
}

/// Settings shared by the facade, the coordinator and both transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    pub transport: TransportKind,
    /// Size of the worker pool that executes network calls.
    pub worker_threads: usize,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub tls: TlsSettings,
    /// Headers added to every call unless the call sets the same name.
    pub default_headers: IndexMap<String, String>,
    pub cache_enabled: bool,
    /// Emit a full request/response trace for every completed call.
    pub debug: bool,
    pub content_kind: ContentKind,
    pub user_agent: String,
    pub max_upload_kb: usize,
    /// Idle connections kept per host by the pooled transport.
    pub pool_max_idle: usize,
    pub keep_alive_secs: u64,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Pooled,
            worker_threads: 10,
            connect_timeout_secs: 60,
            read_timeout_secs: 60,
            write_timeout_secs: 60,
            tls: TlsSettings::default(),
            default_headers: IndexMap::new(),
            cache_enabled: false,
            debug: false,
            content_kind: ContentKind::Json,
            user_agent: concat!("courier/", env!("CARGO_PKG_VERSION")).to_string(),
            max_upload_kb: 1024,
            pool_max_idle: 10,
            keep_alive_secs: 10,
        }
    }
}

impl RequestConfig {
    pub fn builder() -> RequestConfigBuilder {
        RequestConfigBuilder::default()
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: RequestConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(CourierError::Config(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        let timeouts = [
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("read_timeout_secs", self.read_timeout_secs),
            ("write_timeout_secs", self.write_timeout_secs),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return Err(CourierError::Config(format!("{name} must be at least 1")));
        }
        if self.user_agent.trim().is_empty() {
            return Err(CourierError::Config("user_agent must not be empty".to_string()));
        }
        for (name, value) in &self.default_headers {
            if !is_valid_header(name, value) {
                return Err(CourierError::Config(format!("invalid default header `{name}`")));
            }
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_kb.saturating_mul(1024)
    }
}

/// Header names must be non-empty tokens; neither part may carry CR/LF/NUL.
pub(crate) fn is_valid_header(name: &str, value: &str) -> bool {
    !name.is_empty()
        && !name.contains([':', ' ', '\r', '\n', '\0'])
        && !value.contains(['\r', '\n', '\0'])
}

/// Fluent construction of a `RequestConfig`.
#[derive(Debug, Clone, Default)]
pub struct RequestConfigBuilder {
    config: RequestConfig,
}

impl RequestConfigBuilder {
    pub fn transport(mut self, kind: TransportKind) -> Self {
        self.config.transport = kind;
        self
    }

    pub fn worker_threads(mut self, n: usize) -> Self {
        self.config.worker_threads = n;
        self
    }

    /// Set connect, read and write timeouts at once.
    pub fn timeouts(mut self, secs: u64) -> Self {
        self.config.connect_timeout_secs = secs;
        self.config.read_timeout_secs = secs;
        self.config.write_timeout_secs = secs;
        self
    }

    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.connect_timeout_secs = secs;
        self
    }

    pub fn read_timeout_secs(mut self, secs: u64) -> Self {
        self.config.read_timeout_secs = secs;
        self
    }

    pub fn write_timeout_secs(mut self, secs: u64) -> Self {
        self.config.write_timeout_secs = secs;
        self
    }

    pub fn tls(mut self, tls: TlsSettings) -> Self {
        self.config.tls = tls;
        self
    }

    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.insert(name.into(), value.into());
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.config.cache_enabled = enabled;
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.config.debug = enabled;
        self
    }

    pub fn content_kind(mut self, kind: ContentKind) -> Self {
        self.config.content_kind = kind;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn max_upload_kb(mut self, kb: usize) -> Self {
        self.config.max_upload_kb = kb;
        self
    }

    pub fn pool(mut self, max_idle: usize, keep_alive_secs: u64) -> Self {
        self.config.pool_max_idle = max_idle;
        self.config.keep_alive_secs = keep_alive_secs;
        self
    }

    pub fn build(self) -> Result<RequestConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = RequestConfig::default();
        assert_eq!(c.transport, TransportKind::Pooled);
        assert_eq!(c.worker_threads, 10);
        assert_eq!(c.connect_timeout(), Duration::from_secs(60));
        assert_eq!(c.read_timeout(), Duration::from_secs(60));
        assert_eq!(c.write_timeout(), Duration::from_secs(60));
        assert!(!c.cache_enabled);
        assert!(!c.debug);
        assert_eq!(c.content_kind, ContentKind::Json);
        assert_eq!(c.max_upload_bytes(), 1024 * 1024);
        assert_eq!(c.pool_max_idle, 10);
        assert_eq!(c.keep_alive(), Duration::from_secs(10));
    }

    #[test]
    fn toml_overrides_only_named_keys() {
        let c = RequestConfig::from_toml_str(
            r#"
            transport = "direct"
            cache_enabled = true
            read_timeout_secs = 5

            [default_headers]
            X-App = "demo"

            [tls]
            trusted_hosts = ["api.example.com"]
            "#,
        )
        .unwrap();
        assert_eq!(c.transport, TransportKind::Direct);
        assert!(c.cache_enabled);
        assert_eq!(c.read_timeout_secs, 5);
        assert_eq!(c.connect_timeout_secs, 60);
        assert_eq!(c.default_headers.get("X-App").map(String::as_str), Some("demo"));
        assert!(c.tls.is_trusted("API.example.com"));
        assert!(!c.tls.is_trusted("evil.example.com"));
    }

    #[test]
    fn toml_rejects_unknown_enum_value() {
        let err = RequestConfig::from_toml_str(r#"transport = "carrier-pigeon""#).unwrap_err();
        assert!(matches!(err, CourierError::Config(_)));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = RequestConfig::builder().worker_threads(0).build().unwrap_err();
        assert!(matches!(err, CourierError::Config(_)));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = RequestConfig::builder().timeouts(0).build().unwrap_err();
        assert!(matches!(err, CourierError::Config(_)));
        let err = RequestConfig::from_toml_str("read_timeout_secs = 0").unwrap_err();
        assert!(err.to_string().contains("read_timeout_secs"), "{err}");
        assert!(RequestConfig::builder().write_timeout_secs(1).build().is_ok());
    }

    #[test]
    fn header_with_newline_is_rejected() {
        let err = RequestConfig::builder()
            .default_header("X-Bad", "a\r\nInjected: yes")
            .build()
            .unwrap_err();
        assert!(matches!(err, CourierError::Config(_)));
    }

    #[test]
    fn empty_allow_list_trusts_everyone() {
        assert!(TlsSettings::default().is_trusted("anything.test"));
    }

    #[test]
    fn missing_certificate_file_is_a_tls_error() {
        let tls = TlsSettings {
            ca_certificates: vec![PathBuf::from("/definitely/not/here.pem")],
            ..TlsSettings::default()
        };
        assert!(matches!(tls.load_certificates(), Err(CourierError::Tls(_))));
    }
}
