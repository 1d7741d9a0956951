//! Configuration types for the conversion service.
//!
//! All service behaviour is controlled through [`ServiceConfig`], built via
//! its [`ServiceConfigBuilder`]. The config is created once at startup and
//! shared read-only (behind an `Arc`) by every job.

use crate::error::SetupError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Configuration for the conversion service.
///
/// # Example
/// ```rust
/// use docbridge::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .port(9000)
///     .backend_timeout_secs(90)
///     .max_concurrent_jobs(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.port, 9000);
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// TCP port to listen on. Default: 8000.
    pub port: u16,

    /// Path or bare name of the pandoc executable. Default: `pandoc`.
    pub pandoc_path: PathBuf,

    /// Path or bare name of the LibreOffice executable. Default: `soffice`.
    pub soffice_path: PathBuf,

    /// Wall-clock limit for a single backend process. Range: 1–3600. Default: 120.
    ///
    /// A LibreOffice cold start alone takes several seconds; large documents
    /// with many embedded objects can take a minute or more.
    pub backend_timeout_secs: u64,

    /// Largest accepted request body in bytes. Default: 20 MiB.
    pub max_body_bytes: usize,

    /// Maximum bytes of backend stderr kept for error reports. Default: 4096.
    pub stderr_limit: usize,

    /// Number of backend processes allowed to run at once.
    /// Default: available parallelism.
    pub max_concurrent_jobs: usize,

    /// Directory under which per-job workspaces are created.
    /// Default: `$TMPDIR/docbridge`.
    pub workspace_root: PathBuf,

    /// Optional `--reference-doc` for pandoc DOCX/ODT output (styles, fonts).
    pub reference_doc: Option<PathBuf>,

    /// Pass `--sandbox` to pandoc so documents cannot read local files. Default: true.
    pub pandoc_sandbox: bool,

    /// Value exported as `SOURCE_DATE_EPOCH` to pandoc. Default: 0.
    ///
    /// pandoc stamps DOCX metadata with the current time unless this is set;
    /// pinning it makes identical input produce identical bytes.
    pub source_date_epoch: u64,

    /// What to do with a MathML fragment that fails to translate. Default: reject.
    pub math_fallback: MathFallback,

    /// Allow the JSON envelope to reference a document by `url`. Default: false.
    pub allow_remote_sources: bool,

    /// Timeout for fetching a remote source document, in seconds. Default: 30.
    pub download_timeout_secs: u64,

    /// Limit for one conversion request, from queueing to the last output
    /// byte read. Default: the backend timeout plus 30 seconds.
    pub request_timeout_secs: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            pandoc_path: PathBuf::from("pandoc"),
            soffice_path: PathBuf::from("soffice"),
            backend_timeout_secs: 120,
            max_body_bytes: 20 * 1024 * 1024,
            stderr_limit: 4096,
            max_concurrent_jobs: default_concurrency(),
            workspace_root: std::env::temp_dir().join("docbridge"),
            reference_doc: None,
            pandoc_sandbox: true,
            source_date_epoch: 0,
            math_fallback: MathFallback::default(),
            allow_remote_sources: false,
            download_timeout_secs: 30,
            request_timeout_secs: None,
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Deadline for a whole conversion request.
    pub fn request_timeout(&self) -> std::time::Duration {
        let secs = self
            .request_timeout_secs
            .unwrap_or(self.backend_timeout_secs + REQUEST_TIMEOUT_MARGIN_SECS);
        std::time::Duration::from_secs(secs)
    }

    /// Age after which a leftover workspace is considered abandoned.
    pub fn stale_workspace_age(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.backend_timeout_secs.saturating_mul(2))
    }
}

/// Time allowed on top of the backend timeout for queueing, formula
/// translation and file I/O.
const REQUEST_TIMEOUT_MARGIN_SECS: u64 = 30;

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn pandoc_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pandoc_path = path.into();
        self
    }

    pub fn soffice_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.soffice_path = path.into();
        self
    }

    pub fn backend_timeout_secs(mut self, secs: u64) -> Self {
        self.config.backend_timeout_secs = secs;
        self
    }

    pub fn max_body_bytes(mut self, n: usize) -> Self {
        self.config.max_body_bytes = n;
        self
    }

    pub fn stderr_limit(mut self, n: usize) -> Self {
        self.config.stderr_limit = n.max(64);
        self
    }

    pub fn max_concurrent_jobs(mut self, n: usize) -> Self {
        self.config.max_concurrent_jobs = n.max(1);
        self
    }

    pub fn workspace_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.workspace_root = path.into();
        self
    }

    pub fn reference_doc(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.reference_doc = Some(path.into());
        self
    }

    pub fn pandoc_sandbox(mut self, v: bool) -> Self {
        self.config.pandoc_sandbox = v;
        self
    }

    pub fn source_date_epoch(mut self, epoch: u64) -> Self {
        self.config.source_date_epoch = epoch;
        self
    }

    pub fn math_fallback(mut self, fallback: MathFallback) -> Self {
        self.config.math_fallback = fallback;
        self
    }

    pub fn allow_remote_sources(mut self, v: bool) -> Self {
        self.config.allow_remote_sources = v;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = Some(secs);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, SetupError> {
        let c = &self.config;
        if c.backend_timeout_secs == 0 || c.backend_timeout_secs > 3600 {
            return Err(SetupError::InvalidConfig(format!(
                "backend timeout must be 1–3600 seconds, got {}",
                c.backend_timeout_secs
            )));
        }
        if c.max_body_bytes == 0 {
            return Err(SetupError::InvalidConfig(
                "max body size must be at least 1 byte".into(),
            ));
        }
        if c.pandoc_path.as_os_str().is_empty() || c.soffice_path.as_os_str().is_empty() {
            return Err(SetupError::InvalidConfig(
                "backend executable paths must not be empty".into(),
            ));
        }
        if c.allow_remote_sources && c.download_timeout_secs == 0 {
            return Err(SetupError::InvalidConfig(
                "download timeout must be at least 1 second".into(),
            ));
        }
        if c.request_timeout_secs == Some(0) {
            return Err(SetupError::InvalidConfig(
                "request timeout must be at least 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Policy for MathML fragments that cannot be translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MathFallback {
    /// Fail the whole document with `malformed_mathml`. (default)
    #[default]
    Reject,
    /// Keep the fragment's source as an inline code span and carry on.
    Verbatim,
}

impl FromStr for MathFallback {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(MathFallback::Reject),
            "verbatim" => Ok(MathFallback::Verbatim),
            other => Err(SetupError::InvalidConfig(format!(
                "math fallback must be 'reject' or 'verbatim', got '{other}'"
            ))),
        }
    }
}
