//! Job orchestration: one request in, one document out.
//!
//! [`Converter`] owns everything that lives for the whole process: the
//! configuration, the formula translator, the workspace manager, and the
//! semaphore that caps concurrent backend processes. It is cheap to clone
//! (one `Arc`) and every HTTP handler gets its own clone.
//!
//! ## Job lifecycle
//!
//! ```text
//! validate ──▶ Pending ──▶ permit ──▶ workspace ──▶ Running
//!                                                     │
//!            formulas (md→docx) ──▶ write input ──▶ backend ──▶ read output
//!                                                     │
//!                              release workspace ◀────┴──▶ Succeeded | Failed
//! ```
//!
//! Validation happens before a permit or a workspace is taken, so rejected
//! requests never touch the file system or spawn a process.

use crate::config::ServiceConfig;
use crate::error::{ConvertError, SetupError};
use crate::format::DocumentFormat;
use crate::math::{FormulaTranslator, Omml};
use crate::output::{download_name, ConversionRequest, ConversionResult, JobStatus};
use crate::pipeline::backend::Backend;
use crate::pipeline::formula::{contains_mathml, embed_formulas};
use crate::pipeline::process::query_version;
use crate::pipeline::workspace::{Workspace, WorkspaceManager};
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// How long a backend gets to answer `--version` at startup.
const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared conversion engine.
#[derive(Clone)]
pub struct Converter {
    inner: Arc<Inner>,
}

struct Inner {
    config: ServiceConfig,
    translator: FormulaTranslator,
    workspaces: WorkspaceManager,
    permits: Semaphore,
}

/// A backend that answered `--version`.
#[derive(Debug, Clone)]
pub struct BackendVersion {
    pub name: &'static str,
    pub version: String,
}

impl Converter {
    /// Build the process-wide state.
    ///
    /// Fails if the workspace root cannot be created or the configured
    /// reference document is unreadable. Backends are not checked here; see
    /// [`Converter::check_backends`].
    pub fn new(config: ServiceConfig) -> Result<Self, SetupError> {
        if let Some(path) = &config.reference_doc {
            std::fs::File::open(path).map_err(|source| SetupError::ResourceUnavailable {
                path: path.clone(),
                source,
            })?;
        }
        let workspaces = WorkspaceManager::new(&config.workspace_root)?;
        let permits = Semaphore::new(config.max_concurrent_jobs);
        Ok(Self {
            inner: Arc::new(Inner {
                translator: FormulaTranslator::new(),
                workspaces,
                permits,
                config,
            }),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.inner.workspaces
    }

    /// Backend slots not currently in use.
    pub fn available_slots(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Check that pandoc and LibreOffice start and report a version.
    pub async fn check_backends(&self) -> Result<Vec<BackendVersion>, SetupError> {
        let config = &self.inner.config;
        let mut found = Vec::with_capacity(2);
        for (name, path) in [
            ("pandoc", &config.pandoc_path),
            ("soffice", &config.soffice_path),
        ] {
            let version = query_version(name, path, VERSION_CHECK_TIMEOUT).await?;
            info!("Found {}: {}", name, version);
            found.push(BackendVersion { name, version });
        }
        Ok(found)
    }

    /// Remove workspaces a previous process left behind.
    pub fn sweep_stale_workspaces(&self) -> usize {
        self.inner
            .workspaces
            .sweep_stale(self.inner.config.stale_workspace_age())
    }

    /// Translate one standalone MathML fragment.
    pub fn translate_mathml(&self, mathml: &str) -> Result<Omml, ConvertError> {
        self.inner
            .translator
            .translate(mathml)
            .map_err(|source| ConvertError::MalformedMathml { index: 1, source })
    }

    /// Convert a document. Equivalent to [`Converter::convert_with_cancel`]
    /// with a token nobody cancels.
    pub async fn convert(&self, request: ConversionRequest) -> Result<ConversionResult, ConvertError> {
        self.convert_with_cancel(request, CancellationToken::new()).await
    }

    /// Convert a document, killing the backend if `cancel` fires.
    pub async fn convert_with_cancel(
        &self,
        request: ConversionRequest,
        cancel: CancellationToken,
    ) -> Result<ConversionResult, ConvertError> {
        let backend = self.validate(&request)?;
        let id = Uuid::new_v4();
        let span = info_span!(
            "job",
            id = %id,
            from = %request.source,
            to = %request.target,
            backend = backend.name()
        );
        self.run_job(id, backend, request, cancel).instrument(span).await
    }

    /// Reject requests that can never succeed, before any resource is taken.
    fn validate(&self, request: &ConversionRequest) -> Result<Backend, ConvertError> {
        if request.body.is_empty() {
            return Err(ConvertError::EmptyBody);
        }
        let limit = self.inner.config.max_body_bytes;
        if request.body.len() > limit {
            return Err(ConvertError::BodyTooLarge {
                size: request.body.len(),
                limit,
            });
        }
        Backend::select(request.source, request.target).ok_or_else(|| {
            ConvertError::UnsupportedPair {
                from: request.source.to_string(),
                to: request.target.to_string(),
            }
        })
    }

    async fn run_job(
        &self,
        id: Uuid,
        backend: Backend,
        request: ConversionRequest,
        cancel: CancellationToken,
    ) -> Result<ConversionResult, ConvertError> {
        let started = Instant::now();
        let mut job = JobTracker::new(id);

        let _permit = self
            .inner
            .permits
            .acquire()
            .await
            .map_err(|e| ConvertError::Internal(format!("job queue closed: {e}")))?;
        let workspace = self.inner.workspaces.acquire()?;

        job.transition(JobStatus::Running);
        let outcome = self.execute(backend, &request, &workspace, &cancel).await;
        workspace.release().await;

        match outcome {
            Ok(bytes) => {
                job.transition(JobStatus::Succeeded);
                let duration_ms = started.elapsed().as_millis() as u64;
                info!("Converted {} bytes → {} bytes in {}ms", request.body.len(), bytes.len(), duration_ms);
                Ok(ConversionResult {
                    size: bytes.len(),
                    content_type: request.target.mime(),
                    file_name: download_name(request.file_name.as_deref(), request.target),
                    bytes,
                    backend,
                    duration_ms,
                })
            }
            Err(e) => {
                job.transition(JobStatus::Failed);
                match &e {
                    ConvertError::Cancelled => debug!("Job cancelled"),
                    ConvertError::Internal(detail) => warn!("Job failed: internal error: {}", detail),
                    other => warn!("Job failed: {}", other),
                }
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        backend: Backend,
        request: &ConversionRequest,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ConvertError> {
        // Translation is CPU-bound; keep it off the async workers.
        let body = {
            let this = self.clone();
            let request = request.clone();
            let span = Span::current();
            tokio::task::spawn_blocking(move || span.in_scope(|| this.prepare_body(&request)))
                .await
                .map_err(|e| ConvertError::Internal(format!("formula task failed: {e}")))??
        };
        workspace.write_input(request.source, &body).await?;
        backend
            .convert(&self.inner.config, workspace, request.source, request.target, cancel)
            .await
    }

    /// Embed translated MathML for Markdown → DOCX; pass anything else through.
    fn prepare_body(&self, request: &ConversionRequest) -> Result<Bytes, ConvertError> {
        if request.source != DocumentFormat::Markdown || request.target != DocumentFormat::Docx {
            if request.math == Some(true) {
                debug!("MathML translation only applies to markdown → docx; ignored");
            }
            return Ok(request.body.clone());
        }

        let text = std::str::from_utf8(&request.body)
            .map_err(|e| ConvertError::InvalidInput(format!("markdown body is not UTF-8: {e}")))?;
        let translate = request.math.unwrap_or_else(|| contains_mathml(text));
        if !translate {
            return Ok(request.body.clone());
        }

        let embedded = embed_formulas(text, &self.inner.translator, self.inner.config.math_fallback)?;
        info!(
            "Translated {} MathML fragment(s) ({} verbatim)",
            embedded.translated, embedded.verbatim
        );
        Ok(Bytes::from(embedded.text))
    }
}

/// Logs each status change of one job.
struct JobTracker {
    id: Uuid,
    status: JobStatus,
}

impl JobTracker {
    fn new(id: Uuid) -> Self {
        debug!("Job {} pending", id);
        Self {
            id,
            status: JobStatus::Pending,
        }
    }

    fn transition(&mut self, next: JobStatus) {
        info!("Job {}: {:?} → {:?}", self.id, self.status, next);
        self.status = next;
    }
}
