//! Request and result types that cross the public API boundary.

use crate::format::DocumentFormat;
use crate::pipeline::backend::Backend;
use bytes::Bytes;
use mime::Mime;
use serde::Serialize;

/// One document to convert. Immutable once handed to the converter.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub body: Bytes,
    pub source: DocumentFormat,
    pub target: DocumentFormat,
    /// `Some(true)`: MathML must be translated. `Some(false)`: leave it alone.
    /// `None`: translate when the body contains a `<math` element.
    pub math: Option<bool>,
    /// Download file name. Default: `output.<ext>`.
    pub file_name: Option<String>,
}

impl ConversionRequest {
    pub fn new(body: impl Into<Bytes>, source: DocumentFormat, target: DocumentFormat) -> Self {
        Self {
            body: body.into(),
            source,
            target,
            math: None,
            file_name: None,
        }
    }

    pub fn with_math(mut self, math: bool) -> Self {
        self.math = Some(math);
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }
}

/// The produced document.
#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub bytes: Bytes,
    pub content_type: Mime,
    pub size: usize,
    pub file_name: String,
    pub backend: Backend,
    pub duration_ms: u64,
}

/// Lifecycle of a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// One supported `(source, target)` pair and the backend that serves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SupportedConversion {
    pub from: DocumentFormat,
    pub to: DocumentFormat,
    pub backend: Backend,
}

/// Every pair [`Backend::select`] accepts, in a stable order.
pub fn supported_conversions() -> Vec<SupportedConversion> {
    DocumentFormat::ALL
        .iter()
        .flat_map(|&from| {
            DocumentFormat::ALL.iter().filter_map(move |&to| {
                Backend::select(from, to).map(|backend| SupportedConversion { from, to, backend })
            })
        })
        .collect()
}

/// Sanitise a caller-supplied download name.
///
/// Keeps the final path component, drops quotes and control characters, and
/// forces the target extension so the browser opens the right application.
pub fn download_name(requested: Option<&str>, target: DocumentFormat) -> String {
    let stem = requested
        .and_then(|name| name.rsplit(['/', '\\']).next())
        .map(|name| {
            name.chars()
                .filter(|c| !c.is_control() && *c != '"' && *c != ';')
                .collect::<String>()
        })
        .map(|name| match name.rfind('.') {
            Some(dot) if dot > 0 => name[..dot].to_string(),
            _ => name,
        })
        .filter(|stem| !stem.trim().is_empty())
        .unwrap_or_else(|| "output".to_string());
    format!("{}.{}", stem.trim(), target.extension())
}
