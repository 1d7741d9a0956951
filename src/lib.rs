//! # docbridge
//!
//! An HTTP service that converts documents (Markdown with formulas, HTML,
//! DOCX, ODT, RTF) into other formats, DOCX by default, by driving `pandoc`
//! and headless LibreOffice.
//!
//! ## Why this crate?
//!
//! pandoc turns `$…$` LaTeX into Word equations on its own, but MathML
//! embedded in Markdown (what most LLMs and web editors emit) is silently
//! dropped from DOCX output. This crate translates each MathML fragment to
//! Office Math (OMML) in-process and hands it to pandoc as raw OpenXML, so
//! equations arrive in Word as real, editable equations.
//!
//! Around that it adds what running the tools as a service needs: one
//! private scratch directory per job, a hard timeout per backend process,
//! a cap on concurrent processes, and structured JSON errors.
//!
//! ## Pipeline Overview
//!
//! ```text
//! request
//!  │
//!  ├─ 1. Validate   non-empty, within size limit, supported (from, to) pair
//!  ├─ 2. Workspace  private temp dir per job
//!  ├─ 3. Formulas   MathML → OMML raw blocks (markdown → docx only)
//!  ├─ 4. Backend    pandoc or soffice, killed on timeout or disconnect
//!  └─ 5. Output     bytes + MIME type + download name; workspace removed
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docbridge::{Converter, ConversionRequest, DocumentFormat, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let converter = Converter::new(ServiceConfig::default())?;
//!     let request = ConversionRequest::new(
//!         "# Title\n\nEuler: <math><msup><mi>e</mi><mrow><mi>i</mi><mi>π</mi></mrow></msup></math>",
//!         DocumentFormat::Markdown,
//!         DocumentFormat::Docx,
//!     );
//!     let result = converter.convert(request).await?;
//!     std::fs::write(&result.file_name, &result.bytes)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docbridge` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when embedding only the library:
//! ```toml
//! docbridge = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod format;
pub mod math;
pub mod output;
pub mod pipeline;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{MathFallback, ServiceConfig, ServiceConfigBuilder};
pub use convert::{BackendVersion, Converter};
pub use error::{ConvertError, ErrorKind, MathError, SetupError};
pub use format::DocumentFormat;
pub use math::{FormulaTranslator, MathDisplay, Omml};
pub use output::{supported_conversions, ConversionRequest, ConversionResult, JobStatus, SupportedConversion};
pub use pipeline::backend::Backend;
pub use server::{router, serve, serve_on};
