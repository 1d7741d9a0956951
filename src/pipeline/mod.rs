//! Pipeline stages for a single conversion job.
//!
//! Each submodule implements exactly one step. Keeping stages separate makes
//! each independently testable and lets a backend change without touching
//! the formula or workspace code.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ workspace ──▶ formula ──▶ backend ──▶ bytes
//! (body/URL)  (acquire)   (MathML→OMML) (pandoc|soffice)   │
//!                 ▲                        │              │
//!                 └──────── release ◀──────┴──────────────┘
//! ```
//!
//! 1. [`input`]     — turn a JSON envelope (inline text, base64, or URL)
//!    into the raw document bytes
//! 2. [`workspace`] — give the job a private temp directory; removed on every
//!    exit path, including timeout and cancellation
//! 3. [`formula`]   — find `<math>` fragments in Markdown and embed their OMML
//!    as raw OpenXML so pandoc passes it straight into the DOCX
//! 4. [`backend`]   — choose pandoc or LibreOffice for the `(from, to)` pair and
//!    run it through [`process`], the only stage that spawns children

pub mod backend;
pub mod formula;
pub mod input;
pub mod process;
pub mod workspace;
