//! Conversion backends: pandoc and LibreOffice.
//!
//! ## Why two backends?
//!
//! pandoc understands document *structure* (headings, lists, math) and is the
//! right tool between markup formats and into DOCX/ODT. It cannot render a
//! page layout, so office documents to PDF (and RTF input, which pandoc only
//! half reads) go through headless LibreOffice instead.
//!
//! [`Backend::select`] is the single place that decides which pairs exist.
//! It is a pure function so routing can be tested without either tool.

use crate::config::ServiceConfig;
use crate::error::ConvertError;
use crate::format::DocumentFormat;
use crate::pipeline::process::{self, RunLimits};
use crate::pipeline::workspace::Workspace;
use bytes::Bytes;
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Pandoc,
    LibreOffice,
}

impl Backend {
    /// Which backend converts `from` into `to`, if any.
    pub fn select(from: DocumentFormat, to: DocumentFormat) -> Option<Backend> {
        use DocumentFormat::*;

        if from == to {
            return None;
        }
        match (from, to) {
            (Pdf, _) => None,
            (Docx | Odt | Rtf, Pdf) => Some(Backend::LibreOffice),
            (_, Pdf) => None,
            (Docx, Odt) | (Odt, Docx) => Some(Backend::LibreOffice),
            (Rtf, Docx | Odt | Html) => Some(Backend::LibreOffice),
            (Rtf, _) => None,
            (Markdown | Html | Docx | Odt, Markdown | Html | Docx | Odt | Rtf | Plain) => {
                Some(Backend::Pandoc)
            }
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Pandoc => "pandoc",
            Backend::LibreOffice => "libreoffice",
        }
    }

    /// Run the conversion for a job whose input is already in `workspace`.
    ///
    /// Returns the produced document. The result is only read once the
    /// process has exited with status 0.
    pub async fn convert(
        &self,
        config: &ServiceConfig,
        workspace: &Workspace,
        from: DocumentFormat,
        to: DocumentFormat,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ConvertError> {
        let limits = RunLimits {
            timeout: Duration::from_secs(config.backend_timeout_secs),
            stderr_limit: config.stderr_limit,
        };

        let (command, output) = match self {
            Backend::Pandoc => {
                let mut cmd = Command::new(&config.pandoc_path);
                cmd.args(pandoc_args(config, workspace, from, to))
                    .current_dir(workspace.path())
                    .env("SOURCE_DATE_EPOCH", config.source_date_epoch.to_string());
                (cmd, workspace.output_path(to))
            }
            Backend::LibreOffice => {
                for dir in [workspace.out_dir(), workspace.profile_dir()] {
                    tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                        ConvertError::Internal(format!("failed to create {}: {e}", dir.display()))
                    })?;
                }
                let mut cmd = Command::new(&config.soffice_path);
                cmd.args(soffice_args(workspace, from, to))
                    .current_dir(workspace.path())
                    .env("HOME", workspace.path());
                (cmd, soffice_output(workspace, to))
            }
        };

        debug!("Running {} for {} → {}", self.name(), from, to);
        let report = process::run(self.name(), command, limits, workspace.path(), cancel).await?;

        if !report.success {
            return Err(ConvertError::ConversionFailed {
                backend: self.name(),
                code: report.code,
                stderr: report.stderr,
            });
        }

        let bytes = match tokio::fs::read(&output).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut stderr = "exited successfully but produced no output".to_string();
                if !report.stderr.is_empty() {
                    stderr.push_str(": ");
                    stderr.push_str(&report.stderr);
                }
                return Err(ConvertError::ConversionFailed {
                    backend: self.name(),
                    code: report.code,
                    stderr,
                });
            }
            Err(e) => {
                return Err(ConvertError::Internal(format!(
                    "failed to read {}: {e}",
                    output.display()
                )))
            }
        };

        info!(
            "{} produced {} bytes in {}ms",
            self.name(),
            bytes.len(),
            report.elapsed.as_millis()
        );
        Ok(Bytes::from(bytes))
    }
}

/// Arguments for `pandoc`, reading `input.<ext>` and writing `output.<ext>`.
pub fn pandoc_args(
    config: &ServiceConfig,
    workspace: &Workspace,
    from: DocumentFormat,
    to: DocumentFormat,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        format!("--from={}", from.pandoc_reader()).into(),
        format!("--to={}", to.pandoc_name()).into(),
    ];
    if matches!(to, DocumentFormat::Html | DocumentFormat::Rtf) {
        args.push("--standalone".into());
    }
    if to == DocumentFormat::Html {
        args.push("--mathml".into());
    }
    if config.pandoc_sandbox {
        args.push("--sandbox".into());
    }
    if let Some(reference) = &config.reference_doc {
        if matches!(to, DocumentFormat::Docx | DocumentFormat::Odt) {
            args.push(prefixed("--reference-doc=", reference));
        }
    }
    args.push(prefixed("--output=", &workspace.output_path(to)));
    args.push(workspace.input_path(from).into_os_string());
    args
}

/// Arguments for `soffice`, with a profile private to the workspace.
pub fn soffice_args(workspace: &Workspace, from: DocumentFormat, to: DocumentFormat) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "--headless",
        "--norestore",
        "--nolockcheck",
        "--nologo",
        "--nodefault",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(prefixed("-env:UserInstallation=file://", &workspace.profile_dir()));
    args.push("--convert-to".into());
    args.push(to.soffice_filter().into());
    args.push("--outdir".into());
    args.push(workspace.out_dir().into_os_string());
    args.push(workspace.input_path(from).into_os_string());
    args
}

/// LibreOffice names its output after the input stem: `out/input.<ext>`.
fn soffice_output(workspace: &Workspace, to: DocumentFormat) -> PathBuf {
    workspace.out_dir().join(format!("input.{}", to.extension()))
}

fn prefixed(prefix: &str, path: &Path) -> OsString {
    let mut s = OsString::from(prefix);
    s.push(path.as_os_str());
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::workspace::WorkspaceManager;
    use crate::format::DocumentFormat::*;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn selection_table() {
        assert_eq!(Backend::select(Markdown, Docx), Some(Backend::Pandoc));
        assert_eq!(Backend::select(Html, Markdown), Some(Backend::Pandoc));
        assert_eq!(Backend::select(Docx, Plain), Some(Backend::Pandoc));
        assert_eq!(Backend::select(Docx, Pdf), Some(Backend::LibreOffice));
        assert_eq!(Backend::select(Odt, Docx), Some(Backend::LibreOffice));
        assert_eq!(Backend::select(Rtf, Html), Some(Backend::LibreOffice));

        assert_eq!(Backend::select(Markdown, Markdown), None);
        assert_eq!(Backend::select(Markdown, Pdf), None);
        assert_eq!(Backend::select(Pdf, Docx), None);
        assert_eq!(Backend::select(Plain, Docx), None);
        assert_eq!(Backend::select(Rtf, Markdown), None);
    }

    #[test]
    fn selection_never_pairs_a_format_with_itself() {
        for f in DocumentFormat::ALL {
            assert_eq!(Backend::select(f, f), None, "{f}");
        }
    }

    #[test]
    fn pandoc_args_for_docx() {
        let root = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(root.path()).unwrap().acquire().unwrap();
        let config = ServiceConfig::builder()
            .reference_doc("/etc/docbridge/reference.docx")
            .build()
            .unwrap();

        let args = strings(pandoc_args(&config, &ws, Markdown, Docx));
        assert_eq!(args[0], "--from=markdown+tex_math_dollars+raw_attribute");
        assert_eq!(args[1], "--to=docx");
        assert!(args.contains(&"--sandbox".to_string()));
        assert!(args.contains(&"--reference-doc=/etc/docbridge/reference.docx".to_string()));
        assert!(!args.contains(&"--standalone".to_string()));
        assert!(args[args.len() - 2].ends_with("output.docx"));
        assert!(args[args.len() - 1].ends_with("input.md"));
    }

    #[test]
    fn pandoc_args_for_html() {
        let root = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(root.path()).unwrap().acquire().unwrap();
        let config = ServiceConfig::builder()
            .pandoc_sandbox(false)
            .reference_doc("/ref.docx")
            .build()
            .unwrap();

        let args = strings(pandoc_args(&config, &ws, Docx, Html));
        assert!(args.contains(&"--standalone".to_string()));
        assert!(args.contains(&"--mathml".to_string()));
        assert!(!args.contains(&"--sandbox".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--reference-doc")));
    }

    #[test]
    fn soffice_args_isolate_profile() {
        let root = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(root.path()).unwrap().acquire().unwrap();
        let args = strings(soffice_args(&ws, Docx, Pdf));
        assert_eq!(args[0], "--headless");
        let profile = format!("-env:UserInstallation=file://{}", ws.profile_dir().display());
        assert!(args.contains(&profile));
        let i = args.iter().position(|a| a == "--convert-to").unwrap();
        assert_eq!(args[i + 1], "pdf:writer_pdf_Export");
        assert!(args.last().unwrap().ends_with("input.docx"));
        assert!(soffice_output(&ws, Pdf).ends_with("out/input.pdf"));
    }
}
