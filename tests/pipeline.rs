//! Job pipeline tests against stand-in backends.
//!
//! The real pandoc and LibreOffice are replaced by small shell scripts so
//! these tests run anywhere with `/bin/sh`. The fake pandoc copies its input
//! file to `--output=`, which lets a test see exactly what the backend was
//! handed (including embedded formulas).
//!
//! Run with:
//!   cargo test --test pipeline

#![cfg(unix)]

use docbridge::{ConversionRequest, ConvertError, Converter, DocumentFormat, ServiceConfig};
use once_cell::sync::Lazy;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ── Fake backends ────────────────────────────────────────────────────────────

const COPY_PANDOC: &str = r#"#!/bin/sh
out=""
for a in "$@"; do
  case "$a" in
    --output=*) out="${a#--output=}" ;;
  esac
  last="$a"
done
cp "$last" "$out"
"#;

const FAILING_PANDOC: &str = r#"#!/bin/sh
echo "pandoc: could not parse $(pwd -P)/input.md" >&2
exit 3
"#;

const SLEEPING: &str = "#!/bin/sh\nexec sleep 30\n";

const SILENT_SOFFICE: &str = "#!/bin/sh\nexit 0\n";

const COPY_SOFFICE: &str = r#"#!/bin/sh
outdir=""
prev=""
for a in "$@"; do
  if [ "$prev" = "--outdir" ]; then outdir="$a"; fi
  prev="$a"
  last="$a"
done
cp "$last" "$outdir/input.pdf"
"#;

static BIN_DIR: Lazy<TempDir> = Lazy::new(|| {
    let dir = tempfile::tempdir().expect("create fixture dir");
    for (name, body) in [
        ("copy-pandoc", COPY_PANDOC),
        ("failing-pandoc", FAILING_PANDOC),
        ("sleeping", SLEEPING),
        ("silent-soffice", SILENT_SOFFICE),
        ("copy-soffice", COPY_SOFFICE),
    ] {
        let path = dir.path().join(name);
        std::fs::write(&path, body).expect("write fake backend");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod fake backend");
    }
    dir
});

fn fake(name: &str) -> PathBuf {
    BIN_DIR.path().join(name)
}

fn converter(root: &Path, pandoc: &str, soffice: &str, timeout_secs: u64) -> Converter {
    let config = ServiceConfig::builder()
        .workspace_root(root)
        .pandoc_path(fake(pandoc))
        .soffice_path(fake(soffice))
        .backend_timeout_secs(timeout_secs)
        .max_concurrent_jobs(4)
        .build()
        .expect("valid config");
    Converter::new(config).expect("converter")
}

fn leftover_workspaces(root: &Path) -> usize {
    std::fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
}

fn markdown(text: &str) -> ConversionRequest {
    ConversionRequest::new(text.to_string(), DocumentFormat::Markdown, DocumentFormat::Docx)
}

// ── Success paths ────────────────────────────────────────────────────────────

#[tokio::test]
async fn pandoc_output_is_returned_with_metadata() {
    let root = tempfile::tempdir().unwrap();
    let c = converter(root.path(), "copy-pandoc", "silent-soffice", 10);

    let result = c.convert(markdown("# Title\n\nBody.\n")).await.unwrap();

    assert_eq!(&result.bytes[..], b"# Title\n\nBody.\n");
    assert_eq!(result.size, result.bytes.len());
    assert_eq!(result.file_name, "output.docx");
    assert_eq!(result.backend.name(), "pandoc");
    assert_eq!(
        result.content_type.as_ref(),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
    );
    assert_eq!(leftover_workspaces(root.path()), 0);
}

#[tokio::test]
async fn mathml_reaches_pandoc_as_office_math() {
    let root = tempfile::tempdir().unwrap();
    let c = converter(root.path(), "copy-pandoc", "silent-soffice", 10);

    let result = c
        .convert(markdown(
            "Area is <math><msup><mi>r</mi><mn>2</mn></msup></math> times pi.\n",
        ))
        .await
        .unwrap();
    let seen = String::from_utf8(result.bytes.to_vec()).unwrap();

    assert!(seen.starts_with("Area is `<m:oMath"), "got: {seen}");
    assert!(seen.contains("<m:sSup>"));
    assert!(seen.contains("{=openxml} times pi."));
    assert!(!seen.contains("<math>"));
}

#[tokio::test]
async fn math_translation_can_be_switched_off() {
    let root = tempfile::tempdir().unwrap();
    let c = converter(root.path(), "copy-pandoc", "silent-soffice", 10);
    let text = "Keep <math><mi>x</mi></math> as is.\n";

    let result = c.convert(markdown(text).with_math(false)).await.unwrap();
    assert_eq!(&result.bytes[..], text.as_bytes());
}

#[tokio::test]
async fn html_input_is_passed_through_untouched() {
    let root = tempfile::tempdir().unwrap();
    let c = converter(root.path(), "copy-pandoc", "silent-soffice", 10);
    let html = "<p><math><mi>x</mi></math></p>";

    let result = c
        .convert(
            ConversionRequest::new(html, DocumentFormat::Html, DocumentFormat::Markdown)
                .with_math(true),
        )
        .await
        .unwrap();
    assert_eq!(&result.bytes[..], html.as_bytes());
    assert_eq!(result.file_name, "output.md");
}

#[tokio::test]
async fn libreoffice_output_is_read_from_out_dir() {
    let root = tempfile::tempdir().unwrap();
    let c = converter(root.path(), "copy-pandoc", "copy-soffice", 10);

    let result = c
        .convert(
            ConversionRequest::new(&b"PK\x03\x04odt"[..], DocumentFormat::Odt, DocumentFormat::Pdf)
                .with_file_name("report.odt"),
        )
        .await
        .unwrap();

    assert_eq!(&result.bytes[..], b"PK\x03\x04odt");
    assert_eq!(result.backend.name(), "libreoffice");
    assert_eq!(result.file_name, "report.pdf");
    assert_eq!(leftover_workspaces(root.path()), 0);
}

#[tokio::test]
async fn identical_requests_give_identical_bytes() {
    let root = tempfile::tempdir().unwrap();
    let c = converter(root.path(), "copy-pandoc", "silent-soffice", 10);
    let text = "Sum: <math><munderover><mo>∑</mo><mi>i</mi><mi>n</mi></munderover><mi>i</mi></math>\n";

    let first = c.convert(markdown(text)).await.unwrap();
    let second = c.convert(markdown(text)).await.unwrap();
    assert_eq!(first.bytes, second.bytes);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_jobs_are_isolated() {
    let root = tempfile::tempdir().unwrap();
    let c = converter(root.path(), "copy-pandoc", "silent-soffice", 30);

    let jobs = (0..20).map(|i| {
        let c = c.clone();
        async move {
            let body = format!("# Job {i}\n");
            let result = c.convert(markdown(&body)).await;
            (body, result)
        }
    });

    for (body, result) in futures::future::join_all(jobs).await {
        let result = result.unwrap_or_else(|e| panic!("{body:?} failed: {e}"));
        assert_eq!(&result.bytes[..], body.as_bytes());
    }
    assert_eq!(leftover_workspaces(root.path()), 0);
    assert_eq!(c.available_slots(), 4);
}

// ── Failure paths ────────────────────────────────────────────────────────────

#[tokio::test]
async fn failing_backend_reports_sanitised_stderr() {
    let root = tempfile::tempdir().unwrap();
    let c = converter(root.path(), "failing-pandoc", "silent-soffice", 10);

    let err = c.convert(markdown("# x")).await.unwrap_err();
    match &err {
        ConvertError::ConversionFailed {
            backend,
            code,
            stderr,
        } => {
            assert_eq!(*backend, "pandoc");
            assert_eq!(*code, Some(3));
            assert!(stderr.contains("<workspace>/input.md"), "got: {stderr}");
            let root_str = root.path().canonicalize().unwrap();
            assert!(!stderr.contains(root_str.to_str().unwrap()), "path leaked: {stderr}");
        }
        other => panic!("expected ConversionFailed, got {other:?}"),
    }
    assert_eq!(leftover_workspaces(root.path()), 0);
}

#[tokio::test]
async fn clean_exit_without_output_is_a_failure() {
    let root = tempfile::tempdir().unwrap();
    let c = converter(root.path(), "copy-pandoc", "silent-soffice", 10);

    let err = c
        .convert(ConversionRequest::new(&b"{\\rtf1}"[..], DocumentFormat::Rtf, DocumentFormat::Pdf))
        .await
        .unwrap_err();
    assert!(
        matches!(&err, ConvertError::ConversionFailed { stderr, .. } if stderr.contains("produced no output")),
        "got: {err:?}"
    );
}

#[tokio::test]
async fn slow_backend_is_killed_at_the_deadline() {
    let root = tempfile::tempdir().unwrap();
    let c = converter(root.path(), "sleeping", "silent-soffice", 1);

    let started = Instant::now();
    let err = c.convert(markdown("# slow")).await.unwrap_err();

    assert!(
        matches!(err, ConvertError::ConversionTimeout { backend: "pandoc", secs: 1 }),
        "got: {err:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(leftover_workspaces(root.path()), 0);
}

#[tokio::test]
async fn cancellation_kills_the_backend() {
    let root = tempfile::tempdir().unwrap();
    let c = converter(root.path(), "sleeping", "silent-soffice", 60);
    let token = CancellationToken::new();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            token.cancel();
        })
    };

    let started = Instant::now();
    let err = c
        .convert_with_cancel(markdown("# bye"), token)
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, ConvertError::Cancelled), "got: {err:?}");
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(leftover_workspaces(root.path()), 0);
    assert_eq!(c.available_slots(), 4);
}

#[tokio::test]
async fn missing_executable_is_a_conversion_failure() {
    let root = tempfile::tempdir().unwrap();
    let config = ServiceConfig::builder()
        .workspace_root(root.path())
        .pandoc_path(root.path().join("no-such-pandoc"))
        .build()
        .unwrap();
    let c = Converter::new(config).unwrap();

    let err = c.convert(markdown("# x")).await.unwrap_err();
    assert!(
        matches!(err, ConvertError::ConversionFailed { code: None, .. }),
        "got: {err:?}"
    );
}

#[tokio::test]
async fn missing_backend_fails_the_version_check() {
    let root = tempfile::tempdir().unwrap();
    let config = ServiceConfig::builder()
        .workspace_root(root.path())
        .pandoc_path(root.path().join("no-such-pandoc"))
        .build()
        .unwrap();
    let c = Converter::new(config).unwrap();
    assert!(c.check_backends().await.is_err());
}
