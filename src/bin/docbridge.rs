//! CLI binary for docbridge.
//!
//! A thin shim over the library crate: maps flags and environment variables
//! to `ServiceConfig`, then either serves HTTP or runs a one-shot conversion.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use docbridge::{
    Converter, ConversionRequest, DocumentFormat, FormulaTranslator, MathFallback, ServiceConfig,
};
use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r##"EXAMPLES:
  # Serve on port 8000 (default)
  docbridge

  # Serve with a house style and a longer backend timeout
  docbridge serve --port 9000 --reference-doc styles.docx --timeout 300

  # One-shot conversion, formats inferred from extensions
  docbridge convert notes.md -o notes.docx

  # Office document to PDF through LibreOffice
  docbridge convert report.odt -o report.pdf

  # Translate a MathML fragment to Office Math
  echo '<math><msup><mi>x</mi><mn>2</mn></msup></math>' | docbridge omml -

HTTP API:
  POST /convert?from=markdown&to=docx   raw body, or JSON {"text"|"content_base64"|"url", ...}
  POST /docx                            {"text": "# Markdown"}  →  output.docx
  POST /math/omml                       MathML body  →  OMML XML
  GET  /health                          liveness
  GET  /                                links and supported conversions

ENVIRONMENT VARIABLES:
  PORT                          Listen port (default 8000)
  DOCBRIDGE_PANDOC              pandoc executable (default: pandoc)
  DOCBRIDGE_SOFFICE             LibreOffice executable (default: soffice)
  DOCBRIDGE_TIMEOUT             Backend timeout in seconds, 1-3600 (default 120)
  DOCBRIDGE_MAX_BODY_BYTES      Largest accepted document (default 20 MiB)
  DOCBRIDGE_MAX_JOBS            Concurrent backend processes (default: CPU count)
  DOCBRIDGE_WORKSPACE_DIR       Job scratch root (default: $TMPDIR/docbridge)
  DOCBRIDGE_REFERENCE_DOC       Style reference for DOCX/ODT output
  DOCBRIDGE_MATH_FALLBACK       reject | verbatim (default reject)
  DOCBRIDGE_ALLOW_REMOTE        Allow {"url": ...} sources (default false)
  DOCBRIDGE_REQUEST_TIMEOUT     Whole-request limit in seconds (default: timeout + 30)
  RUST_LOG                      Overrides the log filter
"##;

/// Document conversion service backed by pandoc and LibreOffice.
#[derive(Parser, Debug)]
#[command(
    name = "docbridge",
    version,
    about = "Convert Markdown, HTML and office documents over HTTP via pandoc and LibreOffice",
    long_about = "Convert documents over HTTP. Markdown (with LaTeX or MathML formulas), HTML, \
DOCX, ODT and RTF go in; DOCX, ODT, HTML, RTF, Markdown, plain text or PDF come out. \
MathML is translated to native Word equations.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    service: ServiceArgs,

    /// Log output format.
    #[arg(long, global = true, env = "DOCBRIDGE_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCBRIDGE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCBRIDGE_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default).
    Serve,

    /// Convert one file and exit.
    Convert {
        /// Source document.
        input: PathBuf,

        /// Destination file.
        #[arg(short, long)]
        output: PathBuf,

        /// Source format; inferred from the input extension if omitted.
        #[arg(long)]
        from: Option<String>,

        /// Target format; inferred from the output extension if omitted.
        #[arg(long)]
        to: Option<String>,

        /// Force (true) or skip (false) MathML translation. Default: auto-detect.
        #[arg(long)]
        math: Option<bool>,
    },

    /// Translate a MathML fragment (file path or `-` for stdin) to OMML.
    Omml {
        #[arg(default_value = "-")]
        input: String,
    },
}

#[derive(Args, Debug)]
struct ServiceArgs {
    /// TCP port to listen on.
    #[arg(long, global = true, env = "PORT", default_value_t = 8000)]
    port: u16,

    /// pandoc executable.
    #[arg(long, global = true, env = "DOCBRIDGE_PANDOC", default_value = "pandoc")]
    pandoc: PathBuf,

    /// LibreOffice executable.
    #[arg(long, global = true, env = "DOCBRIDGE_SOFFICE", default_value = "soffice")]
    soffice: PathBuf,

    /// Backend process timeout in seconds (1–3600).
    #[arg(long, global = true, env = "DOCBRIDGE_TIMEOUT", default_value_t = 120,
          value_parser = clap::value_parser!(u64).range(1..=3600))]
    timeout: u64,

    /// Largest accepted document in bytes.
    #[arg(long, global = true, env = "DOCBRIDGE_MAX_BODY_BYTES", default_value_t = 20 * 1024 * 1024)]
    max_body_bytes: usize,

    /// Bytes of backend stderr kept for error messages.
    #[arg(long, global = true, env = "DOCBRIDGE_STDERR_LIMIT", default_value_t = 4096)]
    stderr_limit: usize,

    /// Concurrent backend processes. Default: available parallelism.
    #[arg(long, global = true, env = "DOCBRIDGE_MAX_JOBS")]
    max_jobs: Option<usize>,

    /// Root directory for per-job workspaces.
    #[arg(long, global = true, env = "DOCBRIDGE_WORKSPACE_DIR")]
    workspace_dir: Option<PathBuf>,

    /// Reference document (styles) for DOCX/ODT output.
    #[arg(long, global = true, env = "DOCBRIDGE_REFERENCE_DOC")]
    reference_doc: Option<PathBuf>,

    /// Run pandoc with --sandbox.
    #[arg(long, global = true, env = "DOCBRIDGE_PANDOC_SANDBOX", default_value_t = true,
          action = clap::ArgAction::Set)]
    pandoc_sandbox: bool,

    /// SOURCE_DATE_EPOCH exported to pandoc.
    #[arg(long, global = true, env = "DOCBRIDGE_SOURCE_DATE_EPOCH", default_value_t = 0)]
    source_date_epoch: u64,

    /// What to do with MathML that fails to translate: reject or verbatim.
    #[arg(long, global = true, env = "DOCBRIDGE_MATH_FALLBACK", default_value = "reject")]
    math_fallback: String,

    /// Allow JSON requests to name a source document by URL.
    #[arg(long, global = true, env = "DOCBRIDGE_ALLOW_REMOTE")]
    allow_remote: bool,

    /// Download timeout for URL sources, in seconds.
    #[arg(long, global = true, env = "DOCBRIDGE_DOWNLOAD_TIMEOUT", default_value_t = 30)]
    download_timeout: u64,

    /// Limit for a whole conversion request, queueing included, in seconds
    /// [default: backend timeout + 30].
    #[arg(long, global = true, env = "DOCBRIDGE_REQUEST_TIMEOUT")]
    request_timeout: Option<u64>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = build_config(&cli.service)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Convert {
            input,
            output,
            from,
            to,
            math,
        } => convert_file(config, input, output, from, to, math, cli.quiet).await,
        Command::Omml { input } => omml(&input),
    }
}

// ── Logging ──────────────────────────────────────────────────────────────

fn init_logging(cli: &Cli) {
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    match cli.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

// ── Config ───────────────────────────────────────────────────────────────

/// Map CLI args to `ServiceConfig`.
fn build_config(args: &ServiceArgs) -> Result<ServiceConfig> {
    let math_fallback: MathFallback = args.math_fallback.parse()?;

    let mut builder = ServiceConfig::builder()
        .port(args.port)
        .pandoc_path(&args.pandoc)
        .soffice_path(&args.soffice)
        .backend_timeout_secs(args.timeout)
        .max_body_bytes(args.max_body_bytes)
        .stderr_limit(args.stderr_limit)
        .pandoc_sandbox(args.pandoc_sandbox)
        .source_date_epoch(args.source_date_epoch)
        .math_fallback(math_fallback)
        .allow_remote_sources(args.allow_remote)
        .download_timeout_secs(args.download_timeout);

    if let Some(n) = args.max_jobs {
        builder = builder.max_concurrent_jobs(n);
    }
    if let Some(secs) = args.request_timeout {
        builder = builder.request_timeout_secs(secs);
    }
    if let Some(ref dir) = args.workspace_dir {
        builder = builder.workspace_root(dir);
    }
    if let Some(ref doc) = args.reference_doc {
        builder = builder.reference_doc(doc);
    }

    Ok(builder.build()?)
}

// ── Commands ─────────────────────────────────────────────────────────────

async fn serve(config: ServiceConfig) -> Result<()> {
    let port = config.port;
    let converter = Converter::new(config).context("Failed to initialise service")?;

    converter
        .check_backends()
        .await
        .context("Backend check failed")?;
    converter.sweep_stale_workspaces();

    let addr = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port);
    info!(
        "docbridge {} starting: {} concurrent job(s), workspaces in {}",
        env!("CARGO_PKG_VERSION"),
        converter.config().max_concurrent_jobs,
        converter.workspaces().root().display()
    );
    docbridge::serve(converter, addr).await.context("Server failed")?;
    Ok(())
}

async fn convert_file(
    config: ServiceConfig,
    input: PathBuf,
    output: PathBuf,
    from: Option<String>,
    to: Option<String>,
    math: Option<bool>,
    quiet: bool,
) -> Result<()> {
    let from = match from {
        Some(name) => name.parse()?,
        None => match DocumentFormat::from_path(&input) {
            Some(f) => f,
            None => bail!("Cannot infer source format from {:?}; pass --from", input),
        },
    };
    let to = match to {
        Some(name) => name.parse()?,
        None => match DocumentFormat::from_path(&output) {
            Some(f) => f,
            None => bail!("Cannot infer target format from {:?}; pass --to", output),
        },
    };

    let body = tokio::fs::read(&input)
        .await
        .with_context(|| format!("Failed to read {:?}", input))?;
    let converter = Converter::new(config).context("Failed to initialise converter")?;

    let mut request = ConversionRequest::new(body, from, to);
    request.math = math;
    let result = converter.convert(request).await.context("Conversion failed")?;

    tokio::fs::write(&output, &result.bytes)
        .await
        .with_context(|| format!("Failed to write {:?}", output))?;

    if !quiet {
        eprintln!(
            "{} → {}  {} bytes via {} in {}ms",
            from,
            output.display(),
            result.size,
            result.backend.name(),
            result.duration_ms
        );
    }
    Ok(())
}

fn omml(input: &str) -> Result<()> {
    let mathml = if input == "-" {
        let mut s = String::new();
        io::stdin()
            .read_to_string(&mut s)
            .context("Failed to read stdin")?;
        s
    } else {
        std::fs::read_to_string(input).with_context(|| format!("Failed to read {input}"))?
    };

    let omml = FormulaTranslator::new()
        .translate(mathml.trim())
        .context("MathML translation failed")?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{}", omml.to_xml()).context("Failed to write to stdout")?;
    Ok(())
}
