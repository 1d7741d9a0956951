//! HTTP interface.
//!
//! | method | path          | body                                   | returns            |
//! |--------|---------------|----------------------------------------|--------------------|
//! | GET    | `/`           | –                                      | links, version, supported pairs |
//! | GET    | `/health`     | –                                      | `{"status":"ok"}`  |
//! | POST   | `/convert`    | raw document, or JSON [`Envelope`]     | converted document |
//! | POST   | `/docx`       | `{"text": "<markdown>"}`               | DOCX               |
//! | POST   | `/math/omml`  | one MathML fragment                    | OMML XML           |
//!
//! Errors are JSON: `{"error": {"kind": "...", "message": "..."}}`.
//!
//! Each conversion handler holds the drop guard of its job's cancellation
//! token. If the client disconnects, axum drops the handler future, the token
//! fires, and the backend is killed. A job that outlives
//! [`ServiceConfig::request_timeout`](crate::ServiceConfig::request_timeout)
//! (queueing included) is dropped the same way and answered with a
//! `conversion_timeout` JSON error.

use crate::convert::Converter;
use crate::error::{ConvertError, ErrorKind, SetupError};
use crate::format::DocumentFormat;
use crate::output::{supported_conversions, ConversionRequest, ConversionResult, SupportedConversion};
use crate::pipeline::backend::Backend;
use crate::pipeline::input::Envelope;
use axum::extract::rejection::{BytesRejection, JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build the application router.
pub fn router(converter: Converter) -> Router {
    let config = converter.config();
    // Room for a base64 envelope around a body of the maximum size.
    let transport_limit = config.max_body_bytes / 3 * 4 + 64 * 1024;

    Router::new()
        .route("/", get(root_links))
        .route("/health", get(health))
        .route("/convert", post(convert))
        .route("/docx", post(legacy_docx))
        .route("/math/omml", post(math_to_omml))
        .layer(DefaultBodyLimit::max(transport_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(converter)
}

/// Bind `addr` and serve until SIGINT or SIGTERM.
pub async fn serve(converter: Converter, addr: SocketAddr) -> Result<(), SetupError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| SetupError::Bind { addr, source })?;
    serve_on(listener, converter).await
}

/// Serve on an already bound listener until SIGINT or SIGTERM.
pub async fn serve_on(listener: TcpListener, converter: Converter) -> Result<(), SetupError> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on {}", addr);
    }
    axum::serve(listener, router(converter))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(SetupError::Serve)?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, draining in-flight requests");
}

// ── Root & health ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct RootDto {
    pub name: &'static str,
    pub version: &'static str,
    pub _links: RootLinks,
    pub conversions: Vec<SupportedConversion>,
}

#[derive(Debug, Serialize)]
pub struct RootLinks {
    pub convert: &'static str,
    pub docx: &'static str,
    pub omml: &'static str,
    pub health: &'static str,
}

async fn root_links() -> Json<RootDto> {
    Json(RootDto {
        name: NAME,
        version: VERSION,
        _links: RootLinks {
            convert: "/convert",
            docx: "/docx",
            omml: "/math/omml",
            health: "/health",
        },
        conversions: supported_conversions(),
    })
}

#[derive(Debug, Serialize)]
struct HealthDto {
    status: &'static str,
    available_slots: usize,
}

async fn health(State(converter): State<Converter>) -> Json<HealthDto> {
    Json(HealthDto {
        status: "ok",
        available_slots: converter.available_slots(),
    })
}

// ── Conversion ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct ConvertParams {
    from: Option<String>,
    to: Option<String>,
    math: Option<bool>,
    filename: Option<String>,
}

async fn convert(
    State(converter): State<Converter>,
    params: Result<Query<ConvertParams>, QueryRejection>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params.map_err(|e| ConvertError::InvalidInput(e.body_text()))?;
    let body = body.map_err(|e| body_rejection(e, &headers, &converter))?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let request = if is_json(content_type) {
        let envelope: Envelope = serde_json::from_slice(&body)
            .map_err(|e| ConvertError::InvalidInput(format!("invalid JSON envelope: {e}")))?;
        envelope.into_request(converter.config()).await?
    } else {
        raw_request(params, content_type, body)?
    };

    run(&converter, request).await
}

fn raw_request(
    params: ConvertParams,
    content_type: &str,
    body: Bytes,
) -> Result<ConversionRequest, ConvertError> {
    let from = match params.from.as_deref() {
        Some(name) => name.parse()?,
        None => DocumentFormat::from_mime(content_type).ok_or_else(|| {
            ConvertError::InvalidInput(
                "'from' query parameter is required when Content-Type does not identify the format"
                    .into(),
            )
        })?,
    };
    let to = match params.to.as_deref() {
        Some(name) => name.parse()?,
        None => DocumentFormat::Docx,
    };

    let mut request = ConversionRequest::new(body, from, to);
    request.math = params.math;
    request.file_name = params.filename;
    Ok(request)
}

#[derive(Debug, Deserialize)]
struct LegacyDocxRequest {
    text: String,
}

/// `POST /docx`: Markdown text in, `output.docx` out.
async fn legacy_docx(
    State(converter): State<Converter>,
    headers: HeaderMap,
    payload: Result<Json<LegacyDocxRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload.map_err(|e| match e {
        JsonRejection::BytesRejection(inner) => body_rejection(inner, &headers, &converter),
        other => ConvertError::InvalidInput(other.body_text()),
    })?;
    let request = ConversionRequest::new(payload.text, DocumentFormat::Markdown, DocumentFormat::Docx);
    run(&converter, request).await
}

async fn run(converter: &Converter, request: ConversionRequest) -> Result<Response, ApiError> {
    let deadline = converter.config().request_timeout();
    let backend = Backend::select(request.source, request.target).map_or("conversion", |b| b.name());
    let token = CancellationToken::new();
    let _guard = token.clone().drop_guard();
    let result = tokio::time::timeout(deadline, converter.convert_with_cancel(request, token))
        .await
        .map_err(|_| {
            warn!("Request gave up after {}s", deadline.as_secs());
            ConvertError::ConversionTimeout {
                backend,
                secs: deadline.as_secs(),
            }
        })??;
    Ok(document_response(result))
}

fn document_response(result: ConversionResult) -> Response {
    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(result.content_type.as_ref()) {
        headers.insert(header::CONTENT_TYPE, v);
    }
    let disposition = format!("attachment; filename=\"{}\"", result.file_name);
    let disposition = HeaderValue::from_str(&disposition).unwrap_or_else(|_| {
        HeaderValue::from_static("attachment")
    });
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    headers.insert("x-docbridge-backend", HeaderValue::from_static(result.backend.name()));
    headers.insert("x-docbridge-duration-ms", HeaderValue::from(result.duration_ms));
    (StatusCode::OK, headers, result.bytes).into_response()
}

// ── Math ─────────────────────────────────────────────────────────────────

/// `POST /math/omml`: MathML in, OMML out.
async fn math_to_omml(
    State(converter): State<Converter>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let body = body.map_err(|e| body_rejection(e, &headers, &converter))?;
    if body.is_empty() {
        return Err(ConvertError::EmptyBody.into());
    }
    let mathml = std::str::from_utf8(&body)
        .map_err(|e| ConvertError::InvalidInput(format!("MathML is not UTF-8: {e}")))?;
    let omml = converter.translate_mathml(mathml)?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
        omml.to_xml(),
    )
        .into_response())
}

// ── Errors ───────────────────────────────────────────────────────────────

/// A [`ConvertError`] rendered as a JSON HTTP response.
#[derive(Debug)]
pub struct ApiError(pub ConvertError);

impl From<ConvertError> for ApiError {
    fn from(e: ConvertError) -> Self {
        ApiError(e)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    kind: ErrorKind,
    message: String,
}

/// HTTP status for a per-job error.
pub fn status_for(error: &ConvertError) -> StatusCode {
    match error {
        ConvertError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        other => match other.kind() {
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::MalformedMathml => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::ConversionFailed => StatusCode::BAD_GATEWAY,
            ErrorKind::ConversionTimeout => StatusCode::GATEWAY_TIMEOUT,
            // Client closed request; only ever seen in logs.
            ErrorKind::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if let ConvertError::Internal(detail) = &self.0 {
            error!("Internal error: {}", detail);
        }
        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.0.kind(),
                message: self.0.public_message(),
            },
        };
        (status, Json(body)).into_response()
    }
}

fn body_rejection(rejection: BytesRejection, headers: &HeaderMap, converter: &Converter) -> ConvertError {
    if rejection.status() != StatusCode::PAYLOAD_TOO_LARGE {
        return ConvertError::InvalidInput(rejection.body_text());
    }
    let limit = converter.config().max_body_bytes;
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    ConvertError::BodyTooLarge {
        size: declared.unwrap_or(limit.saturating_add(1)),
        limit,
    }
}

fn is_json(content_type: &str) -> bool {
    content_type
        .parse::<mime::Mime>()
        .map(|m| m.essence_str() == mime::APPLICATION_JSON.essence_str())
        .unwrap_or(false)
}
