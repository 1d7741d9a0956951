//! HTTP surface tests: the router is driven in-process with `oneshot`.
//!
//! Conversions use a stand-in pandoc that copies its input to its output,
//! so the response body shows what the backend received.

#![cfg(unix)]

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use docbridge::{router, Converter, ServiceConfig, ServiceConfigBuilder};
use std::time::{Duration, Instant};
use once_cell::sync::Lazy;
use serde_json::Value;
use std::os::unix::fs::PermissionsExt;
use tempfile::TempDir;
use tower::ServiceExt;

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

const SLEEPING_PANDOC: &str = "#!/bin/sh\nexec sleep 30\n";

static PANDOC: Lazy<TempDir> = Lazy::new(|| {
    let dir = tempfile::tempdir().expect("create fixture dir");
    for (name, body) in [("pandoc", COPY_PANDOC), ("sleeping-pandoc", SLEEPING_PANDOC)] {
        let path = dir.path().join(name);
        std::fs::write(&path, body).expect("write fake pandoc");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod fake pandoc");
    }
    dir
});

struct Harness {
    app: axum::Router,
    _root: TempDir,
}

fn harness() -> Harness {
    harness_with(ServiceConfig::builder().pandoc_path(PANDOC.path().join("pandoc")))
}

fn harness_with(builder: ServiceConfigBuilder) -> Harness {
    let root = tempfile::tempdir().unwrap();
    let config = builder
        .workspace_root(root.path())
        .max_body_bytes(1024)
        .build()
        .unwrap();
    Harness {
        app: router(Converter::new(config).unwrap()),
        _root: root,
    }
}

impl Harness {
    async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn post(&self, uri: &str, content_type: &str, body: impl Into<Body>) -> Response {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, content_type)
                .body(body.into())
                .unwrap(),
        )
        .await
    }
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn header_str<'a>(response: &'a Response, name: &str) -> &'a str {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

// ── Discovery ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_ok() {
    let h = harness();
    let response = h
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["available_slots"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn root_lists_links_and_conversions() {
    let h = harness();
    let response = h.send(Request::get("/").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["name"], "docbridge");
    assert_eq!(json["_links"]["convert"], "/convert");
    assert_eq!(json["_links"]["omml"], "/math/omml");
    let conversions = json["conversions"].as_array().unwrap();
    assert!(conversions
        .iter()
        .any(|c| c["from"] == "markdown" && c["to"] == "docx" && c["backend"] == "pandoc"));
}

// ── Conversion ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn legacy_docx_endpoint_returns_an_attachment() {
    let h = harness();
    let response = h
        .post("/docx", "application/json", r##"{"text": "# Hello"}"##)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(&response, "content-disposition"),
        "attachment; filename=\"output.docx\""
    );
    assert_eq!(header_str(&response, "x-docbridge-backend"), "pandoc");
    assert!(header_str(&response, "content-type").contains("wordprocessingml"));
    assert_eq!(body_bytes(response).await, b"# Hello");
}

#[tokio::test]
async fn raw_body_with_query_parameters() {
    let h = harness();
    let response = h
        .post("/convert?to=plain&filename=notes", "text/markdown", "*hi*")
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(&response, "content-disposition"),
        "attachment; filename=\"notes.txt\""
    );
    assert!(header_str(&response, "content-type").starts_with("text/plain"));
    assert_eq!(body_bytes(response).await, b"*hi*");
}

#[tokio::test]
async fn json_envelope_with_inline_text() {
    let h = harness();
    let response = h
        .post(
            "/convert",
            "application/json",
            r#"{"to": "html", "text": "x <math><mi>y</mi></math>"}"#,
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(header_str(&response, "content-type").starts_with("text/html"));
    // Only markdown → docx gets formula translation.
    assert_eq!(body_bytes(response).await, b"x <math><mi>y</mi></math>");
}

#[tokio::test]
async fn json_envelope_with_base64_content() {
    let h = harness();
    let response = h
        .post(
            "/convert",
            "application/json",
            r#"{"from": "html", "to": "markdown", "content_base64": "PHA+aGk8L3A+"}"#,
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"<p>hi</p>");
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_body_is_a_bad_request() {
    let h = harness();
    let response = h.post("/convert", "text/markdown", Body::empty()).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["kind"], "invalid_input");
    assert!(json["error"]["message"].as_str().unwrap().contains("empty"));
}

#[tokio::test]
async fn unknown_format_is_a_bad_request() {
    let h = harness();
    let response = h
        .post("/convert?from=pages&to=docx", "application/octet-stream", "x")
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["kind"], "invalid_input");
    assert!(json["error"]["message"].as_str().unwrap().contains("pages"));
}

#[tokio::test]
async fn unsupported_pair_is_a_bad_request() {
    let h = harness();
    let response = h.post("/convert?to=pdf", "text/markdown", "# x").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let h = harness();
    let response = h
        .post("/convert", "text/markdown", "a".repeat(2048))
        .await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(response).await["error"]["kind"], "invalid_input");
}

#[tokio::test]
async fn remote_sources_are_disabled_by_default() {
    let h = harness();
    let response = h
        .post(
            "/convert",
            "application/json",
            r#"{"url": "https://example.com/a.docx", "to": "pdf"}"#,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_mathml_in_a_document_is_unprocessable() {
    let h = harness();
    let response = h
        .post("/docx", "application/json", r#"{"text": "a <math><mfrac><mi>x</mi></mfrac></math>"}"#)
        .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(response).await;
    assert_eq!(json["error"]["kind"], "malformed_mathml");
    assert!(json["error"]["message"].as_str().unwrap().contains("Formula 1"));
}

#[tokio::test]
async fn request_deadline_is_a_json_gateway_timeout() {
    let h = harness_with(
        ServiceConfig::builder()
            .pandoc_path(PANDOC.path().join("sleeping-pandoc"))
            .backend_timeout_secs(60)
            .request_timeout_secs(1),
    );

    let started = Instant::now();
    let response = h.post("/docx", "application/json", r##"{"text": "# slow"}"##).await;

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(started.elapsed() < Duration::from_secs(20));
    let json = body_json(response).await;
    assert_eq!(json["error"]["kind"], "conversion_timeout");
    assert!(json["error"]["message"].as_str().unwrap().contains("pandoc"));
}

#[tokio::test]
async fn queued_request_times_out_while_waiting_for_a_slot() {
    let h = harness_with(
        ServiceConfig::builder()
            .pandoc_path(PANDOC.path().join("sleeping-pandoc"))
            .backend_timeout_secs(60)
            .max_concurrent_jobs(1)
            .request_timeout_secs(1),
    );

    let first = h.post("/docx", "application/json", r##"{"text": "# one"}"##);
    let second = h.post("/docx", "application/json", r##"{"text": "# two"}"##);
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(second.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body_json(second).await["error"]["kind"], "conversion_timeout");
}

// ── Math ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn mathml_fragment_to_omml() {
    let h = harness();
    let response = h
        .post(
            "/math/omml",
            "application/mathml+xml",
            "<math><mfrac><mn>1</mn><mn>2</mn></mfrac></math>",
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(header_str(&response, "content-type").starts_with("application/xml"));
    let xml = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(xml.contains("<m:oMath"));
    assert!(xml.contains("<m:f>"));
}

#[tokio::test]
async fn invalid_mathml_fragment_is_unprocessable() {
    let h = harness();
    let response = h
        .post("/math/omml", "application/mathml+xml", "<math><mi>x</math>")
        .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["error"]["kind"], "malformed_mathml");
}
