//! Input resolution: turn a JSON envelope into document bytes.
//!
//! `POST /convert` accepts either the raw document as the body, or a JSON
//! envelope naming the document one of three ways:
//!
//! ```json
//! { "to": "docx", "text": "# Title" }
//! { "from": "odt", "to": "pdf", "content_base64": "UEsDB…" }
//! { "to": "pdf", "url": "https://example.com/report.docx" }
//! ```
//!
//! ## Why is `url` off by default?
//!
//! Fetching arbitrary URLs from inside a deployment is a server-side request
//! forgery vector. Operators opt in with `allow_remote_sources`.

use crate::config::ServiceConfig;
use crate::error::ConvertError;
use crate::format::DocumentFormat;
use crate::output::ConversionRequest;
use base64::Engine as _;
use bytes::{Bytes, BytesMut};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

/// JSON request body for `POST /convert`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub from: Option<String>,
    pub to: Option<String>,
    pub text: Option<String>,
    pub content_base64: Option<String>,
    pub url: Option<String>,
    pub math: Option<bool>,
    pub filename: Option<String>,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

impl Envelope {
    /// Resolve the envelope to a request, downloading the source if needed.
    ///
    /// `to` defaults to DOCX. `from` defaults to Markdown for inline `text`
    /// and to the URL's file extension for `url`.
    pub async fn into_request(self, config: &ServiceConfig) -> Result<ConversionRequest, ConvertError> {
        let to = match self.to.as_deref() {
            Some(name) => name.parse()?,
            None => DocumentFormat::Docx,
        };
        let explicit_from = self.from.as_deref().map(str::parse).transpose()?;

        let (body, inferred_from, file_name) = match (self.text, self.content_base64, self.url) {
            (Some(text), None, None) => (Bytes::from(text), Some(DocumentFormat::Markdown), None),
            (None, Some(encoded), None) => {
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| ConvertError::InvalidInput(format!("content_base64: {e}")))?;
                (Bytes::from(decoded), None, None)
            }
            (None, None, Some(url)) => {
                if !config.allow_remote_sources {
                    return Err(ConvertError::InvalidInput(
                        "remote sources are disabled on this server".into(),
                    ));
                }
                let downloaded =
                    download_url(&url, config.download_timeout_secs, config.max_body_bytes).await?;
                let inferred = DocumentFormat::from_path(Path::new(&downloaded.file_name));
                (downloaded.bytes, inferred, Some(downloaded.file_name))
            }
            (None, None, None) => {
                return Err(ConvertError::InvalidInput(
                    "one of 'text', 'content_base64' or 'url' is required".into(),
                ))
            }
            _ => {
                return Err(ConvertError::InvalidInput(
                    "'text', 'content_base64' and 'url' are mutually exclusive".into(),
                ))
            }
        };

        let from = explicit_from.or(inferred_from).ok_or_else(|| {
            ConvertError::InvalidInput("'from' is required for this source".into())
        })?;

        let mut request = ConversionRequest::new(body, from, to);
        request.math = self.math;
        request.file_name = self.filename.or(file_name);
        Ok(request)
    }
}

/// A document fetched from a URL.
#[derive(Debug)]
pub struct Downloaded {
    pub bytes: Bytes,
    pub file_name: String,
}

/// Download a URL into memory, refusing bodies over `max_bytes`.
pub async fn download_url(url: &str, timeout_secs: u64, max_bytes: usize) -> Result<Downloaded, ConvertError> {
    if !is_url(url) {
        return Err(ConvertError::InvalidInput(format!(
            "'{url}' is not an http(s) URL"
        )));
    }
    info!("Downloading source document from: {}", url);

    let failed = |reason: String| ConvertError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timed out after {timeout_secs}s"))
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }
    if let Some(len) = response.content_length() {
        if len as usize > max_bytes {
            return Err(ConvertError::BodyTooLarge {
                size: len as usize,
                limit: max_bytes,
            });
        }
    }

    let file_name = extract_filename(url);
    let bytes = read_capped(response, max_bytes).await?;

    debug!("Downloaded {} bytes as {}", bytes.len(), file_name);
    Ok(Downloaded { bytes, file_name })
}

/// Read a response body chunk by chunk, giving up as soon as it passes
/// `max_bytes`. Chunked responses carry no `Content-Length` to check up front.
async fn read_capped(mut response: reqwest::Response, max_bytes: usize) -> Result<Bytes, ConvertError> {
    let url = response.url().to_string();
    let mut body = BytesMut::new();
    loop {
        let chunk = response
            .chunk()
            .await
            .map_err(|e| ConvertError::DownloadFailed {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        let Some(chunk) = chunk else {
            break;
        };
        if body.len() + chunk.len() > max_bytes {
            return Err(ConvertError::BodyTooLarge {
                size: body.len() + chunk.len(),
                limit: max_bytes,
            });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

/// Extract a reasonable filename from the URL path.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded".to_string()
}
