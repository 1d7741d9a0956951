//! Document formats understood by the service.
//!
//! Each [`DocumentFormat`] knows its wire name, file extension, MIME type, and
//! the names pandoc and LibreOffice use for it. Keeping all of these in one
//! enum means adding a format is a single-file change.

use crate::error::ConvertError;
use mime::Mime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const ODT_MIME: &str = "application/vnd.oasis.opendocument.text";
pub const RTF_MIME: &str = "application/rtf";
pub const MARKDOWN_MIME: &str = "text/markdown; charset=utf-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Markdown,
    Html,
    Docx,
    Odt,
    Rtf,
    Pdf,
    Plain,
}

impl DocumentFormat {
    pub const ALL: [DocumentFormat; 7] = [
        DocumentFormat::Markdown,
        DocumentFormat::Html,
        DocumentFormat::Docx,
        DocumentFormat::Odt,
        DocumentFormat::Rtf,
        DocumentFormat::Pdf,
        DocumentFormat::Plain,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DocumentFormat::Markdown => "markdown",
            DocumentFormat::Html => "html",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Odt => "odt",
            DocumentFormat::Rtf => "rtf",
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Plain => "plain",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Markdown => "md",
            DocumentFormat::Html => "html",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Odt => "odt",
            DocumentFormat::Rtf => "rtf",
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Plain => "txt",
        }
    }

    pub fn mime(&self) -> Mime {
        match self {
            DocumentFormat::Markdown => parse_mime(MARKDOWN_MIME),
            DocumentFormat::Html => mime::TEXT_HTML_UTF_8,
            DocumentFormat::Docx => parse_mime(DOCX_MIME),
            DocumentFormat::Odt => parse_mime(ODT_MIME),
            DocumentFormat::Rtf => parse_mime(RTF_MIME),
            DocumentFormat::Pdf => mime::APPLICATION_PDF,
            DocumentFormat::Plain => mime::TEXT_PLAIN_UTF_8,
        }
    }

    /// Format name passed to `pandoc --from` / `--to`.
    ///
    /// Markdown input enables the extensions the formula pipeline relies on.
    pub fn pandoc_reader(&self) -> &'static str {
        match self {
            DocumentFormat::Markdown => "markdown+tex_math_dollars+raw_attribute",
            other => other.pandoc_name(),
        }
    }

    pub fn pandoc_name(&self) -> &'static str {
        match self {
            DocumentFormat::Markdown => "markdown",
            DocumentFormat::Html => "html",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Odt => "odt",
            DocumentFormat::Rtf => "rtf",
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Plain => "plain",
        }
    }

    /// `--convert-to` argument for LibreOffice, with an explicit export filter
    /// where the extension alone is ambiguous.
    pub fn soffice_filter(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf:writer_pdf_Export",
            DocumentFormat::Docx => "docx:MS Word 2007 XML",
            DocumentFormat::Odt => "odt:writer8",
            DocumentFormat::Html => "html:HTML (StarWriter)",
            DocumentFormat::Rtf => "rtf:Rich Text Format",
            DocumentFormat::Markdown => "md",
            DocumentFormat::Plain => "txt:Text",
        }
    }

    /// Guess the format from a `Content-Type` header value.
    pub fn from_mime(value: &str) -> Option<Self> {
        let mime = Mime::from_str(value).ok()?;
        let essence = mime.essence_str();
        match essence {
            "text/markdown" | "text/x-markdown" => Some(DocumentFormat::Markdown),
            "text/html" | "application/xhtml+xml" => Some(DocumentFormat::Html),
            DOCX_MIME => Some(DocumentFormat::Docx),
            ODT_MIME => Some(DocumentFormat::Odt),
            "application/rtf" | "text/rtf" => Some(DocumentFormat::Rtf),
            "application/pdf" => Some(DocumentFormat::Pdf),
            "text/plain" => Some(DocumentFormat::Plain),
            _ => None,
        }
    }

    /// Guess the format from a file name's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "md" | "markdown" | "mdown" => Some(DocumentFormat::Markdown),
            "html" | "htm" | "xhtml" => Some(DocumentFormat::Html),
            "docx" => Some(DocumentFormat::Docx),
            "odt" => Some(DocumentFormat::Odt),
            "rtf" => Some(DocumentFormat::Rtf),
            "pdf" => Some(DocumentFormat::Pdf),
            "txt" | "text" => Some(DocumentFormat::Plain),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DocumentFormat {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" | "gfm" | "commonmark" => Ok(DocumentFormat::Markdown),
            "html" | "htm" | "html5" => Ok(DocumentFormat::Html),
            "docx" => Ok(DocumentFormat::Docx),
            "odt" => Ok(DocumentFormat::Odt),
            "rtf" => Ok(DocumentFormat::Rtf),
            "pdf" => Ok(DocumentFormat::Pdf),
            "plain" | "txt" | "text" => Ok(DocumentFormat::Plain),
            other => Err(ConvertError::UnknownFormat(other.to_string())),
        }
    }
}

fn parse_mime(s: &str) -> Mime {
    Mime::from_str(s).unwrap_or(mime::APPLICATION_OCTET_STREAM)
}
