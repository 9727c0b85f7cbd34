//! Attachment preprocessing
//!
//! Files are validated by declared size and MIME type before anything is
//! read, then turned into an [`Attachment`]: images become inline base64
//! with a data-URI preview, PDFs become best-effort plain text (see
//! [`pdf`]).

pub mod pdf;

pub use pdf::{extract_pdf_text, MAX_EXTRACTED_CHARS};

use crate::error::{CharlaError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Largest accepted upload, before encoding
pub const MAX_ATTACHMENT_BYTES: u64 = 5 * 1024 * 1024;

/// Accepted raster image types
pub const IMAGE_MIME_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/gif", "image/webp"];

/// Accepted document type
pub const PDF_MIME_TYPE: &str = "application/pdf";

/// Why a file was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// File exceeds [`MAX_ATTACHMENT_BYTES`]
    #[error("file too large: {size} bytes (limit {limit})")]
    TooLarge {
        /// Declared size in bytes
        size: u64,
        /// Limit in bytes
        limit: u64,
    },

    /// Declared MIME type is not an accepted image or PDF type
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),
}

/// A processed attachment carried by a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Attachment {
    /// Inline image
    Image {
        /// Base64-encoded file bytes
        data: String,
        /// Declared MIME type
        mime_type: String,
        /// Original file name
        file_name: String,
        /// `data:` URI for echoing the image back
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preview: Option<String>,
    },
    /// Text scraped from a PDF
    Pdf {
        /// Extracted text, empty when extraction found nothing
        text: String,
        /// Original file name
        file_name: String,
        /// Declared MIME type
        mime_type: String,
    },
}

impl Attachment {
    /// Original file name
    pub fn file_name(&self) -> &str {
        match self {
            Self::Image { file_name, .. } | Self::Pdf { file_name, .. } => file_name,
        }
    }

    /// `data:` URI for an image, `None` for PDFs
    pub fn data_uri(&self) -> Option<String> {
        match self {
            Self::Image {
                data, mime_type, ..
            } => Some(format!("data:{};base64,{}", mime_type, data)),
            Self::Pdf { .. } => None,
        }
    }
}

/// Where the bytes of an incoming file come from
#[derive(Debug, Clone)]
pub enum FileSource {
    /// Read lazily from disk after validation
    Path(PathBuf),
    /// Already in memory
    Bytes(Vec<u8>),
}

/// A file offered for upload, described before it is read
#[derive(Debug, Clone)]
pub struct IncomingFile {
    /// Display name
    pub file_name: String,
    /// Declared MIME type
    pub mime_type: String,
    /// Declared size in bytes
    pub size: u64,
    /// Byte source
    pub source: FileSource,
}

impl IncomingFile {
    /// Describes a file on disk from its metadata and extension
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file metadata cannot be read
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            file_name,
            mime_type: mime_from_path(path).to_string(),
            size: metadata.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    /// Describes an in-memory file
    pub fn from_bytes(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            size: bytes.len() as u64,
            source: FileSource::Bytes(bytes),
        }
    }

    fn read(&self) -> Result<Vec<u8>> {
        match &self.source {
            FileSource::Path(path) => Ok(std::fs::read(path)?),
            FileSource::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Maps a file extension to the MIME type used for validation
///
/// # Examples
///
/// ```
/// use charla::attachment::mime_from_path;
///
/// assert_eq!(mime_from_path("photo.JPG"), "image/jpeg");
/// assert_eq!(mime_from_path("notes.txt"), "text/plain");
/// ```
pub fn mime_from_path(path: impl AsRef<Path>) -> &'static str {
    let extension = path
        .as_ref()
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => PDF_MIME_TYPE,
        "txt" | "md" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Checks size and type without touching the file contents
///
/// # Errors
///
/// Returns [`Rejection::TooLarge`] or [`Rejection::UnsupportedType`]
pub fn validate(file: &IncomingFile) -> std::result::Result<(), Rejection> {
    if file.size > MAX_ATTACHMENT_BYTES {
        return Err(Rejection::TooLarge {
            size: file.size,
            limit: MAX_ATTACHMENT_BYTES,
        });
    }

    let mime = file.mime_type.to_ascii_lowercase();
    if !IMAGE_MIME_TYPES.contains(&mime.as_str()) && mime != PDF_MIME_TYPE {
        return Err(Rejection::UnsupportedType(file.mime_type.clone()));
    }

    Ok(())
}

/// Validates and converts an incoming file into an [`Attachment`]
///
/// # Errors
///
/// Returns `CharlaError::AttachmentRejected` before any read when the file
/// is too large or of an unsupported type, and an IO error when the bytes
/// cannot be read.
pub fn accept(file: &IncomingFile) -> Result<Attachment> {
    validate(file).map_err(CharlaError::from)?;

    let bytes = file.read()?;
    // Declared size is what gets validated; re-check what was actually read.
    if bytes.len() as u64 > MAX_ATTACHMENT_BYTES {
        return Err(CharlaError::from(Rejection::TooLarge {
            size: bytes.len() as u64,
            limit: MAX_ATTACHMENT_BYTES,
        })
        .into());
    }

    let mime_type = file.mime_type.to_ascii_lowercase();
    if mime_type == PDF_MIME_TYPE {
        let text = extract_pdf_text(&bytes);
        tracing::debug!(
            file = %file.file_name,
            chars = text.chars().count(),
            "Extracted PDF text"
        );
        return Ok(Attachment::Pdf {
            text,
            file_name: file.file_name.clone(),
            mime_type,
        });
    }

    if let Ok(sniffed) = image::guess_format(&bytes) {
        if sniffed.to_mime_type() != mime_type {
            tracing::warn!(
                file = %file.file_name,
                declared = %mime_type,
                sniffed = %sniffed.to_mime_type(),
                "Image content does not match declared type"
            );
        }
    }

    let data = STANDARD.encode(&bytes);
    let preview = format!("data:{};base64,{}", mime_type, data);
    tracing::debug!(file = %file.file_name, bytes = bytes.len(), "Encoded image attachment");

    Ok(Attachment::Image {
        data,
        mime_type,
        file_name: file.file_name.clone(),
        preview: Some(preview),
    })
}
