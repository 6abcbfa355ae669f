//! Client-side checks that run before anything reaches the network.

use crate::model::AnalysisForm;
use bytes::Bytes;
use std::path::Path;
use thiserror::Error;

pub const MIN_SEGMENT_CHARS: usize = 3;
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "text/plain",
    "text/csv",
    "application/json",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("Segment must have at least 3 characters")]
    SegmentTooShort,
    #[error("Product is required")]
    MissingProduct,
}

pub fn validate_form(form: &AnalysisForm) -> Result<(), FormError> {
    if form.segmento.trim().chars().count() < MIN_SEGMENT_CHARS {
        return Err(FormError::SegmentTooShort);
    }
    if form.produto.trim().is_empty() {
        return Err(FormError::MissingProduct);
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum UploadRejection {
    #[error("{name} is {size} bytes; the limit is 10 MiB")]
    TooLarge { name: String, size: u64 },
    #[error("{name} has a type that cannot be uploaded ({mime})")]
    DisallowedType { name: String, mime: String },
    #[error("{name} could not be read: {source}")]
    Unreadable {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// A file that passed validation and is ready to be sent.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub mime: String,
    pub contents: Bytes,
}

/// Guess a MIME type from the file extension.
pub fn mime_for_path(path: &Path) -> mime_guess::Mime {
    mime_guess::from_path(path).first_or_octet_stream()
}

/// Check size and type, then read the file. Size is checked from metadata so
/// an oversized file is never read into memory.
pub fn prepare_upload(path: &Path) -> Result<UploadFile, UploadRejection> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let meta = std::fs::metadata(path).map_err(|source| UploadRejection::Unreadable {
        name: name.clone(),
        source,
    })?;
    if meta.len() > MAX_UPLOAD_BYTES {
        return Err(UploadRejection::TooLarge {
            name,
            size: meta.len(),
        });
    }

    let mime = mime_for_path(path).essence_str().to_string();
    if !ALLOWED_MIME_TYPES.contains(&mime.as_str()) {
        return Err(UploadRejection::DisallowedType { name, mime });
    }

    let contents = std::fs::read(path).map_err(|source| UploadRejection::Unreadable {
        name: name.clone(),
        source,
    })?;

    Ok(UploadFile {
        file_name: name,
        mime,
        contents: Bytes::from(contents),
    })
}
