//! Pre-upload file validation.
//!
//! Checks run against the declared name/size/content-type before any bytes
//! reach a backend, plus a magic-number sniff over the payload itself. The
//! defaults target image uploads; both allow-lists are replaceable.

use std::collections::HashSet;

use chrono::Utc;

use crate::error::{Result, UploadError};
use crate::provider::IncomingFile;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 25 * 1024 * 1024;

const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp", ".tiff", ".svg",
];

const DEFAULT_ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/bmp",
    "image/tiff",
    "image/svg+xml",
    "image/pdf",
];

// Leading bytes for the formats the content sniffer recognizes.
const MAGIC_NUMBERS: &[&[u8]] = &[
    &[0x42, 0x4D],             // bmp
    &[0x47, 0x49, 0x46, 0x38], // gif
    &[0x89, 0x50, 0x4E, 0x47], // png
    &[0xFF, 0xD8, 0xFF],       // jpeg
    &[0x52, 0x49, 0x46, 0x46], // webp (RIFF)
];

pub struct Validator {
    max_file_size: u64,
    allowed_extensions: HashSet<String>,
    allowed_mime_types: HashSet<String>,
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_file_size(mut self, max: u64) -> Self {
        self.max_file_size = max;
        self
    }

    pub fn with_allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_extensions = extensions
            .into_iter()
            .map(|s| s.into().to_lowercase())
            .collect();
        self
    }

    pub fn with_allowed_mime_types<I, S>(mut self, mime_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_mime_types = mime_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Whether the declared content type is on the allow-list.
    pub fn is_allowed_mime_type(&self, content_type: &str) -> bool {
        self.allowed_mime_types.contains(content_type)
    }

    /// Check declared size, filename extension and content type.
    pub fn validate_file(&self, file: &IncomingFile) -> Result<()> {
        let size = file.content.len() as u64;
        if size > self.max_file_size {
            return Err(UploadError::validation(
                "file_size",
                format!("file too large, max: {} bytes", self.max_file_size),
            ));
        }

        let ext = extension(&file.name).to_lowercase();
        if !self.allowed_extensions.contains(&ext) {
            return Err(UploadError::validation(
                "file_format",
                format!("invalid format, allowed: {}", self.allowed_list(true)),
            ));
        }

        if !self.allowed_mime_types.contains(&file.content_type) {
            return Err(UploadError::validation(
                "content_type",
                format!("invalid mime type, allowed: {}", self.allowed_list(false)),
            ));
        }

        Ok(())
    }

    /// Sniff the payload's leading bytes against known image signatures.
    pub fn validate_file_content(&self, content: &[u8]) -> Result<()> {
        if content.len() as u64 > self.max_file_size {
            return Err(UploadError::validation(
                "file_size",
                format!("file too large, max: {} bytes", self.max_file_size),
            ));
        }
        if !has_known_signature(content) {
            return Err(UploadError::validation(
                "file_content",
                "invalid file content",
            ));
        }
        Ok(())
    }

    /// A collision-resistant object name keeping the original extension,
    /// optionally nested under `path`.
    pub fn random_name(&self, file: &IncomingFile, path: Option<&str>) -> Result<String> {
        let ext = extension(&file.name);
        if ext.is_empty() {
            return Err(UploadError::validation(
                "file_extension",
                "file extension not found",
            ));
        }

        let name = format!("{}{}", Utc::now().timestamp_micros(), ext);
        match path {
            Some(p) if !p.is_empty() => Ok(format!("{}/{}", p.trim_end_matches('/'), name)),
            _ => Ok(name),
        }
    }

    fn allowed_list(&self, extensions: bool) -> String {
        let mut values: Vec<&str> = if extensions {
            self.allowed_extensions.iter().map(String::as_str).collect()
        } else {
            self.allowed_mime_types.iter().map(String::as_str).collect()
        };
        values.sort_unstable();
        values.join(",")
    }
}

/// Filename extension including the leading dot, or empty.
fn extension(name: &str) -> String {
    std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default()
}

fn has_known_signature(content: &[u8]) -> bool {
    if content.len() < 4 {
        return false;
    }
    MAGIC_NUMBERS
        .iter()
        .any(|magic| content.len() >= magic.len() && &content[..magic.len()] == *magic)
}
