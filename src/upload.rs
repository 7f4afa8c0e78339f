use crate::config::Settings;
use std::path::Path;
use thiserror::Error;

const MAGIC_NUMBERS: &[(&[u8], &str)] = &[
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
];

#[derive(Debug, Error, PartialEq)]
pub enum UploadError {
    #[error("Empty file uploaded")]
    Empty,
    #[error("File too large: {size_mb:.1}MB (max {max_mb}MB)")]
    TooLarge { size_mb: f64, max_mb: u64 },
    #[error("No filename provided")]
    MissingFilename,
    #[error("Invalid file type: {extension}. Allowed: {allowed}")]
    DisallowedExtension { extension: String, allowed: String },
    #[error("File is not a valid image (invalid magic numbers)")]
    NotAnImage,
}

/// An uploaded file as received, held in memory for the duration of one request.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ValidatedImage {
    pub media_type: &'static str,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(filename: Option<String>, bytes: Vec<u8>) -> Self {
        Self { filename, bytes }
    }

    pub fn validate(self, settings: &Settings) -> Result<ValidatedImage, UploadError> {
        let size = self.bytes.len();
        if size > settings.max_upload_bytes() {
            return Err(UploadError::TooLarge {
                size_mb: size as f64 / (1024.0 * 1024.0),
                max_mb: settings.max_upload_size_mb,
            });
        }
        if size == 0 {
            return Err(UploadError::Empty);
        }

        let filename = self
            .filename
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or(UploadError::MissingFilename)?;
        let extension = extension_of(filename);
        if !settings.allowed_extensions.iter().any(|ext| *ext == extension) {
            return Err(UploadError::DisallowedExtension {
                extension,
                allowed: settings.allowed_extensions.join(", "),
            });
        }

        let media_type = sniff_media_type(&self.bytes).ok_or(UploadError::NotAnImage)?;
        Ok(ValidatedImage {
            media_type,
            bytes: self.bytes,
        })
    }
}

fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

/// Media type from the file signature; WebP needs the `WEBP` tag after `RIFF`.
pub fn sniff_media_type(bytes: &[u8]) -> Option<&'static str> {
    if let Some((_, media_type)) = MAGIC_NUMBERS
        .iter()
        .find(|(magic, _)| bytes.starts_with(magic))
    {
        return Some(*media_type);
    }
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    None
}
