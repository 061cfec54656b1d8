//! Candidate selection and file type detection
//!
//! Candidates are picked by name: the extension of the base name is matched
//! case-insensitively against an allow-list, so nothing is fetched just to
//! decide whether it is worth fetching. Once a file is staged, its content
//! type is sniffed from magic bytes with the `infer` crate.

use crate::error::ConfigError;
use crate::transport::types::remote_base_name;

/// Extensions recognized when none are configured
pub const DEFAULT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp"];

/// Allow-list of file name extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFilter {
    /// Lowercase, without the leading dot
    extensions: Vec<String>,
}

impl Default for CandidateFilter {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl CandidateFilter {
    /// Build a filter from user-supplied extensions (`jpg`, `.JPG` and `Jpg` are equivalent)
    pub fn new<I, S>(extensions: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for ext in extensions {
            let raw = ext.as_ref();
            let trimmed = raw.trim().trim_start_matches('.');
            if trimmed.is_empty() || trimmed.contains('/') || trimmed.contains('.') {
                return Err(ConfigError::InvalidExtension {
                    ext: raw.to_string(),
                });
            }
            let lower = trimmed.to_ascii_lowercase();
            if !normalized.contains(&lower) {
                normalized.push(lower);
            }
        }

        if normalized.is_empty() {
            return Ok(Self::default());
        }
        Ok(Self {
            extensions: normalized,
        })
    }

    /// Recognized extensions (lowercase, no dot)
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Check if a remote path or name carries a recognized extension
    pub fn is_candidate(&self, path: &str) -> bool {
        let name = remote_base_name(path);
        match name.rsplit_once('.') {
            Some((_, ext)) => self
                .extensions
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }
}

/// Detect the MIME type of a file from its header bytes
///
/// # Example
///
/// ```
/// use remote_sweep::content::filetype::detect_file_type;
///
/// let png_header = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
/// assert_eq!(detect_file_type(png_header), Some("image/png".to_string()));
///
/// assert_eq!(detect_file_type(&[0x00, 0x01, 0x02, 0x03]), None);
/// ```
pub fn detect_file_type(header: &[u8]) -> Option<String> {
    infer::get(header).map(|kind| kind.mime_type().to_string())
}

/// Check if the content is an image file
pub fn is_image(header: &[u8]) -> bool {
    infer::is_image(header)
}
