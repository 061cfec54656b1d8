//! Classifier capability and the skin-tone classifier
//!
//! A classifier takes a staged file and a threshold in `[0.0, 1.0]` and
//! returns a verdict, or an error when it could not reach one. Errors are
//! never a negative verdict. Classifiers are called from blocking tasks, so
//! they may be CPU-bound and must be safe to call concurrently.

use crate::content::filetype::{detect_file_type, is_image};
use crate::error::{ClassifierError, ClassifierResult};
use std::path::Path;

/// Verdict capability used by the file processor
pub trait Classifier: Send + Sync + 'static {
    /// Classify the staged file at `path`; `true` is a positive verdict
    fn classify(&self, path: &Path, threshold: f32) -> ClassifierResult<bool>;

    /// Short name for logs and the report header
    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> Classifier for F
where
    F: Fn(&Path, f32) -> ClassifierResult<bool> + Send + Sync + 'static,
{
    fn classify(&self, path: &Path, threshold: f32) -> ClassifierResult<bool> {
        self(path, threshold)
    }
}

/// Check a threshold before it reaches a classifier
pub fn validate_threshold(threshold: f32) -> ClassifierResult<f32> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(ClassifierError::InvalidThreshold(threshold))
    }
}

/// Flags images whose share of skin-toned pixels reaches the threshold
///
/// Pixels are converted to YCrCb; a pixel counts as skin when
/// `140 <= Cr <= 175` and `100 <= Cb <= 135`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkinToneClassifier;

impl SkinToneClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Fraction of skin-toned pixels in the image at `path`
    pub fn skin_ratio(&self, path: &Path) -> ClassifierResult<f32> {
        let bytes = std::fs::read(path).map_err(|e| ClassifierError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        if !is_image(&bytes) {
            return Err(ClassifierError::UnsupportedFormat {
                path: path.to_path_buf(),
                detected: detect_file_type(&bytes).unwrap_or_else(|| "unknown".to_string()),
            });
        }

        let image = image::load_from_memory(&bytes).map_err(|e| ClassifierError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let rgb = image.to_rgb8();

        let total = u64::from(rgb.width()) * u64::from(rgb.height());
        if total == 0 {
            return Err(ClassifierError::EmptyImage {
                path: path.to_path_buf(),
            });
        }

        let skin = rgb.pixels().filter(|p| is_skin_pixel(p.0)).count() as u64;
        Ok(skin as f32 / total as f32)
    }
}

impl Classifier for SkinToneClassifier {
    fn classify(&self, path: &Path, threshold: f32) -> ClassifierResult<bool> {
        let threshold = validate_threshold(threshold)?;
        Ok(self.skin_ratio(path)? >= threshold)
    }

    fn name(&self) -> &str {
        "skin-tone"
    }
}

/// Convert an RGB pixel to its (Cr, Cb) chroma pair, saturated to `u8`
pub fn rgb_to_crcb([r, g, b]: [u8; 3]) -> (u8, u8) {
    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cr = (r - y) * 0.713 + 128.0;
    let cb = (b - y) * 0.564 + 128.0;
    (saturate(cr), saturate(cb))
}

fn saturate(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Check if an RGB pixel falls in the skin-tone chroma range
pub fn is_skin_pixel(rgb: [u8; 3]) -> bool {
    let (cr, cb) = rgb_to_crcb(rgb);
    (140..=175).contains(&cr) && (100..=135).contains(&cb)
}
