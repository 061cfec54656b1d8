//! Content selection and classification
//!
//! - Picking candidate files by extension
//! - Sniffing staged content with magic bytes
//! - The classifier capability and the built-in skin-tone classifier

pub mod classifier;
pub mod filetype;

pub use classifier::{Classifier, SkinToneClassifier};
pub use filetype::{detect_file_type, CandidateFilter, DEFAULT_EXTENSIONS};
