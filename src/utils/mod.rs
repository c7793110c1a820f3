// file: src/utils/mod.rs
// description: utility functions module exports
// reference: internal module structure

pub mod files;
pub mod logging;
pub mod slug;
pub mod validation;

pub use files::CleanupReport;
pub use slug::{normalize_unicode_name, slugify};
pub use validation::Validator;
