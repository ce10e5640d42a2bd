//! Document pipeline: chunking plus the service tying the stages together.

pub mod chunking;
mod service;
pub mod types;

pub use service::{DocumentApi, DocumentService};
pub use types::{ServiceError, UploadOutcome};
