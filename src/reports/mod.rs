//! Report handling: name extraction, link resolution and upload.

pub mod link;
pub mod names;
pub mod pdf;
pub mod recognizer;
pub mod upload;

pub use link::{HttpLinkResolver, LinkResolver};
pub use names::NameSource;
pub use pdf::{Extraction, NameExtractor};
pub use recognizer::{PersonRecognizer, RuleRecognizer};
pub use upload::{ApiUploader, ReportSink, ReportUpload};
