//! Mail fetcher: polls accounts and uploads the reports it finds.

pub mod account;
pub mod cycle;

pub use account::{AccountReport, ReportPipeline, RunLimits, process_account};
pub use cycle::Fetcher;
