//! Report fetcher: polls IMAP inboxes for lab reports, extracts the patient
//! name and uploads each report to the booking-services API.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod launcher;
pub mod mail;
pub mod reports;
pub mod server;
pub mod state;
