//! Mail access: IMAP session handling and report-oriented message parsing.

pub mod imap;
pub mod mailbox;
pub mod message;

pub use mailbox::{Connector, FetchedMessage, ImapConnector, Mailbox};
pub use message::{PdfAttachment, ReportMail};
