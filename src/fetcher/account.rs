//! One polling run over a single IMAP account.
//!
//! 1. Connect, log in, select INBOX
//! 2. `UID SEARCH ALL`, newest first, capped at `max_emails_per_run`
//! 3. Fetch in batches; per message: PDF attachments, else report link
//! 4. Upload each report, mark the message \Seen, record its Message-ID
//!
//! Connection errors and BAD replies end the run for this account; anything
//! else (including NO replies) is logged and the next message is handled.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::{AccountConfig, FetcherConfig};
use crate::error::ImapError;
use crate::mail::{Connector, FetchedMessage, Mailbox, ReportMail};
use crate::reports::link::LINKED_REPORT_FILENAME;
use crate::reports::{LinkResolver, NameExtractor, ReportSink, ReportUpload};
use crate::state::ProcessedStore;

/// Extraction, link resolution and upload, shared by all accounts.
#[derive(Clone)]
pub struct ReportPipeline {
    pub extractor: NameExtractor,
    pub resolver: Arc<dyn LinkResolver>,
    pub sink: Arc<dyn ReportSink>,
}

/// Per-run limits taken from the fetcher config.
#[derive(Debug, Clone)]
pub struct RunLimits {
    pub max_emails: usize,
    pub batch_size: usize,
    pub batch_pause: Duration,
}

impl From<&FetcherConfig> for RunLimits {
    fn from(config: &FetcherConfig) -> Self {
        Self {
            max_emails: config.max_emails_per_run,
            batch_size: config.batch_size.max(1),
            batch_pause: config.batch_pause(),
        }
    }
}

/// Counters for one account run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AccountReport {
    /// Messages fetched and looked at.
    pub checked: usize,
    /// Messages handled and recorded in this run.
    pub processed: usize,
    /// Messages skipped because they were already recorded.
    pub skipped: usize,
    pub uploaded: usize,
    pub upload_failures: usize,
    /// The run ended early on a connection or login failure.
    pub aborted: bool,
}

/// Process one account end to end. Never fails; problems are logged.
#[tracing::instrument(skip_all, fields(account = %account.display_name()))]
pub async fn process_account(
    account: &AccountConfig,
    connector: &dyn Connector,
    pipeline: &ReportPipeline,
    processed: &ProcessedStore,
    limits: &RunLimits,
) -> AccountReport {
    let mut report = AccountReport::default();

    info!("Connecting to {} ...", account.imap_server);
    let mut mailbox = match connector.connect(account).await {
        Ok(mailbox) => mailbox,
        Err(e) => {
            error!("IMAP login failed: {e}");
            report.aborted = true;
            return report;
        }
    };

    run_mailbox(mailbox.as_mut(), pipeline, processed, limits, &mut report).await;

    match mailbox.logout().await {
        Ok(()) => info!("Connection closed."),
        Err(e) => info!("Logout failed (connection likely already closed): {e}"),
    }

    report
}

async fn run_mailbox(
    mailbox: &mut dyn Mailbox,
    pipeline: &ReportPipeline,
    processed: &ProcessedStore,
    limits: &RunLimits,
    report: &mut AccountReport,
) {
    let mut uids = match mailbox.search_all().await {
        Ok(uids) => uids,
        Err(e) => {
            error!("UID search failed: {e}");
            report.aborted = e.ends_run();
            return;
        }
    };

    uids.sort_unstable_by(|a, b| b.cmp(a));
    uids.truncate(limits.max_emails);

    if uids.is_empty() {
        info!("No emails found to process.");
        return;
    }
    info!("Found {} emails to check.", uids.len());

    let total_batches = uids.len().div_ceil(limits.batch_size);
    for (index, batch) in uids.chunks(limits.batch_size).enumerate() {
        info!(
            "Fetching batch {}/{} (UIDs {}...{})",
            index + 1,
            total_batches,
            batch[0],
            batch[batch.len() - 1]
        );

        let messages = match mailbox.fetch(batch).await {
            Ok(messages) => messages,
            Err(e) if e.ends_run() => {
                error!("Connection error on batch fetch: {e}. Aborting this run.");
                report.aborted = true;
                return;
            }
            Err(e) => {
                error!("Failed to fetch batch: {e}");
                continue;
            }
        };

        for message in messages {
            report.checked += 1;
            let uid = message.uid;
            if let Err(e) = handle_message(mailbox, message, pipeline, processed, report).await {
                error!("Connection error storing/processing UID {uid}: {e}. Aborting this run.");
                report.aborted = true;
                return;
            }
        }

        if index + 1 < total_batches && !limits.batch_pause.is_zero() {
            tokio::time::sleep(limits.batch_pause).await;
        }
    }
}

/// Handle one fetched message. Only errors that end the run are returned.
async fn handle_message(
    mailbox: &mut dyn Mailbox,
    message: FetchedMessage,
    pipeline: &ReportPipeline,
    processed: &ProcessedStore,
    report: &mut AccountReport,
) -> Result<(), ImapError> {
    let uid = message.uid;

    let message_id = match ReportMail::parse(uid, &message.raw) {
        Some(mail) => {
            if processed.contains(&mail.message_id).await {
                report.skipped += 1;
                return Ok(());
            }
            info!(
                "Processing UID {uid}, From: {}, Subject: {}",
                mail.from, mail.subject
            );
            handle_reports(&mail, pipeline, report).await;
            mail.message_id
        }
        None => {
            warn!(uid, "Message could not be parsed, marking as handled");
            let id = uid.to_string();
            if processed.contains(&id).await {
                report.skipped += 1;
                return Ok(());
            }
            id
        }
    };

    match mailbox.mark_seen(uid).await {
        Ok(()) => {}
        Err(e) if e.ends_run() => return Err(e),
        Err(e) => warn!(uid, "Failed to mark message as seen: {e}"),
    }
    processed.insert(message_id).await;
    report.processed += 1;
    Ok(())
}

/// PDF attachments first; a report link only when there are none.
async fn handle_reports(mail: &ReportMail, pipeline: &ReportPipeline, report: &mut AccountReport) {
    if !mail.pdf_attachments.is_empty() {
        for attachment in &mail.pdf_attachments {
            upload_pdf(
                pipeline,
                attachment.bytes.clone(),
                &attachment.filename,
                report,
            )
            .await;
        }
        return;
    }

    let Some(link) = mail.report_link() else {
        return;
    };
    info!("[THYROCARE] Detected report link: {link}");
    match pipeline.resolver.fetch_report(link).await {
        Ok(pdf) => upload_pdf(pipeline, pdf, LINKED_REPORT_FILENAME, report).await,
        Err(e) => error!("[THYROCARE] Error processing report link: {e}"),
    }
}

async fn upload_pdf(
    pipeline: &ReportPipeline,
    pdf: Vec<u8>,
    filename: &str,
    report: &mut AccountReport,
) {
    let extraction = match pipeline
        .extractor
        .extract_blocking(pdf.clone(), filename.to_string())
        .await
    {
        Ok(extraction) => extraction,
        Err(e) => {
            error!("Error processing attachment {filename}: {e}");
            return;
        }
    };
    info!(
        "Attachment '{filename}' -> extracted: '{}' (source: {})",
        extraction.patient_name,
        extraction.source.label()
    );

    let upload = ReportUpload {
        filename: filename.to_string(),
        pdf,
        patient_name: extraction.patient_name,
    };
    match pipeline.sink.upload(upload).await {
        Ok(()) => report.uploaded += 1,
        Err(e) => {
            error!("[UPLOAD] Failed for {filename}: {e}");
            report.upload_failures += 1;
        }
    }
}
