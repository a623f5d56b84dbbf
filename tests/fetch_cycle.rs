//! End-to-end fetch cycles against in-memory mailboxes.
//!
//! The IMAP transport, link resolver and upload API are replaced with fakes;
//! everything in between (parsing, dedup, extraction, batching, state) is real.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use report_fetcher::config::{AccountConfig, FetcherConfig};
use report_fetcher::error::{ImapError, LinkError, UploadError};
use report_fetcher::fetcher::{Fetcher, ReportPipeline};
use report_fetcher::mail::{Connector, FetchedMessage, Mailbox};
use report_fetcher::reports::{
    LinkResolver, NameExtractor, ReportSink, ReportUpload, RuleRecognizer,
};
use report_fetcher::state::ProcessedStore;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// One-page report with a text layer naming "Ravi Kumar". Plain ASCII.
const TEXT_LAYER_PDF: &[u8] = include_bytes!("fixtures/ravi_kumar_report.pdf");

// ── Fakes ───────────────────────────────────────────────────────────

#[derive(Default)]
struct MailboxState {
    messages: BTreeMap<u32, Vec<u8>>,
    seen: Vec<u32>,
    fetch_calls: Vec<Vec<u32>>,
    /// Errors returned by the Nth fetch call (0-based).
    fetch_failures: HashMap<usize, ImapError>,
    logged_out: bool,
}

type SharedMailbox = Arc<Mutex<MailboxState>>;

struct FakeMailbox(SharedMailbox);

#[async_trait]
impl Mailbox for FakeMailbox {
    async fn search_all(&mut self) -> Result<Vec<u32>, ImapError> {
        Ok(self.0.lock().unwrap().messages.keys().copied().collect())
    }

    async fn fetch(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>, ImapError> {
        let mut state = self.0.lock().unwrap();
        let call = state.fetch_calls.len();
        state.fetch_calls.push(uids.to_vec());
        if let Some(e) = state.fetch_failures.remove(&call) {
            return Err(e);
        }
        Ok(uids
            .iter()
            .filter_map(|uid| {
                state.messages.get(uid).map(|raw| FetchedMessage {
                    uid: *uid,
                    raw: raw.clone(),
                })
            })
            .collect())
    }

    async fn mark_seen(&mut self, uid: u32) -> Result<(), ImapError> {
        self.0.lock().unwrap().seen.push(uid);
        Ok(())
    }

    async fn logout(&mut self) -> Result<(), ImapError> {
        self.0.lock().unwrap().logged_out = true;
        Ok(())
    }
}

#[derive(Default)]
struct FakeConnector {
    mailboxes: HashMap<String, SharedMailbox>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, account: &AccountConfig) -> Result<Box<dyn Mailbox>, ImapError> {
        match self.mailboxes.get(&account.email) {
            Some(state) => Ok(Box::new(FakeMailbox(Arc::clone(state)))),
            None => Err(ImapError::LoginFailed {
                user: account.email.clone(),
            }),
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    uploads: Mutex<Vec<(String, String)>>,
    reject: bool,
}

#[async_trait]
impl ReportSink for RecordingSink {
    async fn upload(&self, report: ReportUpload) -> Result<(), UploadError> {
        self.uploads
            .lock()
            .unwrap()
            .push((report.filename, report.patient_name));
        if self.reject {
            return Err(UploadError::Rejected {
                status: 500,
                body: "boom".into(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct StubResolver {
    requested: Mutex<Vec<String>>,
}

#[async_trait]
impl LinkResolver for StubResolver {
    async fn fetch_report(&self, url: &str) -> Result<Vec<u8>, LinkError> {
        self.requested.lock().unwrap().push(url.to_string());
        Ok(TEXT_LAYER_PDF.to_vec())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn pdf_mail(message_id: &str, filename: &str) -> Vec<u8> {
    format!(
        "From: AG Diagnostics <reports@agdiag.example>\r\n\
Subject: Report {message_id}\r\n\
Message-ID: <{message_id}>\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"B\"\r\n\
\r\n\
--B\r\n\
Content-Type: text/plain\r\n\
\r\n\
Report attached.\r\n\
--B\r\n\
Content-Type: application/pdf; name=\"{filename}\"\r\n\
Content-Disposition: attachment; filename=\"{filename}\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQ=\r\n\
--B--\r\n"
    )
    .into_bytes()
}

/// A report attached unencoded, under a file name the AG rule does not cover.
fn text_pdf_mail(message_id: &str, filename: &str) -> Vec<u8> {
    let mut raw = format!(
        "From: Sunrise Diagnostics <results@sunrise.example>\r\n\
Subject: Report {message_id}\r\n\
Message-ID: <{message_id}>\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"B\"\r\n\
\r\n\
--B\r\n\
Content-Type: application/pdf; name=\"{filename}\"\r\n\
Content-Disposition: attachment; filename=\"{filename}\"\r\n\
Content-Transfer-Encoding: 7bit\r\n\
\r\n"
    )
    .into_bytes();
    raw.extend_from_slice(TEXT_LAYER_PDF);
    raw.extend_from_slice(b"\r\n--B--\r\n");
    raw
}

fn link_mail(message_id: &str) -> Vec<u8> {
    format!(
        "From: noreply@thyrocare.example\r\n\
Subject: Your report is ready\r\n\
Message-ID: <{message_id}>\r\n\
Content-Type: text/plain\r\n\
\r\n\
Download it at https://thyro.care/n/o/0XTN0v today.\r\n"
    )
    .into_bytes()
}

fn config(state_file: &std::path::Path, emails: &[&str], max: usize, batch: usize) -> FetcherConfig {
    let accounts: Vec<serde_json::Value> = emails
        .iter()
        .map(|e| serde_json::json!({"email": e, "password": "pw", "imap_server": "imap.test"}))
        .collect();
    FetcherConfig::from_json_str(
        &serde_json::json!({
            "upload_url": "http://upload.test/upload-report",
            "state_file": state_file,
            "max_emails_per_run": max,
            "batch_size": batch,
            "batch_pause_ms": 0,
            "accounts": accounts,
        })
        .to_string(),
    )
    .unwrap()
}

struct Harness {
    fetcher: Fetcher,
    sink: Arc<RecordingSink>,
    resolver: Arc<StubResolver>,
}

fn harness(
    config: FetcherConfig,
    connector: FakeConnector,
    sink: RecordingSink,
    processed: ProcessedStore,
) -> Harness {
    let sink = Arc::new(sink);
    let resolver = Arc::new(StubResolver::default());
    let pipeline = ReportPipeline {
        extractor: NameExtractor::new(Arc::new(RuleRecognizer::new())),
        resolver: resolver.clone(),
        sink: sink.clone(),
    };
    Harness {
        fetcher: Fetcher::new(config, Arc::new(connector), pipeline, processed),
        sink,
        resolver,
    }
}

fn mailbox(messages: &[(u32, Vec<u8>)]) -> SharedMailbox {
    Arc::new(Mutex::new(MailboxState {
        messages: messages.iter().cloned().collect(),
        ..Default::default()
    }))
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn uploads_attachments_marks_seen_and_saves_state() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");

    let inbox = mailbox(&[
        (10, pdf_mail("a@lab", "125090547_ASHA_RAO_WL.pdf")),
        (11, pdf_mail("b@lab", "125090548_NEEL_SEN_WL.pdf")),
    ]);
    let mut connector = FakeConnector::default();
    connector.mailboxes.insert("lab@test".into(), inbox.clone());

    let h = harness(
        config(&state_file, &["lab@test"], 50, 20),
        connector,
        RecordingSink::default(),
        ProcessedStore::empty(&state_file),
    );

    let reports = timeout(TEST_TIMEOUT, h.fetcher.run_cycle()).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].processed, 2);
    assert_eq!(reports[0].uploaded, 2);
    assert!(!reports[0].aborted);

    let uploads = h.sink.uploads.lock().unwrap().clone();
    assert_eq!(
        uploads,
        vec![
            ("125090548_NEEL_SEN_WL.pdf".to_string(), "Neel Sen".to_string()),
            ("125090547_ASHA_RAO_WL.pdf".to_string(), "Asha Rao".to_string()),
        ]
    );

    let state = inbox.lock().unwrap();
    assert_eq!(state.seen, vec![11, 10]);
    assert!(state.logged_out);

    let saved: Vec<String> =
        serde_json::from_str(&std::fs::read_to_string(&state_file).unwrap()).unwrap();
    assert_eq!(saved, vec!["<a@lab>", "<b@lab>"]);
}

#[tokio::test]
async fn already_processed_messages_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    let processed = ProcessedStore::empty(&state_file);
    processed.insert("<old@lab>").await;

    let inbox = mailbox(&[
        (1, pdf_mail("old@lab", "1_OLD_PERSON_WL.pdf")),
        (2, pdf_mail("new@lab", "2_NEW_PERSON_WL.pdf")),
    ]);
    let mut connector = FakeConnector::default();
    connector.mailboxes.insert("lab@test".into(), inbox.clone());

    let h = harness(
        config(&state_file, &["lab@test"], 50, 20),
        connector,
        RecordingSink::default(),
        processed,
    );
    let reports = timeout(TEST_TIMEOUT, h.fetcher.run_cycle()).await.unwrap();

    assert_eq!(reports[0].skipped, 1);
    assert_eq!(reports[0].processed, 1);
    assert_eq!(h.sink.uploads.lock().unwrap().len(), 1);
    assert_eq!(inbox.lock().unwrap().seen, vec![2]);

    // A second cycle finds nothing new.
    let again = timeout(TEST_TIMEOUT, h.fetcher.run_cycle()).await.unwrap();
    assert_eq!(again[0].skipped, 2);
    assert_eq!(h.sink.uploads.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn newest_first_capped_and_batched() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");

    let messages: Vec<(u32, Vec<u8>)> = (1..=5)
        .map(|uid| (uid, pdf_mail(&format!("m{uid}@lab"), &format!("{uid}_PAT_NAME_WL.pdf"))))
        .collect();
    let inbox = mailbox(&messages);
    let mut connector = FakeConnector::default();
    connector.mailboxes.insert("lab@test".into(), inbox.clone());

    let h = harness(
        config(&state_file, &["lab@test"], 3, 2),
        connector,
        RecordingSink::default(),
        ProcessedStore::empty(&state_file),
    );
    timeout(TEST_TIMEOUT, h.fetcher.run_cycle()).await.unwrap();

    let state = inbox.lock().unwrap();
    assert_eq!(state.fetch_calls, vec![vec![5, 4], vec![3]]);
    assert_eq!(state.seen, vec![5, 4, 3]);
}

#[tokio::test]
async fn connection_error_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");

    let messages: Vec<(u32, Vec<u8>)> = (1..=4)
        .map(|uid| (uid, pdf_mail(&format!("m{uid}@lab"), &format!("{uid}_PAT_NAME_WL.pdf"))))
        .collect();
    let inbox = mailbox(&messages);
    inbox
        .lock()
        .unwrap()
        .fetch_failures
        .insert(1, ImapError::Connection("socket reset".into()));
    let mut connector = FakeConnector::default();
    connector.mailboxes.insert("lab@test".into(), inbox.clone());

    let h = harness(
        config(&state_file, &["lab@test"], 50, 2),
        connector,
        RecordingSink::default(),
        ProcessedStore::empty(&state_file),
    );
    let reports = timeout(TEST_TIMEOUT, h.fetcher.run_cycle()).await.unwrap();

    assert!(reports[0].aborted);
    assert_eq!(reports[0].processed, 2);
    assert_eq!(inbox.lock().unwrap().seen, vec![4, 3]);
    assert!(!h.fetcher.processed().contains("<m2@lab>").await);
    assert!(h.fetcher.processed().contains("<m4@lab>").await);
}

fn numbered_inbox(count: u32) -> SharedMailbox {
    let messages: Vec<(u32, Vec<u8>)> = (1..=count)
        .map(|uid| (uid, pdf_mail(&format!("m{uid}@lab"), &format!("{uid}_PAT_NAME_WL.pdf"))))
        .collect();
    mailbox(&messages)
}

#[tokio::test]
async fn bad_reply_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");

    let inbox = numbered_inbox(4);
    inbox.lock().unwrap().fetch_failures.insert(
        0,
        ImapError::Bad {
            command: "UID FETCH".into(),
            response: "BAD Invalid sequence set".into(),
        },
    );
    let mut connector = FakeConnector::default();
    connector.mailboxes.insert("lab@test".into(), inbox.clone());

    let h = harness(
        config(&state_file, &["lab@test"], 50, 2),
        connector,
        RecordingSink::default(),
        ProcessedStore::empty(&state_file),
    );
    let reports = timeout(TEST_TIMEOUT, h.fetcher.run_cycle()).await.unwrap();

    assert!(reports[0].aborted);
    assert_eq!(reports[0].processed, 0);
    assert_eq!(inbox.lock().unwrap().fetch_calls.len(), 1);
}

#[tokio::test]
async fn no_reply_skips_only_that_batch() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");

    let inbox = numbered_inbox(4);
    inbox.lock().unwrap().fetch_failures.insert(
        0,
        ImapError::Command {
            command: "UID FETCH".into(),
            response: "NO [TRYLATER] busy".into(),
        },
    );
    let mut connector = FakeConnector::default();
    connector.mailboxes.insert("lab@test".into(), inbox.clone());

    let h = harness(
        config(&state_file, &["lab@test"], 50, 2),
        connector,
        RecordingSink::default(),
        ProcessedStore::empty(&state_file),
    );
    let reports = timeout(TEST_TIMEOUT, h.fetcher.run_cycle()).await.unwrap();

    assert!(!reports[0].aborted);
    assert_eq!(reports[0].processed, 2);
    assert_eq!(inbox.lock().unwrap().seen, vec![2, 1]);
}

#[tokio::test]
async fn name_read_from_pdf_text_for_other_labs() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");

    let inbox = mailbox(&[(21, text_pdf_mail("sun-1@lab", "Report_0042.pdf"))]);
    let mut connector = FakeConnector::default();
    connector.mailboxes.insert("lab@test".into(), inbox.clone());

    let h = harness(
        config(&state_file, &["lab@test"], 50, 20),
        connector,
        RecordingSink::default(),
        ProcessedStore::empty(&state_file),
    );
    let reports = timeout(TEST_TIMEOUT, h.fetcher.run_cycle()).await.unwrap();

    assert_eq!(reports[0].uploaded, 1);
    assert_eq!(
        h.sink.uploads.lock().unwrap().clone(),
        vec![("Report_0042.pdf".to_string(), "Ravi Kumar".to_string())]
    );
    assert_eq!(inbox.lock().unwrap().seen, vec![21]);
}

#[tokio::test]
async fn report_link_used_when_no_attachment() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");

    let inbox = mailbox(&[(7, link_mail("t1@thyrocare"))]);
    let mut connector = FakeConnector::default();
    connector.mailboxes.insert("lab@test".into(), inbox.clone());

    let h = harness(
        config(&state_file, &["lab@test"], 50, 20),
        connector,
        RecordingSink::default(),
        ProcessedStore::empty(&state_file),
    );
    timeout(TEST_TIMEOUT, h.fetcher.run_cycle()).await.unwrap();

    assert_eq!(
        h.resolver.requested.lock().unwrap().clone(),
        vec!["https://thyro.care/n/o/0XTN0v"]
    );
    let uploads = h.sink.uploads.lock().unwrap().clone();
    assert_eq!(
        uploads,
        vec![("thyrocare-report.pdf".to_string(), "Ravi Kumar".to_string())]
    );
    assert_eq!(inbox.lock().unwrap().seen, vec![7]);
}

#[tokio::test]
async fn attachments_take_precedence_over_links() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");

    let mut raw = String::from_utf8(pdf_mail("both@lab", "9_RINA_DAS_WL.pdf")).unwrap();
    raw = raw.replace("Report attached.", "Also at https://thyro.care/n/o/XYZ");
    let inbox = mailbox(&[(3, raw.into_bytes())]);
    let mut connector = FakeConnector::default();
    connector.mailboxes.insert("lab@test".into(), inbox);

    let h = harness(
        config(&state_file, &["lab@test"], 50, 20),
        connector,
        RecordingSink::default(),
        ProcessedStore::empty(&state_file),
    );
    timeout(TEST_TIMEOUT, h.fetcher.run_cycle()).await.unwrap();

    assert!(h.resolver.requested.lock().unwrap().is_empty());
    assert_eq!(h.sink.uploads.lock().unwrap()[0].1, "Rina Das");
}

#[tokio::test]
async fn failed_login_does_not_stop_other_accounts() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");

    let inbox = mailbox(&[(1, pdf_mail("ok@lab", "1_GOOD_ACCOUNT_WL.pdf"))]);
    let mut connector = FakeConnector::default();
    connector.mailboxes.insert("good@test".into(), inbox);

    let h = harness(
        config(&state_file, &["bad@test", "good@test"], 50, 20),
        connector,
        RecordingSink::default(),
        ProcessedStore::empty(&state_file),
    );
    let reports = timeout(TEST_TIMEOUT, h.fetcher.run_cycle()).await.unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports.iter().filter(|r| r.aborted).count(), 1);
    assert_eq!(h.sink.uploads.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn rejected_upload_still_marks_message_handled() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");

    let inbox = mailbox(&[(5, pdf_mail("r@lab", "5_REJECTED_UPLOAD_WL.pdf"))]);
    let mut connector = FakeConnector::default();
    connector.mailboxes.insert("lab@test".into(), inbox.clone());

    let h = harness(
        config(&state_file, &["lab@test"], 50, 20),
        connector,
        RecordingSink {
            reject: true,
            ..Default::default()
        },
        ProcessedStore::empty(&state_file),
    );
    let reports = timeout(TEST_TIMEOUT, h.fetcher.run_cycle()).await.unwrap();

    assert_eq!(reports[0].upload_failures, 1);
    assert_eq!(reports[0].uploaded, 0);
    assert_eq!(inbox.lock().unwrap().seen, vec![5]);
    assert!(h.fetcher.processed().contains("<r@lab>").await);
}

#[tokio::test]
async fn run_forever_saves_state_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");

    let inbox = mailbox(&[(1, pdf_mail("s@lab", "1_SHUT_DOWN_WL.pdf"))]);
    let mut connector = FakeConnector::default();
    connector.mailboxes.insert("lab@test".into(), inbox);

    let h = harness(
        config(&state_file, &["lab@test"], 50, 20),
        connector,
        RecordingSink::default(),
        ProcessedStore::empty(&state_file),
    );

    let store = h.fetcher.processed().clone();
    let shutdown = async move {
        while !store.contains("<s@lab>").await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    timeout(TEST_TIMEOUT, h.fetcher.run_forever(shutdown))
        .await
        .unwrap();

    let reloaded = ProcessedStore::load(&state_file).await.unwrap();
    assert!(reloaded.contains("<s@lab>").await);
}
