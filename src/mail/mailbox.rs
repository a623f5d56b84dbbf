//! Async mailbox seam over the blocking IMAP client.

use async_trait::async_trait;
use secrecy::ExposeSecret;

use crate::config::AccountConfig;
use crate::error::ImapError;
use crate::mail::imap::{self, ImapConnection, TlsStream};

/// A raw message as returned by `UID FETCH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub uid: u32,
    pub raw: Vec<u8>,
}

/// An authenticated session with INBOX selected.
#[async_trait]
pub trait Mailbox: Send {
    /// All UIDs in the selected mailbox.
    async fn search_all(&mut self) -> Result<Vec<u32>, ImapError>;

    /// Fetch full RFC 822 messages for `uids`.
    async fn fetch(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>, ImapError>;

    /// Set `\Seen` on a message.
    async fn mark_seen(&mut self, uid: u32) -> Result<(), ImapError>;

    async fn logout(&mut self) -> Result<(), ImapError>;
}

/// Opens mailbox sessions for accounts.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, account: &AccountConfig) -> Result<Box<dyn Mailbox>, ImapError>;
}

/// Connector for real IMAP-over-TLS servers.
#[derive(Debug, Default, Clone)]
pub struct ImapConnector;

#[async_trait]
impl Connector for ImapConnector {
    async fn connect(&self, account: &AccountConfig) -> Result<Box<dyn Mailbox>, ImapError> {
        let host = account.imap_server.clone();
        let port = account.imap_port;
        let user = account.email.clone();
        let password = account.password.clone();

        let conn = tokio::task::spawn_blocking(move || {
            let mut conn = imap::connect_tls(&host, port)?;
            conn.login(&user, password.expose_secret())?;
            conn.select_inbox()?;
            Ok::<_, ImapError>(conn)
        })
        .await
        .map_err(|e| ImapError::Connection(format!("IMAP connect task panicked: {e}")))??;

        Ok(Box::new(ImapMailbox { conn: Some(conn) }))
    }
}

/// `Mailbox` backed by a TLS IMAP session; each call runs on the blocking pool.
pub struct ImapMailbox {
    conn: Option<ImapConnection<TlsStream>>,
}

impl ImapMailbox {
    async fn with_conn<T, F>(&mut self, op: F) -> Result<T, ImapError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapConnection<TlsStream>) -> Result<T, ImapError> + Send + 'static,
    {
        let mut conn = self
            .conn
            .take()
            .ok_or_else(|| ImapError::Connection("IMAP session already closed".into()))?;

        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut conn);
            (conn, result)
        })
        .await
        .map_err(|e| ImapError::Connection(format!("IMAP task panicked: {e}")))?;

        // A broken transport is not worth keeping around.
        if !matches!(result, Err(ImapError::Connection(_))) {
            self.conn = Some(conn);
        }
        result
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn search_all(&mut self) -> Result<Vec<u32>, ImapError> {
        self.with_conn(|c| c.uid_search_all()).await
    }

    async fn fetch(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>, ImapError> {
        let uids = uids.to_vec();
        self.with_conn(move |c| c.uid_fetch(&uids)).await
    }

    async fn mark_seen(&mut self, uid: u32) -> Result<(), ImapError> {
        self.with_conn(move |c| c.uid_mark_seen(uid)).await
    }

    async fn logout(&mut self) -> Result<(), ImapError> {
        let result = self.with_conn(|c| c.logout()).await;
        self.conn = None;
        result
    }
}
