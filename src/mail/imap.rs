//! Minimal blocking IMAP4rev1 client over rustls.
//!
//! Covers exactly what the fetcher needs: LOGIN, SELECT, UID SEARCH,
//! UID FETCH (RFC822), UID STORE and LOGOUT. Generic over the transport so the
//! protocol handling can be driven by a scripted stream in tests.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use rustls_pki_types::ServerName;
use tracing::{debug, warn};

use crate::error::ImapError;
use crate::mail::mailbox::FetchedMessage;

/// rustls stream used for real servers.
pub type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Socket read/write timeout.
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// One server response, with any `{N}` literals it carried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseLine {
    /// Response text. Literal payloads are left out; their `{N}` markers stay.
    pub text: String,
    pub literals: Vec<Vec<u8>>,
}

/// An IMAP session over any byte stream.
pub struct ImapConnection<S: Read + Write> {
    stream: BufReader<S>,
    next_tag: u32,
}

/// Open a TLS connection to `host:port` and consume the server greeting.
pub fn connect_tls(host: &str, port: u16) -> Result<ImapConnection<TlsStream>, ImapError> {
    let tcp = TcpStream::connect((host, port))?;
    tcp.set_read_timeout(Some(IO_TIMEOUT))?;
    tcp.set_write_timeout(Some(IO_TIMEOUT))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| ImapError::Connection(format!("invalid server name {host}: {e}")))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)?;

    let mut imap = ImapConnection::new(rustls::StreamOwned::new(conn, tcp));
    imap.read_greeting()?;
    Ok(imap)
}

impl<S: Read + Write> ImapConnection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        }
    }

    /// Read the untagged greeting sent on connect.
    pub fn read_greeting(&mut self) -> Result<ResponseLine, ImapError> {
        let line = self.read_response()?;
        let upper = line.text.to_ascii_uppercase();
        if upper.starts_with("* OK") || upper.starts_with("* PREAUTH") {
            Ok(line)
        } else {
            Err(ImapError::Protocol(format!("unexpected greeting: {}", line.text)))
        }
    }

    pub fn login(&mut self, user: &str, password: &str) -> Result<(), ImapError> {
        let cmd = format!("LOGIN {} {}", quote(user), quote(password));
        match self.command(&cmd) {
            Ok(_) => Ok(()),
            Err(ImapError::Command { .. } | ImapError::Bad { .. }) => {
                Err(ImapError::LoginFailed { user: user.into() })
            }
            Err(e) => Err(e),
        }
    }

    pub fn select_inbox(&mut self) -> Result<(), ImapError> {
        self.command("SELECT INBOX").map(|_| ())
    }

    /// `UID SEARCH ALL`, in server order.
    pub fn uid_search_all(&mut self) -> Result<Vec<u32>, ImapError> {
        let lines = self.command("UID SEARCH ALL")?;
        let mut uids = Vec::new();
        for line in &lines {
            let Some(rest) = strip_prefix_ci(&line.text, "* SEARCH") else {
                continue;
            };
            for token in rest.split_whitespace() {
                let uid = token
                    .parse()
                    .map_err(|_| ImapError::Protocol(format!("bad UID in SEARCH: {token}")))?;
                uids.push(uid);
            }
        }
        Ok(uids)
    }

    /// `UID FETCH <set> (RFC822)` for the given UIDs.
    pub fn uid_fetch(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>, ImapError> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let set = uids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let lines = self.command(&format!("UID FETCH {set} (RFC822)"))?;

        let mut messages = Vec::new();
        for line in lines {
            if !line.text.to_ascii_uppercase().contains(" FETCH ") {
                continue;
            }
            let Some(uid) = fetch_uid(&line.text) else {
                warn!(response = %line.text, "FETCH response without UID, skipping");
                continue;
            };
            let Some(raw) = line.literals.into_iter().next() else {
                debug!(uid, "FETCH response without message body");
                continue;
            };
            messages.push(FetchedMessage { uid, raw });
        }
        Ok(messages)
    }

    pub fn uid_mark_seen(&mut self, uid: u32) -> Result<(), ImapError> {
        self.command(&format!("UID STORE {uid} +FLAGS (\\Seen)"))
            .map(|_| ())
    }

    pub fn logout(&mut self) -> Result<(), ImapError> {
        self.command("LOGOUT").map(|_| ())
    }

    /// Send a tagged command and collect untagged responses until its completion.
    fn command(&mut self, cmd: &str) -> Result<Vec<ResponseLine>, ImapError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        stream.flush()?;

        let mut untagged = Vec::new();
        loop {
            let line = self.read_response()?;
            if let Some(rest) = line
                .text
                .strip_prefix(tag.as_str())
                .and_then(|r| r.strip_prefix(' '))
            {
                let status = rest.split_whitespace().next().unwrap_or("");
                if status.eq_ignore_ascii_case("OK") {
                    return Ok(untagged);
                }
                let command = command_name(cmd);
                let response = rest.to_string();
                if status.eq_ignore_ascii_case("BAD") {
                    return Err(ImapError::Bad { command, response });
                }
                return Err(ImapError::Command { command, response });
            }
            untagged.push(line);
        }
    }

    /// Read one logical response, following any literals it announces.
    fn read_response(&mut self) -> Result<ResponseLine, ImapError> {
        let mut response = ResponseLine::default();
        loop {
            let mut raw = Vec::new();
            if self.stream.read_until(b'\n', &mut raw)? == 0 {
                return Err(ImapError::Connection("IMAP connection closed".into()));
            }
            let chunk = String::from_utf8_lossy(&raw);
            let chunk = chunk.trim_end_matches(['\r', '\n']);
            response.text.push_str(chunk);

            match literal_len(chunk) {
                Some(len) => {
                    let mut literal = vec![0u8; len];
                    self.stream.read_exact(&mut literal)?;
                    response.literals.push(literal);
                }
                None => return Ok(response),
            }
        }
    }
}

/// Quote a string as an IMAP quoted-string.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Command name for error messages (never includes arguments such as credentials).
fn command_name(cmd: &str) -> String {
    let mut words = cmd.split_whitespace();
    match words.next() {
        Some(first) if first.eq_ignore_ascii_case("UID") => {
            format!("UID {}", words.next().unwrap_or(""))
        }
        Some(first) => first.to_string(),
        None => String::new(),
    }
}

/// Size of the literal announced at the end of a line (`... {123}`).
fn literal_len(line: &str) -> Option<usize> {
    let inner = line.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].parse().ok()
}

/// UID item inside a FETCH response, wherever it appears.
fn fetch_uid(text: &str) -> Option<u32> {
    let mut tokens = text
        .split(|c: char| c.is_whitespace() || c == '(' || c == ')')
        .filter(|t| !t.is_empty());
    while let Some(token) = tokens.next() {
        if token.eq_ignore_ascii_case("UID") {
            return tokens.next()?.parse().ok();
        }
    }
    None
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &s[prefix.len()..])
}
