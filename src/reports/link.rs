//! Resolving emailed report links to the report PDF.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use tracing::{debug, info};

use crate::error::LinkError;

/// File name used for reports downloaded from a link.
pub const LINKED_REPORT_FILENAME: &str = "thyrocare-report.pdf";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

static ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#)
        .expect("valid anchor regex")
});

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

/// Turns a report link into PDF bytes.
#[async_trait]
pub trait LinkResolver: Send + Sync {
    async fn fetch_report(&self, url: &str) -> Result<Vec<u8>, LinkError>;
}

/// Follows the link over HTTP, clicking through the landing page if needed.
#[derive(Debug, Clone)]
pub struct HttpLinkResolver {
    client: reqwest::Client,
}

impl HttpLinkResolver {
    pub fn new() -> Result<Self, LinkError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| LinkError::Http {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }

    /// GET `url`, returning (final URL, is-PDF, body).
    async fn get(&self, url: &str) -> Result<(Url, bool, Vec<u8>), LinkError> {
        let http_err = |e: reqwest::Error| LinkError::Http {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http_err)?;

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let body = response.bytes().await.map_err(http_err)?.to_vec();

        let is_pdf = content_type.starts_with("application/pdf") || body.starts_with(b"%PDF");
        Ok((final_url, is_pdf, body))
    }
}

#[async_trait]
impl LinkResolver for HttpLinkResolver {
    async fn fetch_report(&self, url: &str) -> Result<Vec<u8>, LinkError> {
        info!(url, "Resolving report link");
        let (landing, is_pdf, body) = self.get(url).await?;
        if is_pdf {
            return Ok(body);
        }

        let html = String::from_utf8_lossy(&body);
        let href = find_download_href(&html).ok_or_else(|| LinkError::NoDownload {
            url: landing.to_string(),
        })?;
        let target = landing.join(&href).map_err(|e| LinkError::Http {
            url: href.clone(),
            reason: e.to_string(),
        })?;
        debug!(target = %target, "Following report download link");

        let (_, is_pdf, body) = self.get(target.as_str()).await?;
        if !is_pdf {
            return Err(LinkError::NoDownload {
                url: target.to_string(),
            });
        }
        info!(bytes = body.len(), "Report downloaded");
        Ok(body)
    }
}

/// The "Download Report" anchor's href, else the first `.pdf` href.
pub fn find_download_href(html: &str) -> Option<String> {
    let mut first_pdf = None;
    for caps in ANCHOR.captures_iter(html) {
        let href = caps[1].trim();
        let label = TAG.replace_all(&caps[2], "");
        let label = label.split_whitespace().collect::<Vec<_>>().join(" ");
        if label.to_lowercase().contains("download report") {
            return Some(href.to_string());
        }
        let path = href.split(['?', '#']).next().unwrap_or("");
        if first_pdf.is_none() && path.to_lowercase().ends_with(".pdf") {
            first_pdf = Some(href.to_string());
        }
    }
    first_pdf
}
