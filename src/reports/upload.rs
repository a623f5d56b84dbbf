//! Report upload to the booking-services API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tracing::info;

use crate::error::UploadError;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// A report ready for upload.
#[derive(Debug, Clone)]
pub struct ReportUpload {
    pub filename: String,
    pub pdf: Vec<u8>,
    pub patient_name: String,
}

/// Destination for extracted reports.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn upload(&self, report: ReportUpload) -> Result<(), UploadError>;
}

/// Multipart POST of `file` + `patientName` to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct ApiUploader {
    client: reqwest::Client,
    url: String,
}

impl ApiUploader {
    pub fn new(url: impl Into<String>) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .map_err(|e| UploadError::Request(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ReportSink for ApiUploader {
    async fn upload(&self, report: ReportUpload) -> Result<(), UploadError> {
        let file = Part::bytes(report.pdf)
            .file_name(report.filename.clone())
            .mime_str("application/pdf")
            .map_err(|e| UploadError::Request(e.to_string()))?;
        let form = Form::new()
            .part("file", file)
            .text("patientName", report.patient_name.clone());

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Request(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::OK {
            info!(
                file = %report.filename,
                patient = %report.patient_name,
                "Report uploaded"
            );
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(UploadError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
