use crate::error::{Error, Result};
use chrono::NaiveDate;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveConfig {
    pub base_url: String,
    pub token: String,
    pub tags: Vec<String>,
    pub correspondent: Option<String>,
    pub document_type: Option<String>,
}

/// Per-document fields of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveDocument {
    pub title: String,
    pub created: NaiveDate,
    pub filename: String,
}

/// Uploads statements to a paperless-ngx compatible document endpoint.
pub struct Archiver {
    config: ArchiveConfig,
    http: Client,
}
impl Archiver {
    pub fn new(config: ArchiveConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .map_err(|e| Error::Archive(format!("http client: {e}")))?;
        Ok(Self { config, http })
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/api/documents/post_document/",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// Uploads with the tags, correspondent and document type from the
    /// configuration.
    pub async fn upload_statement(&self, pdf: Vec<u8>, doc: &ArchiveDocument) -> Result<()> {
        self.upload(
            pdf,
            doc,
            &self.config.tags,
            self.config.correspondent.as_deref(),
            self.config.document_type.as_deref(),
        )
        .await
    }

    pub async fn upload(
        &self,
        pdf: Vec<u8>,
        doc: &ArchiveDocument,
        tags: &[String],
        correspondent: Option<&str>,
        document_type: Option<&str>,
    ) -> Result<()> {
        let document = Part::bytes(pdf)
            .file_name(doc.filename.clone())
            .mime_str("application/pdf")
            .map_err(|e| Error::Archive(e.to_string()))?;
        let mut form = Form::new()
            .part("document", document)
            .text("title", doc.title.clone())
            .text("created", doc.created.format("%Y-%m-%d").to_string());
        for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            form = form.text("tags", tag.to_string());
        }
        if let Some(c) = correspondent.filter(|c| !c.is_empty()) {
            form = form.text("correspondent", c.to_string());
        }
        if let Some(t) = document_type.filter(|t| !t.is_empty()) {
            form = form.text("document_type", t.to_string());
        }

        let endpoint = self.endpoint();
        let resp = self
            .http
            .post(&endpoint)
            .header("Authorization", format!("Token {}", self.config.token))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Archive(format!("request to {endpoint} failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            info!(status = status.as_u16(), title = %doc.title, "statement archived");
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("detail")
                    .or_else(|| v.get("error"))
                    .and_then(|d| d.as_str().map(str::to_string))
                    .or_else(|| Some(v.to_string()))
            })
            .unwrap_or_else(|| {
                if body.is_empty() {
                    "no response body".into()
                } else {
                    body.chars().take(1000).collect()
                }
            });
        warn!(status = status.as_u16(), %endpoint, "archive upload rejected: {detail}");
        Err(Error::Archive(format!("HTTP {} - {detail}", status.as_u16())))
    }
}
