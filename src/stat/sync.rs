use crate::error::{Error, Result};
use crate::stat::{derive_row, Ledger, Plausibility, Reading, Row};
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebDavConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub file_path: String,
}
impl WebDavConfig {
    pub fn file_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.file_path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerLocation {
    WebDav(WebDavConfig),
    Local(PathBuf),
}
impl LedgerLocation {
    /// Remote storage wins when configured, the local path is the fallback.
    pub fn resolve(webdav: Option<WebDavConfig>, local: Option<PathBuf>) -> Option<Self> {
        webdav
            .map(LedgerLocation::WebDav)
            .or(local.map(LedgerLocation::Local))
    }
}

/// Reads and rewrites the ledger file.
///
/// Every write replaces the whole file. Submissions going through one store
/// are serialized; other processes writing the same file are not guarded
/// against, the tool assumes a single operator.
pub struct LedgerStore {
    location: Option<LedgerLocation>,
    plausibility: Plausibility,
    http: Client,
    write_lock: Mutex<()>,
}
impl LedgerStore {
    pub fn new(location: Option<LedgerLocation>) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::SourceUnavailable(format!("http client: {e}")))?;
        Ok(Self {
            location,
            plausibility: Plausibility::default(),
            http,
            write_lock: Mutex::new(()),
        })
    }

    pub fn with_plausibility(mut self, plausibility: Plausibility) -> Self {
        self.plausibility = plausibility;
        self
    }

    pub fn location(&self) -> Option<&LedgerLocation> {
        self.location.as_ref()
    }

    pub async fn load(&self) -> Result<Ledger> {
        let text = self.fetch().await?;
        let ledger = Ledger::parse(&text)?;
        debug!(rows = ledger.len(), "ledger loaded");
        Ok(ledger)
    }

    /// Writes the ledger text back unchanged.
    pub async fn save(&self, ledger: &Ledger) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.put(ledger.text()).await
    }

    /// Validates `row` against the stored last row and persists it.
    pub async fn append(&self, row: Row) -> Result<Ledger> {
        let _guard = self.write_lock.lock().await;
        let ledger = self.load().await?;
        self.append_to(&ledger, row).await
    }

    /// Derives the next row from the stored ledger and appends it. The
    /// returned ledger ends with the new row.
    pub async fn record(&self, reading: &Reading) -> Result<Ledger> {
        let _guard = self.write_lock.lock().await;
        let ledger = self.load().await?;
        let row = derive_row(
            ledger.last(),
            reading.date,
            reading.meter_reading,
            reading.unit_price,
        )?;
        self.plausibility.check(&row, ledger.last().is_some())?;
        self.append_to(&ledger, row).await
    }

    async fn append_to(&self, ledger: &Ledger, row: Row) -> Result<Ledger> {
        ledger.check_append(&row)?;
        let next = ledger.with_row(row);
        self.put(next.text()).await?;
        if let Some(row) = next.last() {
            info!(
                date = %row.date_label(),
                reading = %row.meter_reading,
                consumption = %row.consumption,
                amount = %row.amount_due,
                "ledger row appended"
            );
        }
        Ok(next)
    }

    async fn fetch(&self) -> Result<String> {
        match &self.location {
            None => Err(Error::SourceUnavailable(
                "neither a WebDAV nor a local ledger path is configured".into(),
            )),
            Some(LedgerLocation::Local(path)) => match tokio::fs::read_to_string(path).await {
                Ok(text) => Ok(text),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "ledger file missing, starting empty");
                    Ok(String::new())
                }
                Err(e) => Err(Error::SourceUnavailable(format!("{}: {e}", path.display()))),
            },
            Some(LedgerLocation::WebDav(dav)) => {
                let resp = self
                    .http
                    .get(dav.file_url())
                    .basic_auth(&dav.username, Some(&dav.password))
                    .send()
                    .await
                    .map_err(|e| Error::SourceUnavailable(format!("GET {}: {e}", dav.file_url())))?;
                if resp.status() == StatusCode::NOT_FOUND {
                    debug!(url = %dav.file_url(), "remote ledger missing, starting empty");
                    return Ok(String::new());
                }
                let resp = resp
                    .error_for_status()
                    .map_err(|e| Error::SourceUnavailable(format!("GET {}: {e}", dav.file_url())))?;
                resp.text()
                    .await
                    .map_err(|e| Error::SourceUnavailable(format!("GET {}: {e}", dav.file_url())))
            }
        }
    }

    async fn put(&self, text: &str) -> Result<()> {
        match &self.location {
            None => Err(Error::Persistence(
                "neither a WebDAV nor a local ledger path is configured".into(),
            )),
            Some(LedgerLocation::Local(path)) => write_replace(path, text).await,
            Some(LedgerLocation::WebDav(dav)) => {
                let resp = self
                    .http
                    .put(dav.file_url())
                    .basic_auth(&dav.username, Some(&dav.password))
                    .body(text.to_owned())
                    .send()
                    .await
                    .map_err(|e| Error::Persistence(format!("PUT {}: {e}", dav.file_url())))?;
                let status = resp.status();
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    return Err(Error::Persistence(format!(
                        "PUT {}: remote rejected the credentials ({status})",
                        dav.file_url()
                    )));
                }
                resp.error_for_status()
                    .map_err(|e| Error::Persistence(format!("PUT {}: {e}", dav.file_url())))?;
                Ok(())
            }
        }
    }
}

/// Writes into a sibling temp file and renames it over the target, so a
/// failed write never leaves a truncated ledger behind.
async fn write_replace(path: &Path, text: &str) -> Result<()> {
    let persist = |e: std::io::Error| Error::Persistence(format!("{}: {e}", path.display()));
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await.map_err(persist)?;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "ledger".into());
    let tmp = path.with_file_name(format!(".{name}.tmp"));
    if let Err(e) = tokio::fs::write(&tmp, text).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(persist(e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        warn!(tmp = %tmp.display(), "could not replace ledger file");
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(persist(e));
    }
    Ok(())
}
