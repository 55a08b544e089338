use anyhow::{bail, Context};
use meterbill::outbox::{parse_recipients, ArchiveConfig, SmtpConfig, SmtpSecurity};
use meterbill::report::{Letterhead, StatementConfig};
use meterbill::stat::{parse_decimal, LedgerLocation, Plausibility, WebDavConfig};
use std::path::PathBuf;

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_WEBDAV_FILE: &str = "Zaehlerstaende/Autostrom.csv";
const DEFAULT_INVOICE_DIR: &str = "data/invoices";
const DEFAULT_SCOPE: &str = "openid profile email";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcConfig {
    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
    /// Absolute callback URL registered at the provider, `None` derives it
    /// from the request host.
    pub redirect_url: Option<String>,
    pub session_secret: String,
}

/// Everything the server needs, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub ledger: Option<LedgerLocation>,
    pub invoice_dir: PathBuf,
    pub statement: StatementConfig,
    pub plausibility: Plausibility,
    pub smtp: Option<SmtpConfig>,
    pub archive: Option<ArchiveConfig>,
    pub oidc: Option<OidcConfig>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Blank values count as
    /// unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let webdav = match (
            get("WEBDAV_BASE_URL"),
            get("WEBDAV_USERNAME"),
            get("WEBDAV_PASSWORD"),
        ) {
            (Some(base_url), Some(username), Some(password)) => Some(WebDavConfig {
                base_url,
                username,
                password,
                file_path: or("WEBDAV_FILEPATH", DEFAULT_WEBDAV_FILE),
            }),
            _ => None,
        };
        let ledger = LedgerLocation::resolve(webdav, get("LOCAL_TSV").map(PathBuf::from));

        let statement = StatementConfig {
            letterhead: Letterhead {
                name: or("PDF_NAME", ""),
                street: or("PDF_STREET", ""),
                city: or("PDF_CITY", ""),
            },
            title: or("PDF_TITLE", "Autostrom"),
            currency: or("PDF_CURRENCY", "EUR"),
            ..StatementConfig::default()
        };

        let bound = |key: &str| {
            get(key)
                .map(|v| parse_decimal(&v).with_context(|| format!("{key} must be a number")))
                .transpose()
        };
        let plausibility = Plausibility::new(bound("CONSUMPTION_MIN")?, bound("CONSUMPTION_MAX")?);

        let recipients = get("MAIL_TO").map(|v| parse_recipients(&v)).unwrap_or_default();
        let smtp = match get("SMTP_HOST") {
            Some(host) if !recipients.is_empty() => {
                let port = match get("SMTP_PORT") {
                    Some(p) => p.parse::<u16>().context("SMTP_PORT must be a port number")?,
                    None => 587,
                };
                let username = get("SMTP_USER");
                let security = if get("SMTP_SSL").is_some_and(|v| truthy(&v)) {
                    SmtpSecurity::Implicit
                } else {
                    SmtpSecurity::StartTls
                };
                let from = get("MAIL_FROM")
                    .or_else(|| username.clone())
                    .context("MAIL_FROM or SMTP_USER is required for mail")?;
                Some(SmtpConfig {
                    host,
                    port,
                    username,
                    password: get("SMTP_PASSWORD"),
                    security,
                    from,
                    recipients,
                })
            }
            _ => None,
        };

        let archive = match (get("PAPERLESS_URL"), get("PAPERLESS_TOKEN")) {
            (Some(base_url), Some(token)) => Some(ArchiveConfig {
                base_url,
                token,
                tags: get("PAPERLESS_TAGS")
                    .map(|v| parse_recipients(&v))
                    .unwrap_or_default(),
                correspondent: get("PAPERLESS_CORRESPONDENT"),
                document_type: get("PAPERLESS_DOCUMENT_TYPE"),
            }),
            _ => None,
        };

        let oidc = match (
            get("OIDC_ISSUER"),
            get("OIDC_CLIENT_ID"),
            get("OIDC_CLIENT_SECRET"),
        ) {
            (Some(issuer), Some(client_id), Some(client_secret)) => {
                let Some(session_secret) = get("SESSION_SECRET") else {
                    bail!("SESSION_SECRET must be set when OIDC login is enabled");
                };
                Some(OidcConfig {
                    issuer: issuer.trim_end_matches('/').to_string(),
                    client_id,
                    client_secret,
                    scope: or("OIDC_SCOPE", DEFAULT_SCOPE),
                    redirect_url: get("OIDC_REDIRECT_URL"),
                    session_secret,
                })
            }
            _ => None,
        };

        Ok(Self {
            bind_addr: or("BIND_ADDR", DEFAULT_BIND),
            ledger,
            invoice_dir: PathBuf::from(or("INVOICE_DIR", DEFAULT_INVOICE_DIR)),
            statement,
            plausibility,
            smtp,
            archive,
            oidc,
        })
    }
}

fn truthy(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn empty_environment_disables_everything_optional() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.ledger, None);
        assert_eq!(cfg.invoice_dir, PathBuf::from("data/invoices"));
        assert_eq!(cfg.statement.title, "Autostrom");
        assert_eq!(cfg.statement.currency, "EUR");
        assert!(cfg.smtp.is_none());
        assert!(cfg.archive.is_none());
        assert!(cfg.oidc.is_none());
        assert_eq!(cfg.plausibility, Plausibility::default());
    }

    #[test]
    fn webdav_wins_over_local_path() {
        let cfg = config(&[
            ("WEBDAV_BASE_URL", "https://dav.example/remote.php/webdav"),
            ("WEBDAV_USERNAME", "user"),
            ("WEBDAV_PASSWORD", "pass"),
            ("LOCAL_TSV", "/tmp/ledger.tsv"),
        ])
        .unwrap();
        match cfg.ledger {
            Some(LedgerLocation::WebDav(dav)) => {
                assert_eq!(dav.file_path, "Zaehlerstaende/Autostrom.csv");
            }
            other => panic!("unexpected location {other:?}"),
        }

        let cfg = config(&[
            ("WEBDAV_BASE_URL", "https://dav.example"),
            ("WEBDAV_PASSWORD", " "),
            ("LOCAL_TSV", "/tmp/ledger.tsv"),
        ])
        .unwrap();
        assert_eq!(
            cfg.ledger,
            Some(LedgerLocation::Local(PathBuf::from("/tmp/ledger.tsv")))
        );
    }

    #[test]
    fn smtp_needs_host_and_recipients() {
        let cfg = config(&[("SMTP_HOST", "mail.example"), ("SMTP_USER", "me@example.org")]).unwrap();
        assert!(cfg.smtp.is_none());

        let cfg = config(&[
            ("SMTP_HOST", "mail.example"),
            ("SMTP_PORT", "465"),
            ("SMTP_SSL", "true"),
            ("SMTP_USER", "me@example.org"),
            ("MAIL_TO", "a@example.org, b@example.org"),
        ])
        .unwrap();
        let smtp = cfg.smtp.unwrap();
        assert_eq!(smtp.port, 465);
        assert_eq!(smtp.security, SmtpSecurity::Implicit);
        assert_eq!(smtp.from, "me@example.org");
        assert_eq!(smtp.recipients.len(), 2);

        assert!(config(&[
            ("SMTP_HOST", "mail.example"),
            ("SMTP_PORT", "mail"),
            ("MAIL_TO", "a@example.org"),
            ("MAIL_FROM", "me@example.org"),
        ])
        .is_err());
    }

    #[test]
    fn archive_reads_tags_and_metadata() {
        let cfg = config(&[
            ("PAPERLESS_URL", "https://paperless.example"),
            ("PAPERLESS_TOKEN", "abc"),
            ("PAPERLESS_TAGS", "3, 7"),
            ("PAPERLESS_CORRESPONDENT", "12"),
        ])
        .unwrap();
        let archive = cfg.archive.unwrap();
        assert_eq!(archive.tags, vec!["3".to_string(), "7".to_string()]);
        assert_eq!(archive.correspondent.as_deref(), Some("12"));
        assert_eq!(archive.document_type, None);
    }

    #[test]
    fn oidc_requires_session_secret() {
        let oidc = [
            ("OIDC_ISSUER", "https://id.example/realms/home/"),
            ("OIDC_CLIENT_ID", "meterbill"),
            ("OIDC_CLIENT_SECRET", "s3cret"),
        ];
        assert!(config(&oidc).is_err());

        let mut pairs = oidc.to_vec();
        pairs.push(("SESSION_SECRET", "session-key"));
        let cfg = config(&pairs).unwrap().oidc.unwrap();
        assert_eq!(cfg.issuer, "https://id.example/realms/home");
        assert_eq!(cfg.scope, "openid profile email");
        assert_eq!(cfg.redirect_url, None);
    }

    #[test]
    fn plausibility_bounds_accept_decimal_comma() {
        let cfg = config(&[("CONSUMPTION_MIN", "0,5"), ("CONSUMPTION_MAX", "900")]).unwrap();
        assert_eq!(
            cfg.plausibility,
            Plausibility::new(Some("0.5".parse().unwrap()), Some("900".parse().unwrap()))
        );
        assert!(config(&[("CONSUMPTION_MAX", "lots")]).is_err());
    }
}
