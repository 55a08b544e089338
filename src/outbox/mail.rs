use crate::error::{Error, Result};
use lettre::message::{header::ContentType, Attachment, Mailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{SmtpTransport, Transport};
use std::time::Duration;
use tracing::{error, info};

const SMTP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    /// TLS from the first byte (SMTPS, usually port 465).
    Implicit,
    /// Plain connection upgraded with STARTTLS (submission, usually 587).
    StartTls,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub security: SmtpSecurity,
    pub from: String,
    pub recipients: Vec<String>,
}

/// Splits a comma separated address list, dropping blanks.
pub fn parse_recipients(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub struct Notifier {
    config: SmtpConfig,
}
impl Notifier {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    pub fn recipients(&self) -> &[String] {
        &self.config.recipients
    }

    pub fn build_message(
        &self,
        pdf: &[u8],
        filename: &str,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<Message> {
        if recipients.is_empty() {
            return Err(Error::Delivery("no recipients given".into()));
        }
        let from: Mailbox = self
            .config
            .from
            .parse()
            .map_err(|e| Error::Delivery(format!("invalid sender {:?}: {e}", self.config.from)))?;
        let mut builder = Message::builder().from(from).subject(subject);
        for to in recipients {
            let mailbox: Mailbox = to
                .parse()
                .map_err(|e| Error::Delivery(format!("invalid recipient {to:?}: {e}")))?;
            builder = builder.to(mailbox);
        }
        let pdf_type = ContentType::parse("application/pdf")
            .map_err(|e| Error::Delivery(e.to_string()))?;
        let attachment = Attachment::new(filename.to_string()).body(pdf.to_vec(), pdf_type);
        builder
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(body.to_string()))
                    .singlepart(attachment),
            )
            .map_err(|e| Error::Delivery(format!("failed to build email: {e}")))
    }

    /// Sends the statement. Runs the blocking SMTP exchange off the async
    /// runtime.
    pub async fn send(
        &self,
        pdf: &[u8],
        filename: &str,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<()> {
        let message = self.build_message(pdf, filename, recipients, subject, body)?;
        let transport = self.transport()?;
        let count = recipients.len();
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| Error::Delivery(e.to_string()))?
            .map_err(|e| {
                error!(host = %self.config.host, "mail send failed: {e}");
                Error::Delivery(e.to_string())
            })?;
        info!(recipients = count, host = %self.config.host, "statement mailed");
        Ok(())
    }

    fn transport(&self) -> Result<SmtpTransport> {
        let c = &self.config;
        let builder = match c.security {
            SmtpSecurity::Implicit => SmtpTransport::relay(&c.host),
            SmtpSecurity::StartTls => SmtpTransport::starttls_relay(&c.host),
        }
        .map_err(|e| Error::Delivery(format!("invalid SMTP host {:?}: {e}", c.host)))?
        .port(c.port)
        .timeout(Some(SMTP_TIMEOUT));

        let builder = match (&c.username, &c.password) {
            (Some(user), Some(pass)) => {
                builder.credentials(Credentials::new(user.clone(), pass.clone()))
            }
            _ => builder,
        };
        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(port: u16) -> SmtpConfig {
        SmtpConfig {
            host: "127.0.0.1".into(),
            port,
            username: Some("meter".into()),
            password: Some("secret".into()),
            security: SmtpSecurity::StartTls,
            from: "Meter <meter@example.org>".into(),
            recipients: parse_recipients("a@example.org, b@example.org"),
        }
    }

    #[test]
    fn recipients_are_split_and_trimmed() {
        assert_eq!(
            parse_recipients(" a@x.org,,b@y.org , "),
            vec!["a@x.org".to_string(), "b@y.org".to_string()]
        );
        assert!(parse_recipients("").is_empty());
    }

    #[test]
    fn message_carries_body_and_pdf_attachment() {
        let notifier = Notifier::new(config(587));
        let msg = notifier
            .build_message(
                b"%PDF-1.3 fake",
                "Autostrom 01.02.2024.pdf",
                notifier.recipients(),
                "Autostrom 01.02.2024",
                "48.00 EUR for 150 kWh",
            )
            .unwrap();
        let raw = String::from_utf8_lossy(&msg.formatted()).to_string();
        assert!(raw.contains("Subject: Autostrom 01.02.2024"));
        assert!(raw.contains("a@example.org"));
        assert!(raw.contains("b@example.org"));
        assert!(raw.contains("48.00 EUR for 150 kWh"));
        assert!(raw.contains("Content-Type: application/pdf"));
        assert!(raw.contains("Autostrom 01.02.2024.pdf"));
    }

    #[test]
    fn invalid_addresses_are_delivery_errors() {
        let mut cfg = config(587);
        cfg.from = "not an address".into();
        let err = Notifier::new(cfg)
            .build_message(b"", "x.pdf", &["a@example.org".into()], "s", "b")
            .unwrap_err();
        assert!(matches!(err, Error::Delivery(_)));

        let notifier = Notifier::new(config(587));
        let err = notifier
            .build_message(b"", "x.pdf", &["nope".into()], "s", "b")
            .unwrap_err();
        assert!(matches!(err, Error::Delivery(_)));
        assert!(matches!(
            notifier.build_message(b"", "x.pdf", &[], "s", "b"),
            Err(Error::Delivery(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_delivery_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        for security in [SmtpSecurity::StartTls, SmtpSecurity::Implicit] {
            let mut cfg = config(port);
            cfg.security = security;
            let notifier = Notifier::new(cfg);
            let err = notifier
                .send(b"%PDF", "x.pdf", notifier.recipients(), "s", "b")
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Delivery(_)));
        }
    }
}
