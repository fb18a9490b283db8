//! Email transport: spool-directory inbound, SMTP via lettre for outbound.
//!
//! Inbound mail is read from `.eml` files dropped into the spool inbox. Each
//! file is moved to `processed/` once parsed (or `rejected/` when it cannot be
//! parsed) so a file is never fetched twice. Outbound replies go through SMTP
//! when a host is configured, otherwise they are written to `outbox/`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use crate::channels::email_types::InboundEmail;
use crate::config::env_parse;
use crate::error::{ChannelError, ConfigError};

const CHANNEL: &str = "email";

// ── Configuration ───────────────────────────────────────────────────

/// SMTP settings for outbound mail.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

/// Email transport configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Directory scanned for inbound `.eml` files.
    pub spool_dir: PathBuf,
    /// `None` writes replies to `<spool>/outbox` instead of sending them.
    pub smtp: Option<SmtpConfig>,
    pub from_address: String,
    pub poll_interval: Duration,
}

impl EmailConfig {
    pub fn new(spool_dir: impl Into<PathBuf>, from_address: impl Into<String>) -> Self {
        Self {
            spool_dir: spool_dir.into(),
            smtp: None,
            from_address: from_address.into(),
            poll_interval: Duration::from_secs(60),
        }
    }

    /// Build config from environment variables.
    ///
    /// `EMAIL_FROM_ADDRESS` is required; SMTP is enabled when `EMAIL_SMTP_HOST` is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let from_address = std::env::var("EMAIL_FROM_ADDRESS")
            .map_err(|_| ConfigError::MissingEnvVar("EMAIL_FROM_ADDRESS".into()))?;
        from_address
            .parse::<Mailbox>()
            .map_err(|e| ConfigError::InvalidValue {
                key: "EMAIL_FROM_ADDRESS".into(),
                message: e.to_string(),
            })?;

        let spool_dir = std::env::var("WARRANTY_SPOOL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./spool"));

        let smtp = std::env::var("EMAIL_SMTP_HOST").ok().map(|host| SmtpConfig {
            host,
            port: env_parse("EMAIL_SMTP_PORT").unwrap_or(587),
            username: std::env::var("EMAIL_USERNAME").unwrap_or_default(),
            password: SecretString::from(std::env::var("EMAIL_PASSWORD").unwrap_or_default()),
        });

        let poll_interval =
            Duration::from_secs(env_parse("EMAIL_POLL_INTERVAL_SECS").unwrap_or(60));

        Ok(Self {
            spool_dir,
            smtp,
            from_address,
            poll_interval,
        })
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.spool_dir.join("processed")
    }

    pub fn rejected_dir(&self) -> PathBuf {
        self.spool_dir.join("rejected")
    }

    pub fn outbox_dir(&self) -> PathBuf {
        self.spool_dir.join("outbox")
    }
}

// ── Transport trait ─────────────────────────────────────────────────

/// Where inbound emails come from and replies go to.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Fetch emails not yet handed out.
    async fn fetch_inbound(&self) -> Result<Vec<InboundEmail>, ChannelError>;

    /// Send a plain-text email. Returns the Message-ID used.
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<String, ChannelError>;
}

// ── Spool mailbox ───────────────────────────────────────────────────

/// Spool-directory inbox with SMTP (or outbox-file) delivery.
pub struct SpoolMailbox {
    config: EmailConfig,
}

impl SpoolMailbox {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EmailConfig {
        &self.config
    }

    fn build_message(&self, to: &str, subject: &str, body: &str) -> Result<(Message, String), ChannelError> {
        let from: Mailbox = self.config.from_address.parse().map_err(|e| {
            send_failed(format!("Invalid from address: {e}"))
        })?;
        let to: Mailbox = to
            .parse()
            .map_err(|e| send_failed(format!("Invalid to address: {e}")))?;

        let domain = from.email.domain().to_string();
        let message_id = format!("<{}@{}>", Uuid::new_v4(), domain);

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .message_id(Some(message_id.clone()))
            .body(body.to_string())
            .map_err(|e| send_failed(format!("Failed to build email: {e}")))?;

        Ok((message, message_id))
    }
}

#[async_trait]
impl EmailTransport for SpoolMailbox {
    async fn fetch_inbound(&self) -> Result<Vec<InboundEmail>, ChannelError> {
        let spool = &self.config.spool_dir;
        let mut entries = match tokio::fs::read_dir(spool).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(dir = %spool.display(), "Spool directory missing, nothing to fetch");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(ChannelError::FetchFailed {
                    name: CHANNEL.into(),
                    reason: format!("cannot read {}: {e}", spool.display()),
                });
            }
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "eml") && entry.file_type().await?.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        // A file that cannot be read or moved is logged and left in the spool.
        let mut emails = Vec::with_capacity(paths.len());
        for path in paths {
            let raw = match tokio::fs::read(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::error!(file = %path.display(), error = %e, "Failed to read spooled email");
                    continue;
                }
            };
            match InboundEmail::parse(&raw) {
                Ok(email) => {
                    if let Err(e) = move_into(&path, &self.config.processed_dir()).await {
                        tracing::error!(file = %path.display(), error = %e, "Failed to move email to processed");
                        continue;
                    }
                    tracing::info!(
                        file = %path.display(),
                        from = %email.from,
                        subject = %email.subject,
                        "Fetched inbound email"
                    );
                    emails.push(email);
                }
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Rejecting unparseable email");
                    if let Err(e) = move_into(&path, &self.config.rejected_dir()).await {
                        tracing::error!(file = %path.display(), error = %e, "Failed to move email to rejected");
                    }
                }
            }
        }

        Ok(emails)
    }

    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<String, ChannelError> {
        let (message, message_id) = self.build_message(to, subject, body)?;

        match &self.config.smtp {
            Some(smtp) => {
                let smtp = smtp.clone();
                tokio::task::spawn_blocking(move || send_smtp(&smtp, &message))
                    .await
                    .map_err(|e| send_failed(format!("SMTP task failed: {e}")))??;
                tracing::info!(to, message_id = %message_id, "Reply sent via SMTP");
            }
            None => {
                let outbox = self.config.outbox_dir();
                tokio::fs::create_dir_all(&outbox).await?;
                let name = message_id.trim_matches(|c| c == '<' || c == '>');
                let path = outbox.join(format!("{name}.eml"));
                tokio::fs::write(&path, message.formatted()).await?;
                tracing::info!(to, file = %path.display(), "Reply written to outbox");
            }
        }

        Ok(message_id)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn send_failed(reason: String) -> ChannelError {
    ChannelError::SendFailed {
        name: CHANNEL.into(),
        reason,
    }
}

/// Blocking SMTP send; run inside `spawn_blocking`.
fn send_smtp(smtp: &SmtpConfig, message: &Message) -> Result<(), ChannelError> {
    let creds = Credentials::new(
        smtp.username.clone(),
        smtp.password.expose_secret().to_string(),
    );

    let transport = SmtpTransport::relay(&smtp.host)
        .map_err(|e| send_failed(format!("SMTP relay error: {e}")))?
        .port(smtp.port)
        .credentials(creds)
        .build();

    transport
        .send(message)
        .map_err(|e| send_failed(format!("SMTP send failed: {e}")))?;
    Ok(())
}

async fn move_into(path: &Path, dir: &Path) -> Result<(), ChannelError> {
    tokio::fs::create_dir_all(dir).await?;
    let Some(name) = path.file_name() else {
        return Err(ChannelError::FetchFailed {
            name: CHANNEL.into(),
            reason: format!("spool entry without a file name: {}", path.display()),
        });
    };
    tokio::fs::rename(path, dir.join(name)).await?;
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────
