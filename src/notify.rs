//! Email notification with daily success rate-limiting.
//!
//! Success mail is gated by a persisted per-day marker; failure mail goes
//! out on every failed run (when enabled) with the last failure screenshot
//! attached. Delivery problems are logged and never escalate past the run's
//! primary result.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::DateTime;
use chrono_tz::Tz;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{Config, SmtpConfig};

const SUCCESS_MARKER_FILE: &str = "last_success_email.json";

/// Persisted marker recording the last calendar date a success email went
/// out. Overwritten on every send.
#[derive(Debug, Serialize, Deserialize)]
struct SuccessMarker {
    date: String,
    ts: String,
}

pub struct EmailNotifier<'a> {
    config: &'a Config,
}

impl<'a> EmailNotifier<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    fn smtp(&self) -> Option<&SmtpConfig> {
        if self.config.notify.enable_email {
            self.config.notify.smtp.as_ref()
        } else {
            None
        }
    }

    /// Send the success email, at most once per calendar day.
    /// Returns whether a mail actually went out.
    pub async fn send_success(&self, subject: &str, body: &str, now: DateTime<Tz>) -> bool {
        let Some(smtp) = self.smtp() else {
            return false;
        };
        let once_per_day = self.config.notify.success_email_once_per_day;
        if once_per_day && !should_send_success(&self.config.paths.meta_dir, &now) {
            info!(step = "notify", "success email already sent today; skipping");
            return false;
        }

        let message = match build_message(smtp, subject, body, None) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "failed to build success email");
                return false;
            }
        };
        match send(smtp, message).await {
            Ok(()) => {
                if once_per_day {
                    if let Err(err) = record_success_sent(&self.config.paths.meta_dir, &now) {
                        warn!(error = %err, "failed to persist success-email marker");
                    }
                }
                info!(step = "notify", "success email sent");
                true
            }
            Err(err) => {
                warn!(error = %err, "failed to send success email");
                false
            }
        }
    }

    /// Send the failure email, with the screenshot attached when available.
    pub async fn send_failure(&self, subject: &str, body: &str, screenshot: Option<&Path>) -> bool {
        let Some(smtp) = self.smtp() else {
            return false;
        };
        if !self.config.notify.email_on_failure_always {
            return false;
        }

        let message = match build_message(smtp, subject, body, screenshot) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "failed to build failure email");
                return false;
            }
        };
        match send(smtp, message).await {
            Ok(()) => {
                info!(step = "notify", "failure email sent");
                true
            }
            Err(err) => {
                warn!(error = %err, "failed to send failure email");
                false
            }
        }
    }
}

/// True unless the marker says a success email already went out on `now`'s
/// calendar date. A missing or unreadable marker counts as "not sent".
fn should_send_success(meta_dir: &Path, now: &DateTime<Tz>) -> bool {
    let path = meta_dir.join(SUCCESS_MARKER_FILE);
    let Ok(content) = std::fs::read_to_string(&path) else {
        return true;
    };
    match serde_json::from_str::<SuccessMarker>(&content) {
        Ok(marker) => marker.date != now.date_naive().to_string(),
        Err(_) => true,
    }
}

fn record_success_sent(meta_dir: &Path, now: &DateTime<Tz>) -> Result<()> {
    std::fs::create_dir_all(meta_dir)
        .with_context(|| format!("failed to create meta directory: {}", meta_dir.display()))?;
    let marker = SuccessMarker {
        date: now.date_naive().to_string(),
        ts: now.to_rfc3339(),
    };
    let path = meta_dir.join(SUCCESS_MARKER_FILE);
    std::fs::write(&path, serde_json::to_string_pretty(&marker)?)
        .with_context(|| format!("failed to write success marker: {}", path.display()))?;
    Ok(())
}

fn build_message(
    smtp: &SmtpConfig,
    subject: &str,
    body: &str,
    screenshot: Option<&Path>,
) -> Result<Message> {
    if smtp.recipients.is_empty() {
        return Err(anyhow!("smtp recipients list is empty"));
    }
    let sender: Mailbox = smtp
        .sender
        .as_deref()
        .or(smtp.username.as_deref())
        .unwrap_or("checkinpilot@localhost")
        .parse()
        .context("invalid sender address")?;

    let mut builder = Message::builder().from(sender).subject(subject);
    for recipient in &smtp.recipients {
        builder = builder.to(recipient
            .parse()
            .with_context(|| format!("invalid recipient address: {recipient}"))?);
    }

    // A screenshot that vanished between capture and send is not worth
    // failing the notification over.
    let attachment = screenshot.and_then(|path| {
        std::fs::read(path)
            .map(|bytes| (path.to_path_buf(), bytes))
            .map_err(|err| warn!(path = %path.display(), error = %err, "screenshot unreadable; sending without attachment"))
            .ok()
    });

    let message = match attachment {
        Some((path, bytes)) => {
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "screenshot.png".to_string());
            let png = ContentType::parse("image/png")
                .map_err(|err| anyhow!("invalid attachment content type: {err}"))?;
            builder
                .multipart(
                    MultiPart::mixed()
                        .singlepart(
                            SinglePart::builder()
                                .header(ContentType::TEXT_PLAIN)
                                .body(body.to_string()),
                        )
                        .singlepart(Attachment::new(filename).body(bytes, png)),
                )
                .context("failed to build multipart message")?
        }
        None => builder
            .body(body.to_string())
            .context("failed to build message")?,
    };
    Ok(message)
}

async fn send(smtp: &SmtpConfig, message: Message) -> Result<()> {
    let mut builder = if smtp.use_ssl {
        AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
            .context("failed to configure smtp relay")?
    } else if smtp.use_starttls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
            .context("failed to configure smtp starttls relay")?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
    };
    builder = builder.port(smtp.port);
    if let Some(username) = &smtp.username {
        builder = builder.credentials(Credentials::new(
            username.clone(),
            smtp.password.clone().unwrap_or_default(),
        ));
    }

    let transport: AsyncSmtpTransport<Tokio1Executor> = builder.build();
    transport
        .send(message)
        .await
        .context("smtp delivery failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Tz> {
        chrono_tz::UTC.with_ymd_and_hms(y, m, d, 7, 0, 0).unwrap()
    }

    #[test]
    fn test_marker_absent_means_send() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(should_send_success(dir.path(), &at(2024, 1, 1)));
    }

    #[test]
    fn test_same_day_is_rate_limited() {
        let dir = tempfile::TempDir::new().unwrap();
        record_success_sent(dir.path(), &at(2024, 1, 1)).unwrap();

        assert!(!should_send_success(dir.path(), &at(2024, 1, 1)));
        assert!(should_send_success(dir.path(), &at(2024, 1, 2)));
    }

    #[test]
    fn test_marker_overwritten_on_new_send() {
        let dir = tempfile::TempDir::new().unwrap();
        record_success_sent(dir.path(), &at(2024, 1, 1)).unwrap();
        record_success_sent(dir.path(), &at(2024, 1, 2)).unwrap();

        assert!(!should_send_success(dir.path(), &at(2024, 1, 2)));
        assert!(should_send_success(dir.path(), &at(2024, 1, 1)));
    }

    #[test]
    fn test_corrupt_marker_counts_as_not_sent() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join(SUCCESS_MARKER_FILE), "not json").unwrap();
        assert!(should_send_success(dir.path(), &at(2024, 1, 1)));
    }

    #[test]
    fn test_build_message_requires_recipients() {
        let smtp = SmtpConfig::default();
        assert!(build_message(&smtp, "subject", "body", None).is_err());
    }

    #[test]
    fn test_build_message_plain_and_with_attachment() {
        let dir = tempfile::TempDir::new().unwrap();
        let shot = dir.path().join("failure.png");
        std::fs::write(&shot, b"png-bytes").unwrap();

        let smtp = SmtpConfig {
            sender: Some("bot@example.com".to_string()),
            recipients: vec!["ops@example.com".to_string()],
            ..SmtpConfig::default()
        };

        assert!(build_message(&smtp, "s", "b", None).is_ok());
        assert!(build_message(&smtp, "s", "b", Some(&shot)).is_ok());
        // Missing attachment degrades to a plain message instead of failing.
        assert!(build_message(&smtp, "s", "b", Some(&dir.path().join("gone.png"))).is_ok());
    }

    #[tokio::test]
    async fn test_notifier_disabled_sends_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths = crate::config::DataPaths::rooted(dir.path());
        // enable_email stays false.

        let notifier = EmailNotifier::new(&config);
        assert!(!notifier.send_success("s", "b", at(2024, 1, 1)).await);
        assert!(!notifier.send_failure("s", "b", None).await);
        assert!(!dir.path().join("data/meta").join(SUCCESS_MARKER_FILE).exists());
    }
}
