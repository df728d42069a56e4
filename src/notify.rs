//! Out-of-band delivery of account notifications (password reset links).

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{info, warn};

use crate::config::{NotifierKind, SmtpConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a message, or fail so the caller can roll back.
    async fn send(&self, message: &Notification) -> anyhow::Result<()>;
}

/// Sender selected by `NOTIFIER`.
pub fn from_config(kind: &NotifierKind) -> anyhow::Result<Arc<dyn Notifier>> {
    Ok(match kind {
        NotifierKind::Log => {
            warn!("NOTIFIER=log; reset links are logged as sent but never delivered");
            Arc::new(LogNotifier)
        }
        NotifierKind::Smtp(cfg) => Arc::new(SmtpNotifier::new(cfg)?),
    })
}

/// Local/dev notifier: records that a message went out, never its body.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &Notification) -> anyhow::Result<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            "notification send stub"
        );
        Ok(())
    }
}

/// Delivers over SMTP with STARTTLS and password authentication.
#[derive(Clone)]
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(cfg: &SmtpConfig) -> anyhow::Result<Self> {
        let from = cfg
            .from
            .parse::<Mailbox>()
            .context("SMTP_FROM is not a valid mailbox")?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
            .context("build smtp transport")?
            .port(cfg.port)
            .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
            .build();
        Ok(Self { transport, from })
    }

    fn message(&self, n: &Notification) -> anyhow::Result<Message> {
        let to = n
            .to
            .parse::<Mailbox>()
            .with_context(|| format!("invalid recipient {}", n.to))?;
        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(n.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(n.body.clone())
            .context("build email")
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, message: &Notification) -> anyhow::Result<()> {
        let email = self.message(message)?;
        self.transport.send(email).await.context("smtp send")?;
        info!(to = %message.to, subject = %message.subject, "notification delivered");
        Ok(())
    }
}

/// Build the password reset message for `to`.
pub fn reset_password_notification(to: &str, frontend_url: &str, plain_token: &str) -> Notification {
    let url = format!(
        "{}/reset-password/{}",
        frontend_url.trim_end_matches('/'),
        plain_token
    );
    let body = format!(
        "You can reset your password by clicking <a href=\"{url}\" target=\"_blank\">Reset your password</a>.\n\
         If the link does not work, copy and paste this URL into a new tab: {url}\n\
         If you did not request this, you can ignore this message."
    );
    Notification {
        to: to.to_string(),
        subject: "Reset password".to_string(),
        body,
    }
}
