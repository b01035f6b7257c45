use crate::config::MailConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

// ── Transport trait ───────────────────────────────────────────────────────────

/// Outbound mail seam. Sender and receiver are fixed at construction; the
/// notifier only decides subject and body. Any error must block the
/// notifier's watermark advance.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<()>;
}

// ── SMTP mailer ───────────────────────────────────────────────────────────────

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> Result<Self> {
        let from: Mailbox = config
            .sender
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid sender address {:?}: {}", config.sender, e))?;
        let to: Mailbox = config
            .receiver
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid receiver address {:?}: {}", config.receiver, e))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)
            .with_context(|| format!("Failed to set up SMTP relay {}", config.smtp_server))?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.sender.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self { transport, from, to })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .context("Could not build digest message")?;

        self.transport
            .send(message)
            .await
            .with_context(|| format!("SMTP send to {} failed", self.to))?;

        info!("Email sent to {}", self.to);
        Ok(())
    }
}
