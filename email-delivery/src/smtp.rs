use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use interfaces::defs::{DeliveryChannel, RenderedDigest};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub from: String,
    pub password: String,
}

impl SmtpConfig {
    /// Sender and password come from the environment variables named.
    pub fn from_env(host: &str, port: u16, from_env: &str, password_env: &str) -> Result<Self> {
        let from = std::env::var(from_env).with_context(|| format!("{} is not set", from_env))?;
        let password =
            std::env::var(password_env).with_context(|| format!("{} is not set", password_env))?;
        Ok(Self {
            host: host.to_string(),
            port,
            from,
            password,
        })
    }
}

/// Sends digests over implicit-TLS SMTP (Gmail style, port 465).
pub struct SmtpDelivery {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpDelivery {
    pub fn new(config: SmtpConfig) -> Result<Self> {
        let from: Mailbox = config
            .from
            .parse()
            .with_context(|| format!("invalid sender address '{}'", config.from))?;
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
            .port(config.port)
            .credentials(Credentials::new(config.from.clone(), config.password))
            .build();
        Ok(Self { mailer, from })
    }

    fn build_message(&self, digest: &RenderedDigest, recipients: &[String]) -> Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(&digest.subject);
        for recipient in recipients {
            let mailbox: Mailbox = recipient
                .parse()
                .with_context(|| format!("invalid recipient address '{}'", recipient))?;
            builder = builder.to(mailbox);
        }
        let plain = format!("{}\n\nThis digest is formatted as HTML.", digest.subject);
        Ok(builder.multipart(MultiPart::alternative_plain_html(plain, digest.html.clone()))?)
    }
}

#[async_trait]
impl DeliveryChannel for SmtpDelivery {
    fn channel_name(&self) -> String {
        "smtp".to_string()
    }

    async fn deliver(&self, digest: &RenderedDigest, recipients: &[String]) -> Result<()> {
        if recipients.is_empty() {
            return Err(anyhow!("no recipients for '{}'", digest.subject));
        }
        let message = self.build_message(digest, recipients)?;
        self.mailer
            .send(message)
            .await
            .map_err(|e| anyhow!("Failed to send email via SMTP: {}", e))?;
        info!("Sent '{}' to {}", digest.subject, recipients.join(", "));
        Ok(())
    }
}

/// Writes each digest to `<dir>/<group>-<date>.html` instead of sending it.
pub struct FileDelivery {
    dir: PathBuf,
}

impl FileDelivery {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, digest: &RenderedDigest) -> PathBuf {
        let group: String = digest
            .group
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir
            .join(format!("{}-{}.html", group, digest.generated_on.format("%Y-%m-%d")))
    }
}

#[async_trait]
impl DeliveryChannel for FileDelivery {
    fn channel_name(&self) -> String {
        "file".to_string()
    }

    async fn deliver(&self, digest: &RenderedDigest, recipients: &[String]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("cannot create {}", self.dir.display()))?;
        let path = self.path_for(digest);
        tokio::fs::write(&path, digest.html.as_bytes())
            .await
            .with_context(|| format!("cannot write {}", path.display()))?;
        debug!("Would have sent to: {}", recipients.join(", "));
        info!("Wrote '{}' to {}", digest.subject, path.display());
        Ok(())
    }
}
