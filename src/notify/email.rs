// src/notify/email.rs

use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::SmtpConfig;
use crate::notify::{Channel, ChannelSender, OutboundMessage};

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("email build error: {0}")]
    Build(String),
}

/// Email channel over async SMTP. One transport per server process; lettre
/// pools connections internally.
pub struct EmailSender {
    cfg: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailSender {
    pub fn new(cfg: SmtpConfig) -> Self {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
                .unwrap_or_else(|_| {
                    AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.host)
                })
                .port(cfg.port);

        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let transport = builder.build();
        Self { cfg, transport }
    }

    async fn deliver(&self, msg: &OutboundMessage) -> Result<(), EmailError> {
        let subject = msg
            .subject
            .clone()
            .unwrap_or_else(|| "Message from your clinic".to_string());

        // Template bodies are HTML; plain-text templates render fine as
        // text/html too.
        let email = Message::builder()
            .from(self.cfg.from_address.parse()?)
            .to(msg.to.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(msg.body.clone())
            .map_err(|e| EmailError::Build(e.to_string()))?;

        self.transport.send(email).await?;
        tracing::info!(to = %msg.to, "notification email sent");
        Ok(())
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
        self.deliver(msg).await?;
        Ok(())
    }

    fn channel(&self) -> Channel {
        Channel::Email
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_error_display() {
        let err = EmailError::Build("missing body".to_string());
        assert_eq!(err.to_string(), "email build error: missing body");
    }
}
