// src/notify/whatsapp.rs

use async_trait::async_trait;

use crate::config::WhatsAppConfig;
use crate::notify::{Channel, ChannelSender, OutboundMessage};

const MAX_ERROR_BODY: usize = 512;

/// WhatsApp channel over the vendor's HTTP send API. Token provisioning
/// (the OAuth dance) happens outside this server; we only hold the result.
pub struct WhatsAppSender {
    cfg: WhatsAppConfig,
    client: reqwest::Client,
}

impl WhatsAppSender {
    pub fn new(cfg: WhatsAppConfig) -> Self {
        Self {
            cfg,
            client: reqwest::Client::new(),
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

#[async_trait]
impl ChannelSender for WhatsAppSender {
    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(&self.cfg.api_url)
            .bearer_auth(&self.cfg.api_token)
            .json(&serde_json::json!({
                "to": msg.to,
                "type": "text",
                "text": { "body": msg.body },
            }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("whatsapp API returned {status}: {}", truncate(&body, MAX_ERROR_BODY));
        }

        tracing::info!(to = %msg.to, "whatsapp message sent");
        Ok(())
    }

    fn channel(&self) -> Channel {
        Channel::WhatsApp
    }
}
