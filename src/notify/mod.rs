// src/notify/mod.rs
//
// Patient messaging: event timeline recording, per-clinic channel settings,
// template resolution, and dispatch to the email / WhatsApp senders.

pub mod codes;
pub mod dispatcher;
pub mod email;
pub mod recorder;
pub mod resolver;
pub mod template;
pub mod whatsapp;

use async_trait::async_trait;

use crate::config::Config;
use crate::notify::email::EmailSender;
use crate::notify::whatsapp::WhatsAppSender;

/// The two patient-facing channels. Stored as text ('email' / 'whatsapp')
/// in channel_setting.channel, event_timeline.channels and sent_channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Email,
    WhatsApp,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Email, Channel::WhatsApp];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::WhatsApp => "whatsapp",
        }
    }

    pub fn parse(s: &str) -> Option<Channel> {
        match s {
            "email" => Some(Channel::Email),
            "whatsapp" => Some(Channel::WhatsApp),
            _ => None,
        }
    }
}

/// A rendered message ready for one delivery attempt. `to` is an email
/// address or an E.164 phone number depending on the channel.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub to: String,
    pub subject: Option<String>,
    pub body: String,
}

/// One delivery backend. Implementations must not retry internally; the
/// dispatcher records a single outcome per channel per attempt.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()>;

    fn channel(&self) -> Channel;
}

/// Configured senders, one slot per channel. A `None` slot means the channel
/// was not configured; send attempts through it fail with a config error and
/// get recorded on the event like any other delivery failure.
pub struct Senders {
    pub email: Option<EmailSender>,
    pub whatsapp: Option<WhatsAppSender>,
}

impl Senders {
    pub fn from_config(cfg: &Config) -> Self {
        let email = cfg.smtp.clone().map(EmailSender::new);
        if email.is_none() {
            tracing::warn!("SMTP_HOST not set; email channel is unconfigured");
        }
        let whatsapp = cfg.whatsapp.clone().map(WhatsAppSender::new);
        if whatsapp.is_none() {
            tracing::warn!("WHATSAPP_API_URL/TOKEN not set; whatsapp channel is unconfigured");
        }
        Senders { email, whatsapp }
    }

    pub fn get(&self, channel: Channel) -> Option<&dyn ChannelSender> {
        match channel {
            Channel::Email => self.email.as_ref().map(|s| s as &dyn ChannelSender),
            Channel::WhatsApp => self.whatsapp.as_ref().map(|s| s as &dyn ChannelSender),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_round_trips_through_text() {
        for ch in Channel::ALL {
            assert_eq!(Channel::parse(ch.as_str()), Some(ch));
        }
        assert_eq!(Channel::parse("sms"), None);
        assert_eq!(Channel::parse(""), None);
    }
}
