// src/notify/resolver.rs

use serde::Serialize;

use crate::models::ChannelSettingRow;
use crate::notify::Channel;

/// Effective state of one channel for one event, computed from the clinic's
/// *current* settings on every read. Nothing here is cached on the event row.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ChannelState {
    pub enabled: bool,
    pub already_sent: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SendStates {
    pub email: ChannelState,
    pub whatsapp: ChannelState,
}

impl SendStates {
    pub fn get(&self, channel: Channel) -> ChannelState {
        match channel {
            Channel::Email => self.email,
            Channel::WhatsApp => self.whatsapp,
        }
    }

    /// No channel is enabled for this event code.
    pub fn all_disabled(&self) -> bool {
        !self.email.enabled && !self.whatsapp.enabled
    }

    /// Every enabled channel has already been sent. False when nothing is
    /// enabled: an all-disabled event is not "done", it is unreachable.
    pub fn all_sent(&self) -> bool {
        if self.all_disabled() {
            return false;
        }
        (!self.email.enabled || self.email.already_sent)
            && (!self.whatsapp.enabled || self.whatsapp.already_sent)
    }
}

/// Resolve per-channel {enabled, already_sent} for one event.
///
/// A channel is enabled only if a matching (event_code, channel) setting row
/// exists with enabled = true; absent rows degrade to disabled, never error.
pub fn resolve_send_states(
    event_code: &str,
    sent_channels: &[String],
    settings: &[ChannelSettingRow],
) -> SendStates {
    let state_for = |channel: Channel| {
        let enabled = settings
            .iter()
            .find(|s| s.event_code == event_code && s.channel == channel.as_str())
            .map(|s| s.enabled)
            .unwrap_or(false);
        let already_sent = sent_channels.iter().any(|c| c == channel.as_str());
        ChannelState {
            enabled,
            already_sent,
        }
    };

    SendStates {
        email: state_for(Channel::Email),
        whatsapp: state_for(Channel::WhatsApp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SEND_MODE_MANUAL;
    use chrono::Utc;
    use uuid::Uuid;

    fn setting(event_code: &str, channel: &str, enabled: bool) -> ChannelSettingRow {
        ChannelSettingRow {
            channel_setting_id: Uuid::new_v4(),
            clinic_id: Uuid::new_v4(),
            event_code: event_code.to_string(),
            channel: channel.to_string(),
            enabled,
            send_mode: SEND_MODE_MANUAL,
            template_id: None,
            require_open_ticket: false,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_no_settings_means_all_disabled() {
        let states = resolve_send_states("appointment_created", &[], &[]);
        assert!(states.all_disabled());
        assert!(!states.email.enabled);
        assert!(!states.whatsapp.enabled);
        // All-disabled is not "all sent"
        assert!(!states.all_sent());
    }

    #[test]
    fn test_disabled_row_counts_as_disabled() {
        let settings = vec![setting("appointment_created", "email", false)];
        let states = resolve_send_states("appointment_created", &[], &settings);
        assert!(!states.email.enabled);
        assert!(states.all_disabled());
    }

    #[test]
    fn test_setting_for_other_event_code_does_not_apply() {
        let settings = vec![setting("appointment_canceled", "email", true)];
        let states = resolve_send_states("appointment_created", &[], &settings);
        assert!(states.all_disabled());
    }

    #[test]
    fn test_sent_channels_reported_as_already_sent() {
        let settings = vec![
            setting("appointment_created", "email", true),
            setting("appointment_created", "whatsapp", true),
        ];
        let sent = vec!["email".to_string()];
        let states = resolve_send_states("appointment_created", &sent, &settings);
        assert!(states.email.already_sent);
        assert!(!states.whatsapp.already_sent);
        assert!(!states.all_sent());
    }

    #[test]
    fn test_all_sent_only_counts_enabled_channels() {
        // whatsapp disabled, email enabled + sent => all_sent
        let settings = vec![
            setting("appointment_created", "email", true),
            setting("appointment_created", "whatsapp", false),
        ];
        let sent = vec!["email".to_string()];
        let states = resolve_send_states("appointment_created", &sent, &settings);
        assert!(states.all_sent());
    }

    #[test]
    fn test_sent_channel_survives_settings_being_turned_off() {
        // The send record is on the event; disabling the channel afterwards
        // must not erase already_sent.
        let settings = vec![setting("appointment_created", "email", false)];
        let sent = vec!["email".to_string()];
        let states = resolve_send_states("appointment_created", &sent, &settings);
        assert!(states.email.already_sent);
        assert!(!states.email.enabled);
    }
}
