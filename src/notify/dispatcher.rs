// src/notify/dispatcher.rs

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    AppState, ChannelSettingRow, EventRow, EVENT_STATUS_FAILED, EVENT_STATUS_PENDING,
    EVENT_STATUS_SENT, SEND_MODE_AUTOMATIC,
};
use crate::notify::resolver::{resolve_send_states, SendStates};
use crate::notify::template::{self, PatientContact};
use crate::notify::{Channel, OutboundMessage};

/// Result of one dispatch attempt, per channel. `skipped` lists requested
/// channels that were disabled or already sent (skipped silently, per the
/// manual-send contract).
#[derive(Debug, Default, Serialize)]
pub struct DispatchOutcome {
    pub sent: Vec<String>,
    pub failed: Vec<ChannelFailure>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ChannelFailure {
    pub channel: String,
    pub reason: String,
}

/// Requested channels that are enabled and not yet sent, in request order,
/// deduplicated. Disabled / already-sent channels drop out silently.
pub fn plan_channels(requested: &[Channel], states: &SendStates) -> Vec<Channel> {
    let mut plan: Vec<Channel> = Vec::new();
    for &ch in requested {
        if plan.contains(&ch) {
            continue;
        }
        let st = states.get(ch);
        if st.enabled && !st.already_sent {
            plan.push(ch);
        }
    }
    plan
}

/// Status after a dispatch attempt. Resolve/ignore statuses are terminal and
/// never re-derived here; routes guard against dispatching those events.
pub fn next_status(
    current: i16,
    sent_channels_after: &[String],
    had_failures: bool,
    states_after: &SendStates,
) -> i16 {
    if states_after.all_sent() {
        return EVENT_STATUS_SENT;
    }
    if sent_channels_after.is_empty() {
        if had_failures {
            return EVENT_STATUS_FAILED;
        }
        return current;
    }
    // Something has gone out but enabled channels remain unsent.
    EVENT_STATUS_PENDING
}

/// Merge this attempt into the per-channel error map: failures overwrite the
/// channel's entry, successes clear it.
pub fn merge_channel_errors(
    existing: &serde_json::Value,
    sent: &[String],
    failed: &[ChannelFailure],
) -> serde_json::Value {
    let mut map = existing
        .as_object()
        .cloned()
        .unwrap_or_default();
    for ch in sent {
        map.remove(ch);
    }
    for f in failed {
        map.insert(f.channel.clone(), serde_json::Value::String(f.reason.clone()));
    }
    serde_json::Value::Object(map)
}

pub async fn load_settings(
    db: &PgPool,
    clinic_id: Uuid,
    event_code: &str,
) -> Result<Vec<ChannelSettingRow>, sqlx::Error> {
    sqlx::query_as::<_, ChannelSettingRow>(
        r#"
        SELECT channel_setting_id, clinic_id, event_code, channel, enabled,
               send_mode, template_id, require_open_ticket, updated_at
        FROM channel_setting
        WHERE clinic_id = $1
          AND event_code = $2
        "#,
    )
    .bind(clinic_id)
    .bind(event_code)
    .fetch_all(db)
    .await
}

pub async fn has_open_ticket(
    db: &PgPool,
    clinic_id: Uuid,
    patient_id: Uuid,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1
            FROM support_ticket
            WHERE clinic_id = $1
              AND patient_id = $2
              AND status = 0
        )
        "#,
    )
    .bind(clinic_id)
    .bind(patient_id)
    .fetch_one(db)
    .await
}

async fn load_patient_contact(
    db: &PgPool,
    clinic_id: Uuid,
    patient_id: Uuid,
) -> Result<Option<PatientContact>, sqlx::Error> {
    sqlx::query_as::<_, PatientContact>(
        r#"
        SELECT first_name, last_name, email, whatsapp_number
        FROM patient
        WHERE patient_id = $1
          AND clinic_id = $2
        "#,
    )
    .bind(patient_id)
    .bind(clinic_id)
    .fetch_optional(db)
    .await
}

async fn load_clinic_name(db: &PgPool, clinic_id: Uuid) -> Result<String, sqlx::Error> {
    let name: Option<String> = sqlx::query_scalar(
        r#"
        SELECT clinic_name
        FROM clinic
        WHERE clinic_id = $1
        "#,
    )
    .bind(clinic_id)
    .fetch_optional(db)
    .await?;
    Ok(name.unwrap_or_else(|| "Clinic".to_string()))
}

/// Dispatch the requested channels for one event.
///
/// Each channel is attempted independently; one failure never blocks the
/// next. The event row is updated once at the end with the new
/// sent_channels, the merged error map, and the recomputed status.
pub async fn dispatch(
    state: &AppState,
    event: &EventRow,
    requested: &[Channel],
) -> Result<DispatchOutcome, sqlx::Error> {
    let settings = load_settings(&state.db, event.clinic_id, &event.event_code).await?;
    let states = resolve_send_states(&event.event_code, &event.sent_channels, &settings);

    let plan = plan_channels(requested, &states);

    let mut outcome = DispatchOutcome::default();
    for &ch in requested {
        let name = ch.as_str().to_string();
        if !plan.contains(&ch) && !outcome.skipped.contains(&name) {
            outcome.skipped.push(name);
        }
    }

    if plan.is_empty() {
        return Ok(outcome);
    }

    let clinic_name = load_clinic_name(&state.db, event.clinic_id).await?;
    let patient = match event.patient_id {
        Some(pid) => load_patient_contact(&state.db, event.clinic_id, pid).await?,
        None => None,
    };
    let vars = template::event_vars(event, patient.as_ref(), &clinic_name);

    for ch in plan {
        match attempt_channel(state, event, ch, &settings, patient.as_ref(), &vars).await {
            Ok(()) => outcome.sent.push(ch.as_str().to_string()),
            Err(reason) => {
                tracing::warn!(
                    event_id = %event.event_id,
                    channel = ch.as_str(),
                    reason = %reason,
                    "channel send failed"
                );
                outcome.failed.push(ChannelFailure {
                    channel: ch.as_str().to_string(),
                    reason,
                });
            }
        }
    }

    // Persist the attempt onto the event row.
    let mut sent_after = event.sent_channels.clone();
    for ch in &outcome.sent {
        if !sent_after.contains(ch) {
            sent_after.push(ch.clone());
        }
    }
    let errors_after = merge_channel_errors(&event.channel_errors, &outcome.sent, &outcome.failed);
    let states_after = resolve_send_states(&event.event_code, &sent_after, &settings);
    let status_after = next_status(
        event.status,
        &sent_after,
        !outcome.failed.is_empty(),
        &states_after,
    );

    sqlx::query(
        r#"
        UPDATE event_timeline
        SET sent_channels = $1,
            channel_errors = $2,
            status = $3,
            updated_at = now()
        WHERE event_id = $4
        "#,
    )
    .bind(&sent_after)
    .bind(&errors_after)
    .bind(status_after)
    .bind(event.event_id)
    .execute(&state.db)
    .await?;

    Ok(outcome)
}

/// One channel: template, recipient address, render, send. Returns the
/// failure reason as a plain string for the event's error map.
async fn attempt_channel(
    state: &AppState,
    event: &EventRow,
    channel: Channel,
    settings: &[ChannelSettingRow],
    patient: Option<&PatientContact>,
    vars: &[(String, String)],
) -> Result<(), String> {
    let setting = settings
        .iter()
        .find(|s| s.event_code == event.event_code && s.channel == channel.as_str());

    let template_override = setting.and_then(|s| s.template_id);
    let tpl = template::resolve_template(
        &state.db,
        event.clinic_id,
        &event.event_code,
        channel,
        template_override,
    )
    .await
    .map_err(|e| format!("db error: {e}"))?
    .ok_or_else(|| {
        format!(
            "no active template for {} / {}",
            event.event_code,
            channel.as_str()
        )
    })?;

    let to = match channel {
        Channel::Email => patient
            .and_then(|p| p.email.clone())
            .ok_or_else(|| "patient has no email address".to_string())?,
        Channel::WhatsApp => patient
            .and_then(|p| p.whatsapp_number.clone())
            .ok_or_else(|| "patient has no whatsapp number".to_string())?,
    };

    let msg = OutboundMessage {
        to,
        subject: tpl.subject.as_deref().map(|s| template::render(s, vars)),
        body: template::render(&tpl.body, vars),
    };

    let sender = state
        .senders
        .get(channel)
        .ok_or_else(|| format!("{} channel is not configured", channel.as_str()))?;

    sender.send(&msg).await.map_err(|e| e.to_string())
}

/// Automatic path, invoked after the domain transaction that recorded the
/// event commits. Picks the channels with send_mode = automatic (WhatsApp
/// additionally gated on an open support ticket when configured) and runs
/// the shared dispatch. Callers swallow the returned error; messaging is
/// best-effort and must never fail the domain action.
pub async fn auto_dispatch(state: &AppState, event_id: Uuid) -> anyhow::Result<DispatchOutcome> {
    let event: Option<EventRow> = sqlx::query_as::<_, EventRow>(
        r#"
        SELECT event_id, clinic_id, event_code, category, patient_id,
               appointment_id, form_instance_id, occurred_at, status, channels,
               sent_channels, channel_errors, variables, patient_name,
               appointment_start_at, resolved_by_user_id, created_at, updated_at
        FROM event_timeline
        WHERE event_id = $1
        "#,
    )
    .bind(event_id)
    .fetch_optional(&state.db)
    .await?;

    let Some(event) = event else {
        anyhow::bail!("event {event_id} not found");
    };
    if event.status != EVENT_STATUS_PENDING {
        return Ok(DispatchOutcome::default());
    }

    let settings = load_settings(&state.db, event.clinic_id, &event.event_code).await?;

    let mut channels: Vec<Channel> = Vec::new();
    for ch in Channel::ALL {
        let Some(setting) = settings
            .iter()
            .find(|s| s.channel == ch.as_str() && s.enabled && s.send_mode == SEND_MODE_AUTOMATIC)
        else {
            continue;
        };
        if event.sent_channels.iter().any(|c| c == ch.as_str()) {
            continue;
        }
        if ch == Channel::WhatsApp && setting.require_open_ticket {
            let Some(patient_id) = event.patient_id else {
                continue;
            };
            if !has_open_ticket(&state.db, event.clinic_id, patient_id).await? {
                tracing::info!(
                    event_id = %event_id,
                    "whatsapp auto-send withheld: no open ticket"
                );
                continue;
            }
        }
        channels.push(ch);
    }

    if channels.is_empty() {
        return Ok(DispatchOutcome::default());
    }

    let outcome = dispatch(state, &event, &channels).await?;
    tracing::info!(
        event_id = %event_id,
        sent = ?outcome.sent,
        failed = outcome.failed.len(),
        "automatic dispatch finished"
    );
    Ok(outcome)
}

/// Fire-and-forget wrapper the domain routes call right after commit.
pub async fn auto_dispatch_best_effort(state: &AppState, event_id: Uuid) {
    if let Err(e) = auto_dispatch(state, event_id).await {
        tracing::warn!(event_id = %event_id, error = %e, "automatic dispatch failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChannelSettingRow, SEND_MODE_MANUAL};
    use chrono::Utc;

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

    fn states(
        event_code: &str,
        sent: &[&str],
        settings: &[ChannelSettingRow],
    ) -> SendStates {
        let sent: Vec<String> = sent.iter().map(|s| s.to_string()).collect();
        resolve_send_states(event_code, &sent, settings)
    }

    #[test]
    fn test_plan_skips_disabled_and_sent_channels() {
        let settings = vec![
            setting("appointment_created", "email", true),
            setting("appointment_created", "whatsapp", false),
        ];
        let st = states("appointment_created", &[], &settings);
        let plan = plan_channels(&[Channel::Email, Channel::WhatsApp], &st);
        assert_eq!(plan, vec![Channel::Email]);

        let st = states("appointment_created", &["email"], &settings);
        let plan = plan_channels(&[Channel::Email, Channel::WhatsApp], &st);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_plan_dedupes_request() {
        let settings = vec![setting("appointment_created", "email", true)];
        let st = states("appointment_created", &[], &settings);
        let plan = plan_channels(&[Channel::Email, Channel::Email], &st);
        assert_eq!(plan, vec![Channel::Email]);
    }

    #[test]
    fn test_plan_empty_when_no_settings_exist() {
        let st = states("appointment_created", &[], &[]);
        let plan = plan_channels(&[Channel::Email, Channel::WhatsApp], &st);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_status_sent_when_all_enabled_channels_sent() {
        let settings = vec![
            setting("appointment_created", "email", true),
            setting("appointment_created", "whatsapp", false),
        ];
        let sent = vec!["email".to_string()];
        let st = states("appointment_created", &["email"], &settings);
        assert_eq!(
            next_status(EVENT_STATUS_PENDING, &sent, false, &st),
            EVENT_STATUS_SENT
        );
    }

    #[test]
    fn test_status_pending_while_enabled_channels_remain() {
        let settings = vec![
            setting("appointment_created", "email", true),
            setting("appointment_created", "whatsapp", true),
        ];
        let sent = vec!["email".to_string()];
        let st = states("appointment_created", &["email"], &settings);
        assert_eq!(
            next_status(EVENT_STATUS_PENDING, &sent, true, &st),
            EVENT_STATUS_PENDING
        );
    }

    #[test]
    fn test_status_failed_when_nothing_ever_sent() {
        let settings = vec![setting("appointment_created", "email", true)];
        let st = states("appointment_created", &[], &settings);
        assert_eq!(
            next_status(EVENT_STATUS_PENDING, &[], true, &st),
            EVENT_STATUS_FAILED
        );
    }

    #[test]
    fn test_status_unchanged_when_nothing_attempted() {
        let st = states("appointment_created", &[], &[]);
        assert_eq!(
            next_status(EVENT_STATUS_PENDING, &[], false, &st),
            EVENT_STATUS_PENDING
        );
    }

    #[test]
    fn test_merge_errors_failures_overwrite_successes_clear() {
        let existing = serde_json::json!({"email": "smtp timeout"});
        let failed = vec![ChannelFailure {
            channel: "whatsapp".to_string(),
            reason: "HTTP 500".to_string(),
        }];
        let merged = merge_channel_errors(&existing, &["email".to_string()], &failed);
        assert!(merged.get("email").is_none());
        assert_eq!(merged["whatsapp"], "HTTP 500");
    }
}
