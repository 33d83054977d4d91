// src/notify/recorder.rs

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::models::EVENT_STATUS_PENDING;
use crate::notify::codes;

/// Everything the recorder needs to insert one timeline row. Callers pass
/// the denormalized display fields they already have in hand (patient name,
/// appointment start) instead of the recorder re-querying them.
#[derive(Debug)]
pub struct NewEvent {
    pub clinic_id: Uuid,
    pub event_code: &'static str,
    pub patient_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    pub form_instance_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
    pub variables: serde_json::Value,
    pub patient_name: Option<String>,
    pub appointment_start_at: Option<DateTime<Utc>>,
}

/// Insert one immutable event row. Runs on the caller's connection so the
/// event commits atomically with the domain action that caused it.
///
/// The `channels` column is a display snapshot of the channels enabled at
/// record time; send decisions always recompute from live settings.
pub async fn record_event(conn: &mut PgConnection, ev: NewEvent) -> Result<Uuid, sqlx::Error> {
    let enabled_channels: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT channel
        FROM channel_setting
        WHERE clinic_id = $1
          AND event_code = $2
          AND enabled = true
        ORDER BY channel
        "#,
    )
    .bind(ev.clinic_id)
    .bind(ev.event_code)
    .fetch_all(&mut *conn)
    .await?;

    let event_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO event_timeline (
          clinic_id,
          event_code,
          category,
          patient_id,
          appointment_id,
          form_instance_id,
          occurred_at,
          status,
          channels,
          sent_channels,
          channel_errors,
          variables,
          patient_name,
          appointment_start_at
        )
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9, '{}', '{}'::jsonb, $10, $11, $12)
        RETURNING event_id
        "#,
    )
    .bind(ev.clinic_id)
    .bind(ev.event_code)
    .bind(codes::category_for(ev.event_code))
    .bind(ev.patient_id)
    .bind(ev.appointment_id)
    .bind(ev.form_instance_id)
    .bind(ev.occurred_at)
    .bind(EVENT_STATUS_PENDING)
    .bind(&enabled_channels)
    .bind(&ev.variables)
    .bind(ev.patient_name.as_deref())
    .bind(ev.appointment_start_at)
    .fetch_one(&mut *conn)
    .await?;

    tracing::info!(
        event_id = %event_id,
        event_code = ev.event_code,
        "timeline event recorded"
    );

    Ok(event_id)
}
