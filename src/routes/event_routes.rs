// src/routes/event_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::QueryBuilder;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{
        AppState, ChannelSettingRow, EventRow, EVENT_STATUS_COMPLETED_WITHOUT_SEND,
        EVENT_STATUS_FAILED, EVENT_STATUS_IGNORED, EVENT_STATUS_PENDING, EVENT_STATUS_SENT,
    },
    notify::{
        codes,
        dispatcher::{self, DispatchOutcome},
        resolver::{resolve_send_states, ChannelState},
        Channel,
    },
};

fn ensure_staff(auth: &AuthContext) -> Result<(), ApiError> {
    if auth.role == 0 {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Staff account required".into(),
        ));
    }
    Ok(())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/events", get(list_events))
        .route("/events/{event_id}", get(get_event))
        .route("/events/{event_id}/send", post(send_event))
        .route("/events/{event_id}/resolve", post(resolve_event))
        .route("/events/{event_id}/ignore", post(ignore_event))
}

/* ============================================================
   DTOs
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

/// Channel state recomputed from the clinic's current settings on every
/// read; the event row itself never caches it.
#[derive(Debug, Serialize)]
pub struct ChannelStatesDto {
    pub email: ChannelState,
    pub whatsapp: ChannelState,
    pub all_disabled: bool,
    pub all_sent: bool,
}

#[derive(Debug, Serialize)]
pub struct EventDto {
    #[serde(flatten)]
    pub event: EventRow,
    pub channel_states: ChannelStatesDto,
}

fn with_states(event: EventRow, settings: &[ChannelSettingRow]) -> EventDto {
    let states = resolve_send_states(&event.event_code, &event.sent_channels, settings);
    EventDto {
        channel_states: ChannelStatesDto {
            email: states.email,
            whatsapp: states.whatsapp,
            all_disabled: states.all_disabled(),
            all_sent: states.all_sent(),
        },
        event,
    }
}

const EVENT_COLUMNS: &str = r#"
    event_id, clinic_id, event_code, category, patient_id, appointment_id,
    form_instance_id, occurred_at, status, channels, sent_channels,
    channel_errors, variables, patient_name, appointment_start_at,
    resolved_by_user_id, created_at, updated_at
"#;

async fn fetch_event(
    state: &AppState,
    clinic_id: Uuid,
    event_id: Uuid,
) -> Result<EventRow, ApiError> {
    sqlx::query_as::<_, EventRow>(&format!(
        r#"
        SELECT {EVENT_COLUMNS}
        FROM event_timeline
        WHERE event_id = $1
          AND clinic_id = $2
        "#,
    ))
    .bind(event_id)
    .bind(clinic_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "event not found".into()))
}

async fn load_all_settings(
    state: &AppState,
    clinic_id: Uuid,
) -> Result<Vec<ChannelSettingRow>, ApiError> {
    sqlx::query_as::<_, ChannelSettingRow>(
        r#"
        SELECT channel_setting_id, clinic_id, event_code, channel, enabled,
               send_mode, template_id, require_open_ticket, updated_at
        FROM channel_setting
        WHERE clinic_id = $1
        "#,
    )
    .bind(clinic_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))
}

/* ============================================================
   GET /events  (view=pending|completed|all + filters)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct EventListQuery {
    pub view: Option<String>,
    pub patient_id: Option<Uuid>,
    pub event_code: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_events(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<EventListQuery>,
) -> Result<Json<ApiOk<Vec<EventDto>>>, ApiError> {
    ensure_staff(&auth)?;

    let view = q.view.as_deref().unwrap_or("all");
    // pending = needs operator attention (includes failed attempts);
    // completed = sent, resolved or ignored.
    let status_filter: Option<Vec<i16>> = match view {
        "pending" => Some(vec![EVENT_STATUS_PENDING, EVENT_STATUS_FAILED]),
        "completed" => Some(vec![
            EVENT_STATUS_SENT,
            EVENT_STATUS_COMPLETED_WITHOUT_SEND,
            EVENT_STATUS_IGNORED,
        ]),
        "all" => None,
        _ => {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "view must be pending, completed or all".into(),
            ))
        }
    };

    if let Some(code) = q.event_code.as_deref() {
        if !codes::is_known_code(code) {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                format!("unknown event_code: {code}"),
            ));
        }
    }

    let limit = q.limit.unwrap_or(50).clamp(1, 200);
    let offset = q.offset.unwrap_or(0).max(0);

    let mut qb: QueryBuilder<sqlx::Postgres> =
        QueryBuilder::new(format!("SELECT {EVENT_COLUMNS} FROM event_timeline "));
    qb.push(" WHERE clinic_id = ");
    qb.push_bind(auth.clinic_id);

    if let Some(statuses) = status_filter {
        qb.push(" AND status = ANY(");
        qb.push_bind(statuses);
        qb.push(") ");
    }
    if let Some(pid) = q.patient_id {
        qb.push(" AND patient_id = ");
        qb.push_bind(pid);
    }
    if let Some(code) = q.event_code {
        qb.push(" AND event_code = ");
        qb.push_bind(code);
    }
    if let Some(from) = q.from {
        qb.push(" AND occurred_at >= ");
        qb.push_bind(from);
    }
    if let Some(to) = q.to {
        qb.push(" AND occurred_at <= ");
        qb.push_bind(to);
    }

    qb.push(" ORDER BY occurred_at DESC ");
    qb.push(" LIMIT ");
    qb.push_bind(limit);
    qb.push(" OFFSET ");
    qb.push_bind(offset);

    let rows: Vec<EventRow> = qb
        .build_query_as::<EventRow>()
        .fetch_all(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let settings = load_all_settings(&state, auth.clinic_id).await?;
    let dtos = rows
        .into_iter()
        .map(|ev| with_states(ev, &settings))
        .collect();

    Ok(Json(ApiOk { data: dtos }))
}

/* ============================================================
   GET /events/{id}
   ============================================================ */

pub async fn get_event(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(event_id): Path<Uuid>,
) -> Result<Json<ApiOk<EventDto>>, ApiError> {
    ensure_staff(&auth)?;

    let event = fetch_event(&state, auth.clinic_id, event_id).await?;
    let settings = load_all_settings(&state, auth.clinic_id).await?;
    Ok(Json(ApiOk {
        data: with_states(event, &settings),
    }))
}

/* ============================================================
   POST /events/{id}/send  (manual dispatch)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct SendEventRequest {
    pub channels: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SendEventData {
    pub outcome: DispatchOutcome,
    pub event: EventDto,
}

pub async fn send_event(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(event_id): Path<Uuid>,
    Json(req): Json<SendEventRequest>,
) -> Result<Json<ApiOk<SendEventData>>, ApiError> {
    ensure_staff(&auth)?;

    if req.channels.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "channels cannot be empty".into(),
        ));
    }

    let mut channels: Vec<Channel> = Vec::with_capacity(req.channels.len());
    for raw in &req.channels {
        let ch = Channel::parse(raw).ok_or_else(|| {
            ApiError::BadRequest("VALIDATION_ERROR", format!("unknown channel: {raw}"))
        })?;
        channels.push(ch);
    }

    let event = fetch_event(&state, auth.clinic_id, event_id).await?;

    if event.status == EVENT_STATUS_COMPLETED_WITHOUT_SEND
        || event.status == EVENT_STATUS_IGNORED
    {
        return Err(ApiError::BadRequest(
            "INVALID_STATE",
            "event is already resolved".into(),
        ));
    }

    let outcome = dispatcher::dispatch(&state, &event, &channels)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let refreshed = fetch_event(&state, auth.clinic_id, event_id).await?;
    let settings = load_all_settings(&state, auth.clinic_id).await?;

    Ok(Json(ApiOk {
        data: SendEventData {
            outcome,
            event: with_states(refreshed, &settings),
        },
    }))
}

/* ============================================================
   POST /events/{id}/resolve + /ignore
   ============================================================ */

/// "Handled outside the system" (e.g. the patient was phoned). Always lands
/// on completed-without-send, whatever the channel state is.
pub async fn resolve_event(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(event_id): Path<Uuid>,
) -> Result<Json<ApiOk<EventDto>>, ApiError> {
    ensure_staff(&auth)?;

    let row: Option<EventRow> = sqlx::query_as::<_, EventRow>(&format!(
        r#"
        UPDATE event_timeline
        SET status = $1,
            resolved_by_user_id = $2,
            updated_at = now()
        WHERE event_id = $3
          AND clinic_id = $4
        RETURNING {EVENT_COLUMNS}
        "#,
    ))
    .bind(EVENT_STATUS_COMPLETED_WITHOUT_SEND)
    .bind(auth.user_id)
    .bind(event_id)
    .bind(auth.clinic_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let Some(event) = row else {
        return Err(ApiError::NotFound("NOT_FOUND", "event not found".into()));
    };

    let settings = load_all_settings(&state, auth.clinic_id).await?;
    Ok(Json(ApiOk {
        data: with_states(event, &settings),
    }))
}

pub async fn ignore_event(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(event_id): Path<Uuid>,
) -> Result<Json<ApiOk<EventDto>>, ApiError> {
    ensure_staff(&auth)?;

    let row: Option<EventRow> = sqlx::query_as::<_, EventRow>(&format!(
        r#"
        UPDATE event_timeline
        SET status = $1,
            resolved_by_user_id = $2,
            updated_at = now()
        WHERE event_id = $3
          AND clinic_id = $4
          AND status = ANY($5)
        RETURNING {EVENT_COLUMNS}
        "#,
    ))
    .bind(EVENT_STATUS_IGNORED)
    .bind(auth.user_id)
    .bind(event_id)
    .bind(auth.clinic_id)
    .bind(vec![EVENT_STATUS_PENDING, EVENT_STATUS_FAILED])
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let Some(event) = row else {
        return Err(ApiError::BadRequest(
            "INVALID_STATE",
            "event not found or not ignorable".into(),
        ));
    };

    let settings = load_all_settings(&state, auth.clinic_id).await?;
    Ok(Json(ApiOk {
        data: with_states(event, &settings),
    }))
}
