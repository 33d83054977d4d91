// src/routes/channel_setting_routes.rs

use axum::{
    extract::State,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, ChannelSettingRow, SEND_MODE_AUTOMATIC, SEND_MODE_MANUAL},
    notify::{codes, Channel},
};

fn ensure_admin_or_manager(auth: &AuthContext) -> Result<(), ApiError> {
    // roles: 1 admin, 2 manager
    if auth.role == 1 || auth.role == 2 {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only admin/manager can configure notifications".into(),
        ))
    }
}

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
        .route("/channel_settings", get(list_settings))
        .route("/channel_settings", put(upsert_setting))
}

#[derive(Debug, Serialize)]
pub struct SettingsListResponse {
    pub data: Vec<ChannelSettingRow>,
}

pub async fn list_settings(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<SettingsListResponse>, ApiError> {
    ensure_staff(&auth)?;

    let rows: Vec<ChannelSettingRow> = sqlx::query_as::<_, ChannelSettingRow>(
        r#"
        SELECT channel_setting_id, clinic_id, event_code, channel, enabled,
               send_mode, template_id, require_open_ticket, updated_at
        FROM channel_setting
        WHERE clinic_id = $1
        ORDER BY event_code ASC, channel ASC
        "#,
    )
    .bind(auth.clinic_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(SettingsListResponse { data: rows }))
}

#[derive(Debug, Deserialize)]
pub struct UpsertSettingRequest {
    pub event_code: String,
    pub channel: String,
    pub enabled: bool,
    pub send_mode: i16,
    pub template_id: Option<Uuid>,
    pub require_open_ticket: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct SettingResponse {
    pub data: ChannelSettingRow,
}

pub async fn upsert_setting(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UpsertSettingRequest>,
) -> Result<Json<SettingResponse>, ApiError> {
    ensure_admin_or_manager(&auth)?;

    if !codes::is_known_code(&req.event_code) {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            format!("unknown event_code: {}", req.event_code),
        ));
    }
    let channel = Channel::parse(&req.channel).ok_or_else(|| {
        ApiError::BadRequest(
            "VALIDATION_ERROR",
            format!("unknown channel: {}", req.channel),
        )
    })?;
    if req.send_mode != SEND_MODE_MANUAL && req.send_mode != SEND_MODE_AUTOMATIC {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "send_mode must be 0 (manual) or 1 (automatic)".into(),
        ));
    }

    let require_open_ticket = req.require_open_ticket.unwrap_or(false);
    if require_open_ticket && channel != Channel::WhatsApp {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "require_open_ticket only applies to the whatsapp channel".into(),
        ));
    }

    // A selected template must be visible to this clinic, active, and built
    // for the same (event_code, channel) pair.
    if let Some(template_id) = req.template_id {
        let valid: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1
                FROM message_template
                WHERE template_id = $1
                  AND (clinic_id = $2 OR clinic_id IS NULL)
                  AND event_code = $3
                  AND channel = $4
                  AND is_active = true
            )
            "#,
        )
        .bind(template_id)
        .bind(auth.clinic_id)
        .bind(&req.event_code)
        .bind(channel.as_str())
        .fetch_one(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

        if !valid {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "template_id does not match this event/channel or is inactive".into(),
            ));
        }
    }

    let row: ChannelSettingRow = sqlx::query_as::<_, ChannelSettingRow>(
        r#"
        INSERT INTO channel_setting
            (clinic_id, event_code, channel, enabled, send_mode, template_id, require_open_ticket)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (clinic_id, event_code, channel)
        DO UPDATE SET
            enabled = EXCLUDED.enabled,
            send_mode = EXCLUDED.send_mode,
            template_id = EXCLUDED.template_id,
            require_open_ticket = EXCLUDED.require_open_ticket,
            updated_at = now()
        RETURNING channel_setting_id, clinic_id, event_code, channel, enabled,
                  send_mode, template_id, require_open_ticket, updated_at
        "#,
    )
    .bind(auth.clinic_id)
    .bind(&req.event_code)
    .bind(channel.as_str())
    .bind(req.enabled)
    .bind(req.send_mode)
    .bind(req.template_id)
    .bind(require_open_ticket)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(SettingResponse { data: row }))
}
