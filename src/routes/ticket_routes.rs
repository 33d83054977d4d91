// src/routes/ticket_routes.rs
//
// Support tickets model the "open conversation" state the WhatsApp
// require_open_ticket gate checks before an automatic send.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::AppState,
};

pub const TICKET_STATUS_OPEN: i16 = 0;
pub const TICKET_STATUS_CLOSED: i16 = 1;

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
        .route(
            "/patients/{patient_id}/tickets",
            get(list_tickets).post(open_ticket),
        )
        .route("/tickets/{ticket_id}/close", post(close_ticket))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TicketRow {
    pub ticket_id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub status: i16,
    pub subject: Option<String>,
    pub opened_by_user_id: Uuid,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

const TICKET_COLUMNS: &str = r#"
    ticket_id, clinic_id, patient_id, status, subject,
    opened_by_user_id, opened_at, closed_at
"#;

pub async fn list_tickets(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Vec<TicketRow>>, ApiError> {
    ensure_staff(&auth)?;

    let rows: Vec<TicketRow> = sqlx::query_as::<_, TicketRow>(&format!(
        r#"
        SELECT {TICKET_COLUMNS}
        FROM support_ticket
        WHERE clinic_id = $1
          AND patient_id = $2
        ORDER BY opened_at DESC
        "#,
    ))
    .bind(auth.clinic_id)
    .bind(patient_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct OpenTicketRequest {
    pub subject: Option<String>,
}

pub async fn open_ticket(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
    Json(req): Json<OpenTicketRequest>,
) -> Result<Json<TicketRow>, ApiError> {
    ensure_staff(&auth)?;

    let patient_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM patient
            WHERE patient_id = $1 AND clinic_id = $2
        )
        "#,
    )
    .bind(patient_id)
    .bind(auth.clinic_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if !patient_exists {
        return Err(ApiError::NotFound("NOT_FOUND", "patient not found".into()));
    }

    // One open ticket per patient is enough for the send gate.
    let already_open: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM support_ticket
            WHERE clinic_id = $1 AND patient_id = $2 AND status = 0
        )
        "#,
    )
    .bind(auth.clinic_id)
    .bind(patient_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if already_open {
        return Err(ApiError::Conflict(
            "CONFLICT",
            "patient already has an open ticket".into(),
        ));
    }

    let row: TicketRow = sqlx::query_as::<_, TicketRow>(&format!(
        r#"
        INSERT INTO support_ticket (clinic_id, patient_id, status, subject, opened_by_user_id)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {TICKET_COLUMNS}
        "#,
    ))
    .bind(auth.clinic_id)
    .bind(patient_id)
    .bind(TICKET_STATUS_OPEN)
    .bind(req.subject.as_deref().map(str::trim))
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(row))
}

pub async fn close_ticket(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<TicketRow>, ApiError> {
    ensure_staff(&auth)?;

    let row: TicketRow = sqlx::query_as::<_, TicketRow>(&format!(
        r#"
        UPDATE support_ticket
        SET status = $3,
            closed_at = now()
        WHERE ticket_id = $1
          AND clinic_id = $2
          AND status = $4
        RETURNING {TICKET_COLUMNS}
        "#,
    ))
    .bind(ticket_id)
    .bind(auth.clinic_id)
    .bind(TICKET_STATUS_CLOSED)
    .bind(TICKET_STATUS_OPEN)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::BadRequest("INVALID_STATE", "ticket not found or already closed".into()))?;

    Ok(Json(row))
}
