// src/routes/appointment_routes.rs

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
    models::AppState,
    notify::{codes, dispatcher, recorder::{record_event, NewEvent}},
};

/*
Appointment status:
0 scheduled
1 completed
2 canceled
3 no-show
*/

pub const STATUS_SCHEDULED: i16 = 0;
pub const STATUS_COMPLETED: i16 = 1;
pub const STATUS_CANCELED: i16 = 2;
pub const STATUS_NO_SHOW: i16 = 3;

fn is_admin(auth: &AuthContext) -> bool {
    auth.role == 1
}
fn is_manager(auth: &AuthContext) -> bool {
    auth.role == 2
}
fn is_receptionist(auth: &AuthContext) -> bool {
    auth.role == 4
}

fn can_manage_appointments(auth: &AuthContext) -> bool {
    is_admin(auth) || is_manager(auth) || is_receptionist(auth)
}

fn ensure_manage(auth: &AuthContext) -> Result<(), ApiError> {
    if can_manage_appointments(auth) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only admin/manager/receptionist can manage appointments".into(),
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
        .route("/appointments", post(create_appointment).get(list_appointments))
        .route("/appointments/{appointment_id}", get(get_appointment).patch(patch_appointment))
        .route("/appointments/{appointment_id}/cancel", post(mark_canceled))
        .route("/appointments/{appointment_id}/complete", post(mark_completed))
        .route("/appointments/{appointment_id}/no_show", post(mark_no_show))
}

/* ============================================================
   DTOs
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AppointmentDto {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub register_number: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: i16,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const APPOINTMENT_SELECT: &str = r#"
    SELECT
      a.appointment_id,
      a.patient_id,
      p.first_name || ' ' || p.last_name AS patient_name,
      p.register_number,
      a.start_at,
      a.end_at,
      a.status,
      a.note,
      a.created_at,
      a.updated_at
    FROM appointment a
    JOIN patient p ON p.patient_id = a.patient_id
"#;

async fn fetch_appointment(
    state: &AppState,
    clinic_id: Uuid,
    appointment_id: Uuid,
) -> Result<AppointmentDto, ApiError> {
    sqlx::query_as::<_, AppointmentDto>(&format!(
        r#"
        {APPOINTMENT_SELECT}
        WHERE a.appointment_id = $1
          AND a.clinic_id = $2
        "#,
    ))
    .bind(appointment_id)
    .bind(clinic_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "appointment not found".into()))
}

/* ============================================================
   GET /appointments (range + patient filters)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub patient_id: Option<Uuid>,
    pub status: Option<i16>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<ApiOk<Vec<AppointmentDto>>>, ApiError> {
    ensure_staff(&auth)?;

    if let Some(s) = q.status {
        if !(0..=3).contains(&s) {
            return Err(ApiError::BadRequest("VALIDATION_ERROR", "invalid status".into()));
        }
    }

    let limit = q.limit.unwrap_or(100).clamp(1, 500);
    let offset = q.offset.unwrap_or(0).max(0);

    let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(APPOINTMENT_SELECT);
    qb.push(" WHERE a.clinic_id = ");
    qb.push_bind(auth.clinic_id);

    if let Some(from) = q.from {
        qb.push(" AND a.start_at >= ");
        qb.push_bind(from);
    }
    if let Some(to) = q.to {
        qb.push(" AND a.start_at < ");
        qb.push_bind(to);
    }
    if let Some(pid) = q.patient_id {
        qb.push(" AND a.patient_id = ");
        qb.push_bind(pid);
    }
    if let Some(s) = q.status {
        qb.push(" AND a.status = ");
        qb.push_bind(s);
    }

    qb.push(" ORDER BY a.start_at ASC ");
    qb.push(" LIMIT ");
    qb.push_bind(limit);
    qb.push(" OFFSET ");
    qb.push_bind(offset);

    let rows: Vec<AppointmentDto> = qb
        .build_query_as::<AppointmentDto>()
        .fetch_all(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(ApiOk { data: rows }))
}

/* ============================================================
   GET /appointments/{id}
   ============================================================ */

pub async fn get_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    ensure_staff(&auth)?;
    let dto = fetch_appointment(&state, auth.clinic_id, appointment_id).await?;
    Ok(Json(ApiOk { data: dto }))
}

/* ============================================================
   POST /appointments (create)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub note: Option<String>,
}

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    ensure_manage(&auth)?;

    if req.end_at <= req.start_at {
        return Err(ApiError::BadRequest("VALIDATION_ERROR", "end_at must be > start_at".into()));
    }

    #[derive(sqlx::FromRow)]
    struct PatientBriefRow {
        first_name: String,
        last_name: String,
    }

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    // Patient must belong to the caller's clinic.
    let patient: PatientBriefRow = sqlx::query_as::<_, PatientBriefRow>(
        r#"
        SELECT first_name, last_name
        FROM patient
        WHERE patient_id = $1
          AND clinic_id = $2
        "#,
    )
    .bind(req.patient_id)
    .bind(auth.clinic_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "patient not found".into()))?;

    let appointment_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO appointment (
          clinic_id,
          patient_id,
          start_at,
          end_at,
          status,
          note,
          created_by_user_id,
          updated_by_user_id
        )
        VALUES ($1,$2,$3,$4, 0, $5, $6, $6)
        RETURNING appointment_id
        "#,
    )
    .bind(auth.clinic_id)
    .bind(req.patient_id)
    .bind(req.start_at)
    .bind(req.end_at)
    .bind(req.note)
    .bind(auth.user_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| ApiError::BadRequest("APPOINTMENT_CREATE_FAILED", format!("{e}")))?;

    let event_id = record_event(
        &mut *tx,
        NewEvent {
            clinic_id: auth.clinic_id,
            event_code: codes::APPOINTMENT_CREATED,
            patient_id: Some(req.patient_id),
            appointment_id: Some(appointment_id),
            form_instance_id: None,
            occurred_at: Utc::now(),
            variables: serde_json::json!({}),
            patient_name: Some(format!("{} {}", patient.first_name, patient.last_name)),
            appointment_start_at: Some(req.start_at),
        },
    )
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    dispatcher::auto_dispatch_best_effort(&state, event_id).await;

    let dto = fetch_appointment(&state, auth.clinic_id, appointment_id).await?;
    Ok(Json(ApiOk { data: dto }))
}

/* ============================================================
   PATCH /appointments/{id} (reschedule / edit note)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct PatchAppointmentRequest {
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub note: Option<Option<String>>,
}

pub async fn patch_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<PatchAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    ensure_manage(&auth)?;

    let existing = fetch_appointment(&state, auth.clinic_id, appointment_id).await?;

    let start_at = req.start_at.unwrap_or(existing.start_at);
    let end_at = req.end_at.unwrap_or(existing.end_at);
    if end_at <= start_at {
        return Err(ApiError::BadRequest("VALIDATION_ERROR", "end_at must be > start_at".into()));
    }

    let rescheduled =
        (start_at != existing.start_at || end_at != existing.end_at)
            && existing.status == STATUS_SCHEDULED;

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    sqlx::query(
        r#"
        UPDATE appointment
        SET start_at = $1,
            end_at = $2,
            note = COALESCE($3, note),
            updated_at = now(),
            updated_by_user_id = $4
        WHERE appointment_id = $5
          AND clinic_id = $6
        "#,
    )
    .bind(start_at)
    .bind(end_at)
    .bind(req.note.unwrap_or(None))
    .bind(auth.user_id)
    .bind(appointment_id)
    .bind(auth.clinic_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| ApiError::BadRequest("APPOINTMENT_UPDATE_FAILED", format!("{e}")))?;

    let mut event_id = None;
    if rescheduled {
        let id = record_event(
            &mut *tx,
            NewEvent {
                clinic_id: auth.clinic_id,
                event_code: codes::APPOINTMENT_RESCHEDULED,
                patient_id: Some(existing.patient_id),
                appointment_id: Some(appointment_id),
                form_instance_id: None,
                occurred_at: Utc::now(),
                variables: serde_json::json!({
                    "previous_date": existing.start_at.format("%Y-%m-%d").to_string(),
                    "previous_time": existing.start_at.format("%H:%M").to_string(),
                }),
                patient_name: Some(existing.patient_name.clone()),
                appointment_start_at: Some(start_at),
            },
        )
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
        event_id = Some(id);
    }

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if let Some(event_id) = event_id {
        dispatcher::auto_dispatch_best_effort(&state, event_id).await;
    }

    let dto = fetch_appointment(&state, auth.clinic_id, appointment_id).await?;
    Ok(Json(ApiOk { data: dto }))
}

/* ============================================================
   Status transitions (each records its timeline event)
   ============================================================ */

async fn transition(
    state: AppState,
    auth: AuthContext,
    appointment_id: Uuid,
    new_status: i16,
    event_code: &'static str,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    ensure_manage(&auth)?;

    let existing = fetch_appointment(&state, auth.clinic_id, appointment_id).await?;

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    // Only a scheduled appointment can transition; repeat calls would
    // otherwise record duplicate timeline events.
    let res = sqlx::query(
        r#"
        UPDATE appointment
        SET status = $1,
            updated_at = now(),
            updated_by_user_id = $2
        WHERE appointment_id = $3
          AND clinic_id = $4
          AND status = 0
        "#,
    )
    .bind(new_status)
    .bind(auth.user_id)
    .bind(appointment_id)
    .bind(auth.clinic_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| ApiError::BadRequest("APPOINTMENT_UPDATE_FAILED", format!("{e}")))?;

    if res.rows_affected() == 0 {
        return Err(ApiError::BadRequest(
            "INVALID_STATE",
            "appointment is not in scheduled state".into(),
        ));
    }

    let event_id = record_event(
        &mut *tx,
        NewEvent {
            clinic_id: auth.clinic_id,
            event_code,
            patient_id: Some(existing.patient_id),
            appointment_id: Some(appointment_id),
            form_instance_id: None,
            occurred_at: Utc::now(),
            variables: serde_json::json!({}),
            patient_name: Some(existing.patient_name.clone()),
            appointment_start_at: Some(existing.start_at),
        },
    )
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    dispatcher::auto_dispatch_best_effort(&state, event_id).await;

    let dto = fetch_appointment(&state, auth.clinic_id, appointment_id).await?;
    Ok(Json(ApiOk { data: dto }))
}

pub async fn mark_canceled(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    transition(state, auth, appointment_id, STATUS_CANCELED, codes::APPOINTMENT_CANCELED).await
}

pub async fn mark_completed(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    transition(state, auth, appointment_id, STATUS_COMPLETED, codes::APPOINTMENT_COMPLETED).await
}

pub async fn mark_no_show(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    transition(state, auth, appointment_id, STATUS_NO_SHOW, codes::APPOINTMENT_NO_SHOW).await
}
