// src/routes/form_routes.rs

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
Form instance status:
0 pending
1 completed
*/

pub const FORM_STATUS_PENDING: i16 = 0;
pub const FORM_STATUS_COMPLETED: i16 = 1;

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
        .route("/forms", post(create_form).get(list_forms))
        .route("/forms/{form_instance_id}", get(get_form))
        .route("/forms/{form_instance_id}/complete", post(complete_form))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct FormInstanceRow {
    pub form_instance_id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub form_name: String,
    pub status: i16,
    pub answers: serde_json::Value,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

const FORM_COLUMNS: &str = r#"
    form_instance_id, clinic_id, patient_id, form_name, status, answers,
    sent_at, completed_at, created_at
"#;

#[derive(Debug, Deserialize)]
pub struct CreateFormRequest {
    pub patient_id: Uuid,
    pub form_name: String,
}

pub async fn create_form(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateFormRequest>,
) -> Result<Json<FormInstanceRow>, ApiError> {
    ensure_staff(&auth)?;

    let form_name = req.form_name.trim();
    if form_name.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "form_name is required".into(),
        ));
    }

    // Patient must belong to the caller's clinic.
    let patient_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM patient
            WHERE patient_id = $1 AND clinic_id = $2
        )
        "#,
    )
    .bind(req.patient_id)
    .bind(auth.clinic_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if !patient_exists {
        return Err(ApiError::NotFound("NOT_FOUND", "patient not found".into()));
    }

    let row: FormInstanceRow = sqlx::query_as::<_, FormInstanceRow>(&format!(
        r#"
        INSERT INTO form_instance (clinic_id, patient_id, form_name, status, answers, sent_at)
        VALUES ($1, $2, $3, 0, '{{}}'::jsonb, now())
        RETURNING {FORM_COLUMNS}
        "#,
    ))
    .bind(auth.clinic_id)
    .bind(req.patient_id)
    .bind(form_name)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(row))
}

#[derive(Debug, Deserialize)]
pub struct ListFormsQuery {
    pub patient_id: Option<Uuid>,
    pub status: Option<i16>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_forms(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListFormsQuery>,
) -> Result<Json<Vec<FormInstanceRow>>, ApiError> {
    ensure_staff(&auth)?;

    if let Some(s) = q.status {
        if s != FORM_STATUS_PENDING && s != FORM_STATUS_COMPLETED {
            return Err(ApiError::BadRequest("VALIDATION_ERROR", "invalid status".into()));
        }
    }

    let limit = q.limit.unwrap_or(50).clamp(1, 200);
    let offset = q.offset.unwrap_or(0).max(0);

    let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(format!(
        "SELECT {FORM_COLUMNS} FROM form_instance "
    ));
    qb.push(" WHERE clinic_id = ");
    qb.push_bind(auth.clinic_id);

    if let Some(pid) = q.patient_id {
        qb.push(" AND patient_id = ");
        qb.push_bind(pid);
    }
    if let Some(s) = q.status {
        qb.push(" AND status = ");
        qb.push_bind(s);
    }

    qb.push(" ORDER BY created_at DESC ");
    qb.push(" LIMIT ");
    qb.push_bind(limit);
    qb.push(" OFFSET ");
    qb.push_bind(offset);

    let rows: Vec<FormInstanceRow> = qb
        .build_query_as::<FormInstanceRow>()
        .fetch_all(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

pub async fn get_form(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(form_instance_id): Path<Uuid>,
) -> Result<Json<FormInstanceRow>, ApiError> {
    ensure_staff(&auth)?;

    let row: FormInstanceRow = sqlx::query_as::<_, FormInstanceRow>(&format!(
        r#"
        SELECT {FORM_COLUMNS}
        FROM form_instance
        WHERE form_instance_id = $1
          AND clinic_id = $2
        "#,
    ))
    .bind(form_instance_id)
    .bind(auth.clinic_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "form not found".into()))?;

    Ok(Json(row))
}

#[derive(Debug, Deserialize)]
pub struct CompleteFormRequest {
    pub answers: Option<serde_json::Value>,
}

pub async fn complete_form(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(form_instance_id): Path<Uuid>,
    Json(req): Json<CompleteFormRequest>,
) -> Result<Json<FormInstanceRow>, ApiError> {
    ensure_staff(&auth)?;

    let answers = req.answers.unwrap_or_else(|| serde_json::json!({}));

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    // Guard on status so a double-complete can't record two events.
    let row: Option<FormInstanceRow> = sqlx::query_as::<_, FormInstanceRow>(&format!(
        r#"
        UPDATE form_instance
        SET status = 1,
            answers = $1,
            completed_at = now()
        WHERE form_instance_id = $2
          AND clinic_id = $3
          AND status = 0
        RETURNING {FORM_COLUMNS}
        "#,
    ))
    .bind(&answers)
    .bind(form_instance_id)
    .bind(auth.clinic_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let Some(row) = row else {
        return Err(ApiError::BadRequest(
            "INVALID_STATE",
            "form not found or already completed".into(),
        ));
    };

    #[derive(sqlx::FromRow)]
    struct PatientBriefRow {
        first_name: String,
        last_name: String,
    }

    let patient: Option<PatientBriefRow> = sqlx::query_as::<_, PatientBriefRow>(
        r#"
        SELECT first_name, last_name
        FROM patient
        WHERE patient_id = $1
        "#,
    )
    .bind(row.patient_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let event_id = record_event(
        &mut *tx,
        NewEvent {
            clinic_id: auth.clinic_id,
            event_code: codes::FORM_COMPLETED,
            patient_id: Some(row.patient_id),
            appointment_id: None,
            form_instance_id: Some(form_instance_id),
            occurred_at: Utc::now(),
            variables: serde_json::json!({ "form_name": row.form_name }),
            patient_name: patient.map(|p| format!("{} {}", p.first_name, p.last_name)),
            appointment_start_at: None,
        },
    )
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    dispatcher::auto_dispatch_best_effort(&state, event_id).await;

    Ok(Json(row))
}
