// src/routes/exam_routes.rs
//
// Exam/document records hold metadata plus an object-storage key; the file
// bytes themselves never pass through this server.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, OkData, OkResponse},
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

fn ensure_admin(auth: &AuthContext) -> Result<(), ApiError> {
    if auth.role == 1 {
        Ok(())
    } else {
        Err(ApiError::Forbidden("FORBIDDEN", "admin only".into()))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/exams", post(create_exam).get(list_exams))
        .route(
            "/exams/{exam_id}",
            get(get_exam).patch(update_exam).delete(delete_exam),
        )
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ExamRow {
    pub exam_id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub title: String,
    pub category: Option<String>,
    pub storage_key: String,
    pub content_type: Option<String>,
    pub note: Option<String>,
    pub taken_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

const EXAM_COLUMNS: &str = r#"
    exam_id, clinic_id, patient_id, title, category, storage_key,
    content_type, note, taken_at, created_at
"#;

#[derive(Debug, Deserialize)]
pub struct CreateExamRequest {
    pub patient_id: Uuid,
    pub title: String,
    pub category: Option<String>,
    pub storage_key: String,
    pub content_type: Option<String>,
    pub note: Option<String>,
    pub taken_at: Option<DateTime<Utc>>,
}

pub async fn create_exam(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateExamRequest>,
) -> Result<Json<ExamRow>, ApiError> {
    ensure_staff(&auth)?;

    let title = req.title.trim();
    let storage_key = req.storage_key.trim();
    if title.is_empty() || storage_key.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "title and storage_key are required".into(),
        ));
    }

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

    let row: ExamRow = sqlx::query_as::<_, ExamRow>(&format!(
        r#"
        INSERT INTO exam_record (clinic_id, patient_id, title, category, storage_key, content_type, note, taken_at)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
        RETURNING {EXAM_COLUMNS}
        "#,
    ))
    .bind(auth.clinic_id)
    .bind(req.patient_id)
    .bind(title)
    .bind(req.category.as_deref())
    .bind(storage_key)
    .bind(req.content_type.as_deref())
    .bind(req.note.as_deref())
    .bind(req.taken_at)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(row))
}

#[derive(Debug, Deserialize)]
pub struct ListExamsQuery {
    pub patient_id: Uuid,
}

pub async fn list_exams(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListExamsQuery>,
) -> Result<Json<Vec<ExamRow>>, ApiError> {
    ensure_staff(&auth)?;

    let rows: Vec<ExamRow> = sqlx::query_as::<_, ExamRow>(&format!(
        r#"
        SELECT {EXAM_COLUMNS}
        FROM exam_record
        WHERE clinic_id = $1
          AND patient_id = $2
        ORDER BY COALESCE(taken_at, created_at) DESC
        "#,
    ))
    .bind(auth.clinic_id)
    .bind(q.patient_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

pub async fn get_exam(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(exam_id): Path<Uuid>,
) -> Result<Json<ExamRow>, ApiError> {
    ensure_staff(&auth)?;

    let row: ExamRow = sqlx::query_as::<_, ExamRow>(&format!(
        r#"
        SELECT {EXAM_COLUMNS}
        FROM exam_record
        WHERE exam_id = $1
          AND clinic_id = $2
        "#,
    ))
    .bind(exam_id)
    .bind(auth.clinic_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "exam not found".into()))?;

    Ok(Json(row))
}

#[derive(Debug, Deserialize)]
pub struct UpdateExamRequest {
    pub title: Option<String>,
    pub category: Option<String>,
    pub note: Option<String>,
}

pub async fn update_exam(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(exam_id): Path<Uuid>,
    Json(req): Json<UpdateExamRequest>,
) -> Result<Json<ExamRow>, ApiError> {
    ensure_staff(&auth)?;

    if let Some(t) = req.title.as_deref().map(str::trim) {
        if t.is_empty() {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "title cannot be empty".into(),
            ));
        }
    }

    let row: ExamRow = sqlx::query_as::<_, ExamRow>(&format!(
        r#"
        UPDATE exam_record
        SET title = COALESCE($1, title),
            category = COALESCE($2, category),
            note = COALESCE($3, note)
        WHERE exam_id = $4
          AND clinic_id = $5
        RETURNING {EXAM_COLUMNS}
        "#,
    ))
    .bind(req.title.as_deref().map(str::trim))
    .bind(req.category.as_deref())
    .bind(req.note.as_deref())
    .bind(exam_id)
    .bind(auth.clinic_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "exam not found".into()))?;

    Ok(Json(row))
}

pub async fn delete_exam(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(exam_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    ensure_admin(&auth)?;

    let res = sqlx::query(
        r#"
        DELETE FROM exam_record
        WHERE exam_id = $1
          AND clinic_id = $2
        "#,
    )
    .bind(exam_id)
    .bind(auth.clinic_id)
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("NOT_FOUND", "exam not found".into()));
    }

    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}
