// src/routes/template_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, OkData, OkResponse, TemplateRow},
    notify::{codes, template, Channel},
};

fn ensure_admin_or_manager(auth: &AuthContext) -> Result<(), ApiError> {
    // roles: 1 admin, 2 manager
    if auth.role == 1 || auth.role == 2 {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only admin/manager can edit templates".into(),
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
        .route("/templates", get(list_templates).post(create_template))
        .route(
            "/templates/{template_id}",
            axum::routing::patch(update_template).delete(delete_template),
        )
        .route("/templates/preview", post(preview_template))
}

const TEMPLATE_COLUMNS: &str = r#"
    template_id, clinic_id, event_code, channel, subject, body,
    is_active, created_at, updated_at
"#;

/* ============================================================
   GET /templates  (clinic overrides + system defaults)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ListTemplatesQuery {
    pub event_code: Option<String>,
    pub channel: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TemplatesListResponse {
    pub data: Vec<TemplateRow>,
}

pub async fn list_templates(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListTemplatesQuery>,
) -> Result<Json<TemplatesListResponse>, ApiError> {
    ensure_staff(&auth)?;

    if let Some(ch) = q.channel.as_deref() {
        if Channel::parse(ch).is_none() {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                format!("unknown channel: {ch}"),
            ));
        }
    }

    let mut qb: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new(format!(
        "SELECT {TEMPLATE_COLUMNS} FROM message_template "
    ));
    qb.push(" WHERE (clinic_id = ");
    qb.push_bind(auth.clinic_id);
    qb.push(" OR clinic_id IS NULL) ");

    if let Some(code) = q.event_code {
        qb.push(" AND event_code = ");
        qb.push_bind(code);
    }
    if let Some(ch) = q.channel {
        qb.push(" AND channel = ");
        qb.push_bind(ch);
    }

    // Clinic overrides first, then system defaults.
    qb.push(" ORDER BY event_code ASC, channel ASC, clinic_id NULLS LAST ");

    let rows: Vec<TemplateRow> = qb
        .build_query_as::<TemplateRow>()
        .fetch_all(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(TemplatesListResponse { data: rows }))
}

/* ============================================================
   POST /templates  (create a clinic copy)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub event_code: String,
    pub channel: String,
    pub subject: Option<String>,
    /// Omitted => start from the system default's content for the pair.
    pub body: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TemplateResponse {
    pub data: TemplateRow,
}

pub async fn create_template(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateTemplateRequest>,
) -> Result<Json<TemplateResponse>, ApiError> {
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

    let (subject, body) = match req.body.as_deref().map(str::trim) {
        Some(b) if !b.is_empty() => (req.subject.clone(), b.to_string()),
        _ => {
            // Copy the system default so the admin edits from a working base.
            let system: Option<TemplateRow> = sqlx::query_as::<_, TemplateRow>(&format!(
                r#"
                SELECT {TEMPLATE_COLUMNS}
                FROM message_template
                WHERE clinic_id IS NULL
                  AND event_code = $1
                  AND channel = $2
                  AND is_active = true
                "#,
            ))
            .bind(&req.event_code)
            .bind(channel.as_str())
            .fetch_optional(&state.db)
            .await
            .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

            let Some(system) = system else {
                return Err(ApiError::BadRequest(
                    "VALIDATION_ERROR",
                    "body is required: no system default exists for this event/channel".into(),
                ));
            };
            (req.subject.clone().or(system.subject), system.body)
        }
    };

    if channel == Channel::Email && subject.as_deref().map(str::trim).unwrap_or("").is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "subject is required for email templates".into(),
        ));
    }

    let row: TemplateRow = sqlx::query_as::<_, TemplateRow>(&format!(
        r#"
        INSERT INTO message_template (clinic_id, event_code, channel, subject, body, is_active)
        VALUES ($1, $2, $3, $4, $5, true)
        RETURNING {TEMPLATE_COLUMNS}
        "#,
    ))
    .bind(auth.clinic_id)
    .bind(&req.event_code)
    .bind(channel.as_str())
    .bind(subject.as_deref().map(str::trim))
    .bind(&body)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(TemplateResponse { data: row }))
}

/* ============================================================
   PATCH /templates/{id}  (clinic-owned only)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct UpdateTemplateRequest {
    pub subject: Option<String>,
    pub body: Option<String>,
    pub is_active: Option<bool>,
}

pub async fn update_template(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(template_id): Path<Uuid>,
    Json(req): Json<UpdateTemplateRequest>,
) -> Result<Json<TemplateResponse>, ApiError> {
    ensure_admin_or_manager(&auth)?;

    let existing: TemplateRow = sqlx::query_as::<_, TemplateRow>(&format!(
        r#"
        SELECT {TEMPLATE_COLUMNS}
        FROM message_template
        WHERE template_id = $1
          AND (clinic_id = $2 OR clinic_id IS NULL)
        "#,
    ))
    .bind(template_id)
    .bind(auth.clinic_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "template not found".into()))?;

    // System defaults are read-only fallbacks.
    if existing.clinic_id.is_none() {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "system templates are read-only; create a clinic copy instead".into(),
        ));
    }

    if let Some(b) = req.body.as_deref().map(str::trim) {
        if b.is_empty() {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "body cannot be empty".into(),
            ));
        }
    }

    let row: TemplateRow = sqlx::query_as::<_, TemplateRow>(&format!(
        r#"
        UPDATE message_template
        SET subject = COALESCE($1, subject),
            body = COALESCE($2, body),
            is_active = COALESCE($3, is_active),
            updated_at = now()
        WHERE template_id = $4
        RETURNING {TEMPLATE_COLUMNS}
        "#,
    ))
    .bind(req.subject.as_deref().map(str::trim))
    .bind(req.body.as_deref().map(str::trim))
    .bind(req.is_active)
    .bind(template_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(TemplateResponse { data: row }))
}

/* ============================================================
   DELETE /templates/{id}
   ============================================================ */

pub async fn delete_template(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(template_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    ensure_admin_or_manager(&auth)?;

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    // Settings that pointed at this template fall back to the system default.
    sqlx::query(
        r#"
        UPDATE channel_setting
        SET template_id = NULL, updated_at = now()
        WHERE clinic_id = $1
          AND template_id = $2
        "#,
    )
    .bind(auth.clinic_id)
    .bind(template_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    // Only clinic-owned rows are deletable; system defaults have NULL
    // clinic_id and never match.
    let res = sqlx::query(
        r#"
        DELETE FROM message_template
        WHERE template_id = $1
          AND clinic_id = $2
        "#,
    )
    .bind(template_id)
    .bind(auth.clinic_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound(
            "NOT_FOUND",
            "template not found or not owned by this clinic".into(),
        ));
    }

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}

/* ============================================================
   POST /templates/preview  (variable substitution preview)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub patient_id: Uuid,
    pub template_id: Option<Uuid>,
    pub subject: Option<String>,
    pub body: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub data: PreviewData,
}

#[derive(Debug, Serialize)]
pub struct PreviewData {
    pub subject: Option<String>,
    pub body: String,
}

#[derive(Debug, sqlx::FromRow)]
struct PatientLiteRow {
    register_number: String,
    first_name: String,
    last_name: String,
}

pub async fn preview_template(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<PreviewRequest>,
) -> Result<Json<PreviewResponse>, ApiError> {
    ensure_staff(&auth)?;

    let (subject, body) = match req.template_id {
        Some(template_id) => {
            let tpl: TemplateRow = sqlx::query_as::<_, TemplateRow>(&format!(
                r#"
                SELECT {TEMPLATE_COLUMNS}
                FROM message_template
                WHERE template_id = $1
                  AND (clinic_id = $2 OR clinic_id IS NULL)
                "#,
            ))
            .bind(template_id)
            .bind(auth.clinic_id)
            .fetch_optional(&state.db)
            .await
            .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
            .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "template not found".into()))?;
            (tpl.subject, tpl.body)
        }
        None => {
            let body = req.body.as_deref().map(str::trim).unwrap_or("").to_string();
            if body.is_empty() {
                return Err(ApiError::BadRequest(
                    "VALIDATION_ERROR",
                    "template_id or body is required".into(),
                ));
            }
            (req.subject.clone(), body)
        }
    };

    let p: PatientLiteRow = sqlx::query_as::<_, PatientLiteRow>(
        r#"
        SELECT register_number, first_name, last_name
        FROM patient
        WHERE patient_id = $1
          AND clinic_id = $2
        "#,
    )
    .bind(req.patient_id)
    .bind(auth.clinic_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "patient not found".into()))?;

    let clinic_name: String = sqlx::query_scalar(
        r#"
        SELECT clinic_name
        FROM clinic
        WHERE clinic_id = $1
        "#,
    )
    .bind(auth.clinic_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let full_name = format!("{} {}", p.first_name, p.last_name);
    let now = chrono::Utc::now();

    let vars: Vec<(String, String)> = vec![
        ("patient_name".into(), full_name),
        ("first_name".into(), p.first_name),
        ("last_name".into(), p.last_name),
        ("register_number".into(), p.register_number),
        ("clinic_name".into(), clinic_name),
        ("appointment_date".into(), now.format("%Y-%m-%d").to_string()),
        ("appointment_time".into(), now.format("%H:%M").to_string()),
    ];

    Ok(Json(PreviewResponse {
        data: PreviewData {
            subject: subject.map(|s| template::render(&s, &vars)),
            body: template::render(&body, &vars),
        },
    }))
}
