// src/routes/clinic_routes.rs

use axum::{
    extract::State,
    routing::{get, patch},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/clinic", get(get_clinic))
        .route("/clinic", patch(update_clinic))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ClinicRow {
    pub clinic_id: Uuid,
    pub clinic_name: String,
    pub contact_email: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct ClinicResponse {
    pub data: ClinicRow,
}

pub async fn get_clinic(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ClinicResponse>, ApiError> {
    let row: ClinicRow = sqlx::query_as::<_, ClinicRow>(
        r#"
        SELECT clinic_id, clinic_name, contact_email, created_at
        FROM clinic
        WHERE clinic_id = $1
        "#,
    )
    .bind(auth.clinic_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::Internal("clinic row missing".into()))?;

    Ok(Json(ClinicResponse { data: row }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateClinicRequest {
    pub clinic_name: Option<String>,
    pub contact_email: Option<String>,
}

fn ensure_admin_or_manager(auth: &AuthContext) -> Result<(), ApiError> {
    // roles: 1 admin, 2 manager
    if auth.role == 1 || auth.role == 2 {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only admin/manager can update clinic settings".into(),
        ))
    }
}

pub async fn update_clinic(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UpdateClinicRequest>,
) -> Result<Json<ClinicResponse>, ApiError> {
    ensure_admin_or_manager(&auth)?;

    if let Some(name) = req.clinic_name.as_deref().map(str::trim) {
        if name.is_empty() {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "clinic_name cannot be empty".into(),
            ));
        }
        if name.len() > 128 {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "clinic_name is too long (max 128)".into(),
            ));
        }
    }

    let row: ClinicRow = sqlx::query_as::<_, ClinicRow>(
        r#"
        UPDATE clinic
        SET clinic_name = COALESCE($2, clinic_name),
            contact_email = COALESCE($3, contact_email)
        WHERE clinic_id = $1
        RETURNING clinic_id, clinic_name, contact_email, created_at
        "#,
    )
    .bind(auth.clinic_id)
    .bind(req.clinic_name.as_deref().map(str::trim))
    .bind(req.contact_email.as_deref().map(str::trim))
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::Internal("clinic row missing".into()))?;

    Ok(Json(ClinicResponse { data: row }))
}
