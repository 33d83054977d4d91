use axum::{Json, Router, extract::State, routing::get};

use crate::error::ApiError;
use crate::middleware::auth_context::AuthContext;
use crate::models::{AppState, EVENT_STATUS_FAILED, EVENT_STATUS_PENDING};

#[derive(serde::Serialize)]
pub struct HomeResponse {
    pub data: HomeData,
}

#[derive(serde::Serialize)]
pub struct HomeData {
    pub view: String,
    pub pending_events: i64,
    pub todays_appointments: i64,
    pub open_tickets: i64,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/home", get(home))
}

pub async fn home(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<HomeResponse>, ApiError> {
    // DB stores a single role (smallint):
    // 0 patient, 1 admin, 2 manager, 3 doctor, 4 receptionist
    let view = match auth.role {
        1 => "admin",
        2 => "manager",
        3 => "doctor",
        4 => "receptionist",
        0 => "patient",
        _ => "unknown",
    };

    let pending_events: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM event_timeline
        WHERE clinic_id = $1
          AND status = ANY($2)
        "#,
    )
    .bind(auth.clinic_id)
    .bind(vec![EVENT_STATUS_PENDING, EVENT_STATUS_FAILED])
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let todays_appointments: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM appointment
        WHERE clinic_id = $1
          AND start_at >= date_trunc('day', now())
          AND start_at < date_trunc('day', now()) + interval '1 day'
        "#,
    )
    .bind(auth.clinic_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let open_tickets: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM support_ticket
        WHERE clinic_id = $1
          AND status = 0
        "#,
    )
    .bind(auth.clinic_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(HomeResponse {
        data: HomeData {
            view: view.to_string(),
            pending_events,
            todays_appointments,
            open_tickets,
        },
    }))
}
