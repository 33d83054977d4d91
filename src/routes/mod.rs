use crate::models::AppState;
use axum::Router;

pub mod appointment_routes;
pub mod auth_routes;
pub mod channel_setting_routes;
pub mod clinic_routes;
pub mod event_routes;
pub mod exam_routes;
pub mod form_routes;
pub mod home_routes;
pub mod patient_routes;
pub mod template_routes;
pub mod ticket_routes;
pub mod user_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/auth", auth_routes::router())
        .nest("/api/v1/users", user_routes::router())
        .nest("/api/v1", clinic_routes::router())
        .nest("/api/v1", patient_routes::router())
        .nest("/api/v1", appointment_routes::router())
        .nest("/api/v1", form_routes::router())
        .nest("/api/v1", exam_routes::router())
        .nest("/api/v1", ticket_routes::router())
        .nest("/api/v1", event_routes::router())
        .nest("/api/v1", channel_setting_routes::router())
        .nest("/api/v1", template_routes::router())
        .merge(home_routes::router())
        .with_state(state)
}
