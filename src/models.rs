use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::notify::Senders;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub session_ttl_hours: i64,
    pub senders: Arc<Senders>,
}

/* -------------------------
   API DTOs
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub device_name: Option<String>,
    pub remember_me: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub data: LoginResponseData,
}

#[derive(Debug, Serialize)]
pub struct LoginResponseData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
    pub clinic: ClinicProfile,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub data: MeResponseData,
}

#[derive(Debug, Serialize)]
pub struct MeResponseData {
    pub user: UserProfile,
    pub clinic: ClinicProfile,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub data: OkData,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    /// Single role stored as smallint in DB; returned as an array for
    /// forward compatibility with multi-role accounts.
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ClinicProfile {
    pub clinic_id: Uuid,
    pub clinic_name: String,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub clinic_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
    pub roles: i16,
    pub is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SessionTokenRow {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// One immutable timeline row. `sent_channels` / `channel_errors` / `status`
/// are the only columns the dispatcher touches after insert.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct EventRow {
    pub event_id: Uuid,
    pub clinic_id: Uuid,
    pub event_code: String,
    pub category: String,
    pub patient_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    pub form_instance_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
    pub status: i16,
    pub channels: Vec<String>,
    pub sent_channels: Vec<String>,
    pub channel_errors: serde_json::Value,
    pub variables: serde_json::Value,
    pub patient_name: Option<String>,
    pub appointment_start_at: Option<DateTime<Utc>>,
    pub resolved_by_user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChannelSettingRow {
    pub channel_setting_id: Uuid,
    pub clinic_id: Uuid,
    pub event_code: String,
    pub channel: String,
    pub enabled: bool,
    pub send_mode: i16,
    pub template_id: Option<Uuid>,
    pub require_open_ticket: bool,
    pub updated_at: DateTime<Utc>,
}

/// `clinic_id IS NULL` marks a read-only system default.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TemplateRow {
    pub template_id: Uuid,
    pub clinic_id: Option<Uuid>,
    pub event_code: String,
    pub channel: String,
    pub subject: Option<String>,
    pub body: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/* -------------------------
   Helpers
--------------------------*/

/// Role mapping:
/// 0 Patient, 1 Admin, 2 Manager, 3 Doctor, 4 Receptionist
pub fn role_to_string(role: i16) -> String {
    match role {
        0 => "patient",
        1 => "admin",
        2 => "manager",
        3 => "doctor",
        4 => "receptionist",
        _ => "unknown",
    }
    .to_string()
}

pub const EVENT_STATUS_PENDING: i16 = 0;
pub const EVENT_STATUS_SENT: i16 = 1;
pub const EVENT_STATUS_COMPLETED_WITHOUT_SEND: i16 = 2;
pub const EVENT_STATUS_IGNORED: i16 = 3;
pub const EVENT_STATUS_FAILED: i16 = 4;

pub const SEND_MODE_MANUAL: i16 = 0;
pub const SEND_MODE_AUTOMATIC: i16 = 1;
