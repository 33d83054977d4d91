// src/routes/patient_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::AppState,
    notify::{codes, dispatcher, recorder::{record_event, NewEvent}},
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PatientRow {
    pub patient_id: Uuid,
    pub clinic_id: Uuid,
    pub register_number: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub whatsapp_number: Option<String>,
    pub birthday: Option<chrono::NaiveDate>,
    pub gender: i16,
    pub status: i16,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_seen_at: Option<chrono::DateTime<chrono::Utc>>,
}

const PATIENT_COLUMNS: &str = r#"
    patient_id, clinic_id, register_number, first_name, last_name, email,
    whatsapp_number, birthday, gender, status, created_at, last_seen_at
"#;

#[derive(Debug, Deserialize)]
pub struct CreatePatientRequest {
    pub register_number: Option<String>, // allow override, otherwise DB default generates it
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub whatsapp_number: Option<String>,
    pub birthday: Option<chrono::NaiveDate>,
    pub gender: i16,         // 0,1,2
    pub status: Option<i16>, // default 0
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patients", post(create_patient).get(search_patients))
        .route("/patients/{patient_id}", get(get_patient).patch(update_patient))
        .route("/patients/{patient_id}/archive", post(archive_patient))
        .route("/patients/{patient_id}/restore", post(restore_patient))
}

use serde::de::Deserializer;

fn deserialize_double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    // Called only when the field is present (even if it's `null`).
    // - null => Some(None) => clear the column
    // - value => Some(Some(value))
    let inner = Option::<T>::deserialize(deserializer)?;
    Ok(Some(inner))
}

fn ensure_staff(auth: &AuthContext) -> Result<(), ApiError> {
    // Any authenticated clinic user except patient accounts.
    if auth.role == 0 {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Staff account required".into(),
        ));
    }
    Ok(())
}

/// Strict E.164 normalization for the WhatsApp number: strip separators,
/// accept a leading 00, require + followed by up to 15 digits.
pub fn normalize_e164_strict(raw: &str) -> Result<String, ApiError> {
    let mut s = raw.trim().to_string();

    s = s.replace(' ', "")
        .replace('-', "")
        .replace('(', "")
        .replace(')', "")
        .replace('.', "");

    // Support "00" prefix
    if s.starts_with("00") {
        s = format!("+{}", &s[2..]);
    }

    if !s.starts_with('+') {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "phone number must start with + (E.164), e.g. +5511912345678".into(),
        ));
    }

    let digits = &s[1..];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "phone number must contain only digits after +".into(),
        ));
    }

    if digits.len() > 15 {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "phone number too long for E.164 (max 15 digits)".into(),
        ));
    }

    Ok(s)
}

pub async fn create_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreatePatientRequest>,
) -> Result<Json<PatientRow>, ApiError> {
    ensure_staff(&auth)?;

    let first_name = req.first_name.trim();
    let last_name = req.last_name.trim();

    if first_name.is_empty() || last_name.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "first_name and last_name are required".to_string(),
        ));
    }
    if req.gender < 0 || req.gender > 2 {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "gender must be 0,1,2".to_string(),
        ));
    }

    let whatsapp_number = match req.whatsapp_number.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => Some(normalize_e164_strict(s)?),
        _ => None,
    };

    let status = req.status.unwrap_or(0);

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    // If register_number provided, insert it; else rely on DB default
    let row: PatientRow = if let Some(rn) = req
        .register_number
        .as_ref()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
    {
        sqlx::query_as::<_, PatientRow>(&format!(
            r#"
            INSERT INTO patient (clinic_id, register_number, first_name, last_name, email, whatsapp_number, birthday, gender, status, created_at, last_seen_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9, now(), now())
            RETURNING {PATIENT_COLUMNS}
            "#,
        ))
        .bind(auth.clinic_id)
        .bind(rn)
        .bind(first_name)
        .bind(last_name)
        .bind(req.email.as_deref())
        .bind(whatsapp_number.as_deref())
        .bind(req.birthday)
        .bind(req.gender)
        .bind(status)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    } else {
        sqlx::query_as::<_, PatientRow>(&format!(
            r#"
            INSERT INTO patient (clinic_id, first_name, last_name, email, whatsapp_number, birthday, gender, status, created_at, last_seen_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8, now(), now())
            RETURNING {PATIENT_COLUMNS}
            "#,
        ))
        .bind(auth.clinic_id)
        .bind(first_name)
        .bind(last_name)
        .bind(req.email.as_deref())
        .bind(whatsapp_number.as_deref())
        .bind(req.birthday)
        .bind(req.gender)
        .bind(status)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    };

    let event_id = record_event(
        &mut *tx,
        NewEvent {
            clinic_id: auth.clinic_id,
            event_code: codes::PATIENT_REGISTERED,
            patient_id: Some(row.patient_id),
            appointment_id: None,
            form_instance_id: None,
            occurred_at: Utc::now(),
            variables: serde_json::json!({}),
            patient_name: Some(format!("{} {}", row.first_name, row.last_name)),
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

pub async fn get_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<PatientRow>, ApiError> {
    ensure_staff(&auth)?;

    let row: PatientRow = sqlx::query_as::<_, PatientRow>(&format!(
        r#"
        SELECT {PATIENT_COLUMNS}
        FROM patient
        WHERE patient_id = $1
          AND clinic_id = $2
        "#,
    ))
    .bind(patient_id)
    .bind(auth.clinic_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "patient not found".to_string()))?;

    Ok(Json(row))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
}

pub async fn search_patients(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Vec<PatientRow>>, ApiError> {
    ensure_staff(&auth)?;

    let query = q.query.unwrap_or_default().trim().to_string();
    if query.is_empty() {
        // default: most recent
        let rows: Vec<PatientRow> = sqlx::query_as::<_, PatientRow>(&format!(
            r#"
            SELECT {PATIENT_COLUMNS}
            FROM patient
            WHERE clinic_id = $1
            ORDER BY created_at DESC
            LIMIT 50
            "#,
        ))
        .bind(auth.clinic_id)
        .fetch_all(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
        return Ok(Json(rows));
    }

    let like = format!("%{}%", query);

    let rows: Vec<PatientRow> = sqlx::query_as::<_, PatientRow>(&format!(
        r#"
        SELECT {PATIENT_COLUMNS}
        FROM patient
        WHERE clinic_id = $1
          AND (register_number ILIKE $2
           OR first_name ILIKE $2
           OR last_name ILIKE $2)
        ORDER BY created_at DESC
        LIMIT 50
        "#,
    ))
    .bind(auth.clinic_id)
    .bind(like)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePatientRequest {
    pub register_number: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub whatsapp_number: Option<Option<String>>,
    pub birthday: Option<chrono::NaiveDate>,
    pub gender: Option<i16>,
    pub status: Option<i16>,
}

pub async fn update_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
    Json(req): Json<UpdatePatientRequest>,
) -> Result<Json<PatientRow>, ApiError> {
    ensure_staff(&auth)?;

    // Load existing
    let existing: PatientRow = sqlx::query_as::<_, PatientRow>(&format!(
        r#"
        SELECT {PATIENT_COLUMNS}
        FROM patient
        WHERE patient_id = $1
          AND clinic_id = $2
        "#,
    ))
    .bind(patient_id)
    .bind(auth.clinic_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "patient not found".to_string()))?;

    let register_number = match req.register_number.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => existing.register_number.clone(),
    };

    let first_name = match req.first_name.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => existing.first_name.clone(),
    };

    let last_name = match req.last_name.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => existing.last_name.clone(),
    };

    // email/whatsapp: explicitly null clears, empty string clears too
    let email: Option<String> = match req.email {
        None => existing.email.clone(),
        Some(None) => None,
        Some(Some(e)) => {
            let t = e.trim();
            if t.is_empty() { None } else { Some(t.to_string()) }
        }
    };

    let whatsapp_number: Option<String> = match req.whatsapp_number {
        None => existing.whatsapp_number.clone(),
        Some(None) => None,
        Some(Some(n)) => {
            let t = n.trim();
            if t.is_empty() {
                None
            } else {
                Some(normalize_e164_strict(t)?)
            }
        }
    };

    let birthday = req.birthday.or(existing.birthday);
    let gender = req.gender.unwrap_or(existing.gender);
    let status = req.status.unwrap_or(existing.status);

    if gender < 0 || gender > 2 {
        return Err(ApiError::BadRequest("VALIDATION_ERROR", "gender must be 0,1,2".into()));
    }
    if status < 0 || status > 3 {
        return Err(ApiError::BadRequest("VALIDATION_ERROR", "status must be 0..3".into()));
    }

    let updated: PatientRow = sqlx::query_as::<_, PatientRow>(&format!(
        r#"
        UPDATE patient
        SET register_number = $1,
            first_name = $2,
            last_name = $3,
            email = $4,
            whatsapp_number = $5,
            birthday = $6,
            gender = $7,
            status = $8,
            last_seen_at = now()
        WHERE patient_id = $9
          AND clinic_id = $10
        RETURNING {PATIENT_COLUMNS}
        "#,
    ))
    .bind(register_number)
    .bind(first_name)
    .bind(last_name)
    .bind(email)
    .bind(whatsapp_number)
    .bind(birthday)
    .bind(gender)
    .bind(status)
    .bind(patient_id)
    .bind(auth.clinic_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(updated))
}

const PATIENT_STATUS_ACTIVE: i16 = 0;
const PATIENT_STATUS_ARCHIVED: i16 = 3;

async fn set_patient_status(
    state: &AppState,
    auth: &AuthContext,
    patient_id: Uuid,
    status: i16,
) -> Result<PatientRow, ApiError> {
    sqlx::query_as::<_, PatientRow>(&format!(
        r#"
        UPDATE patient
        SET status = $1, last_seen_at = now()
        WHERE patient_id = $2
          AND clinic_id = $3
        RETURNING {PATIENT_COLUMNS}
        "#,
    ))
    .bind(status)
    .bind(patient_id)
    .bind(auth.clinic_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "patient not found".into()))
}

pub async fn archive_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<PatientRow>, ApiError> {
    ensure_staff(&auth)?;
    let updated = set_patient_status(&state, &auth, patient_id, PATIENT_STATUS_ARCHIVED).await?;
    Ok(Json(updated))
}

pub async fn restore_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<PatientRow>, ApiError> {
    ensure_staff(&auth)?;
    let updated = set_patient_status(&state, &auth, patient_id, PATIENT_STATUS_ACTIVE).await?;
    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_accepts_separators_and_00_prefix() {
        assert_eq!(normalize_e164_strict("+55 11 91234-5678").unwrap(), "+5511912345678");
        assert_eq!(normalize_e164_strict("005511912345678").unwrap(), "+5511912345678");
    }

    #[test]
    fn test_normalize_rejects_bad_input() {
        assert!(normalize_e164_strict("11912345678").is_err()); // no +
        assert!(normalize_e164_strict("+55 11 abc").is_err());
        assert!(normalize_e164_strict("+1234567890123456").is_err()); // 16 digits
        assert!(normalize_e164_strict("+").is_err());
    }
}
