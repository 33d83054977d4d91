// src/notify/template.rs

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{EventRow, TemplateRow};
use crate::notify::Channel;

/// Substitute `{placeholder}` variables in a template body or subject.
/// Unknown placeholders are left intact so a misconfigured template is
/// visible in the delivered message instead of silently blank.
pub fn render(template: &str, vars: &[(String, String)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// Pick the effective template from the candidates for one
/// (event_code, channel) pair: the clinic's own row wins, the system default
/// (clinic_id IS NULL) is the fallback.
pub fn pick_template<'a>(clinic_id: Uuid, rows: &'a [TemplateRow]) -> Option<&'a TemplateRow> {
    rows.iter()
        .find(|t| t.clinic_id == Some(clinic_id))
        .or_else(|| rows.iter().find(|t| t.clinic_id.is_none()))
}

/// Two-tier template lookup. When the channel setting names a template id,
/// that template is used as long as it is still active and visible to the
/// clinic; otherwise clinic override, then system default.
pub async fn resolve_template(
    db: &PgPool,
    clinic_id: Uuid,
    event_code: &str,
    channel: Channel,
    override_id: Option<Uuid>,
) -> Result<Option<TemplateRow>, sqlx::Error> {
    if let Some(template_id) = override_id {
        let row: Option<TemplateRow> = sqlx::query_as::<_, TemplateRow>(
            r#"
            SELECT template_id, clinic_id, event_code, channel, subject, body,
                   is_active, created_at, updated_at
            FROM message_template
            WHERE template_id = $1
              AND (clinic_id = $2 OR clinic_id IS NULL)
              AND is_active = true
            "#,
        )
        .bind(template_id)
        .bind(clinic_id)
        .fetch_optional(db)
        .await?;

        if row.is_some() {
            return Ok(row);
        }
        // Stale reference (deleted/deactivated template): fall through to
        // the pair lookup rather than failing the send.
    }

    let rows: Vec<TemplateRow> = sqlx::query_as::<_, TemplateRow>(
        r#"
        SELECT template_id, clinic_id, event_code, channel, subject, body,
               is_active, created_at, updated_at
        FROM message_template
        WHERE (clinic_id = $1 OR clinic_id IS NULL)
          AND event_code = $2
          AND channel = $3
          AND is_active = true
        "#,
    )
    .bind(clinic_id)
    .bind(event_code)
    .bind(channel.as_str())
    .fetch_all(db)
    .await?;

    Ok(pick_template(clinic_id, &rows).cloned())
}

/// Identifying patient fields the renderer needs. The dispatcher loads these
/// fresh at send time; the event row only carries display denormalizations.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PatientContact {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub whatsapp_number: Option<String>,
}

/// Assemble the substitution variables for one event: patient and
/// appointment context first, then any string entries from the event's
/// free-form variables bag (which may override the defaults).
pub fn event_vars(
    event: &EventRow,
    patient: Option<&PatientContact>,
    clinic_name: &str,
) -> Vec<(String, String)> {
    let mut vars: Vec<(String, String)> = Vec::new();

    vars.push(("clinic_name".into(), clinic_name.to_string()));
    vars.push(("event_date".into(), event.occurred_at.format("%Y-%m-%d").to_string()));

    if let Some(p) = patient {
        vars.push(("patient_name".into(), format!("{} {}", p.first_name, p.last_name)));
        vars.push(("first_name".into(), p.first_name.clone()));
        vars.push(("last_name".into(), p.last_name.clone()));
    } else if let Some(name) = &event.patient_name {
        vars.push(("patient_name".into(), name.clone()));
    }

    if let Some(start_at) = event.appointment_start_at {
        vars.push(("appointment_date".into(), start_at.format("%Y-%m-%d").to_string()));
        vars.push(("appointment_time".into(), start_at.format("%H:%M").to_string()));
    }

    if let Some(map) = event.variables.as_object() {
        for (k, v) in map {
            if let Some(s) = v.as_str() {
                vars.retain(|(key, _)| key != k);
                vars.push((k.clone(), s.to_string()));
            }
        }
    }

    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn template(clinic_id: Option<Uuid>, body: &str) -> TemplateRow {
        TemplateRow {
            template_id: Uuid::new_v4(),
            clinic_id,
            event_code: "appointment_created".to_string(),
            channel: "email".to_string(),
            subject: Some("Your appointment".to_string()),
            body: body.to_string(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_render_replaces_known_placeholders() {
        let vars = vec![
            ("patient_name".to_string(), "Ana Silva".to_string()),
            ("appointment_time".to_string(), "14:30".to_string()),
        ];
        let out = render("Hello {patient_name}, see you at {appointment_time}.", &vars);
        assert_eq!(out, "Hello Ana Silva, see you at 14:30.");
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let out = render("Hi {nope}", &[]);
        assert_eq!(out, "Hi {nope}");
    }

    #[test]
    fn test_pick_prefers_clinic_override() {
        let clinic_id = Uuid::new_v4();
        let rows = vec![
            template(None, "system"),
            template(Some(clinic_id), "custom"),
        ];
        let picked = pick_template(clinic_id, &rows).unwrap();
        assert_eq!(picked.body, "custom");
    }

    #[test]
    fn test_pick_falls_back_to_system_default() {
        let clinic_id = Uuid::new_v4();
        let other_clinic = Uuid::new_v4();
        let rows = vec![template(None, "system"), template(Some(other_clinic), "theirs")];
        let picked = pick_template(clinic_id, &rows).unwrap();
        assert_eq!(picked.body, "system");
    }

    #[test]
    fn test_pick_none_when_no_candidates() {
        assert!(pick_template(Uuid::new_v4(), &[]).is_none());
    }
}
