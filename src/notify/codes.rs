// src/notify/codes.rs

/// Event codes are string-typed end to end (DB, API, settings) so a clinic's
/// configuration survives additions to this list.
pub const APPOINTMENT_CREATED: &str = "appointment_created";
pub const APPOINTMENT_RESCHEDULED: &str = "appointment_rescheduled";
pub const APPOINTMENT_CANCELED: &str = "appointment_canceled";
pub const APPOINTMENT_COMPLETED: &str = "appointment_completed";
pub const APPOINTMENT_NO_SHOW: &str = "appointment_no_show";
pub const FORM_COMPLETED: &str = "form_completed";
pub const PATIENT_REGISTERED: &str = "patient_registered";

pub const ALL_CODES: [&str; 7] = [
    APPOINTMENT_CREATED,
    APPOINTMENT_RESCHEDULED,
    APPOINTMENT_CANCELED,
    APPOINTMENT_COMPLETED,
    APPOINTMENT_NO_SHOW,
    FORM_COMPLETED,
    PATIENT_REGISTERED,
];

pub fn is_known_code(code: &str) -> bool {
    ALL_CODES.contains(&code)
}

pub fn category_for(code: &str) -> &'static str {
    match code {
        APPOINTMENT_CREATED
        | APPOINTMENT_RESCHEDULED
        | APPOINTMENT_CANCELED
        | APPOINTMENT_COMPLETED
        | APPOINTMENT_NO_SHOW => "appointment",
        FORM_COMPLETED => "form",
        PATIENT_REGISTERED => "patient",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_code_has_a_category() {
        for code in ALL_CODES {
            assert!(is_known_code(code));
            assert_ne!(category_for(code), "other");
        }
    }

    #[test]
    fn test_unknown_code() {
        assert!(!is_known_code("appointment_deleted"));
        assert_eq!(category_for("appointment_deleted"), "other");
    }
}
