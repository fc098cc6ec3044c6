//! Responsibility-term fingerprints and public QR-code verification.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    error::StoreError,
    models::{AuditEntry, VerificationRow},
    store::BookingStore,
};

const UNKNOWN: &str = "N/A";

/// SHA-256 of a term's text as lowercase hex. Surrounding whitespace and
/// CRLF line endings do not change the fingerprint.
pub fn term_fingerprint(text: &str) -> String {
    let normalised = text.trim().replace("\r\n", "\n");
    format!("{:x}", Sha256::digest(normalised.as_bytes()))
}

/// Short form printed on the term next to the QR code.
pub fn short_fingerprint(fingerprint: &str) -> &str {
    fingerprint.get(..32).unwrap_or(fingerprint)
}

/// Details shown on the public page for a genuine term.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifiedBooking {
    pub booking_id: Uuid,
    pub display_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub booking_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: String,
    pub teacher_name: String,
    pub registration: String,
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    Valid(Box<VerifiedBooking>),
    Invalid,
}

fn term_field(term: Option<&Value>, keys: &[&str]) -> Option<String> {
    let term = term?;
    keys.iter()
        .find_map(|k| term.get(k).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

impl From<VerificationRow> for VerifiedBooking {
    fn from(row: VerificationRow) -> Self {
        let term = row.term_document.as_ref();
        let users = row.users.as_ref();

        let teacher_name = users
            .and_then(|u| u.full_name.clone())
            .or_else(|| term_field(term, &["userName"]))
            .unwrap_or_else(|| UNKNOWN.to_string());
        let registration = users
            .and_then(|u| u.totvs_number.clone())
            .or_else(|| term_field(term, &["userTotvs"]))
            .unwrap_or_else(|| UNKNOWN.to_string());
        let fingerprint = term_field(term, &["term_hash", "term_fingerprint"]);

        Self {
            booking_id: row.id,
            display_id: row.display_id,
            created_at: row.created_at,
            booking_date: row.booking_date,
            start_time: row.start_time,
            end_time: row.end_time,
            status: row.status,
            teacher_name,
            registration,
            fingerprint,
        }
    }
}

/// Look up a term by the token in its QR code. A found term records an
/// anonymous `VERIFIED_QR` audit entry; failing to record it does not change
/// the answer.
pub async fn verify<S: BookingStore>(
    store: &S,
    token: &str,
    client: &str,
) -> Result<Verification, StoreError> {
    let token = token.trim();
    if token.is_empty() {
        return Ok(Verification::Invalid);
    }

    let Some(row) = store.booking_by_token(token).await? else {
        tracing::info!("Verification token not found");
        return Ok(Verification::Invalid);
    };

    let booking = VerifiedBooking::from(row);
    let entry = AuditEntry {
        booking_id: booking.booking_id,
        action: "VERIFIED_QR".to_string(),
        performed_by: "ANONYMOUS".to_string(),
        details: json!({ "user_agent": client }),
    };
    if let Err(e) = store.insert_audit(&entry).await {
        tracing::warn!(booking = %booking.booking_id, error = %e, "Failed to record verification audit entry");
    }

    tracing::info!(booking = %booking.booking_id, "Term verified");
    Ok(Verification::Valid(Box::new(booking)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::TeacherRef, store::MemoryStore};

    fn row(users: Option<TeacherRef>, term: Option<Value>) -> VerificationRow {
        VerificationRow {
            id: Uuid::new_v4(),
            display_id: Some("482913".to_string()),
            created_at: None,
            booking_date: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            status: "active".to_string(),
            term_document: term,
            users,
        }
    }

    #[test]
    fn test_fingerprint_known_value() {
        // sha256("abc")
        assert_eq!(
            term_fingerprint("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_fingerprint_normalises_whitespace_and_line_endings() {
        assert_eq!(
            term_fingerprint("  Termo\r\nde uso\n "),
            term_fingerprint("Termo\nde uso")
        );
        assert_ne!(term_fingerprint("Termo A"), term_fingerprint("Termo B"));
        assert_eq!(term_fingerprint("x").len(), 64);
    }

    #[test]
    fn test_short_fingerprint() {
        let fp = term_fingerprint("abc");
        assert_eq!(short_fingerprint(&fp).len(), 32);
        assert_eq!(short_fingerprint("abc"), "abc");
    }

    #[test]
    fn test_names_fall_back_to_term_then_placeholder() {
        let joined = VerifiedBooking::from(row(
            Some(TeacherRef {
                full_name: Some("Rosane".to_string()),
                totvs_number: Some("1234".to_string()),
            }),
            None,
        ));
        assert_eq!(joined.teacher_name, "Rosane");
        assert_eq!(joined.registration, "1234");

        let from_term = VerifiedBooking::from(row(
            None,
            Some(json!({ "userName": "Felipe", "userTotvs": "999", "term_hash": "abc" })),
        ));
        assert_eq!(from_term.teacher_name, "Felipe");
        assert_eq!(from_term.registration, "999");
        assert_eq!(from_term.fingerprint.as_deref(), Some("abc"));

        let unknown = VerifiedBooking::from(row(None, Some(json!({ "userName": "" }))));
        assert_eq!(unknown.teacher_name, "N/A");
        assert_eq!(unknown.registration, "N/A");
    }

    #[tokio::test]
    async fn test_verify_valid_token_writes_audit() {
        let store = MemoryStore::new();
        let r = row(None, None);
        let id = r.id;
        store.add_verification("tok-1", r);

        let result = verify(&store, " tok-1 ", "test-agent").await.unwrap();
        match result {
            Verification::Valid(b) => assert_eq!(b.booking_id, id),
            Verification::Invalid => panic!("expected a valid term"),
        }

        let audit = store.audit_entries();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, "VERIFIED_QR");
        assert_eq!(audit[0].performed_by, "ANONYMOUS");
        assert_eq!(audit[0].details["user_agent"], "test-agent");
    }

    #[tokio::test]
    async fn test_verify_unknown_or_blank_token() {
        let store = MemoryStore::new();
        assert_eq!(
            verify(&store, "missing", "x").await.unwrap(),
            Verification::Invalid
        );
        assert_eq!(verify(&store, "  ", "x").await.unwrap(), Verification::Invalid);
        assert!(store.audit_entries().is_empty());
    }
}
