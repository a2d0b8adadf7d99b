//! Caller-facing identify API.
//!
//! # Responsibility
//! - Accept `{ email, phoneNumber }` requests and return tagged envelopes.
//! - Map core errors to `validation-error` / `internal-error` without
//!   leaking partial views.
//!
//! # Invariants
//! - Exported functions never panic.
//! - A failed call never carries a `contact` payload.

use crate::config::IdentityConfig;
use contact_identity_core::db::open_db;
use contact_identity_core::{
    init_logging, ConsolidatedView, ContactId, IdentityError, IdentityService, Observation,
    ResolutionOutcome, ResolveOptions,
};
use log::warn;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

pub const CONTACT_CREATED: &str = "New contact created successfully.";
pub const SECONDARY_CONTACT_CREATED: &str = "Secondary contact created successfully.";
pub const CONTACT_IDENTIFIED: &str = "Contact identified successfully.";
pub const REQUIRED_FIELDS: &str = "Email or phone number is required.";

/// Incoming observation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

impl IdentifyRequest {
    pub fn new(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
        }
    }
}

/// Envelope tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseStatus {
    CreatedNew,
    LinkedNewSecondary,
    AlreadyKnown,
    ValidationError,
    NotFound,
    InternalError,
}

impl From<ResolutionOutcome> for ResponseStatus {
    fn from(value: ResolutionOutcome) -> Self {
        match value {
            ResolutionOutcome::CreatedNew => Self::CreatedNew,
            ResolutionOutcome::LinkedNewSecondary => Self::LinkedNewSecondary,
            ResolutionOutcome::AlreadyKnown => Self::AlreadyKnown,
        }
    }
}

/// Response envelope shared by every entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyResponse {
    pub ok: bool,
    pub status: ResponseStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<ConsolidatedView>,
}

impl IdentifyResponse {
    fn success(status: ResponseStatus, message: impl Into<String>, contact: ConsolidatedView) -> Self {
        Self {
            ok: true,
            status,
            message: message.into(),
            contact: Some(contact),
        }
    }

    fn failure(status: ResponseStatus, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            status,
            message: message.into(),
            contact: None,
        }
    }

    fn from_error(operation: &str, err: &IdentityError) -> Self {
        match err {
            IdentityError::Validation(_) => {
                Self::failure(ResponseStatus::ValidationError, REQUIRED_FIELDS)
            }
            IdentityError::NotFound(id) => {
                Self::failure(ResponseStatus::NotFound, format!("contact not found: {id}"))
            }
            other => Self::failure(
                ResponseStatus::InternalError,
                format!("{operation} failed: {other}"),
            ),
        }
    }
}

/// Resolves a request against the configured database.
///
/// Opens one connection per call; the resolve timeout comes from config.
pub fn identify(request: &IdentifyRequest) -> IdentifyResponse {
    let config = IdentityConfig::global();
    match open_db(&config.db_path) {
        Ok(mut conn) => identify_with(&mut conn, request, &options_from(config)),
        Err(err) => IdentifyResponse::failure(
            ResponseStatus::InternalError,
            format!("identify failed: contact DB open failed: {err}"),
        ),
    }
}

/// Resolves a request on a caller-provided connection.
pub fn identify_with(
    conn: &mut Connection,
    request: &IdentifyRequest,
    options: &ResolveOptions,
) -> IdentifyResponse {
    let observation = match Observation::new(
        request.email.as_deref(),
        request.phone_number.as_deref(),
    ) {
        Ok(observation) => observation,
        Err(_) => {
            warn!("event=api_identify module=api status=rejected error_code=missing_identifiers");
            return IdentifyResponse::failure(ResponseStatus::ValidationError, REQUIRED_FIELDS);
        }
    };

    match IdentityService::new(conn).resolve_with(&observation, options) {
        Ok(resolution) => {
            let message = match resolution.outcome {
                ResolutionOutcome::CreatedNew => CONTACT_CREATED,
                ResolutionOutcome::LinkedNewSecondary => SECONDARY_CONTACT_CREATED,
                ResolutionOutcome::AlreadyKnown => CONTACT_IDENTIFIED,
            };
            IdentifyResponse::success(resolution.outcome.into(), message, resolution.view)
        }
        Err(err) => IdentifyResponse::from_error("identify", &err),
    }
}

/// Returns the cluster holding `contact_id` from the configured database.
pub fn cluster(contact_id: ContactId) -> IdentifyResponse {
    let config = IdentityConfig::global();
    match open_db(&config.db_path) {
        Ok(mut conn) => cluster_with(&mut conn, contact_id),
        Err(err) => IdentifyResponse::failure(
            ResponseStatus::InternalError,
            format!("cluster failed: contact DB open failed: {err}"),
        ),
    }
}

/// Returns the cluster holding `contact_id` on a caller-provided connection.
pub fn cluster_with(conn: &mut Connection, contact_id: ContactId) -> IdentifyResponse {
    match IdentityService::new(conn).cluster_view(contact_id) {
        Ok(view) => IdentifyResponse::success(ResponseStatus::AlreadyKnown, CONTACT_IDENTIFIED, view),
        Err(err) => IdentifyResponse::from_error("cluster", &err),
    }
}

/// Starts file logging when `config.log_dir` is set.
///
/// Returns `Ok(false)` when logging is not configured.
pub fn init_logging_from(config: &IdentityConfig) -> Result<bool, String> {
    let Some(log_dir) = config.log_dir.as_ref() else {
        return Ok(false);
    };
    let log_dir = log_dir
        .to_str()
        .ok_or_else(|| format!("log_dir is not valid UTF-8: {}", log_dir.display()))?;
    init_logging(&config.log_level, log_dir)
        .map(|()| true)
        .map_err(|err| err.to_string())
}

/// Builds resolve options from config.
pub fn options_from(config: &IdentityConfig) -> ResolveOptions {
    config
        .resolve_timeout
        .map(ResolveOptions::with_timeout)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{
        cluster_with, identify_with, init_logging_from, IdentifyRequest, IdentifyResponse,
        ResponseStatus, CONTACT_CREATED, CONTACT_IDENTIFIED, REQUIRED_FIELDS,
        SECONDARY_CONTACT_CREATED,
    };
    use crate::config::IdentityConfig;
    use contact_identity_core::db::open_db_in_memory;
    use contact_identity_core::ResolveOptions;
    use std::time::Instant;

    fn identify(conn: &mut rusqlite::Connection, email: Option<&str>, phone: Option<&str>) -> IdentifyResponse {
        identify_with(conn, &IdentifyRequest::new(email, phone), &ResolveOptions::default())
    }

    #[test]
    fn missing_identifiers_return_validation_error_without_contact() {
        let mut conn = open_db_in_memory().unwrap();
        let response = identify(&mut conn, None, Some("  "));
        assert!(!response.ok);
        assert_eq!(response.status, ResponseStatus::ValidationError);
        assert_eq!(response.message, REQUIRED_FIELDS);
        assert!(response.contact.is_none());
    }

    #[test]
    fn responses_are_tagged_per_transition() {
        let mut conn = open_db_in_memory().unwrap();

        let created = identify(&mut conn, Some("test@example.com"), Some("1234567890"));
        assert_eq!(created.status, ResponseStatus::CreatedNew);
        assert_eq!(created.message, CONTACT_CREATED);

        let linked = identify(&mut conn, Some("new@example.com"), Some("1234567890"));
        assert_eq!(linked.status, ResponseStatus::LinkedNewSecondary);
        assert_eq!(linked.message, SECONDARY_CONTACT_CREATED);
        let contact = linked.contact.expect("linked response carries contact");
        assert_eq!(contact.emails, vec!["test@example.com", "new@example.com"]);
        assert_eq!(contact.phone_numbers, vec!["1234567890"]);
        assert_eq!(contact.secondary_contact_ids.len(), 1);

        let known = identify(&mut conn, None, Some("1234567890"));
        assert_eq!(known.status, ResponseStatus::AlreadyKnown);
        assert_eq!(known.message, CONTACT_IDENTIFIED);
    }

    #[test]
    fn store_failure_maps_to_internal_error() {
        let mut conn = open_db_in_memory().unwrap();
        conn.execute_batch("DROP TABLE contacts;").unwrap();

        let response = identify(&mut conn, Some("err@example.com"), Some("9999999999"));
        assert!(!response.ok);
        assert_eq!(response.status, ResponseStatus::InternalError);
        assert!(response.message.starts_with("identify failed:"));
        assert!(response.contact.is_none());
    }

    #[test]
    fn expired_deadline_maps_to_internal_error() {
        let mut conn = open_db_in_memory().unwrap();
        let options = ResolveOptions {
            deadline: Some(Instant::now()),
        };
        let response = identify_with(
            &mut conn,
            &IdentifyRequest::new(Some("late@example.com"), None),
            &options,
        );
        assert_eq!(response.status, ResponseStatus::InternalError);
        assert!(response.message.contains("deadline"));
    }

    #[test]
    fn cluster_lookup_reports_known_and_missing_ids() {
        let mut conn = open_db_in_memory().unwrap();
        let created = identify(&mut conn, Some("a@example.com"), None);
        let primary_id = created.contact.unwrap().primary_contact_id;

        let found = cluster_with(&mut conn, primary_id);
        assert!(found.ok);
        assert_eq!(found.contact.unwrap().primary_contact_id, primary_id);

        let missing = cluster_with(&mut conn, primary_id + 100);
        assert_eq!(missing.status, ResponseStatus::NotFound);
    }

    #[test]
    fn envelope_serializes_with_wire_names() {
        let mut conn = open_db_in_memory().unwrap();
        let response = identify(&mut conn, Some("wire@example.com"), Some("42"));
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["status"], "created-new");
        assert_eq!(json["contact"]["emails"][0], "wire@example.com");
        assert_eq!(json["contact"]["phoneNumbers"][0], "42");
        assert!(json["contact"]["secondaryContactIds"]
            .as_array()
            .unwrap()
            .is_empty());

        let request: IdentifyRequest =
            serde_json::from_str(r#"{"phoneNumber":"123"}"#).unwrap();
        assert_eq!(request, IdentifyRequest::new(None, Some("123")));
    }

    #[test]
    fn logging_is_skipped_without_log_dir() {
        assert_eq!(init_logging_from(&IdentityConfig::default()), Ok(false));
    }
}
