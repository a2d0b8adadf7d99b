//! Contact domain model.
//!
//! # Responsibility
//! - Define the single persisted record shared by every identity cluster.
//! - Define the caller observation and its normalization rules.
//!
//! # Invariants
//! - `id` is assigned by storage and never reused.
//! - A primary has no `linked_id`; a secondary always has one.
//! - Every persisted record carries at least one of `email` / `phone`.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Storage-assigned contact identifier.
///
/// Monotonic per database, so "lowest id" is a stable tie-break.
pub type ContactId = i64;

/// Position of a record inside its identity cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPrecedence {
    /// Canonical, oldest record of a cluster.
    Primary,
    /// Record merged into a cluster and linked to its primary.
    Secondary,
}

impl LinkPrecedence {
    /// Storage/wire label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    /// Parses a storage label. Returns `None` for unknown values.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }
}

/// Persisted contact record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Set only on secondaries; points at the cluster primary.
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
    /// Unix epoch milliseconds. Sole primacy criterion besides `id`.
    pub created_at: i64,
    /// Unix epoch milliseconds.
    pub updated_at: i64,
    /// Soft-delete tombstone in epoch milliseconds.
    pub deleted_at: Option<i64>,
}

/// Validation failures for contact records and observations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactValidationError {
    /// Neither email nor phone is present.
    MissingIdentifiers,
    /// Primary record carries a `linked_id`.
    PrimaryWithLink(ContactId),
    /// Secondary record has no `linked_id`.
    SecondaryWithoutLink(ContactId),
    /// Record links to itself.
    SelfLink(ContactId),
}

impl Display for ContactValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingIdentifiers => write!(f, "email or phone number is required"),
            Self::PrimaryWithLink(id) => {
                write!(f, "primary contact {id} must not have linked_id")
            }
            Self::SecondaryWithoutLink(id) => {
                write!(f, "secondary contact {id} must have linked_id")
            }
            Self::SelfLink(id) => write!(f, "contact {id} cannot link to itself"),
        }
    }
}

impl Error for ContactValidationError {}

impl Contact {
    /// Checks record-level shape invariants.
    ///
    /// Cluster-level invariants (single primary, flat links) are checked by
    /// the resolver, not here.
    pub fn validate(&self) -> Result<(), ContactValidationError> {
        if self.email.is_none() && self.phone.is_none() {
            return Err(ContactValidationError::MissingIdentifiers);
        }

        match (self.link_precedence, self.linked_id) {
            (LinkPrecedence::Primary, Some(_)) => {
                Err(ContactValidationError::PrimaryWithLink(self.id))
            }
            (LinkPrecedence::Secondary, None) => {
                Err(ContactValidationError::SecondaryWithoutLink(self.id))
            }
            (LinkPrecedence::Secondary, Some(linked)) if linked == self.id => {
                Err(ContactValidationError::SelfLink(self.id))
            }
            _ => Ok(()),
        }
    }

    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// Returns whether this record is visible to matching.
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Ordering key used for primacy: `(created_at, id)`.
    pub fn primacy_key(&self) -> (i64, ContactId) {
        (self.created_at, self.id)
    }
}

/// Caller-submitted `(email, phone)` pair.
///
/// Construction normalizes blank values to `None` and rejects observations
/// with no identifier at all, so the resolver never sees an empty one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    email: Option<String>,
    phone: Option<String>,
}

impl Observation {
    pub fn new(email: Option<&str>, phone: Option<&str>) -> Result<Self, ContactValidationError> {
        let email = normalize_identifier(email);
        let phone = normalize_identifier(phone);
        if email.is_none() && phone.is_none() {
            return Err(ContactValidationError::MissingIdentifiers);
        }
        Ok(Self { email, phone })
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }
}

fn normalize_identifier(value: Option<&str>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{Contact, ContactValidationError, LinkPrecedence, Observation};

    fn contact(id: i64, precedence: LinkPrecedence, linked_id: Option<i64>) -> Contact {
        Contact {
            id,
            email: Some("a@example.com".to_string()),
            phone: None,
            linked_id,
            link_precedence: precedence,
            created_at: 1_000,
            updated_at: 1_000,
            deleted_at: None,
        }
    }

    #[test]
    fn observation_treats_blank_fields_as_absent() {
        let observation = Observation::new(Some("  "), Some(" 123456 ")).unwrap();
        assert_eq!(observation.email(), None);
        assert_eq!(observation.phone(), Some("123456"));
    }

    #[test]
    fn observation_requires_one_identifier() {
        let err = Observation::new(Some(""), None).unwrap_err();
        assert_eq!(err, ContactValidationError::MissingIdentifiers);
    }

    #[test]
    fn validate_rejects_broken_link_shapes() {
        assert_eq!(
            contact(1, LinkPrecedence::Primary, Some(2)).validate(),
            Err(ContactValidationError::PrimaryWithLink(1))
        );
        assert_eq!(
            contact(1, LinkPrecedence::Secondary, None).validate(),
            Err(ContactValidationError::SecondaryWithoutLink(1))
        );
        assert_eq!(
            contact(1, LinkPrecedence::Secondary, Some(1)).validate(),
            Err(ContactValidationError::SelfLink(1))
        );
        assert!(contact(2, LinkPrecedence::Secondary, Some(1))
            .validate()
            .is_ok());
    }

    #[test]
    fn link_precedence_labels_round_trip() {
        for precedence in [LinkPrecedence::Primary, LinkPrecedence::Secondary] {
            assert_eq!(LinkPrecedence::parse(precedence.as_str()), Some(precedence));
        }
        assert_eq!(LinkPrecedence::parse("tertiary"), None);
    }
}
