//! Contact identity resolution.
//!
//! # Responsibility
//! - Decide, for one observation, whether to create a primary, merge
//!   clusters, record a new secondary, or do nothing.
//! - Build the consolidated view reported back to callers.
//!
//! # Invariants
//! - One primary per cluster; it is the oldest member by `(created_at, id)`.
//! - Every secondary links directly to its cluster primary. Chains found in
//!   stored data are flattened while merging.
//! - The resolver holds no state between calls. The store passed in carries
//!   the transaction scope.
//! - Cluster damage is reported as `InvariantViolation`, never repaired.

use crate::model::contact::{Contact, ContactId, ContactValidationError, LinkPrecedence, Observation};
use crate::repo::contact_repo::{ContactStore, RepoError};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

/// Caller-facing summary of one identity cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedView {
    pub primary_contact_id: ContactId,
    /// Distinct emails, primary's first, then by first occurrence.
    pub emails: Vec<String>,
    /// Distinct phone numbers, primary's first, then by first occurrence.
    pub phone_numbers: Vec<String>,
    /// Secondary ids in ascending creation order.
    pub secondary_contact_ids: Vec<ContactId>,
}

/// Which state transition a resolution performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionOutcome {
    /// No record matched; a new primary was created.
    CreatedNew,
    /// The observation carried an unseen email or phone.
    LinkedNewSecondary,
    /// Every attribute was already known (clusters may still have merged).
    AlreadyKnown,
}

impl ResolutionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreatedNew => "created-new",
            Self::LinkedNewSecondary => "linked-new-secondary",
            Self::AlreadyKnown => "already-known",
        }
    }
}

/// Result of one `resolve` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub outcome: ResolutionOutcome,
    pub view: ConsolidatedView,
    /// Contact inserted by this call, primary or secondary.
    pub created_contact_id: Option<ContactId>,
    /// Contacts demoted or relinked to the canonical primary, ascending.
    pub relinked_contact_ids: Vec<ContactId>,
}

/// Per-call knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Checked before every store call.
    pub deadline: Option<Instant>,
}

impl ResolveOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
        }
    }

    fn check_deadline(&self) -> Result<(), IdentityError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(IdentityError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

/// Detected breakage of cluster invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Following `linked_id` revisited a contact.
    LinkCycle { start: ContactId, revisited: ContactId },
    /// A secondary carries no `linked_id`.
    UnlinkedSecondary { id: ContactId },
    /// A secondary links to a missing or soft-deleted contact.
    DanglingLink { id: ContactId, linked_id: ContactId },
    /// The reloaded cluster is empty or not headed by the expected primary.
    PrimaryMismatch {
        expected: ContactId,
        found: Option<ContactId>,
    },
    /// A set of members holds no primary; `member_id` names one of them.
    NoPrimary { member_id: Option<ContactId> },
    /// A second primary showed up inside one cluster.
    MultiplePrimaries {
        primary_id: ContactId,
        other_id: ContactId,
    },
    /// A secondary does not link to the cluster primary.
    MisLinkedSecondary {
        id: ContactId,
        linked_id: Option<ContactId>,
        expected: ContactId,
    },
    /// A member predates the cluster primary.
    PrimacyOrder {
        primary_id: ContactId,
        older_id: ContactId,
    },
}

impl Display for InvariantViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LinkCycle { start, revisited } => {
                write!(f, "link cycle from contact {start} revisits {revisited}")
            }
            Self::UnlinkedSecondary { id } => write!(f, "secondary contact {id} has no link"),
            Self::NoPrimary { member_id } => match member_id {
                Some(id) => write!(f, "cluster of contact {id} has no primary"),
                None => write!(f, "empty cluster has no primary"),
            },
            Self::DanglingLink { id, linked_id } => {
                write!(f, "contact {id} links to missing contact {linked_id}")
            }
            Self::PrimaryMismatch { expected, found } => match found {
                Some(found) => write!(f, "cluster {expected} is headed by contact {found}"),
                None => write!(f, "cluster {expected} has no live primary"),
            },
            Self::MultiplePrimaries {
                primary_id,
                other_id,
            } => write!(
                f,
                "cluster {primary_id} contains second primary contact {other_id}"
            ),
            Self::MisLinkedSecondary {
                id,
                linked_id,
                expected,
            } => match linked_id {
                Some(linked_id) => write!(
                    f,
                    "secondary contact {id} links to {linked_id} instead of {expected}"
                ),
                None => write!(f, "secondary contact {id} has no link, expected {expected}"),
            },
            Self::PrimacyOrder {
                primary_id,
                older_id,
            } => write!(
                f,
                "contact {older_id} is older than cluster primary {primary_id}"
            ),
        }
    }
}

impl Error for InvariantViolation {}

/// Error surfaced by identity resolution.
#[derive(Debug)]
pub enum IdentityError {
    /// Observation carries no identifier.
    Validation(ContactValidationError),
    /// Store failure, propagated unchanged.
    Store(RepoError),
    /// Cluster invariants are broken. Indicates a missed transaction upstream.
    InvariantViolation(InvariantViolation),
    /// Caller deadline passed before a store call.
    DeadlineExceeded,
    /// Requested contact does not exist or is soft-deleted.
    NotFound(ContactId),
}

impl Display for IdentityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::InvariantViolation(err) => write!(f, "identity invariant violated: {err}"),
            Self::DeadlineExceeded => write!(f, "identity resolution deadline exceeded"),
            Self::NotFound(id) => write!(f, "contact not found: {id}"),
        }
    }
}

impl Error for IdentityError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::InvariantViolation(err) => Some(err),
            Self::DeadlineExceeded | Self::NotFound(_) => None,
        }
    }
}

impl From<ContactValidationError> for IdentityError {
    fn from(value: ContactValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for IdentityError {
    fn from(value: RepoError) -> Self {
        Self::Store(value)
    }
}

impl From<InvariantViolation> for IdentityError {
    fn from(value: InvariantViolation) -> Self {
        Self::InvariantViolation(value)
    }
}

/// Resolves one observation against the store.
///
/// # Contract
/// - Every store call runs inside the caller's transaction scope; the caller
///   commits only on `Ok`.
/// - No store call is retried.
///
/// # Errors
/// - `Store` for any store failure.
/// - `InvariantViolation` when stored links are cyclic, dangling, or the
///   reloaded cluster is malformed.
/// - `DeadlineExceeded` when `options.deadline` passes.
pub fn resolve<S: ContactStore>(
    store: &S,
    observation: &Observation,
    options: &ResolveOptions,
) -> Result<Resolution, IdentityError> {
    let email = observation.email();
    let phone = observation.phone();

    options.check_deadline()?;
    let matches = store.find_by_email_or_phone(email, phone)?;

    if matches.is_empty() {
        options.check_deadline()?;
        let created = store.create_contact(email, phone, LinkPrecedence::Primary, None)?;
        let view = build_view(std::slice::from_ref(&created))?;
        return Ok(Resolution {
            outcome: ResolutionOutcome::CreatedNew,
            view,
            created_contact_id: Some(created.id),
            relinked_contact_ids: Vec::new(),
        });
    }

    let mut primaries: BTreeMap<ContactId, Contact> = BTreeMap::new();
    for contact in &matches {
        let primary = find_root(store, contact, options)?;
        primaries.entry(primary.id).or_insert(primary);
    }

    let canonical = canonical_primary(primaries.values())
        .cloned()
        .ok_or(InvariantViolation::NoPrimary {
            member_id: Some(matches[0].id),
        })?;

    let mut relinked: BTreeSet<ContactId> = BTreeSet::new();
    for primary in primaries.values().filter(|p| p.id != canonical.id) {
        options.check_deadline()?;
        store.demote_to_secondary(primary.id, canonical.id)?;
        relinked.insert(primary.id);

        options.check_deadline()?;
        let moved = store.relink_secondaries(primary.id, canonical.id)?;
        debug!(
            "event=identity_demote module=identity status=ok contact_id={} primary_id={} relinked_secondaries={}",
            primary.id, canonical.id, moved
        );
    }

    options.check_deadline()?;
    let mut cluster = store.find_cluster(canonical.id)?;
    let chained: Vec<ContactId> = cluster
        .iter()
        .skip(1)
        .filter(|member| member.linked_id != Some(canonical.id))
        .map(|member| member.id)
        .collect();
    if !chained.is_empty() {
        for &id in &chained {
            options.check_deadline()?;
            store.demote_to_secondary(id, canonical.id)?;
            options.check_deadline()?;
            store.relink_secondaries(id, canonical.id)?;
            relinked.insert(id);
            debug!(
                "event=identity_flatten module=identity status=ok contact_id={} primary_id={}",
                id, canonical.id
            );
        }
        options.check_deadline()?;
        cluster = store.find_cluster(canonical.id)?;
    }
    verify_cluster(canonical.id, &cluster)?;

    let mut outcome = ResolutionOutcome::AlreadyKnown;
    let mut created_contact_id = None;
    if needs_new_secondary(&cluster, observation) {
        options.check_deadline()?;
        let created =
            store.create_contact(email, phone, LinkPrecedence::Secondary, Some(canonical.id))?;
        created_contact_id = Some(created.id);
        cluster.push(created);
        verify_cluster(canonical.id, &cluster)?;
        outcome = ResolutionOutcome::LinkedNewSecondary;
    }

    let view = build_view(&cluster)?;
    Ok(Resolution {
        outcome,
        view,
        created_contact_id,
        relinked_contact_ids: relinked.into_iter().collect(),
    })
}

/// Builds the consolidated view of the cluster containing `contact_id`.
///
/// Read-only; secondaries are resolved to their primary first.
pub fn inspect<S: ContactStore>(
    store: &S,
    contact_id: ContactId,
) -> Result<ConsolidatedView, IdentityError> {
    let contact = store
        .get_contact(contact_id)?
        .ok_or(IdentityError::NotFound(contact_id))?;
    let primary = find_root(store, &contact, &ResolveOptions::default())?;
    let cluster = store.find_cluster(primary.id)?;
    verify_cluster(primary.id, &cluster)?;
    build_view(&cluster)
}

/// Oldest primary by `(created_at, id)`. Secondaries are ignored.
pub fn canonical_primary<'a>(candidates: impl IntoIterator<Item = &'a Contact>) -> Option<&'a Contact> {
    candidates
        .into_iter()
        .filter(|contact| contact.is_primary())
        .min_by_key(|contact| contact.primacy_key())
}

/// Whether the observation carries an email or phone the cluster lacks.
pub fn needs_new_secondary(cluster: &[Contact], observation: &Observation) -> bool {
    let email_is_new = observation.email().is_some_and(|email| {
        !cluster
            .iter()
            .any(|contact| contact.email.as_deref() == Some(email))
    });
    let phone_is_new = observation.phone().is_some_and(|phone| {
        !cluster
            .iter()
            .any(|contact| contact.phone.as_deref() == Some(phone))
    });
    email_is_new || phone_is_new
}

/// Builds the consolidated view from a cluster's members.
///
/// The cluster must hold exactly one primary; member order does not matter.
pub fn build_view(cluster: &[Contact]) -> Result<ConsolidatedView, IdentityError> {
    let mut primaries = cluster.iter().filter(|contact| contact.is_primary());
    let primary = primaries.next().ok_or(InvariantViolation::NoPrimary {
        member_id: cluster.first().map(|contact| contact.id),
    })?;
    if let Some(other) = primaries.next() {
        return Err(InvariantViolation::MultiplePrimaries {
            primary_id: primary.id,
            other_id: other.id,
        }
        .into());
    }

    let mut secondaries: Vec<&Contact> = cluster
        .iter()
        .filter(|contact| !contact.is_primary())
        .collect();
    secondaries.sort_by_key(|contact| contact.primacy_key());

    let mut emails = Vec::new();
    let mut phone_numbers = Vec::new();
    for contact in std::iter::once(primary).chain(secondaries.iter().copied()) {
        push_distinct(&mut emails, contact.email.as_deref());
        push_distinct(&mut phone_numbers, contact.phone.as_deref());
    }

    Ok(ConsolidatedView {
        primary_contact_id: primary.id,
        emails,
        phone_numbers,
        secondary_contact_ids: secondaries.iter().map(|contact| contact.id).collect(),
    })
}

/// Checks a reloaded cluster against the single-primary, flat-link and
/// primacy-order invariants.
pub fn verify_cluster(primary_id: ContactId, cluster: &[Contact]) -> Result<(), InvariantViolation> {
    let Some(primary) = cluster.first() else {
        return Err(InvariantViolation::PrimaryMismatch {
            expected: primary_id,
            found: None,
        });
    };
    if primary.id != primary_id || !primary.is_primary() {
        return Err(InvariantViolation::PrimaryMismatch {
            expected: primary_id,
            found: Some(primary.id),
        });
    }

    for member in &cluster[1..] {
        if member.is_primary() {
            return Err(InvariantViolation::MultiplePrimaries {
                primary_id,
                other_id: member.id,
            });
        }
        if member.linked_id != Some(primary_id) {
            return Err(InvariantViolation::MisLinkedSecondary {
                id: member.id,
                linked_id: member.linked_id,
                expected: primary_id,
            });
        }
        if member.primacy_key() < primary.primacy_key() {
            return Err(InvariantViolation::PrimacyOrder {
                primary_id,
                older_id: member.id,
            });
        }
    }

    Ok(())
}

/// Follows `linked_id` from `start` to the primary heading its cluster.
fn find_root<S: ContactStore>(
    store: &S,
    start: &Contact,
    options: &ResolveOptions,
) -> Result<Contact, IdentityError> {
    let mut seen = BTreeSet::from([start.id]);
    let mut current = start.clone();

    loop {
        let linked_id = match (current.link_precedence, current.linked_id) {
            (LinkPrecedence::Primary, _) => return Ok(current),
            (LinkPrecedence::Secondary, Some(linked_id)) => linked_id,
            (LinkPrecedence::Secondary, None) => {
                return Err(InvariantViolation::UnlinkedSecondary { id: current.id }.into())
            }
        };

        if !seen.insert(linked_id) {
            return Err(InvariantViolation::LinkCycle {
                start: start.id,
                revisited: linked_id,
            }
            .into());
        }

        options.check_deadline()?;
        current = store
            .get_contact(linked_id)?
            .ok_or(InvariantViolation::DanglingLink {
                id: current.id,
                linked_id,
            })?;
    }
}

fn push_distinct(values: &mut Vec<String>, value: Option<&str>) {
    if let Some(value) = value {
        if !values.iter().any(|known| known == value) {
            values.push(value.to_string());
        }
    }
}
