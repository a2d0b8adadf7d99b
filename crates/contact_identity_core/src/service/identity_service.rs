//! Transactional identity use-case service.
//!
//! # Responsibility
//! - Run each resolution inside one SQLite write transaction.
//! - Emit metadata-only diagnostics for every resolution.
//!
//! # Invariants
//! - `resolve` holds the database write lock from lookup to commit, so two
//!   concurrent resolutions of overlapping observations are serialized.
//! - The transaction commits only on success; every error path rolls back.
//! - Email and phone values never reach the logs.

use crate::model::contact::{ContactId, Observation};
use crate::repo::contact_repo::SqliteContactStore;
use crate::service::identity_resolver::{
    self, ConsolidatedView, IdentityError, Resolution, ResolveOptions,
};
use log::{error, info, warn};
use rusqlite::{Connection, TransactionBehavior};
use std::time::Instant;

/// Identity service facade over a SQLite connection.
pub struct IdentityService<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> IdentityService<'conn> {
    /// Creates a service over a migrated connection.
    pub fn new(conn: &'conn mut Connection) -> Self {
        Self { conn }
    }

    /// Resolves an observation with default options.
    pub fn resolve(&mut self, observation: &Observation) -> Result<Resolution, IdentityError> {
        self.resolve_with(observation, &ResolveOptions::default())
    }

    /// Resolves an observation inside an immediate transaction.
    ///
    /// # Side effects
    /// - Zero or more inserts and demotions, committed atomically.
    /// - Emits `identity_resolve` logging events with duration and status.
    pub fn resolve_with(
        &mut self,
        observation: &Observation,
        options: &ResolveOptions,
    ) -> Result<Resolution, IdentityError> {
        let started_at = Instant::now();
        info!(
            "event=identity_resolve module=identity status=start has_email={} has_phone={}",
            observation.email().is_some(),
            observation.phone().is_some()
        );

        let result = self.resolve_in_tx(observation, options);
        match &result {
            Ok(resolution) => info!(
                "event=identity_resolve module=identity status=ok outcome={} primary_id={} created_id={} relinked={} secondaries={} duration_ms={}",
                resolution.outcome.as_str(),
                resolution.view.primary_contact_id,
                resolution
                    .created_contact_id
                    .map_or_else(|| "none".to_string(), |id| id.to_string()),
                resolution.relinked_contact_ids.len(),
                resolution.view.secondary_contact_ids.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => log_failure("identity_resolve", err, started_at),
        }
        result
    }

    /// Returns the consolidated view of the cluster holding `contact_id`.
    pub fn cluster_view(&mut self, contact_id: ContactId) -> Result<ConsolidatedView, IdentityError> {
        let started_at = Instant::now();
        let result = self.inspect_in_tx(contact_id);

        match &result {
            Ok(view) => info!(
                "event=identity_inspect module=identity status=ok primary_id={} secondaries={} duration_ms={}",
                view.primary_contact_id,
                view.secondary_contact_ids.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => log_failure("identity_inspect", err, started_at),
        }
        result
    }

    fn resolve_in_tx(
        &mut self,
        observation: &Observation,
        options: &ResolveOptions,
    ) -> Result<Resolution, IdentityError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let resolution = {
            let store = SqliteContactStore::new(&tx);
            identity_resolver::resolve(&store, observation, options)?
        };
        tx.commit()?;
        Ok(resolution)
    }

    fn inspect_in_tx(&mut self, contact_id: ContactId) -> Result<ConsolidatedView, IdentityError> {
        let tx = self.conn.transaction()?;
        let view = {
            let store = SqliteContactStore::new(&tx);
            identity_resolver::inspect(&store, contact_id)?
        };
        tx.commit()?;
        Ok(view)
    }
}

impl From<rusqlite::Error> for IdentityError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(value.into())
    }
}

fn log_failure(event: &str, err: &IdentityError, started_at: Instant) {
    let duration_ms = started_at.elapsed().as_millis();
    match err {
        IdentityError::InvariantViolation(_) => error!(
            "event={event} module=identity status=error error_code=invariant_violation duration_ms={duration_ms} error={err}"
        ),
        IdentityError::Store(store_err) if store_err.is_busy() => warn!(
            "event={event} module=identity status=error error_code=store_busy duration_ms={duration_ms}"
        ),
        IdentityError::Store(_) => error!(
            "event={event} module=identity status=error error_code=store_failed duration_ms={duration_ms} error={err}"
        ),
        IdentityError::DeadlineExceeded => warn!(
            "event={event} module=identity status=error error_code=deadline_exceeded duration_ms={duration_ms}"
        ),
        IdentityError::Validation(_) => warn!(
            "event={event} module=identity status=error error_code=invalid_observation duration_ms={duration_ms}"
        ),
        IdentityError::NotFound(id) => warn!(
            "event={event} module=identity status=error error_code=not_found contact_id={id} duration_ms={duration_ms}"
        ),
    }
}
