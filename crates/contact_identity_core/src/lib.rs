//! Core contact identity consolidation.
//! This crate is the single source of truth for cluster invariants.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use logging::{default_log_level, init_logging, logging_status, LogLevel, LoggingError};
pub use model::contact::{Contact, ContactId, ContactValidationError, LinkPrecedence, Observation};
pub use repo::contact_repo::{ContactStore, RepoError, RepoResult, SqliteContactStore};
pub use service::identity_resolver::{
    resolve, ConsolidatedView, IdentityError, InvariantViolation, Resolution, ResolutionOutcome,
    ResolveOptions,
};
pub use service::identity_service::IdentityService;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
