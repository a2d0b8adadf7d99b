//! Core use-case services.
//!
//! # Responsibility
//! - Hold the identity resolution decision logic.
//! - Bind it to a SQLite transaction scope for callers.

pub mod identity_resolver;
pub mod identity_service;
