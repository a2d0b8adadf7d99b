//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the store contract the identity resolver consumes.
//! - Isolate SQLite query details from resolution logic.
//!
//! # Invariants
//! - Repository writes enforce `Contact::validate()` before persistence.
//! - Repository APIs return semantic errors (`NotFound`, `InvalidLink`) in
//!   addition to DB transport errors.

pub mod contact_repo;
