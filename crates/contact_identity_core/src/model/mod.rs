//! Contact identity domain model.
//!
//! # Responsibility
//! - Define canonical data structures used by the resolver and the store.
//!
//! # Invariants
//! - Every record is identified by a storage-assigned `ContactId`.
//! - Deletion is represented by soft-delete tombstones, not hard delete.

pub mod contact;
