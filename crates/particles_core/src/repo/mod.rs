//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define data access contracts for particle lists and particle documents.
//! - Isolate SQLite query details from service/business orchestration.
//!
//! # Invariants
//! - Repositories refuse connections whose schema is not fully migrated.
//! - Read paths reject invalid persisted state instead of masking it.

pub mod id_lock;
pub mod list_repo;
pub mod particle_repo;
