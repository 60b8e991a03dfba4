//! Domain model for particle coordinates and particle lists.
//!
//! # Responsibility
//! - Define space-tagged coordinate values and particle records.
//! - Define list handles and the composite keys addressing stored documents.
//!
//! # Invariants
//! - Every coordinate value carries its pixel space in its type and in its
//!   persisted form.
//! - Every stored particle set carries a `ParticlesVersion`.

pub mod coordinate;
pub mod particle;
pub mod particle_list;
pub mod pipeline;
