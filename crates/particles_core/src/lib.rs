//! Core particle store for cryo-EM picking results.
//! This crate owns the coordinate model, the legacy-to-unbinned migrator,
//! and the SQLite-backed list and particle repositories.

pub mod config;
pub mod db;
pub mod logging;
pub mod migrator;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, CoreConfig, LoggingConfig};
pub use db::{open_db, open_db_in_memory, open_db_with_timeout, DbError, DbResult};
pub use logging::{default_log_level, init_logging, init_logging_from_config, logging_status};
pub use migrator::{extra_binning, migrate_particles, ExtraBinning, MigrationError};
pub use model::coordinate::{
    BinnedFloat, BinnedInt, BinningFactor, CoordinateError, CoordinateFloat, CoordinateInt,
    CoordinateSpace, CoordinateValue, UnbinnedFloat, UnbinnedInt,
};
pub use model::particle::{
    Particle2D, Particle3D, ParticleId, ParticleKind, ParticleRecord, ParticleSet,
    ParticlesVersion, RecordSpaceError, VirionThreshold,
};
pub use model::particle_list::{
    DocumentKey, KeyError, ParticleList, ParticleListKey, ParticleListSource, ParticleListType,
};
pub use model::pipeline::{PipelineParams, VirionDetectionMethod};
pub use repo::id_lock::{IdAllocationLock, IdLockMode};
pub use repo::list_repo::{ParticleListRepository, SqliteParticleListRepository};
pub use repo::particle_repo::{
    ParticleRepository, SqliteParticleRepository, StoreError, StoreNamespace, StoreResult,
};
pub use service::particle_service::{
    NoPipelineParams, ParticleService, PipelineParamsSource, ServiceError, ServiceResult,
};

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
