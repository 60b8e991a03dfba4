//! Particle use-case service.
//!
//! # Responsibility
//! - Gate user-facing single-particle edits on the list's source.
//! - Route pipeline ingestion through lazy list creation plus wholesale import.
//! - Serve canonical (unbinned) particle sets via the coordinate migrator.
//! - Cascade list/owner deletes to particle documents.
//!
//! # Invariants
//! - Only `ParticleListSource::User` lists accept add/delete/threshold edits.
//! - Records must match the list's dimensionality before any write.
//! - Reads never write; migration results are not persisted.

use crate::migrator::{migrate_particles, MigrationError};
use crate::model::particle::{
    ParticleId, ParticleRecord, ParticleSet, ParticlesVersion, VirionThreshold,
};
use crate::model::particle_list::{
    ParticleList, ParticleListKey, ParticleListSource, ParticleListType,
};
use crate::model::pipeline::PipelineParams;
use crate::repo::list_repo::ParticleListRepository;
use crate::repo::particle_repo::{ParticleRepository, StoreError, StoreNamespace};
use log::{info, warn};
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Read-only source of per-owner pipeline parameters.
pub trait PipelineParamsSource {
    fn pipeline_params(&self, owner_id: &str) -> Option<PipelineParams>;
}

impl PipelineParamsSource for HashMap<String, PipelineParams> {
    fn pipeline_params(&self, owner_id: &str) -> Option<PipelineParams> {
        self.get(owner_id).copied()
    }
}

/// Source that knows no parameters; legacy 3D reads fail through it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPipelineParams;

impl PipelineParamsSource for NoPipelineParams {
    fn pipeline_params(&self, _owner_id: &str) -> Option<PipelineParams> {
        None
    }
}

/// Errors from particle service operations.
#[derive(Debug)]
pub enum ServiceError {
    /// Target list does not exist.
    ListNotFound(String),
    /// User edit attempted on a list written by the pipeline (or vice versa).
    InvalidList {
        list_key: String,
        list_source: ParticleListSource,
    },
    /// Copy target already holds a list of that name with another type or
    /// source.
    ListConflict(String),
    /// Record dimensionality does not match the list type.
    RecordKindMismatch {
        list_key: String,
        list_type: ParticleListType,
    },
    /// Legacy 3D data needs pipeline parameters that are unavailable.
    MigrationParametersMissing {
        owner_id: String,
        parameter: &'static str,
    },
    /// Stored data could not be unbinned.
    Migration(MigrationError),
    /// Repository-level failure.
    Store(StoreError),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ListNotFound(key) => write!(f, "particle list not found: {key}"),
            Self::InvalidList {
                list_key,
                list_source,
            } => write!(f, "particle list {list_key} is {list_source}-sourced"),
            Self::ListConflict(key) => write!(
                f,
                "particle list {key} already exists with a different type or source"
            ),
            Self::RecordKindMismatch {
                list_key,
                list_type,
            } => write!(
                f,
                "record does not fit particle list {list_key} of type {}",
                list_type.as_db()
            ),
            Self::MigrationParametersMissing {
                owner_id,
                parameter,
            } => write!(
                f,
                "pipeline parameter `{parameter}` for {owner_id} is required to unbin particles"
            ),
            Self::Migration(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Migration(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Use-case service over particle lists and particle documents.
pub struct ParticleService<L, P, S>
where
    L: ParticleListRepository,
    P: ParticleRepository,
    S: PipelineParamsSource,
{
    lists: L,
    particles: P,
    params: S,
}

impl<L, P, S> ParticleService<L, P, S>
where
    L: ParticleListRepository,
    P: ParticleRepository,
    S: PipelineParamsSource,
{
    pub fn new(lists: L, particles: P, params: S) -> Self {
        Self {
            lists,
            particles,
            params,
        }
    }

    /// Ensures a list exists; returns `true` when it was created now.
    pub fn create_list_if_needed(&self, list: &ParticleList) -> ServiceResult<bool> {
        Ok(self.lists.create_if_needed(list)?)
    }

    /// Loads one list or fails with `ListNotFound`.
    pub fn require_list(&self, key: &ParticleListKey) -> ServiceResult<ParticleList> {
        self.lists
            .get(key)?
            .ok_or_else(|| ServiceError::ListNotFound(key.storage_key()))
    }

    pub fn lists_for_owner(&self, owner_id: &str) -> ServiceResult<Vec<ParticleList>> {
        Ok(self.lists.list_for_owner(owner_id)?)
    }

    /// Pipeline ingestion: lazily creates the auto list, then replaces one
    /// datum's document wholesale.
    ///
    /// # Contract
    /// - Fails with `InvalidList` when a user list already holds the name.
    /// - `version` is the generation of the freshly produced data.
    pub fn ingest_auto_particles(
        &self,
        list: &ParticleList,
        datum_id: &str,
        version: ParticlesVersion,
        particles: &BTreeMap<ParticleId, ParticleRecord>,
    ) -> ServiceResult<()> {
        if list.source != ParticleListSource::Auto {
            return Err(invalid_list(list));
        }
        ensure_records_fit(list, particles)?;
        self.lists.create_if_needed(list)?;
        let stored = self.require_list(&list.key)?;
        if stored.source != ParticleListSource::Auto {
            return Err(invalid_list(&stored));
        }
        ensure_records_fit(&stored, particles)?;

        let doc = stored.key.document(datum_id).map_err(StoreError::from)?;
        self.particles.import_particles(&doc, version, particles)?;
        Ok(())
    }

    /// Adds one user-picked particle and returns its new ID.
    pub fn add_user_particle(
        &self,
        key: &ParticleListKey,
        datum_id: &str,
        record: ParticleRecord,
    ) -> ServiceResult<ParticleId> {
        let list = self.require_user_list(key)?;
        if !list.holds(&record) {
            return Err(kind_mismatch(&list));
        }
        let doc = key.document(datum_id).map_err(StoreError::from)?;
        Ok(self.particles.add_particle(&doc, move || record)?)
    }

    /// Deletes one user-picked particle; returns whether it existed.
    pub fn delete_user_particle(
        &self,
        key: &ParticleListKey,
        datum_id: &str,
        particle_id: ParticleId,
    ) -> ServiceResult<bool> {
        self.require_user_list(key)?;
        let doc = key.document(datum_id).map_err(StoreError::from)?;
        Ok(self.particles.delete_particle(&doc, particle_id)?)
    }

    /// Sets or clears one particle's threshold on a user list.
    pub fn set_user_threshold(
        &self,
        key: &ParticleListKey,
        datum_id: &str,
        particle_id: ParticleId,
        threshold: Option<VirionThreshold>,
    ) -> ServiceResult<()> {
        self.require_user_list(key)?;
        let doc = key.document(datum_id).map_err(StoreError::from)?;
        Ok(self.particles.set_threshold(&doc, particle_id, threshold)?)
    }

    pub fn get_thresholds(
        &self,
        key: &ParticleListKey,
        datum_id: &str,
    ) -> ServiceResult<BTreeMap<ParticleId, VirionThreshold>> {
        let doc = key.document(datum_id).map_err(StoreError::from)?;
        Ok(self.particles.get_thresholds(&doc)?)
    }

    /// Raw stored particles, version tag included.
    pub fn get_particles(&self, key: &ParticleListKey, datum_id: &str) -> ServiceResult<ParticleSet> {
        let doc = key.document(datum_id).map_err(StoreError::from)?;
        Ok(self.particles.get_particles(&doc)?)
    }

    /// Particles in canonical unbinned space, migrating legacy sets on read.
    pub fn get_unbinned_particles(
        &self,
        key: &ParticleListKey,
        datum_id: &str,
    ) -> ServiceResult<ParticleSet> {
        let list = self.require_list(key)?;
        let stored = self.get_particles(key, datum_id)?;

        let needs_params = stored.version == ParticlesVersion::Legacy
            && list.list_type != ParticleListType::Particles2D;
        let params = if needs_params {
            self.params.pipeline_params(key.owner_id())
        } else {
            None
        };

        migrate_particles(&stored, list.list_type, params.as_ref()).map_err(|err| match err {
            MigrationError::ParametersMissing { parameter } => {
                warn!(
                    "event=particles_unbin module=service status=error list={} error_code=params_missing parameter={}",
                    key, parameter
                );
                ServiceError::MigrationParametersMissing {
                    owner_id: key.owner_id().to_string(),
                    parameter,
                }
            }
            other => ServiceError::Migration(other),
        })
    }

    pub fn count(&self, key: &ParticleListKey, datum_id: &str) -> ServiceResult<u64> {
        let doc = key.document(datum_id).map_err(StoreError::from)?;
        Ok(self.particles.count(&doc)?)
    }

    pub fn count_all(&self, key: &ParticleListKey) -> ServiceResult<u64> {
        Ok(self.particles.count_all(key)?)
    }

    pub fn datums(&self, key: &ParticleListKey) -> ServiceResult<Vec<String>> {
        Ok(self.particles.list_datums(key)?)
    }

    pub fn next_id(&self, key: &ParticleListKey, datum_id: &str) -> ServiceResult<ParticleId> {
        let doc = key.document(datum_id).map_err(StoreError::from)?;
        Ok(self.particles.next_id(&doc)?)
    }

    /// Deletes a list and all of its documents; returns whether the list
    /// existed.
    pub fn delete_list(&self, key: &ParticleListKey) -> ServiceResult<bool> {
        let documents = self.particles.delete_documents(key, None)?;
        let existed = self.lists.delete(key)?;
        info!(
            "event=list_delete module=service status=ok list={} existed={} documents={}",
            key, existed, documents
        );
        Ok(existed)
    }

    /// Deletes every list and document of an owner; returns lists removed.
    pub fn delete_owner(&self, owner_id: &str) -> ServiceResult<u64> {
        let documents = self.particles.delete_owner(owner_id)?;
        let lists = self.lists.delete_all(owner_id)?;
        info!(
            "event=owner_delete module=service status=ok owner={} lists={} documents={}",
            owner_id, lists, documents
        );
        Ok(lists)
    }

    /// Renames a list and moves its documents, keeping IDs and `next_id`.
    ///
    /// When the documents cannot be moved the list keeps its old name.
    pub fn rename_list(&self, key: &ParticleListKey, new_name: &str) -> ServiceResult<ParticleList> {
        let renamed = self.lists.rename(key, new_name)?;
        let moved = self.particles.rename_all(
            &StoreNamespace::List(key.clone()),
            &StoreNamespace::List(renamed.key.clone()),
        );
        if let Err(err) = moved {
            warn!(
                "event=list_rename module=service status=error list={} target={} error={}",
                key, renamed.key, err
            );
            self.lists.rename(&renamed.key, key.name())?;
            return Err(err.into());
        }
        Ok(renamed)
    }

    /// Copies an owner's lists and documents to another owner.
    ///
    /// Fails with `ListConflict`, before writing anything, when the target
    /// owner holds a same-named list of another type or source.
    pub fn copy_owner(&self, from_owner: &str, to_owner: &str) -> ServiceResult<u64> {
        for source in self.lists.list_for_owner(from_owner)? {
            let target_key = ParticleListKey::new(to_owner, source.key.name())
                .map_err(StoreError::from)?;
            let Some(target) = self.lists.get(&target_key)? else {
                continue;
            };
            if target.list_type != source.list_type || target.source != source.source {
                warn!(
                    "event=owner_copy module=service status=error from={} to={} error_code=list_conflict list={}",
                    from_owner, to_owner, target_key
                );
                return Err(ServiceError::ListConflict(target_key.storage_key()));
            }
        }
        self.lists.copy_all(from_owner, to_owner)?;
        let documents = self.particles.copy_all(
            &StoreNamespace::Owner(from_owner.to_string()),
            &StoreNamespace::Owner(to_owner.to_string()),
        )?;
        Ok(documents)
    }

    fn require_user_list(&self, key: &ParticleListKey) -> ServiceResult<ParticleList> {
        let list = self.require_list(key)?;
        if !list.accepts_user_edits() {
            return Err(invalid_list(&list));
        }
        Ok(list)
    }
}

fn ensure_records_fit(
    list: &ParticleList,
    particles: &BTreeMap<ParticleId, ParticleRecord>,
) -> ServiceResult<()> {
    match particles.values().find(|record| !list.holds(record)) {
        Some(record) => {
            warn!(
                "event=particles_ingest module=service status=error list={} kind={:?}",
                list.key,
                record.kind()
            );
            Err(kind_mismatch(list))
        }
        None => Ok(()),
    }
}

fn invalid_list(list: &ParticleList) -> ServiceError {
    ServiceError::InvalidList {
        list_key: list.key.storage_key(),
        list_source: list.source,
    }
}

fn kind_mismatch(list: &ParticleList) -> ServiceError {
    ServiceError::RecordKindMismatch {
        list_key: list.key.storage_key(),
        list_type: list.list_type,
    }
}
