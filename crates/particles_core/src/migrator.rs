//! Read-time conversion of legacy particle sets into unbinned coordinates.
//!
//! # Responsibility
//! - Undo the tomogram binning and any method-specific extra binning that
//!   legacy 3D particle sets were stored with.
//!
//! # Invariants
//! - Pure: never touches storage, never needs locking.
//! - Idempotent: an `Unbinned` set is returned unchanged.
//! - 2D sets are already canonical and are only retagged.

use crate::model::coordinate::{
    BinningFactor, CoordinateError, CoordinateFloat, CoordinateInt, CoordinateSpace,
};
use crate::model::particle::{
    Particle3D, ParticleId, ParticleKind, ParticleRecord, ParticleSet, ParticlesVersion,
};
use crate::model::particle_list::ParticleListType;
use crate::model::pipeline::{PipelineParams, VirionDetectionMethod};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from unbinning a legacy particle set.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationError {
    /// A pipeline parameter needed for this set is unavailable.
    ParametersMissing { parameter: &'static str },
    /// A record's dimensionality does not match its list type.
    UnexpectedRecordKind {
        particle_id: ParticleId,
        expected: ParticleKind,
    },
    /// A legacy 3D component is not in binned space.
    UnexpectedSpace {
        particle_id: ParticleId,
        space: CoordinateSpace,
    },
    /// Scaling produced an out-of-range value.
    MalformedValue {
        particle_id: ParticleId,
        error: CoordinateError,
    },
}

impl Display for MigrationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ParametersMissing { parameter } => {
                write!(f, "pipeline parameter `{parameter}` is required to unbin particles")
            }
            Self::UnexpectedRecordKind {
                particle_id,
                expected,
            } => {
                let expected = match expected {
                    ParticleKind::TwoD => "2D",
                    ParticleKind::ThreeD => "3D",
                };
                write!(f, "particle {particle_id} is not a {expected} particle")
            }
            Self::UnexpectedSpace { particle_id, space } => write!(
                f,
                "legacy particle {particle_id} has a {space} component, expected binned"
            ),
            Self::MalformedValue { particle_id, error } => {
                write!(f, "particle {particle_id}: {error}")
            }
        }
    }
}

impl Error for MigrationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MalformedValue { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Method-specific binning layered on top of the tomogram binning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtraBinning {
    pub coords: Option<BinningFactor>,
    pub radius: Option<BinningFactor>,
}

impl ExtraBinning {
    const NONE: Self = Self {
        coords: None,
        radius: None,
    };
}

/// Resolves the extra binning legacy picks of this list type carry.
pub fn extra_binning(
    list_type: ParticleListType,
    params: &PipelineParams,
) -> Result<ExtraBinning, MigrationError> {
    if list_type != ParticleListType::Virions3D {
        return Ok(ExtraBinning::NONE);
    }

    let virion_binning = || {
        params.virion_binning.ok_or(MigrationError::ParametersMissing {
            parameter: "virion_binning",
        })
    };

    let extra = match params.virion_detection_method {
        VirionDetectionMethod::None => ExtraBinning::NONE,
        VirionDetectionMethod::Auto => ExtraBinning {
            coords: None,
            radius: Some(virion_binning()?),
        },
        VirionDetectionMethod::Manual => {
            let factor = virion_binning()?;
            ExtraBinning {
                coords: Some(factor),
                radius: Some(factor),
            }
        }
        VirionDetectionMethod::PypTrain | VirionDetectionMethod::PypEval => ExtraBinning {
            coords: Some(virion_binning()?),
            radius: None,
        },
    };
    Ok(extra)
}

/// Returns `set` expressed in unbinned pixel space, tagged `Unbinned`.
///
/// `params` is only consulted for legacy 3D sets; passing `None` there fails
/// with `MigrationError::ParametersMissing`.
pub fn migrate_particles(
    set: &ParticleSet,
    list_type: ParticleListType,
    params: Option<&PipelineParams>,
) -> Result<ParticleSet, MigrationError> {
    if set.version == ParticlesVersion::Unbinned {
        return Ok(set.clone());
    }
    if list_type == ParticleListType::Particles2D {
        if let Some((&particle_id, _)) = set
            .particles
            .iter()
            .find(|(_, record)| record.kind() != ParticleKind::TwoD)
        {
            return Err(MigrationError::UnexpectedRecordKind {
                particle_id,
                expected: ParticleKind::TwoD,
            });
        }
        return Ok(ParticleSet::new(
            ParticlesVersion::Unbinned,
            set.particles.clone(),
        ));
    }

    let params = params.ok_or(MigrationError::ParametersMissing {
        parameter: "pipeline_params",
    })?;
    let tomogram = params
        .tomogram_binning
        .ok_or(MigrationError::ParametersMissing {
            parameter: "tomogram_binning",
        })?;
    let extra = extra_binning(list_type, params)?;

    let mut particles = BTreeMap::new();
    for (&id, record) in &set.particles {
        let particle = match record {
            ParticleRecord::ThreeD(particle) => particle,
            ParticleRecord::TwoD(_) => {
                return Err(MigrationError::UnexpectedRecordKind {
                    particle_id: id,
                    expected: ParticleKind::ThreeD,
                });
            }
        };
        let unbinned = unbin_particle(id, particle, tomogram, extra)?;
        particles.insert(id, ParticleRecord::ThreeD(unbinned));
    }

    Ok(ParticleSet::new(ParticlesVersion::Unbinned, particles))
}

fn unbin_particle(
    id: ParticleId,
    particle: &Particle3D,
    tomogram: BinningFactor,
    extra: ExtraBinning,
) -> Result<Particle3D, MigrationError> {
    let coords_extra = extra.coords.unwrap_or(BinningFactor::ONE);
    let radius_extra = extra.radius.unwrap_or(BinningFactor::ONE);

    Ok(Particle3D {
        x: unbin_int(id, particle.x, coords_extra, tomogram)?,
        y: unbin_int(id, particle.y, coords_extra, tomogram)?,
        z: unbin_int(id, particle.z, coords_extra, tomogram)?,
        r: unbin_float(id, particle.r, radius_extra, tomogram)?,
    })
}

fn unbin_int(
    id: ParticleId,
    value: CoordinateInt,
    extra: BinningFactor,
    tomogram: BinningFactor,
) -> Result<CoordinateInt, MigrationError> {
    let CoordinateInt::Binned(binned) = value else {
        return Err(MigrationError::UnexpectedSpace {
            particle_id: id,
            space: value.space(),
        });
    };
    binned
        .without_extra_binning(extra)
        .and_then(|value| value.to_unbinned(tomogram))
        .map(CoordinateInt::Unbinned)
        .map_err(|error| MigrationError::MalformedValue {
            particle_id: id,
            error,
        })
}

fn unbin_float(
    id: ParticleId,
    value: CoordinateFloat,
    extra: BinningFactor,
    tomogram: BinningFactor,
) -> Result<CoordinateFloat, MigrationError> {
    let CoordinateFloat::Binned(binned) = value else {
        return Err(MigrationError::UnexpectedSpace {
            particle_id: id,
            space: value.space(),
        });
    };
    binned
        .without_extra_binning(extra)
        .and_then(|value| value.to_unbinned(tomogram))
        .map(CoordinateFloat::Unbinned)
        .map_err(|error| MigrationError::MalformedValue {
            particle_id: id,
            error,
        })
}
