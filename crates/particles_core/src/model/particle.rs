//! Particle records and versioned particle sets.
//!
//! # Responsibility
//! - Define 2D and 3D particle geometry in space-tagged coordinate types.
//! - Define the version tag that decides whether a stored set needs
//!   migration before display or export.
//!
//! # Invariants
//! - 2D particles are always unbinned, whatever the version of their set.
//! - A 3D record conforms to `Unbinned` only when every component is unbinned,
//!   and to `Legacy` only when every component is binned.
//! - Particle IDs are strictly positive.

use super::coordinate::{
    BinnedFloat, BinnedInt, CoordinateError, CoordinateFloat, CoordinateInt, CoordinateSpace,
    UnbinnedFloat, UnbinnedInt,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Per-document particle identifier. Allocated from a monotonic counter.
pub type ParticleId = u32;

/// Per-particle segmentation threshold stored beside virion geometry.
pub type VirionThreshold = i64;

/// Micrograph particle: position and radius in unbinned pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Particle2D {
    pub x: UnbinnedInt,
    pub y: UnbinnedInt,
    pub r: UnbinnedFloat,
}

impl Particle2D {
    pub fn new(x: i64, y: i64, r: f64) -> Result<Self, CoordinateError> {
        Ok(Self {
            x: UnbinnedInt::new(x),
            y: UnbinnedInt::new(y),
            r: UnbinnedFloat::new(r)?,
        })
    }
}

/// Tomogram particle whose components carry their own space tag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Particle3D {
    pub x: CoordinateInt,
    pub y: CoordinateInt,
    pub z: CoordinateInt,
    pub r: CoordinateFloat,
}

impl Particle3D {
    /// Builds a particle in tomogram (binned) pixel space.
    pub fn binned(x: i64, y: i64, z: i64, r: f64) -> Result<Self, CoordinateError> {
        Ok(Self {
            x: BinnedInt::new(x).into(),
            y: BinnedInt::new(y).into(),
            z: BinnedInt::new(z).into(),
            r: BinnedFloat::new(r)?.into(),
        })
    }

    /// Builds a particle in full-resolution pixel space.
    pub fn unbinned(x: i64, y: i64, z: i64, r: f64) -> Result<Self, CoordinateError> {
        Ok(Self {
            x: UnbinnedInt::new(x).into(),
            y: UnbinnedInt::new(y).into(),
            z: UnbinnedInt::new(z).into(),
            r: UnbinnedFloat::new(r)?.into(),
        })
    }

    /// Returns the shared space of all components, or `None` when mixed.
    pub fn space(&self) -> Option<CoordinateSpace> {
        let space = self.x.space();
        let uniform = [self.y.space(), self.z.space(), self.r.space()]
            .into_iter()
            .all(|other| other == space);
        uniform.then_some(space)
    }
}

/// Dimensionality of a particle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticleKind {
    TwoD,
    ThreeD,
}

/// One stored particle.
///
/// Persisted as internally-tagged JSON: `{"kind": "3d", "x": {...}, ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ParticleRecord {
    #[serde(rename = "2d")]
    TwoD(Particle2D),
    #[serde(rename = "3d")]
    ThreeD(Particle3D),
}

impl ParticleRecord {
    pub fn kind(&self) -> ParticleKind {
        match self {
            Self::TwoD(_) => ParticleKind::TwoD,
            Self::ThreeD(_) => ParticleKind::ThreeD,
        }
    }

    /// Checks that the record's space tags agree with a set version.
    pub fn conforms_to(&self, version: ParticlesVersion) -> Result<(), RecordSpaceError> {
        let particle = match self {
            Self::TwoD(_) => return Ok(()),
            Self::ThreeD(particle) => particle,
        };
        let actual = particle.space().ok_or(RecordSpaceError::MixedSpaces)?;
        let expected = version.space_3d();
        if actual != expected {
            return Err(RecordSpaceError::SpaceMismatch {
                version,
                expected,
                actual,
            });
        }
        Ok(())
    }
}

impl From<Particle2D> for ParticleRecord {
    fn from(value: Particle2D) -> Self {
        Self::TwoD(value)
    }
}

impl From<Particle3D> for ParticleRecord {
    fn from(value: Particle3D) -> Self {
        Self::ThreeD(value)
    }
}

/// Record space tags disagree with each other or with the set version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSpaceError {
    MixedSpaces,
    SpaceMismatch {
        version: ParticlesVersion,
        expected: CoordinateSpace,
        actual: CoordinateSpace,
    },
}

impl Display for RecordSpaceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MixedSpaces => write!(f, "particle mixes binned and unbinned components"),
            Self::SpaceMismatch {
                version,
                expected,
                actual,
            } => write!(
                f,
                "{version} particle sets hold {expected} 3D values, got {actual}"
            ),
        }
    }
}

impl Error for RecordSpaceError {}

/// Storage generation of a whole particle set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticlesVersion {
    /// 3D values were written in (possibly extra-)binned tomogram space.
    Legacy,
    /// All values are canonical full-resolution pixels.
    Unbinned,
}

impl ParticlesVersion {
    pub fn as_db(self) -> i64 {
        match self {
            Self::Legacy => 0,
            Self::Unbinned => 1,
        }
    }

    pub fn from_db(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Legacy),
            1 => Some(Self::Unbinned),
            _ => None,
        }
    }

    /// Version for a document created lazily by its first record.
    pub fn for_first_record(record: &ParticleRecord) -> Self {
        match record {
            ParticleRecord::ThreeD(particle)
                if particle.space() == Some(CoordinateSpace::Binned) =>
            {
                Self::Legacy
            }
            _ => Self::Unbinned,
        }
    }

    fn space_3d(self) -> CoordinateSpace {
        match self {
            Self::Legacy => CoordinateSpace::Binned,
            Self::Unbinned => CoordinateSpace::Unbinned,
        }
    }
}

impl Display for ParticlesVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Legacy => f.write_str("legacy"),
            Self::Unbinned => f.write_str("unbinned"),
        }
    }
}

/// Particles of one document together with their version tag.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleSet {
    pub version: ParticlesVersion,
    pub particles: BTreeMap<ParticleId, ParticleRecord>,
}

impl ParticleSet {
    pub fn new(version: ParticlesVersion, particles: BTreeMap<ParticleId, ParticleRecord>) -> Self {
        Self { version, particles }
    }

    /// Set returned for documents that do not exist.
    pub fn empty() -> Self {
        Self::new(ParticlesVersion::Unbinned, BTreeMap::new())
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
}
