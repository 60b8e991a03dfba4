//! Particle list handles and storage keys.
//!
//! # Responsibility
//! - Name one owner's collection of particles and its kind/provenance.
//! - Build the composite storage keys used by the persistence layer.
//!
//! # Invariants
//! - Key segments are non-empty and never contain `/`, so composite keys
//!   `{owner}/{name}` and `{owner}/{name}/{datum}` are unambiguous.
//! - `(owner_id, name)` uniquely identifies a list.

use super::particle::{ParticleKind, ParticleRecord};
use std::error::Error;
use std::fmt::{Display, Formatter};

const KEY_SEPARATOR: char = '/';

/// Kind of particles a list holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticleListType {
    /// Micrograph picks.
    Particles2D,
    /// Generic tomogram picks (spikes etc.).
    Particles3D,
    /// Tomogram virion picks.
    Virions3D,
}

impl ParticleListType {
    pub fn as_db(self) -> &'static str {
        match self {
            Self::Particles2D => "particles2d",
            Self::Particles3D => "particles3d",
            Self::Virions3D => "virions3d",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "particles2d" => Some(Self::Particles2D),
            "particles3d" => Some(Self::Particles3D),
            "virions3d" => Some(Self::Virions3D),
            _ => None,
        }
    }

    /// Record dimensionality stored in lists of this type.
    pub fn particle_kind(self) -> ParticleKind {
        match self {
            Self::Particles2D => ParticleKind::TwoD,
            Self::Particles3D | Self::Virions3D => ParticleKind::ThreeD,
        }
    }
}

/// Who writes a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticleListSource {
    /// Curated by users one particle at a time.
    User,
    /// Written wholesale by pipeline ingestion.
    Auto,
}

impl ParticleListSource {
    pub fn as_db(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Auto => "auto",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

impl Display for ParticleListSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db())
    }
}

/// Rejected key segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    Empty(&'static str),
    ContainsSeparator { field: &'static str, value: String },
}

impl Display for KeyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty(field) => write!(f, "{field} must not be empty"),
            Self::ContainsSeparator { field, value } => {
                write!(f, "{field} `{value}` must not contain `{KEY_SEPARATOR}`")
            }
        }
    }
}

impl Error for KeyError {}

fn checked_segment(field: &'static str, value: impl Into<String>) -> Result<String, KeyError> {
    let value = value.into();
    if value.is_empty() {
        return Err(KeyError::Empty(field));
    }
    if value.contains(KEY_SEPARATOR) {
        return Err(KeyError::ContainsSeparator { field, value });
    }
    Ok(value)
}

/// Identity of one particle list: `(owner_id, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticleListKey {
    owner_id: String,
    name: String,
}

impl ParticleListKey {
    pub fn new(owner_id: impl Into<String>, name: impl Into<String>) -> Result<Self, KeyError> {
        Ok(Self {
            owner_id: checked_segment("owner_id", owner_id)?,
            name: checked_segment("list name", name)?,
        })
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Composite key `{owner_id}/{name}`.
    pub fn storage_key(&self) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.owner_id, self.name)
    }

    pub fn document(&self, datum_id: impl Into<String>) -> Result<DocumentKey, KeyError> {
        DocumentKey::new(self.clone(), datum_id)
    }
}

impl Display for ParticleListKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Identity of one particle document: list key plus datum id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentKey {
    list: ParticleListKey,
    datum_id: String,
}

impl DocumentKey {
    pub fn new(list: ParticleListKey, datum_id: impl Into<String>) -> Result<Self, KeyError> {
        Ok(Self {
            list,
            datum_id: checked_segment("datum_id", datum_id)?,
        })
    }

    pub fn list(&self) -> &ParticleListKey {
        &self.list
    }

    pub fn datum_id(&self) -> &str {
        &self.datum_id
    }

    /// Composite key `{owner_id}/{name}/{datum_id}`.
    pub fn storage_key(&self) -> String {
        format!(
            "{}{KEY_SEPARATOR}{}",
            self.list.storage_key(),
            self.datum_id
        )
    }
}

impl Display for DocumentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Named, typed, sourced particle collection of one owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticleList {
    pub key: ParticleListKey,
    pub list_type: ParticleListType,
    pub source: ParticleListSource,
}

impl ParticleList {
    pub fn new(key: ParticleListKey, list_type: ParticleListType, source: ParticleListSource) -> Self {
        Self {
            key,
            list_type,
            source,
        }
    }

    /// Whether single-particle user edits are allowed.
    pub fn accepts_user_edits(&self) -> bool {
        self.source == ParticleListSource::User
    }

    /// Whether the record's dimensionality matches this list.
    pub fn holds(&self, record: &ParticleRecord) -> bool {
        record.kind() == self.list_type.particle_kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_keys_join_segments() {
        let list = ParticleListKey::new("job-1", "picks").unwrap();
        let doc = list.document("TS_01").unwrap();
        assert_eq!(list.storage_key(), "job-1/picks");
        assert_eq!(doc.storage_key(), "job-1/picks/TS_01");
    }

    #[test]
    fn segments_reject_empty_and_separator() {
        assert_eq!(
            ParticleListKey::new("", "picks").unwrap_err(),
            KeyError::Empty("owner_id")
        );
        assert!(matches!(
            ParticleListKey::new("job", "a/b"),
            Err(KeyError::ContainsSeparator {
                field: "list name",
                ..
            })
        ));
        let list = ParticleListKey::new("job", "picks").unwrap();
        assert_eq!(list.document("").unwrap_err(), KeyError::Empty("datum_id"));
    }

    #[test]
    fn list_type_round_trips_through_db_names() {
        for list_type in [
            ParticleListType::Particles2D,
            ParticleListType::Particles3D,
            ParticleListType::Virions3D,
        ] {
            assert_eq!(ParticleListType::from_db(list_type.as_db()), Some(list_type));
        }
        assert_eq!(ParticleListSource::from_db("robot"), None);
    }
}
