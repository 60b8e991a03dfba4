//! Particle document repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist particle documents keyed by `(owner, list, datum)`.
//! - Allocate particle IDs atomically under an injected `IdAllocationLock`.
//! - Keep the per-particle threshold sidecar separate from geometry.
//!
//! # Invariants
//! - IDs come from each document's monotonic `next_id`; deletes never lower
//!   it, so `add_particle` never reissues an ID.
//! - Every read validates JSON shape, finite values, and that record space
//!   tags match the document version; violations are `CorruptRecord`.
//! - A document's version only moves `Legacy -> Unbinned`; importing a legacy
//!   set over an unbinned document is rejected.
//! - `import_particles` replaces a document wholesale and takes no allocation
//!   lock. An import computed from a stale snapshot can drop a concurrent
//!   add and later reissue its ID.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::coordinate::CoordinateError;
use crate::model::particle::{
    ParticleId, ParticleRecord, ParticleSet, ParticlesVersion, VirionThreshold,
};
use crate::model::particle_list::{DocumentKey, KeyError, ParticleListKey};
use crate::repo::id_lock::IdAllocationLock;
use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from particle list and particle document persistence.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error, passed through unchanged.
    Db(DbError),
    /// Target particle list does not exist.
    ListNotFound(String),
    /// Rename target list already exists.
    ListAlreadyExists(String),
    /// Target particle document does not exist.
    DocumentNotFound(String),
    /// Target particle does not exist in its document.
    ParticleNotFound {
        doc_key: String,
        particle_id: ParticleId,
    },
    /// Particle IDs must be strictly positive.
    InvalidParticleId(ParticleId),
    /// Document ID counter cannot advance further.
    IdSpaceExhausted(String),
    /// Key segment rejected.
    InvalidKey(KeyError),
    /// Coordinate value rejected.
    MalformedValue(CoordinateError),
    /// Record rejected before write (e.g. space does not match version).
    InvalidRecord(String),
    /// Legacy import over a document already stored unbinned.
    VersionDowngrade(String),
    /// Copy/rename between namespaces of different shapes.
    NamespaceMismatch,
    /// Persisted data failed validation on read.
    CorruptRecord { key: String, message: String },
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::ListNotFound(key) => write!(f, "particle list not found: {key}"),
            Self::ListAlreadyExists(key) => write!(f, "particle list already exists: {key}"),
            Self::DocumentNotFound(key) => write!(f, "particle document not found: {key}"),
            Self::ParticleNotFound {
                doc_key,
                particle_id,
            } => write!(f, "particle {particle_id} not found in {doc_key}"),
            Self::InvalidParticleId(id) => write!(f, "particle id must be positive, got {id}"),
            Self::IdSpaceExhausted(key) => write!(f, "particle ids exhausted for {key}"),
            Self::InvalidKey(err) => write!(f, "{err}"),
            Self::MalformedValue(err) => write!(f, "{err}"),
            Self::InvalidRecord(message) => write!(f, "invalid particle record: {message}"),
            Self::VersionDowngrade(key) => {
                write!(f, "particle document {key} is unbinned; legacy import refused")
            }
            Self::NamespaceMismatch => {
                write!(f, "copy/rename requires namespaces of the same shape")
            }
            Self::CorruptRecord { key, message } => {
                write!(f, "invalid persisted particle data at {key}: {message}")
            }
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "particle repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "particle repository requires table `{table}`")
            }
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidKey(err) => Some(err),
            Self::MalformedValue(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<KeyError> for StoreError {
    fn from(value: KeyError) -> Self {
        Self::InvalidKey(value)
    }
}

impl From<CoordinateError> for StoreError {
    fn from(value: CoordinateError) -> Self {
        Self::MalformedValue(value)
    }
}

/// Group of documents addressed by copy/rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreNamespace {
    /// Every document of one owner.
    Owner(String),
    /// Every document of one list.
    List(ParticleListKey),
}

/// Repository interface for particle documents.
pub trait ParticleRepository {
    /// Loads one document; absent documents yield an empty set.
    fn get_particles(&self, doc: &DocumentKey) -> StoreResult<ParticleSet>;
    /// Returns the ID the next `add_particle` will allocate (1 when absent).
    fn next_id(&self, doc: &DocumentKey) -> StoreResult<ParticleId>;
    /// Counts particles in one document without decoding them.
    fn count(&self, doc: &DocumentKey) -> StoreResult<u64>;
    /// Counts particles across every document of one list.
    fn count_all(&self, list: &ParticleListKey) -> StoreResult<u64>;
    /// Lists datum ids that have a document in this list.
    fn list_datums(&self, list: &ParticleListKey) -> StoreResult<Vec<String>>;
    /// Replaces a document wholesale; `next_id` becomes `len + 1`.
    /// Fails with `VersionDowngrade` when a legacy set would replace an
    /// unbinned document.
    fn import_particles(
        &self,
        doc: &DocumentKey,
        version: ParticlesVersion,
        particles: &BTreeMap<ParticleId, ParticleRecord>,
    ) -> StoreResult<()>;
    /// Allocates the next ID and stores `build()` under it, creating the
    /// document when absent.
    fn add_particle<F>(&self, doc: &DocumentKey, build: F) -> StoreResult<ParticleId>
    where
        F: FnOnce() -> ParticleRecord;
    /// Removes one particle; returns whether it existed.
    fn delete_particle(&self, doc: &DocumentKey, particle_id: ParticleId) -> StoreResult<bool>;
    /// Removes every document of a list, or only one datum's document.
    fn delete_documents(&self, list: &ParticleListKey, datum_id: Option<&str>)
        -> StoreResult<u64>;
    /// Removes every document of an owner.
    fn delete_owner(&self, owner_id: &str) -> StoreResult<u64>;
    /// Sets (`Some`) or clears (`None`) one particle's threshold.
    fn set_threshold(
        &self,
        doc: &DocumentKey,
        particle_id: ParticleId,
        threshold: Option<VirionThreshold>,
    ) -> StoreResult<()>;
    /// Loads the threshold sidecar of one document.
    fn get_thresholds(&self, doc: &DocumentKey)
        -> StoreResult<BTreeMap<ParticleId, VirionThreshold>>;
    /// Copies every document of `from` into `to`, overwriting targets.
    fn copy_all(&self, from: &StoreNamespace, to: &StoreNamespace) -> StoreResult<u64>;
    /// Moves every document of `from` into `to`.
    fn rename_all(&self, from: &StoreNamespace, to: &StoreNamespace) -> StoreResult<u64>;
}

/// SQLite-backed particle repository.
///
/// Each thread should own its connection; share the `IdAllocationLock`.
pub struct SqliteParticleRepository<'conn> {
    conn: &'conn Connection,
    id_lock: Arc<IdAllocationLock>,
}

impl<'conn> SqliteParticleRepository<'conn> {
    /// Creates repository from a migrated connection and a shared lock.
    pub fn try_new(conn: &'conn Connection, id_lock: Arc<IdAllocationLock>) -> StoreResult<Self> {
        ensure_store_connection_ready(conn)?;
        Ok(Self { conn, id_lock })
    }
}

#[derive(Debug, Clone, Copy)]
struct DocumentHeader {
    version: ParticlesVersion,
    next_id: ParticleId,
}

#[derive(Debug, Clone)]
struct StoredDocument {
    doc_key: String,
    key: DocumentKey,
    header: DocumentHeader,
}

impl ParticleRepository for SqliteParticleRepository<'_> {
    fn get_particles(&self, doc: &DocumentKey) -> StoreResult<ParticleSet> {
        let doc_key = doc.storage_key();
        let Some(header) = load_header(self.conn, &doc_key)? else {
            return Ok(ParticleSet::empty());
        };

        let mut stmt = self.conn.prepare(
            "SELECT particle_id, record
             FROM particles
             WHERE doc_key = ?1
             ORDER BY particle_id ASC;",
        )?;
        let mut rows = stmt.query([doc_key.as_str()])?;
        let mut particles = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let particle_id = parse_particle_id(&doc_key, row.get(0)?)?;
            let payload: String = row.get(1)?;
            let record = decode_record(&doc_key, particle_id, &payload, header.version)?;
            particles.insert(particle_id, record);
        }

        Ok(ParticleSet::new(header.version, particles))
    }

    fn next_id(&self, doc: &DocumentKey) -> StoreResult<ParticleId> {
        Ok(load_header(self.conn, &doc.storage_key())?.map_or(1, |header| header.next_id))
    }

    fn count(&self, doc: &DocumentKey) -> StoreResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM particles WHERE doc_key = ?1;",
            [doc.storage_key()],
            |row| row.get(0),
        )?;
        Ok(count.unsigned_abs())
    }

    fn count_all(&self, list: &ParticleListKey) -> StoreResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*)
             FROM particles p
             INNER JOIN particle_documents d ON d.doc_key = p.doc_key
             WHERE d.owner_id = ?1
               AND d.list_name = ?2;",
            params![list.owner_id(), list.name()],
            |row| row.get(0),
        )?;
        Ok(count.unsigned_abs())
    }

    fn list_datums(&self, list: &ParticleListKey) -> StoreResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT datum_id
             FROM particle_documents
             WHERE owner_id = ?1
               AND list_name = ?2
             ORDER BY datum_id ASC;",
        )?;
        let mut rows = stmt.query(params![list.owner_id(), list.name()])?;
        let mut datums = Vec::new();
        while let Some(row) = rows.next()? {
            datums.push(row.get(0)?);
        }
        Ok(datums)
    }

    fn import_particles(
        &self,
        doc: &DocumentKey,
        version: ParticlesVersion,
        particles: &BTreeMap<ParticleId, ParticleRecord>,
    ) -> StoreResult<()> {
        let doc_key = doc.storage_key();
        let mut payloads = Vec::with_capacity(particles.len());
        for (&particle_id, record) in particles {
            if particle_id == 0 {
                return Err(StoreError::InvalidParticleId(particle_id));
            }
            payloads.push((particle_id, encode_record(record, version)?));
        }
        let next_id = ParticleId::try_from(particles.len())
            .ok()
            .and_then(|len| len.checked_add(1))
            .ok_or_else(|| StoreError::IdSpaceExhausted(doc_key.clone()))?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let existing = load_header(&tx, &doc_key)?;
        if version == ParticlesVersion::Legacy
            && existing.is_some_and(|header| header.version == ParticlesVersion::Unbinned)
        {
            warn!(
                "event=particles_import module=store status=error doc={} error_code=version_downgrade",
                doc_key
            );
            return Err(StoreError::VersionDowngrade(doc_key));
        }
        upsert_document(&tx, doc, version, next_id)?;
        tx.execute("DELETE FROM particles WHERE doc_key = ?1;", [doc_key.as_str()])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO particles (doc_key, particle_id, record) VALUES (?1, ?2, ?3);",
            )?;
            for (particle_id, payload) in &payloads {
                insert.execute(params![doc_key, particle_id, payload])?;
            }
        }
        tx.commit()?;

        info!(
            "event=particles_import module=store status=ok doc={} version={} count={} next_id={}",
            doc_key,
            version,
            payloads.len(),
            next_id
        );
        Ok(())
    }

    fn add_particle<F>(&self, doc: &DocumentKey, build: F) -> StoreResult<ParticleId>
    where
        F: FnOnce() -> ParticleRecord,
    {
        let doc_key = doc.storage_key();
        let particle_id = self.id_lock.run_exclusive(&doc_key, || -> StoreResult<ParticleId> {
            let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
            let existing = load_header(&tx, &doc_key)?;
            let record = build();
            let header = existing.unwrap_or(DocumentHeader {
                version: ParticlesVersion::for_first_record(&record),
                next_id: 1,
            });
            let particle_id = header.next_id;
            let next_id = particle_id
                .checked_add(1)
                .ok_or_else(|| StoreError::IdSpaceExhausted(doc_key.clone()))?;
            let payload = encode_record(&record, header.version)?;

            upsert_document(&tx, doc, header.version, next_id)?;
            tx.execute(
                "INSERT OR REPLACE INTO particles (doc_key, particle_id, record)
                 VALUES (?1, ?2, ?3);",
                params![doc_key, particle_id, payload],
            )?;
            tx.commit()?;
            Ok(particle_id)
        })?;

        debug!(
            "event=particle_add module=store status=ok doc={} particle_id={}",
            doc_key, particle_id
        );
        Ok(particle_id)
    }

    fn delete_particle(&self, doc: &DocumentKey, particle_id: ParticleId) -> StoreResult<bool> {
        let doc_key = doc.storage_key();
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let removed = tx.execute(
            "DELETE FROM particles WHERE doc_key = ?1 AND particle_id = ?2;",
            params![doc_key, particle_id],
        )?;
        tx.execute(
            "DELETE FROM particle_thresholds WHERE doc_key = ?1 AND particle_id = ?2;",
            params![doc_key, particle_id],
        )?;
        tx.commit()?;

        debug!(
            "event=particle_delete module=store status=ok doc={} particle_id={} removed={}",
            doc_key,
            particle_id,
            removed > 0
        );
        Ok(removed > 0)
    }

    fn delete_documents(
        &self,
        list: &ParticleListKey,
        datum_id: Option<&str>,
    ) -> StoreResult<u64> {
        let removed = match datum_id {
            Some(datum_id) => self.conn.execute(
                "DELETE FROM particle_documents
                 WHERE owner_id = ?1 AND list_name = ?2 AND datum_id = ?3;",
                params![list.owner_id(), list.name(), datum_id],
            )?,
            None => self.conn.execute(
                "DELETE FROM particle_documents WHERE owner_id = ?1 AND list_name = ?2;",
                params![list.owner_id(), list.name()],
            )?,
        };
        info!(
            "event=documents_delete module=store status=ok list={} datum={} removed={}",
            list,
            datum_id.unwrap_or("*"),
            removed
        );
        Ok(removed as u64)
    }

    fn delete_owner(&self, owner_id: &str) -> StoreResult<u64> {
        let removed = self.conn.execute(
            "DELETE FROM particle_documents WHERE owner_id = ?1;",
            [owner_id],
        )?;
        info!(
            "event=documents_delete module=store status=ok owner={} removed={}",
            owner_id, removed
        );
        Ok(removed as u64)
    }

    fn set_threshold(
        &self,
        doc: &DocumentKey,
        particle_id: ParticleId,
        threshold: Option<VirionThreshold>,
    ) -> StoreResult<()> {
        let doc_key = doc.storage_key();
        if load_header(self.conn, &doc_key)?.is_none() {
            return Err(StoreError::DocumentNotFound(doc_key));
        }
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM particles WHERE doc_key = ?1 AND particle_id = ?2);",
            params![doc_key, particle_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::ParticleNotFound {
                doc_key,
                particle_id,
            });
        }

        match threshold {
            Some(threshold) => self.conn.execute(
                "INSERT INTO particle_thresholds (doc_key, particle_id, threshold)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (doc_key, particle_id) DO UPDATE SET threshold = excluded.threshold;",
                params![doc_key, particle_id, threshold],
            )?,
            None => self.conn.execute(
                "DELETE FROM particle_thresholds WHERE doc_key = ?1 AND particle_id = ?2;",
                params![doc_key, particle_id],
            )?,
        };
        Ok(())
    }

    fn get_thresholds(
        &self,
        doc: &DocumentKey,
    ) -> StoreResult<BTreeMap<ParticleId, VirionThreshold>> {
        let doc_key = doc.storage_key();
        let mut stmt = self.conn.prepare(
            "SELECT particle_id, threshold
             FROM particle_thresholds
             WHERE doc_key = ?1
             ORDER BY particle_id ASC;",
        )?;
        let mut rows = stmt.query([doc_key.as_str()])?;
        let mut thresholds = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let particle_id = parse_particle_id(&doc_key, row.get(0)?)?;
            thresholds.insert(particle_id, row.get(1)?);
        }
        Ok(thresholds)
    }

    fn copy_all(&self, from: &StoreNamespace, to: &StoreNamespace) -> StoreResult<u64> {
        if from == to {
            return Ok(0);
        }
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let copied = copy_namespace(&tx, from, to)?;
        tx.commit()?;

        info!(
            "event=documents_copy module=store status=ok from={} to={} count={}",
            namespace_label(from),
            namespace_label(to),
            copied.len()
        );
        Ok(copied.len() as u64)
    }

    fn rename_all(&self, from: &StoreNamespace, to: &StoreNamespace) -> StoreResult<u64> {
        if from == to {
            return Ok(0);
        }
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let moved = copy_namespace(&tx, from, to)?;
        for source_key in &moved {
            tx.execute(
                "DELETE FROM particle_documents WHERE doc_key = ?1;",
                [source_key.as_str()],
            )?;
        }
        tx.commit()?;

        info!(
            "event=documents_rename module=store status=ok from={} to={} count={}",
            namespace_label(from),
            namespace_label(to),
            moved.len()
        );
        Ok(moved.len() as u64)
    }
}

/// Copies documents, particles and thresholds; returns the source keys.
fn copy_namespace(
    conn: &Connection,
    from: &StoreNamespace,
    to: &StoreNamespace,
) -> StoreResult<Vec<String>> {
    let same_shape = matches!(
        (from, to),
        (StoreNamespace::Owner(_), StoreNamespace::Owner(_))
            | (StoreNamespace::List(_), StoreNamespace::List(_))
    );
    if !same_shape {
        return Err(StoreError::NamespaceMismatch);
    }

    let sources = load_namespace_documents(conn, from)?;
    let mut copied = Vec::with_capacity(sources.len());
    for source in sources {
        let target = retarget(&source.key, to)?;
        let target_key = target.storage_key();

        upsert_document(conn, &target, source.header.version, source.header.next_id)?;
        conn.execute("DELETE FROM particles WHERE doc_key = ?1;", [target_key.as_str()])?;
        conn.execute(
            "DELETE FROM particle_thresholds WHERE doc_key = ?1;",
            [target_key.as_str()],
        )?;
        conn.execute(
            "INSERT INTO particles (doc_key, particle_id, record)
             SELECT ?2, particle_id, record FROM particles WHERE doc_key = ?1;",
            params![source.doc_key, target_key],
        )?;
        conn.execute(
            "INSERT INTO particle_thresholds (doc_key, particle_id, threshold)
             SELECT ?2, particle_id, threshold FROM particle_thresholds WHERE doc_key = ?1;",
            params![source.doc_key, target_key],
        )?;
        copied.push(source.doc_key);
    }
    Ok(copied)
}

fn retarget(source: &DocumentKey, to: &StoreNamespace) -> StoreResult<DocumentKey> {
    let list = match to {
        StoreNamespace::Owner(owner_id) => {
            ParticleListKey::new(owner_id.as_str(), source.list().name())?
        }
        StoreNamespace::List(list) => list.clone(),
    };
    Ok(DocumentKey::new(list, source.datum_id())?)
}

fn load_namespace_documents(
    conn: &Connection,
    namespace: &StoreNamespace,
) -> StoreResult<Vec<StoredDocument>> {
    let (sql, owner_id, list_name) = match namespace {
        StoreNamespace::Owner(owner_id) => (
            "SELECT doc_key, owner_id, list_name, datum_id, version, next_id
             FROM particle_documents
             WHERE owner_id = ?1
             ORDER BY doc_key ASC;",
            owner_id.as_str(),
            None,
        ),
        StoreNamespace::List(list) => (
            "SELECT doc_key, owner_id, list_name, datum_id, version, next_id
             FROM particle_documents
             WHERE owner_id = ?1 AND list_name = ?2
             ORDER BY doc_key ASC;",
            list.owner_id(),
            Some(list.name()),
        ),
    };

    let mut stmt = conn.prepare(sql)?;
    let mut rows = match list_name {
        Some(list_name) => stmt.query(params![owner_id, list_name])?,
        None => stmt.query([owner_id])?,
    };
    let mut documents = Vec::new();
    while let Some(row) = rows.next()? {
        let doc_key: String = row.get("doc_key")?;
        let owner_id: String = row.get("owner_id")?;
        let list_name: String = row.get("list_name")?;
        let datum_id: String = row.get("datum_id")?;
        let key = ParticleListKey::new(owner_id, list_name)
            .and_then(|list| list.document(datum_id))
            .map_err(|err| corrupt(&doc_key, err.to_string()))?;
        if key.storage_key() != doc_key {
            return Err(corrupt(&doc_key, "doc_key does not match its key columns"));
        }
        let header = parse_header(&doc_key, row.get("version")?, row.get("next_id")?)?;
        documents.push(StoredDocument {
            doc_key,
            key,
            header,
        });
    }
    Ok(documents)
}

fn namespace_label(namespace: &StoreNamespace) -> String {
    match namespace {
        StoreNamespace::Owner(owner_id) => owner_id.clone(),
        StoreNamespace::List(list) => list.storage_key(),
    }
}

fn load_header(conn: &Connection, doc_key: &str) -> StoreResult<Option<DocumentHeader>> {
    let raw = conn
        .query_row(
            "SELECT version, next_id FROM particle_documents WHERE doc_key = ?1;",
            [doc_key],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;
    raw.map(|(version, next_id)| parse_header(doc_key, version, next_id))
        .transpose()
}

fn parse_header(doc_key: &str, version: i64, next_id: i64) -> StoreResult<DocumentHeader> {
    let version = ParticlesVersion::from_db(version)
        .ok_or_else(|| corrupt(doc_key, format!("unknown particles version `{version}`")))?;
    let next_id = ParticleId::try_from(next_id)
        .ok()
        .filter(|id| *id >= 1)
        .ok_or_else(|| corrupt(doc_key, format!("invalid next_id `{next_id}`")))?;
    Ok(DocumentHeader { version, next_id })
}

fn upsert_document(
    conn: &Connection,
    doc: &DocumentKey,
    version: ParticlesVersion,
    next_id: ParticleId,
) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO particle_documents (doc_key, owner_id, list_name, datum_id, version, next_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (doc_key) DO UPDATE SET
            version = excluded.version,
            next_id = excluded.next_id,
            updated_at = (strftime('%s', 'now') * 1000);",
        params![
            doc.storage_key(),
            doc.list().owner_id(),
            doc.list().name(),
            doc.datum_id(),
            version.as_db(),
            next_id,
        ],
    )?;
    Ok(())
}

fn parse_particle_id(doc_key: &str, raw: i64) -> StoreResult<ParticleId> {
    ParticleId::try_from(raw)
        .ok()
        .filter(|id| *id >= 1)
        .ok_or_else(|| corrupt(doc_key, format!("invalid particle id `{raw}`")))
}

fn encode_record(record: &ParticleRecord, version: ParticlesVersion) -> StoreResult<String> {
    record
        .conforms_to(version)
        .map_err(|err| StoreError::InvalidRecord(err.to_string()))?;
    serde_json::to_string(record).map_err(|err| StoreError::InvalidRecord(err.to_string()))
}

fn decode_record(
    doc_key: &str,
    particle_id: ParticleId,
    payload: &str,
    version: ParticlesVersion,
) -> StoreResult<ParticleRecord> {
    let key = format!("{doc_key}#{particle_id}");
    let record: ParticleRecord =
        serde_json::from_str(payload).map_err(|err| corrupt(&key, err.to_string()))?;
    record
        .conforms_to(version)
        .map_err(|err| corrupt(&key, err.to_string()))?;
    Ok(record)
}

fn corrupt(key: &str, message: impl Into<String>) -> StoreError {
    StoreError::CorruptRecord {
        key: key.to_string(),
        message: message.into(),
    }
}

pub(crate) fn ensure_store_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in [
        "particle_lists",
        "particle_documents",
        "particles",
        "particle_thresholds",
    ] {
        if !table_exists(conn, table)? {
            return Err(StoreError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
