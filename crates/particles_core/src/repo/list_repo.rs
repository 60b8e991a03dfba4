//! Particle list repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist list handles keyed by `{owner_id}/{name}`.
//! - Report duplicates from `create_if_needed` as `false`, never as errors.
//!
//! # Invariants
//! - An existing list's type and source are never overwritten by
//!   `create_if_needed`.
//! - Deleting a list never touches its particle documents; callers cascade.

use crate::model::particle_list::{
    ParticleList, ParticleListKey, ParticleListSource, ParticleListType,
};
use crate::repo::particle_repo::{ensure_store_connection_ready, StoreError, StoreResult};
use log::info;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};

/// Repository interface for particle lists.
pub trait ParticleListRepository {
    /// Inserts the list unless `(owner_id, name)` exists; returns `true`
    /// when inserted.
    fn create_if_needed(&self, list: &ParticleList) -> StoreResult<bool>;
    /// Loads one list.
    fn get(&self, key: &ParticleListKey) -> StoreResult<Option<ParticleList>>;
    /// Lists an owner's lists ordered by name.
    fn list_for_owner(&self, owner_id: &str) -> StoreResult<Vec<ParticleList>>;
    /// Removes one list; returns whether it existed.
    fn delete(&self, key: &ParticleListKey) -> StoreResult<bool>;
    /// Removes every list of an owner.
    fn delete_all(&self, owner_id: &str) -> StoreResult<u64>;
    /// Renames one list within its owner.
    fn rename(&self, key: &ParticleListKey, new_name: &str) -> StoreResult<ParticleList>;
    /// Copies every list of one owner to another, skipping existing names.
    fn copy_all(&self, from_owner: &str, to_owner: &str) -> StoreResult<u64>;
}

/// SQLite-backed particle list repository.
pub struct SqliteParticleListRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteParticleListRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_store_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl ParticleListRepository for SqliteParticleListRepository<'_> {
    fn create_if_needed(&self, list: &ParticleList) -> StoreResult<bool> {
        let inserted = insert_list(self.conn, list)?;
        info!(
            "event=list_create module=lists status=ok list={} inserted={}",
            list.key, inserted
        );
        Ok(inserted)
    }

    fn get(&self, key: &ParticleListKey) -> StoreResult<Option<ParticleList>> {
        let list = self
            .conn
            .query_row(
                "SELECT list_key, owner_id, name, list_type, source
                 FROM particle_lists
                 WHERE list_key = ?1;",
                [key.storage_key()],
                |row| Ok(parse_list_row(row)),
            )
            .optional()?;
        list.transpose()
    }

    fn list_for_owner(&self, owner_id: &str) -> StoreResult<Vec<ParticleList>> {
        load_owner_lists(self.conn, owner_id)
    }

    fn delete(&self, key: &ParticleListKey) -> StoreResult<bool> {
        let removed = self.conn.execute(
            "DELETE FROM particle_lists WHERE list_key = ?1;",
            [key.storage_key()],
        )?;
        Ok(removed > 0)
    }

    fn delete_all(&self, owner_id: &str) -> StoreResult<u64> {
        let removed = self
            .conn
            .execute("DELETE FROM particle_lists WHERE owner_id = ?1;", [owner_id])?;
        Ok(removed as u64)
    }

    fn rename(&self, key: &ParticleListKey, new_name: &str) -> StoreResult<ParticleList> {
        let target = ParticleListKey::new(key.owner_id(), new_name)?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let renamed = tx.execute(
            "UPDATE OR IGNORE particle_lists
             SET list_key = ?2, name = ?3
             WHERE list_key = ?1;",
            params![key.storage_key(), target.storage_key(), target.name()],
        )?;
        if renamed == 0 {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM particle_lists WHERE list_key = ?1);",
                [key.storage_key()],
                |row| row.get(0),
            )?;
            return Err(if exists {
                StoreError::ListAlreadyExists(target.storage_key())
            } else {
                StoreError::ListNotFound(key.storage_key())
            });
        }
        tx.commit()?;

        self.get(&target)?
            .ok_or_else(|| StoreError::ListNotFound(target.storage_key()))
    }

    fn copy_all(&self, from_owner: &str, to_owner: &str) -> StoreResult<u64> {
        if from_owner == to_owner {
            return Ok(0);
        }
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut copied = 0;
        for list in load_owner_lists(&tx, from_owner)? {
            let key = ParticleListKey::new(to_owner, list.key.name())?;
            let copy = ParticleList::new(key, list.list_type, list.source);
            if insert_list(&tx, &copy)? {
                copied += 1;
            }
        }
        tx.commit()?;
        Ok(copied)
    }
}

fn load_owner_lists(conn: &Connection, owner_id: &str) -> StoreResult<Vec<ParticleList>> {
    let mut stmt = conn.prepare(
        "SELECT list_key, owner_id, name, list_type, source
         FROM particle_lists
         WHERE owner_id = ?1
         ORDER BY name ASC;",
    )?;
    let mut rows = stmt.query([owner_id])?;
    let mut lists = Vec::new();
    while let Some(row) = rows.next()? {
        lists.push(parse_list_row(row)?);
    }
    Ok(lists)
}

fn insert_list(conn: &Connection, list: &ParticleList) -> StoreResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO particle_lists (list_key, owner_id, name, list_type, source)
         VALUES (?1, ?2, ?3, ?4, ?5);",
        params![
            list.key.storage_key(),
            list.key.owner_id(),
            list.key.name(),
            list.list_type.as_db(),
            list.source.as_db(),
        ],
    )?;
    Ok(inserted == 1)
}

fn parse_list_row(row: &Row<'_>) -> StoreResult<ParticleList> {
    let list_key: String = row.get("list_key")?;
    let owner_id: String = row.get("owner_id")?;
    let name: String = row.get("name")?;
    let key = ParticleListKey::new(owner_id, name).map_err(|err| StoreError::CorruptRecord {
        key: list_key.clone(),
        message: err.to_string(),
    })?;
    if key.storage_key() != list_key {
        return Err(StoreError::CorruptRecord {
            key: list_key,
            message: "list_key does not match owner_id/name".to_string(),
        });
    }

    let type_text: String = row.get("list_type")?;
    let list_type =
        ParticleListType::from_db(&type_text).ok_or_else(|| StoreError::CorruptRecord {
            key: list_key.clone(),
            message: format!("invalid list type `{type_text}`"),
        })?;
    let source_text: String = row.get("source")?;
    let source =
        ParticleListSource::from_db(&source_text).ok_or_else(|| StoreError::CorruptRecord {
            key: list_key.clone(),
            message: format!("invalid list source `{source_text}`"),
        })?;

    Ok(ParticleList::new(key, list_type, source))
}
