//! Durable, versioned local storage.
//!
//! [`PersistentStore`] wraps a single SQLite database holding three
//! independently-keyed collections (pending items, cached documents, chat
//! messages). Records are typed structs serialized as JSON and validated on
//! the way back out; nothing untyped crosses this boundary.

pub mod schema;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};

/// Trait for records stored in one of the collections.
///
/// Implementors name their collection table, provide a unique primary key,
/// and expose the timestamp that is mirrored into the `stamp` column so
/// age-based scans can order and filter without deserializing.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Collection (table) this record lives in.
  fn collection() -> &'static str;

  /// Unique identifier within the collection.
  fn key(&self) -> String;

  /// Timestamp mirrored into the `stamp` column.
  fn stamp(&self) -> DateTime<Utc>;
}

/// Durable store shared by the upload queue and the document cache.
///
/// The connection sits behind a mutex; every operation is a short
/// synchronous section, so callers in async code never hold the lock
/// across an await.
pub struct PersistentStore {
  conn: Mutex<Connection>,
}

impl PersistentStore {
  /// Open or create the store at the given path.
  ///
  /// Idempotent: reopening an existing database applies only migrations
  /// newer than the version it recorded, preserving all rows. The caller
  /// resolves the location (see `Config::store_path`); failure to create
  /// or open the file is `StorageUnavailable`, fatal to the subsystem.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| Error::StorageUnavailable(format!("cannot create {}: {}", parent.display(), e)))?;
    }

    let mut conn = Connection::open(path)
      .map_err(|e| Error::StorageUnavailable(format!("cannot open {}: {}", path.display(), e)))?;

    Self::run_migrations(&mut conn)?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Replay any migration steps beyond the recorded schema version.
  fn run_migrations(conn: &mut Connection) -> Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if version > schema::CURRENT_VERSION {
      return Err(Error::StorageUnavailable(format!(
        "database schema v{} is newer than this build (v{})",
        version,
        schema::CURRENT_VERSION
      )));
    }

    for (i, step) in schema::MIGRATIONS.iter().enumerate().skip(version as usize) {
      let tx = conn.transaction()?;
      tx.execute_batch(step)?;
      tx.pragma_update(None, "user_version", (i + 1) as i64)?;
      tx.commit()?;
      tracing::debug!(version = i + 1, "applied store migration");
    }

    Ok(())
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|_| Error::StorageUnavailable("store connection lock poisoned".into()))
  }

  /// Insert-or-replace a record by its primary key.
  pub fn put<R: Record>(&self, record: &R) -> Result<()> {
    let conn = self.conn()?;
    let data = serde_json::to_vec(record)?;

    conn.execute(
      &format!(
        "INSERT OR REPLACE INTO {} (id, data, stamp) VALUES (?, ?, ?)",
        R::collection()
      ),
      params![record.key(), data, record.stamp().to_rfc3339()],
    )?;

    Ok(())
  }

  /// Fetch a single record by key.
  pub fn get<R: Record>(&self, key: &str) -> Result<Option<R>> {
    let conn = self.conn()?;

    let data: Option<Vec<u8>> = conn
      .query_row(
        &format!("SELECT data FROM {} WHERE id = ?", R::collection()),
        params![key],
        |row| row.get(0),
      )
      .optional()?;

    match data {
      Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
      None => Ok(None),
    }
  }

  /// Fetch every record in a collection, in insertion order.
  pub fn get_all<R: Record>(&self) -> Result<Vec<R>> {
    let conn = self.conn()?;

    let mut stmt = conn.prepare(&format!(
      "SELECT data FROM {} ORDER BY rowid",
      R::collection()
    ))?;

    let rows: Vec<Vec<u8>> = stmt
      .query_map([], |row| row.get(0))?
      .collect::<std::result::Result<_, _>>()?;

    rows
      .iter()
      .map(|data| serde_json::from_slice(data).map_err(Error::from))
      .collect()
  }

  /// Delete a record by key. A no-op (not an error) when the key is
  /// absent, so retries stay idempotent.
  pub fn delete<R: Record>(&self, key: &str) -> Result<()> {
    let conn = self.conn()?;

    conn.execute(
      &format!("DELETE FROM {} WHERE id = ?", R::collection()),
      params![key],
    )?;

    Ok(())
  }

  /// Count of records in a collection.
  pub fn count<R: Record>(&self) -> Result<usize> {
    let conn = self.conn()?;

    let n: i64 = conn.query_row(
      &format!("SELECT COUNT(*) FROM {}", R::collection()),
      [],
      |row| row.get(0),
    )?;

    Ok(n as usize)
  }

  /// Scan a collection, deleting every record the predicate selects.
  ///
  /// The candidate set is snapshotted up front, so each record present at
  /// call time is visited exactly once even as rows are deleted mid-scan.
  /// A record replaced concurrently keeps its fresher serialized form by
  /// the time the predicate sees it, since each row is re-read at visit
  /// time. Returns the number of deleted records.
  pub fn iterate_and_delete<R, P>(&self, mut predicate: P) -> Result<usize>
  where
    R: Record,
    P: FnMut(&R) -> bool,
  {
    let keys: Vec<String> = {
      let conn = self.conn()?;
      let mut stmt = conn.prepare(&format!("SELECT id FROM {} ORDER BY rowid", R::collection()))?;
      let keys = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;
      keys
    };

    let mut deleted = 0;
    for key in keys {
      let record: Option<R> = self.get(&key)?;
      if let Some(record) = record {
        if predicate(&record) {
          self.delete::<R>(&key)?;
          deleted += 1;
        }
      }
    }

    Ok(deleted)
  }

  /// Schema version currently recorded in the database.
  #[cfg(test)]
  pub fn schema_version(&self) -> Result<i64> {
    let conn = self.conn()?;
    let version = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::Deserialize;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Doc {
    id: String,
    body: String,
    stamp: DateTime<Utc>,
  }

  impl Record for Doc {
    fn collection() -> &'static str {
      "documents"
    }

    fn key(&self) -> String {
      self.id.clone()
    }

    fn stamp(&self) -> DateTime<Utc> {
      self.stamp
    }
  }

  fn doc(id: &str, body: &str) -> Doc {
    Doc {
      id: id.to_string(),
      body: body.to_string(),
      stamp: Utc::now(),
    }
  }

  fn open_temp() -> (tempfile::TempDir, PersistentStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = PersistentStore::open_at(&dir.path().join("offline.db")).unwrap();
    (dir, store)
  }

  #[test]
  fn test_put_get_roundtrip() {
    let (_dir, store) = open_temp();

    let d = doc("a", "hello");
    store.put(&d).unwrap();

    let got: Doc = store.get("a").unwrap().unwrap();
    assert_eq!(got, d);
    assert!(store.get::<Doc>("missing").unwrap().is_none());
  }

  #[test]
  fn test_put_replaces_by_key() {
    let (_dir, store) = open_temp();

    store.put(&doc("a", "first")).unwrap();
    store.put(&doc("a", "second")).unwrap();

    let all: Vec<Doc> = store.get_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].body, "second");
  }

  #[test]
  fn test_delete_is_idempotent() {
    let (_dir, store) = open_temp();

    store.put(&doc("a", "x")).unwrap();
    store.delete::<Doc>("a").unwrap();
    // Second delete of an absent key is a no-op, not an error.
    store.delete::<Doc>("a").unwrap();

    assert!(store.get::<Doc>("a").unwrap().is_none());
  }

  #[test]
  fn test_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");

    {
      let store = PersistentStore::open_at(&path).unwrap();
      store.put(&doc("a", "durable")).unwrap();
    }

    let store = PersistentStore::open_at(&path).unwrap();
    let got: Doc = store.get("a").unwrap().unwrap();
    assert_eq!(got.body, "durable");
  }

  #[test]
  fn test_migrations_preserve_existing_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");

    // Build a v1 database by hand, with a row in it.
    {
      let conn = Connection::open(&path).unwrap();
      conn.execute_batch(schema::MIGRATIONS[0]).unwrap();
      conn.pragma_update(None, "user_version", 1i64).unwrap();
      conn
        .execute(
          "INSERT INTO documents (id, data, stamp) VALUES (?, ?, ?)",
          params![
            "old",
            serde_json::to_vec(&doc("old", "from v1")).unwrap(),
            Utc::now().to_rfc3339()
          ],
        )
        .unwrap();
    }

    // Opening with current code upgrades the schema without losing the row.
    let store = PersistentStore::open_at(&path).unwrap();
    assert_eq!(store.schema_version().unwrap(), schema::CURRENT_VERSION);

    let got: Doc = store.get("old").unwrap().unwrap();
    assert_eq!(got.body, "from v1");
  }

  #[test]
  fn test_open_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");

    let first = PersistentStore::open_at(&path).unwrap();
    drop(first);
    let second = PersistentStore::open_at(&path).unwrap();
    assert_eq!(second.schema_version().unwrap(), schema::CURRENT_VERSION);
  }

  #[test]
  fn test_iterate_and_delete_visits_every_record() {
    let (_dir, store) = open_temp();

    for i in 0..5 {
      store.put(&doc(&format!("d{}", i), "x")).unwrap();
    }

    let mut seen = Vec::new();
    let deleted = store
      .iterate_and_delete::<Doc, _>(|d| {
        seen.push(d.id.clone());
        d.id != "d2"
      })
      .unwrap();

    assert_eq!(seen.len(), 5);
    assert_eq!(deleted, 4);

    let remaining: Vec<Doc> = store.get_all().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "d2");
  }

  #[test]
  fn test_get_all_in_insertion_order() {
    let (_dir, store) = open_temp();

    for id in ["c", "a", "b"] {
      store.put(&doc(id, "x")).unwrap();
    }

    let all: Vec<Doc> = store.get_all().unwrap();
    let ids: Vec<&str> = all.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, ["c", "a", "b"]);
  }
}
