//! Read-through cache of remote documents and chat history.
//!
//! Every write stamps `cached_at`; a periodic eviction pass drops entries
//! whose stamp has aged past the configured threshold, which is what keeps
//! local growth bounded. Search is a purely local view, never forwarded to
//! the server.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::store::{PersistentStore, Record};

/// A locally cached copy of a remote document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
  /// Remote resource id.
  pub id: String,
  pub title: String,
  /// Plain content, searched locally.
  pub content: String,
  /// Rendered content, kept for display.
  pub rendered: String,
  /// Tag order matters for display, not for matching.
  pub tags: Vec<String>,
  /// Origin timestamp.
  pub created_at: DateTime<Utc>,
  /// Local capture timestamp; overwritten on every refresh.
  pub cached_at: DateTime<Utc>,
}

impl Record for StoredDocument {
  fn collection() -> &'static str {
    "documents"
  }

  fn key(&self) -> String {
    self.id.clone()
  }

  fn stamp(&self) -> DateTime<Utc> {
    self.cached_at
  }
}

/// A cached chat message. Same durability tier and lifecycle as documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
  pub id: String,
  /// Originating agent identifier.
  pub agent: String,
  pub body: Value,
  pub sent_at: DateTime<Utc>,
  pub cached_at: DateTime<Utc>,
}

impl Record for ChatMessage {
  fn collection() -> &'static str {
    "messages"
  }

  fn key(&self) -> String {
    self.id.clone()
  }

  fn stamp(&self) -> DateTime<Utc> {
    self.cached_at
  }
}

/// Owner of the `documents` and `messages` collections.
#[derive(Clone)]
pub struct CacheManager {
  store: Arc<PersistentStore>,
}

impl CacheManager {
  pub fn new(store: Arc<PersistentStore>) -> Self {
    Self { store }
  }

  /// Insert-or-replace a document by id, stamping `cached_at = now`.
  pub fn upsert(&self, mut doc: StoredDocument) -> Result<()> {
    doc.cached_at = Utc::now();
    self.store.put(&doc)
  }

  /// Insert-or-replace a chat message by id, stamping `cached_at = now`.
  pub fn record_message(&self, mut msg: ChatMessage) -> Result<()> {
    msg.cached_at = Utc::now();
    self.store.put(&msg)
  }

  pub fn get(&self, id: &str) -> Result<Option<StoredDocument>> {
    self.store.get(id)
  }

  pub fn get_all(&self) -> Result<Vec<StoredDocument>> {
    self.store.get_all()
  }

  pub fn messages(&self) -> Result<Vec<ChatMessage>> {
    self.store.get_all()
  }

  /// Case-insensitive substring match over title, content, and each tag.
  /// Local-only; the query never reaches the server. No result ordering
  /// is guaranteed.
  pub fn search(&self, query: &str) -> Result<Vec<StoredDocument>> {
    let needle = query.to_lowercase();

    let matches = self
      .get_all()?
      .into_iter()
      .filter(|doc| {
        doc.title.to_lowercase().contains(&needle)
          || doc.content.to_lowercase().contains(&needle)
          || doc.tags.iter().any(|t| t.to_lowercase().contains(&needle))
      })
      .collect();

    Ok(matches)
  }

  /// Delete every cached document and message whose `cached_at` predates
  /// `now - max_age_days`. Returns the number of evicted entries.
  ///
  /// Ages are read at scan time, so an entry refreshed concurrently with
  /// a newer `cached_at` survives the pass.
  pub fn evict_older_than(&self, max_age_days: i64) -> Result<usize> {
    let cutoff = Utc::now() - Duration::days(max_age_days);

    let docs = self
      .store
      .iterate_and_delete::<StoredDocument, _>(|d| d.cached_at < cutoff)?;
    let msgs = self
      .store
      .iterate_and_delete::<ChatMessage, _>(|m| m.cached_at < cutoff)?;

    if docs + msgs > 0 {
      debug!(documents = docs, messages = msgs, "evicted stale cache entries");
    }

    Ok(docs + msgs)
  }

  /// Run eviction on a timer until the task is dropped. Failures are
  /// logged and never stop the timer.
  pub fn spawn_evictor(
    &self,
    max_age_days: i64,
    every: std::time::Duration,
  ) -> tokio::task::JoinHandle<()> {
    let cache = self.clone();

    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(every);
      // interval() fires immediately; skip the startup tick.
      ticker.tick().await;

      loop {
        ticker.tick().await;
        if let Err(e) = cache.evict_older_than(max_age_days) {
          warn!(error = %e, "cache eviction pass failed");
        }
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn open_cache() -> (tempfile::TempDir, Arc<PersistentStore>, CacheManager) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(PersistentStore::open_at(&dir.path().join("offline.db")).unwrap());
    let cache = CacheManager::new(Arc::clone(&store));
    (dir, store, cache)
  }

  fn document(id: &str, title: &str, content: &str, tags: &[&str]) -> StoredDocument {
    StoredDocument {
      id: id.to_string(),
      title: title.to_string(),
      content: content.to_string(),
      rendered: format!("<p>{}</p>", content),
      tags: tags.iter().map(|t| t.to_string()).collect(),
      created_at: Utc::now() - Duration::days(30),
      cached_at: Utc::now(),
    }
  }

  /// Write a document with a back-dated cached_at, bypassing the upsert stamp.
  fn put_aged(store: &PersistentStore, mut doc: StoredDocument, age: Duration) {
    doc.cached_at = Utc::now() - age;
    store.put(&doc).unwrap();
  }

  #[test]
  fn test_upsert_stamps_cached_at() {
    let (_dir, _store, cache) = open_cache();

    let mut doc = document("d1", "t", "c", &[]);
    doc.cached_at = Utc::now() - Duration::days(99);
    cache.upsert(doc).unwrap();

    let got = cache.get("d1").unwrap().unwrap();
    assert!(Utc::now() - got.cached_at < Duration::seconds(5));
    assert!(got.cached_at >= got.created_at);
  }

  #[test]
  fn test_upsert_same_id_keeps_one_record() {
    let (_dir, _store, cache) = open_cache();

    cache.upsert(document("d1", "t", "c", &[])).unwrap();
    let first = cache.get("d1").unwrap().unwrap();

    cache.upsert(document("d1", "t", "c", &[])).unwrap();
    let second = cache.get("d1").unwrap().unwrap();

    assert_eq!(cache.get_all().unwrap().len(), 1);
    assert!(second.cached_at >= first.cached_at);
  }

  #[test]
  fn test_eviction_boundary() {
    let (_dir, store, cache) = open_cache();

    put_aged(
      &store,
      document("stale", "old", "x", &[]),
      Duration::days(7) + Duration::seconds(1),
    );
    put_aged(&store, document("fresh", "new", "x", &[]), Duration::days(6));

    let evicted = cache.evict_older_than(7).unwrap();

    assert_eq!(evicted, 1);
    assert!(cache.get("stale").unwrap().is_none());
    assert!(cache.get("fresh").unwrap().is_some());
  }

  #[test]
  fn test_eviction_spares_refreshed_entry() {
    let (_dir, store, cache) = open_cache();

    put_aged(&store, document("d1", "t", "c", &[]), Duration::days(30));
    // Refreshed before the pass runs: the newer stamp is what the scan sees.
    cache.upsert(document("d1", "t", "c", &[])).unwrap();

    let evicted = cache.evict_older_than(7).unwrap();
    assert_eq!(evicted, 0);
    assert!(cache.get("d1").unwrap().is_some());
  }

  #[test]
  fn test_eviction_covers_messages() {
    let (_dir, store, cache) = open_cache();

    let mut old = ChatMessage {
      id: "m1".into(),
      agent: "assistant".into(),
      body: json!({"text": "hello"}),
      sent_at: Utc::now() - Duration::days(10),
      cached_at: Utc::now(),
    };
    old.cached_at = Utc::now() - Duration::days(10);
    store.put(&old).unwrap();

    cache
      .record_message(ChatMessage {
        id: "m2".into(),
        agent: "assistant".into(),
        body: json!({"text": "recent"}),
        sent_at: Utc::now(),
        cached_at: Utc::now(),
      })
      .unwrap();

    let evicted = cache.evict_older_than(7).unwrap();
    assert_eq!(evicted, 1);

    let left = cache.messages().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, "m2");
  }

  #[test]
  fn test_search_matches_title_content_and_tags() {
    let (_dir, _store, cache) = open_cache();

    cache
      .upsert(document("t", "Alpha release", "body", &[]))
      .unwrap();
    cache
      .upsert(document("c", "notes", "the ALPHA build", &[]))
      .unwrap();
    cache
      .upsert(document("g", "misc", "body", &["alphabet"]))
      .unwrap();
    cache
      .upsert(document("n", "beta", "gamma", &["delta"]))
      .unwrap();

    let mut ids: Vec<String> = cache
      .search("alpha")
      .unwrap()
      .into_iter()
      .map(|d| d.id)
      .collect();
    ids.sort();

    assert_eq!(ids, vec!["c", "g", "t"]);
  }

  #[test]
  fn test_search_is_case_insensitive() {
    let (_dir, _store, cache) = open_cache();

    cache
      .upsert(document("d1", "Quarterly Report", "x", &[]))
      .unwrap();

    assert_eq!(cache.search("qUaRtErLy").unwrap().len(), 1);
    assert!(cache.search("missing").unwrap().is_empty());
  }
}
