//! Durable queue of pending uploads and outgoing chat messages.
//!
//! Items are enqueued while offline (or speculatively while online) and
//! removed only once the remote API acknowledges them. Records never mutate
//! after enqueue; a retry resubmits the same record unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::store::{PersistentStore, Record};

/// A captured upload waiting for server acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingUpload {
  pub id: String,
  /// Raw file bytes.
  pub file: Vec<u8>,
  pub title: String,
  /// Ordered tag list, preserved as entered.
  pub tags: Vec<String>,
  pub upload_time: DateTime<Utc>,
}

/// An outgoing chat message waiting for server acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMessage {
  pub id: String,
  pub agent: String,
  pub body: Value,
  pub sent_at: DateTime<Utc>,
}

/// A queued item of either kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingItem {
  Upload(PendingUpload),
  Message(PendingMessage),
}

/// Kind discriminant, carried on sync events so subscribers can keep
/// per-kind counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
  Upload,
  Message,
}

impl PendingItem {
  pub fn id(&self) -> &str {
    match self {
      PendingItem::Upload(u) => &u.id,
      PendingItem::Message(m) => &m.id,
    }
  }

  pub fn kind(&self) -> ItemKind {
    match self {
      PendingItem::Upload(_) => ItemKind::Upload,
      PendingItem::Message(_) => ItemKind::Message,
    }
  }
}

impl Record for PendingItem {
  fn collection() -> &'static str {
    "pending_items"
  }

  fn key(&self) -> String {
    self.id().to_string()
  }

  fn stamp(&self) -> DateTime<Utc> {
    match self {
      PendingItem::Upload(u) => u.upload_time,
      PendingItem::Message(m) => m.sent_at,
    }
  }
}

/// Generate a fresh queue id: epoch millis plus a random hex suffix.
/// Collisions are negligible for a single-writer queue.
fn generate_id() -> String {
  let millis = Utc::now().timestamp_millis();
  let suffix: [u8; 4] = rand::random();
  format!("{}-{}", millis, hex::encode(suffix))
}

/// Durable FIFO-ish queue over the `pending_items` collection.
#[derive(Clone)]
pub struct UploadQueue {
  store: Arc<PersistentStore>,
}

impl UploadQueue {
  pub fn new(store: Arc<PersistentStore>) -> Self {
    Self { store }
  }

  /// Queue a captured upload. Returns the generated id.
  pub fn enqueue_upload(&self, file: Vec<u8>, title: &str, tags: Vec<String>) -> Result<String> {
    let id = generate_id();
    let item = PendingItem::Upload(PendingUpload {
      id: id.clone(),
      file,
      title: title.to_string(),
      tags,
      upload_time: Utc::now(),
    });

    self.store.put(&item)?;
    tracing::debug!(id = %id, "queued upload");
    Ok(id)
  }

  /// Queue an outgoing chat message. Returns the generated id.
  pub fn enqueue_message(&self, agent: &str, body: Value) -> Result<String> {
    let id = generate_id();
    let item = PendingItem::Message(PendingMessage {
      id: id.clone(),
      agent: agent.to_string(),
      body,
      sent_at: Utc::now(),
    });

    self.store.put(&item)?;
    tracing::debug!(id = %id, "queued message");
    Ok(id)
  }

  /// Snapshot of all currently pending items, in insertion order.
  ///
  /// Reflects the store at call time; items enqueued afterwards are not
  /// part of this snapshot.
  pub fn list(&self) -> Result<Vec<PendingItem>> {
    self.store.get_all()
  }

  /// Remove an item by id. Idempotent: removing an absent id is a no-op.
  pub fn remove(&self, id: &str) -> Result<()> {
    self.store.delete::<PendingItem>(id)
  }

  /// Number of items still pending.
  pub fn pending_count(&self) -> Result<usize> {
    self.store.count::<PendingItem>()
  }
}
