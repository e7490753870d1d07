//! Sync coordination: drains the pending queue against the remote API.
//!
//! One drain pass attempts every item present in the queue at the start of
//! the pass, exactly once, in snapshot order. Items enqueued mid-pass wait
//! for the next pass, so sustained enqueue pressure cannot stretch a pass
//! without bound. A single in-flight guard rejects re-entrant triggers
//! silently; there is no "run again after this one" queueing beyond the
//! caller's own cadence.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::net::RemoteApi;
use crate::queue::{ItemKind, PendingItem, UploadQueue};

/// Lifecycle notifications for status display.
#[derive(Debug, Clone)]
pub enum SyncEvent {
  /// One item of kind "upload" was acknowledged and removed.
  UploadSynced { id: String },
  /// One item of kind "message" was acknowledged and removed.
  MessageSynced { id: String },
  /// A drain pass finished, successfully or partially.
  SyncComplete {
    completed_at: DateTime<Utc>,
    pending_left: usize,
  },
}

/// Result of a [`SyncCoordinator::sync_now`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
  /// Another pass was already in flight; nothing was done.
  AlreadyRunning,
  /// A pass ran to the end of its snapshot.
  Completed {
    attempted: usize,
    synced: usize,
    pending_left: usize,
  },
}

/// Drains the upload queue with single-flight discipline.
pub struct SyncCoordinator<A: RemoteApi> {
  queue: UploadQueue,
  api: A,
  in_flight: AtomicBool,
  events: broadcast::Sender<SyncEvent>,
}

impl<A: RemoteApi> SyncCoordinator<A> {
  pub fn new(queue: UploadQueue, api: A) -> Self {
    let (events, _) = broadcast::channel(64);

    Self {
      queue,
      api,
      in_flight: AtomicBool::new(false),
      events,
    }
  }

  /// Subscribe to lifecycle events.
  pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
    self.events.subscribe()
  }

  /// Whether a drain pass is currently in flight.
  pub fn is_syncing(&self) -> bool {
    self.in_flight.load(Ordering::SeqCst)
  }

  /// Run one drain pass, unless one is already in flight.
  ///
  /// The guard is taken before the first suspension point, so a second
  /// trigger arriving during an I/O wait cannot start a second pass.
  pub async fn sync_now(&self) -> Result<SyncOutcome> {
    if self
      .in_flight
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      debug!("sync already in flight; trigger ignored");
      return Ok(SyncOutcome::AlreadyRunning);
    }

    let outcome = self.drain().await;
    self.in_flight.store(false, Ordering::SeqCst);
    outcome
  }

  async fn drain(&self) -> Result<SyncOutcome> {
    let snapshot = self.queue.list()?;
    let attempted = snapshot.len();
    let mut synced = 0;

    for item in snapshot {
      let submitted = match &item {
        PendingItem::Upload(upload) => self.api.upload_document(upload).await,
        PendingItem::Message(message) => self.api.post_message(message).await,
      };

      match submitted {
        Ok(()) => {
          // Remove only after the server acknowledged; a crash in
          // between re-submits the item, which the server treats as
          // last-write-wins.
          self.queue.remove(item.id())?;
          synced += 1;

          let event = match item.kind() {
            ItemKind::Upload => SyncEvent::UploadSynced {
              id: item.id().to_string(),
            },
            ItemKind::Message => SyncEvent::MessageSynced {
              id: item.id().to_string(),
            },
          };
          let _ = self.events.send(event);
        }
        Err(e) => {
          // Item stays queued; the next pass retries it unchanged.
          warn!(id = item.id(), error = %e, "item submission failed");
        }
      }
    }

    let pending_left = self.queue.pending_count()?;
    let _ = self.events.send(SyncEvent::SyncComplete {
      completed_at: Utc::now(),
      pending_left,
    });

    if attempted > 0 {
      info!(attempted, synced, pending_left, "drain pass finished");
    }

    Ok(SyncOutcome::Completed {
      attempted,
      synced,
      pending_left,
    })
  }
}

impl<A: RemoteApi + 'static> SyncCoordinator<A> {
  /// Spawn a task that starts a drain pass on every offline-to-online
  /// edge of the monitor. The task ends when the monitor is dropped.
  pub fn spawn_online_trigger(
    self: Arc<Self>,
    mut online: watch::Receiver<bool>,
  ) -> tokio::task::JoinHandle<()> {
    let coordinator = self;

    tokio::spawn(async move {
      while online.changed().await.is_ok() {
        if !*online.borrow_and_update() {
          continue;
        }
        if let Err(e) = coordinator.sync_now().await {
          warn!(error = %e, "sync pass aborted");
        }
      }
    })
  }
}
