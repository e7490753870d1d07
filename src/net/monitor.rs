//! Connectivity tracking.
//!
//! [`NetworkMonitor`] is the single source of truth for the process-wide
//! online flag. Link-state signals arrive via [`NetworkMonitor::set_online`];
//! an active probe against the health endpoint is available separately, and
//! a caller wanting strong confidence before a sync pass combines both.

use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{Error, Result};

/// Tracks online/offline transitions and performs active connectivity probes.
pub struct NetworkMonitor {
  online: watch::Sender<bool>,
  http: reqwest::Client,
  health_url: String,
}

impl NetworkMonitor {
  /// Create a monitor probing `{base_url}/api/health`.
  ///
  /// Starts in the offline state; the first link-up signal or successful
  /// probe flips it. The probe timeout bounds every probe request.
  pub fn new(base_url: &str, probe_timeout: Duration) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(probe_timeout)
      .build()
      .map_err(|e| Error::Unreachable(format!("cannot build probe client: {}", e)))?;

    let (online, _) = watch::channel(false);

    Ok(Self {
      online,
      http,
      health_url: format!("{}/api/health", base_url.trim_end_matches('/')),
    })
  }

  /// Last known transport-level connectivity signal.
  pub fn is_online(&self) -> bool {
    *self.online.borrow()
  }

  /// Record a link-state signal. Repeated identical signals are dropped,
  /// so subscribers observe exactly one event per edge.
  pub fn set_online(&self, online: bool) {
    let changed = self.online.send_if_modified(|state| {
      if *state != online {
        *state = online;
        true
      } else {
        false
      }
    });

    if changed {
      debug!(online, "connectivity changed");
    }
  }

  /// Subscribe to online/offline edges.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.online.subscribe()
  }

  /// Active best-effort connectivity check: `HEAD` on the health endpoint.
  ///
  /// Timeout, non-2xx, and network errors all uniformly mean unreachable;
  /// no distinction is surfaced to the caller.
  pub async fn probe(&self) -> bool {
    match self.http.head(&self.health_url).send().await {
      Ok(resp) => resp.status().is_success(),
      Err(_) => false,
    }
  }

  /// Probe once and feed the result back in as a link-state signal.
  pub async fn probe_and_update(&self) -> bool {
    let reachable = self.probe().await;
    self.set_online(reachable);
    reachable
  }
}
