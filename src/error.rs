//! Error types for the offline sync subsystem.

use thiserror::Error;

/// All possible errors that can occur in the sync subsystem.
#[derive(Debug, Error)]
pub enum Error {
  /// The host has no usable durable-storage location. Fatal at init;
  /// nothing in the subsystem works without the store.
  #[error("persistent storage unavailable: {0}")]
  StorageUnavailable(String),

  /// A single store operation failed. Transient; the caller may retry
  /// the operation.
  #[error("storage transaction failed: {0}")]
  StorageTransactionFailed(#[from] rusqlite::Error),

  /// The remote API declined an upload. The item stays queued and is
  /// retried on the next drain pass.
  #[error("remote API rejected item (status {status})")]
  UploadRejected { status: u16 },

  /// The remote endpoint could not be reached. This is the expected
  /// offline state, not a fault.
  #[error("remote unreachable: {0}")]
  Unreachable(String),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}

/// A specialized Result type for sync subsystem operations.
pub type Result<T> = std::result::Result<T, Error>;
