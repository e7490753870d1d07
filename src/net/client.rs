//! Remote API collaborator.
//!
//! The server is an opaque HTTP endpoint: any 2xx acknowledges an item,
//! anything else leaves it queued. [`RemoteApi`] is the seam the sync
//! coordinator drives; tests substitute their own implementations.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::cache::StoredDocument;
use crate::error::{Error, Result};
use crate::queue::{PendingMessage, PendingUpload};

/// The remote submission surface consumed by the sync coordinator.
pub trait RemoteApi: Send + Sync {
  /// Submit one captured upload. `Ok(())` means the server acknowledged it.
  fn upload_document(
    &self,
    upload: &PendingUpload,
  ) -> impl std::future::Future<Output = Result<()>> + Send;

  /// Submit one outgoing chat message.
  fn post_message(
    &self,
    message: &PendingMessage,
  ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// HTTP implementation of [`RemoteApi`] over reqwest.
#[derive(Clone)]
pub struct RemoteClient {
  http: reqwest::Client,
  base: String,
}

impl RemoteClient {
  /// Create a client for the given base URL (scheme + host, no trailing
  /// path). The URL is validated here so a bad config fails at startup,
  /// not on the first drain pass.
  pub fn new(base_url: &str) -> Result<Self> {
    Url::parse(base_url).map_err(|e| Error::Unreachable(format!("invalid remote URL: {}", e)))?;

    let http = reqwest::Client::new();

    Ok(Self {
      http,
      base: base_url.trim_end_matches('/').to_string(),
    })
  }

  fn endpoint(&self, path: &str) -> String {
    format!("{}{}", self.base, path)
  }

  /// Map a transport failure to the uniform unreachable state.
  fn transport_err(e: reqwest::Error) -> Error {
    Error::Unreachable(e.to_string())
  }

  /// Fetch the remote document listing for the local cache.
  ///
  /// Returned entries carry `cached_at = created_at`; the cache stamps the
  /// real capture time on upsert.
  pub async fn fetch_documents(&self) -> Result<Vec<StoredDocument>> {
    let resp = self
      .http
      .get(self.endpoint("/api/documents"))
      .send()
      .await
      .map_err(Self::transport_err)?;

    if !resp.status().is_success() {
      return Err(Error::Unreachable(format!(
        "document fetch failed with status {}",
        resp.status()
      )));
    }

    let docs: Vec<ApiDocument> = resp.json().await.map_err(Self::transport_err)?;
    Ok(docs.into_iter().map(StoredDocument::from).collect())
  }
}

/// Wire shape of a remote document, as returned by `GET /api/documents`.
#[derive(Debug, Deserialize)]
struct ApiDocument {
  id: String,
  title: String,
  #[serde(default)]
  content: String,
  #[serde(default)]
  rendered: String,
  #[serde(default)]
  tags: Vec<String>,
  created_at: DateTime<Utc>,
}

impl From<ApiDocument> for StoredDocument {
  fn from(doc: ApiDocument) -> Self {
    StoredDocument {
      id: doc.id,
      title: doc.title,
      content: doc.content,
      rendered: doc.rendered,
      tags: doc.tags,
      created_at: doc.created_at,
      cached_at: doc.created_at,
    }
  }
}

impl RemoteApi for RemoteClient {
  async fn upload_document(&self, upload: &PendingUpload) -> Result<()> {
    let tags = serde_json::to_string(&upload.tags)?;

    let file = reqwest::multipart::Part::bytes(upload.file.clone())
      .file_name(upload.title.clone())
      .mime_str("application/octet-stream")
      .map_err(|e| Error::Unreachable(e.to_string()))?;

    let form = reqwest::multipart::Form::new()
      .part("file", file)
      .text("title", upload.title.clone())
      .text("tags", tags);

    let resp = self
      .http
      .post(self.endpoint("/api/documents/upload"))
      .multipart(form)
      .send()
      .await
      .map_err(Self::transport_err)?;

    if resp.status().is_success() {
      Ok(())
    } else {
      Err(Error::UploadRejected {
        status: resp.status().as_u16(),
      })
    }
  }

  async fn post_message(&self, message: &PendingMessage) -> Result<()> {
    let resp = self
      .http
      .post(self.endpoint("/api/messages"))
      .json(&json!({
        "id": message.id,
        "agent": message.agent,
        "body": message.body,
        "sent_at": message.sent_at,
      }))
      .send()
      .await
      .map_err(Self::transport_err)?;

    if resp.status().is_success() {
      Ok(())
    } else {
      Err(Error::UploadRejected {
        status: resp.status().as_u16(),
      })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_api_document_defaults_optional_fields() {
    let doc: ApiDocument = serde_json::from_str(
      r#"{"id": "d1", "title": "notes", "created_at": "2024-05-01T10:00:00Z"}"#,
    )
    .unwrap();

    let stored = StoredDocument::from(doc);
    assert_eq!(stored.id, "d1");
    assert!(stored.content.is_empty());
    assert!(stored.tags.is_empty());
    assert_eq!(stored.cached_at, stored.created_at);
  }

  #[test]
  fn test_rejects_invalid_base_url() {
    assert!(RemoteClient::new("not a url").is_err());
    assert!(RemoteClient::new("https://example.com").is_ok());
  }

  #[test]
  fn test_endpoint_normalizes_trailing_slash() {
    let client = RemoteClient::new("https://example.com/").unwrap();
    assert_eq!(
      client.endpoint("/api/documents/upload"),
      "https://example.com/api/documents/upload"
    );
  }

  #[tokio::test]
  async fn test_unreachable_host_maps_to_unreachable() {
    let client = RemoteClient::new("http://127.0.0.1:1").unwrap();

    let upload = PendingUpload {
      id: "u1".into(),
      file: vec![1, 2, 3],
      title: "t".into(),
      tags: vec![],
      upload_time: Utc::now(),
    };

    match client.upload_document(&upload).await {
      Err(Error::Unreachable(_)) => {}
      other => panic!("expected Unreachable, got {:?}", other),
    }
  }
}
