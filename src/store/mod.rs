pub mod memory;
pub mod models;

use std::{future::Future, sync::Arc};

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

pub use self::memory::MemoryStore;
use self::models::{Terrarium, TerrariumPatch};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store answered with a non-2xx status other than 404.
    #[error("store returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("terrarium not found: {0}")]
    NotFound(String),

    /// Another writer changed the record between our read and our write.
    #[error("terrarium {0} changed while it was being updated")]
    Conflict(String),

    #[error("store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed store payload: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// TerrariumStore
// ---------------------------------------------------------------------------

/// Whole-record access to the external terrarium resource.
///
/// There is no server-side primitive to append to a list field, so every
/// history update is a read-modify-write of the complete record via
/// [`replace`](Self::replace).
pub trait TerrariumStore: Send + Sync {
    /// `GET /terraria`
    fn list(&self) -> impl Future<Output = Result<Vec<Terrarium>, StoreError>> + Send;

    /// `GET /terraria/{id}`
    fn get(&self, id: &str) -> impl Future<Output = Result<Terrarium, StoreError>> + Send;

    /// `POST /terraria`; the store assigns the id.
    fn create(&self, record: &Terrarium)
        -> impl Future<Output = Result<Terrarium, StoreError>> + Send;

    /// `PUT /terraria/{id}`, full replace.
    fn replace(&self, record: &Terrarium)
        -> impl Future<Output = Result<Terrarium, StoreError>> + Send;

    /// `PATCH /terraria/{id}`, top-level scalars only.
    fn patch(
        &self,
        id: &str,
        patch: &TerrariumPatch,
    ) -> impl Future<Output = Result<Terrarium, StoreError>> + Send;

    /// `DELETE /terraria/{id}`
    fn delete(&self, id: &str) -> impl Future<Output = Result<(), StoreError>> + Send;
}

// ---------------------------------------------------------------------------
// HttpStore
// ---------------------------------------------------------------------------

/// REST client for the hosted terrarium collection.
#[derive(Debug, Clone)]
pub struct HttpStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    /// Collection URL, e.g. `https://host/api/v1/terraria`, no trailing slash.
    base_url: String,
}

impl HttpStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                http: Client::new(),
                base_url: base_url.trim_end_matches('/').to_owned(),
            }),
        }
    }

    fn record_url(&self, id: &str) -> String {
        format!("{}/{}", self.inner.base_url, id)
    }

    /// Send `request` and map non-2xx statuses to [`StoreError`].
    async fn send(&self, request: RequestBuilder, resource: &str) -> Result<Vec<u8>, StoreError> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(resource.to_owned()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Http {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        resource: &str,
    ) -> Result<T, StoreError> {
        let bytes = self.send(request, resource).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl TerrariumStore for HttpStore {
    async fn list(&self) -> Result<Vec<Terrarium>, StoreError> {
        debug!(url = %self.inner.base_url, "Listing terraria");
        let request = self.inner.http.get(&self.inner.base_url);
        self.send_json(request, "collection").await
    }

    async fn get(&self, id: &str) -> Result<Terrarium, StoreError> {
        let url = self.record_url(id);
        debug!(terrarium_id = %id, url = %url, "Fetching terrarium");
        self.send_json(self.inner.http.get(&url), id).await
    }

    async fn create(&self, record: &Terrarium) -> Result<Terrarium, StoreError> {
        debug!(name = %record.name, "Creating terrarium");
        let request = self.inner.http.post(&self.inner.base_url).json(record);
        self.send_json(request, "collection").await
    }

    async fn replace(&self, record: &Terrarium) -> Result<Terrarium, StoreError> {
        let url = self.record_url(&record.id);
        debug!(terrarium_id = %record.id, url = %url, "Replacing terrarium");
        let request = self.inner.http.put(&url).json(record);
        self.send_json(request, &record.id).await
    }

    async fn patch(&self, id: &str, patch: &TerrariumPatch) -> Result<Terrarium, StoreError> {
        let url = self.record_url(id);
        debug!(terrarium_id = %id, url = %url, "Patching terrarium");
        let request = self.inner.http.patch(&url).json(patch);
        self.send_json(request, id).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let url = self.record_url(id);
        debug!(terrarium_id = %id, url = %url, "Deleting terrarium");
        // The deleted record may or may not be echoed back; the body is ignored.
        self.send(self.inner.http.delete(&url), id).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StoreBackend
// ---------------------------------------------------------------------------

/// The store implementation selected at startup.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    Http(HttpStore),
    Memory(MemoryStore),
}

impl TerrariumStore for StoreBackend {
    async fn list(&self) -> Result<Vec<Terrarium>, StoreError> {
        match self {
            Self::Http(s) => s.list().await,
            Self::Memory(s) => s.list().await,
        }
    }

    async fn get(&self, id: &str) -> Result<Terrarium, StoreError> {
        match self {
            Self::Http(s) => s.get(id).await,
            Self::Memory(s) => s.get(id).await,
        }
    }

    async fn create(&self, record: &Terrarium) -> Result<Terrarium, StoreError> {
        match self {
            Self::Http(s) => s.create(record).await,
            Self::Memory(s) => s.create(record).await,
        }
    }

    async fn replace(&self, record: &Terrarium) -> Result<Terrarium, StoreError> {
        match self {
            Self::Http(s) => s.replace(record).await,
            Self::Memory(s) => s.replace(record).await,
        }
    }

    async fn patch(&self, id: &str, patch: &TerrariumPatch) -> Result<Terrarium, StoreError> {
        match self {
            Self::Http(s) => s.patch(id, patch).await,
            Self::Memory(s) => s.patch(id, patch).await,
        }
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        match self {
            Self::Http(s) => s.delete(id).await,
            Self::Memory(s) => s.delete(id).await,
        }
    }
}
