use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    models::{Terrarium, TerrariumPatch},
    StoreError, TerrariumStore,
};

/// In-process terrarium collection with the same whole-record semantics as
/// the hosted store.
///
/// Wrapped in `Arc` so clones share one collection. Records keep creation
/// order, matching what the hosted store returns from `GET /terraria`.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Vec<Terrarium>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TerrariumStore for MemoryStore {
    async fn list(&self) -> Result<Vec<Terrarium>, StoreError> {
        Ok(self.inner.read().await.clone())
    }

    async fn get(&self, id: &str) -> Result<Terrarium, StoreError> {
        self.inner
            .read()
            .await
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))
    }

    async fn create(&self, record: &Terrarium) -> Result<Terrarium, StoreError> {
        let mut record = record.clone();
        if record.id.is_empty() {
            record.id = Uuid::new_v4().to_string();
        }
        self.inner.write().await.push(record.clone());
        Ok(record)
    }

    async fn replace(&self, record: &Terrarium) -> Result<Terrarium, StoreError> {
        let mut guard = self.inner.write().await;
        let slot = guard
            .iter_mut()
            .find(|t| t.id == record.id)
            .ok_or_else(|| StoreError::NotFound(record.id.clone()))?;
        *slot = record.clone();
        Ok(record.clone())
    }

    async fn patch(&self, id: &str, patch: &TerrariumPatch) -> Result<Terrarium, StoreError> {
        let mut guard = self.inner.write().await;
        let slot = guard
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;
        patch.apply_to(slot);
        Ok(slot.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let before = guard.len();
        guard.retain(|t| t.id != id);
        if guard.len() == before {
            return Err(StoreError::NotFound(id.to_owned()));
        }
        Ok(())
    }
}
