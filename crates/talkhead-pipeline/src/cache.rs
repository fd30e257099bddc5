//! In-process registry of loaded avatars.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use talkhead_models::AvatarId;
use talkhead_storage::{Avatar, AvatarStore};

use crate::error::{PipelineError, PipelineResult};

/// Loaded avatars keyed by identifier.
///
/// Entries are never evicted automatically. Loads for the same id are
/// serialized so concurrent callers share one disk read.
pub struct AvatarCache {
    store: Arc<AvatarStore>,
    entries: RwLock<HashMap<AvatarId, Arc<Avatar>>>,
    load_locks: Mutex<HashMap<AvatarId, Arc<Mutex<()>>>>,
}

impl AvatarCache {
    pub fn new(store: Arc<AvatarStore>) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
            load_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Cached avatar, if loaded.
    pub async fn get(&self, id: &AvatarId) -> Option<Arc<Avatar>> {
        self.entries.read().await.get(id).cloned()
    }

    /// Cached avatar, loading it from the store on first use.
    pub async fn get_or_load(&self, id: &AvatarId) -> PipelineResult<Arc<Avatar>> {
        if let Some(avatar) = self.get(id).await {
            return Ok(avatar);
        }

        let lock = self.load_lock(id).await;
        let _guard = lock.lock().await;

        // Another caller may have finished the load while we waited.
        if let Some(avatar) = self.get(id).await {
            return Ok(avatar);
        }

        let store = Arc::clone(&self.store);
        let load_id = id.clone();
        let avatar = tokio::task::spawn_blocking(move || store.load(&load_id))
            .await
            .map_err(|e| PipelineError::aborted(format!("avatar load task failed: {}", e)))??;
        let avatar = Arc::new(avatar);

        self.entries.write().await.insert(id.clone(), Arc::clone(&avatar));
        info!(avatar_id = %id, cycle_len = avatar.cycle_len(), "Avatar cached");
        Ok(avatar)
    }

    /// Insert or replace an entry.
    ///
    /// Waits for any in-flight load of the same id, so a load that read
    /// the previous artifacts cannot overwrite the new entry.
    pub async fn insert(&self, avatar: Arc<Avatar>) {
        let id = avatar.id().clone();
        let lock = self.load_lock(&id).await;
        let _guard = lock.lock().await;
        self.entries.write().await.insert(id.clone(), avatar);
        debug!(avatar_id = %id, "Avatar cache entry replaced");
    }

    /// Drop an entry. Returns whether one was present.
    pub async fn invalidate(&self, id: &AvatarId) -> bool {
        let lock = self.load_lock(id).await;
        let _guard = lock.lock().await;
        let removed = self.entries.write().await.remove(id).is_some();
        if removed {
            debug!(avatar_id = %id, "Avatar cache entry invalidated");
        }
        removed
    }

    /// Identifiers currently loaded, sorted.
    pub async fn loaded_ids(&self) -> Vec<AvatarId> {
        let mut ids: Vec<_> = self.entries.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn load_lock(&self, id: &AvatarId) -> Arc<Mutex<()>> {
        let mut locks = self.load_locks.lock().await;
        Arc::clone(locks.entry(id.clone()).or_default())
    }
}
