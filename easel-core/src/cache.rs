//! Process-wide holder of the single resident model handle.
//!
//! The cache is either empty or holds exactly one handle. The first caller
//! of [`ModelCache::ensure_loaded`] on an empty cache performs the load;
//! callers arriving while that load runs wait for it and reuse its result.
//! A failed load leaves the cache empty so the next call tries again.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{error, info};

use crate::{release_device_memory, LoadFailure, Loader, ModelLike};

pub struct ModelCache<L: Loader> {
    loader: L,
    resident: RwLock<Option<Arc<L::Model>>>,
    load_gate: Mutex<()>,
}

impl<L: Loader> ModelCache<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            resident: RwLock::new(None),
            load_gate: Mutex::new(()),
        }
    }

    /// Returns the resident handle, loading it first if the cache is empty.
    pub async fn ensure_loaded(&self) -> Result<Arc<L::Model>, LoadFailure> {
        if let Some(handle) = self.resident().await {
            return Ok(handle);
        }

        let _gate = self.load_gate.lock().await;
        // Another caller may have finished loading while we waited.
        if let Some(handle) = self.resident().await {
            return Ok(handle);
        }

        info!("Loading model...");
        match self.loader.load().await {
            Ok(model) => {
                let handle = Arc::new(model);
                *self.resident.write().await = Some(handle.clone());
                info!("Model loaded on {:?}", handle.device().location());
                Ok(handle)
            }
            Err(e) => {
                error!("Error loading model: {e:#}");
                Err(LoadFailure(e))
            }
        }
    }

    /// Drops the resident handle, if any. Clearing an empty cache is a no-op.
    pub async fn clear(&self) -> ClearStatus {
        let handle = self.resident.write().await.take();
        let Some(handle) = handle else {
            return ClearStatus { was_loaded: false };
        };

        let device = handle.device().clone();
        // In-flight inference keeps its own reference; memory is returned when it finishes.
        if Arc::strong_count(&handle) > 1 {
            info!("Model cleared while a generation is still running");
        }
        drop(handle);
        release_device_memory(&device);
        info!("Model cleared from memory");
        ClearStatus { was_loaded: true }
    }

    /// Whether a handle is currently resident. Never waits on a load in progress.
    pub async fn is_loaded(&self) -> bool {
        self.resident.read().await.is_some()
    }

    async fn resident(&self) -> Option<Arc<L::Model>> {
        self.resident.read().await.clone()
    }
}

/// Outcome of [`ModelCache::clear`]. Clearing always succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearStatus {
    pub was_loaded: bool,
}

impl ClearStatus {
    pub fn message(&self) -> &'static str {
        "🗑️ Model cleared from memory"
    }
}

impl fmt::Display for ClearStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}
