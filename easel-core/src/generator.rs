//! The request-to-artifact flow: load on demand, run inference, persist.
//!
//! Every failure on that path is converted into a [`GenerationResult`];
//! nothing raised by the model or the filesystem reaches the caller as an
//! error or a panic.

use std::sync::Arc;

use anyhow::anyhow;
use image::DynamicImage;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    ArtifactFile, ArtifactStore, ClearStatus, GenerationError, GenerationRequest, Loader,
    ModelCache, ModelLike, StorageError,
};

/// Outcome of a generation request: an image with its file, or the reason there is none.
#[derive(Debug)]
pub enum GenerationResult {
    Generated {
        image: DynamicImage,
        artifact: ArtifactFile,
    },
    Failed(GenerationError),
}

impl GenerationResult {
    pub fn image(&self) -> Option<&DynamicImage> {
        match self {
            Self::Generated { image, .. } => Some(image),
            Self::Failed(_) => None,
        }
    }

    pub fn artifact(&self) -> Option<&ArtifactFile> {
        match self {
            Self::Generated { artifact, .. } => Some(artifact),
            Self::Failed(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Generated { .. })
    }

    /// Status line shown next to the image.
    pub fn message(&self) -> String {
        match self {
            Self::Generated { artifact, .. } => format!(
                "✅ Image generated successfully! Saved as: {}",
                artifact.filename
            ),
            Self::Failed(GenerationError::Load(e)) => format!("Error: {e}"),
            Self::Failed(GenerationError::Inference(e)) => {
                format!("❌ Error generating image: {e:#}")
            }
            Self::Failed(GenerationError::Storage(e)) => format!("❌ Error saving image: {e}"),
        }
    }
}

pub struct Generator<L: Loader> {
    shared: Arc<Shared<L>>,
}

struct Shared<L: Loader> {
    cache: ModelCache<L>,
    store: ArtifactStore,
    // Serializes load-and-use of the single resident handle; waiters queue in FIFO order.
    turn: Mutex<()>,
}

impl<L: Loader> Generator<L> {
    pub fn new(loader: L, store: ArtifactStore) -> Self {
        Self {
            shared: Arc::new(Shared {
                cache: ModelCache::new(loader),
                store,
                turn: Mutex::new(()),
            }),
        }
    }

    pub fn cache(&self) -> &ModelCache<L> {
        &self.shared.cache
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.shared.store
    }

    /// Runs one request to completion. A caller that stops waiting does not
    /// abort it: the request keeps its turn until inference and saving finish.
    pub async fn generate(&self, request: GenerationRequest) -> GenerationResult {
        let shared = Arc::clone(&self.shared);
        let outcome = tokio::spawn(async move { shared.try_generate(request).await })
            .await
            .unwrap_or_else(|e| {
                Err(GenerationError::Inference(anyhow!(
                    "generation task failed: {e}"
                )))
            });
        match outcome {
            Ok((image, artifact)) => GenerationResult::Generated { image, artifact },
            Err(e) => {
                warn!("Generation failed: {e}");
                GenerationResult::Failed(e)
            }
        }
    }

    /// Releases the resident model. Does not wait for a running generation,
    /// which finishes on its own reference to the handle.
    pub async fn clear(&self) -> ClearStatus {
        self.shared.cache.clear().await
    }

    pub async fn is_loaded(&self) -> bool {
        self.shared.cache.is_loaded().await
    }
}

impl<L: Loader> Shared<L> {
    async fn try_generate(
        &self,
        request: GenerationRequest,
    ) -> Result<(DynamicImage, ArtifactFile), GenerationError> {
        let _turn = self.turn.lock().await;
        let handle = self.cache.ensure_loaded().await?;

        info!(
            steps = request.inference_steps,
            width = request.width,
            height = request.height,
            guidance = request.guidance_scale,
            "Generating image for prompt {:?}",
            request.prompt
        );
        let image = run_blocking(handle, request).await?;

        let store = self.store.clone();
        let (image, artifact) =
            tokio::task::spawn_blocking(move || store.save(&image).map(|a| (image, a)))
                .await
                .map_err(StorageError::from)??;
        Ok((image, artifact))
    }
}

async fn run_blocking<M: ModelLike + 'static>(
    handle: Arc<M>,
    request: GenerationRequest,
) -> Result<DynamicImage, GenerationError> {
    tokio::task::spawn_blocking(move || handle.run(request))
        .await
        .map_err(|e| GenerationError::Inference(anyhow!("inference task failed: {e}")))?
        .map_err(GenerationError::Inference)
}
