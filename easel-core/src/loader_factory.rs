use anyhow::{anyhow, Result};
use tracing::info;

use crate::{DeviceMap, StableDiffusionLoader, StableDiffusionVersion};

/// Model families the server knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVariant {
    StableDiffusion(StableDiffusionVersion),
    // Add more variants as their pipelines become available
}

impl ModelVariant {
    /// Detect model variant from a Hugging Face repository id
    pub fn from_name(model_name: &str) -> Option<Self> {
        let name_upper = model_name.to_uppercase();

        if name_upper.contains("STABLE-DIFFUSION") || name_upper.contains("STABLE_DIFFUSION") {
            Some(ModelVariant::StableDiffusion(
                if name_upper.contains("2-1") || name_upper.contains("2.1") {
                    StableDiffusionVersion::V2_1
                } else {
                    StableDiffusionVersion::V1_5 // Default to v1.5 if no specific version is found
                },
            ))
        } else {
            None
        }
    }
}

/// Build the loader for `model_name`, detecting the pipeline from the repository id
pub fn loader_for(
    model_name: &str,
    device_map: DeviceMap,
    use_f32: bool,
) -> Result<StableDiffusionLoader> {
    let variant = ModelVariant::from_name(model_name)
        .ok_or_else(|| anyhow!("Unsupported model: {}", model_name))?;

    info!(
        "Using model: {} (detected variant: {:?}, device: {})",
        model_name, variant, device_map
    );

    match variant {
        ModelVariant::StableDiffusion(version) => Ok(StableDiffusionLoader::new(version, device_map)
            .with_repo(model_name)
            .with_f32(use_f32)),
    }
}
