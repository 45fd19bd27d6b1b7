#[cfg(feature = "accelerate")]
extern crate accelerate_src;

#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

pub mod artifacts;
pub mod cache;
pub mod device_map;
pub mod error;
pub mod generator;
pub mod loader;
mod loader_factory;
pub mod request;
mod util;

#[cfg(test)]
mod testing;

mod stable_diffusion;

pub use artifacts::*;
pub use cache::*;
pub use candle_core::Device;
pub use device_map::*;
pub use error::*;
pub use generator::*;
use image::DynamicImage;
pub use loader::*;
pub use loader_factory::*;
pub use request::*;
pub use stable_diffusion::{StableDiffusionLoader, StableDiffusionModel, StableDiffusionVersion};
pub use util::*;

/// A loaded inference pipeline bound to a compute device.
pub trait ModelLike: Send + Sync {
    fn run(&self, request: GenerationRequest) -> anyhow::Result<DynamicImage>;

    /// Device the pipeline's weights live on.
    fn device(&self) -> &Device;
}
