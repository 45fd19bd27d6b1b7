use std::path::PathBuf;

use anyhow::{Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_transformers::models::stable_diffusion::{
    self, clip::ClipTextTransformer, unet_2d::UNet2DConditionModel, vae::AutoEncoderKL,
    StableDiffusionConfig,
};
use hf_hub::api::tokio::{Api, ApiRepo};
use image::DynamicImage;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use crate::{
    select_best_device, tensor_to_image, working_dtype, DeviceMap, GenerationRequest, Loader,
    ModelLike,
};

const VAE_SCALE: f64 = 0.18215;
const LATENT_CHANNELS: usize = 4;
const END_OF_TEXT: &str = "<|endoftext|>";

/// Stable Diffusion releases this pipeline can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StableDiffusionVersion {
    V1_5,
    V2_1,
}

impl StableDiffusionVersion {
    pub fn default_repo(&self) -> &'static str {
        match self {
            Self::V1_5 => "runwayml/stable-diffusion-v1-5",
            Self::V2_1 => "stabilityai/stable-diffusion-2-1",
        }
    }

    fn tokenizer_repo(&self) -> &'static str {
        match self {
            Self::V1_5 | Self::V2_1 => "openai/clip-vit-base-patch32",
        }
    }

    fn config(&self) -> StableDiffusionConfig {
        match self {
            Self::V1_5 => StableDiffusionConfig::v1_5(None, None, None),
            Self::V2_1 => StableDiffusionConfig::v2_1(None, None, None),
        }
    }
}

pub struct StableDiffusionModel {
    device: Device,
    dtype: DType,
    config: StableDiffusionConfig,
    tokenizer: Tokenizer,
    pad_id: u32,
    eos_id: u32,
    text_model: ClipTextTransformer,
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
}

impl StableDiffusionModel {
    fn encode_prompt(&self, text: &str) -> Result<Tensor> {
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        let tokens = fit_to_context(
            tokens,
            self.config.clip.max_position_embeddings,
            self.eos_id,
            self.pad_id,
        );
        let tokens = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(self.text_model.forward(&tokens)?)
    }
}

/// Truncates `tokens` to `max_len`, ending on `eos_id`, then pads with `pad_id`.
fn fit_to_context(mut tokens: Vec<u32>, max_len: usize, eos_id: u32, pad_id: u32) -> Vec<u32> {
    if tokens.len() > max_len {
        warn!(
            "Prompt is {} tokens long, truncating to {max_len}",
            tokens.len()
        );
        tokens.truncate(max_len - 1);
        tokens.push(eos_id);
    }
    tokens.resize(max_len, pad_id);
    tokens
}

/// Batches the embeddings unconditional first, the order [`apply_guidance`] expects.
fn guidance_batch(uncond: Tensor, cond: Tensor) -> Result<Tensor> {
    Ok(Tensor::cat(&[uncond, cond], 0)?)
}

/// Combines a guided noise prediction: `uncond + scale * (cond - uncond)`.
fn apply_guidance(noise_pred: &Tensor, guidance_scale: f64) -> Result<Tensor> {
    let noise_pred = noise_pred.chunk(2, 0)?;
    let (uncond, cond) = (&noise_pred[0], &noise_pred[1]);
    Ok((uncond + ((cond - uncond)? * guidance_scale)?)?)
}

impl ModelLike for StableDiffusionModel {
    fn run(&self, request: GenerationRequest) -> Result<DynamicImage> {
        let GenerationRequest {
            prompt,
            negative_prompt,
            guidance_scale,
            inference_steps,
            width,
            height,
            seed,
        } = request;

        if width % 8 != 0 || height % 8 != 0 {
            anyhow::bail!(
                "`height` and `width` have to be divisible by 8 but are {height} and {width}."
            );
        }

        if let Some(seed) = seed {
            if let Err(e) = self.device.set_seed(seed) {
                warn!("Seed {seed} ignored: {e}");
            }
        }

        let use_guidance = guidance_scale > 1.0;
        let mut scheduler = self.config.build_scheduler(inference_steps)?;

        // --- Text embeddings; the negative prompt is the unconditional branch ---
        let text_embeddings = self.encode_prompt(&prompt)?;
        let text_embeddings = if use_guidance {
            let uncond_embeddings = self.encode_prompt(&negative_prompt)?;
            guidance_batch(uncond_embeddings, text_embeddings)?
        } else {
            text_embeddings
        }
        .to_dtype(self.dtype)?;

        // --- Initial noise ---
        let latents = Tensor::randn(
            0f32,
            1f32,
            (1, LATENT_CHANNELS, height / 8, width / 8),
            &self.device,
        )?;
        let mut latents = (latents * scheduler.init_noise_sigma())?.to_dtype(self.dtype)?;

        // --- Denoising loop ---
        let timesteps = scheduler.timesteps().to_vec();
        for (index, &timestep) in timesteps.iter().enumerate() {
            debug!("Denoising step {}/{}", index + 1, timesteps.len());
            let latent_model_input = if use_guidance {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let latent_model_input = scheduler.scale_model_input(latent_model_input, timestep)?;
            let noise_pred =
                self.unet
                    .forward(&latent_model_input, timestep as f64, &text_embeddings)?;
            let noise_pred = if use_guidance {
                apply_guidance(&noise_pred, guidance_scale)?
            } else {
                noise_pred
            };
            latents = scheduler.step(&noise_pred, timestep, &latents)?;
        }

        // --- Decode the latents and map [-1, 1] to u8 ---
        let image = self.vae.decode(&(&latents / VAE_SCALE)?)?;
        let image = ((image / 2.)? + 0.5)?.to_device(&Device::Cpu)?;
        let image = (image.clamp(0f32, 1.)? * 255.)?
            .to_dtype(DType::U8)?
            .i(0)?;
        debug!("Decoded image");

        tensor_to_image(&image)
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

/// Fetches Stable Diffusion weights from the Hugging Face hub and builds the pipeline.
#[derive(Debug, Clone)]
pub struct StableDiffusionLoader {
    version: StableDiffusionVersion,
    repo: String,
    device_map: DeviceMap,
    use_f32: bool,
}

impl StableDiffusionLoader {
    pub fn new(version: StableDiffusionVersion, device_map: DeviceMap) -> Self {
        Self {
            version,
            repo: version.default_repo().to_string(),
            device_map,
            use_f32: false,
        }
    }

    /// Loads weights from `repo` instead of the version's default repository.
    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = repo.into();
        self
    }

    pub fn with_f32(mut self, use_f32: bool) -> Self {
        self.use_f32 = use_f32;
        self
    }

    pub fn version(&self) -> StableDiffusionVersion {
        self.version
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }
}

struct WeightFiles {
    tokenizer: PathBuf,
    clip: PathBuf,
    unet: PathBuf,
    vae: PathBuf,
}

impl Loader for StableDiffusionLoader {
    type Model = StableDiffusionModel;

    async fn load(&self) -> Result<Self::Model> {
        // Configure device.
        let device = select_best_device(self.device_map).context("failed to set up device")?;
        let dtype = working_dtype(&device, self.use_f32);
        let config = self.version.config();
        info!(
            "Loading {} ({:?}) on {:?} as {:?}",
            self.repo,
            self.version,
            device.location(),
            dtype
        );

        // --- Fetch tokenizer and weights ---
        let api = Api::new().context("failed to create hf hub API")?;
        let tokenizer = api
            .model(self.version.tokenizer_repo().to_string())
            .get("tokenizer.json")
            .await
            .context("failed to get CLIP tokenizer")?;
        let repo = api.model(self.repo.clone());
        let files = WeightFiles {
            tokenizer,
            clip: fetch_weights(&repo, "text_encoder/model", dtype)
                .await
                .context("failed to get text encoder weights")?,
            unet: fetch_weights(&repo, "unet/diffusion_pytorch_model", dtype)
                .await
                .context("failed to get UNet weights")?,
            vae: fetch_weights(&repo, "vae/diffusion_pytorch_model", dtype)
                .await
                .context("failed to get VAE weights")?,
        };

        // Building the networks maps gigabytes of weights; keep it off the async workers.
        tokio::task::spawn_blocking(move || build_model(config, device, dtype, files)).await?
    }
}

/// Prefers the fp16 variant of a weight file when running in half precision.
async fn fetch_weights(repo: &ApiRepo, stem: &str, dtype: DType) -> Result<PathBuf> {
    let full = format!("{stem}.safetensors");
    if dtype == DType::F16 {
        let half = format!("{stem}.fp16.safetensors");
        match repo.get(&half).await {
            Ok(path) => return Ok(path),
            Err(e) => warn!("{half} unavailable ({e}), falling back to {full}"),
        }
    }
    debug!("Fetching {full}");
    Ok(repo.get(&full).await?)
}

fn build_model(
    config: StableDiffusionConfig,
    device: Device,
    dtype: DType,
    files: WeightFiles,
) -> Result<StableDiffusionModel> {
    // --- Tokenizer ---
    let tokenizer = Tokenizer::from_file(&files.tokenizer)
        .map_err(Error::msg)
        .context("failed to load CLIP tokenizer")?;
    let vocab = tokenizer.get_vocab(true);
    let eos_id = *vocab
        .get(END_OF_TEXT)
        .context("tokenizer has no end-of-text token")?;
    let pad_id = match &config.clip.pad_with {
        Some(padding) => *vocab
            .get(padding.as_str())
            .with_context(|| format!("tokenizer has no {padding:?} token"))?,
        None => eos_id,
    };

    // --- Networks ---
    let text_model =
        stable_diffusion::build_clip_transformer(&config.clip, &files.clip, &device, dtype)
            .context("failed to build text encoder")?;
    let unet = config
        .build_unet(
            &files.unet,
            &device,
            LATENT_CHANNELS,
            cfg!(feature = "flash-attn"),
            dtype,
        )
        .context("failed to build UNet")?;
    let vae = config
        .build_vae(&files.vae, &device, dtype)
        .context("failed to build VAE")?;
    info!("Stable Diffusion pipeline ready");

    Ok(StableDiffusionModel {
        device,
        dtype,
        config,
        tokenizer,
        pad_id,
        eos_id,
        text_model,
        unet,
        vae,
    })
}
