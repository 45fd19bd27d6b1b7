//! Fakes shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use candle_core::Device;
use image::DynamicImage;

use crate::{GenerationRequest, Loader, ModelLike};

/// Counts how many of something exist at once and the highest count seen.
#[derive(Debug, Default)]
pub(crate) struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub(crate) struct FakeModel {
    device: Device,
    fail_with: Option<String>,
    panic: bool,
    run_time: Option<Duration>,
    alive: Arc<Gauge>,
    running: Arc<Gauge>,
}

impl Drop for FakeModel {
    fn drop(&mut self) {
        self.alive.exit();
    }
}

impl ModelLike for FakeModel {
    fn run(&self, request: GenerationRequest) -> Result<DynamicImage> {
        if self.panic {
            panic!("sampler exploded");
        }
        if let Some(message) = &self.fail_with {
            return Err(anyhow!("{message}"));
        }
        self.running.enter();
        if let Some(run_time) = self.run_time {
            std::thread::sleep(run_time);
        }
        self.running.exit();
        Ok(DynamicImage::new_rgb8(
            request.width as u32,
            request.height as u32,
        ))
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeLoader {
    pub loads: Arc<AtomicUsize>,
    pub fail_load: Arc<AtomicBool>,
    pub fail_inference: Option<String>,
    pub panic_inference: bool,
    pub delay: Option<Duration>,
    pub run_time: Option<Duration>,
    /// Models currently in memory.
    pub alive: Arc<Gauge>,
    /// Inferences currently executing.
    pub running: Arc<Gauge>,
}

impl Loader for FakeLoader {
    type Model = FakeModel;

    async fn load(&self) -> Result<FakeModel> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_load.load(Ordering::SeqCst) {
            anyhow::bail!("model weights not found");
        }
        self.alive.enter();
        Ok(FakeModel {
            device: Device::Cpu,
            fail_with: self.fail_inference.clone(),
            panic: self.panic_inference,
            run_time: self.run_time,
            alive: self.alive.clone(),
            running: self.running.clone(),
        })
    }
}

pub(crate) fn is_artifact_name(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(".png") else {
        return false;
    };
    let bytes = stem.as_bytes();
    bytes.len() == 24
        && bytes[..8].iter().all(u8::is_ascii_digit)
        && bytes[8] == b'_'
        && bytes[9..15].iter().all(u8::is_ascii_digit)
        && bytes[15] == b'_'
        && bytes[16..]
            .iter()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b))
}
