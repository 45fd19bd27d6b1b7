use serde::{Deserialize, Serialize};

/// Bounds of a numeric request field as offered to the user.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct FieldRange {
    pub min: f64,
    pub max: f64,
    pub default: f64,
    pub step: f64,
}

impl FieldRange {
    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

pub const GUIDANCE_SCALE: FieldRange = FieldRange {
    min: 1.0,
    max: 20.0,
    default: 7.5,
    step: 0.5,
};

pub const INFERENCE_STEPS: FieldRange = FieldRange {
    min: 10.0,
    max: 100.0,
    default: 20.0,
    step: 5.0,
};

pub const WIDTH: FieldRange = FieldRange {
    min: 256.0,
    max: 1024.0,
    default: 512.0,
    step: 64.0,
};

pub const HEIGHT: FieldRange = FieldRange {
    min: 256.0,
    max: 1024.0,
    default: 512.0,
    step: 64.0,
};

pub const EXAMPLE_PROMPTS: [&str; 5] = [
    "A beautiful sunset over mountains, digital art, highly detailed",
    "A cute robot in a futuristic city, cyberpunk style",
    "A magical forest with glowing mushrooms and fireflies",
    "A majestic eagle soaring over snow-capped peaks",
    "A cozy coffee shop interior with warm lighting",
];

// Define the request type. Missing fields fall back to the widget defaults.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub guidance_scale: f64,
    pub inference_steps: usize,
    pub width: usize,
    pub height: usize,
    pub seed: Option<u64>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            guidance_scale: GUIDANCE_SCALE.default,
            inference_steps: INFERENCE_STEPS.default as usize,
            width: WIDTH.default as usize,
            height: HEIGHT.default as usize,
            seed: None,
        }
    }
}
