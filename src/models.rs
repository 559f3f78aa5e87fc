use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::store::ImageHandle;

pub const DIMENSION_MIN: u32 = 256;
pub const DIMENSION_MAX: u32 = 2048;
pub const DIMENSION_STEP: u32 = 64;
pub const STEPS_MIN: u32 = 1;
pub const STEPS_MAX: u32 = 50;
pub const GUIDANCE_MIN: f32 = 1.0;
pub const GUIDANCE_MAX: f32 = 20.0;

#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("{field} must be between {min} and {max} in steps of {step} (got {value})")]
    Dimension { field: &'static str, value: u32, min: u32, max: u32, step: u32 },
    #[error("num_inference_steps must be between 1 and 50 (got {0})")]
    Steps(u32),
    #[error("guidance_scale must be between 1 and 20 (got {0})")]
    Guidance(f32),
}

/// Numeric generation knobs. Missing JSON fields fall back to the defaults.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct AdvancedSettings {
    pub width: u32,
    pub height: u32,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self { width: 1024, height: 1024, num_inference_steps: 28, guidance_scale: 3.5 }
    }
}

impl AdvancedSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        check_dimension("width", self.width)?;
        check_dimension("height", self.height)?;
        if !(STEPS_MIN..=STEPS_MAX).contains(&self.num_inference_steps) {
            return Err(SettingsError::Steps(self.num_inference_steps));
        }
        if !self.guidance_scale.is_finite() || !(GUIDANCE_MIN..=GUIDANCE_MAX).contains(&self.guidance_scale) {
            return Err(SettingsError::Guidance(self.guidance_scale));
        }
        Ok(())
    }
}

fn check_dimension(field: &'static str, value: u32) -> Result<(), SettingsError> {
    let in_range = (DIMENSION_MIN..=DIMENSION_MAX).contains(&value);
    if in_range && (value - DIMENSION_MIN) % DIMENSION_STEP == 0 {
        Ok(())
    } else {
        Err(SettingsError::Dimension {
            field,
            value,
            min: DIMENSION_MIN,
            max: DIMENSION_MAX,
            step: DIMENSION_STEP,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub settings: AdvancedSettings,
}

/// The last successful generation. Dropping it releases the stored image.
#[derive(Debug)]
pub struct GeneratedImage {
    pub handle: ImageHandle,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
}

impl GeneratedImage {
    pub fn view(&self) -> GeneratedImageView {
        GeneratedImageView {
            id: self.handle.id(),
            url: self.handle.url(),
            mime_type: self.handle.mime_type().to_string(),
            prompt: self.prompt.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GeneratedImageView {
    pub id: Uuid,
    pub url: String,
    pub mime_type: String,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    Idle,
    Busy,
    Succeeded,
    Failed,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LifecycleSnapshot {
    pub status: LifecycleStatus,
    pub result: Option<GeneratedImageView>,
    pub is_loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SettingsLimits {
    pub dimension_min: u32,
    pub dimension_max: u32,
    pub dimension_step: u32,
    pub steps_min: u32,
    pub steps_max: u32,
    pub guidance_min: f32,
    pub guidance_max: f32,
}

impl Default for SettingsLimits {
    fn default() -> Self {
        Self {
            dimension_min: DIMENSION_MIN,
            dimension_max: DIMENSION_MAX,
            dimension_step: DIMENSION_STEP,
            steps_min: STEPS_MIN,
            steps_max: STEPS_MAX,
            guidance_min: GUIDANCE_MIN,
            guidance_max: GUIDANCE_MAX,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceInfo {
    pub configured: bool,
    pub supports_advanced_parameters: bool,
    pub defaults: AdvancedSettings,
    pub limits: SettingsLimits,
}
