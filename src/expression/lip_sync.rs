//! Lip-Sync Channel — mouth shapes driven by the speech audio.
//!
//! The channel only holds the latest values pushed by the viseme or amplitude
//! source. Whether they count is decided by the speaking flag at read time,
//! so stale values left behind after audio ends never reach the mesh.

use super::table::EmotionWeights;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LipSyncConfig {
    /// Shape driven by the audio amplitude signal.
    #[serde(default = "default_amplitude_shape")]
    pub amplitude_shape: String,
    /// Multiplier applied to the raw amplitude before clamping to [0, 1].
    #[serde(default = "default_amplitude_gain")]
    pub amplitude_gain: f32,
}

impl Default for LipSyncConfig {
    fn default() -> Self {
        Self {
            amplitude_shape: default_amplitude_shape(),
            amplitude_gain: default_amplitude_gain(),
        }
    }
}

fn default_amplitude_shape() -> String {
    "jawOpen".to_string()
}
fn default_amplitude_gain() -> f32 {
    1.0
}

#[derive(Debug, Clone, Default)]
pub struct LipSyncChannel {
    shapes: EmotionWeights,
}

impl LipSyncChannel {
    /// Replace the whole viseme frame.
    pub fn set_weights(&mut self, weights: EmotionWeights) {
        self.shapes = weights;
    }

    pub fn set_shape(&mut self, name: &str, weight: f32) {
        self.shapes.insert(name.to_string(), weight);
    }

    /// Map an audio amplitude onto the configured mouth shape.
    pub fn set_amplitude(&mut self, config: &LipSyncConfig, amplitude: f32) {
        let weight = if amplitude.is_finite() {
            (amplitude * config.amplitude_gain).clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.shapes.insert(config.amplitude_shape.clone(), weight);
    }

    pub fn clear(&mut self) {
        self.shapes.clear();
    }

    /// Raw values, regardless of the speaking flag.
    pub fn raw(&self) -> &EmotionWeights {
        &self.shapes
    }

    /// The shapes that apply this frame: none unless audio is sounding.
    pub fn active(&self, is_speaking: bool) -> Option<&EmotionWeights> {
        if is_speaking && !self.shapes.is_empty() {
            Some(&self.shapes)
        } else {
            None
        }
    }
}
