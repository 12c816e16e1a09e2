//! Weight Compositor — merges every source of facial intent into one frame.
//!
//! Precedence, highest first: manual overrides (when any weight is above the
//! override epsilon), then the trajectory blend. Active lip-sync shapes are
//! written over the result. The merged targets are then approached with a
//! damped step so expressions ease in instead of popping.

use super::table::EmotionWeights;
use std::collections::HashSet;

pub const DEFAULT_SMOOTHING_RATE: f32 = 25.0;
pub const DEFAULT_SNAP_EPSILON: f32 = 0.001;
pub const DEFAULT_OVERRIDE_EPSILON: f32 = 0.01;

#[derive(Debug, Clone, Copy)]
pub struct WeightCompositor {
    smoothing_rate: f32,
    snap_epsilon: f32,
    override_epsilon: f32,
}

impl Default for WeightCompositor {
    fn default() -> Self {
        Self::new(
            DEFAULT_SMOOTHING_RATE,
            DEFAULT_SNAP_EPSILON,
            DEFAULT_OVERRIDE_EPSILON,
        )
    }
}

impl WeightCompositor {
    pub fn new(smoothing_rate: f32, snap_epsilon: f32, override_epsilon: f32) -> Self {
        Self {
            smoothing_rate: smoothing_rate.max(0.0),
            snap_epsilon: snap_epsilon.max(0.0),
            override_epsilon,
        }
    }

    /// An override map counts only if some weight is above the epsilon. A map
    /// of zeros behaves as if no override were set.
    pub fn override_active(&self, overrides: &EmotionWeights) -> bool {
        overrides.values().any(|w| *w > self.override_epsilon)
    }

    /// Target weights for this frame, before smoothing.
    pub fn compose(
        &self,
        overrides: &EmotionWeights,
        trajectory: EmotionWeights,
        lip_sync: Option<&EmotionWeights>,
    ) -> EmotionWeights {
        let mut targets = if self.override_active(overrides) {
            overrides.clone()
        } else {
            trajectory
        };
        if let Some(mouth) = lip_sync {
            for (name, weight) in mouth {
                targets.insert(name.clone(), *weight);
            }
        }
        targets
    }

    /// Step `current` toward `targets` for one frame of `frame_delta` seconds.
    ///
    /// With a non-empty `shapes` dictionary every listed shape is driven and
    /// anything else is ignored. Without one (mesh not loaded yet), every
    /// shape that is targeted or currently non-default is driven.
    pub fn smooth(
        &self,
        current: &EmotionWeights,
        targets: &EmotionWeights,
        shapes: &[String],
        frame_delta: f32,
    ) -> EmotionWeights {
        let alpha = if frame_delta.is_finite() {
            (frame_delta.max(0.0) * self.smoothing_rate).min(1.0)
        } else {
            1.0
        };

        let mut out = EmotionWeights::new();
        let mut step = |name: &String| {
            let target = targets.get(name).copied().unwrap_or(0.0);
            let now = current.get(name).copied().unwrap_or(0.0);
            let mut next = now + (target - now) * alpha;
            if (next - target).abs() < self.snap_epsilon {
                next = target;
            }
            out.insert(name.clone(), next);
        };

        if shapes.is_empty() {
            let names: HashSet<&String> = current.keys().chain(targets.keys()).collect();
            names.into_iter().for_each(&mut step);
        } else {
            shapes.iter().for_each(&mut step);
        }
        out
    }
}
