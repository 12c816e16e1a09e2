//! Trajectory Interpolator — blends emotion keyframes over an utterance.
//!
//! A trajectory is a duration plus keyframes placed at proportions of that
//! duration. Sampling it at an elapsed time yields a linear blend between the
//! two keyframes bounding the current progress. Once the duration has passed
//! the trajectory holds its final keyframe (sticky end state) until a new one
//! supersedes it.

use super::table::{EmotionWeightTable, EmotionWeights};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryKeyframe {
    pub tag: String,
    pub proportion: f32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrajectoryError {
    #[error("duration must be a positive number of seconds, got {0}")]
    InvalidDuration(f32),
    #[error("trajectory has no keyframes")]
    NoKeyframes,
    #[error("keyframe {index} has a non-finite proportion")]
    InvalidProportion { index: usize },
}

/// Validated trajectory. Always has at least one keyframe, sorted by proportion.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    duration: f32,
    keyframes: Vec<TrajectoryKeyframe>,
}

/// Result of sampling a trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectorySample {
    pub weights: EmotionWeights,
    /// True once elapsed time reached the trajectory's duration.
    pub completed: bool,
}

impl Trajectory {
    pub fn new(
        duration: f32,
        mut keyframes: Vec<TrajectoryKeyframe>,
    ) -> Result<Self, TrajectoryError> {
        if !duration.is_finite() || duration <= 0.0 {
            return Err(TrajectoryError::InvalidDuration(duration));
        }
        if keyframes.is_empty() {
            return Err(TrajectoryError::NoKeyframes);
        }
        if let Some(index) = keyframes.iter().position(|k| !k.proportion.is_finite()) {
            return Err(TrajectoryError::InvalidProportion { index });
        }
        // Stable: keyframes sharing a proportion keep their arrival order.
        keyframes.sort_by(|a, b| a.proportion.total_cmp(&b.proportion));
        Ok(Self {
            duration,
            keyframes,
        })
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn keyframes(&self) -> &[TrajectoryKeyframe] {
        &self.keyframes
    }

    pub fn last(&self) -> &TrajectoryKeyframe {
        &self.keyframes[self.keyframes.len() - 1]
    }

    /// Sample the blended weights `elapsed` seconds after the trajectory started.
    pub fn sample(&self, table: &EmotionWeightTable, elapsed: f32) -> TrajectorySample {
        if elapsed >= self.duration {
            return TrajectorySample {
                weights: table.weights_for(&self.last().tag),
                completed: true,
            };
        }

        let progress = (elapsed / self.duration).clamp(0.0, 1.0);
        let (prev, next) = self.bounding_pair(progress);

        let span = next.proportion - prev.proportion;
        let weights = if std::ptr::eq(prev, next) || span.abs() <= f32::EPSILON {
            table.weights_for(&prev.tag)
        } else {
            let local = ((progress - prev.proportion) / span).clamp(0.0, 1.0);
            if local <= 0.0 {
                table.weights_for(&prev.tag)
            } else if local >= 1.0 {
                table.weights_for(&next.tag)
            } else {
                blend(
                    &table.weights_for(&prev.tag),
                    &table.weights_for(&next.tag),
                    local,
                )
            }
        };

        TrajectorySample {
            weights,
            completed: false,
        }
    }

    /// Keyframes surrounding `progress`. Clamps to the endpoints outside the
    /// keyframe range.
    fn bounding_pair(&self, progress: f32) -> (&TrajectoryKeyframe, &TrajectoryKeyframe) {
        let first = &self.keyframes[0];
        if progress <= first.proportion {
            return (first, first);
        }
        for pair in self.keyframes.windows(2) {
            if progress <= pair[1].proportion {
                return (&pair[0], &pair[1]);
            }
        }
        let last = self.last();
        (last, last)
    }
}

/// Per-shape linear blend over the union of both maps; absent shapes count as 0.
pub fn blend(from: &EmotionWeights, to: &EmotionWeights, t: f32) -> EmotionWeights {
    let mut out = EmotionWeights::with_capacity(from.len().max(to.len()));
    for name in from.keys().chain(to.keys()) {
        if out.contains_key(name) {
            continue;
        }
        let a = from.get(name).copied().unwrap_or(0.0);
        let b = to.get(name).copied().unwrap_or(0.0);
        out.insert(name.clone(), a * (1.0 - t) + b * t);
    }
    out
}

/// Playback state of the current trajectory: which one is active, when it
/// started, and whether it has run to completion.
#[derive(Debug, Clone, Default)]
pub struct TrajectoryPlayback {
    trajectory: Option<Trajectory>,
    reference: Option<Instant>,
    completed: bool,
    /// Bumped on every `start`, so a late completion mark cannot land on a
    /// newer trajectory.
    epoch: u64,
}

impl TrajectoryPlayback {
    /// Replace whatever was playing. The reference time is resolved lazily.
    pub fn start(&mut self, trajectory: Trajectory) {
        self.trajectory = Some(trajectory);
        self.reference = None;
        self.completed = false;
        self.epoch += 1;
    }

    pub fn clear(&mut self) {
        self.trajectory = None;
        self.reference = None;
        self.completed = false;
        self.epoch += 1;
    }

    pub fn trajectory(&self) -> Option<&Trajectory> {
        self.trajectory.as_ref()
    }

    pub fn reference(&self) -> Option<Instant> {
        self.reference
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_active(&self) -> bool {
        self.trajectory.is_some() && !self.completed
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Pin the reference time if it is not set yet. Prefers the audio start
    /// timestamp; otherwise the clock starts at `now` so a trajectory that
    /// arrives ahead of its audio never stalls.
    pub fn resolve_reference(&mut self, now: Instant, audio_start: Option<Instant>) {
        if self.trajectory.is_none() || self.reference.is_some() {
            return;
        }
        let reference = match audio_start {
            Some(at) => at,
            None => {
                debug!("[Trajectory] No audio start known, starting clock at first evaluation");
                now
            }
        };
        self.reference = Some(reference);
    }

    /// Freeze the trajectory at its final keyframe, if `epoch` is still current.
    pub fn mark_completed(&mut self, epoch: u64) {
        if self.epoch == epoch && self.trajectory.is_some() && !self.completed {
            debug!("[Trajectory] Completed, holding final expression");
            self.completed = true;
        }
    }

    /// Weights for `now`. Does not mutate; completion is reported in the sample.
    pub fn evaluate(&self, table: &EmotionWeightTable, now: Instant) -> TrajectorySample {
        let Some(trajectory) = &self.trajectory else {
            return TrajectorySample {
                weights: table.neutral(),
                completed: false,
            };
        };
        if self.completed {
            return TrajectorySample {
                weights: table.weights_for(&trajectory.last().tag),
                completed: true,
            };
        }
        let elapsed = self
            .reference
            .map(|start| now.saturating_duration_since(start).as_secs_f32())
            .unwrap_or(0.0);
        trajectory.sample(table, elapsed)
    }
}
