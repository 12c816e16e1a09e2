//! Body-animation sequence types and the playback record kept in the store.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

fn default_transition_duration() -> f32 {
    0.5
}
fn default_weight() -> f32 {
    1.0
}

/// One entry of a body-animation sequence. `proportion` places its start along
/// the audio clip; array order is playback order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationKeyframe {
    pub name: String,
    pub proportion: f32,
    #[serde(default = "default_transition_duration")]
    pub transition_duration: f32,
    #[serde(default, rename = "loop")]
    pub looping: bool,
    #[serde(default)]
    pub loop_count: Option<u32>,
    #[serde(default = "default_weight")]
    pub weight: f32,
}

impl AnimationKeyframe {
    pub fn new(name: &str, proportion: f32) -> Self {
        Self {
            name: name.to_string(),
            proportion,
            transition_duration: default_transition_duration(),
            looping: false,
            loop_count: None,
            weight: default_weight(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Iterations completed by the active looping keyframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopCounter {
    pub count: u32,
    pub max: Option<u32>,
}

impl LoopCounter {
    pub fn for_keyframe(keyframe: &AnimationKeyframe) -> Option<Self> {
        keyframe.looping.then_some(Self {
            count: 0,
            max: keyframe.loop_count,
        })
    }

    /// Record one finished iteration. Returns whether the clip should repeat.
    pub fn register_iteration(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        match self.max {
            Some(max) => self.count < max,
            None => true,
        }
    }
}

/// What the renderer should be playing right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveAnimation {
    pub name: String,
    pub transition_duration: f32,
    pub looping: bool,
    pub weight: f32,
}

impl ActiveAnimation {
    /// A standalone clip with default blending (suggestions, Idle, manual picks).
    pub fn single(name: &str) -> Self {
        Self {
            name: name.to_string(),
            transition_duration: default_transition_duration(),
            looping: false,
            weight: default_weight(),
        }
    }
}

impl From<&AnimationKeyframe> for ActiveAnimation {
    fn from(keyframe: &AnimationKeyframe) -> Self {
        Self {
            name: keyframe.name.clone(),
            transition_duration: keyframe.transition_duration,
            looping: keyframe.looping,
            weight: keyframe.weight,
        }
    }
}

/// Reply to a clip-finished notification from the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClipAction {
    Repeat,
    Hold,
}

/// Timing of an armed sequence.
#[derive(Debug, Clone, Copy)]
pub struct Timeline {
    pub armed_at: Instant,
    pub audio_duration: f32,
    /// Offset into the clip at which playback was paused.
    pub paused_elapsed: Option<Duration>,
    /// Triggers only fire while speech is sounding.
    pub speech_bound: bool,
}

/// Animation side of the engine store.
#[derive(Debug, Clone, Default)]
pub struct AnimationPlayback {
    pub sequence: Vec<AnimationKeyframe>,
    pub suggestion: Option<String>,
    pub state: PlaybackState,
    pub cursor: Option<usize>,
    pub loop_counter: Option<LoopCounter>,
    pub current: Option<ActiveAnimation>,
    /// Clip names the loaded model provides. Empty until a model is loaded,
    /// in which case names cannot be checked and are accepted.
    pub known: HashSet<String>,
    /// Bumped on every arm, disarm, pause and resume. Triggers carry the value
    /// they were scheduled under and do nothing once it moves on.
    pub generation: u64,
    pub timeline: Option<Timeline>,
}

impl AnimationPlayback {
    pub fn is_known(&self, name: &str) -> bool {
        self.known.is_empty() || self.known.contains(name)
    }

    /// Make keyframe `index` the active animation.
    pub fn activate(&mut self, index: usize) -> Option<&ActiveAnimation> {
        let keyframe = self.sequence.get(index)?;
        self.loop_counter = LoopCounter::for_keyframe(keyframe);
        self.current = Some(ActiveAnimation::from(keyframe));
        self.cursor = Some(index);
        self.current.as_ref()
    }
}

/// Start offsets of keyframes 1.. relative to arm time.
///
/// Proportions are clamped to [0, 1]. A keyframe declared after a later-timed
/// one starts no earlier than its predecessor, so activation always follows
/// declaration order. Offsets too large to represent are left out, along
/// with every keyframe after them.
pub fn trigger_offsets(sequence: &[AnimationKeyframe], audio_duration: f32) -> Vec<(usize, Duration)> {
    let total_secs = audio_duration as f64;
    let mut floor_secs = 0.0f64;
    let mut offsets = Vec::with_capacity(sequence.len().saturating_sub(1));
    for (index, keyframe) in sequence.iter().enumerate() {
        let proportion = if keyframe.proportion.is_finite() {
            keyframe.proportion.clamp(0.0, 1.0) as f64
        } else {
            0.0
        };
        let start_secs = (proportion * total_secs).max(floor_secs);
        floor_secs = start_secs;
        if index == 0 {
            continue;
        }
        match Duration::try_from_secs_f64(start_secs) {
            Ok(offset) => offsets.push((index, offset)),
            Err(_) => {
                warn!(
                    "[Scheduler] Keyframe {} starts {}s in, beyond any timer; dropping the rest",
                    index, start_secs
                );
                break;
            }
        }
    }
    offsets
}
