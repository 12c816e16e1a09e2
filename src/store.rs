//! Engine Store — the single state object shared by every component.
//!
//! Handlers and timer tasks write to it; the frame tick takes a snapshot and
//! computes outside the lock. The mutex is only ever held for short,
//! non-awaiting sections.

use crate::animation::sequence::AnimationPlayback;
use crate::expression::lip_sync::LipSyncChannel;
use crate::expression::table::EmotionWeights;
use crate::expression::trajectory::TrajectoryPlayback;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;

pub type SharedStore = Arc<Mutex<EngineStore>>;

/// Audio timing signals supplied by the playback layer.
#[derive(Debug, Clone, Default)]
pub struct AudioTiming {
    pub speaking: bool,
    pub duration_secs: Option<f32>,
    pub started_at: Option<Instant>,
}

/// Shape dictionary of the loaded mesh and the weights last applied to it.
#[derive(Debug, Clone, Default)]
pub struct MeshState {
    shapes: Vec<String>,
    index: HashSet<String>,
    pub weights: EmotionWeights,
}

impl MeshState {
    pub fn set_dictionary<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shapes.clear();
        self.index.clear();
        for name in names {
            let name = name.into();
            if self.index.insert(name.clone()) {
                self.shapes.push(name);
            }
        }
        let index = &self.index;
        self.weights.retain(|name, _| index.contains(name));
    }

    pub fn shapes(&self) -> &[String] {
        &self.shapes
    }

    /// Without a dictionary nothing can be checked, so every name passes.
    pub fn knows(&self, name: &str) -> bool {
        self.index.is_empty() || self.index.contains(name)
    }
}

#[derive(Debug, Default)]
pub struct EngineStore {
    pub trajectory: TrajectoryPlayback,
    pub overrides: EmotionWeights,
    pub lip_sync: LipSyncChannel,
    pub audio: AudioTiming,
    pub animation: AnimationPlayback,
    pub mesh: MeshState,
    pub shut_down: bool,
}

/// Everything the compositor reads in one frame.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    pub trajectory: TrajectoryPlayback,
    pub overrides: EmotionWeights,
    pub lip_sync: Option<EmotionWeights>,
    pub current: EmotionWeights,
    pub shapes: Vec<String>,
}

impl EngineStore {
    pub fn shared() -> SharedStore {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Write phase ahead of a frame: pin the trajectory start time. Only an
    /// audio start from the utterance currently sounding is trusted.
    pub fn prepare_frame(&mut self, now: Instant) {
        let audio_start = if self.audio.speaking {
            self.audio.started_at
        } else {
            None
        };
        self.trajectory.resolve_reference(now, audio_start);
    }

    pub fn snapshot(&self) -> FrameSnapshot {
        FrameSnapshot {
            trajectory: self.trajectory.clone(),
            overrides: self.overrides.clone(),
            lip_sync: self.lip_sync.active(self.audio.speaking).cloned(),
            current: self.mesh.weights.clone(),
            shapes: self.mesh.shapes().to_vec(),
        }
    }
}

/// Lock the store. A poisoned lock is recovered; the frame loop must keep going.
pub fn lock(store: &SharedStore) -> MutexGuard<'_, EngineStore> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
