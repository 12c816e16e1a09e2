//! Avatar Engine — the surface the renderer, the UI and the transport talk to.
//!
//! Owns the store, the scheduler, the coalescer and the compositor. The
//! renderer calls [`AvatarEngine::tick`] once per frame; the transport feeds
//! raw frames to [`AvatarEngine::handle_transport_message`]; the audio layer
//! reports [`AvatarEngine::speech_started`] / [`AvatarEngine::speech_stopped`].

pub mod router;

#[cfg(test)]
mod tests;

use crate::animation::scheduler::AnimationScheduler;
use crate::animation::sequence::{ActiveAnimation, AnimationKeyframe, ClipAction, PlaybackState};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::expression::compositor::WeightCompositor;
use crate::expression::table::{EmotionWeightTable, EmotionWeights};
use crate::store::{lock, EngineStore, SharedStore};
use crate::transport::coalescer::{Emitter, MessageCoalescer};
use crate::transport::protocol::{parse_message, InboundMessage};
use router::MessageRouter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Audio timing reported when speech playback begins.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpeechCue {
    /// Clip length in seconds, if the player knows it yet.
    pub duration_secs: Option<f32>,
    /// When the audio actually started sounding. Defaults to now.
    pub started_at: Option<Instant>,
}

impl SpeechCue {
    pub fn with_duration(duration_secs: f32) -> Self {
        Self {
            duration_secs: Some(duration_secs),
            started_at: None,
        }
    }
}

pub struct AvatarEngine {
    config: EngineConfig,
    table: Arc<EmotionWeightTable>,
    store: SharedStore,
    scheduler: AnimationScheduler,
    router: MessageRouter,
    coalescer: MessageCoalescer<InboundMessage>,
    compositor: WeightCompositor,
}

impl AvatarEngine {
    pub fn new(config: EngineConfig) -> Self {
        let mut table = EmotionWeightTable::builtin();
        table.merge(&config.expressions);
        Self::with_table(config, table)
    }

    pub fn with_table(config: EngineConfig, table: EmotionWeightTable) -> Self {
        let store = EngineStore::shared();
        let scheduler = AnimationScheduler::new(Arc::clone(&store), &config.idle_animation);
        let router = MessageRouter::new(
            Arc::clone(&store),
            scheduler.clone(),
            config.lip_sync.clone(),
        );

        let sink = router.clone();
        let emit: Emitter<InboundMessage> =
            Arc::new(move |_kind: &str, message: InboundMessage| sink.apply(message));
        let coalescer = MessageCoalescer::new(&config.coalescer, emit);

        let compositor = WeightCompositor::new(
            config.smoothing_rate,
            config.snap_epsilon,
            config.override_epsilon,
        );

        info!("[Engine] Initialised with idle animation '{}'", config.idle_animation);
        Self {
            config,
            table: Arc::new(table),
            store,
            scheduler,
            router,
            coalescer,
            compositor,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn table(&self) -> &EmotionWeightTable {
        &self.table
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    // ── Transport ─────────────────────────────────────────

    /// Parse one raw frame and dispatch it. Malformed frames are logged and
    /// dropped without touching any state.
    pub fn handle_transport_message(&self, raw: &str) -> Result<(), EngineError> {
        match parse_message(raw) {
            Ok(message) => {
                self.dispatch(message);
                Ok(())
            }
            Err(e) => {
                warn!("[Engine] Dropping inbound message: {}", e);
                Err(e.into())
            }
        }
    }

    /// Route a validated message, through the coalescer for high-frequency types.
    pub fn dispatch(&self, message: InboundMessage) {
        let kind = message.kind();
        if self.config.coalescer.is_coalesced(kind) {
            self.coalescer.push(kind, message);
        } else {
            self.router.apply(message);
        }
    }

    // ── Frame ─────────────────────────────────────────────

    /// Advance one rendered frame and return the weights to apply to the mesh.
    pub fn tick(&self, frame_delta: Duration) -> EmotionWeights {
        self.tick_at(Instant::now(), frame_delta)
    }

    pub fn tick_at(&self, now: Instant, frame_delta: Duration) -> EmotionWeights {
        let (snapshot, targets, completed) = {
            let mut store = lock(&self.store);
            if store.shut_down {
                return store.mesh.weights.clone();
            }
            store.prepare_frame(now);
            let snapshot = store.snapshot();
            drop(store);

            let sample = snapshot.trajectory.evaluate(&self.table, now);
            let targets = self.compositor.compose(
                &snapshot.overrides,
                sample.weights,
                snapshot.lip_sync.as_ref(),
            );
            (snapshot, targets, sample.completed)
        };

        let weights = self.compositor.smooth(
            &snapshot.current,
            &targets,
            &snapshot.shapes,
            frame_delta.as_secs_f32(),
        );

        let mut store = lock(&self.store);
        if completed {
            store.trajectory.mark_completed(snapshot.trajectory.epoch());
        }
        store.mesh.weights = weights.clone();
        weights
    }

    /// Unsmoothed composite for `now`: what the mesh is heading toward.
    pub fn target_weights_at(&self, now: Instant) -> EmotionWeights {
        let snapshot = {
            let mut store = lock(&self.store);
            store.prepare_frame(now);
            store.snapshot()
        };
        let sample = snapshot.trajectory.evaluate(&self.table, now);
        self.compositor
            .compose(&snapshot.overrides, sample.weights, snapshot.lip_sync.as_ref())
    }

    /// Weights applied by the last frame.
    pub fn composite_weights(&self) -> EmotionWeights {
        lock(&self.store).mesh.weights.clone()
    }

    pub fn clear_trajectory(&self) {
        lock(&self.store).trajectory.clear();
    }

    // ── Mesh & clips ──────────────────────────────────────

    /// Shape names of the loaded mesh. Shapes outside it are never driven.
    pub fn set_shape_dictionary<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut store = lock(&self.store);
        store.mesh.set_dictionary(names);
        let mesh = &store.mesh;
        let unknown: Vec<String> = store
            .overrides
            .keys()
            .filter(|name| !mesh.knows(name))
            .cloned()
            .collect();
        for name in unknown {
            debug!("[Engine] Dropping override for '{}', not on this mesh", name);
            store.overrides.remove(&name);
        }
        info!("[Engine] Mesh exposes {} shapes", store.mesh.shapes().len());
    }

    pub fn set_known_animations<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scheduler.set_known_animations(names);
    }

    // ── Manual overrides ──────────────────────────────────

    pub fn set_override(&self, shape: &str, weight: f32) -> Result<(), EngineError> {
        let mut store = lock(&self.store);
        check_override(&store, shape, weight)?;
        store.overrides.insert(shape.to_string(), weight);
        Ok(())
    }

    /// Replace the whole override map. Nothing is applied if any entry is invalid.
    pub fn set_overrides(&self, overrides: EmotionWeights) -> Result<(), EngineError> {
        let mut store = lock(&self.store);
        for (shape, weight) in &overrides {
            check_override(&store, shape, *weight)?;
        }
        store.overrides = overrides;
        Ok(())
    }

    /// Load an emotion preset as the override map.
    pub fn apply_preset(&self, tag: &str) -> Result<(), EngineError> {
        let weights = self
            .table
            .get(tag)
            .cloned()
            .ok_or_else(|| EngineError::UnknownEmotion(tag.to_string()))?;
        let mut store = lock(&self.store);
        let mesh = &store.mesh;
        let weights: EmotionWeights = weights
            .into_iter()
            .filter(|(name, _)| mesh.knows(name))
            .collect();
        info!("[Engine] Applied preset '{}'", tag);
        store.overrides = weights;
        Ok(())
    }

    pub fn clear_overrides(&self) {
        lock(&self.store).overrides.clear();
    }

    pub fn overrides(&self) -> EmotionWeights {
        lock(&self.store).overrides.clone()
    }

    // ── Lip-sync source ───────────────────────────────────

    /// Viseme frame from a local analyser (bypasses the transport).
    pub fn set_lip_sync(&self, weights: EmotionWeights) {
        lock(&self.store).lip_sync.set_weights(weights);
    }

    pub fn set_audio_level(&self, amplitude: f32) {
        lock(&self.store)
            .lip_sync
            .set_amplitude(&self.config.lip_sync, amplitude);
    }

    pub fn clear_lip_sync(&self) {
        lock(&self.store).lip_sync.clear();
    }

    // ── Audio timing ──────────────────────────────────────

    pub fn speech_started(&self, cue: SpeechCue) {
        {
            let mut store = lock(&self.store);
            if store.shut_down {
                return;
            }
            store.audio.speaking = true;
            store.audio.duration_secs = cue.duration_secs;
            store.audio.started_at = Some(cue.started_at.unwrap_or_else(Instant::now));
        }
        info!("[Engine] Speech started (duration {:?}s)", cue.duration_secs);
        self.scheduler.arm(cue.duration_secs);
    }

    /// Stale lip-sync values stay in the channel; the speaking flag gates them.
    pub fn speech_stopped(&self) {
        {
            let mut store = lock(&self.store);
            store.audio.speaking = false;
            store.audio.started_at = None;
            store.audio.duration_secs = None;
        }
        info!("[Engine] Speech stopped");
        self.scheduler.disarm();
    }

    pub fn is_speaking(&self) -> bool {
        lock(&self.store).audio.speaking
    }

    // ── Body animation ────────────────────────────────────

    pub fn current_animation(&self) -> Option<ActiveAnimation> {
        self.scheduler.current_animation()
    }

    pub fn set_current_animation(&self, name: &str) -> Result<(), EngineError> {
        if self.scheduler.set_current_animation(name) {
            Ok(())
        } else {
            Err(EngineError::UnknownAnimation(name.to_string()))
        }
    }

    /// Load and start a sequence directly, independent of speech.
    pub fn play_sequence(&self, sequence: Vec<AnimationKeyframe>, duration_secs: Option<f32>) {
        self.scheduler.load_sequence(sequence);
        self.scheduler.play(duration_secs);
    }

    pub fn stop_sequence(&self) {
        self.scheduler.stop();
    }

    pub fn pause_sequence(&self) -> bool {
        self.scheduler.pause()
    }

    pub fn resume_sequence(&self) -> bool {
        self.scheduler.resume()
    }

    /// The renderer finished one iteration of the active clip.
    pub fn clip_finished(&self) -> ClipAction {
        self.scheduler.clip_finished()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.scheduler.state()
    }

    pub fn sequence_cursor(&self) -> Option<usize> {
        self.scheduler.cursor()
    }

    pub fn pending_triggers(&self) -> usize {
        self.scheduler.pending_triggers()
    }

    // ── Teardown ──────────────────────────────────────────

    /// Cancel every timer and freeze the store. Later calls are no-ops.
    pub fn shutdown(&self) {
        {
            let mut store = lock(&self.store);
            if store.shut_down {
                return;
            }
            // Timers that already woke check this flag before touching state.
            store.shut_down = true;
        }
        self.coalescer.cancel_all();
        self.scheduler.shutdown();
        info!("[Engine] Shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.store).shut_down
    }
}

impl Drop for AvatarEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn check_override(store: &EngineStore, shape: &str, weight: f32) -> Result<(), EngineError> {
    if store.shut_down {
        return Err(EngineError::ShutDown);
    }
    if !store.mesh.knows(shape) {
        return Err(EngineError::UnknownShape(shape.to_string()));
    }
    if !weight.is_finite() {
        return Err(EngineError::InvalidWeight {
            shape: shape.to_string(),
            weight,
        });
    }
    Ok(())
}
