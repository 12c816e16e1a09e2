//! Animation Sequence Scheduler — plays body-animation keyframes in step
//! with the speech audio.
//!
//! Keyframe start times are proportions of the audio clip, which is only
//! known once playback starts. Arming activates keyframe 0 right away and
//! spawns one tokio task per later keyframe. Every task re-checks the arm
//! generation, the playback state and the speaking flag before switching, so
//! a trigger that fires after a disarm is a no-op.

use super::sequence::{
    trigger_offsets, ActiveAnimation, AnimationKeyframe, AnimationPlayback, ClipAction,
    LoopCounter, PlaybackState, Timeline,
};
use crate::store::{lock, EngineStore, SharedStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_IDLE_ANIMATION: &str = "Idle";

struct ScheduledTrigger {
    index: usize,
    handle: JoinHandle<()>,
}

/// Owns the trigger tasks of the current sequence. Cheap to clone; clones
/// share the same store and task list.
#[derive(Clone)]
pub struct AnimationScheduler {
    store: SharedStore,
    triggers: Arc<Mutex<Vec<ScheduledTrigger>>>,
    idle_animation: String,
}

impl AnimationScheduler {
    pub fn new(store: SharedStore, idle_animation: &str) -> Self {
        Self {
            store,
            triggers: Arc::new(Mutex::new(Vec::new())),
            idle_animation: idle_animation.to_string(),
        }
    }

    pub fn idle_animation(&self) -> &str {
        &self.idle_animation
    }

    // ── Collaborator data ─────────────────────────────────

    /// Clip names provided by the loaded model.
    pub fn set_known_animations<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut store = lock(&self.store);
        store.animation.known = names.into_iter().map(Into::into).collect();
        debug!(
            "[Scheduler] {} animation clips available",
            store.animation.known.len()
        );
    }

    /// Replace the sequence. Any running sequence is disarmed first; keyframes
    /// naming unknown clips are dropped. Returns how many keyframes were kept.
    pub fn load_sequence(&self, sequence: Vec<AnimationKeyframe>) -> usize {
        let mut store = lock(&self.store);
        self.disarm_locked(&mut store);

        let playback = &mut store.animation;
        let valid: Vec<AnimationKeyframe> = sequence
            .into_iter()
            .filter(|keyframe| {
                let known = playback.is_known(&keyframe.name);
                if !known {
                    warn!(
                        "[Scheduler] Skipping keyframe with unknown animation '{}'",
                        keyframe.name
                    );
                }
                known
            })
            .collect();
        info!("[Scheduler] Loaded sequence of {} keyframes", valid.len());
        playback.sequence = valid;
        playback.sequence.len()
    }

    /// Store the single suggested animation. `None` or an empty name clears
    /// it; an unknown name is ignored and the previous suggestion kept.
    pub fn set_suggestion(&self, name: Option<&str>) -> bool {
        let mut store = lock(&self.store);
        let playback = &mut store.animation;
        match name.map(str::trim).filter(|n| !n.is_empty()) {
            None => {
                playback.suggestion = None;
                true
            }
            Some(name) if playback.is_known(name) => {
                playback.suggestion = Some(name.to_string());
                true
            }
            Some(name) => {
                warn!("[Scheduler] Ignoring unknown suggested animation '{}'", name);
                false
            }
        }
    }

    // ── Playback control ──────────────────────────────────

    /// Arm on speech start. Triggers only fire while speech keeps sounding.
    pub fn arm(&self, audio_duration: Option<f32>) {
        self.arm_with(audio_duration, true);
    }

    /// Arm without tying triggers to the speaking flag (previews, manual play).
    pub fn play(&self, audio_duration: Option<f32>) {
        self.arm_with(audio_duration, false);
    }

    fn arm_with(&self, audio_duration: Option<f32>, speech_bound: bool) {
        let mut store = lock(&self.store);
        if store.shut_down {
            return;
        }
        self.cancel_triggers();

        let playback = &mut store.animation;
        playback.generation += 1;
        playback.loop_counter = None;
        playback.timeline = None;
        playback.cursor = None;

        if playback.sequence.is_empty() {
            playback.state = PlaybackState::Stopped;
            // The clip list may have changed since the suggestion was stored.
            let suggestion = playback
                .suggestion
                .clone()
                .filter(|name| playback.is_known(name));
            let name = suggestion.or_else(|| {
                playback
                    .is_known(&self.idle_animation)
                    .then(|| self.idle_animation.clone())
            });
            match name {
                Some(name) => {
                    info!("[Scheduler] No sequence, playing '{}'", name);
                    playback.current = Some(ActiveAnimation::single(&name));
                }
                None => warn!("[Scheduler] No sequence and no playable fallback, keeping pose"),
            }
            return;
        }

        playback.state = PlaybackState::Playing;
        if let Some(first) = playback.activate(0) {
            info!("[Scheduler] Keyframe 0 → '{}'", first.name);
        }

        let duration = match audio_duration {
            Some(d) if d.is_finite() && d > 0.0 => d,
            _ => {
                info!("[Scheduler] Audio duration unknown, holding the first keyframe");
                return;
            }
        };
        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("[Scheduler] No async runtime, holding the first keyframe");
                return;
            }
        };

        let timeline = Timeline {
            armed_at: Instant::now(),
            audio_duration: duration,
            paused_elapsed: None,
            speech_bound,
        };
        playback.timeline = Some(timeline);
        let offsets = trigger_offsets(&playback.sequence, duration);
        self.schedule(&runtime, playback.generation, timeline.armed_at, offsets);
    }

    /// Cancel every pending trigger and fall back to Idle. Keeps the sequence
    /// so the next utterance can replay it.
    pub fn disarm(&self) {
        let mut store = lock(&self.store);
        self.disarm_locked(&mut store);
    }

    /// Disarm and forget the sequence.
    pub fn stop(&self) {
        let mut store = lock(&self.store);
        self.disarm_locked(&mut store);
        store.animation.sequence.clear();
        info!("[Scheduler] Sequence stopped and cleared");
    }

    /// Freeze the sequence clock. Returns false unless a sequence was playing.
    pub fn pause(&self) -> bool {
        let mut store = lock(&self.store);
        let playback = &mut store.animation;
        if playback.state != PlaybackState::Playing {
            return false;
        }
        self.cancel_triggers();
        playback.generation += 1;
        playback.state = PlaybackState::Paused;
        if let Some(timeline) = playback.timeline.as_mut() {
            timeline.paused_elapsed = Some(timeline.armed_at.elapsed());
        }
        info!("[Scheduler] Paused at keyframe {:?}", playback.cursor);
        true
    }

    /// Continue a paused sequence where it left off.
    pub fn resume(&self) -> bool {
        let mut store = lock(&self.store);
        if store.shut_down {
            return false;
        }
        let playback = &mut store.animation;
        if playback.state != PlaybackState::Paused {
            return false;
        }
        playback.generation += 1;
        playback.state = PlaybackState::Playing;
        info!("[Scheduler] Resumed at keyframe {:?}", playback.cursor);

        let Some(timeline) = playback.timeline.as_mut() else {
            return true;
        };
        let elapsed = timeline.paused_elapsed.take().unwrap_or_default();
        let now = Instant::now();
        timeline.armed_at = now.checked_sub(elapsed).unwrap_or(now);
        let armed_at = timeline.armed_at;
        let duration = timeline.audio_duration;

        let cursor = playback.cursor.unwrap_or(0);
        let remaining: Vec<(usize, Duration)> = trigger_offsets(&playback.sequence, duration)
            .into_iter()
            .filter(|(index, _)| *index > cursor)
            .collect();
        match Handle::try_current() {
            Ok(runtime) => self.schedule(&runtime, playback.generation, armed_at, remaining),
            Err(_) => warn!("[Scheduler] No async runtime, holding the current keyframe"),
        }
        true
    }

    /// The renderer finished one iteration of the active clip.
    pub fn clip_finished(&self) -> ClipAction {
        let mut store = lock(&self.store);
        let playback = &mut store.animation;
        if playback.state != PlaybackState::Playing {
            return ClipAction::Hold;
        }
        let repeat = playback
            .loop_counter
            .as_mut()
            .map(LoopCounter::register_iteration);
        match repeat {
            Some(true) => ClipAction::Repeat,
            Some(false) => {
                debug!("[Scheduler] Loop budget spent, holding");
                if let Some(current) = playback.current.as_mut() {
                    current.looping = false;
                }
                ClipAction::Hold
            }
            None => ClipAction::Hold,
        }
    }

    /// Manually select an animation, e.g. from a UI button.
    pub fn set_current_animation(&self, name: &str) -> bool {
        let mut store = lock(&self.store);
        if !store.animation.is_known(name) {
            warn!("[Scheduler] Ignoring unknown animation '{}'", name);
            return false;
        }
        store.animation.current = Some(ActiveAnimation::single(name));
        true
    }

    pub fn current_animation(&self) -> Option<ActiveAnimation> {
        lock(&self.store).animation.current.clone()
    }

    pub fn state(&self) -> PlaybackState {
        lock(&self.store).animation.state
    }

    pub fn cursor(&self) -> Option<usize> {
        lock(&self.store).animation.cursor
    }

    /// Trigger tasks that have not run yet.
    pub fn pending_triggers(&self) -> usize {
        lock_triggers(&self.triggers)
            .iter()
            .filter(|trigger| !trigger.handle.is_finished())
            .count()
    }

    /// Cancel everything. Called on engine teardown.
    pub fn shutdown(&self) {
        let mut store = lock(&self.store);
        let cancelled = self.cancel_triggers();
        store.animation.generation += 1;
        store.animation.state = PlaybackState::Stopped;
        store.animation.cursor = None;
        store.animation.timeline = None;
        debug!("[Scheduler] Shut down, {} triggers cancelled", cancelled);
    }

    // ── Internals ─────────────────────────────────────────

    fn disarm_locked(&self, store: &mut EngineStore) {
        let cancelled = self.cancel_triggers();
        let playback = &mut store.animation;
        let was_playing = playback.state != PlaybackState::Stopped;

        playback.generation += 1;
        playback.state = PlaybackState::Stopped;
        playback.cursor = None;
        playback.loop_counter = None;
        playback.timeline = None;

        if playback.is_known(&self.idle_animation) {
            playback.current = Some(ActiveAnimation::single(&self.idle_animation));
        }
        if was_playing || cancelled > 0 {
            info!(
                "[Scheduler] Disarmed ({} pending triggers cancelled)",
                cancelled
            );
        }
    }

    /// Abort and forget every trigger task. Callers hold the store lock.
    fn cancel_triggers(&self) -> usize {
        let mut triggers = lock_triggers(&self.triggers);
        let mut cancelled = 0;
        for trigger in triggers.drain(..) {
            if !trigger.handle.is_finished() {
                debug!("[Scheduler] Cancelling trigger for keyframe {}", trigger.index);
                cancelled += 1;
            }
            trigger.handle.abort();
        }
        cancelled
    }

    /// Spawn one trigger per `(index, offset)`. Callers hold the store lock.
    fn schedule(
        &self,
        runtime: &Handle,
        generation: u64,
        armed_at: Instant,
        offsets: Vec<(usize, Duration)>,
    ) {
        let mut triggers = lock_triggers(&self.triggers);
        for (index, offset) in offsets {
            let Some(deadline) = armed_at.checked_add(offset) else {
                warn!(
                    "[Scheduler] Keyframe {} lies beyond the clock range, not scheduled",
                    index
                );
                continue;
            };
            let store = Arc::clone(&self.store);
            debug!(
                "[Scheduler] Keyframe {} scheduled at +{}ms",
                index,
                offset.as_millis()
            );
            let handle = runtime.spawn(async move {
                tokio::time::sleep_until(deadline).await;
                fire_trigger(&store, generation, index);
            });
            triggers.push(ScheduledTrigger { index, handle });
        }
    }
}

fn lock_triggers(
    triggers: &Mutex<Vec<ScheduledTrigger>>,
) -> std::sync::MutexGuard<'_, Vec<ScheduledTrigger>> {
    triggers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Body of a trigger task. Abort is not guaranteed to beat an expired timer,
/// so every condition is checked again here.
fn fire_trigger(store: &SharedStore, generation: u64, index: usize) {
    let mut store = lock(store);
    if store.shut_down {
        return;
    }
    let speaking = store.audio.speaking;
    let playback: &mut AnimationPlayback = &mut store.animation;

    if playback.generation != generation || playback.state != PlaybackState::Playing {
        debug!("[Scheduler] Stale trigger for keyframe {} ignored", index);
        return;
    }
    if playback.timeline.map_or(false, |t| t.speech_bound) && !speaking {
        debug!("[Scheduler] Speech ended, trigger for keyframe {} ignored", index);
        return;
    }
    if playback.cursor.map_or(false, |cursor| index <= cursor) {
        return;
    }
    if let Some(active) = playback.activate(index) {
        info!("[Scheduler] Keyframe {} → '{}'", index, active.name);
    }
}
