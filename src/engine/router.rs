//! Applies validated inbound messages to the store and the scheduler.

use crate::animation::scheduler::AnimationScheduler;
use crate::expression::lip_sync::LipSyncConfig;
use crate::store::{lock, SharedStore};
use crate::transport::protocol::{ChatDirectives, InboundMessage, SuggestionUpdate};
use tracing::{debug, info};

#[derive(Clone)]
pub struct MessageRouter {
    store: SharedStore,
    scheduler: AnimationScheduler,
    lip_sync: LipSyncConfig,
}

impl MessageRouter {
    pub fn new(store: SharedStore, scheduler: AnimationScheduler, lip_sync: LipSyncConfig) -> Self {
        Self {
            store,
            scheduler,
            lip_sync,
        }
    }

    pub fn apply(&self, message: InboundMessage) {
        if lock(&self.store).shut_down {
            debug!("[Router] Dropping '{}' after shutdown", message.kind());
            return;
        }
        match message {
            InboundMessage::EmotionalTrajectory(trajectory) => {
                info!(
                    "[Router] New trajectory: {:.2}s, {} keyframes",
                    trajectory.duration(),
                    trajectory.keyframes().len()
                );
                self.scheduler.disarm();
                lock(&self.store).trajectory.start(trajectory);
            }
            InboundMessage::Viseme(weights) => {
                lock(&self.store).lip_sync.set_weights(weights);
            }
            InboundMessage::AudioLevel(amplitude) => {
                lock(&self.store)
                    .lip_sync
                    .set_amplitude(&self.lip_sync, amplitude);
            }
            InboundMessage::ChatMessage(directives) => self.apply_chat(directives),
        }
    }

    fn apply_chat(&self, directives: ChatDirectives) {
        if let Some(text) = &directives.text {
            debug!("[Router] Chat message ({} chars)", text.chars().count());
        }
        let has_sequence = directives
            .sequence
            .as_ref()
            .map_or(false, |sequence| !sequence.is_empty());

        if let Some(sequence) = directives.sequence {
            self.scheduler.load_sequence(sequence);
        }
        match directives.suggestion {
            SuggestionUpdate::Unchanged => {}
            SuggestionUpdate::Clear => {
                self.scheduler.set_suggestion(None);
            }
            SuggestionUpdate::Set(name) => {
                if has_sequence {
                    debug!(
                        "[Router] Sequence present, suggestion '{}' kept as fallback only",
                        name
                    );
                }
                self.scheduler.set_suggestion(Some(&name));
            }
        }
    }
}
