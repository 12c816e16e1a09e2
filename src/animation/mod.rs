pub mod scheduler;
pub mod sequence;

pub use scheduler::{AnimationScheduler, DEFAULT_IDLE_ANIMATION};
pub use sequence::{
    ActiveAnimation, AnimationKeyframe, AnimationPlayback, ClipAction, LoopCounter, PlaybackState,
};
