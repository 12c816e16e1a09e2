//! Facial-expression and body-animation synchronization for a live virtual
//! character.
//!
//! The chat backend pushes emotional trajectories, viseme frames and
//! animation directives; the audio layer reports when speech starts and
//! stops; the renderer pulls blendshape weights once per frame through
//! [`AvatarEngine::tick`].

pub mod animation;
pub mod config;
pub mod engine;
pub mod error;
pub mod expression;
pub mod store;
pub mod transport;
pub mod utils;

pub use config::EngineConfig;
pub use engine::{AvatarEngine, SpeechCue};
pub use error::EngineError;
pub use expression::table::{EmotionWeightTable, EmotionWeights};
