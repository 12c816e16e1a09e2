//! Inbound message protocol — JSON frames pushed by the chat backend.
//!
//! Every frame is `{ "type": ..., "payload": ... }`. Frames are fully
//! validated before anything is applied, so a malformed frame never leaves
//! partial state behind.

use crate::animation::sequence::AnimationKeyframe;
use crate::expression::table::EmotionWeights;
use crate::expression::trajectory::{Trajectory, TrajectoryError, TrajectoryKeyframe};
use serde::{Deserialize, Deserializer};

pub const EMOTIONAL_TRAJECTORY: &str = "emotionalTrajectory";
pub const VISEME: &str = "viseme";
pub const AUDIO_LEVEL: &str = "audioLevel";
pub const CHAT_MESSAGE: &str = "chatMessage";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid trajectory: {0}")]
    InvalidTrajectory(#[from] TrajectoryError),
    #[error("invalid weight for shape '{0}'")]
    InvalidWeight(String),
    #[error("invalid audio level {0}")]
    InvalidAmplitude(f32),
    #[error("invalid proportion for animation '{0}'")]
    InvalidProportion(String),
}

// ── Wire format ────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "payload")]
enum WireMessage {
    #[serde(rename = "emotionalTrajectory")]
    EmotionalTrajectory(TrajectoryPayload),
    #[serde(rename = "viseme")]
    Viseme(VisemePayload),
    #[serde(rename = "audioLevel")]
    AudioLevel(AudioLevelPayload),
    #[serde(rename = "chatMessage")]
    ChatMessage(ChatPayload),
}

#[derive(Debug, Deserialize)]
struct TrajectoryPayload {
    duration: f32,
    keyframes: Vec<TrajectoryKeyframe>,
}

#[derive(Debug, Deserialize)]
struct VisemePayload {
    weights: EmotionWeights,
}

#[derive(Debug, Deserialize)]
struct AudioLevelPayload {
    amplitude: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatPayload {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    body_animation_sequence: Option<Vec<AnimationKeyframe>>,
    /// Absent → `None`, explicit `null` → `Some(None)`.
    #[serde(default, deserialize_with = "present")]
    body_animation_name: Option<Option<String>>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

// ── Domain messages ────────────────────────────────────

/// What a chat message says about the single suggested animation.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SuggestionUpdate {
    #[default]
    Unchanged,
    Clear,
    Set(String),
}

/// Animation directives carried by a chat message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatDirectives {
    /// Reply text. The engine only logs it; hosts that route chat frames
    /// themselves can read it from here.
    pub text: Option<String>,
    /// `Some(vec![])` clears the stored sequence; `None` leaves it alone.
    pub sequence: Option<Vec<AnimationKeyframe>>,
    pub suggestion: SuggestionUpdate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    EmotionalTrajectory(Trajectory),
    Viseme(EmotionWeights),
    AudioLevel(f32),
    ChatMessage(ChatDirectives),
}

impl InboundMessage {
    /// Wire `type` of the message; also the coalescing key.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmotionalTrajectory(_) => EMOTIONAL_TRAJECTORY,
            Self::Viseme(_) => VISEME,
            Self::AudioLevel(_) => AUDIO_LEVEL,
            Self::ChatMessage(_) => CHAT_MESSAGE,
        }
    }
}

impl WireMessage {
    fn validate(self) -> Result<InboundMessage, ProtocolError> {
        match self {
            WireMessage::EmotionalTrajectory(p) => Ok(InboundMessage::EmotionalTrajectory(
                Trajectory::new(p.duration, p.keyframes)?,
            )),
            WireMessage::Viseme(p) => {
                if let Some((name, _)) = p.weights.iter().find(|(_, w)| !w.is_finite()) {
                    return Err(ProtocolError::InvalidWeight(name.clone()));
                }
                Ok(InboundMessage::Viseme(p.weights))
            }
            WireMessage::AudioLevel(p) => {
                if !p.amplitude.is_finite() {
                    return Err(ProtocolError::InvalidAmplitude(p.amplitude));
                }
                Ok(InboundMessage::AudioLevel(p.amplitude))
            }
            WireMessage::ChatMessage(p) => {
                if let Some(sequence) = &p.body_animation_sequence {
                    if let Some(bad) = sequence.iter().find(|k| !k.proportion.is_finite()) {
                        return Err(ProtocolError::InvalidProportion(bad.name.clone()));
                    }
                }
                let suggestion = match p.body_animation_name {
                    None => SuggestionUpdate::Unchanged,
                    Some(None) => SuggestionUpdate::Clear,
                    Some(Some(name)) if name.trim().is_empty() => SuggestionUpdate::Clear,
                    Some(Some(name)) => SuggestionUpdate::Set(name.trim().to_string()),
                };
                Ok(InboundMessage::ChatMessage(ChatDirectives {
                    text: p.text,
                    sequence: p.body_animation_sequence,
                    suggestion,
                }))
            }
        }
    }
}

/// Parse and validate one transport frame.
pub fn parse_message(raw: &str) -> Result<InboundMessage, ProtocolError> {
    let wire: WireMessage = serde_json::from_str(raw)?;
    wire.validate()
}

/// Same as [`parse_message`] for transports that already decoded the JSON.
pub fn parse_value(value: serde_json::Value) -> Result<InboundMessage, ProtocolError> {
    let wire: WireMessage = serde_json::from_value(value)?;
    wire.validate()
}
