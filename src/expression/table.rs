//! Emotion Weight Table — maps an emotion tag to facial shape weights.
//!
//! Shape names follow the ARKit blendshape vocabulary shipped by most VRM and
//! glTF avatars. The built-in table covers the emotions the chat backend can
//! emit; extra entries (or replacements) can be merged in from config.

use std::collections::HashMap;
use tracing::warn;

/// Shape name → blend weight. Usually in [0, 1], some rigs accept [-2, 2].
pub type EmotionWeights = HashMap<String, f32>;

/// Tag of the rest expression. Also the fallback for unknown tags.
pub const NEUTRAL: &str = "neutral";

#[derive(Debug, Clone)]
pub struct EmotionWeightTable {
    entries: HashMap<String, EmotionWeights>,
}

fn weights(pairs: &[(&str, f32)]) -> EmotionWeights {
    pairs
        .iter()
        .map(|(name, weight)| (name.to_string(), *weight))
        .collect()
}

impl Default for EmotionWeightTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl EmotionWeightTable {
    /// A table containing only the (empty) neutral pose.
    pub fn empty() -> Self {
        let mut entries = HashMap::new();
        entries.insert(NEUTRAL.to_string(), EmotionWeights::new());
        Self { entries }
    }

    /// The stock expression set.
    pub fn builtin() -> Self {
        let mut table = Self::empty();

        table.insert(
            "happy",
            weights(&[
                ("mouthSmileLeft", 0.8),
                ("mouthSmileRight", 0.8),
                ("cheekSquintLeft", 0.4),
                ("cheekSquintRight", 0.4),
                ("eyeSquintLeft", 0.3),
                ("eyeSquintRight", 0.3),
            ]),
        );
        table.insert(
            "excited",
            weights(&[
                ("mouthSmileLeft", 1.0),
                ("mouthSmileRight", 1.0),
                ("browInnerUp", 0.5),
                ("eyeWideLeft", 0.6),
                ("eyeWideRight", 0.6),
                ("jawOpen", 0.2),
            ]),
        );
        table.insert(
            "sad",
            weights(&[
                ("mouthFrownLeft", 0.7),
                ("mouthFrownRight", 0.7),
                ("browInnerUp", 0.8),
                ("eyeSquintLeft", 0.2),
                ("eyeSquintRight", 0.2),
            ]),
        );
        table.insert(
            "angry",
            weights(&[
                ("browDownLeft", 0.9),
                ("browDownRight", 0.9),
                ("mouthFrownLeft", 0.4),
                ("mouthFrownRight", 0.4),
                ("noseSneerLeft", 0.5),
                ("noseSneerRight", 0.5),
                ("eyeSquintLeft", 0.4),
                ("eyeSquintRight", 0.4),
            ]),
        );
        table.insert(
            "surprised",
            weights(&[
                ("browInnerUp", 1.0),
                ("browOuterUpLeft", 0.8),
                ("browOuterUpRight", 0.8),
                ("eyeWideLeft", 0.9),
                ("eyeWideRight", 0.9),
                ("jawOpen", 0.4),
            ]),
        );
        table.insert(
            "thinking",
            weights(&[
                ("browDownLeft", 0.3),
                ("browOuterUpRight", 0.4),
                ("mouthPucker", 0.3),
                ("eyeLookUpLeft", 0.3),
                ("eyeLookUpRight", 0.3),
            ]),
        );
        table.insert(
            "shy",
            weights(&[
                ("mouthSmileLeft", 0.3),
                ("mouthSmileRight", 0.3),
                ("eyeLookDownLeft", 0.5),
                ("eyeLookDownRight", 0.5),
                ("cheekSquintLeft", 0.2),
                ("cheekSquintRight", 0.2),
            ]),
        );
        table.insert(
            "smug",
            weights(&[
                ("mouthSmileLeft", 0.6),
                ("mouthSmileRight", 0.2),
                ("eyeSquintLeft", 0.5),
                ("eyeSquintRight", 0.5),
                ("browOuterUpLeft", 0.3),
            ]),
        );
        table.insert(
            "worried",
            weights(&[
                ("browInnerUp", 0.7),
                ("mouthFrownLeft", 0.3),
                ("mouthFrownRight", 0.3),
                ("mouthStretchLeft", 0.2),
                ("mouthStretchRight", 0.2),
            ]),
        );

        table
    }

    /// Add or replace an entry. Tags are case-insensitive.
    pub fn insert(&mut self, tag: &str, weights: EmotionWeights) {
        self.entries.insert(normalize_tag(tag), weights);
    }

    /// Merge extra entries over the current ones.
    pub fn merge(&mut self, extra: &HashMap<String, EmotionWeights>) {
        for (tag, weights) in extra {
            self.insert(tag, weights.clone());
        }
    }

    pub fn get(&self, tag: &str) -> Option<&EmotionWeights> {
        self.entries
            .get(tag)
            .or_else(|| self.entries.get(&normalize_tag(tag)))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.get(tag).is_some()
    }

    pub fn neutral(&self) -> EmotionWeights {
        self.entries.get(NEUTRAL).cloned().unwrap_or_default()
    }

    /// Weights for `tag`, falling back to neutral when the tag is unknown.
    pub fn weights_for(&self, tag: &str) -> EmotionWeights {
        match self.get(tag) {
            Some(weights) => weights.clone(),
            None => {
                warn!("[Expression] Unknown emotion tag '{}', using neutral", tag);
                self.neutral()
            }
        }
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}
