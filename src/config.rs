//! Engine configuration and the shared helpers for loading/saving JSON
//! config files.

use crate::animation::scheduler::DEFAULT_IDLE_ANIMATION;
use crate::expression::compositor::{
    DEFAULT_OVERRIDE_EPSILON, DEFAULT_SMOOTHING_RATE, DEFAULT_SNAP_EPSILON,
};
use crate::expression::lip_sync::LipSyncConfig;
use crate::expression::table::EmotionWeights;
use crate::transport::coalescer::CoalescerConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CONFIG_FILE: &str = "avatar_engine.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Damping rate K of the per-frame approach toward target weights.
    #[serde(default = "default_smoothing_rate")]
    pub smoothing_rate: f32,
    /// Below this distance a weight snaps to its target.
    #[serde(default = "default_snap_epsilon")]
    pub snap_epsilon: f32,
    /// Manual overrides count only if some weight exceeds this.
    #[serde(default = "default_override_epsilon")]
    pub override_epsilon: f32,
    /// Clip selected whenever a sequence is disarmed.
    #[serde(default = "default_idle_animation")]
    pub idle_animation: String,
    #[serde(default)]
    pub coalescer: CoalescerConfig,
    #[serde(default)]
    pub lip_sync: LipSyncConfig,
    /// Extra or replacement emotion table entries.
    #[serde(default)]
    pub expressions: HashMap<String, EmotionWeights>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            smoothing_rate: default_smoothing_rate(),
            snap_epsilon: default_snap_epsilon(),
            override_epsilon: default_override_epsilon(),
            idle_animation: default_idle_animation(),
            coalescer: CoalescerConfig::default(),
            lip_sync: LipSyncConfig::default(),
            expressions: HashMap::new(),
        }
    }
}

fn default_smoothing_rate() -> f32 {
    DEFAULT_SMOOTHING_RATE
}
fn default_snap_epsilon() -> f32 {
    DEFAULT_SNAP_EPSILON
}
fn default_override_epsilon() -> f32 {
    DEFAULT_OVERRIDE_EPSILON
}
fn default_idle_animation() -> String {
    DEFAULT_IDLE_ANIMATION.to_string()
}

/// `{data_dir}/com.chyin.kokoro/avatar_engine.json`
pub fn default_config_path() -> PathBuf {
    dirs_next::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("com.chyin.kokoro")
        .join(CONFIG_FILE)
}

pub fn load_config(path: &Path) -> EngineConfig {
    load_json_config(path, "Engine")
}

pub fn save_config(path: &Path, config: &EngineConfig) -> Result<(), String> {
    save_json_config(path, config, "Engine")
}

/// Read a JSON config of any `Default` type. A missing file is normal on
/// first launch; an unreadable or unparsable one is reported and replaced by
/// defaults so the engine still starts.
pub fn load_json_config<T: DeserializeOwned + Default>(path: &Path, label: &str) -> T {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("[{}] {} not found, using defaults", label, path.display());
            return T::default();
        }
        Err(e) => {
            warn!("[{}] Cannot read {}: {}, using defaults", label, path.display(), e);
            return T::default();
        }
    };
    serde_json::from_str(&content).unwrap_or_else(|e| {
        warn!(
            "[{}] {} is not valid ({}), using defaults",
            label,
            path.display(),
            e
        );
        T::default()
    })
}

/// Write `config` as pretty JSON. The file is written next to the target and
/// renamed over it, so a crash mid-write leaves the previous config intact.
pub fn save_json_config<T: Serialize>(path: &Path, config: &T, label: &str) -> Result<(), String> {
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| format!("[{}] cannot serialize config: {}", label, e))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("[{}] cannot create {}: {}", label, parent.display(), e))?;
    }
    let staging = staging_path(path);
    std::fs::write(&staging, json)
        .map_err(|e| format!("[{}] cannot write {}: {}", label, staging.display(), e))?;
    std::fs::rename(&staging, path)
        .map_err(|e| format!("[{}] cannot replace {}: {}", label, path.display(), e))?;
    info!("[{}] Saved {}", label, path.display());
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
