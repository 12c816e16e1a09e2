//! High-Frequency Message Coalescer.
//!
//! Sits between the transport and the engine. Per message type, at most one
//! payload is forwarded per window: the first message of a burst goes out
//! immediately, later ones overwrite each other, and a trailing timer
//! forwards the latest value when the window closes. The newest payload of a
//! burst is never dropped.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoalescerConfig {
    /// Window for viseme-class types (milliseconds).
    #[serde(default = "default_viseme_window_ms")]
    pub viseme_window_ms: u64,
    /// Window for every other coalesced type (milliseconds).
    #[serde(default = "default_window_ms")]
    pub default_window_ms: u64,
    /// Types that get the shorter viseme window.
    #[serde(default = "default_viseme_types")]
    pub viseme_types: Vec<String>,
    /// Types routed through the coalescer. Everything else is applied directly.
    #[serde(default = "default_coalesced_types")]
    pub coalesced_types: Vec<String>,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            viseme_window_ms: default_viseme_window_ms(),
            default_window_ms: default_window_ms(),
            viseme_types: default_viseme_types(),
            coalesced_types: default_coalesced_types(),
        }
    }
}

fn default_viseme_window_ms() -> u64 {
    30
}
fn default_window_ms() -> u64 {
    50
}
fn default_viseme_types() -> Vec<String> {
    vec!["viseme".to_string()]
}
fn default_coalesced_types() -> Vec<String> {
    vec!["viseme".to_string(), "audioLevel".to_string()]
}

impl CoalescerConfig {
    pub fn is_coalesced(&self, kind: &str) -> bool {
        self.coalesced_types.iter().any(|t| t == kind)
    }
}

/// Receives forwarded payloads together with their message type.
pub type Emitter<T> = Arc<dyn Fn(&str, T) + Send + Sync>;

struct CoalescerEntry<T> {
    pending: Option<JoinHandle<()>>,
    last_payload: Option<T>,
    last_emitted: Option<T>,
    last_emit: Option<Instant>,
}

impl<T> Default for CoalescerEntry<T> {
    fn default() -> Self {
        Self {
            pending: None,
            last_payload: None,
            last_emitted: None,
            last_emit: None,
        }
    }
}

type Entries<T> = Arc<Mutex<HashMap<String, CoalescerEntry<T>>>>;

pub struct MessageCoalescer<T> {
    entries: Entries<T>,
    viseme_window: Duration,
    default_window: Duration,
    viseme_types: HashSet<String>,
    emit: Emitter<T>,
}

impl<T> MessageCoalescer<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    pub fn new(config: &CoalescerConfig, emit: Emitter<T>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            viseme_window: Duration::from_millis(config.viseme_window_ms),
            default_window: Duration::from_millis(config.default_window_ms),
            viseme_types: config.viseme_types.iter().cloned().collect(),
            emit,
        }
    }

    pub fn window_for(&self, kind: &str) -> Duration {
        if self.viseme_types.contains(kind) {
            self.viseme_window
        } else {
            self.default_window
        }
    }

    /// Offer a payload of type `kind`.
    pub fn push(&self, kind: &str, payload: T) {
        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("[Coalescer] No async runtime, forwarding '{}' directly", kind);
                (self.emit)(kind, payload);
                return;
            }
        };

        let now = Instant::now();
        let window = self.window_for(kind);
        let immediate = {
            let mut entries = lock_entries(&self.entries);
            let entry = entries.entry(kind.to_string()).or_default();

            if entry.pending.is_some() {
                entry.last_payload = Some(payload);
                return;
            }

            match entry.last_emit.map(|at| now.saturating_duration_since(at)) {
                Some(elapsed) if elapsed < window => {
                    entry.last_payload = Some(payload);
                    entry.pending = Some(self.arm(&runtime, kind, window - elapsed));
                    None
                }
                _ => {
                    entry.last_emit = Some(now);
                    entry.last_emitted = Some(payload.clone());
                    entry.last_payload = Some(payload.clone());
                    entry.pending = Some(self.arm(&runtime, kind, window));
                    Some(payload)
                }
            }
        };

        // Emit outside the lock so the receiver may push again.
        if let Some(payload) = immediate {
            (self.emit)(kind, payload);
        }
    }

    fn arm(&self, runtime: &Handle, kind: &str, delay: Duration) -> JoinHandle<()> {
        let entries = Arc::clone(&self.entries);
        let emit = Arc::clone(&self.emit);
        let kind = kind.to_string();
        let deadline = Instant::now() + delay;
        runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            flush(&entries, &emit, &kind);
        })
    }

    /// Message types with a trailing timer still pending.
    pub fn pending(&self) -> usize {
        lock_entries(&self.entries)
            .values()
            .filter(|entry| entry.pending.is_some())
            .count()
    }

    /// Abort every trailing timer. Payloads still waiting are discarded.
    pub fn cancel_all(&self) {
        let mut entries = lock_entries(&self.entries);
        let mut cancelled = 0;
        for entry in entries.values_mut() {
            if let Some(handle) = entry.pending.take() {
                handle.abort();
                cancelled += 1;
            }
        }
        debug!("[Coalescer] {} pending timers cancelled", cancelled);
    }
}

fn lock_entries<T>(
    entries: &Mutex<HashMap<String, CoalescerEntry<T>>>,
) -> MutexGuard<'_, HashMap<String, CoalescerEntry<T>>> {
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Trailing edge of a window: forward the newest payload if it was not sent yet.
fn flush<T: Clone + PartialEq>(entries: &Entries<T>, emit: &Emitter<T>, kind: &str) {
    let payload = {
        let mut entries = lock_entries(entries);
        let Some(entry) = entries.get_mut(kind) else {
            return;
        };
        entry.pending = None;
        match &entry.last_payload {
            Some(latest) if entry.last_emitted.as_ref() != Some(latest) => {
                let latest = latest.clone();
                entry.last_emitted = Some(latest.clone());
                entry.last_emit = Some(Instant::now());
                Some(latest)
            }
            _ => None,
        }
    };
    if let Some(payload) = payload {
        emit(kind, payload);
    }
}
