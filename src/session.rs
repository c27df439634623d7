use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::SessionConfig;
use crate::liveness::LivenessMonitor;

pub const DEFAULT_SESSION: &str = "default";

struct Entry {
    monitor: LivenessMonitor,
    last_seen: Instant,
}

/// Liveness challenges for still-image callers, keyed by session id.
///
/// Idle sessions expire after `ttl`; past `capacity`, the least recently
/// seen session is dropped to make room.
pub struct LivenessSessions {
    sessions: HashMap<String, Entry>,
    ttl: Duration,
    capacity: usize,
    window: Duration,
    move_px: f32,
}

impl LivenessSessions {
    pub fn new(ttl: Duration, capacity: usize, window: Duration, move_px: f32) -> Self {
        Self {
            sessions: HashMap::new(),
            ttl,
            capacity: capacity.max(1),
            window,
            move_px,
        }
    }

    pub fn from_config(cfg: &SessionConfig, window: Duration, move_px: f32) -> Self {
        Self::new(Duration::from_secs(cfg.ttl_s), cfg.capacity, window, move_px)
    }

    pub fn monitor(&mut self, id: &str) -> &mut LivenessMonitor {
        self.monitor_at(id, Instant::now())
    }

    /// Monitor for `id`, created on first use.
    pub fn monitor_at(&mut self, id: &str, now: Instant) -> &mut LivenessMonitor {
        self.evict_idle(now);
        if !self.sessions.contains_key(id) && self.sessions.len() >= self.capacity {
            self.evict_oldest();
        }

        let (window, move_px) = (self.window, self.move_px);
        let entry = self.sessions.entry(id.to_string()).or_insert_with(|| {
            log::debug!("new liveness session {}", id);
            Entry {
                monitor: LivenessMonitor::starting_at(window, move_px, now),
                last_seen: now,
            }
        });
        entry.last_seen = now;
        &mut entry.monitor
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn evict_idle(&mut self, now: Instant) {
        let ttl = self.ttl;
        let before = self.sessions.len();
        self.sessions
            .retain(|_, e| now.saturating_duration_since(e.last_seen) <= ttl);
        let evicted = before - self.sessions.len();
        if evicted > 0 {
            log::debug!("expired {} idle liveness sessions", evicted);
        }
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .sessions
            .iter()
            .min_by_key(|(_, e)| e.last_seen)
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            log::debug!("liveness sessions full; dropping {}", id);
            self.sessions.remove(&id);
        }
    }
}
