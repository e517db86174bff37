//! Per-(binding, origin) invocation throttling.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::binding::BindingId;

/// Tracks when each binding last fired for each origin. Mutated only by
/// the dispatch engine.
#[derive(Default)]
pub struct CooldownMap {
    last_invoked: HashMap<(BindingId, String), DateTime<Utc>>,
}

impl CooldownMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the binding may fire for this origin now. When allowed,
    /// the invocation is stamped immediately so a concurrent burst from
    /// one origin cannot slip through.
    pub fn check_and_stamp(
        &mut self,
        binding: BindingId,
        origin: &str,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        if cooldown.is_zero() {
            return true;
        }

        let key = (binding, origin.to_string());
        if let Some(last) = self.last_invoked.get(&key) {
            let elapsed = (now - *last).to_std().unwrap_or(Duration::ZERO);
            if elapsed < cooldown {
                return false;
            }
        }
        self.last_invoked.insert(key, now);
        true
    }

    pub fn len(&self) -> usize {
        self.last_invoked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_invoked.is_empty()
    }
}
