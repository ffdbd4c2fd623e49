use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use log::{debug, info};
use parking_lot::Mutex;

use crate::source::producer::{Producer, ProducerRegistry};

/// Minimum spacing between two lookups of a missing target.
pub const RESOLVE_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResolveOutcome {
    /// No target name is set.
    Idle,
    /// A live handle is already held.
    Held,
    /// The last attempt was less than [`RESOLVE_INTERVAL`] ago.
    Deferred,
    Resolved,
    Missing,
}

#[derive(Default)]
struct TargetState {
    name: String,
    handle: Option<Weak<dyn Producer>>,
    last_attempt: Option<Instant>,
}

/// Name-addressed, non-owning handle to the observed producer.
///
/// The lock guards only the name, the handle and the attempt time. It is
/// held for a registry lookup at most; callers never do GPU work under it.
#[derive(Default)]
pub struct TargetResolver {
    state: Mutex<TargetState>,
}

impl TargetResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    /// Returns true when the name changed. A change drops the held handle
    /// and makes the next resolution due immediately.
    pub fn set_name(&self, name: &str) -> bool {
        let previous = {
            let mut state = self.state.lock();
            if state.name == name {
                return false;
            }

            state.name = name.to_string();
            state.last_attempt = None;
            state.handle.take()
        };

        drop(previous);
        debug!("target name set to '{}'", name);
        true
    }

    pub fn resolve_if_due(
        &self,
        registry: &ProducerRegistry,
        now: Instant,
    ) -> ResolveOutcome {
        let mut state = self.state.lock();

        if state.name.is_empty() {
            return ResolveOutcome::Idle;
        }

        match state.handle.as_ref().map(|handle| handle.strong_count() > 0) {
            Some(true) => return ResolveOutcome::Held,
            Some(false) => {
                debug!("target '{}' went away", state.name);
                state.handle = None;
            }
            None => {}
        }

        if let Some(last) = state.last_attempt {
            if now.saturating_duration_since(last) < RESOLVE_INTERVAL {
                return ResolveOutcome::Deferred;
            }
        }

        state.last_attempt = Some(now);

        match registry.get_by_name(&state.name) {
            Some(producer) => {
                state.handle = Some(Arc::downgrade(&producer));
                info!("resolved target '{}'", state.name);
                ResolveOutcome::Resolved
            }
            None => {
                debug!("target '{}' not found", state.name);
                ResolveOutcome::Missing
            }
        }
    }

    /// Strong reference for the duration of one capture. Callers must drop
    /// it before the frame ends.
    pub fn target(&self) -> Option<Arc<dyn Producer>> {
        self.state.lock().handle.as_ref().and_then(Weak::upgrade)
    }
}
