//! Session entries for enrolled devices

use crate::lifetime::{LifetimeState, LifetimeTimer, TimerId};
use lwm2m_core::Lwm2mResult;
use lwm2m_transport::Exchange;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One enrolled device
///
/// Owned by the [`SessionRegistry`](crate::registry::SessionRegistry);
/// the endpoint name and location never change for the life of the entry.
pub struct SessionEntry {
    endpoint: String,
    link: Arc<dyn Exchange>,
    location: String,
    lifetime: u32,
    objects: String,
    state: LifetimeState,
    timer: LifetimeTimer,
}

impl SessionEntry {
    pub fn new(
        endpoint: &str,
        link: Arc<dyn Exchange>,
        location: String,
        lifetime: u32,
        objects: String,
        timer: LifetimeTimer,
    ) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            link,
            location,
            lifetime,
            objects,
            state: LifetimeState::Armed,
            timer,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn link(&self) -> &Arc<dyn Exchange> {
        &self.link
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Lifetime in seconds
    pub fn lifetime(&self) -> u32 {
        self.lifetime
    }

    pub fn objects(&self) -> &str {
        &self.objects
    }

    pub fn state(&self) -> LifetimeState {
        self.state
    }

    pub fn timer_id(&self) -> TimerId {
        self.timer.id()
    }

    pub fn set_lifetime(&mut self, lifetime: u32) {
        self.lifetime = lifetime;
    }

    pub fn replace_objects(&mut self, objects: &str) {
        self.objects = objects.to_string();
    }

    /// Replace the countdown; the previous one is cancelled
    pub fn rearm(&mut self, timer: LifetimeTimer) -> Lwm2mResult<()> {
        self.transition(LifetimeState::Armed)?;
        self.timer = timer;
        Ok(())
    }

    pub fn cancel_timer(&self) {
        self.timer.cancel();
    }

    pub fn transition(&mut self, new_state: LifetimeState) -> Lwm2mResult<()> {
        self.state.validate_transition(new_state)?;
        log::trace!(
            "Session {} /{}: {} -> {}",
            self.endpoint,
            self.location,
            self.state.as_str(),
            new_state.as_str()
        );
        self.state = new_state;
        Ok(())
    }

    /// Snapshot detached from the registry
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            endpoint: self.endpoint.clone(),
            location: self.location.clone(),
            lifetime: self.lifetime,
            objects: self.objects.clone(),
            expires_in: self.timer.remaining(),
        }
    }
}

impl fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEntry")
            .field("endpoint", &self.endpoint)
            .field("location", &self.location)
            .field("lifetime", &self.lifetime)
            .field("objects", &self.objects)
            .field("state", &self.state)
            .finish()
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub endpoint: String,
    pub location: String,
    pub lifetime: u32,
    pub objects: String,
    pub expires_in: Duration,
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} location=/{} lt={}s expires_in={}s objects={}",
            self.endpoint,
            self.location,
            self.lifetime,
            self.expires_in.as_secs(),
            self.objects
        )
    }
}
