//! Per-session lifetime countdowns

use lwm2m_core::{Lwm2mError, Lwm2mResult};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Identity of one armed countdown
///
/// Every arm (registration or keep-alive) gets a fresh id, so an expiry
/// can tell whether the session it targets has been re-armed since.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Lifetime state of a session
///
/// # State Transitions
/// ```text
/// Armed -> Armed     (keep-alive re-arms the deadline)
/// Armed -> Expiring  (deadline elapsed)
/// Expiring -> Removed
/// Armed -> Removed   (deregistration or superseding registration)
/// ```
///
/// `Removed` is terminal. A later registration under the same endpoint
/// name starts a new session in `Armed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifetimeState {
    #[default]
    Armed,
    Expiring,
    Removed,
}

impl LifetimeState {
    pub fn is_live(&self) -> bool {
        matches!(self, LifetimeState::Armed)
    }

    /// Validate state transition
    ///
    /// # Errors
    /// Returns `ProtocolViolation` for transitions outside the table above
    pub fn validate_transition(&self, new_state: LifetimeState) -> Lwm2mResult<()> {
        let valid = matches!(
            (*self, new_state),
            (LifetimeState::Armed, LifetimeState::Armed)
                | (LifetimeState::Armed, LifetimeState::Expiring)
                | (LifetimeState::Armed, LifetimeState::Removed)
                | (LifetimeState::Expiring, LifetimeState::Removed)
        );

        if valid {
            Ok(())
        } else {
            Err(Lwm2mError::ProtocolViolation(format!(
                "Invalid lifetime transition: {:?} -> {:?}",
                self, new_state
            )))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifetimeState::Armed => "Armed",
            LifetimeState::Expiring => "Expiring",
            LifetimeState::Removed => "Removed",
        }
    }
}

/// Cancellable deadline owned by a session
///
/// Cancelling aborts the countdown task and never waits on it. Dropping
/// the timer cancels it.
#[derive(Debug)]
pub struct LifetimeTimer {
    id: TimerId,
    deadline: Instant,
    handle: JoinHandle<()>,
}

impl LifetimeTimer {
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Time left until the deadline, zero once it has passed
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for LifetimeTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Arms lifetime countdowns
#[derive(Debug, Default)]
pub struct LifetimeSupervisor {
    next_timer: AtomicU64,
}

impl LifetimeSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a countdown of `lifetime`, calling `on_expire` when it elapses
    ///
    /// The future returned by `on_expire` runs on its own task, so a
    /// cancellation that races with the deadline cannot interrupt an
    /// expiry that has already begun. The receiving side must therefore
    /// check the `TimerId` it is handed against the session's current one.
    pub fn arm<F, Fut>(&self, lifetime: Duration, on_expire: F) -> LifetimeTimer
    where
        F: FnOnce(TimerId) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = TimerId(self.next_timer.fetch_add(1, Ordering::Relaxed));
        let deadline = Instant::now() + lifetime;

        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            tokio::spawn(on_expire(id));
        });

        LifetimeTimer {
            id,
            deadline,
            handle,
        }
    }
}
