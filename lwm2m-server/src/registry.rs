//! Session registry shared by the bootstrap and registration servers
//!
//! The registry owns the mapping from endpoint name to [`SessionEntry`]
//! and is the only component that installs or removes per-session routes.
//! Every mutation (register, keep-alive, deregister, expiry) runs under
//! the registry's write lock, which also covers the route table update and
//! the timer swap. A reader therefore never sees an entry whose route or
//! timer is half installed or half torn down.

use crate::lifetime::{LifetimeState, LifetimeSupervisor, LifetimeTimer, TimerId};
use crate::location::LocationHandler;
use crate::session::{SessionEntry, SessionInfo};
use lwm2m_core::{Lwm2mError, Lwm2mResult};
use lwm2m_transport::{Exchange, RouteTable};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;

/// Why a session is being torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    Deregistered,
    Expired,
    Superseded,
}

struct RegistryInner {
    name: String,
    location_prefix: String,
    routes: Arc<RouteTable>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    next_location: AtomicU64,
    supervisor: LifetimeSupervisor,
}

/// Registry of live device sessions
///
/// Cheap to clone; clones share the same sessions.
///
/// # Usage Example
/// ```rust,ignore
/// let routes = Arc::new(RouteTable::new());
/// let registry = SessionRegistry::new("lwm2m", "rd", routes);
///
/// let location = registry.register("dev1", 60, "</3/0>", link).await?;
/// assert_eq!(location, "rd/0");
/// registry.keep_alive("dev1", Some(120), None).await?;
/// registry.deregister("dev1").await?;
/// ```
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

/// Non-owning registry reference held by routes
#[derive(Clone)]
pub(crate) struct WeakRegistry(Weak<RegistryInner>);

impl WeakRegistry {
    pub(crate) fn upgrade(&self) -> Option<SessionRegistry> {
        self.0.upgrade().map(|inner| SessionRegistry { inner })
    }
}

impl SessionRegistry {
    /// Create an empty registry
    ///
    /// # Arguments
    /// * `name` - Label used in log lines (e.g. "bootstrap", "lwm2m")
    /// * `location_prefix` - First segment of assigned locations (e.g. "rd")
    /// * `routes` - Route table the per-session handlers are installed in
    pub fn new(name: &str, location_prefix: &str, routes: Arc<RouteTable>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                name: name.to_string(),
                location_prefix: location_prefix.trim_matches('/').to_string(),
                routes,
                sessions: RwLock::new(HashMap::new()),
                next_location: AtomicU64::new(0),
                supervisor: LifetimeSupervisor::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.inner.routes
    }

    pub(crate) fn downgrade(&self) -> WeakRegistry {
        WeakRegistry(Arc::downgrade(&self.inner))
    }

    /// Register a device, replacing any live session with the same name
    ///
    /// Allocates a fresh location, installs its route and arms the lifetime
    /// countdown.
    ///
    /// # Returns
    /// The assigned location, e.g. `rd/0`
    ///
    /// # Errors
    /// * `ProtocolViolation` if the endpoint name is empty or the lifetime is zero
    /// * `RegistrationFailed` if the location route cannot be installed; no
    ///   session exists for the endpoint afterwards
    pub async fn register(
        &self,
        endpoint: &str,
        lifetime: u32,
        objects: &str,
        link: Arc<dyn Exchange>,
    ) -> Lwm2mResult<String> {
        if endpoint.is_empty() {
            return Err(Lwm2mError::ProtocolViolation(
                "missing endpoint name".to_string(),
            ));
        }
        check_lifetime(lifetime)?;

        let mut sessions = self.inner.sessions.write().await;

        if let Some(previous) = sessions.remove(endpoint) {
            self.teardown(previous, Teardown::Superseded).await;
        }

        let location = format!(
            "{}/{}",
            self.inner.location_prefix,
            self.inner.next_location.fetch_add(1, Ordering::Relaxed)
        );
        let handler = LocationHandler::new(self.downgrade(), endpoint, &location);
        self.inner
            .routes
            .register(&location, Arc::new(handler))
            .await
            .map_err(|e| match e {
                Lwm2mError::RegistrationFailed(_) => e,
                other => Lwm2mError::RegistrationFailed(other.to_string()),
            })?;

        let timer = self.arm(endpoint, lifetime);
        sessions.insert(
            endpoint.to_string(),
            SessionEntry::new(
                endpoint,
                link,
                location.clone(),
                lifetime,
                objects.to_string(),
                timer,
            ),
        );

        log::info!(
            "[{}] Registration ep = {}, lt = {}, location = /{}",
            self.inner.name,
            endpoint,
            lifetime,
            location
        );
        if !objects.is_empty() {
            log::info!("[{}] Objects {}", self.inner.name, objects);
        }

        Ok(location)
    }

    /// Reset the lifetime countdown of a live session
    ///
    /// Uses `lifetime` when given, the current lifetime otherwise. A
    /// non-empty `objects` replaces the stored object list.
    ///
    /// # Errors
    /// * `NotFound` if no session is live for `endpoint`
    /// * `ProtocolViolation` if the new lifetime is zero
    pub async fn keep_alive(
        &self,
        endpoint: &str,
        lifetime: Option<u32>,
        objects: Option<&str>,
    ) -> Lwm2mResult<()> {
        self.update(endpoint, None, lifetime, objects).await
    }

    /// Remove a session on the device's request
    ///
    /// # Errors
    /// Returns `NotFound` if no session is live for `endpoint`
    pub async fn deregister(&self, endpoint: &str) -> Lwm2mResult<()> {
        self.remove(endpoint, None).await
    }

    /// Expire a session immediately, as if its lifetime elapsed
    ///
    /// # Errors
    /// Returns `NotFound` if no session is live for `endpoint`
    pub async fn expire_now(&self, endpoint: &str) -> Lwm2mResult<()> {
        let mut sessions = self.inner.sessions.write().await;
        let mut entry = take(&mut sessions, endpoint, None)?;
        entry.transition(LifetimeState::Expiring)?;
        self.teardown(entry, Teardown::Expired).await;
        Ok(())
    }

    /// Sorted snapshot of the registered endpoint names
    pub async fn list(&self) -> Vec<String> {
        let sessions = self.inner.sessions.read().await;
        let mut endpoints: Vec<String> = sessions.keys().cloned().collect();
        endpoints.sort();
        endpoints
    }

    /// Transport handle of a live session
    ///
    /// # Errors
    /// Returns `NotFound` if no session is live for `endpoint`
    pub async fn lookup(&self, endpoint: &str) -> Lwm2mResult<Arc<dyn Exchange>> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(endpoint)
            .map(|entry| entry.link().clone())
            .ok_or_else(|| Lwm2mError::NotFound(endpoint.to_string()))
    }

    /// Snapshot of a live session
    pub async fn session(&self, endpoint: &str) -> Lwm2mResult<SessionInfo> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(endpoint)
            .map(SessionEntry::info)
            .ok_or_else(|| Lwm2mError::NotFound(endpoint.to_string()))
    }

    pub async fn len(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.sessions.read().await.is_empty()
    }

    /// Keep-alive addressed through a location route
    ///
    /// Fails with `NotFound` if the session for `endpoint` now lives at a
    /// different location, i.e. the route that received the request is stale.
    pub(crate) async fn keep_alive_at(
        &self,
        endpoint: &str,
        location: &str,
        lifetime: Option<u32>,
        objects: Option<&str>,
    ) -> Lwm2mResult<()> {
        self.update(endpoint, Some(location), lifetime, objects).await
    }

    /// Deregistration addressed through a location route
    pub(crate) async fn deregister_at(&self, endpoint: &str, location: &str) -> Lwm2mResult<()> {
        self.remove(endpoint, Some(location)).await
    }

    async fn update(
        &self,
        endpoint: &str,
        location: Option<&str>,
        lifetime: Option<u32>,
        objects: Option<&str>,
    ) -> Lwm2mResult<()> {
        if let Some(lifetime) = lifetime {
            check_lifetime(lifetime)?;
        }

        let mut sessions = self.inner.sessions.write().await;
        let entry = sessions
            .get_mut(endpoint)
            .filter(|entry| location.is_none_or(|location| entry.location() == location))
            .ok_or_else(|| Lwm2mError::NotFound(endpoint.to_string()))?;

        if let Some(lifetime) = lifetime {
            entry.set_lifetime(lifetime);
        }
        let timer = self.arm(endpoint, entry.lifetime());
        entry.rearm(timer)?;

        log::info!(
            "[{}] Registration update ep = {}, lt = {}",
            self.inner.name,
            endpoint,
            entry.lifetime()
        );
        if let Some(objects) = objects.filter(|objects| !objects.is_empty()) {
            entry.replace_objects(objects);
            log::info!("[{}] Objects {}", self.inner.name, objects);
        }

        Ok(())
    }

    async fn remove(&self, endpoint: &str, location: Option<&str>) -> Lwm2mResult<()> {
        let mut sessions = self.inner.sessions.write().await;
        let entry = take(&mut sessions, endpoint, location)?;
        self.teardown(entry, Teardown::Deregistered).await;
        Ok(())
    }

    /// Deadline handler: expire `endpoint` only if `timer` is still its countdown
    async fn expire_if_current(&self, endpoint: &str, timer: TimerId) {
        let mut sessions = self.inner.sessions.write().await;
        let current = sessions
            .get(endpoint)
            .is_some_and(|entry| entry.timer_id() == timer);
        if !current {
            log::debug!(
                "[{}] Stale expiry for ep = {} ignored",
                self.inner.name,
                endpoint
            );
            return;
        }

        if let Some(mut entry) = sessions.remove(endpoint) {
            if let Err(e) = entry.transition(LifetimeState::Expiring) {
                log::warn!("[{}] {}", self.inner.name, e);
            }
            self.teardown(entry, Teardown::Expired).await;
        }
    }

    fn arm(&self, endpoint: &str, lifetime: u32) -> LifetimeTimer {
        let registry = self.downgrade();
        let endpoint = endpoint.to_string();
        self.inner.supervisor.arm(
            Duration::from_secs(u64::from(lifetime)),
            move |timer| async move {
                if let Some(registry) = registry.upgrade() {
                    registry.expire_if_current(&endpoint, timer).await;
                }
            },
        )
    }

    /// Cancel the countdown and remove the location route of a detached entry
    async fn teardown(&self, mut entry: SessionEntry, reason: Teardown) {
        entry.cancel_timer();
        if let Err(e) = entry.transition(LifetimeState::Removed) {
            log::warn!("[{}] {}", self.inner.name, e);
        }
        if !self.inner.routes.remove(entry.location()).await {
            log::warn!(
                "[{}] Route /{} was already removed",
                self.inner.name,
                entry.location()
            );
        }

        match reason {
            Teardown::Deregistered => log::info!(
                "[{}] Deregistration ep = {}",
                self.inner.name,
                entry.endpoint()
            ),
            Teardown::Expired => log::warn!(
                "[{}] Client {} registration update timeout",
                self.inner.name,
                entry.endpoint()
            ),
            Teardown::Superseded => log::info!(
                "[{}] Client {} registered again, /{} released",
                self.inner.name,
                entry.endpoint(),
                entry.location()
            ),
        }
    }
}

fn check_lifetime(lifetime: u32) -> Lwm2mResult<()> {
    if lifetime == 0 {
        return Err(Lwm2mError::ProtocolViolation(
            "lifetime must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Detach the entry for `endpoint`, optionally requiring it to live at `location`
fn take(
    sessions: &mut HashMap<String, SessionEntry>,
    endpoint: &str,
    location: Option<&str>,
) -> Lwm2mResult<SessionEntry> {
    let matches = sessions
        .get(endpoint)
        .is_some_and(|entry| location.is_none_or(|location| entry.location() == location));
    if !matches {
        return Err(Lwm2mError::NotFound(endpoint.to_string()));
    }
    sessions
        .remove(endpoint)
        .ok_or_else(|| Lwm2mError::NotFound(endpoint.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::idle_link;
    use tokio_test::{assert_err, assert_ok};

    fn registry() -> SessionRegistry {
        SessionRegistry::new("lwm2m", "rd", Arc::new(RouteTable::new()))
    }

    #[tokio::test]
    async fn test_register_assigns_monotonic_locations() {
        let registry = registry();

        let first = registry.register("dev1", 60, "</3/0>", idle_link()).await.unwrap();
        let second = registry.register("dev2", 60, "</3/0>", idle_link()).await.unwrap();

        assert_eq!(first, "rd/0");
        assert_eq!(second, "rd/1");
        assert_eq!(registry.list().await, vec!["dev1".to_string(), "dev2".to_string()]);
        assert!(registry.routes().contains("rd/0").await);
        assert!(registry.routes().contains("rd/1").await);
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_input() {
        let registry = registry();

        let result = registry.register("", 60, "", idle_link()).await;
        assert!(matches!(result, Err(Lwm2mError::ProtocolViolation(_))));

        let result = registry.register("dev1", 0, "", idle_link()).await;
        assert!(matches!(result, Err(Lwm2mError::ProtocolViolation(_))));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_reregistration_replaces_session() {
        let registry = registry();

        registry.register("dev1", 60, "</1/0>", idle_link()).await.unwrap();
        let location = registry
            .register("dev1", 120, "</3/0>", idle_link())
            .await
            .unwrap();

        assert_eq!(location, "rd/1");
        assert_eq!(registry.list().await, vec!["dev1".to_string()]);
        assert_eq!(registry.routes().paths().await, vec!["rd/1".to_string()]);

        let info = registry.session("dev1").await.unwrap();
        assert_eq!(info.lifetime, 120);
        assert_eq!(info.objects, "</3/0>");
        assert_eq!(info.location, "rd/1");
    }

    #[tokio::test]
    async fn test_route_collision_fails_registration() {
        let routes = Arc::new(RouteTable::new());
        let registry = SessionRegistry::new("lwm2m", "rd", routes.clone());
        let blocker = SessionRegistry::new("other", "rd", routes.clone());
        blocker.register("squatter", 60, "", idle_link()).await.unwrap();

        let result = registry.register("dev1", 60, "", idle_link()).await;
        assert!(matches!(result, Err(Lwm2mError::RegistrationFailed(_))));
        assert!(matches!(
            registry.lookup("dev1").await,
            Err(Lwm2mError::NotFound(_))
        ));

        // the failed attempt consumed rd/0, the next one gets a fresh location
        let location = registry.register("dev1", 60, "", idle_link()).await.unwrap();
        assert_eq!(location, "rd/1");
    }

    #[tokio::test]
    async fn test_deregister_twice() {
        let registry = registry();
        registry.register("dev1", 60, "", idle_link()).await.unwrap();

        assert_ok!(registry.deregister("dev1").await);
        let result = registry.deregister("dev1").await;
        assert!(matches!(result, Err(Lwm2mError::NotFound(ref ep)) if ep == "dev1"));
        assert!(registry.routes().paths().await.is_empty());
    }

    #[tokio::test]
    async fn test_keep_alive_unknown_endpoint() {
        let registry = registry();
        let result = registry.keep_alive("dev1", Some(60), None).await;
        assert!(matches!(result, Err(Lwm2mError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_keep_alive_updates_lifetime_and_objects() {
        let registry = registry();
        registry.register("dev1", 60, "</1/0>", idle_link()).await.unwrap();

        registry.keep_alive("dev1", Some(300), Some("")).await.unwrap();
        let info = registry.session("dev1").await.unwrap();
        assert_eq!(info.lifetime, 300);
        assert_eq!(info.objects, "</1/0>");

        registry.keep_alive("dev1", None, Some("</1/0>,</3/0>")).await.unwrap();
        let info = registry.session("dev1").await.unwrap();
        assert_eq!(info.lifetime, 300);
        assert_eq!(info.objects, "</1/0>,</3/0>");

        let result = registry.keep_alive("dev1", Some(0), None).await;
        assert!(matches!(result, Err(Lwm2mError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn test_stale_location_is_not_found() {
        let registry = registry();
        registry.register("dev1", 60, "", idle_link()).await.unwrap();
        registry.register("dev1", 60, "", idle_link()).await.unwrap();

        let result = registry.keep_alive_at("dev1", "rd/0", None, None).await;
        assert!(matches!(result, Err(Lwm2mError::NotFound(_))));
        let result = registry.deregister_at("dev1", "rd/0").await;
        assert!(matches!(result, Err(Lwm2mError::NotFound(_))));

        assert_ok!(registry.keep_alive_at("dev1", "rd/1", None, None).await);
        assert_ok!(registry.deregister_at("dev1", "rd/1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_expires_without_keep_alive() {
        let registry = registry();
        registry.register("dev1", 2, "</3/0>", idle_link()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_ok!(registry.lookup("dev1").await);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(matches!(
            registry.lookup("dev1").await,
            Err(Lwm2mError::NotFound(_))
        ));
        assert!(!registry.routes().contains("rd/0").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_resets_deadline() {
        let registry = registry();
        registry.register("dev1", 10, "", idle_link()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        registry.keep_alive("dev1", None, None).await.unwrap();

        // past the first deadline, still live
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_ok!(registry.lookup("dev1").await);
        let expires_in = registry.session("dev1").await.unwrap().expires_in;
        assert!(expires_in > Duration::from_secs(4) && expires_in <= Duration::from_secs(5));

        // new deadline is t=16
        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert_ok!(registry.lookup("dev1").await);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(matches!(
            registry.lookup("dev1").await,
            Err(Lwm2mError::NotFound(_))
        ));

        // still gone by twice the lifetime
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(registry.lookup("dev1").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_session_ignores_stale_expiry() {
        let registry = registry();
        registry.register("dev1", 2, "", idle_link()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        registry.register("dev1", 10, "", idle_link()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        let info = registry.session("dev1").await.unwrap();
        assert_eq!(info.location, "rd/1");
        assert_eq!(info.lifetime, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deregistered_session_never_expires_later_session() {
        let registry = registry();
        registry.register("dev1", 3, "", idle_link()).await.unwrap();
        registry.deregister("dev1").await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        registry.register("dev1", 5, "", idle_link()).await.unwrap();

        // first session's deadline (t=3) passes without effect
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_ok!(registry.lookup("dev1").await);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(matches!(
            registry.lookup("dev1").await,
            Err(Lwm2mError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_expire_now() {
        let registry = registry();
        registry.register("dev1", 60, "", idle_link()).await.unwrap();

        assert_ok!(registry.expire_now("dev1").await);
        assert!(registry.is_empty().await);
        assert!(!registry.routes().contains("rd/0").await);
        assert_err!(registry.expire_now("dev1").await);
    }

    #[tokio::test]
    async fn test_concurrent_registrations_keep_one_session_per_endpoint() {
        let registry = registry();

        let mut tasks = Vec::new();
        for i in 0..16u32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let endpoint = format!("dev{}", i % 4);
                registry.register(&endpoint, 60 + i, "", idle_link()).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(registry.len().await, 4);
        assert_eq!(registry.routes().paths().await.len(), 4);
    }

    #[tokio::test]
    async fn test_list_is_a_snapshot() {
        let registry = registry();
        registry.register("dev1", 60, "", idle_link()).await.unwrap();

        let snapshot = registry.list().await;
        registry.deregister("dev1").await.unwrap();

        assert_eq!(snapshot, vec!["dev1".to_string()]);
        assert!(registry.list().await.is_empty());
    }
}
