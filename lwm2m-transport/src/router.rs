//! Path-keyed request routing

use crate::code::Code;
use crate::exchange::Exchange;
use crate::request::{split_path, Request, Response};
use async_trait::async_trait;
use lwm2m_core::{Lwm2mError, Lwm2mResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Handler for requests addressed to one path
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle `request`; `peer` reaches back to the device that sent it
    async fn handle(&self, request: Request, peer: Arc<dyn Exchange>) -> Response;
}

/// Routing table mapping URI paths to handlers
///
/// Paths are matched exactly after normalization (segments joined by `/`,
/// no leading or trailing slash). Routes can be installed and removed
/// while the endpoint is serving.
#[derive(Default)]
pub struct RouteTable {
    routes: RwLock<HashMap<String, Arc<dyn RequestHandler>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler` for `path`
    ///
    /// # Errors
    /// Returns `RegistrationFailed` if a handler is already installed for
    /// the same path
    pub async fn register(&self, path: &str, handler: Arc<dyn RequestHandler>) -> Lwm2mResult<()> {
        let key = normalize(path);
        let mut routes = self.routes.write().await;
        if routes.contains_key(&key) {
            return Err(Lwm2mError::RegistrationFailed(format!(
                "route /{} is already registered",
                key
            )));
        }
        log::debug!("Route added: /{}", key);
        routes.insert(key, handler);
        Ok(())
    }

    /// Remove the handler for `path`, returning whether one was installed
    pub async fn remove(&self, path: &str) -> bool {
        let key = normalize(path);
        let removed = self.routes.write().await.remove(&key).is_some();
        if removed {
            log::debug!("Route removed: /{}", key);
        }
        removed
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.routes.read().await.contains_key(&normalize(path))
    }

    /// Snapshot of the installed paths, sorted
    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.routes.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Route `request` to its handler, answering 4.04 for unknown paths
    pub async fn dispatch(&self, request: Request, peer: Arc<dyn Exchange>) -> Response {
        let key = request.path_string();
        // The lock is released before the handler runs so handlers may
        // install or remove routes themselves.
        let handler = self.routes.read().await.get(&key).cloned();

        match handler {
            Some(handler) => handler.handle(request, peer).await,
            None => {
                log::warn!("No route for {} /{}", request.method, key);
                Response::new(Code::NOT_FOUND)
            }
        }
    }
}

fn normalize(path: &str) -> String {
    split_path(path).join("/")
}
