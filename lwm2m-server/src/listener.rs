//! UDP listener shared by the bootstrap and registration servers

use lwm2m_core::{Lwm2mError, Lwm2mResult};
use lwm2m_transport::{CoapEndpoint, RouteTable};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

struct Running {
    endpoint: Arc<CoapEndpoint>,
    task: JoinHandle<()>,
}

/// Binds a CoAP endpoint over a route table and runs its receive loop
///
/// # Usage Example
/// ```rust,ignore
/// let listener = ServerListener::new("lwm2m", "0.0.0.0:5683".parse()?, routes);
/// let local = listener.start().await?;
/// // ...
/// listener.stop().await;
/// ```
pub struct ServerListener {
    name: String,
    address: SocketAddr,
    routes: Arc<RouteTable>,
    running: Mutex<Option<Running>>,
}

impl ServerListener {
    pub fn new(name: &str, address: SocketAddr, routes: Arc<RouteTable>) -> Self {
        Self {
            name: name.to_string(),
            address,
            routes,
            running: Mutex::new(None),
        }
    }

    /// Bind and start serving
    ///
    /// # Returns
    /// The bound local address (useful when binding port 0)
    ///
    /// # Errors
    /// * `Connection` if the address cannot be bound
    /// * `InvalidData` if the listener is already running
    pub async fn start(&self) -> Lwm2mResult<SocketAddr> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(Lwm2mError::InvalidData(format!(
                "{} server is already running",
                self.name
            )));
        }

        let endpoint = CoapEndpoint::bind(self.address, self.routes.clone()).await?;
        let local = endpoint.local_addr()?;
        let task = endpoint.serve();
        log::info!("{} server listening on {}", self.name, local);

        *running = Some(Running { endpoint, task });
        Ok(local)
    }

    /// Stop the receive loop and release the socket
    pub async fn stop(&self) {
        if let Some(running) = self.running.lock().await.take() {
            running.task.abort();
            if let Ok(local) = running.endpoint.local_addr() {
                log::info!("{} server on {} stopped", self.name, local);
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let running = self.running.lock().await;
        running
            .as_ref()
            .and_then(|running| running.endpoint.local_addr().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let listener = ServerListener::new("test", loopback(), Arc::new(RouteTable::new()));
        assert!(!listener.is_running().await);

        let local = listener.start().await.unwrap();
        assert_ne!(local.port(), 0);
        assert_eq!(listener.local_addr().await, Some(local));
        assert_err!(listener.start().await);

        listener.stop().await;
        assert!(!listener.is_running().await);
        assert_eq!(listener.local_addr().await, None);
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let first = ServerListener::new("first", loopback(), Arc::new(RouteTable::new()));
        let local = first.start().await.unwrap();

        let second = ServerListener::new("second", local, Arc::new(RouteTable::new()));
        let result = second.start().await;
        assert!(matches!(result, Err(Lwm2mError::Connection(_))));
    }
}
