//! Registration server (`/rd`)

use crate::config::{OperationsConfig, RegistrationConfig};
use crate::listener::ServerListener;
use crate::location::{error_code, parse_lifetime};
use crate::operations::DeviceOperations;
use crate::registry::{SessionRegistry, WeakRegistry};
use async_trait::async_trait;
use lwm2m_core::{Lwm2mError, Lwm2mResult};
use lwm2m_transport::{Code, Exchange, Method, Request, RequestHandler, Response, RouteTable};
use std::net::SocketAddr;
use std::sync::Arc;

/// Path of the registration interface
pub const REGISTRATION_PATH: &str = "rd";

/// Handler for `POST /rd?ep={name}&lt={seconds}`
struct RegisterHandler {
    registry: WeakRegistry,
    default_lifetime: u32,
}

impl RegisterHandler {
    async fn register(&self, request: &Request, link: Arc<dyn Exchange>) -> Lwm2mResult<String> {
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| Lwm2mError::RegistrationFailed("server stopped".to_string()))?;

        let endpoint = request
            .query("ep")
            .filter(|ep| !ep.is_empty())
            .ok_or_else(|| Lwm2mError::ProtocolViolation("missing endpoint name".to_string()))?;
        let lifetime = parse_lifetime(request.query("lt"))?.unwrap_or(self.default_lifetime);
        let objects = String::from_utf8_lossy(&request.payload);

        registry.register(endpoint, lifetime, &objects, link).await
    }
}

#[async_trait]
impl RequestHandler for RegisterHandler {
    async fn handle(&self, request: Request, peer: Arc<dyn Exchange>) -> Response {
        if request.method != Method::Post {
            log::warn!(
                "[lwm2m] Protocol violation: {} on /{}",
                request.method,
                REGISTRATION_PATH
            );
            return Response::new(Code::METHOD_NOT_ALLOWED);
        }

        match self.register(&request, peer).await {
            Ok(location) => Response::new(Code::CREATED).with_location(&location),
            Err(e) => {
                log::warn!("[lwm2m] Registration rejected: {}", e);
                match e {
                    Lwm2mError::RegistrationFailed(_) => Response::new(Code::BAD_REQUEST),
                    other => Response::new(error_code(&other)),
                }
            }
        }
    }
}

/// LwM2M registration server
///
/// Accepts registrations on `/rd`, tracks the registered clients and
/// exposes the device operations against them.
///
/// # Usage Example
/// ```rust,ignore
/// let server = RegistrationServer::new(config.registration, config.operations);
/// server.start().await?;
/// let value = server.operations().read("dev1", "/3/0/0").await?;
/// ```
pub struct RegistrationServer {
    listener: ServerListener,
    registry: SessionRegistry,
    operations: DeviceOperations,
    default_lifetime: u32,
}

impl RegistrationServer {
    pub fn new(config: RegistrationConfig, operations: OperationsConfig) -> Self {
        let registry =
            SessionRegistry::new("lwm2m", REGISTRATION_PATH, Arc::new(RouteTable::new()));
        Self {
            listener: ServerListener::new("lwm2m", config.address, registry.routes().clone()),
            operations: DeviceOperations::new(registry.clone(), operations)
                .with_read_format(config.read_format),
            registry,
            default_lifetime: config.default_lifetime,
        }
    }

    /// Install the `/rd` route, bind and start serving
    ///
    /// # Errors
    /// Returns error if binding fails or the server is already running
    pub async fn start(&self) -> Lwm2mResult<SocketAddr> {
        let routes = self.registry.routes();
        if !routes.contains(REGISTRATION_PATH).await {
            let handler = RegisterHandler {
                registry: self.registry.downgrade(),
                default_lifetime: self.default_lifetime,
            };
            routes.register(REGISTRATION_PATH, Arc::new(handler)).await?;
        }
        self.listener.start().await
    }

    pub async fn stop(&self) {
        self.listener.stop().await;
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().await
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn operations(&self) -> &DeviceOperations {
        &self.operations
    }
}
