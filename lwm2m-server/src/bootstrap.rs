//! Bootstrap server (`/bs`)

use crate::config::{BootstrapConfig, OperationsConfig};
use crate::listener::ServerListener;
use crate::location::error_code;
use crate::operations::DeviceOperations;
use crate::registry::{SessionRegistry, WeakRegistry};
use async_trait::async_trait;
use lwm2m_core::{Lwm2mError, Lwm2mResult};
use lwm2m_transport::{Code, Exchange, Method, Request, RequestHandler, Response, RouteTable};
use std::net::SocketAddr;
use std::sync::Arc;

/// Path of the bootstrap request interface
pub const BOOTSTRAP_PATH: &str = "bs";

/// Handler for `POST /bs?ep={name}`
struct BootstrapHandler {
    registry: WeakRegistry,
    session_lifetime: u32,
}

#[async_trait]
impl RequestHandler for BootstrapHandler {
    async fn handle(&self, request: Request, peer: Arc<dyn Exchange>) -> Response {
        if request.method != Method::Post {
            log::warn!(
                "[bootstrap] Protocol violation: {} on /{}",
                request.method,
                BOOTSTRAP_PATH
            );
            return Response::new(Code::METHOD_NOT_ALLOWED);
        }

        let Some(registry) = self.registry.upgrade() else {
            return Response::new(Code::SERVICE_UNAVAILABLE);
        };
        let Some(endpoint) = request.query("ep").filter(|ep| !ep.is_empty()) else {
            log::warn!("[bootstrap] Protocol violation: request without endpoint name");
            return Response::new(Code::BAD_REQUEST);
        };

        match registry
            .register(endpoint, self.session_lifetime, "", peer)
            .await
        {
            Ok(_) => Response::new(Code::CHANGED),
            Err(e) => {
                log::warn!("[bootstrap] Bootstrap request rejected: {}", e);
                match e {
                    Lwm2mError::RegistrationFailed(_) => Response::new(Code::BAD_REQUEST),
                    other => Response::new(error_code(&other)),
                }
            }
        }
    }
}

/// LwM2M bootstrap server
///
/// Tracks the clients that sent a bootstrap request and lets the operator
/// provision them before `finish`.
pub struct BootstrapServer {
    listener: ServerListener,
    registry: SessionRegistry,
    operations: DeviceOperations,
    session_lifetime: u32,
}

impl BootstrapServer {
    pub fn new(config: BootstrapConfig, operations: OperationsConfig) -> Self {
        let registry =
            SessionRegistry::new("bootstrap", BOOTSTRAP_PATH, Arc::new(RouteTable::new()));
        Self {
            listener: ServerListener::new("bootstrap", config.address, registry.routes().clone()),
            operations: DeviceOperations::new(registry.clone(), operations)
                .with_read_format(config.read_format),
            registry,
            session_lifetime: config.session_lifetime,
        }
    }

    /// Install the `/bs` route, bind and start serving
    pub async fn start(&self) -> Lwm2mResult<SocketAddr> {
        let routes = self.registry.routes();
        if !routes.contains(BOOTSTRAP_PATH).await {
            let handler = BootstrapHandler {
                registry: self.registry.downgrade(),
                session_lifetime: self.session_lifetime,
            };
            routes.register(BOOTSTRAP_PATH, Arc::new(handler)).await?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{idle_link, MockLink};
    use lwm2m_core::ContentFormat;
    use std::time::Duration;

    fn server(session_lifetime: u32) -> BootstrapServer {
        let config = BootstrapConfig {
            address: "127.0.0.1:0".parse().unwrap(),
            session_lifetime,
            ..Default::default()
        };
        BootstrapServer::new(config, OperationsConfig::default())
    }

    #[tokio::test]
    async fn test_bootstrap_request_registers_client() {
        let server = server(600);
        server.start().await.unwrap();

        let request = Request::post("/bs").with_query("ep=dev1");
        let response = server.registry().routes().dispatch(request, idle_link()).await;
        assert_eq!(response.code, Code::CHANGED);

        let info = server.registry().session("dev1").await.unwrap();
        assert_eq!(info.location, "bs/0");
        assert_eq!(info.lifetime, 600);
        assert!(info.objects.is_empty());
        server.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_bootstrap_requests() {
        let server = server(600);
        server.start().await.unwrap();
        let routes = server.registry().routes();

        let response = routes.dispatch(Request::post("/bs"), idle_link()).await;
        assert_eq!(response.code, Code::BAD_REQUEST);
        let response = routes
            .dispatch(Request::get("/bs").with_query("ep=dev1"), idle_link())
            .await;
        assert_eq!(response.code, Code::METHOD_NOT_ALLOWED);
        assert!(server.registry().is_empty().await);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_provision_and_finish() {
        let server = server(600);
        server.start().await.unwrap();

        let mut link = MockLink::new();
        let mut sequence = mockall::Sequence::new();
        link.expect_exchange()
            .withf(|request, _| request.method == Method::Delete && request.path_string() == "0")
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| Ok(Response::new(Code::DELETED)));
        link.expect_exchange()
            .withf(|request, _| {
                request.method == Method::Put
                    && request.path_string() == "0/1/0"
                    && request.content_format == Some(ContentFormat::SenmlJson)
            })
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| Ok(Response::new(Code::CHANGED)));
        link.expect_exchange()
            .withf(|request, _| request.method == Method::Post && request.path_string() == "bs")
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| Ok(Response::new(Code::CHANGED)));

        let request = Request::post("/bs").with_query("ep=dev1");
        server
            .registry()
            .routes()
            .dispatch(request, Arc::new(link))
            .await;

        let operations = server.operations();
        operations.delete("dev1", "/0").await.unwrap();
        operations
            .write("dev1", "/0/1/0", r#"[{"bn":"/0/1/0","vs":"coap://127.0.0.1:5683"}]"#)
            .await
            .unwrap();
        operations.finish("dev1").await.unwrap();
        server.stop().await;
    }

    #[tokio::test]
    async fn test_bootstrap_read_uses_lwm2m_json() {
        let server = server(600);
        server.start().await.unwrap();

        let mut link = MockLink::new();
        link.expect_exchange()
            .withf(|request, _| {
                request.method == Method::Get && request.accept == Some(ContentFormat::Lwm2mJson)
            })
            .times(1)
            .returning(|_, _| Ok(Response::new(Code::CONTENT).with_payload("{}")));
        let request = Request::post("/bs").with_query("ep=dev1");
        server
            .registry()
            .routes()
            .dispatch(request, Arc::new(link))
            .await;

        assert_eq!(server.operations().read_format(), ContentFormat::Lwm2mJson);
        assert_eq!(server.operations().read("dev1", "/0").await.unwrap(), "{}");
        server.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_session_expires() {
        let server = server(5);
        server
            .registry()
            .routes()
            .register(
                BOOTSTRAP_PATH,
                Arc::new(BootstrapHandler {
                    registry: server.registry().downgrade(),
                    session_lifetime: 5,
                }),
            )
            .await
            .unwrap();

        let request = Request::post("/bs").with_query("ep=dev1");
        server.registry().routes().dispatch(request, idle_link()).await;
        assert_eq!(server.operations().list().await, vec!["dev1".to_string()]);

        tokio::time::sleep(Duration::from_millis(5100)).await;
        assert!(server.operations().list().await.is_empty());
        assert!(!server.registry().routes().contains("bs/0").await);
    }
}
