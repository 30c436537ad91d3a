//! Device operations issued by the operator
//!
//! Each verb resolves the session, performs exactly one exchange bounded by
//! the configured timeout and classifies the reply. Nothing is retried.

use crate::config::OperationsConfig;
use crate::registry::SessionRegistry;
use lwm2m_core::{ContentFormat, Lwm2mError, Lwm2mResult};
use lwm2m_transport::{Code, Request, Response};

/// Path devices expose for bootstrap completion
pub const BOOTSTRAP_FINISH_PATH: &str = "/bs";

/// Operator verbs against the sessions of one registry
#[derive(Clone)]
pub struct DeviceOperations {
    registry: SessionRegistry,
    config: OperationsConfig,
    read_format: ContentFormat,
}

impl DeviceOperations {
    /// Operations reading in senml+json
    pub fn new(registry: SessionRegistry, config: OperationsConfig) -> Self {
        Self {
            registry,
            config,
            read_format: ContentFormat::SenmlJson,
        }
    }

    /// Accept format sent with reads
    pub fn with_read_format(mut self, format: ContentFormat) -> Self {
        self.read_format = format;
        self
    }

    pub fn read_format(&self) -> ContentFormat {
        self.read_format
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Registered endpoint names, sorted
    pub async fn list(&self) -> Vec<String> {
        self.registry.list().await
    }

    /// Link-format listing of the subtree at `path`
    pub async fn discover(&self, endpoint: &str, path: &str) -> Lwm2mResult<String> {
        let request = Request::get(path).with_accept(ContentFormat::LinkFormat);
        let response = self.call(endpoint, request, Code::CONTENT).await?;
        Ok(response.payload_string())
    }

    /// Current value(s) at `path` in the read format
    pub async fn read(&self, endpoint: &str, path: &str) -> Lwm2mResult<String> {
        let request = Request::get(path).with_accept(self.read_format);
        let response = self.call(endpoint, request, Code::CONTENT).await?;
        Ok(response.payload_string())
    }

    pub async fn write(&self, endpoint: &str, path: &str, data: &str) -> Lwm2mResult<()> {
        let request = Request::put(path)
            .with_content_format(self.config.write_format)
            .with_payload(data);
        self.call(endpoint, request, Code::CHANGED).await?;
        Ok(())
    }

    pub async fn delete(&self, endpoint: &str, path: &str) -> Lwm2mResult<()> {
        self.call(endpoint, Request::delete(path), Code::DELETED).await?;
        Ok(())
    }

    /// Signal bootstrap completion
    pub async fn finish(&self, endpoint: &str) -> Lwm2mResult<()> {
        let request =
            Request::post(BOOTSTRAP_FINISH_PATH).with_content_format(ContentFormat::LinkFormat);
        self.call(endpoint, request, Code::CHANGED).await?;
        Ok(())
    }

    /// One exchange that succeeds only when the device answers `expected`
    ///
    /// # Errors
    /// * `NotFound` if `endpoint` has no live session; no request is sent
    /// * `ExchangeFailed` on timeout, transport failure or any other code
    async fn call(
        &self,
        endpoint: &str,
        request: Request,
        expected: Code,
    ) -> Lwm2mResult<Response> {
        let link = self.registry.lookup(endpoint).await?;
        let timeout = self.config.timeout();
        let description = format!("{} /{}", request.method, request.path_string());

        log::debug!("[{}] {} -> {}", self.registry.name(), description, endpoint);
        let response = match tokio::time::timeout(timeout, link.exchange(request, timeout)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(e.into_exchange_failure()),
            Err(_) => return Err(Lwm2mError::Timeout.into_exchange_failure()),
        };

        if response.code != expected {
            log::warn!(
                "[{}] {} on {} answered {}",
                self.registry.name(),
                description,
                endpoint,
                response.code
            );
            return Err(Lwm2mError::ExchangeFailed(response.code.to_string()));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{answering_link, BrokenLink, MockLink, SlowLink};
    use lwm2m_transport::{Method, RouteTable};
    use std::sync::Arc;
    use std::time::Duration;

    fn operations() -> DeviceOperations {
        let registry = SessionRegistry::new("lwm2m", "rd", Arc::new(RouteTable::new()));
        DeviceOperations::new(registry, OperationsConfig::default())
    }

    #[tokio::test]
    async fn test_read_returns_payload() {
        let operations = operations();
        let mut link = MockLink::new();
        link.expect_exchange()
            .withf(|request, timeout| {
                request.method == Method::Get
                    && request.path_string() == "3/0/1"
                    && request.accept == Some(ContentFormat::SenmlJson)
                    && *timeout == Duration::from_secs(1)
            })
            .times(1)
            .returning(|_, _| {
                Ok(Response::new(Code::CONTENT).with_payload(r#"[{"n":"/3/0/1","vs":"lwm2m"}]"#))
            });
        operations
            .registry()
            .register("dev1", 60, "</3/0>", Arc::new(link))
            .await
            .unwrap();

        let value = operations.read("dev1", "/3/0/1").await.unwrap();
        assert_eq!(value, r#"[{"n":"/3/0/1","vs":"lwm2m"}]"#);
    }

    #[tokio::test]
    async fn test_discover_returns_link_format() {
        let operations = operations();
        let mut link = MockLink::new();
        link.expect_exchange()
            .withf(|request, _| request.accept == Some(ContentFormat::LinkFormat))
            .returning(|_, _| Ok(Response::new(Code::CONTENT).with_payload("</3/0/0>,</3/0/1>")));
        operations
            .registry()
            .register("dev1", 60, "", Arc::new(link))
            .await
            .unwrap();

        let links = operations.discover("dev1", "/3/0").await.unwrap();
        assert_eq!(links, "</3/0/0>,</3/0/1>");
    }

    #[tokio::test]
    async fn test_write_sends_payload() {
        let operations = operations();
        let mut link = MockLink::new();
        link.expect_exchange()
            .withf(|request, _| {
                request.method == Method::Put
                    && request.content_format == Some(ContentFormat::SenmlJson)
                    && request.payload == b"[{\"v\":300}]"
            })
            .times(1)
            .returning(|_, _| Ok(Response::new(Code::CHANGED)));
        operations
            .registry()
            .register("dev1", 60, "", Arc::new(link))
            .await
            .unwrap();

        operations.write("dev1", "/1/0/1", "[{\"v\":300}]").await.unwrap();
    }

    #[tokio::test]
    async fn test_finish_posts_to_bootstrap_path() {
        let operations = operations();
        let mut link = MockLink::new();
        link.expect_exchange()
            .withf(|request, _| {
                request.method == Method::Post
                    && request.path_string() == "bs"
                    && request.content_format == Some(ContentFormat::LinkFormat)
                    && request.payload.is_empty()
            })
            .times(1)
            .returning(|_, _| Ok(Response::new(Code::CHANGED)));
        operations
            .registry()
            .register("dev1", 60, "", Arc::new(link))
            .await
            .unwrap();

        operations.finish("dev1").await.unwrap();
    }

    #[tokio::test]
    async fn test_unexpected_code_fails() {
        let operations = operations();
        operations
            .registry()
            .register("dev1", 60, "", answering_link(Code::NOT_FOUND, ""))
            .await
            .unwrap();

        let result = operations.delete("dev1", "/1/0").await;
        assert!(matches!(
            result,
            Err(Lwm2mError::ExchangeFailed(ref code)) if code == "4.04 Not Found"
        ));

        // 2.05 is a success code but not the acknowledgment a write needs
        let operations = self::operations();
        operations
            .registry()
            .register("dev1", 60, "", answering_link(Code::CONTENT, "0"))
            .await
            .unwrap();
        let result = operations.write("dev1", "/1/0/1", "0").await;
        assert!(matches!(result, Err(Lwm2mError::ExchangeFailed(_))));
    }

    #[tokio::test]
    async fn test_transport_failure_is_exchange_failure() {
        let operations = operations();
        operations
            .registry()
            .register("dev1", 60, "", Arc::new(BrokenLink))
            .await
            .unwrap();

        let result = operations.read("dev1", "/3/0").await;
        assert!(matches!(
            result,
            Err(Lwm2mError::ExchangeFailed(ref cause)) if cause.contains("refused")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_device_times_out() {
        let operations = operations();
        operations
            .registry()
            .register(
                "dev1",
                60,
                "",
                Arc::new(SlowLink {
                    delay: Duration::from_secs(5),
                }),
            )
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        let result = operations.read("dev1", "/3/0").await;
        assert!(matches!(result, Err(Lwm2mError::ExchangeFailed(ref cause)) if cause == "Timeout"));
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(2));

        // the session lifetime is unaffected
        assert!(operations.registry().lookup("dev1").await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_endpoint_sends_nothing() {
        let operations = operations();
        let mut link = MockLink::new();
        link.expect_exchange().never();
        operations
            .registry()
            .register("dev1", 60, "", Arc::new(link))
            .await
            .unwrap();

        let result = operations.write("dev2", "/1/0/1", "data").await;
        assert!(matches!(result, Err(Lwm2mError::NotFound(ref ep)) if ep == "dev2"));

        let result = operations.finish("dev2").await;
        assert!(matches!(result, Err(Lwm2mError::NotFound(_))));
    }
}
