//! Test doubles for the device link

use async_trait::async_trait;
use lwm2m_core::{Lwm2mError, Lwm2mResult};
use lwm2m_transport::{Code, Exchange, Request, Response};
use std::sync::Arc;
use std::time::Duration;

mockall::mock! {
    pub Link {}

    #[async_trait]
    impl Exchange for Link {
        async fn exchange(&self, request: Request, timeout: Duration) -> Lwm2mResult<Response>;
    }
}

/// Link that is never expected to be used
pub(crate) fn idle_link() -> Arc<dyn Exchange> {
    Arc::new(MockLink::new())
}

/// Link that answers every request with `code` and `payload`
pub(crate) fn answering_link(code: Code, payload: &str) -> Arc<dyn Exchange> {
    let payload = payload.to_string();
    let mut link = MockLink::new();
    link.expect_exchange()
        .returning(move |_, _| Ok(Response::new(code).with_payload(payload.clone())));
    Arc::new(link)
}

/// Link whose device takes `delay` to answer
pub(crate) struct SlowLink {
    pub delay: Duration,
}

#[async_trait]
impl Exchange for SlowLink {
    async fn exchange(&self, _request: Request, _timeout: Duration) -> Lwm2mResult<Response> {
        tokio::time::sleep(self.delay).await;
        Ok(Response::new(Code::CONTENT))
    }
}

/// Link that fails every exchange at the transport level
pub(crate) struct BrokenLink;

#[async_trait]
impl Exchange for BrokenLink {
    async fn exchange(&self, _request: Request, _timeout: Duration) -> Lwm2mResult<Response> {
        Err(Lwm2mError::Connection(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        )))
    }
}
