//! Request/response exchange abstraction

use crate::request::{Request, Response};
use async_trait::async_trait;
use lwm2m_core::Lwm2mResult;
use std::time::Duration;

/// A single confirmable request/response round trip towards one device
///
/// This is the transport handle a session holds: every exchange is
/// independent and correlation state lives inside the implementation.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Send `request` and wait up to `timeout` for the matching response
    ///
    /// # Errors
    /// Returns `Timeout` if no response arrives in time, `Connection` for
    /// socket failures and `ExchangeFailed` if the peer resets the request
    async fn exchange(&self, request: Request, timeout: Duration) -> Lwm2mResult<Response>;
}
