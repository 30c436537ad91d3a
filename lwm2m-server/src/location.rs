//! Per-session location routes (`rd/N`, `bs/N`)

use crate::registry::WeakRegistry;
use async_trait::async_trait;
use lwm2m_core::{Lwm2mError, Lwm2mResult};
use lwm2m_transport::{Code, Exchange, Method, Request, RequestHandler, Response};
use std::sync::Arc;

/// Parse an optional `lt` query value
///
/// # Errors
/// Returns `ProtocolViolation` for a non-numeric or zero lifetime
pub(crate) fn parse_lifetime(value: Option<&str>) -> Lwm2mResult<Option<u32>> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value.parse::<u32>() {
        Ok(0) | Err(_) => Err(Lwm2mError::ProtocolViolation(format!(
            "invalid lifetime: {}",
            value
        ))),
        Ok(lifetime) => Ok(Some(lifetime)),
    }
}

/// Response code reported to the device for a failed registry call
pub(crate) fn error_code(error: &Lwm2mError) -> Code {
    match error {
        Lwm2mError::NotFound(_) => Code::NOT_FOUND,
        Lwm2mError::ProtocolViolation(_) | Lwm2mError::InvalidData(_) => Code::BAD_REQUEST,
        _ => Code::INTERNAL_SERVER_ERROR,
    }
}

/// Handler installed at the location assigned to one session
///
/// POST is a registration update, DELETE a deregistration. The handler only
/// acts while the session still lives at this location.
pub(crate) struct LocationHandler {
    registry: WeakRegistry,
    endpoint: String,
    location: String,
}

impl LocationHandler {
    pub(crate) fn new(registry: WeakRegistry, endpoint: &str, location: &str) -> Self {
        Self {
            registry,
            endpoint: endpoint.to_string(),
            location: location.to_string(),
        }
    }

    async fn apply(&self, request: &Request) -> Lwm2mResult<Code> {
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| Lwm2mError::NotFound(self.endpoint.clone()))?;

        match request.method {
            Method::Post => {
                let lifetime = parse_lifetime(request.query("lt"))?;
                let objects = String::from_utf8_lossy(&request.payload);
                registry
                    .keep_alive_at(&self.endpoint, &self.location, lifetime, Some(&objects))
                    .await?;
                Ok(Code::CHANGED)
            }
            Method::Delete => {
                registry.deregister_at(&self.endpoint, &self.location).await?;
                Ok(Code::DELETED)
            }
            method => {
                log::warn!(
                    "[{}] Protocol violation: {} on /{}",
                    registry.name(),
                    method,
                    self.location
                );
                Ok(Code::METHOD_NOT_ALLOWED)
            }
        }
    }
}

#[async_trait]
impl RequestHandler for LocationHandler {
    async fn handle(&self, request: Request, _peer: Arc<dyn Exchange>) -> Response {
        match self.apply(&request).await {
            Ok(code) => Response::new(code),
            Err(e) => {
                log::warn!("/{} {}: {}", self.location, request.method, e);
                Response::new(error_code(&e))
            }
        }
    }
}
