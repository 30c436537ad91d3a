use thiserror::Error;

/// Main error type for LwM2M server operations
#[derive(Error, Debug)]
pub enum Lwm2mError {
    /// No live session for the named endpoint
    #[error("client not found: {0}")]
    NotFound(String),

    /// The per-session route could not be installed
    #[error("registration failed: {0}")]
    RegistrationFailed(String),

    /// Request/response exchange with a device did not succeed
    #[error("exchange failed: {0}")]
    ExchangeFailed(String),

    /// Malformed or out-of-order inbound message
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Timeout")]
    Timeout,

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Lwm2mError {
    /// Fold a transport-side failure into `ExchangeFailed`
    ///
    /// `NotFound` and errors that already are `ExchangeFailed` pass through
    /// unchanged; everything else keeps its message as the cause.
    pub fn into_exchange_failure(self) -> Self {
        match self {
            Lwm2mError::NotFound(_) | Lwm2mError::ExchangeFailed(_) => self,
            other => Lwm2mError::ExchangeFailed(other.to_string()),
        }
    }
}

/// Result type alias for LwM2M operations
pub type Lwm2mResult<T> = Result<T, Lwm2mError>;
