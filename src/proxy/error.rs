// src/proxy/error.rs
use hyper::{Body, Response, StatusCode};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No backend available")]
    NoBackendAvailable,

    #[error("Upstream transport error: {0}")]
    UpstreamTransport(String),

    #[error("Upstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error("Malformed upstream response: {0}")]
    UpstreamProtocol(String),

    #[error("Invalid upstream target: {0}")]
    InvalidTarget(String),
}

impl ProxyError {
    /// Classify a hyper client error. Parse failures are the backend's
    /// protocol fault; everything else means the connection itself broke.
    pub fn from_hyper(err: hyper::Error) -> Self {
        if err.is_parse() || err.is_parse_status() || err.is_parse_too_large() {
            ProxyError::UpstreamProtocol(err.to_string())
        } else {
            ProxyError::UpstreamTransport(err.to_string())
        }
    }

    /// Errors that take the backend out of rotation.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProxyError::UpstreamTransport(_) | ProxyError::Timeout(_)
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoBackendAvailable => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::UpstreamTransport(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::UpstreamProtocol(_) => StatusCode::BAD_GATEWAY,
            ProxyError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
        }
    }
}

// Convert ProxyError to Hyper Response for error handling
impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let message = match err {
            ProxyError::NoBackendAvailable => "No available backend servers",
            ProxyError::UpstreamTransport(_) => "Bad gateway",
            ProxyError::Timeout(_) => "Gateway timeout",
            ProxyError::UpstreamProtocol(_) => "Bad gateway",
            ProxyError::InvalidTarget(_) => "Bad request",
        };

        let mut response = Response::new(Body::from(message));
        *response.status_mut() = err.status();
        response
    }
}
