// src/proxy/transport.rs
use super::error::ProxyError;
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Request, Response};
use hyper_tls::HttpsConnector;

/// Sends one fully-built request upstream.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError>;
}

/// hyper client over an https-capable connector; plain `http://` backends
/// go through the same connector.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl HyperTransport {
    pub fn new() -> Self {
        let client = Client::builder().build::<_, Body>(HttpsConnector::new());
        Self { client }
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        self.client.request(req).await.map_err(ProxyError::from_hyper)
    }
}
