//! In-memory transport for unit tests.

use crate::cache::CacheLayer;
use crate::config::{Config, GatewayConfig};
use crate::gateway::{OutboundRequest, RawResponse, RequestGateway, Transport, TransportError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Canned answer for a route.
#[derive(Debug, Clone)]
pub enum StubResponse {
    Reply { status: u16, body: String },
    Timeout,
    Broken(String),
    /// Sleeps, then answers with the inner response.
    Delayed(Duration, Box<StubResponse>),
}

impl StubResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        StubResponse::Reply {
            status: 200,
            body: body.into(),
        }
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self::ok(value.to_string())
    }

    pub fn status(status: u16) -> Self {
        StubResponse::Reply {
            status,
            body: String::new(),
        }
    }

    pub fn delayed(millis: u64, inner: StubResponse) -> Self {
        StubResponse::Delayed(Duration::from_millis(millis), Box::new(inner))
    }
}

/// Answers with the first route whose pattern is a substring of the URL.
/// Unrouted URLs get a 404.
#[derive(Default)]
pub struct StubTransport {
    routes: Mutex<Vec<(String, StubResponse)>>,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl StubTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(self: Arc<Self>, pattern: &str, response: StubResponse) -> Arc<Self> {
        self.routes
            .lock()
            .unwrap()
            .push((pattern.to_string(), response));
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requested_urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.url.clone())
            .collect()
    }

    pub fn last_request(&self) -> Option<OutboundRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn execute(&self, request: OutboundRequest) -> Result<RawResponse, TransportError> {
        let mut matched = self
            .routes
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| request.url.contains(pattern.as_str()))
            .map(|(_, response)| response.clone());
        self.requests.lock().unwrap().push(request);

        while let Some(StubResponse::Delayed(delay, inner)) = matched {
            tokio::time::sleep(delay).await;
            matched = Some(*inner);
        }

        match matched {
            Some(StubResponse::Reply { status, body }) => Ok(RawResponse { status, body }),
            Some(StubResponse::Timeout) => Err(TransportError::Timeout),
            Some(StubResponse::Broken(message)) => Err(TransportError::Failed(message)),
            Some(StubResponse::Delayed(..)) | None => Ok(RawResponse {
                status: 404,
                body: String::new(),
            }),
        }
    }
}

/// Shared services wired to a stub, with default configuration.
pub struct Harness {
    pub config: Config,
    pub cache: Arc<CacheLayer>,
    pub gateway: Arc<RequestGateway>,
}

impl Harness {
    pub fn new(stub: Arc<StubTransport>) -> Self {
        let config = Config::default();
        let cache = Arc::new(CacheLayer::new(1_000));
        let gateway = Arc::new(RequestGateway::new(
            &GatewayConfig::default(),
            stub,
            cache.clone(),
        ));

        Self {
            config,
            cache,
            gateway,
        }
    }
}

/// Reads a file from the `fixtures/` directory.
pub fn fixture(name: &str) -> String {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("fixture {}: {}", path.display(), e))
}
