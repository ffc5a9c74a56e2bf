//! Outbound HTTP with per-host circuit breaking.
//!
//! Every upstream call goes through [`RequestGateway`], which bounds it with a
//! timeout, optionally routes it through the CORS relay, and refuses to call a
//! host that has timed out too often within the failure window.

use crate::cache::CacheLayer;
use crate::config::GatewayConfig;
use crate::encoding;
use crate::error::SourceError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cache key prefix for per-host timeout counters.
const SENSOR_TIMEOUT_PREFIX: &str = "timeout_sensor/";

/// Sent as `x-requested-with` on every call.
const REQUESTED_WITH: &str = "hondana";

/// HTTP method of an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A fully prepared request, after relay rewriting.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Status and body of an upstream answer.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Failure below the HTTP layer.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// No answer before the deadline.
    Timeout,
    /// Anything else: DNS, connection, TLS, body read.
    Failed(String),
}

/// Sends requests over the network.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: OutboundRequest) -> Result<RawResponse, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport using the configured user agent and timeout.
    pub fn new(config: &GatewayConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: OutboundRequest) -> Result<RawResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.header("Content-Type", "application/json").body(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;

        Ok(RawResponse { status, body })
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Failed(err.to_string())
    }
}

/// Per-call options chosen by the adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Extra headers, applied after the global ones.
    pub headers: &'static [(&'static str, &'static str)],
    /// Route the call through the CORS relay when one is configured.
    pub use_relay: bool,
}

/// Relay endpoint and caller marker.
#[derive(Debug, Clone)]
struct Relay {
    base_url: String,
    marker: String,
}

impl Relay {
    fn wrap(&self, target: &str) -> String {
        format!(
            "{}/v1/cors/{}?source={}",
            self.base_url.trim_end_matches('/'),
            encoding::encode(target),
            self.marker
        )
    }
}

/// Circuit-breaking front door for every upstream call.
pub struct RequestGateway {
    transport: Arc<dyn Transport>,
    cache: Arc<CacheLayer>,
    timeout: Duration,
    failure_threshold: u32,
    failure_window: Duration,
    user_agent: String,
    relay: Option<Relay>,
}

impl RequestGateway {
    /// Creates a gateway. Circuit counters live in `cache`.
    pub fn new(config: &GatewayConfig, transport: Arc<dyn Transport>, cache: Arc<CacheLayer>) -> Self {
        let relay = config.relay_url.as_ref().map(|base_url| Relay {
            base_url: base_url.clone(),
            marker: config.relay_marker.clone(),
        });

        Self {
            transport,
            cache,
            timeout: config.request_timeout(),
            failure_threshold: config.failure_threshold,
            failure_window: config.failure_window(),
            user_agent: config.user_agent.clone(),
            relay,
        }
    }

    /// Issues a GET and returns the body of a 200 response.
    pub async fn get(&self, url: &str, options: FetchOptions) -> Result<RawResponse, SourceError> {
        self.fetch(Method::Get, url, None, options).await
    }

    /// Issues a POST with a JSON body.
    pub async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        options: FetchOptions,
    ) -> Result<RawResponse, SourceError> {
        self.fetch(Method::Post, url, Some(body.to_string()), options)
            .await
    }

    /// GETs `url` and deserializes the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        options: FetchOptions,
    ) -> Result<T, SourceError> {
        let response = self.get(url, options).await?;
        Ok(serde_json::from_str(&response.body)?)
    }

    async fn fetch(
        &self,
        method: Method,
        url: &str,
        body: Option<String>,
        options: FetchOptions,
    ) -> Result<RawResponse, SourceError> {
        let host = host_of(url)?;
        self.check_circuit(&host).await?;

        let request_url = match (&self.relay, options.use_relay) {
            (Some(relay), true) => relay.wrap(url),
            _ => url.to_string(),
        };

        let mut headers = vec![
            ("User-Agent".to_string(), self.user_agent.clone()),
            ("x-requested-with".to_string(), REQUESTED_WITH.to_string()),
        ];
        for (name, value) in options.headers {
            headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
            headers.push((name.to_string(), value.to_string()));
        }

        let request = OutboundRequest {
            method,
            url: request_url,
            headers,
            body,
        };

        debug!(%host, url, ?method, relayed = options.use_relay && self.relay.is_some(), "fetching");
        let outcome = tokio::time::timeout(self.timeout, self.transport.execute(request)).await;

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(TransportError::Timeout)) | Err(_) => {
                self.record_timeout(&host).await;
                return Err(SourceError::UpstreamTimeout {
                    url: url.to_string(),
                });
            }
            Ok(Err(TransportError::Failed(message))) => {
                return Err(SourceError::Request(message));
            }
        };

        if response.status != 200 {
            debug!(%host, url, status = response.status, "non-200 response");
            return Err(SourceError::UpstreamHttp {
                url: url.to_string(),
                status: response.status,
            });
        }

        Ok(response)
    }

    async fn check_circuit(&self, host: &str) -> Result<(), SourceError> {
        let failures = self.failures(host).await;
        if failures > self.failure_threshold {
            warn!(host, failures, "circuit open, refusing request");
            return Err(SourceError::ServiceDegraded {
                host: host.to_string(),
                retry_after_minutes: self.failure_window.as_secs() / 60,
            });
        }
        Ok(())
    }

    /// Read-increment-write without a lock; concurrent timeouts may under-count.
    async fn record_timeout(&self, host: &str) {
        let failures = self.failures(host).await + 1;
        self.cache
            .set(&sensor_key(host), failures, self.failure_window)
            .await;
        warn!(host, failures, "upstream timed out");
    }

    async fn failures(&self, host: &str) -> u32 {
        self.cache
            .get::<u32>(&sensor_key(host))
            .await
            .map_or(0, |count| *count)
    }
}

fn sensor_key(host: &str) -> String {
    format!("{}{}", SENSOR_TIMEOUT_PREFIX, host)
}

fn host_of(url: &str) -> Result<String, SourceError> {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
        .ok_or_else(|| SourceError::InvalidIdentifier(url.to_string()))
}
