//! Outbound request forwarding.
//!
//! A forward is modeled as a value: it completes with the backend's status,
//! headers and body, or it fails with a timeout or a transport error. The
//! router inspects that value to update the breaker and build the client
//! response in one place.

use crate::config::GatewayConfig;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use bytes::Bytes;
use reqwest::Client;
use tracing::debug;

/// Headers that never cross the proxy boundary.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const GATEWAY_TOKEN_HEADER: &str = "x-gateway-token";

/// The single result of one forward attempt.
#[derive(Debug)]
pub enum ForwardOutcome {
    /// The backend answered; status and body are relayed verbatim.
    Completed {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
    /// The hard deadline elapsed before a response arrived.
    TimedOut,
    /// Connection refused, reset, DNS failure and friends.
    TransportError {
        status: Option<StatusCode>,
        detail: String,
    },
}

pub struct Forwarder {
    client: Client,
    backend_rest_port: u16,
    gateway_token: HeaderValue,
}

impl Forwarder {
    pub fn new(config: &GatewayConfig) -> Result<Self, anyhow::Error> {
        let client = Client::builder()
            .timeout(config.server_timeout)
            .connect_timeout(config.server_timeout)
            .build()?;
        let gateway_token = HeaderValue::from_str(&config.gateway_secret)?;
        Ok(Self {
            client,
            backend_rest_port: config.backend_rest_port,
            gateway_token,
        })
    }

    /// Forwards the original request to `instance`, preserving method, path,
    /// query, body bytes and all non-hop-by-hop headers, and attaching the
    /// gateway token.
    pub async fn forward(
        &self,
        instance: &str,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> ForwardOutcome {
        let url = format!(
            "http://{}:{}{}",
            instance, self.backend_rest_port, path_and_query
        );
        debug!("Forwarding {} {}", method, url);

        let mut outbound = filter_request_headers(headers);
        outbound.insert(GATEWAY_TOKEN_HEADER, self.gateway_token.clone());

        let result = self
            .client
            .request(method, &url)
            .headers(outbound)
            .body(body)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return ForwardOutcome::TimedOut,
            Err(e) => {
                return ForwardOutcome::TransportError {
                    status: e.status(),
                    detail: e.to_string(),
                };
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        match response.bytes().await {
            Ok(body) => ForwardOutcome::Completed {
                status,
                headers,
                body,
            },
            Err(e) if e.is_timeout() => ForwardOutcome::TimedOut,
            Err(e) => ForwardOutcome::TransportError {
                status: Some(status),
                detail: e.to_string(),
            },
        }
    }
}

/// Copies request headers minus the hop-by-hop set. `Host` and
/// `Content-Length` are recomputed for the new connection.
fn filter_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::new();
    for (name, value) in headers {
        if is_hop_by_hop(name.as_str())
            || name == header::HOST
            || name == header::CONTENT_LENGTH
        {
            continue;
        }
        filtered.append(name, value.clone());
    }
    filtered
}

/// Copies backend response headers minus the hop-by-hop set; the framing
/// headers are rewritten by the server for the relayed body.
pub fn filter_response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::new();
    for (name, value) in headers {
        if is_hop_by_hop(name.as_str()) || name == header::CONTENT_LENGTH {
            continue;
        }
        filtered.append(name, value.clone());
    }
    filtered
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| name.eq_ignore_ascii_case(hop))
}
