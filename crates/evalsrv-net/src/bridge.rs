//! Outbound HTTP Bridge — the host-side implementation of `fetch` exposed
//! to the guest.
//!
//! One [`OutboundBridge`] is built at startup and shared across
//! evaluations (building the underlying `reqwest::Client` — and therefore
//! the connection pool and the guarded resolver — is not free). Per-call
//! state (the in-flight counter) is reset defensively between evaluations
//! even though the Admission Queue's serialization already guarantees it
//! is zero at that point (spec §9, "Counter reset").

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use evalsrv_core::PotatContext;

use crate::address_guard::guard_or_fail;
use crate::dns_guard::GuardedResolver;

const FETCH_TIMEOUT: Duration = Duration::from_millis(5000);
const USER_AGENT: &str =
    "Sandbox Unsafe JavaScript Execution Environment - https://github.com/RyanPotat/eval-server/";

/// Response bodies are capped well under the isolate's 8 MiB heap so that a
/// single huge guest-initiated download cannot itself trip the isolate's
/// memory budget before the guest even gets to inspect it (spec §1:
/// "response-size bounds" on the bridge).
const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024;

/// Options accepted from the guest's `fetch(url, options)` call. Mirrors
/// (a subset of) the WHATWG `RequestInit` shape closely enough for the
/// snippets this service expects to run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FetchOptions {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
}

/// The value-copied response handed back into the guest.
#[derive(Debug, Clone, Serialize)]
pub struct FetchResponse {
    pub body: Value,
    pub status: u16,
}

impl FetchResponse {
    fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            body: Value::String(body.into()),
            status,
        }
    }
}

/// Dropped at the end of a `fetch` call; always decrements `inflight`,
/// whatever the outcome — the in-process analogue of a `finally` block.
struct InflightGuard<'a>(&'a AtomicU32);

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct OutboundBridge {
    client: reqwest::Client,
    max_concurrency: u32,
    inflight: AtomicU32,
}

impl OutboundBridge {
    pub fn new(max_concurrency: u32) -> anyhow::Result<Self> {
        let resolver = GuardedResolver::new()?;
        let client = reqwest::Client::builder()
            .dns_resolver(Arc::new(resolver))
            .redirect(reqwest::redirect::Policy::none())
            .timeout(FETCH_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            max_concurrency,
            inflight: AtomicU32::new(0),
        })
    }

    /// Reset the in-flight counter to zero. Called by the Isolate Runner
    /// between evaluations; defensive, since serialization already
    /// guarantees it is zero (spec §9).
    pub fn reset_inflight(&self) {
        self.inflight.store(0, Ordering::SeqCst);
    }

    /// Execute a guest-initiated `fetch`. Never returns `Err` — every
    /// failure mode is mapped to a synthetic response per spec §4.2/§7.
    pub async fn fetch(&self, url: &str, options: FetchOptions, ctx: &PotatContext) -> FetchResponse {
        let current = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        if current > self.max_concurrency {
            self.inflight.fetch_sub(1, Ordering::SeqCst);
            warn!(potat_id = %ctx.id, %current, max = self.max_concurrency, "fetch rejected: too many in-flight");
            return FetchResponse::text(429, "Too many requests.");
        }
        let _guard = InflightGuard(&self.inflight);

        if let Some(host) = extract_host(url) {
            if let Err(blocked) = guard_or_fail(&host) {
                warn!(potat_id = %ctx.id, host = %blocked.0, "fetch rejected: blocked address literal");
                return FetchResponse::text(400, format!("Request failed - {blocked}"));
            }
        }

        let method = match options
            .method
            .as_deref()
            .unwrap_or("GET")
            .parse::<reqwest::Method>()
        {
            Ok(m) => m,
            Err(_) => return FetchResponse::text(400, "Request failed - InvalidMethod: unknown HTTP method"),
        };

        let mut request = self.client.request(method, url);

        if let Some(headers) = &options.headers {
            request = request.headers(build_header_map(headers));
        }
        if let Some(body) = options.body.clone() {
            request = request.body(body);
        }

        let potat_json = serde_json::to_string(ctx).unwrap_or_else(|_| "{}".to_string());
        request = request
            .header("User-Agent", USER_AGENT)
            .header("x-potat-data", potat_json);

        debug!(potat_id = %ctx.id, %url, "dispatching guest fetch");

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(err) if err.is_timeout() => {
                warn!(potat_id = %ctx.id, %url, "fetch timed out");
                return FetchResponse::text(408, "Request timed out.");
            }
            Err(err) => {
                warn!(potat_id = %ctx.id, %url, error = %err, "fetch transport error");
                return FetchResponse::text(400, format!("Request failed - {}", transport_error_kind(&err)));
            }
        };

        let status = response.status().as_u16();
        let bytes = match read_capped_body(response).await {
            Ok(b) => b,
            Err(err) => {
                warn!(potat_id = %ctx.id, %url, error = %err, "fetch body read failed");
                return FetchResponse::text(400, format!("Request failed - {}", transport_error_kind(&err)));
            }
        };

        let body = match std::str::from_utf8(&bytes) {
            Ok(text) => match serde_json::from_str::<Value>(text) {
                Ok(json) => json,
                Err(_) => Value::String(text.to_string()),
            },
            Err(_) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        };

        FetchResponse { body, status }
    }
}

/// Read the response body as a stream, stopping (and discarding the
/// connection) the moment it would exceed [`MAX_RESPONSE_BYTES`] rather
/// than buffering an unbounded payload into memory first.
async fn read_capped_body(response: reqwest::Response) -> Result<Vec<u8>, reqwest::Error> {
    let mut buf = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buf.extend_from_slice(&chunk);
        if buf.len() > MAX_RESPONSE_BYTES {
            buf.truncate(MAX_RESPONSE_BYTES);
            break;
        }
    }
    Ok(buf)
}

fn build_header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (k, v) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(k.as_bytes()),
            HeaderValue::from_str(v),
        ) {
            map.insert(name, value);
        }
    }
    map
}

fn extract_host(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

/// A short, human-readable transport error kind, since `reqwest::Error`'s
/// `Display` output is verbose and may leak internal detail.
fn transport_error_kind(err: &reqwest::Error) -> String {
    let kind = if err.is_connect() {
        "ConnectionError"
    } else if err.is_request() {
        "RequestError"
    } else if err.is_decode() {
        "DecodeError"
    } else if err.is_redirect() {
        "RedirectError"
    } else {
        "TransportError"
    };
    format!("{kind}: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn ctx() -> PotatContext {
        PotatContext::from_msg(&Value::Null)
    }

    #[tokio::test]
    async fn blocks_literal_private_ip_without_connecting() {
        let bridge = OutboundBridge::new(5).unwrap();
        let resp = bridge.fetch("http://127.0.0.1/", FetchOptions::default(), &ctx()).await;
        assert_eq!(resp.status, 400);
        assert!(matches!(&resp.body, Value::String(s) if s.contains("BlockedAddress")));
    }

    #[tokio::test]
    async fn blocks_metadata_endpoint() {
        let bridge = OutboundBridge::new(5).unwrap();
        let resp = bridge
            .fetch("http://169.254.169.254/latest/meta-data/", FetchOptions::default(), &ctx())
            .await;
        assert_eq!(resp.status, 400);
    }

    #[tokio::test]
    async fn rejects_when_over_concurrency_limit() {
        let bridge = OutboundBridge::new(5).unwrap();
        // Saturate the counter directly, bypassing real requests.
        bridge.inflight.store(5, Ordering::SeqCst);
        let resp = bridge.fetch("http://127.0.0.1/", FetchOptions::default(), &ctx()).await;
        assert_eq!(resp.status, 429);
        assert!(matches!(&resp.body, Value::String(s) if s == "Too many requests."));
    }

    #[test]
    fn reset_inflight_zeroes_counter() {
        let bridge = OutboundBridge::new(5).unwrap();
        bridge.inflight.store(3, Ordering::SeqCst);
        bridge.reset_inflight();
        assert_eq!(bridge.inflight.load(Ordering::SeqCst), 0);
    }

    /// Spawns a tiny loopback HTTP server backed by raw `TcpListener`
    /// accepts (no framework dependency needed for a fixed response),
    /// writes `response` back verbatim, and hands the raw request text it
    /// received to the caller via `request_tx` so header injection can be
    /// asserted on.
    async fn spawn_loopback_server(
        response: &'static str,
    ) -> (std::net::SocketAddr, oneshot::Receiver<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).into_owned();
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
                let _ = tx.send(request);
            }
        });

        (addr, rx)
    }

    #[tokio::test]
    async fn fetch_decodes_json_body_and_injects_headers() {
        let body = "{\"ok\":true,\"n\":1}";
        let raw = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{body}",
            body.len()
        );
        let (addr, request_rx) = spawn_loopback_server(Box::leak(raw.into_boxed_str())).await;

        let bridge = OutboundBridge::new(5).unwrap();
        let url = format!("http://{addr}/");
        let resp = bridge.fetch(&url, FetchOptions::default(), &ctx()).await;

        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, serde_json::json!({"ok": true, "n": 1}));

        let request = request_rx.await.unwrap();
        assert!(request.contains("user-agent: Sandbox Unsafe JavaScript Execution Environment"));
        assert!(request.to_lowercase().contains("x-potat-data:"));
    }

    #[tokio::test]
    async fn fetch_falls_back_to_raw_text_for_non_json_body() {
        let raw = "HTTP/1.1 201 Created\r\ncontent-length: 11\r\n\r\nhello there";
        let (addr, _request_rx) = spawn_loopback_server(raw).await;

        let bridge = OutboundBridge::new(5).unwrap();
        let url = format!("http://{addr}/");
        let resp = bridge.fetch(&url, FetchOptions::default(), &ctx()).await;

        assert_eq!(resp.status, 201);
        assert_eq!(resp.body, Value::String("hello there".to_string()));
    }

    fn fake_response(body: Vec<u8>) -> reqwest::Response {
        let http_response = http::Response::builder()
            .status(200)
            .body(reqwest::Body::from(body))
            .unwrap();
        reqwest::Response::from(http_response)
    }

    #[tokio::test]
    async fn read_capped_body_passes_small_bodies_through_untouched() {
        let body = b"hello world".to_vec();
        let read = read_capped_body(fake_response(body.clone())).await.unwrap();
        assert_eq!(read, body);
    }

    #[tokio::test]
    async fn read_capped_body_truncates_oversized_bodies() {
        let body = vec![b'x'; MAX_RESPONSE_BYTES + 1024];
        let read = read_capped_body(fake_response(body)).await.unwrap();
        assert_eq!(read.len(), MAX_RESPONSE_BYTES);
    }
}
