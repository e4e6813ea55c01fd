//! Request Bridge: the single egress channel from sandbox code to the
//! embedder-supplied HTTP handler.
//!
//! Validates method/path/headers, enforces a per-execution request count and
//! a streamed response-size cap, serialises bodies, and normalises responses
//! into the sandbox response shape. See `orchestrator`, which constructs a
//! fresh bridge (and therefore a fresh request counter) for every `execute`
//! call.

use crate::error::BridgeError;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, LazyLock};

const ALLOWED_METHODS: [&str; 7] = [
    "GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS",
];

/// Header-name patterns dropped in blocklist mode. Anchored and
/// case-insensitive; matched against the lower-cased header name.
static BLOCKED_HEADER_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"^authorization$",
        r"^cookie$",
        r"^host$",
        r"^origin$",
        r"^referer$",
        r"^x-forwarded-",
        r"^x-real-ip$",
        r"^x-client-ip$",
        r"^cf-connecting-ip$",
        r"^true-client-ip$",
        r"^proxy-",
        r"^transfer-encoding$",
        r"^connection$",
        r"^upgrade$",
        r"^te$",
    ])
    .expect("header blocklist patterns are valid regexes")
});

/// A request as constructed by sandbox code.
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxRequest {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub query: Option<Map<String, Value>>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub headers: Option<Map<String, Value>>,
}

/// A response handed back into the sandbox.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxResponse {
    pub status: u16,
    pub headers: Map<String, Value>,
    pub body: Value,
}

/// One outbound request as the bridge hands it to the embedder's handler.
#[derive(Debug, Clone)]
pub struct HandlerRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

/// The body of a handler response, read either as a byte-chunk stream (the
/// path that lets the bridge enforce `max_response_bytes` before the whole
/// body is buffered) or as one already-materialised text blob.
pub enum ResponseBody {
    Stream(BoxStream<'static, Result<Vec<u8>, String>>),
    Text(String),
}

/// A response from the embedder's HTTP handler.
pub struct HandlerResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

/// The embedder-supplied fetch-shaped handler. Receives a composed URL and
/// request-init record and returns a response; this is the only network
/// egress the sandbox can reach.
pub type RequestHandler =
    Arc<dyn Fn(HandlerRequest) -> BoxFuture<'static, Result<HandlerResponse, String>> + Send + Sync>;

/// The closure injected into the sandbox as `<namespace>.request`.
pub type RequestBridge =
    Arc<dyn Fn(SandboxRequest) -> BoxFuture<'static, Result<SandboxResponse, String>> + Send + Sync>;

/// Options controlling one bridge instance's egress policy.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub max_requests: u32,
    pub max_response_bytes: u64,
    pub allowed_headers: Option<Vec<String>>,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            max_requests: 50,
            max_response_bytes: 10 * 1024 * 1024,
            allowed_headers: None,
        }
    }
}

/// Builds a fresh request-bridge closure, with its own zeroed request
/// counter. The orchestrator calls this once per `execute` so the counter is
/// scoped to a single call, never to the orchestrator's lifetime.
pub fn create_request_bridge(
    handler: RequestHandler,
    base_url: String,
    options: BridgeOptions,
) -> RequestBridge {
    let counter = Arc::new(AtomicU32::new(0));
    Arc::new(move |request: SandboxRequest| {
        let handler = Arc::clone(&handler);
        let base_url = base_url.clone();
        let options = options.clone();
        let counter = Arc::clone(&counter);
        Box::pin(async move { call(&handler, &base_url, &options, &counter, request).await })
    })
}

async fn call(
    handler: &RequestHandler,
    base_url: &str,
    options: &BridgeOptions,
    counter: &AtomicU32,
    request: SandboxRequest,
) -> Result<SandboxResponse, String> {
    let seq = counter.fetch_add(1, Ordering::SeqCst) + 1;
    if seq > options.max_requests {
        let err = BridgeError::RequestLimitExceeded {
            max: options.max_requests,
        };
        tracing::warn!(code = err.code(), "{err}");
        return Err(err.to_string());
    }

    let method = request.method.to_uppercase();
    if !ALLOWED_METHODS.contains(&method.as_str()) {
        let err = BridgeError::InvalidMethod { method };
        tracing::warn!(code = err.code(), "{err}");
        return Err(err.to_string());
    }

    validate_path(&request.path).map_err(|e| {
        tracing::warn!(code = e.code(), "{e}");
        e.to_string()
    })?;

    tracing::debug!(method = %method, path = %request.path, seq, "dispatching bridged request");

    let url = compose_url(base_url, &request.path, request.query.as_ref());
    let mut headers = filter_headers(request.headers.as_ref(), options.allowed_headers.as_deref());

    let body = match request.body {
        Some(Value::Null) | None => None,
        Some(value) => {
            let encoded = serde_json::to_vec(&value)
                .map_err(|e| format!("Failed to serialise request body: {e}"))?;
            if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
                headers.push(("content-type".to_string(), "application/json".to_string()));
            }
            Some(encoded)
        }
    };

    let handler_request = HandlerRequest {
        url,
        method,
        headers,
        body,
    };

    let response = handler(handler_request)
        .await
        .map_err(|e| BridgeError::HandlerFailed(e).to_string())?;

    read_response(response, options.max_response_bytes).await
}

fn validate_path(path: &str) -> Result<(), BridgeError> {
    if path.contains("://") {
        return Err(BridgeError::InvalidPath {
            reason: "must not contain \"://\"".to_string(),
        });
    }
    if path.starts_with("//") {
        return Err(BridgeError::InvalidPath {
            reason: "must not start with \"//\"".to_string(),
        });
    }
    if !path.starts_with('/') {
        return Err(BridgeError::InvalidPath {
            reason: "must start with a single \"/\"".to_string(),
        });
    }
    if path.contains('\0') {
        return Err(BridgeError::InvalidPath {
            reason: "must not contain a null byte".to_string(),
        });
    }
    if path.contains('\r') || path.contains('\n') {
        return Err(BridgeError::InvalidPath {
            reason: "must not contain CR or LF".to_string(),
        });
    }
    if path.contains('\\') {
        return Err(BridgeError::InvalidPath {
            reason: "must not contain a backslash".to_string(),
        });
    }
    Ok(())
}

fn compose_url(base_url: &str, path: &str, query: Option<&Map<String, Value>>) -> String {
    let mut url = format!("{}{}", base_url.trim_end_matches('/'), path);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        let pairs: Vec<String> = query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(&stringify_query_value(v))))
            .collect();
        url.push('?');
        url.push_str(&pairs.join("&"));
    }
    url
}

fn stringify_query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn filter_headers(
    headers: Option<&Map<String, Value>>,
    allowed: Option<&[String]>,
) -> Vec<(String, String)> {
    let Some(headers) = headers else {
        return Vec::new();
    };

    let stringify = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    match allowed {
        Some(allowed) => headers
            .iter()
            .filter(|(name, _)| allowed.iter().any(|a| a.eq_ignore_ascii_case(name)))
            .map(|(name, value)| (name.clone(), stringify(value)))
            .collect(),
        None => headers
            .iter()
            .filter(|(name, _)| !BLOCKED_HEADER_PATTERNS.is_match(&name.to_lowercase()))
            .map(|(name, value)| (name.clone(), stringify(value)))
            .collect(),
    }
}

async fn read_response(
    response: HandlerResponse,
    max_response_bytes: u64,
) -> Result<SandboxResponse, String> {
    let text = match response.body {
        ResponseBody::Text(text) => {
            if text.len() as u64 > max_response_bytes {
                return Err(BridgeError::ResponseTooLarge {
                    max: max_response_bytes,
                }
                .to_string());
            }
            text
        }
        ResponseBody::Stream(mut stream) => {
            let mut buf: Vec<u8> = Vec::new();
            let mut total: u64 = 0;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                total += chunk.len() as u64;
                if total > max_response_bytes {
                    return Err(BridgeError::ResponseTooLarge {
                        max: max_response_bytes,
                    }
                    .to_string());
                }
                buf.extend_from_slice(&chunk);
            }
            String::from_utf8_lossy(&buf).into_owned()
        }
    };

    let mut headers = Map::new();
    let mut content_type = String::new();
    for (name, value) in &response.headers {
        if name.eq_ignore_ascii_case("content-type") {
            content_type = value.clone();
        }
        headers.insert(name.clone(), Value::String(value.clone()));
    }

    let body = if content_type.contains("application/json") {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    } else {
        Value::String(text)
    };

    Ok(SandboxResponse {
        status: response.status,
        headers,
        body,
    })
}
