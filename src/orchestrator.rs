//! Orchestrator: owns lifecycle, routes `search`/`execute` to the right
//! subsystem, injects the right capability set, and formats sandbox results
//! for a transport-agnostic embedder. See `mcp` for the one transport
//! adapter this crate ships (an `rmcp` stdio server).

use crate::bridge::{self, BridgeOptions, RequestHandler, SandboxRequest};
use crate::error::ConfigError;
use crate::sandbox::{self, ExecuteOutcome, Global, HostFn, NamespaceMember, SandboxConfig, SandboxExecutor};
use crate::spec::{self, ProcessedSpec, SpecContext};
use crate::tools::{self, ToolDescriptor, ToolResult};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};

/// Reserved identifiers a configured `namespace` must not shadow: built-ins
/// the agent might rely on, the `spec` binding used by `search`, and the
/// ambient `console`/`global` identifiers.
const RESERVED_NAMES: &[&str] = &[
    "Object", "Array", "Promise", "Function", "String", "Number", "Boolean", "Symbol", "Map",
    "Set", "WeakMap", "WeakSet", "Date", "RegExp", "Error", "JSON", "Math", "Proxy", "Reflect",
    "globalThis", "undefined", "null", "NaN", "Infinity", "console", "spec", "global",
];

/// Either an already-resolved OpenAPI document, or an async producer of one
/// (fetched lazily on the first `search` call).
#[derive(Clone)]
pub enum SpecSource {
    Value(Value),
    Producer(
        Arc<
            dyn Fn() -> futures::future::BoxFuture<'static, Result<Value, String>> + Send + Sync,
        >,
    ),
}

/// Construction-time configuration for an [`Orchestrator`].
#[derive(Clone)]
pub struct OrchestratorConfig {
    pub spec: SpecSource,
    pub request: RequestHandler,
    pub namespace: String,
    pub base_url: String,
    pub sandbox: SandboxConfig,
    pub max_response_tokens: u32,
    pub max_requests: u32,
    pub max_response_bytes: u64,
    pub allowed_headers: Option<Vec<String>>,
    pub max_ref_depth: usize,
}

impl OrchestratorConfig {
    /// Convenience constructor with every default from §6 except the two
    /// fields every embedder must supply.
    #[must_use]
    pub fn new(spec: SpecSource, request: RequestHandler) -> Self {
        Self {
            spec,
            request,
            namespace: "api".to_string(),
            base_url: "http://localhost".to_string(),
            sandbox: SandboxConfig::default(),
            max_response_tokens: 25_000,
            max_requests: 50,
            max_response_bytes: 10 * 1024 * 1024,
            allowed_headers: None,
            max_ref_depth: 50,
        }
    }
}

struct SpecBundle {
    processed: ProcessedSpec,
    context: SpecContext,
}

fn validate_namespace(namespace: &str) -> Result<(), ConfigError> {
    let mut chars = namespace.chars();
    let starts_valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$');
    let rest_valid = chars.clone().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');

    if namespace.is_empty() || !starts_valid || !rest_valid {
        return Err(ConfigError::InvalidIdentifier {
            namespace: namespace.to_string(),
        });
    }
    if RESERVED_NAMES.contains(&namespace) {
        return Err(ConfigError::ReservedNamespace {
            namespace: namespace.to_string(),
        });
    }
    Ok(())
}

/// Owns the spec/sandbox/bridge subsystems and exposes the two tools to a
/// transport adapter. Reentrant: overlapping `search`/`execute` calls are
/// supported, each with its own sandbox context and (for `execute`) its own
/// bridge closure.
pub struct Orchestrator {
    config: OrchestratorConfig,
    spec_cell: OnceCell<Arc<SpecBundle>>,
    executor_cell: RwLock<Arc<OnceCell<Arc<SandboxExecutor>>>>,
    search_name: RwLock<String>,
    execute_name: RwLock<String>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Validates `config.namespace` synchronously; this is the only error
    /// that can propagate as an `Err` from the public API.
    pub fn new(config: OrchestratorConfig) -> Result<Self, ConfigError> {
        if let Err(e) = validate_namespace(&config.namespace) {
            tracing::error!(namespace = %config.namespace, code = e.code(), "{e}");
            return Err(e);
        }
        Ok(Self {
            config,
            spec_cell: OnceCell::new(),
            executor_cell: RwLock::new(Arc::new(OnceCell::new())),
            search_name: RwLock::new("search".to_string()),
            execute_name: RwLock::new("execute".to_string()),
        })
    }

    pub async fn set_tool_names(&self, search_name: impl Into<String>, execute_name: impl Into<String>) {
        *self.search_name.write().await = search_name.into();
        *self.execute_name.write().await = execute_name.into();
    }

    /// Drops the cached executor. Not required to survive: a subsequent
    /// call simply rebuilds it lazily, which is more useful to a long-lived
    /// embedder than erroring until a fresh `Orchestrator` is constructed.
    pub async fn dispose(&self) {
        let mut slot = self.executor_cell.write().await;
        *slot = Arc::new(OnceCell::new());
    }

    pub async fn tools(&self) -> [ToolDescriptor; 2] {
        let context = self.spec_cell.get().map(|bundle| bundle.context.clone());
        let search_name = self.search_name.read().await.clone();
        let execute_name = self.execute_name.read().await.clone();
        [
            tools::build_search_tool(&search_name, context.as_ref()),
            tools::build_execute_tool(&execute_name, &self.config.namespace),
        ]
    }

    pub async fn call_tool(&self, name: &str, code: String) -> ToolResult {
        let search_name = self.search_name.read().await.clone();
        let execute_name = self.execute_name.read().await.clone();
        if name == search_name {
            self.search(code).await
        } else if name == execute_name {
            self.execute(code).await
        } else {
            ToolResult::error(format!("Unknown tool: {name}"))
        }
    }

    /// Injects the processed spec under `spec` and runs `code`.
    pub async fn search(&self, code: String) -> ToolResult {
        let bundle = match self.spec_bundle().await {
            Ok(bundle) => bundle,
            Err(message) => return ToolResult::error(format!("Error: {message}")),
        };
        let spec_value = match serde_json::to_value(&bundle.processed) {
            Ok(value) => value,
            Err(e) => return ToolResult::error(format!("Error: failed to serialise spec: {e}")),
        };

        let mut globals = BTreeMap::new();
        globals.insert("spec".to_string(), Global::Data(spec_value));

        let executor = self.executor().await;
        self.run_sandboxed(&executor, &code, globals).await
    }

    /// Constructs a fresh request bridge (zeroing its request counter) and
    /// injects it under `{namespace}.request`, then runs `code`.
    pub async fn execute(&self, code: String) -> ToolResult {
        let bridge = bridge::create_request_bridge(
            Arc::clone(&self.config.request),
            self.config.base_url.clone(),
            BridgeOptions {
                max_requests: self.config.max_requests,
                max_response_bytes: self.config.max_response_bytes,
                allowed_headers: self.config.allowed_headers.clone(),
            },
        );

        let request_fn: HostFn = Arc::new(move |args: Vec<Value>| {
            let bridge = Arc::clone(&bridge);
            Box::pin(async move {
                let request_value = args.into_iter().next().unwrap_or(Value::Null);
                let request: SandboxRequest = serde_json::from_value(request_value)
                    .map_err(|e| format!("Invalid request: {e}"))?;
                let response = bridge(request).await?;
                serde_json::to_value(&response).map_err(|e| e.to_string())
            })
        });

        let mut members = BTreeMap::new();
        members.insert("request".to_string(), NamespaceMember::Function(request_fn));
        let mut globals = BTreeMap::new();
        globals.insert(self.config.namespace.clone(), Global::Namespace(members));

        let executor = self.executor().await;
        self.run_sandboxed(&executor, &code, globals).await
    }

    async fn spec_bundle(&self) -> Result<Arc<SpecBundle>, String> {
        self.spec_cell
            .get_or_try_init(|| async {
                let doc = match &self.config.spec {
                    SpecSource::Value(value) => value.clone(),
                    SpecSource::Producer(producer) => producer()
                        .await
                        .map_err(|e| format!("Fetching the spec failed: {e}"))?,
                };
                let processed = spec::process_spec(&doc, self.config.max_ref_depth)
                    .map_err(|e| {
                        tracing::warn!(code = e.code(), "spec processing failed: {e}");
                        e.to_string()
                    })?;
                let context = spec::build_spec_context(&processed, &doc);
                tracing::debug!(
                    endpoints = context.endpoint_count,
                    tags = context.tags.len(),
                    "spec processed and cached"
                );
                Ok::<_, String>(Arc::new(SpecBundle { processed, context }))
            })
            .await
            .cloned()
    }

    async fn executor(&self) -> Arc<SandboxExecutor> {
        let cell = self.executor_cell.read().await.clone();
        cell.get_or_init(|| async { Arc::new(SandboxExecutor::new(self.config.sandbox)) })
            .await
            .clone()
    }

    /// Races the sandbox run against a wall-clock cap, since the sandbox's
    /// own `timeout_ms` only bounds CPU-bound loops, not suspension on
    /// awaited host I/O via the bridge.
    async fn run_sandboxed(
        &self,
        executor: &SandboxExecutor,
        code: &str,
        globals: BTreeMap<String, Global>,
    ) -> ToolResult {
        let wall_clock_ms = (self.config.sandbox.timeout_ms.saturating_mul(3)).max(10_000);
        let outcome = match tokio::time::timeout(
            Duration::from_millis(wall_clock_ms),
            executor.execute(code, globals),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => ExecuteOutcome {
                result: None,
                error: Some(format!(
                    "Execution exceeded wall-clock limit of {wall_clock_ms}ms"
                )),
            },
        };
        self.format_result(outcome)
    }

    fn format_result(&self, outcome: ExecuteOutcome) -> ToolResult {
        if let Some(error) = outcome.error {
            tracing::warn!("sandbox call failed: {error}");
            return ToolResult::error(format!("Error: {error}"));
        }

        let value = outcome.result.unwrap_or(Value::Null);
        let text = match &value {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        };
        ToolResult::ok(truncate_to_token_budget(&text, self.config.max_response_tokens))
    }
}

/// Truncates `text` to at most `max_response_tokens * 4` characters,
/// appending a delimiter and an estimated-token-count note on truncation.
fn truncate_to_token_budget(text: &str, max_response_tokens: u32) -> String {
    let max_chars = max_response_tokens as usize * 4;
    if text.len() <= max_chars {
        return text.to_string();
    }
    let safe_cut = text.floor_char_boundary(max_chars);
    let mut truncated = text[..safe_cut].to_string();
    let estimated_tokens = crate::types::TokenEstimate::of_str(text);
    truncated.push_str(&format!(
        "\n---\n[TRUNCATED: response is ~{estimated_tokens} tokens, exceeding the configured limit of {max_response_tokens}]"
    ));
    truncated
}
