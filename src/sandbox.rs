//! Sandbox Executor: a single-shot, memory-/CPU-/wall-time-bounded QuickJS
//! host. One `execute` call compiles and runs exactly one piece of
//! agent-authored code inside a fresh interpreter context, injects host
//! values as deep copies, exposes host functions as async callables, and
//! marshals one returned value back out.
//!
//! Commits to QuickJS via `rquickjs` as the sole sandbox backend (see
//! DESIGN.md) rather than shipping a second, weaker fallback.

use crate::error::SandboxError;
use futures::future::BoxFuture;
use rquickjs::function::{Async, Rest};
use rquickjs::{
    AsyncContext, AsyncRuntime, CatchResultExt, Ctx, Function, Object, Promise, Value as JsValue,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A host-side callback reachable from sandbox code. Arguments and return
/// value are plain `serde_json::Value`s — the boundary itself is where the
/// deep copy happens, so nothing JS-shaped ever crosses it.
pub type HostFn =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// One entry of a [`Global::Namespace`] object.
pub enum NamespaceMember {
    Function(HostFn),
    Data(Value),
}

/// A value injected into a sandbox run under a top-level global name.
pub enum Global {
    /// Exposed as a bare async callable global.
    Function(HostFn),
    /// Exposed as an object global; function-valued members become async
    /// callables, everything else is deep-copied data.
    Namespace(BTreeMap<String, NamespaceMember>),
    /// Deep-copied as inert data, no callable surface.
    Data(Value),
}

/// Per-call sandbox limits.
#[derive(Debug, Clone, Copy)]
pub struct SandboxConfig {
    pub memory_mb: u64,
    pub timeout_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_mb: 64,
            timeout_ms: 30_000,
        }
    }
}

/// The result of one `execute` call. Exactly one of `result`/`error` is
/// meaningfully populated.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecuteOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecuteOutcome {
    fn ok(result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(message.into()),
        }
    }
}

/// Runs one agent program per [`execute`](SandboxExecutor::execute) call.
///
/// Holds only configuration: every call builds its own [`AsyncRuntime`] so a
/// run that exhausts its memory cap cannot starve a subsequent run sharing
/// heap accounting, and so no named binding or global assignment can survive
/// between calls.
pub struct SandboxExecutor {
    config: SandboxConfig,
}

impl SandboxExecutor {
    #[must_use]
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Evaluates `code` wrapped as `(<code>)()`, expecting it to produce an
    /// async zero-argument function. Never returns an `Err` — every failure
    /// mode (compile error, thrown exception, timeout, OOM, non-copyable
    /// result) is folded into `ExecuteOutcome.error`.
    pub async fn execute(&self, code: &str, globals: BTreeMap<String, Global>) -> ExecuteOutcome {
        tracing::debug!(
            bytes = code.len(),
            globals = globals.len(),
            timeout_ms = self.config.timeout_ms,
            "executing sandboxed call"
        );
        match self.run(code, globals).await {
            Ok(value) => ExecuteOutcome::ok(value),
            Err(message) => {
                tracing::warn!("sandbox run failed: {message}");
                ExecuteOutcome::failed(message)
            }
        }
    }

    async fn run(&self, code: &str, globals: BTreeMap<String, Global>) -> Result<Value, String> {
        let runtime = AsyncRuntime::new()
            .map_err(|e| SandboxError::Internal(format!("runtime init failed: {e}")).to_string())?;
        runtime
            .set_memory_limit((self.config.memory_mb * 1024 * 1024) as usize)
            .await;

        let deadline = Instant::now() + Duration::from_millis(self.config.timeout_ms);
        runtime
            .set_interrupt_handler(Some(Box::new(move || Instant::now() >= deadline)))
            .await;

        let context = AsyncContext::full(&runtime)
            .await
            .map_err(|e| SandboxError::Internal(format!("context init failed: {e}")).to_string())?;

        let wrapped = format!("({code})()");
        let timeout_ms = self.config.timeout_ms;

        let outcome = rquickjs::async_with!(context => |ctx| {
            install_console_noop(&ctx).map_err(|e| classify(e, deadline, timeout_ms))?;
            for (name, global) in &globals {
                install_global(&ctx, name, global).map_err(|e| classify(e, deadline, timeout_ms))?;
            }

            let promise: Promise = ctx
                .eval(wrapped.as_bytes())
                .catch(&ctx)
                .map_err(|e| classify_caught(e, deadline, timeout_ms))?;
            let value: JsValue = promise
                .into_future()
                .await
                .catch(&ctx)
                .map_err(|e| classify_caught(e, deadline, timeout_ms))?;

            js_to_json(&value).map_err(|e| {
                SandboxError::CopyFailure(e.to_string()).to_string()
            })
        })
        .await;

        // Drains any stray background job before the context/runtime drop,
        // so a sandbox call never leaves work running past its own return.
        runtime.idle().await;
        outcome
    }
}

fn classify(err: rquickjs::Error, deadline: Instant, timeout_ms: u64) -> String {
    if Instant::now() >= deadline {
        return SandboxError::Timeout { timeout_ms }.to_string();
    }
    let message = err.to_string();
    if is_out_of_memory(&message) {
        return SandboxError::OutOfMemory.to_string();
    }
    message
}

fn classify_caught(err: rquickjs::CaughtError<'_>, deadline: Instant, timeout_ms: u64) -> String {
    if Instant::now() >= deadline {
        return SandboxError::Timeout { timeout_ms }.to_string();
    }
    let message = err.to_string();
    if is_out_of_memory(&message) {
        return SandboxError::OutOfMemory.to_string();
    }
    message
}

/// QuickJS throws an exception whose message is literally "out of memory"
/// (via `JS_ThrowOutOfMemory`) once an allocation would exceed the runtime's
/// configured memory limit; `rquickjs`'s own allocator wrapper reports the
/// same condition as an allocation failure before an exception is even
/// raised. Both surface here as plain text, so classification matches on the
/// message rather than a specific `rquickjs::Error` variant.
fn is_out_of_memory(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("out of memory") || lower.contains("allocation")
}

fn install_console_noop<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<()> {
    let console = Object::new(ctx.clone())?;
    let noop_log = Function::new(ctx.clone(), || {})?;
    let noop_warn = Function::new(ctx.clone(), || {})?;
    let noop_error = Function::new(ctx.clone(), || {})?;
    console.set("log", noop_log)?;
    console.set("warn", noop_warn)?;
    console.set("error", noop_error)?;
    ctx.globals().set("console", console)?;
    Ok(())
}

fn install_global<'js>(ctx: &Ctx<'js>, name: &str, global: &Global) -> rquickjs::Result<()> {
    match global {
        Global::Function(f) => {
            ctx.globals().set(name, bind_host_fn(ctx, Arc::clone(f))?)?;
        }
        Global::Namespace(members) => {
            let object = Object::new(ctx.clone())?;
            for (key, member) in members {
                match member {
                    NamespaceMember::Function(f) => {
                        object.set(key.as_str(), bind_host_fn(ctx, Arc::clone(f))?)?;
                    }
                    NamespaceMember::Data(value) => {
                        object.set(key.as_str(), json_to_js(ctx, value)?)?;
                    }
                }
            }
            ctx.globals().set(name, object)?;
        }
        Global::Data(value) => {
            ctx.globals().set(name, json_to_js(ctx, value)?)?;
        }
    }
    Ok(())
}

/// Exposes `f` as an async JS callable, regardless of whether the underlying
/// Rust closure is itself synchronous — arguments are deep-copied to JSON
/// before the host call, and the resolved value is deep-copied back.
fn bind_host_fn<'js>(ctx: &Ctx<'js>, f: HostFn) -> rquickjs::Result<Function<'js>> {
    Function::new(
        ctx.clone(),
        Async(move |ctx: Ctx<'js>, args: Rest<JsValue<'js>>| {
            let f = Arc::clone(&f);
            let json_args = args
                .0
                .iter()
                .map(js_to_json)
                .collect::<rquickjs::Result<Vec<Value>>>();
            async move {
                let json_args = json_args?;
                match f(json_args).await {
                    Ok(value) => json_to_js(&ctx, &value),
                    Err(message) => Err(rquickjs::Exception::throw_message(&ctx, &message)),
                }
            }
        }),
    )
}

fn json_to_js<'js>(ctx: &Ctx<'js>, value: &Value) -> rquickjs::Result<JsValue<'js>> {
    Ok(match value {
        Value::Null => JsValue::new_null(ctx.clone()),
        Value::Bool(b) => JsValue::new_bool(ctx.clone(), *b),
        Value::Number(n) => JsValue::new_number(ctx.clone(), n.as_f64().unwrap_or(f64::NAN)),
        Value::String(s) => rquickjs::String::from_str(ctx.clone(), s)?.into_value(),
        Value::Array(items) => {
            let array = rquickjs::Array::new(ctx.clone())?;
            for (index, item) in items.iter().enumerate() {
                array.set(index, json_to_js(ctx, item)?)?;
            }
            array.into_value()
        }
        Value::Object(map) => {
            let object = Object::new(ctx.clone())?;
            for (key, item) in map {
                object.set(key.as_str(), json_to_js(ctx, item)?)?;
            }
            object.into_value()
        }
    })
}

fn js_to_json<'js>(value: &JsValue<'js>) -> rquickjs::Result<Value> {
    if value.is_undefined() || value.is_null() {
        return Ok(Value::Null);
    }
    if let Some(b) = value.as_bool() {
        return Ok(Value::Bool(b));
    }
    if let Some(n) = value.as_number() {
        return Ok(serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null));
    }
    if let Some(s) = value.as_string() {
        return Ok(Value::String(s.to_string()?));
    }
    if let Some(array) = value.as_array() {
        let mut out = Vec::with_capacity(array.len());
        for item in array.iter::<JsValue>() {
            out.push(js_to_json(&item?)?);
        }
        return Ok(Value::Array(out));
    }
    if let Some(object) = value.as_object() {
        if object.as_function().is_some() {
            return Err(rquickjs::Error::new_from_js("function", "JSON value"));
        }
        let mut map = Map::new();
        for key in object.keys::<String>() {
            let key = key?;
            let item: JsValue = object.get(&key)?;
            map.insert(key, js_to_json(&item)?);
        }
        return Ok(Value::Object(map));
    }
    Err(rquickjs::Error::new_from_js("unsupported value", "JSON value"))
}
