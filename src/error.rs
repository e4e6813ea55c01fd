//! Error types for toolbridge.
//!
//! Uses thiserror for ergonomic error handling with proper error chain
//! propagation. Only `ConfigError` ever propagates to the embedder as an
//! `Err` from `Orchestrator::new`; every per-call failure (spec, sandbox,
//! bridge) is folded into a `ToolResult` instead — see `orchestrator`.

use thiserror::Error;

/// Top-level error, used where a single error type needs to span every
/// subsystem (e.g. CLI startup).
#[derive(Error, Debug)]
pub enum ToolBridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Spec error: {0}")]
    Spec(#[from] SpecError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Construction-time error, returned synchronously from `Orchestrator::new`.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid namespace \"{namespace}\": must be a valid JavaScript identifier")]
    InvalidIdentifier { namespace: String },

    #[error("Invalid namespace \"{namespace}\": conflicts with reserved name")]
    ReservedNamespace { namespace: String },
}

/// Errors raised while resolving `$ref`s and flattening an OpenAPI document.
#[derive(Error, Debug, Clone)]
pub enum SpecError {
    #[error("Spec document is not a JSON object")]
    NotAnObject,

    #[error("Fetching the spec failed: {0}")]
    SourceFailed(String),
}

/// Errors raised inside the sandbox executor.
///
/// These never escape `SandboxExecutor::execute` as an `Err` — they are
/// always folded into `ExecuteOutcome.error` — but a typed enum keeps
/// `code()` a stable classification for logging.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Compilation failed: {0}")]
    Compile(String),

    #[error("{0}")]
    Thrown(String),

    #[error("Execution timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Memory limit exceeded")]
    OutOfMemory,

    #[error("Result could not be copied out of the sandbox: {0}")]
    CopyFailure(String),

    #[error("Internal sandbox error: {0}")]
    Internal(String),
}

/// Errors raised by the request bridge while validating or executing an
/// egress call. Surfaced to sandbox code as plain strings, but kept typed
/// on the host side for logging/classification.
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    #[error("Request limit exceeded: max {max} requests per execution")]
    RequestLimitExceeded { max: u32 },

    #[error(
        "Invalid HTTP method: \"{method}\". Allowed: GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS"
    )]
    InvalidMethod { method: String },

    #[error("Invalid path: {reason}")]
    InvalidPath { reason: String },

    #[error("Response too large: exceeded limit of {max} bytes")]
    ResponseTooLarge { max: u64 },

    #[error("Handler call failed: {0}")]
    HandlerFailed(String),
}

impl ToolBridgeError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.code(),
            Self::Spec(e) => e.code(),
            Self::Sandbox(e) => e.code(),
            Self::Bridge(e) => e.code(),
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
        }
    }
}

impl ConfigError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier { .. } => "INVALID_NAMESPACE_IDENT",
            Self::ReservedNamespace { .. } => "RESERVED_NAMESPACE",
        }
    }
}

impl SpecError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAnObject => "SPEC_NOT_OBJECT",
            Self::SourceFailed(_) => "SPEC_SOURCE_FAILED",
        }
    }
}

impl SandboxError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Compile(_) => "COMPILE_ERROR",
            Self::Thrown(_) => "RUNTIME_ERROR",
            Self::Timeout { .. } => "CPU_TIMEOUT",
            Self::OutOfMemory => "OOM",
            Self::CopyFailure(_) => "COPY_FAILURE",
            Self::Internal(_) => "SANDBOX_INTERNAL",
        }
    }
}

impl BridgeError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::RequestLimitExceeded { .. } => "REQUEST_LIMIT_EXCEEDED",
            Self::InvalidMethod { .. } => "INVALID_METHOD",
            Self::InvalidPath { .. } => "INVALID_PATH",
            Self::ResponseTooLarge { .. } => "RESPONSE_TOO_LARGE",
            Self::HandlerFailed(_) => "HANDLER_FAILED",
        }
    }
}

/// Result type alias for top-level operations.
pub type Result<T> = std::result::Result<T, ToolBridgeError>;

/// Result type alias for construction-time operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Conversion to rmcp tool errors, used by the mcp transport adapter.
impl From<ToolBridgeError> for rmcp::ErrorData {
    fn from(err: ToolBridgeError) -> Self {
        rmcp::ErrorData::internal_error(err.to_string(), None)
    }
}

impl From<ConfigError> for rmcp::ErrorData {
    fn from(err: ConfigError) -> Self {
        rmcp::ErrorData::internal_error(err.to_string(), None)
    }
}
