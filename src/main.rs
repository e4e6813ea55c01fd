//! toolbridge: a two-tool MCP bridge between an LLM agent and a REST API
//! described by an OpenAPI document.
//!
//! Usage:
//!   toolbridge serve --spec api.json --base-url https://api.example.com

use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use toolbridge::bridge::{HandlerRequest, HandlerResponse, RequestHandler, ResponseBody};
use toolbridge::orchestrator::{Orchestrator, OrchestratorConfig, SpecSource};
use toolbridge::sandbox::SandboxConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "toolbridge")]
#[command(about = "Exposes a REST API to an LLM agent through two code-execution tools")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as an MCP server over stdin/stdout
    Serve(ServeArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Path to the OpenAPI document (JSON or YAML). Reads stdin if omitted.
    #[arg(long)]
    spec: Option<PathBuf>,

    /// Base URL every `execute` request is resolved against.
    #[arg(long)]
    base_url: String,

    /// Identifier under which the request function is exposed to sandboxed code.
    #[arg(long, default_value = "api")]
    namespace: String,

    /// MCP tool name for the spec-exploration tool.
    #[arg(long, default_value = "search")]
    search_tool_name: String,

    /// MCP tool name for the request-execution tool.
    #[arg(long, default_value = "execute")]
    execute_tool_name: String,

    /// Truncation budget for a single tool result, in estimated tokens.
    #[arg(long, default_value_t = 25_000)]
    max_response_tokens: u32,

    /// Maximum number of `{namespace}.request` calls per `execute` invocation.
    #[arg(long, default_value_t = 50)]
    max_requests: u32,

    /// Maximum bytes read from a single upstream response before it is rejected.
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    max_response_bytes: u64,

    /// Comma-separated header allowlist. Defaults to a built-in blocklist
    /// (Authorization, Cookie, Host, and similar) when omitted.
    #[arg(long, value_delimiter = ',')]
    allowed_headers: Option<Vec<String>>,

    /// Sandbox heap limit in megabytes.
    #[arg(long, default_value_t = 64)]
    memory_mb: u64,

    /// Sandbox CPU/wall-time limit in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    timeout_ms: u64,

    /// Maximum `$ref` chain depth the spec processor will follow.
    #[arg(long, default_value_t = 50)]
    max_ref_depth: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // CRITICAL: log to stderr only — stdout carries MCP's JSON-RPC traffic.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("toolbridge=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
    }
}

async fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    let doc = load_spec_document(args.spec.as_deref())?;

    let http = reqwest::Client::builder()
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {e}"))?;

    let config = OrchestratorConfig {
        spec: SpecSource::Value(doc),
        request: reqwest_handler(http),
        namespace: args.namespace,
        base_url: args.base_url,
        sandbox: SandboxConfig {
            memory_mb: args.memory_mb,
            timeout_ms: args.timeout_ms,
        },
        max_response_tokens: args.max_response_tokens,
        max_requests: args.max_requests,
        max_response_bytes: args.max_response_bytes,
        allowed_headers: args.allowed_headers,
        max_ref_depth: args.max_ref_depth,
    };

    let orchestrator = Arc::new(Orchestrator::new(config)?);
    orchestrator
        .set_tool_names(args.search_tool_name, args.execute_tool_name)
        .await;

    tracing::info!("Starting toolbridge MCP server");
    let server = toolbridge::mcp::ToolBridgeServer::new(orchestrator);

    use rmcp::ServiceExt;
    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;

    Ok(())
}

fn load_spec_document(path: Option<&std::path::Path>) -> anyhow::Result<serde_json::Value> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read spec file {}: {e}", path.display()))?,
        None => {
            use std::io::Read;
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| anyhow::anyhow!("failed to read spec from stdin: {e}"))?;
            buf
        }
    };

    serde_json::from_str(&raw)
        .or_else(|_| serde_yaml::from_str(&raw))
        .map_err(|e| anyhow::anyhow!("failed to parse spec as JSON or YAML: {e}"))
}

/// Builds the embedder-supplied fetch-shaped handler backed by `reqwest`,
/// streaming response bodies chunk-by-chunk so the bridge can enforce its
/// size cap before the whole body is buffered.
fn reqwest_handler(client: reqwest::Client) -> RequestHandler {
    Arc::new(move |request: HandlerRequest| {
        let client = client.clone();
        Box::pin(async move {
            let method = reqwest::Method::from_bytes(request.method.as_bytes())
                .map_err(|e| format!("invalid HTTP method: {e}"))?;

            let mut builder = client
                .request(method, request.url.as_str())
                .timeout(Duration::from_secs(60));
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(|e| e.to_string())?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        value.to_str().unwrap_or("").to_string(),
                    )
                })
                .collect();

            let stream = response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(|e| e.to_string()));

            Ok(HandlerResponse {
                status,
                headers,
                body: ResponseBody::Stream(Box::pin(stream)),
            })
        })
    })
}
