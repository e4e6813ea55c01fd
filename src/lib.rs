//! toolbridge: a two-tool MCP bridge between an LLM agent and a REST API
//! described by an OpenAPI document.
//!
//! Rather than exposing one MCP tool per API operation (which burns context
//! on schemas the agent may never touch and forces a network round-trip per
//! call), this crate exposes exactly two: `search`, which runs agent-written
//! JavaScript against a fully dereferenced copy of the spec, and `execute`,
//! which runs agent-written JavaScript that can make real HTTP calls through
//! a narrow, validated request bridge. Both run inside a fresh, single-shot
//! QuickJS sandbox per call.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              MCP Server (rmcp)              │
//! │         JSON-RPC over stdin/stdout          │
//! └─────────────────┬───────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────┐
//! │               Orchestrator                   │
//! │   lazy spec cache · lazy sandbox executor    │
//! └──────┬───────────────┬───────────────┬───────┘
//!        │               │               │
//! ┌──────▼──────┐ ┌──────▼───────┐ ┌────▼─────┐
//! │    spec     │ │   sandbox    │ │  bridge  │
//! │ $ref flatten│ │  QuickJS VM  │ │  egress  │
//! └─────────────┘ └──────────────┘ └──────────┘
//! ```

pub mod bridge;
pub mod error;
pub mod mcp;
pub mod orchestrator;
pub mod sandbox;
pub mod spec;
pub mod tools;
pub mod types;

pub use error::{ConfigResult, Result, ToolBridgeError};
pub use orchestrator::{Orchestrator, OrchestratorConfig, SpecSource};
