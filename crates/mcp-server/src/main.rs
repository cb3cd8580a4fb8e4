//! Thinking MCP Server
//!
//! Branchable sequential thinking for AI agents over the MCP protocol.
//!
//! ## Tools
//!
//! - `sequential_thinking` - Record a reasoning step; flags cycles and reflection checkpoints
//! - `branch` - List, fork, switch, merge, compare, remove or clear branches
//! - `history` - Read back a branch's thoughts
//! - `provide_input` - Answer a pending reflection checkpoint
//! - `snapshot` - Export or import the full state
//! - `reset` - Clear everything
//!
//! ## Usage
//!
//! Add to your MCP client configuration:
//! ```json
//! {
//!   "mcpServers": {
//!     "thinking": {
//!       "command": "thinking-mcp",
//!       "env": { "THINKING_STORAGE": "file" }
//!     }
//!   }
//! }
//! ```

use anyhow::Result;
use rmcp::transport::stdio;
use rmcp::ServiceExt;

mod runtime_env;
mod tools;

use tools::ThinkingService;

#[tokio::main]
async fn main() -> Result<()> {
    // Configure logging to stderr only (stdout is for MCP protocol)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let (config, report) = runtime_env::load_config_from_env();
    for warning in &report.warnings {
        log::warn!("config: {warning}");
    }
    if let Some(path) = &report.config_file {
        log::info!("config loaded from {path}");
    }
    log::info!(
        "Starting thinking MCP server (storage={}, env overrides: {:?})",
        config.storage.backend.as_str(),
        report.applied_env
    );

    let service = ThinkingService::new(config).await;
    let server = service.serve(stdio()).await?;

    server.waiting().await?;

    log::info!("Thinking MCP server stopped");
    Ok(())
}
