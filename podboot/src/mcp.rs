//! MCP server descriptors.
//!
//! podboot does not launch MCP servers. It only makes sure that, once init
//! is done, every configured server's command resolves and its required
//! variables are present, and optionally writes the launcher configuration.

use crate::env::EnvironmentSnapshot;
use crate::util::find_on_path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One MCP server as an opaque launch target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerDescriptor {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Variables the server needs; values come from the snapshot.
    #[serde(default)]
    pub env: Vec<String>,
}

/// Something missing for a server.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum McpProblem {
    #[error("{server}: command '{command}' not found on PATH")]
    CommandNotFound { server: String, command: String },
    #[error("{server}: variable {variable} is not set")]
    MissingVariable { server: String, variable: String },
}

/// Check every server against the snapshot.
pub fn verify_servers(
    servers: &BTreeMap<String, McpServerDescriptor>,
    snapshot: &EnvironmentSnapshot,
    base_path: &str,
) -> Vec<McpProblem> {
    let search_path = snapshot.search_path(base_path);
    let mut problems = Vec::new();

    for (name, server) in servers {
        if find_on_path(&server.command, &search_path).is_none() {
            problems.push(McpProblem::CommandNotFound {
                server: name.clone(),
                command: server.command.clone(),
            });
        }
        for variable in &server.env {
            if snapshot.get(variable).is_none() {
                problems.push(McpProblem::MissingVariable {
                    server: name.clone(),
                    variable: variable.clone(),
                });
            }
        }
    }

    problems
}

/// Launcher configuration in the common `mcpServers` JSON shape.
///
/// Servers with missing variables are left out so the launcher never starts
/// a server that is bound to fail.
pub fn launcher_config(
    servers: &BTreeMap<String, McpServerDescriptor>,
    snapshot: &EnvironmentSnapshot,
) -> serde_json::Value {
    let mut entries = serde_json::Map::new();

    for (name, server) in servers {
        let env: Option<serde_json::Map<String, serde_json::Value>> = server
            .env
            .iter()
            .map(|var| {
                snapshot
                    .get(var)
                    .map(|value| (var.clone(), serde_json::Value::String(value.to_string())))
            })
            .collect();

        let Some(env) = env else {
            continue;
        };

        entries.insert(
            name.clone(),
            serde_json::json!({
                "command": server.command,
                "args": server.args,
                "env": env,
            }),
        );
    }

    serde_json::json!({ "mcpServers": entries })
}
