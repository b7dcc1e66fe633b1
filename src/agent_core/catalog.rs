//! Per-turn tool catalog.
//!
//! Snapshot of the tools offered by every connected server, exposed to the
//! model as `serverId__toolName` function tools. The orchestrator uses the
//! same snapshot to resolve the model's calls back to a server and to run
//! the structural argument check before dispatch.

use std::collections::{BTreeMap, HashMap};

use super::errors::AgentError;
use crate::inference::types::ToolDefinition;
use crate::mcp_client::naming::{prefix_tool_name, unprefix_tool_name};
use crate::mcp_client::{ConnectionRegistry, ToolDescriptor};

/// A tool call resolved against the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTool {
    pub server_id: String,
    pub server_name: String,
    pub tool_name: String,
}

#[derive(Debug, Clone)]
struct CatalogServer {
    name: String,
    tools: HashMap<String, ToolDescriptor>,
}

/// Tools available for one model round.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    servers: BTreeMap<String, CatalogServer>,
}

impl ToolCatalog {
    /// Collect tools from every connected server.
    ///
    /// A server whose discovery call fails is left out and logged; it does
    /// not fail the turn.
    pub async fn build(registry: &ConnectionRegistry) -> Self {
        let mut server_ids = registry.get_connected_server_ids();
        server_ids.sort();

        let mut catalog = Self::default();
        for server_id in server_ids {
            match registry.list_tools(&server_id).await {
                Ok(tools) => {
                    let name = display_name(registry, &server_id);
                    catalog.insert(&server_id, &name, tools);
                }
                Err(e) => {
                    tracing::warn!(server = %server_id, error = %e, "tool discovery failed, skipping server");
                }
            }
        }

        tracing::debug!(
            servers = catalog.servers.len(),
            tools = catalog.len(),
            "built tool catalog"
        );
        catalog
    }

    /// Add one server's tools.
    pub fn insert(&mut self, server_id: &str, server_name: &str, tools: Vec<ToolDescriptor>) {
        self.servers.insert(
            server_id.to_string(),
            CatalogServer {
                name: server_name.to_string(),
                tools: tools.into_iter().map(|t| (t.name.clone(), t)).collect(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.servers.values().map(|s| s.tools.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize all tools into OpenAI function-calling format.
    ///
    /// Ordered by server id, then tool name, so requests are stable.
    pub fn to_tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions = Vec::with_capacity(self.len());
        for (server_id, server) in &self.servers {
            let mut tools: Vec<&ToolDescriptor> = server.tools.values().collect();
            tools.sort_by(|a, b| a.name.cmp(&b.name));
            for tool in tools {
                definitions.push(ToolDefinition::function(
                    &prefix_tool_name(server_id, &tool.name),
                    tool.description.as_deref().unwrap_or_default(),
                    tool.input_schema
                        .clone()
                        .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
                ));
            }
        }
        definitions
    }

    /// Display name for a server id, falling back to the id.
    pub fn server_name<'a>(&'a self, server_id: &'a str) -> &'a str {
        self.servers
            .get(server_id)
            .map(|s| s.name.as_str())
            .unwrap_or(server_id)
    }

    /// Reverse a model-facing name to its server and tool.
    ///
    /// Fails when the name has no separator or its prefix is not a server
    /// in this catalog. A tool missing from a known server still resolves;
    /// the server gets the final say.
    pub fn resolve(&self, prefixed: &str) -> Result<ResolvedTool, AgentError> {
        let unknown = || AgentError::UnknownTool {
            name: prefixed.to_string(),
        };
        let (server_id, tool_name) = unprefix_tool_name(prefixed).ok_or_else(unknown)?;
        let server = self.servers.get(server_id).ok_or_else(unknown)?;
        Ok(ResolvedTool {
            server_id: server_id.to_string(),
            server_name: server.name.clone(),
            tool_name: tool_name.to_string(),
        })
    }

    /// Structural check: arguments are an object holding every `required`
    /// top-level key of the tool's input schema.
    ///
    /// Full JSON Schema validation is left to the server.
    pub fn validate_arguments(
        &self,
        tool: &ResolvedTool,
        arguments: &serde_json::Value,
    ) -> Result<(), AgentError> {
        let invalid = |reason: String| AgentError::InvalidArguments {
            tool: prefix_tool_name(&tool.server_id, &tool.tool_name),
            reason,
        };

        let args_obj = match arguments {
            serde_json::Value::Object(map) => map,
            serde_json::Value::String(raw) => {
                return Err(invalid(format!("arguments are not valid JSON: {raw}")))
            }
            other => return Err(invalid(format!("arguments must be an object, got {other}"))),
        };

        let schema = self
            .servers
            .get(&tool.server_id)
            .and_then(|s| s.tools.get(&tool.tool_name))
            .and_then(|t| t.input_schema.as_ref());

        if let Some(required) = schema
            .and_then(|s| s.get("required"))
            .and_then(|r| r.as_array())
        {
            for field_name in required.iter().filter_map(|f| f.as_str()) {
                if !args_obj.contains_key(field_name) {
                    return Err(invalid(format!("missing required field: '{field_name}'")));
                }
            }
        }

        Ok(())
    }
}

/// Configured display name, then the server's own name, then the id.
fn display_name(registry: &ConnectionRegistry, server_id: &str) -> String {
    registry
        .server_config(server_id)
        .map(|c| c.name)
        .filter(|n| !n.is_empty())
        .or_else(|| registry.server_info(server_id).map(|i| i.name))
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| server_id.to_string())
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::mcp_client::testing::{mock_server, ScriptedFactory, ServerScript};
    use crate::mcp_client::{RegistryOptions, ServerConfig};

    fn tool(name: &str, required: &[&str]) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: Some(format!("{name} tool")),
            input_schema: Some(serde_json::json!({
                "type": "object",
                "properties": {},
                "required": required,
            })),
        }
    }

    fn catalog() -> ToolCatalog {
        let mut catalog = ToolCatalog::default();
        catalog.insert(
            "files",
            "Files",
            vec![tool("read_file", &["path"]), tool("batch__read", &[])],
        );
        catalog.insert("web", "Web", vec![tool("search", &["query"])]);
        catalog
    }

    #[test]
    fn test_definitions_are_prefixed_and_sorted() {
        let names: Vec<String> = catalog()
            .to_tool_definitions()
            .into_iter()
            .map(|d| d.function.name)
            .collect();
        assert_eq!(
            names,
            vec!["files__batch__read", "files__read_file", "web__search"]
        );
    }

    #[test]
    fn test_resolve() {
        let catalog = catalog();
        let resolved = catalog.resolve("files__batch__read").unwrap();
        assert_eq!(resolved.server_id, "files");
        assert_eq!(resolved.server_name, "Files");
        assert_eq!(resolved.tool_name, "batch__read");

        assert!(matches!(
            catalog.resolve("ghost__read"),
            Err(AgentError::UnknownTool { .. })
        ));
        assert!(catalog.resolve("read_file").is_err());
    }

    #[test]
    fn test_validate_required_fields() {
        let catalog = catalog();
        let read = catalog.resolve("files__read_file").unwrap();
        assert!(catalog
            .validate_arguments(&read, &serde_json::json!({"path": "/a"}))
            .is_ok());

        let err = catalog
            .validate_arguments(&read, &serde_json::json!({}))
            .unwrap_err();
        assert!(err.to_string().contains("missing required field: 'path'"));

        let err = catalog
            .validate_arguments(&read, &serde_json::json!("{oops"))
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_build_from_registry() {
        let factory = ScriptedFactory::new()
            .script("files", ServerScript::new(mock_server(vec!["read_file", "list_dir"])))
            .script("web", ServerScript::new(mock_server(vec!["search"])));
        let registry = ConnectionRegistry::new(Arc::new(factory), RegistryOptions::default());
        registry
            .connect(&ServerConfig::stdio("files", "Files", "npx", &[]))
            .await;
        registry
            .connect(&ServerConfig::stdio("web", "", "npx", &[]))
            .await;

        let catalog = ToolCatalog::build(&registry).await;
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.server_name("files"), "Files");
        // Falls back to the name reported in the handshake
        assert_eq!(catalog.server_name("web"), "mock-server");
    }
}
