//! Tools the conversational model may call

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// OpenAI function-tool declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

/// Function name, description and JSON Schema parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A callable tool
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model calls the tool by
    fn name(&self) -> &str;

    /// Description shown to the model
    fn description(&self) -> &str;

    /// JSON Schema of the arguments object
    fn parameters(&self) -> serde_json::Value;

    /// Run the tool with decoded arguments
    ///
    /// # Errors
    ///
    /// Returns `Error::Tool` if the arguments are invalid or execution fails
    async fn call(&self, arguments: serde_json::Value) -> Result<String>;

    /// Declaration sent with completion requests
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_type: "function".to_owned(),
            function: FunctionDefinition {
                name: self.name().to_string(),
                description: self.description().to_string(),
                parameters: self.parameters(),
            },
        }
    }
}

/// Ordered set of tools exposed to a conversation
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl ToolSet {
    /// Empty tool set
    #[must_use]
    pub const fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Add a tool
    #[must_use]
    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Tool names in order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Declarations for every tool
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Look up a tool by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Execute a tool call with JSON-encoded arguments
    ///
    /// # Errors
    ///
    /// Returns `Error::Tool` if the tool is unknown, the arguments are not a
    /// JSON object, or the tool fails
    pub async fn execute(&self, name: &str, arguments: &str) -> Result<String> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::Tool(format!("unknown tool: {name}")))?;

        let args = if arguments.trim().is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(arguments)
                .map_err(|e| Error::Tool(format!("{name}: invalid arguments: {e}")))?
        };
        if !args.is_object() {
            return Err(Error::Tool(format!("{name}: arguments must be a JSON object")));
        }

        tracing::debug!(tool = %name, "executing tool");
        tool.call(args).await
    }
}
