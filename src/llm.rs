//! Chat completion models
//!
//! Conversation turns and the retrieval tool both talk to a [`ChatModel`].
//! [`OpenAiChat`] implements it against any OpenAI-compatible
//! `/chat/completions` endpoint with function calling.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::InferenceConfig;
use crate::tools::ToolDefinition;
use crate::{Error, Result};

/// Message author role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A function call requested by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

/// Function name and JSON-encoded arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

impl ToolCall {
    /// Create a function call
    #[must_use]
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: function_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// One message in a chat transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Assistant message carrying tool calls (and possibly some text)
    #[must_use]
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.filter(|c| !c.is_empty()),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Result of a tool call
    #[must_use]
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Text content, empty if none
    #[must_use]
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// Result of a single completion request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
}

impl ChatCompletion {
    /// Plain text answer
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            finish_reason: Some("stop".to_string()),
        }
    }

    /// Answer requesting tool calls
    #[must_use]
    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
            finish_reason: Some("tool_calls".to_string()),
        }
    }

    /// Whether the model asked for tools to be run
    #[must_use]
    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A completion model binding
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier
    fn model_id(&self) -> &str;

    /// Run one completion over `messages`, offering `tools`
    ///
    /// # Errors
    ///
    /// Returns `Error::Llm` if the request fails or the response is malformed
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatCompletion>;
}

/// Produces a fresh model binding per use
pub type ModelFactory = Arc<dyn Fn() -> Arc<dyn ChatModel> + Send + Sync>;

/// Factory producing [`OpenAiChat`] bindings for `config`
#[must_use]
pub fn openai_factory(api_key: SecretString, config: InferenceConfig) -> ModelFactory {
    Arc::new(move || Arc::new(OpenAiChat::new(api_key.clone(), &config)) as Arc<dyn ChatModel>)
}

/// Chat model backed by an OpenAI-compatible API
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    temperature: Option<f32>,
}

impl OpenAiChat {
    /// Create a binding for the configured endpoint and model
    #[must_use]
    pub fn new(api_key: SecretString, config: &InferenceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatCompletion> {
        #[derive(Serialize)]
        struct CompletionRequest<'a> {
            model: &'a str,
            messages: &'a [ChatMessage],
            #[serde(skip_serializing_if = "<[ToolDefinition]>::is_empty")]
            tools: &'a [ToolDefinition],
            #[serde(skip_serializing_if = "Option::is_none")]
            temperature: Option<f32>,
            stream: bool,
        }

        #[derive(Deserialize)]
        struct CompletionResponse {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: ResponseMessage,
            #[serde(default)]
            finish_reason: Option<String>,
        }

        #[derive(Deserialize)]
        struct ResponseMessage {
            #[serde(default)]
            content: Option<String>,
            #[serde(default)]
            tool_calls: Option<Vec<ToolCall>>,
        }

        let request = CompletionRequest {
            model: &self.model,
            messages,
            tools,
            temperature: self.temperature,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, body = %body, model = %self.model, "chat completion failed");
            return Err(Error::Llm(format!("completion API error {status}: {body}")));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Llm(format!("invalid completion response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Llm("completion returned no choices".to_string()))?;

        let completion = ChatCompletion {
            content: choice.message.content,
            tool_calls: choice.message.tool_calls.unwrap_or_default(),
            finish_reason: choice.finish_reason,
        };

        tracing::debug!(
            model = %self.model,
            tool_calls = completion.tool_calls.len(),
            finish_reason = ?completion.finish_reason,
            "chat completion"
        );
        Ok(completion)
    }
}
