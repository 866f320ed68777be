//! Retrieval over the semantic index, exposed to the model as `query_info`

use std::sync::Arc;

use async_trait::async_trait;

use crate::index::{IndexHandle, RetrievedChunk};
use crate::llm::{ChatMessage, ChatModel, ModelFactory};
use crate::telemetry::{Level, Telemetry};
use crate::tools::Tool;
use crate::{Error, Result};

/// Tool name exposed to the conversational model
pub const QUERY_INFO_TOOL: &str = "query_info";

/// Tool description exposed to the conversational model
pub const QUERY_INFO_DESCRIPTION: &str = "Get more information about a specific topic";

/// System prompt for answers that will be spoken aloud
pub const RAG_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer questions based on the \
provided context. Respond in plain text only - no markdown, no emojis, no special formatting. \
Give direct, conversational answers that sound natural when spoken aloud.";

/// Default number of chunks retrieved per query
pub const DEFAULT_TOP_K: usize = 4;

/// Answers questions from retrieved context
pub struct QueryEngine {
    index: IndexHandle,
    llm: Arc<dyn ChatModel>,
    system_prompt: String,
    top_k: usize,
}

impl QueryEngine {
    /// Create an engine using the speech-safe system prompt
    #[must_use]
    pub fn new(index: IndexHandle, llm: Arc<dyn ChatModel>) -> Self {
        Self {
            index,
            llm,
            system_prompt: RAG_SYSTEM_PROMPT.to_string(),
            top_k: DEFAULT_TOP_K,
        }
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Retrieve context for `question` and ask the model to answer from it
    ///
    /// # Errors
    ///
    /// Returns error if retrieval or the completion fails, or the model
    /// returns no text
    pub async fn query(&self, question: &str) -> Result<String> {
        let chunks = self.index.retrieve(question, self.top_k).await?;
        tracing::debug!(
            hits = chunks.len(),
            sources = ?chunks.iter().map(|c| c.source.as_str()).collect::<Vec<_>>(),
            "retrieved context"
        );

        let messages = [
            ChatMessage::system(&self.system_prompt),
            ChatMessage::user(qa_prompt(&chunks, question)),
        ];
        let completion = self.llm.complete(&messages, &[]).await?;

        let answer = completion.content.unwrap_or_default().trim().to_string();
        if answer.is_empty() {
            return Err(Error::Llm("model returned an empty answer".to_string()));
        }
        Ok(answer)
    }
}

/// Question-answering prompt over retrieved chunks
fn qa_prompt(chunks: &[RetrievedChunk], question: &str) -> String {
    let context = chunks
        .iter()
        .map(|c| format!("source: {}\n\n{}", c.source, c.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Context information is below.\n\
         ---------------------\n\
         {context}\n\
         ---------------------\n\
         Given the context information and not prior knowledge, answer the query.\n\
         Query: {question}\n\
         Answer: "
    )
}

/// The `query_info` tool
///
/// Each call binds a fresh completion model from the factory and runs a
/// [`QueryEngine`] over the shared index.
pub struct QueryInfoTool {
    index: IndexHandle,
    telemetry: Telemetry,
    models: ModelFactory,
    top_k: usize,
}

impl QueryInfoTool {
    #[must_use]
    pub fn new(
        index: IndexHandle,
        telemetry: Telemetry,
        models: ModelFactory,
        top_k: usize,
    ) -> Self {
        Self {
            index,
            telemetry,
            models,
            top_k: top_k.max(1),
        }
    }
}

#[async_trait]
impl Tool for QueryInfoTool {
    fn name(&self) -> &str {
        QUERY_INFO_TOOL
    }

    fn description(&self) -> &str {
        QUERY_INFO_DESCRIPTION
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The topic or question to look up"
                }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, arguments: serde_json::Value) -> Result<String> {
        let query = arguments
            .get("query")
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| Error::Tool("query_info: missing query".to_string()))?
            .to_string();

        tracing::info!(query = %query, "query_info invoked");
        self.telemetry
            .report_best_effort(Level::Info, format!("processing query: {query}"));

        let engine =
            QueryEngine::new(Arc::clone(&self.index), (self.models)()).with_top_k(self.top_k);
        match engine.query(&query).await {
            Ok(answer) => {
                tracing::info!(chars = answer.len(), "query_info answered");
                self.telemetry
                    .report_best_effort(Level::Info, format!("query result: {answer}"));
                Ok(answer)
            }
            Err(e) => {
                tracing::warn!(error = %e, "query_info failed");
                self.telemetry
                    .report_best_effort(Level::Error, format!("query failed: {e}"));
                Err(Error::Tool(format!("query_info: {e}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qa_prompt_includes_sources_and_question() {
        let chunks = vec![RetrievedChunk {
            id: "a-0000".to_string(),
            source: "guide.md".to_string(),
            ordinal: 0,
            text: "Deploys run nightly.".to_string(),
            distance: 0.1,
            score: 0.9,
        }];
        let prompt = qa_prompt(&chunks, "When do deploys run?");
        assert!(prompt.contains("source: guide.md"));
        assert!(prompt.contains("Deploys run nightly."));
        assert!(prompt.ends_with("Query: When do deploys run?\nAnswer: "));
    }

    #[test]
    fn system_prompt_requests_plain_speech() {
        assert!(RAG_SYSTEM_PROMPT.contains("plain text only"));
        assert!(RAG_SYSTEM_PROMPT.contains("spoken aloud"));
    }
}
