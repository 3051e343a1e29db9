use std::sync::Arc;

use serde_json::json;

use crate::error::{ForensicError, Result};
use crate::llm::LanguageModel;
use crate::memory::ConversationMemory;
use crate::message::Message;
use crate::tool::ToolRegistry;

/// A tool-calling agent that alternates between the language model and registered tools
/// until the model answers without requesting a tool.
pub struct Agent {
    system_prompt: String,
    model: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
    memory: ConversationMemory,
    max_steps: usize,
}

impl Agent {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            system_prompt: "You are a helpful agent.".to_string(),
            model,
            tools: ToolRegistry::new(),
            memory: ConversationMemory::default(),
            max_steps: 15,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    /// Forget the transcript so the next exchange starts from the system prompt.
    pub fn reset(&mut self) {
        self.memory.clear();
    }

    /// Run a single exchange with the agent. Returns the final assistant reply.
    pub async fn respond(&mut self, user_input: impl Into<String>) -> Result<String> {
        self.memory.push(Message::user(user_input));
        let tools = self.tools.describe();

        for step in 0..self.max_steps {
            let mut transcript = Vec::with_capacity(self.memory.len() + 1);
            transcript.push(Message::system(self.system_prompt.as_str()));
            transcript.extend(self.memory.iter().cloned());

            let completion = self.model.complete_chat(&transcript, &tools).await?;

            if completion.tool_calls.is_empty() {
                let content = completion.content.unwrap_or_default();
                self.memory.push(Message::assistant(content.as_str()));
                tracing::debug!(step, "agent produced final answer");
                return Ok(content);
            }

            for call in completion.tool_calls {
                tracing::info!(step, tool = %call.name, "calling tool");
                self.memory.push(Message::tool_call(call.clone()));

                let output = match self.tools.call(&call.name, call.arguments.clone()).await {
                    Ok(value) => value,
                    // The model asked for something we do not have; let it recover.
                    Err(ForensicError::ToolNotFound(name)) => {
                        tracing::warn!(tool = %name, "model requested an unknown tool");
                        json!({ "error": format!("tool `{name}` is not available") })
                    }
                    Err(err) => {
                        tracing::error!(tool = %call.name, error = %err, "tool call failed");
                        return Err(err);
                    }
                };
                self.memory.push(Message::tool(&call.name, output, call.id));
            }
        }

        Err(ForensicError::Protocol(
            "Agent reached the step limit without returning a response".into(),
        ))
    }
}
