//! Fixed catalogue of LLM tools exposed over MCP.
//!
//! Each [`Tool`] variant describes itself (name, description, JSON Schema)
//! and knows how to run. The registry compiles every schema once at startup
//! and validates arguments against it before the typed decode.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::auth::McpPrincipal;
use crate::llm::prompts::LlmTask;
use crate::llm::{ChatRequest, LlmClient, LlmError, Usage};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Summarize,
    Translate,
    Ask,
}

impl Tool {
    pub const ALL: [Tool; 3] = [Tool::Summarize, Tool::Translate, Tool::Ask];

    pub fn name(self) -> &'static str {
        match self {
            Tool::Summarize => "llm.summarize",
            Tool::Translate => "llm.translate",
            Tool::Ask => "llm.ask",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Tool::Summarize => "Summarize a given text. The summary is written in Japanese (ja) unless `language` is set.",
            Tool::Translate => "Translate a given text to a target language.",
            Tool::Ask => "Ask a question with optional context.",
        }
    }

    /// Scope a restricted token must hold to call this tool.
    pub fn scope(self) -> &'static str {
        match self {
            Tool::Summarize => "llm:summarize",
            Tool::Translate => "llm:translate",
            Tool::Ask => "llm:ask",
        }
    }

    pub fn input_schema(self) -> Value {
        let model = json!({
            "type": "string",
            "description": "Upstream model id. Defaults to the server's configured model."
        });
        match self {
            Tool::Summarize => json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "minLength": 1, "description": "Text to summarize." },
                    "model": model,
                    "language": { "type": "string", "description": "Output language (default: ja)." }
                },
                "required": ["text"]
            }),
            Tool::Translate => json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "minLength": 1, "description": "Text to translate." },
                    "targetLang": { "type": "string", "minLength": 1, "description": "Target language." },
                    "model": model
                },
                "required": ["text", "targetLang"]
            }),
            Tool::Ask => json!({
                "type": "object",
                "properties": {
                    "question": { "type": "string", "minLength": 1, "description": "The question." },
                    "context": { "type": "string", "description": "Optional grounding context." },
                    "model": model
                },
                "required": ["question"]
            }),
        }
    }

    /// Entry for `tools/list`.
    pub fn descriptor(self) -> Value {
        json!({
            "name": self.name(),
            "description": self.description(),
            "inputSchema": self.input_schema(),
        })
    }

    fn task(self, args: Value) -> Result<(LlmTask, Option<String>), ToolError> {
        match self {
            Tool::Summarize => {
                let a: SummarizeArgs = decode(args)?;
                Ok((LlmTask::Summarize { text: a.text, language: non_blank(a.language) }, a.model))
            }
            Tool::Translate => {
                let a: TranslateArgs = decode(args)?;
                Ok((LlmTask::Translate { text: a.text, target_lang: Some(a.target_lang) }, a.model))
            }
            Tool::Ask => {
                let a: AskArgs = decode(args)?;
                Ok((LlmTask::Ask { question: a.question, context: non_blank(a.context) }, a.model))
            }
        }
    }
}

#[derive(Deserialize)]
struct SummarizeArgs {
    text: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateArgs {
    text: String,
    target_lang: String,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct AskArgs {
    question: String,
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

fn decode<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidParams(e.to_string()))
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

/// Per-call ambient context. The principal is the one the dispatcher
/// authenticated for this request.
pub struct ToolContext<'a> {
    pub llm: &'a LlmClient,
    pub default_model: &'a str,
    pub principal: &'a McpPrincipal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    pub model: String,
    pub usage: Option<Usage>,
}

pub struct RegisteredTool {
    tool: Tool,
    validator: jsonschema::Validator,
}

impl RegisteredTool {
    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn validate(&self, args: &Value) -> Result<(), ToolError> {
        let errors: Vec<String> = self.validator.iter_errors(args).map(|e| e.to_string()).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ToolError::InvalidParams(errors.join("; ")))
        }
    }

    /// Validates, builds one chat exchange and sends it.
    pub async fn execute(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        self.validate(&args)?;
        let (task, model) = self.tool.task(args)?;
        let model = non_blank(model).unwrap_or_else(|| ctx.default_model.to_string());

        tracing::info!(
            tool = self.tool.name(),
            user_id = %ctx.principal.user_id,
            model = %model,
            "executing MCP tool"
        );

        let response = ctx.llm.complete(ChatRequest::new(model.clone(), task.messages())).await?;
        let text = response
            .first_text()
            .filter(|t| !t.is_empty())
            .ok_or(LlmError::EmptyResult)?
            .to_string();

        Ok(ToolOutput {
            text,
            model: if response.model.is_empty() { model } else { response.model },
            usage: response.usage,
        })
    }
}

/// Immutable after construction.
pub struct ToolRegistry {
    entries: Vec<RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> anyhow::Result<Self> {
        let entries = Tool::ALL
            .into_iter()
            .map(|tool| {
                let validator = jsonschema::options()
                    .with_draft(jsonschema::Draft::Draft202012)
                    .build(&tool.input_schema())
                    .map_err(|e| anyhow::anyhow!("schema for {} does not compile: {}", tool.name(), e))?;
                Ok(RegisteredTool { tool, validator })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.entries.iter().find(|e| e.tool.name() == name)
    }

    pub fn descriptors(&self) -> Vec<Value> {
        self.entries.iter().map(|e| e.tool.descriptor()).collect()
    }
}
