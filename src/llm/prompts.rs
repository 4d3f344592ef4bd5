//! Chat exchanges for the three LLM tasks. Shared by the MCP tools and the
//! REST bridge so both surfaces send identical prompts.

use super::ChatMessage;
use crate::models::{LlmQueryPayload, LlmQueryType};

pub const DEFAULT_SUMMARY_LANGUAGE: &str = "ja";
pub const DEFAULT_TARGET_LANGUAGE: &str = "ja";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmTask {
    Summarize { text: String, language: Option<String> },
    Translate { text: String, target_lang: Option<String> },
    Ask { question: String, context: Option<String> },
}

impl LlmTask {
    /// Builds a task from the REST payload. `ask` falls back to `text` when
    /// `question` is absent.
    pub fn from_query(kind: LlmQueryType, payload: LlmQueryPayload) -> Result<Self, String> {
        let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        match kind {
            LlmQueryType::Summarize => Ok(LlmTask::Summarize {
                text: non_blank(payload.text).ok_or("payload.text is required")?,
                language: non_blank(payload.language),
            }),
            LlmQueryType::Translate => Ok(LlmTask::Translate {
                text: non_blank(payload.text).ok_or("payload.text is required")?,
                target_lang: non_blank(payload.target_lang),
            }),
            LlmQueryType::Ask => {
                let question = non_blank(payload.question)
                    .or_else(|| non_blank(payload.text))
                    .ok_or("payload.question is required")?;
                Ok(LlmTask::Ask {
                    question: question.trim().to_string(),
                    context: non_blank(payload.context),
                })
            }
        }
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        match self {
            LlmTask::Summarize { text, language } => {
                let language = language.as_deref().unwrap_or(DEFAULT_SUMMARY_LANGUAGE);
                vec![
                    ChatMessage::system(format!(
                        "You are a helpful assistant. Summarize the given article concisely in {language}. \
                         Use bullet points if appropriate. Avoid adding extraneous commentary."
                    )),
                    ChatMessage::user(text.clone()),
                ]
            }
            LlmTask::Translate { text, target_lang } => {
                let target = target_lang.as_deref().unwrap_or(DEFAULT_TARGET_LANGUAGE);
                vec![
                    ChatMessage::system(format!(
                        "You are a translator. Translate the user content into {target}. \
                         Preserve meaning and style."
                    )),
                    ChatMessage::user(text.clone()),
                ]
            }
            LlmTask::Ask { question, context } => {
                let mut messages = vec![ChatMessage::system(
                    "You are a helpful assistant. Answer accurately. \
                     If context is provided, ground your answer in it.",
                )];
                if let Some(context) = context {
                    messages.push(ChatMessage::user(format!("Context:\n{context}")));
                }
                messages.push(ChatMessage::user(question.clone()));
                messages
            }
        }
    }
}
