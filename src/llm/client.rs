// HTTP client for the upstream chat-completion API.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::sse::{SseDecoder, SseFrame, parse_line};
use super::{ChatRequest, ChatResponse, LlmError, StreamChunk, Usage};
use crate::config::LlmConfig;

/// Where the upstream API key comes from. Resolved on every call so that a
/// missing key fails the request, not startup.
#[derive(Debug, Clone)]
pub enum ApiKeySource {
    Env(String),
    Fixed(String),
}

impl ApiKeySource {
    fn resolve(&self) -> Result<String, LlmError> {
        let key = match self {
            ApiKeySource::Env(var) => std::env::var(var).unwrap_or_default(),
            ApiKeySource::Fixed(key) => key.clone(),
        };
        let key = key.trim().to_string();
        if key.is_empty() {
            let source = match self {
                ApiKeySource::Env(var) => var.clone(),
                ApiKeySource::Fixed(_) => "fixed key".to_string(),
            };
            return Err(LlmError::MissingApiKey(source));
        }
        Ok(key)
    }
}

/// What a finished stream looked like. Usage only arrives on the last frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    pub id: String,
    pub model: String,
    pub chunks: usize,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl StreamSummary {
    fn observe(&mut self, chunk: &StreamChunk) {
        self.chunks += 1;
        if self.id.is_empty() {
            self.id = chunk.id.clone();
        }
        if !chunk.model.is_empty() {
            self.model = chunk.model.clone();
        }
        if let Some(reason) = chunk.finish_reason() {
            self.finish_reason = Some(reason.to_string());
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage.clone();
        }
    }
}

#[derive(Deserialize)]
struct ModelEntry {
    #[serde(default)]
    id: String,
}

#[derive(Deserialize)]
struct ModelsEnvelope {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Clone)]
pub struct LlmClient {
    /// Bounded total time; used for one-shot calls.
    sync_http: Client,
    /// Bounded idle time only; long completions are expected.
    stream_http: Client,
    base_url: Arc<str>,
    app_title: Arc<str>,
    api_key: ApiKeySource,
}

impl LlmClient {
    pub fn new(config: &LlmConfig, api_key: ApiKeySource) -> Result<Self, LlmError> {
        let sync_http = Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(config.sync_timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        let stream_http = Client::builder()
            .pool_max_idle_per_host(10)
            .read_timeout(config.stream_idle_timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            sync_http,
            stream_http,
            base_url: Arc::from(config.base_url.trim_end_matches('/')),
            app_title: Arc::from(config.app_title.as_str()),
            api_key,
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder, LlmError> {
        let key = self.api_key.resolve()?;
        Ok(builder
            .bearer_auth(key)
            .header("X-Title", self.app_title.as_ref()))
    }

    async fn check_status(response: Response) -> Result<Response, LlmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(LlmError::Upstream {
            status: status.as_u16(),
            body,
        })
    }

    /// One completed choice, no retries.
    pub async fn complete(&self, mut request: ChatRequest) -> Result<ChatResponse, LlmError> {
        request.stream = false;
        let url = format!("{}/chat/completions", self.base_url);
        let builder = self.authorized(self.sync_http.post(url))?;

        let response = Self::check_status(builder.json(&request).send().await?).await?;
        let body = response.text().await?;
        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::Decode(e.to_string()))?;

        if parsed.choices.is_empty() {
            return Err(LlmError::EmptyResult);
        }
        tracing::debug!(model = %parsed.model, id = %parsed.id, "upstream completion received");
        Ok(parsed)
    }

    /// Streams delta units into `sink` in arrival order. Returns once the
    /// sentinel (or end of body) is seen. A failed send means the consumer is
    /// gone and surfaces as [`LlmError::RelayClosed`]. Cancellation drops the
    /// upstream response without draining it.
    pub async fn stream_chat(
        &self,
        mut request: ChatRequest,
        sink: mpsc::Sender<StreamChunk>,
        cancel: CancellationToken,
    ) -> Result<StreamSummary, LlmError> {
        request.stream = true;
        let url = format!("{}/chat/completions", self.base_url);
        let builder = self
            .authorized(self.stream_http.post(url))?
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request);

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            sent = builder.send() => sent?,
        };
        let response = Self::check_status(response).await?;

        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut summary = StreamSummary::default();

        loop {
            while let Some(line) = decoder.next_line() {
                if let ControlFlow::Break(()) = Self::relay_line(&line, &mut summary, &sink, &cancel).await? {
                    return Ok(summary);
                }
            }

            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                next = body.next() => next,
            };

            match next {
                Some(Ok(bytes)) => decoder.push(&bytes)?,
                Some(Err(e)) => return Err(LlmError::StreamAbort(format!("read failed: {e}"))),
                None => {
                    if let Some(line) = decoder.finish() {
                        if let ControlFlow::Break(()) = Self::relay_line(&line, &mut summary, &sink, &cancel).await? {
                            return Ok(summary);
                        }
                    }
                    return Ok(summary);
                }
            }
        }
    }

    async fn relay_line(
        line: &str,
        summary: &mut StreamSummary,
        sink: &mpsc::Sender<StreamChunk>,
        cancel: &CancellationToken,
    ) -> Result<ControlFlow<()>, LlmError> {
        match parse_line(line)? {
            None => Ok(ControlFlow::Continue(())),
            Some(SseFrame::Done) => Ok(ControlFlow::Break(())),
            Some(SseFrame::Chunk(chunk)) => {
                summary.observe(&chunk);
                tokio::select! {
                    _ = cancel.cancelled() => Err(LlmError::Cancelled),
                    sent = sink.send(chunk) => {
                        sent.map_err(|_| LlmError::RelayClosed)?;
                        Ok(ControlFlow::Continue(()))
                    }
                }
            }
        }
    }

    /// Model ids advertised by the upstream `/models` endpoint.
    pub async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = format!("{}/models", self.base_url);
        let builder = self.authorized(self.sync_http.get(url))?;
        let response = Self::check_status(builder.send().await?).await?;
        let body = response.text().await?;
        let parsed: ModelsEnvelope =
            serde_json::from_str(&body).map_err(|e| LlmError::Decode(e.to_string()))?;
        Ok(parsed
            .data
            .into_iter()
            .map(|m| m.id)
            .filter(|id| !id.is_empty())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{StreamChoice, StreamDelta};

    #[test]
    fn missing_key_is_a_call_time_error() {
        let source = ApiKeySource::Fixed("   ".into());
        assert!(matches!(source.resolve(), Err(LlmError::MissingApiKey(_))));
        let source = ApiKeySource::Env("FM_RSS_TEST_KEY_THAT_IS_NOT_SET".into());
        assert!(matches!(source.resolve(), Err(LlmError::MissingApiKey(v)) if v.contains("NOT_SET")));
        assert_eq!(ApiKeySource::Fixed("k".into()).resolve().unwrap(), "k");
    }

    #[test]
    fn summary_tracks_last_finish_and_usage() {
        let chunk = |content: &str, finish: Option<&str>, usage: Option<Usage>| StreamChunk {
            id: "gen-1".into(),
            model: "m".into(),
            choices: vec![StreamChoice {
                delta: StreamDelta { content: Some(content.into()) },
                finish_reason: finish.map(str::to_string),
            }],
            usage,
        };
        let mut summary = StreamSummary::default();
        summary.observe(&chunk("a", None, None));
        summary.observe(&chunk("b", Some("stop"), Some(Usage { prompt_tokens: 1, completion_tokens: 2, total_tokens: 3 })));
        assert_eq!(summary.chunks, 2);
        assert_eq!(summary.id, "gen-1");
        assert_eq!(summary.finish_reason.as_deref(), Some("stop"));
        assert_eq!(summary.usage.unwrap().total_tokens, 3);
    }
}
