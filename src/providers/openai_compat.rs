//! Adapter for vendors exposing an OpenAI-style `chat/completions` API
//! (Cerebras, Gemini's compatibility endpoint, NVIDIA NIM)

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, trace, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{ProviderConfig, MAX_PROBE_TIMEOUT_SECS};
use crate::error::{Error, ErrorKind, ProviderError};
use crate::providers::{Provider, TextStream};
use crate::request::{GenerationRequest, GenerationResponse};
use crate::ProviderId;

const DEFAULT_TOP_P: f32 = 0.9;
const MAX_ERROR_MESSAGE_CHARS: usize = 200;

// ===== Message Types =====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage
{   pub role: String
  , pub content: String
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest
{   pub model: String
  , pub messages: Vec<ChatMessage>
  , pub max_tokens: u32
  , pub temperature: f32
  , pub top_p: f32
  , pub stream: bool
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse
{   pub choices: Vec<Choice>
  , #[serde(default)]
    pub usage: Option<Usage>
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice
{   pub message: ChatMessage
  , #[serde(default)]
    pub finish_reason: Option<String>
}

#[derive(Debug, Clone, Deserialize)]
pub struct Usage
{   #[serde(default)]
    pub total_tokens: Option<u32>
}

#[derive(Debug, Clone, Deserialize)]
struct StreamChunk
{   #[serde(default)]
    choices: Vec<StreamChoice>
}

#[derive(Debug, Clone, Deserialize)]
struct StreamChoice
{   #[serde(default)]
    delta: Delta
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Delta
{   #[serde(default)]
    content: Option<String>
}

// ===== Key rotation =====

/// Provider-private round-robin over API keys
#[derive(Debug)]
pub struct KeyRing
{   keys: Vec<String>
  , cursor: AtomicUsize
}

impl KeyRing
{   pub fn new(keys: Vec<String>) -> Result<Self, Error>
    {   if keys.is_empty()
        {   return Err(Error::InvalidConfiguration(
              "at least one API key is required".to_string()
            ));
        }
        Ok(KeyRing
        {   keys
          , cursor: AtomicUsize::new(0)
        })
    }

    /// Key for the next call; advances the cursor
    pub fn next_key(&self) -> &str
    {   let slot = self.cursor.fetch_add(1, Ordering::Relaxed);
        &self.keys[slot % self.keys.len()]
    }

    pub fn first(&self) -> &str
    {   &self.keys[0]
    }

    pub fn len(&self) -> usize
    {   self.keys.len()
    }

    pub fn is_empty(&self) -> bool
    {   self.keys.is_empty()
    }
}

// ===== Provider =====

pub struct OpenAiCompatProvider
{   id: ProviderId
  , base_url: String
  , model: String
  , models: Vec<String>
  , keys: KeyRing
  , timeout: Duration
  , probe_timeout: Duration
  , http_client: reqwest::Client
}

impl OpenAiCompatProvider
{   pub fn new(
      config: &ProviderConfig
    , default_timeout: Duration
    , probe_timeout: Duration
    , http_client: reqwest::Client
    ) -> Result<Self, Error>
    {   let keys = KeyRing::new(config.api_keys.clone())
          .map_err(|_| Error::InvalidConfiguration(format!(
            "{} has no API keys", config.id
          )))?;
        let timeout = config.timeout_secs
          .map(Duration::from_secs)
          .unwrap_or(default_timeout);
        let probe_timeout = probe_timeout
          .min(Duration::from_secs(MAX_PROBE_TIMEOUT_SECS));
        let (model, models) = resolve_model(config);

        info!(
          "{} provider initialized: model={}, keys={}"
        , config.id, model, keys.len()
        );

        Ok(OpenAiCompatProvider
        {   id: config.id
          , base_url: config.base_url.trim_end_matches('/').to_string()
          , model
          , models
          , keys
          , timeout
          , probe_timeout
          , http_client
        })
    }

    fn build_request(
      &self
    , request: &GenerationRequest
    , stream: bool
    ) -> ChatRequest
    {   let mut messages = Vec::with_capacity(2);
        if let Some(context) = request.context()
        {   messages.push(ChatMessage
            {   role: "system".to_string()
              , content: format!(
                  "Context: {}"
                , serde_json::Value::Object(context.clone())
                )
            });
        }
        messages.push(ChatMessage
        {   role: "user".to_string()
          , content: request.prompt().to_string()
        });

        ChatRequest
        {   model: self.model.clone()
          , messages
          , max_tokens: request.max_tokens()
          , temperature: request.temperature()
          , top_p: DEFAULT_TOP_P
          , stream
        }
    }

    fn transport_error(&self, e: &reqwest::Error) -> ProviderError
    {   if e.is_timeout()
        {   return ProviderError::timeout(self.id, self.timeout);
        }
        ProviderError::new(
          self.id
        , ErrorKind::UpstreamFault
        , format!("transport error: {}", e)
        )
    }

    async fn status_error(&self, response: reqwest::Response)
      -> ProviderError
    {   let status = response.status().as_u16();
        let body = response.text().await
          .unwrap_or_else(|_| String::new());
        let kind = classify_status(status, &body);
        error!("{} API error: HTTP {} ({})", self.id, status, kind);
        ProviderError::new(
          self.id
        , kind
        , format!("HTTP {}: {}", status, upstream_message(&body))
        )
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider
{   fn id(&self) -> ProviderId
    {   self.id
    }

    fn model(&self) -> &str
    {   &self.model
    }

    fn available_models(&self) -> Vec<String>
    {   self.models.clone()
    }

    async fn generate(
      &self
    , request: &GenerationRequest
    ) -> Result<GenerationResponse, ProviderError>
    {   let started = Instant::now();
        let body = self.build_request(request, false);
        trace!("{} request: {} message(s)", self.id, body.messages.len());

        let response = self.http_client
          .post(format!("{}/chat/completions", self.base_url))
          .bearer_auth(self.keys.next_key())
          .timeout(self.timeout)
          .json(&body)
          .send()
          .await
          .map_err(|e| {
            error!("{} HTTP error: {}", self.id, e);
            self.transport_error(&e)
          })?;

        trace!("{} response status: {}", self.id, response.status());
        if !response.status().is_success()
        {   return Err(self.status_error(response).await);
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
          if e.is_timeout()
          {   return ProviderError::timeout(self.id, self.timeout);
          }
          error!("{} parse error: {}", self.id, e);
          ProviderError::new(
            self.id
          , ErrorKind::UpstreamFault
          , "unparsable response body"
          )
        })?;

        let text = chat.choices.into_iter()
          .next()
          .map(|c| c.message.content)
          .filter(|content| !content.is_empty())
          .ok_or_else(|| {
            error!("{} returned no choices", self.id);
            ProviderError::new(
              self.id
            , ErrorKind::UpstreamFault
            , "response contained no choices"
            )
          })?;

        let latency_ms = started.elapsed().as_millis() as u64;
        let tokens_used = chat.usage.and_then(|u| u.total_tokens);
        debug!(
          "{} generation ok: model={}, latency={}ms, tokens={:?}"
        , self.id, self.model, latency_ms, tokens_used
        );

        Ok(GenerationResponse
        {   text
          , provider: self.id
          , model: self.model.clone()
          , tokens_used
          , latency_ms
          , fallback: false
        })
    }

    fn supports_streaming(&self) -> bool
    {   true
    }

    async fn generate_stream(
      &self
    , request: &GenerationRequest
    ) -> Result<TextStream, ProviderError>
    {   let body = self.build_request(request, true);

        // The per-call timeout bounds the wait for headers and each
        // body read, not the whole body.
        let send = self.http_client
          .post(format!("{}/chat/completions", self.base_url))
          .bearer_auth(self.keys.next_key())
          .json(&body)
          .send();
        let response = match tokio::time::timeout(self.timeout, send).await
        {   Ok(Ok(response)) => response
          , Ok(Err(e)) => {
              error!("{} streaming HTTP error: {}", self.id, e);
              return Err(self.transport_error(&e));
            }
          , Err(_) => {
              error!("{} streaming request timed out", self.id);
              return Err(ProviderError::timeout(self.id, self.timeout));
            }
        };

        if !response.status().is_success()
        {   return Err(self.status_error(response).await);
        }

        let body = response.bytes_stream()
          .map(|chunk| chunk.map(|b| b.to_vec()))
          .boxed();
        Ok(sse_text_stream(self.id, body, self.timeout))
    }

    async fn health_probe(&self) -> bool
    {   let result = self.http_client
          .get(format!("{}/models", self.base_url))
          .bearer_auth(self.keys.first())
          .timeout(self.probe_timeout)
          .send()
          .await;
        match result
        {   Ok(response) => {
              let ok = response.status().is_success();
              if !ok
              {   warn!(
                    "{} health probe returned HTTP {}"
                  , self.id, response.status()
                  );
              }
              ok
            }
          , Err(e) => {
              warn!("{} health probe failed: {}", self.id, e);
              false
            }
        }
    }
}

/// Configured model, checked against the offered list. An unknown
/// model falls back to the role default, or the first offered model.
fn resolve_model(config: &ProviderConfig) -> (String, Vec<String>)
{   if config.models.is_empty()
    {   return (config.model.clone(), vec![config.model.clone()]);
    }
    if config.models.contains(&config.model)
    {   return (config.model.clone(), config.models.clone());
    }

    let role_default = ProviderConfig::default_model(config.id);
    let fallback = if config.models.iter().any(|m| m == role_default)
    {   role_default.to_string()
    } else
    {   config.models[0].clone()
    };
    warn!(
      "{} model {:?} not offered, falling back to {}"
    , config.id, config.model, fallback
    );
    (fallback, config.models.clone())
}

// ===== Error classification =====

/// Map an upstream HTTP status (and body hints) to an error kind
pub fn classify_status(status: u16, body: &str) -> ErrorKind
{   match status
    {   401 | 403 => ErrorKind::BadCredentials
      , 402 => ErrorKind::QuotaExhausted
      , 429 => {
          if body.to_ascii_lowercase().contains("quota")
          {   ErrorKind::QuotaExhausted
          } else
          {   ErrorKind::RateLimited
          }
        }
      , 400 | 404 | 413 | 422 => ErrorKind::MalformedRequest
      , 408 => ErrorKind::Timeout
      , 451 => ErrorKind::ContentRejected
      , 500..=599 => ErrorKind::UpstreamFault
      , _ => ErrorKind::Unknown
    }
}

/// Upstream error text, truncated; never the raw payload
fn upstream_message(body: &str) -> String
{   let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let message = parsed.as_ref().and_then(|v| {
      v.pointer("/error/message")
        .or_else(|| v.get("message"))
        .and_then(|m| m.as_str())
    });
    match message
    {   Some(m) => m.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
      , None => "upstream error".to_string()
    }
}

// ===== Server-sent events =====

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent
{   Fragment(String)
  , Done
}

/// Line-oriented decoder for `data:` events; tolerates chunks that split
/// lines or multi-byte characters
#[derive(Debug, Default)]
pub struct SseDecoder
{   buffer: Vec<u8>
}

impl SseDecoder
{   pub fn new() -> Self
    {   SseDecoder::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent>
    {   self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n')
        {   let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_line(&String::from_utf8_lossy(&line))
            {   events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that arrived without a newline
    pub fn finish(&mut self) -> Vec<SseEvent>
    {   let line = std::mem::take(&mut self.buffer);
        parse_line(&String::from_utf8_lossy(&line))
          .into_iter()
          .collect()
    }
}

fn parse_line(line: &str) -> Option<SseEvent>
{   let data = line.trim().strip_prefix("data:")?.trim();
    if data == "[DONE]"
    {   return Some(SseEvent::Done);
    }
    let chunk: StreamChunk = match serde_json::from_str(data)
    {   Ok(chunk) => chunk
      , Err(_) => {
          trace!("skipping unparsable stream line");
          return None;
        }
    };
    chunk.choices.into_iter()
      .next()
      .and_then(|c| c.delta.content)
      .filter(|content| !content.is_empty())
      .map(SseEvent::Fragment)
}

struct SseState
{   id: ProviderId
  , read_timeout: Duration
  , body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>
  , decoder: SseDecoder
  , pending: VecDeque<String>
  , finished: bool
}

impl SseState
{   fn absorb(&mut self, events: Vec<SseEvent>)
    {   for event in events
        {   match event
            {   SseEvent::Fragment(text) => self.pending.push_back(text)
              , SseEvent::Done => {
                  self.finished = true;
                  break;
                }
            }
        }
    }
}

/// Decode an SSE body into text fragments. Each read from `body` is
/// bounded by `read_timeout`; a stall ends the stream with a timeout.
fn sse_text_stream(
  id: ProviderId
, body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>
, read_timeout: Duration
) -> TextStream
{   let state = SseState
    {   id
      , read_timeout
      , body
      , decoder: SseDecoder::new()
      , pending: VecDeque::new()
      , finished: false
    };

    stream::unfold(state, |mut st| async move {
      loop
      {   if let Some(text) = st.pending.pop_front()
          {   return Some((Ok(text), st));
          }
          if st.finished
          {   return None;
          }
          let next = match tokio::time::timeout(
              st.read_timeout
            , st.body.next()
            ).await
          {   Ok(next) => next
            , Err(_) => {
                error!(
                  "{} stream stalled for {}ms"
                , st.id, st.read_timeout.as_millis()
                );
                st.finished = true;
                st.pending.clear();
                let err = ProviderError::new(
                  st.id
                , ErrorKind::Timeout
                , format!(
                    "stream stalled for {}ms"
                  , st.read_timeout.as_millis()
                  )
                );
                return Some((Err(err), st));
              }
          };
          match next
          {   Some(Ok(chunk)) => {
                let events = st.decoder.push(&chunk);
                st.absorb(events);
              }
            , Some(Err(e)) => {
                error!("{} stream interrupted: {}", st.id, e);
                st.finished = true;
                st.pending.clear();
                let kind = if e.is_timeout()
                {   ErrorKind::Timeout
                } else
                {   ErrorKind::UpstreamFault
                };
                let err = ProviderError::new(
                  st.id
                , kind
                , "stream interrupted"
                );
                return Some((Err(err), st));
              }
            , None => {
                let events = st.decoder.finish();
                st.absorb(events);
                st.finished = true;
              }
          }
      }
    }).boxed()
}
