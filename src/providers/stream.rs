use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::Value;

use crate::{
    errors::AppError,
    providers::{ChatMessage, Role, registry::Provider},
};

// SSE framing constants shared by the relay and the record parser.
const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

// Reasoning-capable models are matched by name, not by provider.
const DEEPSEEK_R1_MARKER: &str = "DeepSeek-R1";
const QWEN_THINKING_MARKER: &str = "Qwen3-235B-A22B-Thinking-2507";

/// Re-frame one upstream line into the uniform outbound SSE format.
///
/// Lines already carrying the `data: ` prefix pass through with the SSE
/// record terminator appended; any other non-blank line is wrapped first.
/// Blank lines produce nothing.
pub fn frame_line(line: &str) -> Option<String> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }

    if line.starts_with(DATA_PREFIX) {
        Some(format!("{}\n\n", line))
    } else {
        Some(format!("{}{}\n\n", DATA_PREFIX, line))
    }
}

struct RelayState<E> {
    upstream: BoxStream<'static, Result<Bytes, E>>,
    buffer: String,
    done: bool,
}

/// Re-frame a heterogeneous upstream byte stream (SSE or raw
/// newline-delimited JSON) into one consistent SSE stream.
///
/// The consumer never needs provider-specific parsing at the transport
/// level; provider differences survive only inside the JSON payloads.
pub fn relay_sse<S, E>(upstream: S) -> impl Stream<Item = Result<Bytes, AppError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = RelayState {
        upstream: upstream.boxed(),
        buffer: String::new(),
        done: false,
    };

    futures::stream::try_unfold(state, |mut state| async move {
        if state.done {
            return Ok(None);
        }

        loop {
            match state.upstream.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.push_str(&String::from_utf8_lossy(&chunk));

                    let mut framed = String::new();
                    while let Some(pos) = state.buffer.find('\n') {
                        let line: String = state.buffer.drain(..=pos).collect();
                        if let Some(out) = frame_line(&line) {
                            framed.push_str(&out);
                        }
                    }

                    if !framed.is_empty() {
                        return Ok(Some((Bytes::from(framed), state)));
                    }
                    // No complete line yet, keep buffering.
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "upstream stream failed mid-transfer");
                    return Err(AppError::internal(format!("Upstream stream error: {}", e)));
                }
                None => {
                    state.done = true;
                    // Flush a trailing line the upstream never terminated.
                    let tail = std::mem::take(&mut state.buffer);
                    match frame_line(&tail) {
                        Some(out) => return Ok(Some((Bytes::from(out), state))),
                        None => return Ok(None),
                    }
                }
            }
        }
    })
}

/// Which JSON delta shape to expect inside normalized SSE records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaShape {
    /// `choices[0].delta.content`, with an optional `reasoning_content`
    /// sibling on reasoning-capable models.
    OpenAiChoices,
    /// `content_block_delta` records with text at `delta.text`.
    AnthropicBlocks,
}

impl DeltaShape {
    pub fn for_provider(provider: Provider) -> Self {
        match provider {
            Provider::Anthropic => Self::AnthropicBlocks,
            Provider::OpenAi | Provider::SiliconFlow | Provider::Doubao => Self::OpenAiChoices,
        }
    }
}

/// One incremental fragment, split into its two independent channels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDelta {
    pub content: String,
    pub reasoning: String,
}

/// Result of interpreting one normalized SSE line.
#[derive(Debug, Clone, PartialEq)]
pub enum SseRecord {
    Delta(StreamDelta),
    /// The `[DONE]` sentinel; the stream is complete.
    Done,
    /// Blank line, non-data line, empty delta, or malformed JSON.
    /// Malformed records are logged and must not abort the stream.
    Skip,
}

/// Interpret one line of the normalized stream.
pub fn parse_sse_line(shape: DeltaShape, line: &str) -> SseRecord {
    let line = line.trim();
    let Some(data) = line.strip_prefix(DATA_PREFIX) else {
        return SseRecord::Skip;
    };

    if data.trim() == DONE_SENTINEL {
        return SseRecord::Done;
    }

    let payload: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed stream record");
            return SseRecord::Skip;
        }
    };

    let delta = match shape {
        DeltaShape::OpenAiChoices => {
            let delta = &payload["choices"][0]["delta"];
            StreamDelta {
                content: delta["content"].as_str().unwrap_or_default().to_string(),
                reasoning: delta["reasoning_content"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
            }
        }
        DeltaShape::AnthropicBlocks => {
            if payload["type"] != "content_block_delta" {
                return SseRecord::Skip;
            }
            StreamDelta {
                content: payload["delta"]["text"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                reasoning: String::new(),
            }
        }
    };

    if delta.content.is_empty() && delta.reasoning.is_empty() {
        SseRecord::Skip
    } else {
        SseRecord::Delta(delta)
    }
}

/// Whether (and how) a model emits a separate deliberation trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReasoningMode {
    Off,
    /// Thinking stays expanded after the stream completes.
    DeepSeekR1,
    /// Thinking collapses automatically once the stream completes.
    QwenThinking,
}

fn reasoning_mode(model: &str) -> ReasoningMode {
    if model.contains(DEEPSEEK_R1_MARKER) {
        ReasoningMode::DeepSeekR1
    } else if model.contains(QWEN_THINKING_MARKER) {
        ReasoningMode::QwenThinking
    } else {
        ReasoningMode::Off
    }
}

/// Explicit accumulator for one streamed assistant turn.
///
/// Owns the in-flight state instead of mutating a shared message list, so
/// a caller driving several conversations only has to serialize the final
/// flush. `content` and `reasoning` accumulate independently; the
/// reasoning channel only engages for models matched by name.
#[derive(Debug)]
pub struct StreamAccumulator {
    shape: DeltaShape,
    reasoning: ReasoningMode,
    content: String,
    thinking: String,
    done: bool,
}

impl StreamAccumulator {
    pub fn new(provider: Provider, model: &str) -> Self {
        Self {
            shape: DeltaShape::for_provider(provider),
            reasoning: reasoning_mode(model),
            content: String::new(),
            thinking: String::new(),
            done: false,
        }
    }

    /// Feed one normalized SSE line. Returns `false` once the stream has
    /// reached its `[DONE]` sentinel and further input is ignored.
    pub fn push_line(&mut self, line: &str) -> bool {
        if self.done {
            return false;
        }

        match parse_sse_line(self.shape, line) {
            SseRecord::Done => self.done = true,
            SseRecord::Delta(delta) => {
                self.content.push_str(&delta.content);
                if self.reasoning != ReasoningMode::Off {
                    self.thinking.push_str(&delta.reasoning);
                }
            }
            SseRecord::Skip => {}
        }

        !self.done
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// In-flight view of the assistant message; the thinking channel stays
    /// expanded while deltas are still arriving.
    pub fn snapshot(&self) -> ChatMessage {
        self.to_message(true)
    }

    /// Final assistant message. For the Qwen thinking variant the
    /// deliberation trace collapses on completion.
    pub fn finish(self) -> ChatMessage {
        let expanded = self.reasoning != ReasoningMode::QwenThinking;
        self.to_message(expanded)
    }

    fn to_message(&self, expanded: bool) -> ChatMessage {
        ChatMessage {
            role: Role::Assistant,
            content: self.content.clone(),
            image: None,
            images: None,
            thinking_process: (!self.thinking.is_empty()).then(|| self.thinking.clone()),
            show_thinking: (!self.thinking.is_empty()).then_some(expanded),
        }
    }
}

/// Project an image-generation response into display URLs.
///
/// An empty or malformed `data` array is a soft failure: the caller shows
/// a message, nothing is thrown.
pub fn parse_image_urls(body: &Value) -> Vec<String> {
    body.get("data")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("url").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
