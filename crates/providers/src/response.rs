//! Turning response bodies into text.
//!
//! Whole bodies are matched against a fixed list of shapes, tried in order.
//! Streamed bodies are folded chunk by chunk by [`StreamAccumulator`].

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ProviderError, Result};
use crate::sse::StreamLine;

/// Characters of an unrecognized payload kept in the error
const SHAPE_DUMP_CHARS: usize = 300;

/// The answer to one chat call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Completion {
    pub content: String,
    /// Separate reasoning channel some models stream alongside the answer
    pub reasoning: Option<String>,
}

impl Completion {
    /// The answer, or the reasoning when a model produced nothing else
    pub fn text(&self) -> &str {
        if self.content.trim().is_empty() {
            self.reasoning.as_deref().unwrap_or("")
        } else {
            &self.content
        }
    }
}

/// Accepted non-streaming response layouts, in matching order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// `choices[0].message.content`
    ChatCompletion,
    /// `choices[0].text`
    TextCompletion,
    /// top-level `content`
    Content,
    /// top-level `text`
    Text,
    /// top-level `message`
    Message,
}

impl ResponseShape {
    pub const ORDER: [ResponseShape; 5] = [
        ResponseShape::ChatCompletion,
        ResponseShape::TextCompletion,
        ResponseShape::Content,
        ResponseShape::Text,
        ResponseShape::Message,
    ];

    fn pointer(self) -> &'static str {
        match self {
            ResponseShape::ChatCompletion => "/choices/0/message/content",
            ResponseShape::TextCompletion => "/choices/0/text",
            ResponseShape::Content => "/content",
            ResponseShape::Text => "/text",
            ResponseShape::Message => "/message",
        }
    }

    pub fn extract(self, body: &Value) -> Option<&str> {
        body.pointer(self.pointer()).and_then(Value::as_str)
    }
}

/// Parses a whole JSON response body.
pub fn parse_completion(body: &Value) -> Result<(ResponseShape, Completion)> {
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| error.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ProviderError::Api(message));
    }

    for shape in ResponseShape::ORDER {
        if let Some(content) = shape.extract(body) {
            let reasoning = body
                .pointer("/choices/0/message/reasoning_content")
                .and_then(Value::as_str)
                .filter(|r| !r.trim().is_empty())
                .map(str::to_string);
            if content.trim().is_empty() && reasoning.is_none() {
                return Err(ProviderError::EmptyResponse);
            }
            return Ok((
                shape,
                Completion {
                    content: content.to_string(),
                    reasoning,
                },
            ));
        }
    }

    // A completion envelope without any text, e.g. `"content": null`
    if body.get("choices").is_some() {
        return Err(ProviderError::EmptyResponse);
    }
    Err(ProviderError::UnrecognizedShape(truncate(
        &body.to_string(),
        SHAPE_DUMP_CHARS,
    )))
}

/// Parses a response body that may not even be JSON.
pub fn parse_completion_text(text: &str) -> Result<Completion> {
    match serde_json::from_str::<Value>(text) {
        Ok(body) => parse_completion(&body).map(|(shape, completion)| {
            tracing::debug!(?shape, "parsed completion body");
            completion
        }),
        Err(_) if text.trim().is_empty() => Err(ProviderError::EmptyResponse),
        Err(_) => Err(ProviderError::UnrecognizedShape(truncate(
            text,
            SHAPE_DUMP_CHARS,
        ))),
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

// ── Streaming ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDeltaBody,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDeltaBody {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

/// Incremental text surfaced while a response streams in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDelta {
    Content(String),
    Reasoning(String),
}

/// Folds stream lines into a [`Completion`], in arrival order.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    reasoning: String,
    skipped: usize,
    done: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one line and returns the deltas it carried. A line that is
    /// not valid JSON is logged and skipped.
    pub fn apply(&mut self, line: &StreamLine) -> Vec<StreamDelta> {
        let data = match line {
            StreamLine::Done => {
                self.done = true;
                return Vec::new();
            }
            StreamLine::Data(data) => data,
        };

        let chunk = match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.skipped += 1;
                tracing::warn!(
                    error = %e,
                    line = %truncate(data, 120),
                    "skipping unparseable stream chunk"
                );
                return Vec::new();
            }
        };

        let mut deltas = Vec::new();
        if let Some(choice) = chunk.choices.into_iter().next() {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                self.content.push_str(&text);
                deltas.push(StreamDelta::Content(text));
            }
            if let Some(text) = choice.delta.reasoning_content.filter(|t| !t.is_empty()) {
                self.reasoning.push_str(&text);
                deltas.push(StreamDelta::Reasoning(text));
            }
        }
        deltas
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of lines dropped as unparseable
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn finish(self) -> Result<Completion> {
        if self.content.trim().is_empty() && self.reasoning.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(Completion {
            content: self.content,
            reasoning: (!self.reasoning.is_empty()).then_some(self.reasoning),
        })
    }
}
