use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::content_final_validator::{ContentFinalValidator, SnapshotDecision};
use crate::formatting::{DeltaContext, FormatPipeline};
use crate::models::Message;
use crate::parsing;

/// One event pushed by the transport for a message stream
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Content {
        text: String,
        #[serde(default)]
        block_type: Option<String>,
    },
    Text {
        text: String,
    },
    ContentFinal {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ReasoningFinish,
    StreamEnd,
    Finish,
    /// Any event kind this processor does not know about
    #[serde(other)]
    Unknown,
}

/// Outcome of consuming one event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessResult {
    /// Display text after the event (may carry a provisional fence closer)
    ContentUpdated(String),
    ReasoningUpdated(String),
    ReasoningComplete,
    StreamComplete,
    NoChange,
    Cancelled,
    Error(String),
}

/// Status of a stream lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamStatus {
    Active,
    Cancelled,
    Completed,
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("no content received for message {message_id}")]
    DataLoss { message_id: String },

    #[error("stream processor was not initialized")]
    NotInitialized,

    #[error("processor is bound to message {bound}, not {expected}")]
    MessageMismatch { expected: String, bound: String },
}

struct StreamState {
    session_id: Option<String>,
    message_id: Option<String>,
    status: StreamStatus,
    text: String,
    context: DeltaContext,
    reasoning: String,
    reasoning_complete: bool,
    finalized: bool,
}

impl StreamState {
    fn unbound() -> Self {
        Self {
            session_id: None,
            message_id: None,
            status: StreamStatus::Active,
            text: String::new(),
            context: DeltaContext::default(),
            reasoning: String::new(),
            reasoning_complete: false,
            finalized: false,
        }
    }

    fn clear_buffers(&mut self) {
        self.text.clear();
        self.context = DeltaContext::default();
        self.reasoning.clear();
        self.reasoning_complete = false;
        self.finalized = false;
    }
}

/// Accumulates one in-flight message stream.
///
/// All state sits behind a single lock, so `finalize` never interleaves with
/// `process_event`. One processor per stream; do not share across streams.
pub struct StreamProcessor {
    pipeline: Arc<FormatPipeline>,
    validator: ContentFinalValidator,
    state: Mutex<StreamState>,
}

impl StreamProcessor {
    pub fn new(pipeline: Arc<FormatPipeline>) -> Self {
        Self::with_validator(pipeline, ContentFinalValidator::default())
    }

    pub fn with_validator(pipeline: Arc<FormatPipeline>, validator: ContentFinalValidator) -> Self {
        Self {
            pipeline,
            validator,
            state: Mutex::new(StreamState::unbound()),
        }
    }

    /// Bind to a message and start accumulating from scratch
    pub fn initialize(&self, session_id: impl Into<String>, message_id: impl Into<String>) {
        let mut state = self.state.lock();
        state.clear_buffers();
        state.session_id = Some(session_id.into());
        state.message_id = Some(message_id.into());
        state.status = StreamStatus::Active;
        debug!(message_id = ?state.message_id, "Stream processor initialized");
    }

    pub fn process_event(&self, event: StreamEvent, expected_message_id: &str) -> ProcessResult {
        let mut state = self.state.lock();

        match state.message_id.as_deref() {
            None => return ProcessResult::Error(StreamError::NotInitialized.to_string()),
            Some(bound) if bound != expected_message_id => {
                debug!(
                    bound = %bound,
                    expected = %expected_message_id,
                    "Dropping event for stale message"
                );
                return ProcessResult::Cancelled;
            }
            Some(_) => {}
        }

        match state.status {
            StreamStatus::Cancelled => return ProcessResult::Cancelled,
            StreamStatus::Completed => return ProcessResult::NoChange,
            StreamStatus::Active => {}
        }

        match event {
            StreamEvent::Content { text, block_type }
                if matches!(block_type.as_deref(), Some("reasoning" | "thinking")) =>
            {
                self.append_reasoning(&mut state, &text)
            }
            StreamEvent::Content { text, .. } | StreamEvent::Text { text } => {
                self.append_content(&mut state, &text)
            }
            StreamEvent::ContentFinal { text } => {
                match self.validator.decide(&state.text, &text) {
                    SnapshotDecision::Append => self.append_content(&mut state, &text),
                    SnapshotDecision::Replace => {
                        state.context = DeltaContext::from_text(&text);
                        state.text = text;
                        self.content_view(&state)
                    }
                    SnapshotDecision::Keep => ProcessResult::NoChange,
                }
            }
            StreamEvent::Reasoning { text } => self.append_reasoning(&mut state, &text),
            StreamEvent::ReasoningFinish => {
                state.reasoning_complete = true;
                ProcessResult::ReasoningComplete
            }
            StreamEvent::StreamEnd | StreamEvent::Finish => {
                state.status = StreamStatus::Completed;
                debug!(
                    message_id = ?state.message_id,
                    chars = state.text.len(),
                    "Stream completed"
                );
                ProcessResult::StreamComplete
            }
            StreamEvent::Unknown => ProcessResult::NoChange,
        }
    }

    fn append_content(&self, state: &mut StreamState, delta: &str) -> ProcessResult {
        if delta.is_empty() {
            return ProcessResult::NoChange;
        }
        let cleaned = self.pipeline.preprocess_delta(delta, &mut state.context);
        state.text.push_str(&cleaned);
        self.content_view(state)
    }

    fn content_view(&self, state: &StreamState) -> ProcessResult {
        let view = self
            .pipeline
            .progressive_view(&state.text, &state.context)
            .unwrap_or_else(|| state.text.clone());
        ProcessResult::ContentUpdated(view)
    }

    fn append_reasoning(&self, state: &mut StreamState, delta: &str) -> ProcessResult {
        if delta.is_empty() {
            return ProcessResult::NoChange;
        }
        state.reasoning.push_str(delta);
        ProcessResult::ReasoningUpdated(state.reasoning.clone())
    }

    /// Freeze the accumulated stream into `message`.
    ///
    /// Accumulated text wins over the message's own text; with neither, the
    /// stream lost its content and this fails rather than produce an empty
    /// successful message. A stream finalizes once; `initialize` or `reset`
    /// arms it again.
    pub fn finalize(&self, mut message: Message) -> Result<Message, StreamError> {
        let mut state = self.state.lock();

        if state.finalized {
            return Err(StreamError::NotInitialized);
        }
        let bound = state.message_id.as_deref().ok_or(StreamError::NotInitialized)?;
        if bound != message.id {
            return Err(StreamError::MessageMismatch {
                expected: message.id.clone(),
                bound: bound.to_string(),
            });
        }

        let raw = if !state.text.trim().is_empty() {
            state.text.clone()
        } else if !message.text.trim().is_empty() {
            debug!(message_id = %message.id, "Accumulated text empty, using existing text");
            std::mem::take(&mut message.text)
        } else {
            warn!(message_id = %message.id, "Finalize found no content");
            return Err(StreamError::DataLoss {
                message_id: message.id.clone(),
            });
        };

        let start = Instant::now();
        let text = self.pipeline.finalize_text(&raw);
        let parts = parsing::parse(&text);

        message.text = text;
        message.parts = parts;
        if !state.reasoning.is_empty() {
            message.reasoning = Some(state.reasoning.clone());
        }
        if message.is_error {
            message.reasoning = None;
        }
        message.content_started = true;
        message.is_streaming = false;
        message.reasoning_complete = true;
        state.finalized = true;

        info!(
            message_id = %message.id,
            blocks = message.parts.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Message finalized"
        );
        Ok(message)
    }

    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.status = StreamStatus::Cancelled;
        debug!(message_id = ?state.message_id, "Stream cancelled");
    }

    /// Clear the buffers, keeping the binding and status
    pub fn reset(&self) {
        self.state.lock().clear_buffers();
    }

    pub fn status(&self) -> StreamStatus {
        self.state.lock().status
    }

    pub fn text(&self) -> String {
        self.state.lock().text.clone()
    }

    pub fn reasoning(&self) -> String {
        self.state.lock().reasoning.clone()
    }

    pub fn is_reasoning_complete(&self) -> bool {
        self.state.lock().reasoning_complete
    }

    pub fn session_id(&self) -> Option<String> {
        self.state.lock().session_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatting::CorrectionConfig;
    use crate::models::ContentBlock;

    fn processor() -> StreamProcessor {
        StreamProcessor::new(Arc::new(FormatPipeline::default()))
    }

    fn content(text: &str) -> StreamEvent {
        StreamEvent::Content {
            text: text.to_string(),
            block_type: None,
        }
    }

    #[test]
    fn test_accumulates_content_in_order() {
        let p = processor();
        p.initialize("s1", "m1");

        assert_eq!(
            p.process_event(content("Hello"), "m1"),
            ProcessResult::ContentUpdated("Hello".into())
        );
        assert_eq!(
            p.process_event(StreamEvent::Text { text: " world".into() }, "m1"),
            ProcessResult::ContentUpdated("Hello world".into())
        );
        assert_eq!(p.text(), "Hello world");
    }

    #[test]
    fn test_stale_message_id_is_cancelled() {
        let p = processor();
        p.initialize("s1", "m1");
        assert_eq!(p.process_event(content("x"), "m0"), ProcessResult::Cancelled);
        assert_eq!(p.text(), "");
    }

    #[test]
    fn test_uninitialized_is_error() {
        let p = processor();
        assert!(matches!(p.process_event(content("x"), "m1"), ProcessResult::Error(_)));
    }

    #[test]
    fn test_reasoning_finish_stays_active() {
        let p = processor();
        p.initialize("s1", "m1");
        p.process_event(StreamEvent::Reasoning { text: "think".into() }, "m1");
        assert_eq!(
            p.process_event(StreamEvent::ReasoningFinish, "m1"),
            ProcessResult::ReasoningComplete
        );
        assert_eq!(p.status(), StreamStatus::Active);
        assert!(p.is_reasoning_complete());
        assert_eq!(
            p.process_event(content("answer"), "m1"),
            ProcessResult::ContentUpdated("answer".into())
        );
    }

    #[test]
    fn test_reasoning_block_type_routes_to_reasoning() {
        let p = processor();
        p.initialize("s1", "m1");
        let event = StreamEvent::Content {
            text: "hmm".into(),
            block_type: Some("thinking".into()),
        };
        assert_eq!(
            p.process_event(event, "m1"),
            ProcessResult::ReasoningUpdated("hmm".into())
        );
        assert_eq!(p.text(), "");
    }

    #[test]
    fn test_completed_is_terminal() {
        let p = processor();
        p.initialize("s1", "m1");
        p.process_event(content("done"), "m1");
        assert_eq!(p.process_event(StreamEvent::Finish, "m1"), ProcessResult::StreamComplete);
        assert_eq!(p.process_event(content("late"), "m1"), ProcessResult::NoChange);
        assert_eq!(p.text(), "done");
    }

    #[test]
    fn test_cancel_is_terminal() {
        let p = processor();
        p.initialize("s1", "m1");
        p.process_event(StreamEvent::StreamEnd, "m1");
        p.cancel();
        assert_eq!(p.status(), StreamStatus::Cancelled);
        assert_eq!(p.process_event(content("x"), "m1"), ProcessResult::Cancelled);
    }

    #[test]
    fn test_unknown_event_is_no_change() {
        let p = processor();
        p.initialize("s1", "m1");
        let event: StreamEvent = serde_json::from_str(r#"{"type":"tool_call","id":"t"}"#).unwrap();
        assert_eq!(event, StreamEvent::Unknown);
        assert_eq!(p.process_event(event, "m1"), ProcessResult::NoChange);
    }

    #[test]
    fn test_content_final_prefix_extension_replaces() {
        let p = processor();
        p.initialize("s1", "m1");
        p.process_event(content("Hello wor"), "m1");
        p.process_event(StreamEvent::ContentFinal { text: "Hello world".into() }, "m1");
        assert_eq!(p.text(), "Hello world");
    }

    #[test]
    fn test_content_final_into_empty_buffer_appends() {
        let p = processor();
        p.initialize("s1", "m1");
        p.process_event(StreamEvent::ContentFinal { text: "whole answer".into() }, "m1");
        assert_eq!(p.text(), "whole answer");
    }

    #[test]
    fn test_progressive_view_closes_open_fence() {
        let p = processor();
        p.initialize("s1", "m1");
        let result = p.process_event(content("```python\nprint(1)\n"), "m1");
        assert_eq!(
            result,
            ProcessResult::ContentUpdated("```python\nprint(1)\n```".into())
        );
        assert_eq!(p.text(), "```python\nprint(1)\n");
    }

    #[test]
    fn test_finalize_parses_blocks() {
        let p = processor();
        let message = Message::ai_placeholder();
        p.initialize("s1", message.id.clone());
        p.process_event(content("```python\nprint(1)\n```"), &message.id);
        p.process_event(StreamEvent::StreamEnd, &message.id);

        let finalized = p.finalize(message).unwrap();
        assert!(finalized.content_started);
        assert!(!finalized.is_streaming);
        assert_eq!(
            finalized.parts,
            vec![ContentBlock::code("print(1)", Some("python"))]
        );
        assert!(finalized.is_consistent());
    }

    #[test]
    fn test_finalize_runs_once_per_stream() {
        let p = processor();
        let message = Message::ai_placeholder();
        p.initialize("s1", message.id.clone());
        p.process_event(content("first answer"), &message.id);

        let finalized = p.finalize(message.clone()).unwrap();
        let err = p.finalize(finalized.clone()).unwrap_err();
        assert!(matches!(err, StreamError::NotInitialized));

        // regeneration re-arms the same binding
        p.reset();
        p.process_event(content("second answer"), &message.id);
        assert_eq!(p.finalize(finalized).unwrap().text, "second answer");
    }

    #[test]
    fn test_content_final_replace_tracks_fences() {
        let p = processor();
        p.initialize("s1", "m1");
        p.process_event(content("Code:\n```rust\nfn main() {}\n"), "m1");
        let result = p.process_event(
            StreamEvent::ContentFinal {
                text: "Code:\n```rust\nfn main() {}\n```\n".into(),
            },
            "m1",
        );
        assert_eq!(
            result,
            ProcessResult::ContentUpdated("Code:\n```rust\nfn main() {}\n```\n".into())
        );
        assert_eq!(
            p.process_event(content("Done"), "m1"),
            ProcessResult::ContentUpdated("Code:\n```rust\nfn main() {}\n```\nDone".into())
        );
    }

    #[test]
    fn test_finalize_falls_back_to_existing_text() {
        let p = processor();
        let mut message = Message::ai_placeholder();
        message.text = "hello".into();
        p.initialize("s1", message.id.clone());

        let finalized = p.finalize(message).unwrap();
        assert_eq!(finalized.text, "hello");
        assert_eq!(finalized.parts, vec![ContentBlock::text("hello")]);
    }

    #[test]
    fn test_finalize_without_content_is_data_loss() {
        let p = processor();
        let message = Message::ai_placeholder();
        p.initialize("s1", message.id.clone());

        let err = p.finalize(message).unwrap_err();
        assert!(matches!(err, StreamError::DataLoss { .. }));
    }

    #[test]
    fn test_finalize_rejects_other_message() {
        let p = processor();
        p.initialize("s1", "m1");
        p.process_event(content("text"), "m1");
        let err = p.finalize(Message::ai("x").with_id("m2")).unwrap_err();
        assert!(matches!(err, StreamError::MessageMismatch { .. }));
    }

    #[test]
    fn test_finalize_error_message_drops_reasoning() {
        let p = processor();
        let mut message = Message::error("m1", "failed");
        message.reasoning = None;
        p.initialize("s1", "m1");
        p.process_event(StreamEvent::Reasoning { text: "partial".into() }, "m1");

        let finalized = p.finalize(message).unwrap();
        assert!(finalized.reasoning.is_none());
        assert!(finalized.is_consistent());
    }

    #[test]
    fn test_reset_clears_buffers() {
        let p = processor();
        p.initialize("s1", "m1");
        p.process_event(content("abc"), "m1");
        p.process_event(StreamEvent::Reasoning { text: "r".into() }, "m1");
        p.reset();
        assert_eq!(p.text(), "");
        assert_eq!(p.reasoning(), "");
        assert_eq!(p.status(), StreamStatus::Active);
    }

    #[test]
    fn test_preprocessing_disabled_keeps_delta() {
        let pipeline = Arc::new(FormatPipeline::new(CorrectionConfig::disabled()));
        let p = StreamProcessor::new(pipeline);
        p.initialize("s1", "m1");
        p.process_event(content("a\r\nb"), "m1");
        assert_eq!(p.text(), "a\r\nb");
    }
}
