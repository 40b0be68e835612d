use std::sync::Arc;

use chatkeep_core::formatting::FormatPipeline;
use chatkeep_core::models::{ColumnAlignment, ContentBlock, Conversation, HistoryKind, Message};
use chatkeep_core::repositories::{HistoryJsonRepository, HistoryRepository};
use chatkeep_core::services::{HistoryCoordinator, ProcessResult, StreamEvent, StreamProcessor};
use chatkeep_core::settings::HistorySettings;

fn content(text: &str) -> StreamEvent {
    StreamEvent::Content {
        text: text.to_string(),
        block_type: None,
    }
}

fn replay(processor: &StreamProcessor, message_id: &str, events: Vec<StreamEvent>) {
    for event in events {
        let result = processor.process_event(event, message_id);
        assert!(!matches!(result, ProcessResult::Error(_)), "{result:?}");
    }
}

#[test]
fn test_stream_to_blocks() {
    let processor = StreamProcessor::new(Arc::new(FormatPipeline::default()));
    let message = Message::ai_placeholder();
    processor.initialize("session", message.id.clone());

    replay(
        &processor,
        &message.id,
        vec![
            StreamEvent::Reasoning {
                text: "compare the two".into(),
            },
            StreamEvent::ReasoningFinish,
            content("Results:\n| A | B |\n"),
            content("| --- | --- |\n| 1 | 2 |\n\n"),
            content("Energy is $$E = mc^2$$ and"),
            content("\n```python\nprint(1)\n```"),
            StreamEvent::StreamEnd,
        ],
    );

    let finalized = processor.finalize(message).unwrap();
    assert!(finalized.content_started);
    assert_eq!(finalized.reasoning.as_deref(), Some("compare the two"));

    let blocks = &finalized.parts;
    assert_eq!(blocks[0], ContentBlock::text("Results:"));
    assert_eq!(
        blocks[1],
        ContentBlock::Table {
            header: vec!["A".into(), "B".into()],
            rows: vec![vec!["1".into(), "2".into()]],
            alignment: vec![ColumnAlignment::None, ColumnAlignment::None],
        }
    );
    assert!(blocks.contains(&ContentBlock::display_math("E = mc^2")));
    assert_eq!(
        blocks.last(),
        Some(&ContentBlock::code("print(1)", Some("python")))
    );
}

#[test]
fn test_math_passes_markdown_rules_untouched() {
    let processor = StreamProcessor::new(Arc::new(FormatPipeline::default()));
    let message = Message::ai_placeholder();
    processor.initialize("session", message.id.clone());

    let raw = "Compute $a*b$ now, pick the set $a,b$ and check \\(x*y\\).\n$$\nE = m*c^2,k\n$$";
    replay(
        &processor,
        &message.id,
        vec![
            content("Compute $a*b$ now, pick the set $a,b$ and "),
            content("check \\(x*y\\).\n$$\nE = m*c^2,k\n$$"),
            StreamEvent::StreamEnd,
        ],
    );

    let finalized = processor.finalize(message).unwrap();
    assert_eq!(finalized.text, raw);
    assert!(finalized.parts.contains(&ContentBlock::inline_math("a*b")));
    assert!(finalized.parts.contains(&ContentBlock::inline_math("x*y")));
    assert_eq!(
        finalized.parts.last(),
        Some(&ContentBlock::display_math("E = m*c^2,k"))
    );
}

#[test]
fn test_simple_parser_cases() {
    use chatkeep_core::parsing::parse;

    assert_eq!(parse("plain text"), vec![ContentBlock::text("plain text")]);
    assert_eq!(
        parse("```python\nprint(1)\n```"),
        vec![ContentBlock::code("print(1)", Some("python"))]
    );
    assert_eq!(parse("$$x^2$$"), vec![ContentBlock::display_math("x^2")]);
    assert_eq!(
        parse("a\n| A | B |\n| --- | --- |\n| 1 | 2 |\nb"),
        vec![
            ContentBlock::text("a"),
            ContentBlock::Table {
                header: vec!["A".into(), "B".into()],
                rows: vec![vec!["1".into(), "2".into()]],
                alignment: vec![ColumnAlignment::None, ColumnAlignment::None],
            },
            ContentBlock::text("b"),
        ]
    );
}

#[test]
fn test_unterminated_fence_is_closed_on_finalize() {
    let processor = StreamProcessor::new(Arc::new(FormatPipeline::default()));
    let message = Message::ai_placeholder();
    processor.initialize("session", message.id.clone());
    replay(
        &processor,
        &message.id,
        vec![content("Try this:\n```rust\nfn main() {}\n"), StreamEvent::Finish],
    );

    let finalized = processor.finalize(message).unwrap();
    assert!(
        finalized
            .parts
            .iter()
            .any(|b| matches!(b, ContentBlock::CodeBlock { language: Some(l), .. } if l == "rust"))
    );
}

#[tokio::test]
async fn test_finalized_conversation_persists_once() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(HistoryJsonRepository::with_dir(dir.path()));
    let settings = HistorySettings {
        debounce_ms: 20,
        ..HistorySettings::default()
    };
    let history =
        HistoryCoordinator::new(HistoryKind::Text, repo.clone(), None, &settings).unwrap();

    let processor = StreamProcessor::new(Arc::new(FormatPipeline::default()));
    let placeholder = Message::ai_placeholder();
    processor.initialize("session", placeholder.id.clone());
    replay(
        &processor,
        &placeholder.id,
        vec![content("#Answer\nIt is 42."), StreamEvent::StreamEnd],
    );

    let mut conversation = Conversation::with_messages(vec![Message::user("What is it?")]);
    conversation.push(processor.finalize(placeholder).unwrap());

    history.request_save(conversation.clone());
    history.save_now(conversation.clone());
    history.flush().await;

    let stored = repo.load_conversations(HistoryKind::Text).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].messages[1].text, "# Answer\nIt is 42.");
}
