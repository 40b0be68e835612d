use std::sync::Arc;
use std::time::Duration;

use chatkeep_core::models::{Conversation, HistoryKind, Message};
use chatkeep_core::repositories::InMemoryHistoryRepository;
use chatkeep_core::services::{HistoryCoordinator, fingerprint};
use chatkeep_core::settings::HistorySettings;

fn coordinator(repo: &InMemoryHistoryRepository) -> HistoryCoordinator {
    HistoryCoordinator::new(
        HistoryKind::Text,
        Arc::new(repo.clone()),
        None,
        &HistorySettings::default(),
    )
    .unwrap()
}

fn chat(question: &str, answer: &str) -> Conversation {
    Conversation::with_messages(vec![Message::user(question), Message::ai(answer)])
}

/// The same content rebuilt with fresh ids, as a retry would produce
fn rebuilt(conversation: &Conversation) -> Conversation {
    let mut copy = conversation.clone();
    copy.id = uuid::Uuid::new_v4().to_string();
    for message in &mut copy.messages {
        message.id = uuid::Uuid::new_v4().to_string();
        message.timestamp += 1;
    }
    copy
}

fn assert_unique(repo: &InMemoryHistoryRepository) {
    let stored = repo.stored(HistoryKind::Text);
    let mut prints: Vec<String> = stored.iter().map(fingerprint).collect();
    let before = prints.len();
    prints.sort();
    prints.dedup();
    assert_eq!(before, prints.len(), "duplicate fingerprints in history");
}

#[tokio::test(start_paused = true)]
async fn test_forced_then_debounced_same_conversation() {
    let repo = InMemoryHistoryRepository::new();
    let history = coordinator(&repo);
    let conversation = chat("hello", "world");

    history.save_now(conversation.clone());
    history.request_save(rebuilt(&conversation));
    tokio::time::sleep(Duration::from_millis(700)).await;
    history.flush().await;

    assert_eq!(repo.stored(HistoryKind::Text).len(), 1);
    assert_unique(&repo);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_window_reuses_entry() {
    let repo = InMemoryHistoryRepository::new();
    let history = coordinator(&repo);
    let conversation = chat("q", "a");

    history.save_now(conversation.clone());
    history.flush().await;
    history.save_now(chat("other", "b"));
    history.flush().await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let retry = rebuilt(&conversation);
    history.save_now(retry.clone());
    history.flush().await;

    assert_eq!(repo.stored(HistoryKind::Text).len(), 2);
    assert_eq!(history.stable_id(&retry.id).await, conversation.id);
    assert_unique(&repo);
}

#[tokio::test(start_paused = true)]
async fn test_racing_triggers_collapse() {
    let repo = InMemoryHistoryRepository::new();
    let history = Arc::new(coordinator(&repo));
    let conversation = chat("burst", "reply");

    let mut tasks = Vec::new();
    for i in 0..10 {
        let history = history.clone();
        let copy = if i % 2 == 0 {
            conversation.clone()
        } else {
            rebuilt(&conversation)
        };
        tasks.push(tokio::spawn(async move {
            if i % 3 == 0 {
                history.save_now(copy);
            } else {
                history.request_save(copy);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    history.flush().await;

    assert_eq!(repo.stored(HistoryKind::Text).len(), 1);
    assert_unique(&repo);
}

#[tokio::test(start_paused = true)]
async fn test_debounce_writes_latest_state_once() {
    let repo = InMemoryHistoryRepository::new();
    let history = coordinator(&repo);
    let mut conversation = Conversation::with_messages(vec![Message::user("start")]);

    for step in 0..20 {
        conversation.messages[0].text = format!("edit {step}");
        history.request_save(conversation.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(repo.save_count(), 1);
    assert_eq!(repo.stored(HistoryKind::Text)[0].messages[0].text, "edit 19");
}

#[tokio::test]
async fn test_clear_history() {
    let repo = InMemoryHistoryRepository::with_conversations(
        HistoryKind::Text,
        vec![chat("a", "1"), chat("b", "2")],
    );
    let history = coordinator(&repo);
    assert_eq!(history.load().await.unwrap().len(), 2);

    history.clear_history().await;

    assert!(repo.stored(HistoryKind::Text).is_empty());
    assert!(history.conversations().await.is_empty());
    assert_eq!(history.current_index().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_failed_write_survives_reload_and_retries() {
    let repo = InMemoryHistoryRepository::new();
    let history = coordinator(&repo);
    let conversation = chat("q", "a");

    repo.set_fail_saves(true);
    history.request_save(conversation.clone());
    tokio::time::sleep(Duration::from_millis(600)).await;
    history.flush().await;
    assert!(repo.stored(HistoryKind::Text).is_empty());
    assert_eq!(history.load().await.unwrap().len(), 1);

    // unchanged content still writes while storage is behind
    repo.set_fail_saves(false);
    history.request_save(conversation);
    tokio::time::sleep(Duration::from_millis(600)).await;
    history.flush().await;

    assert_eq!(repo.save_count(), 1);
    assert_eq!(repo.stored(HistoryKind::Text).len(), 1);
    assert_unique(&repo);
}
