use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::error::{RepositoryError, RepositoryResult};
use super::history_repository::{BoxFuture, HistoryRepository};
use crate::models::{Conversation, HistoryKind, Message};

#[derive(Default)]
struct Store {
    conversations: HashMap<HistoryKind, Vec<Conversation>>,
    last_chats: HashMap<HistoryKind, Vec<Message>>,
}

/// In-memory history store
/// Useful for testing: counts saves and can be told to fail them
#[derive(Clone, Default)]
pub struct InMemoryHistoryRepository {
    store: Arc<Mutex<Store>>,
    saves: Arc<AtomicUsize>,
    fail_saves: Arc<AtomicBool>,
}

impl InMemoryHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store without counting a save
    pub fn with_conversations(kind: HistoryKind, conversations: Vec<Conversation>) -> Self {
        let repo = Self::new();
        repo.store.lock().conversations.insert(kind, conversations);
        repo
    }

    /// Number of successful `save_conversations` calls
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Current stored list, bypassing the async contract
    pub fn stored(&self, kind: HistoryKind) -> Vec<Conversation> {
        self.store
            .lock()
            .conversations
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }
}

impl HistoryRepository for InMemoryHistoryRepository {
    fn load_conversations(
        &self,
        kind: HistoryKind,
    ) -> BoxFuture<'static, RepositoryResult<Vec<Conversation>>> {
        let store = self.store.clone();

        Box::pin(async move {
            Ok(store
                .lock()
                .conversations
                .get(&kind)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn save_conversations(
        &self,
        kind: HistoryKind,
        conversations: Vec<Conversation>,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        let store = self.store.clone();
        let saves = self.saves.clone();
        let fail = self.fail_saves.load(Ordering::SeqCst);

        Box::pin(async move {
            if fail {
                return Err(RepositoryError::IoError(std::io::Error::other(
                    "injected save failure",
                )));
            }
            store.lock().conversations.insert(kind, conversations);
            saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn load_last_open_chat(&self, kind: HistoryKind) -> BoxFuture<'static, RepositoryResult<Vec<Message>>> {
        let store = self.store.clone();

        Box::pin(async move { Ok(store.lock().last_chats.get(&kind).cloned().unwrap_or_default()) })
    }

    fn save_last_open_chat(
        &self,
        kind: HistoryKind,
        messages: Vec<Message>,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        let store = self.store.clone();

        Box::pin(async move {
            store.lock().last_chats.insert(kind, messages);
            Ok(())
        })
    }

    fn clear_last_open_chat(&self, kind: HistoryKind) -> BoxFuture<'static, RepositoryResult<()>> {
        let store = self.store.clone();

        Box::pin(async move {
            store.lock().last_chats.remove(&kind);
            Ok(())
        })
    }
}
