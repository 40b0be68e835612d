use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::fingerprint::{dedup_history, find_duplicate, fingerprint};
use super::mailbox::Mailbox;
use crate::models::{Conversation, HistoryKind, Message};
use crate::repositories::{HistoryRepository, MediaRepository, RepositoryError, RepositoryResult};
use crate::settings::HistorySettings;

/// Cap on remembered aliases and tombstones; the oldest are forgotten first
const MAX_TRACKED_IDS: usize = 1024;

struct SaveRequest {
    conversation: Conversation,
    generation: u64,
}

struct PendingSave {
    token: u64,
    conversation: Conversation,
    handle: JoinHandle<()>,
}

#[derive(Debug, PartialEq, Eq)]
enum SaveOutcome {
    Skipped(&'static str),
    Unchanged,
    Updated(String),
    Reused(String),
    Inserted(String),
}

#[derive(Default)]
struct HistoryState {
    loaded: bool,
    conversations: Vec<Conversation>,
    current_id: Option<String>,
    /// Fingerprint and time of the last successful write
    last_commit: Option<(String, Instant)>,
    /// Ids that were recognised as duplicates, mapped to the entry they reuse
    aliases: HashMap<String, String>,
    alias_order: VecDeque<String>,
    /// Deleted ids; late saves for them are dropped
    deleted: HashSet<String>,
    deleted_order: VecDeque<String>,
    /// The in-memory list is ahead of storage after a failed write
    dirty: bool,
}

impl HistoryState {
    fn resolve(&self, id: &str) -> String {
        let mut current = id;
        for _ in 0..=self.aliases.len() {
            match self.aliases.get(current) {
                Some(next) if next != current => current = next,
                _ => break,
            }
        }
        current.to_string()
    }

    fn alias(&mut self, from: String, to: &str) {
        if from == to {
            return;
        }
        if self.aliases.insert(from.clone(), to.to_string()).is_none() {
            self.alias_order.push_back(from);
        }
        while self.alias_order.len() > MAX_TRACKED_IDS {
            if let Some(oldest) = self.alias_order.pop_front() {
                self.aliases.remove(&oldest);
            }
        }
    }

    fn tombstone(&mut self, id: String) {
        if self.deleted.insert(id.clone()) {
            self.deleted_order.push_back(id);
        }
        while self.deleted_order.len() > MAX_TRACKED_IDS {
            if let Some(oldest) = self.deleted_order.pop_front() {
                self.deleted.remove(&oldest);
            }
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.conversations.iter().position(|c| c.id == id)
    }

    /// Layered duplicate guard: update by id, head equality, suppression
    /// window, full search, and only then insert at the front.
    fn apply_save(
        &mut self,
        mut conversation: Conversation,
        print: &str,
        now: Instant,
        window: Duration,
    ) -> SaveOutcome {
        if print.is_empty() {
            return SaveOutcome::Skipped("nothing to persist");
        }

        let id = self.resolve(&conversation.id);
        if self.deleted.contains(&id) {
            return SaveOutcome::Skipped("conversation was deleted");
        }
        conversation.id = id.clone();

        if let Some(index) = self.position(&id) {
            self.current_id = Some(id.clone());
            if self.conversations[index] == conversation {
                return SaveOutcome::Unchanged;
            }
            self.conversations[index] = conversation;
            return SaveOutcome::Updated(id);
        }

        let head_matches = self
            .conversations
            .first()
            .is_some_and(|head| fingerprint(head) == print);
        if head_matches {
            return self.reuse(0, conversation);
        }

        let recently_committed = self
            .last_commit
            .as_ref()
            .is_some_and(|(last, at)| last == print && now.duration_since(*at) < window);
        if recently_committed
            && let Some(index) = self.conversations.iter().position(|c| fingerprint(c) == print)
        {
            let stable = self.conversations[index].id.clone();
            self.alias(id, &stable);
            self.current_id = Some(stable);
            return SaveOutcome::Skipped("duplicate within suppression window");
        }

        if let Some(index) = find_duplicate(&conversation, &self.conversations) {
            return self.reuse(index, conversation);
        }

        self.conversations.insert(0, conversation);
        self.current_id = Some(id.clone());
        SaveOutcome::Inserted(id)
    }

    /// Overwrite an existing entry with the same content, keeping its identity
    fn reuse(&mut self, index: usize, mut conversation: Conversation) -> SaveOutcome {
        let existing = &self.conversations[index];
        let stable = existing.id.clone();
        conversation.created_at = existing.created_at;
        let incoming = std::mem::replace(&mut conversation.id, stable.clone());
        self.alias(incoming, &stable);
        self.conversations[index] = conversation;
        self.current_id = Some(stable.clone());
        SaveOutcome::Reused(stable)
    }

    /// Global pass; removed entries become aliases of their survivor
    fn dedup(&mut self) {
        let removed = dedup_history(&mut self.conversations);
        for duplicate in removed {
            let print = fingerprint(&duplicate);
            let Some(survivor) = self
                .conversations
                .iter()
                .find(|c| fingerprint(c) == print)
                .map(|c| c.id.clone())
            else {
                continue;
            };
            info!(duplicate = %duplicate.id, survivor = %survivor, "Removed duplicate conversation");
            if self.current_id.as_deref() == Some(duplicate.id.as_str()) {
                self.current_id = Some(survivor.clone());
            }
            self.alias(duplicate.id, &survivor);
        }
    }
}

/// Give every conversation and message a stable non-empty id.
///
/// Returns how many ids were assigned.
pub fn migrate_ids(conversations: &mut [Conversation]) -> usize {
    let mut assigned = 0;
    for conversation in conversations.iter_mut() {
        if conversation.id.trim().is_empty() {
            conversation.id = uuid::Uuid::new_v4().to_string();
            assigned += 1;
        }
        assigned += migrate_message_ids(&mut conversation.messages);
    }
    assigned
}

fn migrate_message_ids(messages: &mut [Message]) -> usize {
    let mut assigned = 0;
    for message in messages.iter_mut() {
        if message.id.trim().is_empty() {
            message.id = uuid::Uuid::new_v4().to_string();
            assigned += 1;
        }
    }
    assigned
}

struct Inner {
    kind: HistoryKind,
    repository: Arc<dyn HistoryRepository>,
    media: Option<Arc<dyn MediaRepository>>,
    debounce: Duration,
    duplicate_window: Duration,
    runtime: Handle,
    state: Mutex<HistoryState>,
    mailbox: Mailbox<SaveRequest>,
    pending: parking_lot::Mutex<Option<PendingSave>>,
    next_token: AtomicU64,
    submitted: AtomicU64,
    /// Requests at or below this generation were issued before a clear
    cleared_through: AtomicU64,
    processed: watch::Sender<u64>,
}

impl Inner {
    fn submit(&self, conversation: Conversation) {
        let generation = self.submitted.fetch_add(1, Ordering::SeqCst) + 1;
        let conversation_id = conversation.id.clone();
        if let Some(superseded) = self.mailbox.post(SaveRequest {
            conversation,
            generation,
        }) {
            debug!(
                superseded = %superseded.conversation.id,
                conversation_id = %conversation_id,
                "Pending save superseded"
            );
        }
    }

    async fn ensure_loaded(&self, state: &mut HistoryState) -> RepositoryResult<()> {
        if state.loaded {
            return Ok(());
        }

        let mut conversations = self.repository.load_conversations(self.kind).await?;
        let assigned = migrate_ids(&mut conversations);
        let removed = dedup_history(&mut conversations);

        if assigned > 0 || !removed.is_empty() {
            info!(
                kind = self.kind.as_str(),
                assigned,
                duplicates = removed.len(),
                "Migrated stored history"
            );
            if let Err(e) = self
                .repository
                .save_conversations(self.kind, conversations.clone())
                .await
            {
                error!(kind = self.kind.as_str(), error = %e, "Failed to write back migrated history");
                state.dirty = true;
            }
        }

        debug!(kind = self.kind.as_str(), count = conversations.len(), "History loaded");
        state.conversations = conversations;
        state.loaded = true;
        Ok(())
    }

    async fn write(&self, state: &mut HistoryState) -> RepositoryResult<()> {
        let result = self
            .repository
            .save_conversations(self.kind, state.conversations.clone())
            .await;
        state.dirty = result.is_err();
        result
    }

    async fn process(&self, conversation: Conversation, generation: u64) {
        let mut state = self.state.lock().await;

        if generation <= self.cleared_through.load(Ordering::SeqCst) {
            debug!(conversation_id = %conversation.id, "Save issued before a clear, dropped");
            return;
        }

        if let Err(e) = self.ensure_loaded(&mut state).await {
            error!(kind = self.kind.as_str(), error = %e, "Could not load history, save skipped");
            return;
        }

        let print = fingerprint(&conversation);
        let outcome = state.apply_save(conversation, &print, Instant::now(), self.duplicate_window);

        let committed_id = match outcome {
            SaveOutcome::Skipped(reason) => {
                debug!(reason, "Save skipped");
                return;
            }
            SaveOutcome::Unchanged if !state.dirty => {
                debug!("Conversation unchanged, nothing to write");
                return;
            }
            SaveOutcome::Unchanged => state.current_id.clone().unwrap_or_default(),
            SaveOutcome::Updated(id) => id,
            SaveOutcome::Reused(id) => {
                debug!(conversation_id = %id, "Duplicate insert turned into index reuse");
                id
            }
            SaveOutcome::Inserted(id) => {
                debug!(conversation_id = %id, "Inserted new conversation");
                id
            }
        };

        state.dedup();

        match self.write(&mut state).await {
            Ok(()) => {
                state.last_commit = Some((print, Instant::now()));
                info!(
                    kind = self.kind.as_str(),
                    conversation_id = %committed_id,
                    count = state.conversations.len(),
                    "History saved"
                );
            }
            Err(e) => {
                error!(
                    kind = self.kind.as_str(),
                    conversation_id = %committed_id,
                    error = %e,
                    "Failed to save history"
                );
            }
        }
    }

    async fn cleanup_media(&self, references: Vec<String>) {
        let Some(media) = &self.media else {
            return;
        };
        if references.is_empty() {
            return;
        }

        let results =
            futures::future::join_all(references.iter().map(|r| media.delete(r))).await;
        for (reference, result) in references.iter().zip(results) {
            if let Err(e) = result {
                warn!(reference = %reference, error = %e, "Failed to delete media");
            }
        }
        debug!(count = references.len(), "Media cleanup finished");
    }
}

async fn run_worker(inner: Arc<Inner>) {
    while let Some(request) = inner.mailbox.recv().await {
        inner.process(request.conversation, request.generation).await;
        inner
            .processed
            .send_modify(|done| *done = (*done).max(request.generation));
    }
    debug!(kind = inner.kind.as_str(), "History worker stopped");
}

fn unreferenced(candidates: Vec<String>, remaining: &[Conversation]) -> Vec<String> {
    let still_used: HashSet<&str> = remaining.iter().flat_map(|c| c.attachment_keys()).collect();
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|key| !still_used.contains(key.as_str()) && seen.insert(key.clone()))
        .collect()
}

/// Single logical writer for one history kind.
///
/// Debounced and forced saves are funnelled through a one-slot mailbox into a
/// single worker task, so bursts collapse into one write of the latest state.
/// Must be created inside a tokio runtime.
pub struct HistoryCoordinator {
    inner: Arc<Inner>,
}

impl HistoryCoordinator {
    pub fn new(
        kind: HistoryKind,
        repository: Arc<dyn HistoryRepository>,
        media: Option<Arc<dyn MediaRepository>>,
        settings: &HistorySettings,
    ) -> RepositoryResult<Self> {
        let runtime = Handle::try_current().map_err(|e| RepositoryError::InitializationError {
            message: format!("history coordinator needs a tokio runtime: {e}"),
        })?;
        let (processed, _) = watch::channel(0);

        let inner = Arc::new(Inner {
            kind,
            repository,
            media,
            debounce: settings.debounce(),
            duplicate_window: settings.duplicate_window(),
            runtime: runtime.clone(),
            state: Mutex::new(HistoryState::default()),
            mailbox: Mailbox::new(),
            pending: parking_lot::Mutex::new(None),
            next_token: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            cleared_through: AtomicU64::new(0),
            processed,
        });

        runtime.spawn(run_worker(inner.clone()));
        Ok(Self { inner })
    }

    pub fn kind(&self) -> HistoryKind {
        self.inner.kind
    }

    /// Load stored history, migrating empty ids and writing the result back once.
    ///
    /// While a failed write leaves memory ahead of storage, the in-memory list
    /// is written again and returned instead of being replaced by the stale one.
    pub async fn load(&self) -> RepositoryResult<Vec<Conversation>> {
        let mut state = self.inner.state.lock().await;
        if state.loaded && state.dirty {
            if let Err(e) = self.inner.write(&mut state).await {
                warn!(
                    kind = self.inner.kind.as_str(),
                    error = %e,
                    "Unsaved history still not written, keeping in-memory list"
                );
            }
            return Ok(state.conversations.clone());
        }
        state.loaded = false;
        self.inner.ensure_loaded(&mut state).await?;
        Ok(state.conversations.clone())
    }

    /// Debounced save: restarts the timer, the latest request wins
    pub fn request_save(&self, conversation: Conversation) {
        let mut pending = self.inner.pending.lock();
        if let Some(previous) = pending.take() {
            previous.handle.abort();
        }

        let token = self.inner.next_token.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.clone();
        let delay = self.inner.debounce;
        let handle = self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // submitted under the lock so a concurrent flush sees it counted
            let mut pending = inner.pending.lock();
            if pending.as_ref().is_some_and(|save| save.token == token)
                && let Some(save) = pending.take()
            {
                inner.submit(save.conversation);
            }
        });

        *pending = Some(PendingSave {
            token,
            conversation,
            handle,
        });
    }

    /// Forced save: bypasses the timer and goes straight to the worker
    pub fn save_now(&self, conversation: Conversation) {
        {
            let mut pending = self.inner.pending.lock();
            let same = pending
                .as_ref()
                .is_some_and(|save| save.conversation.id == conversation.id);
            if same && let Some(save) = pending.take() {
                save.handle.abort();
            }
        }
        self.inner.submit(conversation);
    }

    /// Submit any pending debounced save and wait until the worker has
    /// processed everything submitted so far
    pub async fn flush(&self) {
        {
            let mut pending = self.inner.pending.lock();
            if let Some(save) = pending.take() {
                save.handle.abort();
                self.inner.submit(save.conversation);
            }
        }

        let target = self.inner.submitted.load(Ordering::SeqCst);
        let mut processed = self.inner.processed.subscribe();
        if processed.wait_for(|done| *done >= target).await.is_err() {
            warn!(kind = self.inner.kind.as_str(), "History worker is gone, flush incomplete");
        }
    }

    /// Remove a conversation and the media only it referenced
    pub async fn delete_conversation(&self, id: &str) -> bool {
        let mut state = self.inner.state.lock().await;
        if let Err(e) = self.inner.ensure_loaded(&mut state).await {
            error!(error = %e, "Could not load history, delete skipped");
            return false;
        }

        let id = state.resolve(id);
        let Some(index) = state.position(&id) else {
            debug!(conversation_id = %id, "Delete of unknown conversation");
            return false;
        };

        let removed = state.conversations.remove(index);
        state.tombstone(id.clone());
        if state.current_id.as_deref() == Some(id.as_str()) {
            state.current_id = None;
        }

        match self.inner.write(&mut state).await {
            Ok(()) => {
                info!(conversation_id = %id, "Conversation deleted");
                let candidates = removed.attachment_keys().map(str::to_string).collect();
                let orphans = unreferenced(candidates, &state.conversations);
                self.inner.cleanup_media(orphans).await;
            }
            Err(e) => {
                error!(conversation_id = %id, error = %e, "Failed to persist delete");
            }
        }
        true
    }

    pub async fn clear_history(&self) {
        let mut state = self.inner.state.lock().await;
        if let Err(e) = self.inner.ensure_loaded(&mut state).await {
            warn!(error = %e, "Could not load history before clearing");
        }
        if let Some(save) = self.inner.pending.lock().take() {
            save.handle.abort();
        }
        // the worker may hold an earlier request while waiting on the lock
        let cleared = self.inner.submitted.load(Ordering::SeqCst);
        self.inner.cleared_through.store(cleared, Ordering::SeqCst);
        if let Some(stale) = self.inner.mailbox.try_take() {
            debug!(conversation_id = %stale.conversation.id, "Queued save discarded by clear");
        }
        self.inner
            .processed
            .send_modify(|done| *done = (*done).max(cleared));

        let removed = std::mem::take(&mut state.conversations);
        for conversation in &removed {
            state.tombstone(conversation.id.clone());
        }
        state.current_id = None;
        state.last_commit = None;
        state.loaded = true;

        match self.inner.write(&mut state).await {
            Ok(()) => {
                info!(kind = self.inner.kind.as_str(), count = removed.len(), "History cleared");
                let candidates = removed
                    .iter()
                    .flat_map(|c| c.attachment_keys().map(str::to_string))
                    .collect();
                self.inner.cleanup_media(unreferenced(candidates, &[])).await;
            }
            Err(e) => {
                error!(kind = self.inner.kind.as_str(), error = %e, "Failed to clear history");
            }
        }
    }

    /// Make a stored conversation the current one
    pub async fn open(&self, id: &str) -> Option<Conversation> {
        let mut state = self.inner.state.lock().await;
        let id = state.resolve(id);
        let conversation = state.conversations.iter().find(|c| c.id == id).cloned()?;
        state.current_id = Some(id);
        Some(conversation)
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.inner.state.lock().await.conversations.clone()
    }

    pub async fn current_index(&self) -> Option<usize> {
        let state = self.inner.state.lock().await;
        let id = state.current_id.as_deref()?;
        state.position(id)
    }

    /// The id a save under `id` lands on
    pub async fn stable_id(&self, id: &str) -> String {
        self.inner.state.lock().await.resolve(id)
    }

    pub async fn save_last_open_chat(&self, messages: Vec<Message>) -> RepositoryResult<()> {
        self.inner
            .repository
            .save_last_open_chat(self.inner.kind, messages)
            .await
    }

    pub async fn restore_last_open_chat(&self) -> RepositoryResult<Vec<Message>> {
        let mut messages = self
            .inner
            .repository
            .load_last_open_chat(self.inner.kind)
            .await?;
        if migrate_message_ids(&mut messages) > 0 {
            debug!(kind = self.inner.kind.as_str(), "Assigned ids to restored messages");
        }
        Ok(messages)
    }

    pub async fn clear_last_open_chat(&self) -> RepositoryResult<()> {
        self.inner
            .repository
            .clear_last_open_chat(self.inner.kind)
            .await
    }
}

impl Drop for HistoryCoordinator {
    fn drop(&mut self) {
        if let Some(save) = self.inner.pending.lock().take() {
            save.handle.abort();
        }
        self.inner.mailbox.close();
    }
}
