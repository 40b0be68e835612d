use std::collections::HashSet;

use crate::models::{Conversation, Message, Sender};

const FIELD_SEPARATOR: &str = "::";
const MESSAGE_SEPARATOR: &str = "||";

/// Whether a message takes part in a conversation's identity.
///
/// Errors and placeholder/system rows never count. An AI message counts only
/// once it carries something visible; user messages always count.
pub fn counts_for_identity(message: &Message) -> bool {
    if message.is_error || message.is_placeholder_name {
        return false;
    }

    match message.sender {
        Sender::System => false,
        Sender::User => true,
        Sender::Ai => {
            !message.text.trim().is_empty()
                || !message.reasoning_text().trim().is_empty()
                || message.parts.iter().any(|part| part.has_content())
                || message.image_count() > 0
        }
    }
}

fn message_line(message: &Message) -> String {
    let mut keys: Vec<&str> = message.attachments.iter().map(|a| a.key.as_str()).collect();
    keys.sort_unstable();

    [
        message.sender.tag().to_string(),
        message.text.trim().to_string(),
        message.reasoning_text().trim().to_string(),
        format!("img={}", message.image_count()),
        format!("att={}", keys.join(",")),
    ]
    .join(FIELD_SEPARATOR)
}

/// Volatile-field-free identity of a conversation.
///
/// Ids, timestamps and animation state are ignored, so the same content saved
/// under fresh ids yields the same fingerprint. An empty string means the
/// conversation has nothing that counts.
pub fn fingerprint(conversation: &Conversation) -> String {
    conversation
        .identity_messages()
        .filter(|m| counts_for_identity(m))
        .map(message_line)
        .collect::<Vec<_>>()
        .join(MESSAGE_SEPARATOR)
}

/// Index of the first history entry with the candidate's fingerprint
pub fn find_duplicate(candidate: &Conversation, history: &[Conversation]) -> Option<usize> {
    let wanted = fingerprint(candidate);
    if wanted.is_empty() {
        return None;
    }
    history.iter().position(|c| fingerprint(c) == wanted)
}

/// Drop later entries that repeat an earlier non-empty fingerprint.
///
/// Returns the removed conversations in their original order.
pub fn dedup_history(history: &mut Vec<Conversation>) -> Vec<Conversation> {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(history.len());
    let mut removed = Vec::new();

    for conversation in history.drain(..) {
        let print = fingerprint(&conversation);
        if print.is_empty() || seen.insert(print) {
            kept.push(conversation);
        } else {
            removed.push(conversation);
        }
    }

    *history = kept;
    removed
}
