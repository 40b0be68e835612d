pub mod content_final_validator;
pub mod fingerprint;
pub mod history_coordinator;
pub mod mailbox;
pub mod stream_processor;

pub use content_final_validator::{ContentFinalValidator, SnapshotDecision, SnapshotPolicy};
pub use fingerprint::{counts_for_identity, dedup_history, find_duplicate, fingerprint};
pub use history_coordinator::{HistoryCoordinator, migrate_ids};
pub use mailbox::Mailbox;
pub use stream_processor::{ProcessResult, StreamError, StreamEvent, StreamProcessor, StreamStatus};
