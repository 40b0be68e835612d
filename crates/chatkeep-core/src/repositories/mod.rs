pub mod error;
pub mod history_json_repository;
pub mod history_repository;
pub mod in_memory_repository;
pub mod media_repository;

pub use error::{RepositoryError, RepositoryResult};
pub use history_json_repository::HistoryJsonRepository;
pub use history_repository::{BoxFuture, HistoryRepository};
pub use in_memory_repository::InMemoryHistoryRepository;
pub use media_repository::{FileMediaRepository, InMemoryMediaRepository, MediaRepository};
