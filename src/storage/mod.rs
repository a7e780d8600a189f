//! Session Storage
//!
//! One repository contract, two implementations: [`SqlSessionStore`]
//! (MySQL, or SQLite through the same `Any` pool) and [`FileSessionStore`]
//! (three JSON documents on disk). [`select_storage`] picks exactly one at
//! startup and everything downstream holds an opaque `Arc<dyn SessionStore>`.

mod file;
pub mod models;
mod selector;
mod sql;

pub use file::FileSessionStore;
pub use models::{
    MessageRecord, MessageStats, NewMessage, SendResult, SendStatus, Session, SessionUpdate,
};
pub use selector::{SelectedStorage, StorageMode, select_storage};
pub use sql::{SqlParam, SqlSessionStore, SqlStatement};

use crate::error::StorageError;
use async_trait::async_trait;

pub type Result<T> = std::result::Result<T, StorageError>;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::FileSessionStore {}
    impl Sealed for super::SqlSessionStore {}
}

/// Durable CRUD for sessions, their phone numbers and their message history.
///
/// Both implementations have identical observable semantics. The trait is
/// sealed: the two backends in this module are the only ones.
#[async_trait]
pub trait SessionStore: sealed::Sealed + Send + Sync {
    /// Persist an empty session. Generates a time-ordered id when `id` is
    /// `None`. No uniqueness check is made against existing ids.
    async fn create(&self, name: &str, id: Option<&str>) -> Result<Session>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Session>>;

    /// Every session, most recently created first.
    async fn find_all(&self) -> Result<Vec<Session>>;

    /// Merge `update` into the stored session and refresh `updated_at`.
    async fn update(&self, id: &str, update: SessionUpdate) -> Result<Session>;

    /// Returns whether a session was removed. Cascades to phone numbers and
    /// messages.
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn add_phone_number(&self, id: &str, number: &str) -> Result<Session>;

    async fn remove_phone_number(&self, id: &str, number: &str) -> Result<Session>;

    /// Store a message and append it to the session's history. Success and
    /// failure counts are derived from `message.results`.
    async fn add_message(&self, id: &str, message: NewMessage) -> Result<MessageRecord>;

    /// The session's messages, most recent first.
    async fn get_messages(&self, id: &str) -> Result<Vec<MessageRecord>>;

    /// Release resources. The file store flushes every document first.
    async fn close(&self) -> Result<()>;
}

/// New session id: UUID v7, so ids sort by creation time and still carry
/// random bits.
pub fn generate_session_id() -> String {
    uuid::Uuid::now_v7().simple().to_string()
}
