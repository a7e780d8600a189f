//! File-backed session store
//!
//! Keeps every session in memory and mirrors the state to three JSON
//! documents under the data directory. Each mutation rewrites the documents
//! it touched in full; there is no append log, so a crash between the
//! in-memory change and the write loses that change.

use super::{Result, SessionStore, generate_session_id};
use super::models::{MessageRecord, NewMessage, Session, SessionUpdate};
use crate::error::StorageError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const SESSIONS_FILE: &str = "sessions.json";
const PHONE_NUMBERS_FILE: &str = "phone_numbers.json";
const MESSAGES_FILE: &str = "messages.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Document {
    Sessions,
    PhoneNumbers,
    Messages,
}

impl Document {
    const ALL: [Document; 3] = [Document::Sessions, Document::PhoneNumbers, Document::Messages];

    fn file_name(self) -> &'static str {
        match self {
            Document::Sessions => SESSIONS_FILE,
            Document::PhoneNumbers => PHONE_NUMBERS_FILE,
            Document::Messages => MESSAGES_FILE,
        }
    }
}

#[derive(Debug, Default)]
struct FileState {
    sessions: BTreeMap<String, Session>,
    phone_numbers: BTreeMap<String, Vec<String>>,
    messages: BTreeMap<String, Vec<MessageRecord>>,
    next_message_id: i64,
}

impl FileState {
    fn session_mut(&mut self, id: &str) -> Result<&mut Session> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }
}

/// Session store backed by JSON documents in a local directory.
pub struct FileSessionStore {
    dir: PathBuf,
    state: Mutex<FileState>,
}

impl FileSessionStore {
    /// Open the store in `dir`, creating the directory if needed and loading
    /// whichever documents already exist.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io(&dir, e))?;

        let sessions: BTreeMap<String, Session> =
            load_document(&dir.join(SESSIONS_FILE)).await?.unwrap_or_default();
        let phone_numbers: BTreeMap<String, Vec<String>> =
            load_document(&dir.join(PHONE_NUMBERS_FILE)).await?.unwrap_or_default();
        let messages: BTreeMap<String, Vec<MessageRecord>> =
            load_document(&dir.join(MESSAGES_FILE)).await?.unwrap_or_default();

        let next_message_id = messages
            .values()
            .flatten()
            .map(|m| m.id)
            .max()
            .unwrap_or(0)
            + 1;

        tracing::info!(
            "Local storage loaded {} session(s) from {}",
            sessions.len(),
            dir.display()
        );

        Ok(Self {
            dir,
            state: Mutex::new(FileState {
                sessions,
                phone_numbers,
                messages,
                next_message_id,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn flush(&self, state: &FileState, documents: &[Document]) -> Result<()> {
        for doc in documents {
            let path = self.dir.join(doc.file_name());
            let bytes = match doc {
                Document::Sessions => serde_json::to_vec_pretty(&state.sessions)?,
                Document::PhoneNumbers => serde_json::to_vec_pretty(&state.phone_numbers)?,
                Document::Messages => serde_json::to_vec_pretty(&state.messages)?,
            };
            tokio::fs::write(&path, bytes)
                .await
                .map_err(|e| StorageError::io(&path, e))?;
        }
        tracing::debug!("Flushed {:?} to {}", documents, self.dir.display());
        Ok(())
    }
}

async fn load_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn create(&self, name: &str, id: Option<&str>) -> Result<Session> {
        let id = id.map(str::to_string).unwrap_or_else(generate_session_id);
        let session = Session::new(id.clone(), name);

        let mut state = self.state.lock().await;
        state.sessions.insert(id.clone(), session.clone());
        state.phone_numbers.insert(id.clone(), Vec::new());
        state.messages.insert(id.clone(), Vec::new());
        self.flush(&state, &Document::ALL).await?;

        tracing::info!("Session created: {}", id);
        Ok(session)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.state.lock().await.sessions.get(id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Session>> {
        let state = self.state.lock().await;
        let mut sessions: Vec<Session> = state.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn update(&self, id: &str, update: SessionUpdate) -> Result<Session> {
        let mut state = self.state.lock().await;
        let numbers_changed = update.phone_numbers.is_some();
        let session = state.session_mut(id)?;
        session.apply(update);
        let updated = session.clone();

        if numbers_changed {
            state
                .phone_numbers
                .insert(id.to_string(), updated.phone_numbers.clone());
            self.flush(&state, &[Document::Sessions, Document::PhoneNumbers])
                .await?;
        } else {
            self.flush(&state, &[Document::Sessions]).await?;
        }

        tracing::debug!("Session updated: {}", id);
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.sessions.remove(id).is_none() {
            return Ok(false);
        }
        state.phone_numbers.remove(id);
        state.messages.remove(id);
        self.flush(&state, &Document::ALL).await?;

        tracing::info!("Session deleted: {}", id);
        Ok(true)
    }

    async fn add_phone_number(&self, id: &str, number: &str) -> Result<Session> {
        let mut state = self.state.lock().await;
        let session = state.session_mut(id)?;
        session.add_phone_number(number);
        let numbers = session.phone_numbers.clone();
        session.apply(SessionUpdate::phone_numbers(numbers.clone()));
        let updated = session.clone();
        state.phone_numbers.insert(id.to_string(), numbers);
        self.flush(&state, &[Document::Sessions, Document::PhoneNumbers])
            .await?;
        Ok(updated)
    }

    async fn remove_phone_number(&self, id: &str, number: &str) -> Result<Session> {
        let mut state = self.state.lock().await;
        let session = state.session_mut(id)?;
        session.remove_phone_number(number);
        let numbers = session.phone_numbers.clone();
        session.apply(SessionUpdate::phone_numbers(numbers.clone()));
        let updated = session.clone();
        state.phone_numbers.insert(id.to_string(), numbers);
        self.flush(&state, &[Document::Sessions, Document::PhoneNumbers])
            .await?;
        Ok(updated)
    }

    async fn add_message(&self, id: &str, message: NewMessage) -> Result<MessageRecord> {
        let mut state = self.state.lock().await;
        // Fail before consuming an id.
        state.session_mut(id)?;

        let record = MessageRecord::from_new(state.next_message_id, id, message);
        state.next_message_id += 1;

        state
            .messages
            .entry(id.to_string())
            .or_default()
            .push(record.clone());
        let session = state.session_mut(id)?;
        let mut history = std::mem::take(&mut session.messages);
        history.push(record.clone());
        session.apply(SessionUpdate::messages(history));
        self.flush(&state, &[Document::Sessions, Document::Messages])
            .await?;

        tracing::debug!(
            "Message {} stored for session {} ({} sent, {} failed)",
            record.id,
            id,
            record.total_sent,
            record.total_failed
        );
        Ok(record)
    }

    async fn get_messages(&self, id: &str) -> Result<Vec<MessageRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .messages
            .get(id)
            .map(|messages| messages.iter().rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn close(&self) -> Result<()> {
        let state = self.state.lock().await;
        self.flush(&state, &Document::ALL).await?;
        tracing::info!("Local storage closed");
        Ok(())
    }
}
