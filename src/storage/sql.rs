//! Relational session store
//!
//! Runs on sqlx's `Any` driver so the same code serves MySQL in production
//! and SQLite (including `sqlite::memory:`) for local runs and tests.
//!
//! The MySQL tables keep the long-standing layout: `JSON` list columns, a
//! `BOOLEAN` connected flag and `TIMESTAMP` columns. `Any` cannot carry those
//! types, so every read normalizes them in SQL (JSON as text, flags and
//! counts as `SIGNED`, timestamps as Unix milliseconds) and every write
//! converts back with `FROM_UNIXTIME`. SQLite stores the normalized forms
//! directly.

use super::models::{MessageRecord, NewMessage, SendResult, Session, SessionUpdate};
use super::{Result, SessionStore, generate_session_id};
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};

// Column lists in the shape `session_from_row` and `message_from_row`
// decode. Macros so they can be spliced into `concat!`.
macro_rules! mysql_session_columns {
    () => {
        "id, name, \
         COALESCE(CAST(phone_numbers AS CHAR), '[]') AS phone_numbers, \
         COALESCE(CAST(messages AS CHAR), '[]') AS messages, \
         CAST(COALESCE(is_connected, 0) AS SIGNED) AS is_connected, \
         qr_code, \
         CAST(UNIX_TIMESTAMP(created_at) * 1000 AS SIGNED) AS created_at, \
         CAST(UNIX_TIMESTAMP(updated_at) * 1000 AS SIGNED) AS updated_at"
    };
}

macro_rules! sqlite_session_columns {
    () => {
        "id, name, phone_numbers, messages, is_connected, qr_code, created_at, updated_at"
    };
}

macro_rules! mysql_message_columns {
    () => {
        "CAST(id AS SIGNED) AS id, session_id, message_text, \
         CAST(phone_numbers AS CHAR) AS phone_numbers, \
         COALESCE(CAST(results AS CHAR), '[]') AS results, \
         CAST(COALESCE(total_sent, 0) AS SIGNED) AS total_sent, \
         CAST(COALESCE(total_failed, 0) AS SIGNED) AS total_failed, \
         CAST(UNIX_TIMESTAMP(created_at) * 1000 AS SIGNED) AS created_at"
    };
}

macro_rules! sqlite_message_columns {
    () => {
        "id, session_id, message_text, phone_numbers, results, total_sent, total_failed, \
         created_at"
    };
}

/// SQL flavour behind the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Sqlite,
}

impl Dialect {
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme {
            "mysql" | "mariadb" => Ok(Self::MySql),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(StorageError::Database(sqlx::Error::Configuration(
                format!("unsupported database scheme '{}'", other).into(),
            ))),
        }
    }

    fn schema(self) -> &'static [&'static str] {
        match self {
            Self::MySql => &[
                r#"CREATE TABLE IF NOT EXISTS sessions (
                    id            VARCHAR(50) PRIMARY KEY,
                    name          VARCHAR(100) NOT NULL,
                    phone_numbers JSON,
                    messages      JSON,
                    is_connected  BOOLEAN DEFAULT FALSE,
                    qr_code       TEXT,
                    created_at    TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                    updated_at    TIMESTAMP DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
                ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"#,
                r#"CREATE TABLE IF NOT EXISTS phone_numbers (
                    id           INT AUTO_INCREMENT PRIMARY KEY,
                    session_id   VARCHAR(50) NOT NULL,
                    phone_number VARCHAR(20) NOT NULL,
                    created_at   TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE,
                    UNIQUE KEY unique_session_phone (session_id, phone_number)
                ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"#,
                r#"CREATE TABLE IF NOT EXISTS messages (
                    id            INT AUTO_INCREMENT PRIMARY KEY,
                    session_id    VARCHAR(50) NOT NULL,
                    message_text  TEXT NOT NULL,
                    phone_numbers JSON NOT NULL,
                    results       JSON,
                    total_sent    INT DEFAULT 0,
                    total_failed  INT DEFAULT 0,
                    created_at    TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
                ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"#,
            ],
            Self::Sqlite => &[
                r#"CREATE TABLE IF NOT EXISTS sessions (
                    id            TEXT PRIMARY KEY,
                    name          TEXT NOT NULL,
                    phone_numbers TEXT NOT NULL,
                    messages      TEXT NOT NULL,
                    is_connected  INTEGER NOT NULL DEFAULT 0,
                    qr_code       TEXT,
                    created_at    INTEGER NOT NULL,
                    updated_at    INTEGER NOT NULL
                )"#,
                r#"CREATE TABLE IF NOT EXISTS phone_numbers (
                    id           INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id   TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                    phone_number TEXT NOT NULL,
                    created_at   INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER) * 1000),
                    UNIQUE (session_id, phone_number)
                )"#,
                r#"CREATE TABLE IF NOT EXISTS messages (
                    id            INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id    TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                    message_text  TEXT NOT NULL,
                    phone_numbers TEXT NOT NULL,
                    results       TEXT NOT NULL,
                    total_sent    INTEGER NOT NULL DEFAULT 0,
                    total_failed  INTEGER NOT NULL DEFAULT 0,
                    created_at    INTEGER NOT NULL
                )"#,
                "CREATE INDEX IF NOT EXISTS idx_messages_session ON messages (session_id, created_at)",
            ],
        }
    }

    fn select_session(self) -> &'static str {
        match self {
            Self::MySql => concat!("SELECT ", mysql_session_columns!(), " FROM sessions WHERE id = ?"),
            Self::Sqlite => concat!("SELECT ", sqlite_session_columns!(), " FROM sessions WHERE id = ?"),
        }
    }

    fn select_sessions(self) -> &'static str {
        match self {
            Self::MySql => concat!(
                "SELECT ",
                mysql_session_columns!(),
                " FROM sessions ORDER BY created_at DESC"
            ),
            Self::Sqlite => concat!(
                "SELECT ",
                sqlite_session_columns!(),
                " FROM sessions ORDER BY created_at DESC"
            ),
        }
    }

    fn select_messages(self) -> &'static str {
        match self {
            Self::MySql => concat!(
                "SELECT ",
                mysql_message_columns!(),
                " FROM messages WHERE session_id = ? ORDER BY created_at DESC, id DESC"
            ),
            Self::Sqlite => concat!(
                "SELECT ",
                sqlite_message_columns!(),
                " FROM messages WHERE session_id = ? ORDER BY created_at DESC, id DESC"
            ),
        }
    }

    fn select_any_message(self) -> &'static str {
        match self {
            Self::MySql => concat!("SELECT ", mysql_message_columns!(), " FROM messages LIMIT 1"),
            Self::Sqlite => concat!("SELECT ", sqlite_message_columns!(), " FROM messages LIMIT 1"),
        }
    }

    fn insert_session(self) -> &'static str {
        match self {
            Self::MySql => {
                "INSERT INTO sessions (id, name, phone_numbers, messages, is_connected, qr_code, \
                 created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, FROM_UNIXTIME(? / 1000), FROM_UNIXTIME(? / 1000))"
            }
            Self::Sqlite => {
                "INSERT INTO sessions (id, name, phone_numbers, messages, is_connected, qr_code, \
                 created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
            }
        }
    }

    fn update_session(self) -> &'static str {
        match self {
            Self::MySql => {
                "UPDATE sessions SET name = ?, phone_numbers = ?, messages = ?, is_connected = ?, \
                 qr_code = ?, updated_at = FROM_UNIXTIME(? / 1000) WHERE id = ?"
            }
            Self::Sqlite => {
                "UPDATE sessions SET name = ?, phone_numbers = ?, messages = ?, is_connected = ?, \
                 qr_code = ?, updated_at = ? WHERE id = ?"
            }
        }
    }

    fn insert_message(self) -> &'static str {
        match self {
            Self::MySql => {
                "INSERT INTO messages (session_id, message_text, phone_numbers, results, \
                 total_sent, total_failed, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, FROM_UNIXTIME(? / 1000))"
            }
            Self::Sqlite => {
                "INSERT INTO messages (session_id, message_text, phone_numbers, results, \
                 total_sent, total_failed, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)"
            }
        }
    }

    fn insert_phone_number(self) -> &'static str {
        match self {
            Self::MySql => "INSERT IGNORE INTO phone_numbers (session_id, phone_number) VALUES (?, ?)",
            Self::Sqlite => {
                "INSERT OR IGNORE INTO phone_numbers (session_id, phone_number) VALUES (?, ?)"
            }
        }
    }
}

/// A bound value for [`SqlStatement`].
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
    Null,
}

impl From<Option<String>> for SqlParam {
    fn from(value: Option<String>) -> Self {
        value.map_or(SqlParam::Null, SqlParam::Text)
    }
}

/// One step of a multi-statement transaction.
#[derive(Debug, Clone)]
pub struct SqlStatement {
    pub sql: &'static str,
    pub params: Vec<SqlParam>,
}

impl SqlStatement {
    pub fn new(sql: &'static str, params: Vec<SqlParam>) -> Self {
        Self { sql, params }
    }
}

/// Session store over a pooled relational connection.
pub struct SqlSessionStore {
    pool: AnyPool,
    dialect: Dialect,
}

impl SqlSessionStore {
    /// Open a pool against `url`, check it answers, create missing tables
    /// and make sure existing ones can be read.
    pub async fn connect(url: &str, connection_limit: u32) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let dialect = Dialect::from_url(url)?;

        let options = match dialect {
            // Every connection to `sqlite::memory:` is a fresh database, so
            // keep exactly one alive for the life of the pool.
            Dialect::Sqlite => AnyPoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None),
            Dialect::MySql => AnyPoolOptions::new().max_connections(connection_limit.max(1)),
        };
        let pool = options.connect(url).await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        let store = Self { pool, dialect };
        let ready = match store.run_migrations().await {
            Ok(()) => store.verify_schema().await,
            Err(e) => Err(e),
        };
        if let Err(e) = ready {
            store.pool.close().await;
            return Err(e);
        }

        tracing::info!("Connected to {:?} session store", dialect);
        Ok(store)
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn run_migrations(&self) -> Result<()> {
        for ddl in self.dialect.schema() {
            sqlx::query(*ddl).execute(&self.pool).await?;
        }
        tracing::debug!("Session store schema ready");
        Ok(())
    }

    /// `CREATE TABLE IF NOT EXISTS` leaves existing tables alone. Read them
    /// back once so a layout this store cannot decode fails the connect
    /// instead of every later request.
    async fn verify_schema(&self) -> Result<()> {
        self.find_all().await?;

        if let Some(row) = sqlx::query(self.dialect.select_any_message())
            .fetch_optional(&self.pool)
            .await?
        {
            message_from_row(&row)?;
        }

        sqlx::query("SELECT session_id, phone_number FROM phone_numbers LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(())
    }

    /// Run `statements` in one transaction, rolling back on the first
    /// failure. Returns the affected row count of each statement.
    pub async fn transaction(&self, statements: &[SqlStatement]) -> Result<Vec<u64>> {
        let mut tx = self.pool.begin().await?;
        let mut affected = Vec::with_capacity(statements.len());
        for statement in statements {
            let mut query = sqlx::query(statement.sql);
            for param in &statement.params {
                query = match param {
                    SqlParam::Text(value) => query.bind(value.clone()),
                    SqlParam::Int(value) => query.bind(*value),
                    SqlParam::Null => query.bind(None::<String>),
                };
            }
            // Dropping `tx` on error rolls it back.
            let result = query.execute(&mut *tx).await?;
            affected.push(result.rows_affected());
        }
        tx.commit().await?;
        Ok(affected)
    }

    async fn require(&self, id: &str) -> Result<Session> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }
}

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn timestamp(row: &AnyRow, table: &'static str, column: &'static str) -> Result<DateTime<Utc>> {
    let ms: i64 = row.try_get(column)?;
    DateTime::from_timestamp_millis(ms).ok_or_else(|| StorageError::Corrupt {
        table,
        column,
        value: ms.to_string(),
    })
}

fn count(row: &AnyRow, column: &'static str) -> Result<u32> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value).map_err(|_| StorageError::Corrupt {
        table: "messages",
        column,
        value: value.to_string(),
    })
}

fn session_from_row(row: &AnyRow) -> Result<Session> {
    let phone_numbers: String = row.try_get("phone_numbers")?;
    let messages: String = row.try_get("messages")?;
    Ok(Session {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        phone_numbers: serde_json::from_str(&phone_numbers)?,
        messages: serde_json::from_str(&messages)?,
        is_connected: row.try_get::<i64, _>("is_connected")? != 0,
        qr_code: row.try_get("qr_code")?,
        created_at: timestamp(row, "sessions", "created_at")?,
        updated_at: timestamp(row, "sessions", "updated_at")?,
    })
}

fn message_from_row(row: &AnyRow) -> Result<MessageRecord> {
    let phone_numbers: String = row.try_get("phone_numbers")?;
    let results: String = row.try_get("results")?;
    let results: Vec<SendResult> = serde_json::from_str(&results)?;
    Ok(MessageRecord {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        body: row.try_get("message_text")?,
        phone_numbers: serde_json::from_str(&phone_numbers)?,
        results,
        total_sent: count(row, "total_sent")?,
        total_failed: count(row, "total_failed")?,
        timestamp: timestamp(row, "messages", "created_at")?,
    })
}

#[async_trait]
impl SessionStore for SqlSessionStore {
    async fn create(&self, name: &str, id: Option<&str>) -> Result<Session> {
        let id = id.map(str::to_string).unwrap_or_else(generate_session_id);
        let session = Session::new(id.clone(), name);

        sqlx::query(self.dialect.insert_session())
            .bind(session.id.clone())
            .bind(session.name.clone())
            .bind(serde_json::to_string(&session.phone_numbers)?)
            .bind(serde_json::to_string(&session.messages)?)
            .bind(i64::from(session.is_connected))
            .bind(session.qr_code.clone())
            .bind(millis(session.created_at))
            .bind(millis(session.updated_at))
            .execute(&self.pool)
            .await?;

        tracing::info!("Session created: {}", id);
        Ok(session)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(self.dialect.select_session())
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn find_all(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query(self.dialect.select_sessions())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(session_from_row).collect()
    }

    /// Rewrites the session row. A new phone number list also replaces the
    /// session's `phone_numbers` rows, in the same transaction.
    async fn update(&self, id: &str, update: SessionUpdate) -> Result<Session> {
        let mut session = self.require(id).await?;
        let numbers_changed = update.phone_numbers.is_some();
        session.apply(update);

        let key = || SqlParam::Text(session.id.clone());
        let mut statements = vec![SqlStatement::new(
            self.dialect.update_session(),
            vec![
                SqlParam::Text(session.name.clone()),
                SqlParam::Text(serde_json::to_string(&session.phone_numbers)?),
                SqlParam::Text(serde_json::to_string(&session.messages)?),
                SqlParam::Int(i64::from(session.is_connected)),
                SqlParam::from(session.qr_code.clone()),
                SqlParam::Int(millis(session.updated_at)),
                key(),
            ],
        )];
        if numbers_changed {
            statements.push(SqlStatement::new(
                "DELETE FROM phone_numbers WHERE session_id = ?",
                vec![key()],
            ));
            for number in &session.phone_numbers {
                statements.push(SqlStatement::new(
                    self.dialect.insert_phone_number(),
                    vec![key(), SqlParam::Text(number.clone())],
                ));
            }
        }
        self.transaction(&statements).await?;

        tracing::debug!("Session updated: {}", id);
        Ok(session)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let key = || vec![SqlParam::Text(id.to_string())];
        let affected = self
            .transaction(&[
                SqlStatement::new("DELETE FROM messages WHERE session_id = ?", key()),
                SqlStatement::new("DELETE FROM phone_numbers WHERE session_id = ?", key()),
                SqlStatement::new("DELETE FROM sessions WHERE id = ?", key()),
            ])
            .await?;

        let removed = affected.last().copied().unwrap_or(0) > 0;
        if removed {
            tracing::info!("Session deleted: {}", id);
        }
        Ok(removed)
    }

    async fn add_phone_number(&self, id: &str, number: &str) -> Result<Session> {
        let mut session = self.require(id).await?;
        if !session.add_phone_number(number) {
            return Ok(session);
        }
        self.update(id, SessionUpdate::phone_numbers(session.phone_numbers))
            .await
    }

    async fn remove_phone_number(&self, id: &str, number: &str) -> Result<Session> {
        let mut session = self.require(id).await?;
        if !session.remove_phone_number(number) {
            return Ok(session);
        }
        self.update(id, SessionUpdate::phone_numbers(session.phone_numbers))
            .await
    }

    async fn add_message(&self, id: &str, message: NewMessage) -> Result<MessageRecord> {
        let mut session = self.require(id).await?;

        // Placeholder id; the real one comes back from the insert.
        let mut record = MessageRecord::from_new(0, id, message);
        let result = sqlx::query(self.dialect.insert_message())
            .bind(id.to_string())
            .bind(record.body.clone())
            .bind(serde_json::to_string(&record.phone_numbers)?)
            .bind(serde_json::to_string(&record.results)?)
            .bind(i64::from(record.total_sent))
            .bind(i64::from(record.total_failed))
            .bind(millis(record.timestamp))
            .execute(&self.pool)
            .await?;

        record.id = result
            .last_insert_id()
            .ok_or(StorageError::Database(sqlx::Error::RowNotFound))?;

        session.messages.push(record.clone());
        self.update(id, SessionUpdate::messages(session.messages))
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
        let rows = sqlx::query(self.dialect.select_messages())
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        tracing::info!("Relational session store closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqlSessionStore {
        SqlSessionStore::connect("sqlite::memory:", 1).await.unwrap()
    }

    #[test]
    fn test_dialect_from_url() {
        assert_eq!(
            Dialect::from_url("mysql://root@localhost/db").unwrap(),
            Dialect::MySql
        );
        assert_eq!(Dialect::from_url("sqlite::memory:").unwrap(), Dialect::Sqlite);
        assert!(Dialect::from_url("postgres://localhost/db").is_err());
    }

    #[tokio::test]
    async fn test_phone_numbers_round_trip() {
        let store = memory_store().await;
        let session = store.create("Main", Some("default")).await.unwrap();
        assert_eq!(session.id, "default");

        store.add_phone_number("default", "1111111111").await.unwrap();
        store.add_phone_number("default", "2222222222").await.unwrap();
        store.add_phone_number("default", "2222222222").await.unwrap();

        let loaded = store.find_by_id("default").await.unwrap().unwrap();
        assert_eq!(loaded.phone_numbers, vec!["1111111111", "2222222222"]);
        assert!(!loaded.is_connected);
        assert!(loaded.qr_code.is_none());

        let loaded = store
            .remove_phone_number("default", "1111111111")
            .await
            .unwrap();
        assert_eq!(loaded.phone_numbers, vec!["2222222222"]);
    }

    #[tokio::test]
    async fn test_messages_are_newest_first() {
        let store = memory_store().await;
        store.create("Main", Some("default")).await.unwrap();

        let first = store
            .add_message(
                "default",
                NewMessage::new(
                    "first",
                    vec!["1".into(), "2".into()],
                    vec![SendResult::success("1"), SendResult::failure("2", "bad number")],
                ),
            )
            .await
            .unwrap();
        assert_eq!((first.total_sent, first.total_failed), (1, 1));

        let second = store
            .add_message("default", NewMessage::new("second", vec![], vec![]))
            .await
            .unwrap();
        assert!(second.id > first.id);

        let messages = store.get_messages("default").await.unwrap();
        let bodies: Vec<_> = messages.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["second", "first"]);
        assert_eq!(messages[1].results.len(), 2);

        let session = store.find_by_id("default").await.unwrap().unwrap();
        assert_eq!(session.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = memory_store().await;
        store.create("Main", Some("default")).await.unwrap();
        store.add_phone_number("default", "1111111111").await.unwrap();
        store
            .add_message("default", NewMessage::new("hi", vec![], vec![]))
            .await
            .unwrap();

        assert!(store.delete("default").await.unwrap());
        assert!(store.find_by_id("default").await.unwrap().is_none());
        assert!(store.get_messages("default").await.unwrap().is_empty());
        assert!(!store.delete("default").await.unwrap());
    }

    #[tokio::test]
    async fn test_mutating_missing_session_is_not_found() {
        let store = memory_store().await;
        let err = store
            .update("missing", SessionUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));

        let err = store.add_phone_number("missing", "1").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_clears_qr_code() {
        let store = memory_store().await;
        store.create("Main", Some("default")).await.unwrap();
        store
            .update(
                "default",
                SessionUpdate {
                    qr_code: Some(Some("data:image/svg+xml;base64,AAAA".into())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let session = store
            .update(
                "default",
                SessionUpdate {
                    qr_code: Some(None),
                    is_connected: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(session.qr_code.is_none());

        let loaded = store.find_by_id("default").await.unwrap().unwrap();
        assert!(loaded.qr_code.is_none());
        assert!(loaded.is_connected);
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_failure() {
        let store = memory_store().await;
        store.create("Main", Some("default")).await.unwrap();

        let result = store
            .transaction(&[
                SqlStatement::new(
                    "DELETE FROM sessions WHERE id = ?",
                    vec![SqlParam::Text("default".into())],
                ),
                SqlStatement::new("DELETE FROM no_such_table WHERE id = ?", vec![SqlParam::Int(1)]),
            ])
            .await;
        assert!(result.is_err());
        assert!(store.find_by_id("default").await.unwrap().is_some());
    }

    async fn phone_rows(store: &SqlSessionStore, id: &str) -> Vec<String> {
        sqlx::query("SELECT phone_number FROM phone_numbers WHERE session_id = ? ORDER BY id")
            .bind(id.to_string())
            .fetch_all(&store.pool)
            .await
            .unwrap()
            .iter()
            .map(|row| row.try_get::<String, _>("phone_number").unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_update_replaces_phone_number_rows() {
        let store = memory_store().await;
        store.create("Main", Some("default")).await.unwrap();
        store.add_phone_number("default", "1111111111").await.unwrap();
        assert_eq!(phone_rows(&store, "default").await, vec!["1111111111"]);

        store
            .update(
                "default",
                SessionUpdate::phone_numbers(vec!["2222222222".into(), "3333333333".into()]),
            )
            .await
            .unwrap();
        assert_eq!(
            phone_rows(&store, "default").await,
            vec!["2222222222", "3333333333"]
        );

        // Updates that leave the list alone keep the rows.
        store
            .update(
                "default",
                SessionUpdate {
                    is_connected: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(phone_rows(&store, "default").await.len(), 2);

        store.remove_phone_number("default", "2222222222").await.unwrap();
        assert_eq!(phone_rows(&store, "default").await, vec!["3333333333"]);
    }

    #[tokio::test]
    async fn test_out_of_range_values_are_reported() {
        let store = memory_store().await;
        store.create("Main", Some("default")).await.unwrap();
        store
            .transaction(&[SqlStatement::new(
                "INSERT INTO messages (session_id, message_text, phone_numbers, results, \
                 total_sent, total_failed, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
                vec![
                    SqlParam::Text("default".into()),
                    SqlParam::Text("hi".into()),
                    SqlParam::Text("[]".into()),
                    SqlParam::Text("[]".into()),
                    SqlParam::Int(-1),
                    SqlParam::Int(0),
                    SqlParam::Int(0),
                ],
            )])
            .await
            .unwrap();
        let err = store.get_messages("default").await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Corrupt {
                column: "total_sent",
                ..
            }
        ));

        store
            .transaction(&[SqlStatement::new(
                "UPDATE sessions SET created_at = ? WHERE id = ?",
                vec![SqlParam::Int(i64::MAX), SqlParam::Text("default".into())],
            )])
            .await
            .unwrap();
        let err = store.find_by_id("default").await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Corrupt {
                table: "sessions",
                column: "created_at",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unreadable_existing_tables_fail_connect() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("legacy.db").display());

        // A sessions table written with textual timestamps.
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(1).connect(&url).await.unwrap();
        sqlx::query(
            "CREATE TABLE sessions (id TEXT PRIMARY KEY, name TEXT NOT NULL, \
             phone_numbers TEXT, messages TEXT, is_connected INTEGER, qr_code TEXT, \
             created_at TEXT, updated_at TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO sessions VALUES ('default', 'Default Session', '[]', '[]', 0, NULL, \
             '2024-05-01 10:00:00', '2024-05-01 10:00:00')",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;

        assert!(SqlSessionStore::connect(&url, 1).await.is_err());
    }

    #[test]
    fn test_mysql_layout_uses_native_column_types() {
        let ddl = Dialect::MySql.schema().join("\n");
        assert!(ddl.contains("phone_numbers JSON"));
        assert!(ddl.contains("is_connected  BOOLEAN DEFAULT FALSE"));
        assert!(ddl.contains("created_at    TIMESTAMP DEFAULT CURRENT_TIMESTAMP"));
        assert!(ddl.contains("ON UPDATE CURRENT_TIMESTAMP"));

        assert!(Dialect::MySql
            .select_session()
            .contains("CAST(UNIX_TIMESTAMP(created_at) * 1000 AS SIGNED) AS created_at"));
        assert!(Dialect::MySql
            .insert_message()
            .contains("FROM_UNIXTIME(? / 1000)"));
        assert!(!Dialect::Sqlite.select_session().contains("UNIX_TIMESTAMP"));
    }

    #[tokio::test]
    async fn test_find_all_newest_first() {
        let store = memory_store().await;
        store.create("Older", Some("a")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.create("Newer", Some("b")).await.unwrap();

        let names: Vec<_> = store
            .find_all()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["Newer", "Older"]);
    }
}
