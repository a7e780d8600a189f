//! Pairing credential store
//!
//! Implements the `wacore` storage traits on a single SQLite file under the
//! session directory so a paired device survives restarts. Almost everything
//! the protocol layer persists is an opaque blob looked up by key, so it all
//! lives in one `(bucket, scope, key) -> value` table. LID/phone mappings are
//! looked up from both sides and keep a table of their own.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;

use wacore::appstate::hash::HashState;
use wacore::appstate::processor::AppStateMutationMAC;
use wacore::store::Device;
use wacore::store::error::{Result, StoreError, db_err};
use wacore::store::traits::{
    AppStateSyncKey, AppSyncStore, DeviceListRecord, DeviceStore, LidPnMappingEntry, ProtocolStore,
    SignalStore,
};

const NO_SCOPE: &str = "";
const DEVICE_KEY: &[u8] = b"self";

/// Logical groupings inside the credential table.
mod bucket {
    pub const IDENTITY: &str = "identity";
    pub const SESSION: &str = "session";
    pub const PREKEY: &str = "prekey";
    pub const SIGNED_PREKEY: &str = "signed_prekey";
    pub const SENDER_KEY: &str = "sender_key";
    pub const SYNC_KEY: &str = "sync_key";
    pub const SYNC_VERSION: &str = "sync_version";
    pub const MUTATION_MAC: &str = "mutation_mac";
    pub const SKDM_RECIPIENT: &str = "skdm_recipient";
    pub const BASE_KEY: &str = "base_key";
    pub const DEVICE_LIST: &str = "device_list";
    pub const FORGET_MARK: &str = "forget_mark";
    pub const DEVICE: &str = "device";
}

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS credentials (
        bucket TEXT NOT NULL,
        scope  TEXT NOT NULL,
        key    BLOB NOT NULL,
        value  BLOB NOT NULL,
        PRIMARY KEY (bucket, scope, key)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS lid_pn_mapping (
        lid             TEXT PRIMARY KEY,
        phone_number    TEXT NOT NULL,
        created_at      INTEGER NOT NULL,
        updated_at      INTEGER NOT NULL,
        learning_source TEXT NOT NULL DEFAULT ''
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_lid_pn_phone ON lid_pn_mapping (phone_number)",
];

fn json_err(e: serde_json::Error) -> StoreError {
    StoreError::Serialization(e.to_string())
}

/// Persistent WhatsApp device credentials.
#[derive(Clone)]
pub struct CredentialStore {
    pool: SqlitePool,
}

impl CredentialStore {
    /// Open (or create) the store at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::with_pool(pool).await
    }

    /// Private in-memory store, for tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::new().in_memory(true))
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        for ddl in SCHEMA {
            sqlx::query(*ddl).execute(&pool).await.map_err(db_err)?;
        }
        Ok(Self { pool })
    }

    /// Whether a usable paired device record is stored.
    pub async fn device_exists(&self) -> Result<bool> {
        Ok(self
            .get(bucket::DEVICE, NO_SCOPE, DEVICE_KEY)
            .await?
            .is_some_and(|data| rmp_serde::from_slice::<Device>(&data).is_ok()))
    }

    async fn get(&self, bucket: &str, scope: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query(
            "SELECT value FROM credentials WHERE bucket = ? AND scope = ? AND key = ?",
        )
        .bind(bucket)
        .bind(scope)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn put(&self, bucket: &str, scope: &str, key: &[u8], value: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO credentials (bucket, scope, key, value) VALUES (?, ?, ?, ?)
             ON CONFLICT(bucket, scope, key) DO UPDATE SET value = excluded.value",
        )
        .bind(bucket)
        .bind(scope)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn remove(&self, bucket: &str, scope: &str, key: &[u8]) -> Result<()> {
        sqlx::query("DELETE FROM credentials WHERE bucket = ? AND scope = ? AND key = ?")
            .bind(bucket)
            .bind(scope)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn scan(&self, bucket: &str, scope: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let rows = sqlx::query("SELECT key, value FROM credentials WHERE bucket = ? AND scope = ?")
            .bind(bucket)
            .bind(scope)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get("key"), r.get("value")))
            .collect())
    }

    async fn clear(&self, bucket: &str, scope: &str) -> Result<()> {
        sqlx::query("DELETE FROM credentials WHERE bucket = ? AND scope = ?")
            .bind(bucket)
            .bind(scope)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    fn scoped_keys(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Vec<String> {
        entries
            .into_iter()
            .filter_map(|(key, _)| String::from_utf8(key).ok())
            .collect()
    }

    fn mapping_from_row(r: &sqlx::sqlite::SqliteRow) -> LidPnMappingEntry {
        LidPnMappingEntry {
            lid: r.get("lid"),
            phone_number: r.get("phone_number"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
            learning_source: r.get("learning_source"),
        }
    }
}

#[async_trait]
impl SignalStore for CredentialStore {
    async fn put_identity(&self, address: &str, key: [u8; 32]) -> Result<()> {
        self.put(bucket::IDENTITY, NO_SCOPE, address.as_bytes(), &key)
            .await
    }

    async fn load_identity(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.get(bucket::IDENTITY, NO_SCOPE, address.as_bytes()).await
    }

    async fn delete_identity(&self, address: &str) -> Result<()> {
        self.remove(bucket::IDENTITY, NO_SCOPE, address.as_bytes())
            .await
    }

    async fn get_session(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.get(bucket::SESSION, NO_SCOPE, address.as_bytes()).await
    }

    async fn put_session(&self, address: &str, session: &[u8]) -> Result<()> {
        self.put(bucket::SESSION, NO_SCOPE, address.as_bytes(), session)
            .await
    }

    async fn delete_session(&self, address: &str) -> Result<()> {
        self.remove(bucket::SESSION, NO_SCOPE, address.as_bytes())
            .await
    }

    async fn store_prekey(&self, id: u32, record: &[u8], _uploaded: bool) -> Result<()> {
        self.put(bucket::PREKEY, NO_SCOPE, id.to_string().as_bytes(), record)
            .await
    }

    async fn load_prekey(&self, id: u32) -> Result<Option<Vec<u8>>> {
        self.get(bucket::PREKEY, NO_SCOPE, id.to_string().as_bytes())
            .await
    }

    async fn remove_prekey(&self, id: u32) -> Result<()> {
        self.remove(bucket::PREKEY, NO_SCOPE, id.to_string().as_bytes())
            .await
    }

    async fn store_signed_prekey(&self, id: u32, record: &[u8]) -> Result<()> {
        self.put(bucket::SIGNED_PREKEY, NO_SCOPE, id.to_string().as_bytes(), record)
            .await
    }

    async fn load_signed_prekey(&self, id: u32) -> Result<Option<Vec<u8>>> {
        self.get(bucket::SIGNED_PREKEY, NO_SCOPE, id.to_string().as_bytes())
            .await
    }

    async fn load_all_signed_prekeys(&self) -> Result<Vec<(u32, Vec<u8>)>> {
        let entries = self.scan(bucket::SIGNED_PREKEY, NO_SCOPE).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, record)| {
                let id = std::str::from_utf8(&key).ok()?.parse().ok()?;
                Some((id, record))
            })
            .collect())
    }

    async fn remove_signed_prekey(&self, id: u32) -> Result<()> {
        self.remove(bucket::SIGNED_PREKEY, NO_SCOPE, id.to_string().as_bytes())
            .await
    }

    async fn put_sender_key(&self, address: &str, record: &[u8]) -> Result<()> {
        self.put(bucket::SENDER_KEY, NO_SCOPE, address.as_bytes(), record)
            .await
    }

    async fn get_sender_key(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.get(bucket::SENDER_KEY, NO_SCOPE, address.as_bytes())
            .await
    }

    async fn delete_sender_key(&self, address: &str) -> Result<()> {
        self.remove(bucket::SENDER_KEY, NO_SCOPE, address.as_bytes())
            .await
    }
}

#[async_trait]
impl AppSyncStore for CredentialStore {
    async fn get_sync_key(&self, key_id: &[u8]) -> Result<Option<AppStateSyncKey>> {
        match self.get(bucket::SYNC_KEY, NO_SCOPE, key_id).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data).map_err(json_err)?)),
            None => Ok(None),
        }
    }

    async fn set_sync_key(&self, key_id: &[u8], key: AppStateSyncKey) -> Result<()> {
        let data = serde_json::to_vec(&key).map_err(json_err)?;
        self.put(bucket::SYNC_KEY, NO_SCOPE, key_id, &data).await
    }

    async fn get_version(&self, name: &str) -> Result<HashState> {
        match self.get(bucket::SYNC_VERSION, NO_SCOPE, name.as_bytes()).await? {
            Some(data) => serde_json::from_slice(&data).map_err(json_err),
            None => Ok(HashState::default()),
        }
    }

    async fn set_version(&self, name: &str, state: HashState) -> Result<()> {
        let data = serde_json::to_vec(&state).map_err(json_err)?;
        self.put(bucket::SYNC_VERSION, NO_SCOPE, name.as_bytes(), &data)
            .await
    }

    async fn put_mutation_macs(
        &self,
        name: &str,
        _version: u64,
        mutations: &[AppStateMutationMAC],
    ) -> Result<()> {
        for m in mutations {
            self.put(bucket::MUTATION_MAC, name, &m.index_mac, &m.value_mac)
                .await?;
        }
        Ok(())
    }

    async fn get_mutation_mac(&self, name: &str, index_mac: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get(bucket::MUTATION_MAC, name, index_mac).await
    }

    async fn delete_mutation_macs(&self, name: &str, index_macs: &[Vec<u8>]) -> Result<()> {
        for mac in index_macs {
            self.remove(bucket::MUTATION_MAC, name, mac).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProtocolStore for CredentialStore {
    async fn get_skdm_recipients(&self, group_jid: &str) -> Result<Vec<String>> {
        let entries = self.scan(bucket::SKDM_RECIPIENT, group_jid).await?;
        Ok(Self::scoped_keys(entries))
    }

    async fn add_skdm_recipients(&self, group_jid: &str, device_jids: &[String]) -> Result<()> {
        for jid in device_jids {
            self.put(bucket::SKDM_RECIPIENT, group_jid, jid.as_bytes(), &[])
                .await?;
        }
        Ok(())
    }

    async fn clear_skdm_recipients(&self, group_jid: &str) -> Result<()> {
        self.clear(bucket::SKDM_RECIPIENT, group_jid).await
    }

    async fn get_lid_mapping(&self, lid: &str) -> Result<Option<LidPnMappingEntry>> {
        let row = sqlx::query(
            "SELECT lid, phone_number, created_at, updated_at, learning_source
             FROM lid_pn_mapping WHERE lid = ?",
        )
        .bind(lid)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.as_ref().map(Self::mapping_from_row))
    }

    async fn get_pn_mapping(&self, phone: &str) -> Result<Option<LidPnMappingEntry>> {
        let row = sqlx::query(
            "SELECT lid, phone_number, created_at, updated_at, learning_source
             FROM lid_pn_mapping WHERE phone_number = ?",
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.as_ref().map(Self::mapping_from_row))
    }

    async fn put_lid_mapping(&self, entry: &LidPnMappingEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO lid_pn_mapping (lid, phone_number, created_at, updated_at, learning_source)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(lid) DO UPDATE SET
                phone_number = excluded.phone_number,
                updated_at = excluded.updated_at,
                learning_source = excluded.learning_source",
        )
        .bind(&entry.lid)
        .bind(&entry.phone_number)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .bind(&entry.learning_source)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_all_lid_mappings(&self) -> Result<Vec<LidPnMappingEntry>> {
        let rows = sqlx::query(
            "SELECT lid, phone_number, created_at, updated_at, learning_source FROM lid_pn_mapping",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(Self::mapping_from_row).collect())
    }

    async fn save_base_key(&self, address: &str, message_id: &str, base_key: &[u8]) -> Result<()> {
        self.put(bucket::BASE_KEY, address, message_id.as_bytes(), base_key)
            .await
    }

    async fn has_same_base_key(
        &self,
        address: &str,
        message_id: &str,
        current_base_key: &[u8],
    ) -> Result<bool> {
        Ok(self
            .get(bucket::BASE_KEY, address, message_id.as_bytes())
            .await?
            .is_some_and(|stored| stored == current_base_key))
    }

    async fn delete_base_key(&self, address: &str, message_id: &str) -> Result<()> {
        self.remove(bucket::BASE_KEY, address, message_id.as_bytes())
            .await
    }

    async fn update_device_list(&self, record: DeviceListRecord) -> Result<()> {
        let data = serde_json::to_vec(&record).map_err(json_err)?;
        self.put(bucket::DEVICE_LIST, NO_SCOPE, record.user.as_bytes(), &data)
            .await
    }

    async fn get_devices(&self, user: &str) -> Result<Option<DeviceListRecord>> {
        match self.get(bucket::DEVICE_LIST, NO_SCOPE, user.as_bytes()).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data).map_err(json_err)?)),
            None => Ok(None),
        }
    }

    async fn mark_forget_sender_key(&self, group_jid: &str, participant: &str) -> Result<()> {
        self.put(bucket::FORGET_MARK, group_jid, participant.as_bytes(), &[])
            .await
    }

    async fn consume_forget_marks(&self, group_jid: &str) -> Result<Vec<String>> {
        let participants = Self::scoped_keys(self.scan(bucket::FORGET_MARK, group_jid).await?);
        if !participants.is_empty() {
            self.clear(bucket::FORGET_MARK, group_jid).await?;
        }
        Ok(participants)
    }
}

#[async_trait]
impl DeviceStore for CredentialStore {
    async fn save(&self, device: &Device) -> Result<()> {
        let bytes = rmp_serde::to_vec(device).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.put(bucket::DEVICE, NO_SCOPE, DEVICE_KEY, &bytes).await
    }

    async fn load(&self) -> Result<Option<Device>> {
        let Some(data) = self.get(bucket::DEVICE, NO_SCOPE, DEVICE_KEY).await? else {
            return Ok(None);
        };
        match rmp_serde::from_slice(&data) {
            Ok(device) => Ok(Some(device)),
            Err(e) => {
                tracing::warn!("Stored device record is unreadable ({}), pairing again", e);
                self.remove(bucket::DEVICE, NO_SCOPE, DEVICE_KEY).await?;
                Ok(None)
            }
        }
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self
            .get(bucket::DEVICE, NO_SCOPE, DEVICE_KEY)
            .await?
            .is_some())
    }

    async fn create(&self) -> Result<i32> {
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> CredentialStore {
        CredentialStore::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_identity_roundtrip() {
        let store = test_store().await;
        store.put_identity("alice@s.whatsapp.net", [42u8; 32]).await.unwrap();
        let loaded = store.load_identity("alice@s.whatsapp.net").await.unwrap();
        assert_eq!(loaded.unwrap(), vec![42u8; 32]);

        store.delete_identity("alice@s.whatsapp.net").await.unwrap();
        assert!(store.load_identity("alice@s.whatsapp.net").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_buckets_do_not_collide() {
        let store = test_store().await;
        store.put_session("addr", b"session").await.unwrap();
        store.put_sender_key("addr", b"sender").await.unwrap();
        assert_eq!(store.get_session("addr").await.unwrap().unwrap(), b"session");
        assert_eq!(store.get_sender_key("addr").await.unwrap().unwrap(), b"sender");
    }

    #[tokio::test]
    async fn test_signed_prekeys_listing() {
        let store = test_store().await;
        store.store_signed_prekey(10, b"spk-10").await.unwrap();
        store.store_signed_prekey(11, b"spk-11").await.unwrap();
        store.store_prekey(12, b"pk-12", false).await.unwrap();

        let mut all = store.load_all_signed_prekeys().await.unwrap();
        all.sort();
        assert_eq!(all, vec![(10, b"spk-10".to_vec()), (11, b"spk-11".to_vec())]);
    }

    #[tokio::test]
    async fn test_version_defaults_when_missing() {
        let store = test_store().await;
        let state = store.get_version("critical_block").await.unwrap();
        assert_eq!(state.version, 0);
    }

    #[tokio::test]
    async fn test_mutation_macs_scoped_by_name() {
        let store = test_store().await;
        let macs = vec![AppStateMutationMAC {
            index_mac: vec![1, 2],
            value_mac: vec![3, 4],
        }];
        store.put_mutation_macs("regular", 1, &macs).await.unwrap();

        assert_eq!(
            store.get_mutation_mac("regular", &[1, 2]).await.unwrap(),
            Some(vec![3, 4])
        );
        assert!(store.get_mutation_mac("critical_block", &[1, 2]).await.unwrap().is_none());

        store.delete_mutation_macs("regular", &[vec![1, 2]]).await.unwrap();
        assert!(store.get_mutation_mac("regular", &[1, 2]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_forget_marks_are_consumed_once() {
        let store = test_store().await;
        store.mark_forget_sender_key("group1", "user1").await.unwrap();
        store.mark_forget_sender_key("group1", "user2").await.unwrap();
        store.mark_forget_sender_key("group2", "user3").await.unwrap();

        assert_eq!(store.consume_forget_marks("group1").await.unwrap().len(), 2);
        assert!(store.consume_forget_marks("group1").await.unwrap().is_empty());
        assert_eq!(store.consume_forget_marks("group2").await.unwrap(), vec!["user3"]);
    }

    #[tokio::test]
    async fn test_lid_mapping_both_directions() {
        let store = test_store().await;
        let entry = LidPnMappingEntry {
            lid: "lid123".into(),
            phone_number: "15551234".into(),
            created_at: 100,
            updated_at: 200,
            learning_source: "usync".into(),
        };
        store.put_lid_mapping(&entry).await.unwrap();

        let by_phone = store.get_pn_mapping("15551234").await.unwrap().unwrap();
        assert_eq!(by_phone.lid, "lid123");
        let by_lid = store.get_lid_mapping("lid123").await.unwrap().unwrap();
        assert_eq!(by_lid.phone_number, "15551234");
    }

    #[tokio::test]
    async fn test_base_key_comparison() {
        let store = test_store().await;
        store.save_base_key("addr", "msg1", b"key1").await.unwrap();
        assert!(store.has_same_base_key("addr", "msg1", b"key1").await.unwrap());
        assert!(!store.has_same_base_key("addr", "msg1", b"key2").await.unwrap());
        store.delete_base_key("addr", "msg1").await.unwrap();
        assert!(!store.has_same_base_key("addr", "msg1", b"key1").await.unwrap());
    }

    #[tokio::test]
    async fn test_unpaired_device() {
        let store = test_store().await;
        assert!(!store.exists().await.unwrap());
        assert!(!store.device_exists().await.unwrap());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreadable_device_record_is_dropped() {
        let store = test_store().await;
        store
            .put(bucket::DEVICE, NO_SCOPE, DEVICE_KEY, b"{\"legacy\":true}")
            .await
            .unwrap();
        assert!(store.exists().await.unwrap());
        assert!(!store.device_exists().await.unwrap());

        assert!(store.load().await.unwrap().is_none());
        assert!(!store.exists().await.unwrap());
    }
}
