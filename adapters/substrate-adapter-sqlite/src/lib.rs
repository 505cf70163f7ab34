//! SQLite-backed storage substrate: one `data.db` file serving apps,
//! aliases, VFS/blob rows, KV, documents, sessions, API keys, and analytics
//! events. A single dedicated writer connection gives the single-writer
//! guarantee the Write Queue depends on; a small reader pool serves
//! concurrent reads against the same WAL file.

#![forbid(unsafe_code)]

mod apps;
mod crypto;
mod documents;
mod events;
mod kv;
mod schema;
mod sessions;
mod vfs;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;

use fazt_core::WorkerPool;
use fazt_types::prelude::*;
use fazt_types::query::Query;
use fazt_types::substrate::{
	AliasRecord, ApiKeyRow, AppPatch, AppRecord, DocumentRow, KvRow, SessionRow, Substrate, SubstrateStats,
	TrackingEvent, VfsRow,
};

pub use crypto::{generate_api_key, hash_api_key};

#[derive(Debug)]
pub struct SqliteSubstrate {
	db: SqlitePool,
	dbr: SqlitePool,
	worker: Arc<WorkerPool>,
}

impl SqliteSubstrate {
	pub async fn open(base_dir: impl AsRef<Path>, worker: Arc<WorkerPool>) -> ClResult<Self> {
		let db_path = base_dir.as_ref().join("data.db");
		let opts =
			SqliteConnectOptions::new().filename(&db_path).create_if_missing(true).journal_mode(SqliteJournalMode::Wal);

		let db = SqlitePoolOptions::new()
			.max_connections(1)
			.connect_with(opts.clone())
			.await
			.map_err(|e| Error::StorageError(format!("opening writer connection: {e}")))?;
		let dbr = SqlitePoolOptions::new()
			.max_connections(5)
			.connect_with(opts.read_only(true))
			.await
			.map_err(|e| Error::StorageError(format!("opening reader pool: {e}")))?;

		schema::init_db(&db).await.map_err(|e| Error::StorageError(format!("schema init: {e}")))?;

		Ok(Self { db, dbr, worker })
	}
}

#[async_trait]
impl Substrate for SqliteSubstrate {
	async fn create_app(&self, app_id: &AppId, name: &str, owner: &str, template: Option<&str>) -> ClResult<()> {
		apps::create_app(&self.db, app_id, name, owner, template).await
	}
	async fn read_app(&self, app_id: &AppId) -> ClResult<AppRecord> {
		apps::read_app(&self.dbr, app_id).await
	}
	async fn list_apps(&self) -> ClResult<Vec<AppRecord>> {
		apps::list_apps(&self.dbr).await
	}
	async fn update_app(&self, app_id: &AppId, patch: &AppPatch) -> ClResult<()> {
		apps::update_app(&self.db, app_id, patch).await
	}
	async fn delete_app(&self, app_id: &AppId) -> ClResult<()> {
		apps::delete_app(&self.db, app_id).await
	}

	async fn resolve_alias(&self, domain: &str, label: &str) -> ClResult<Option<AliasRecord>> {
		apps::resolve_alias(&self.dbr, domain, label).await
	}
	async fn create_alias(&self, alias: &AliasRecord) -> ClResult<()> {
		apps::create_alias(&self.db, alias).await
	}
	async fn delete_alias(&self, domain: &str, label: &str) -> ClResult<()> {
		apps::delete_alias(&self.db, domain, label).await
	}

	async fn vfs_get(&self, app_id: &AppId, path: &str) -> ClResult<Option<VfsRow>> {
		vfs::vfs_get(&self.dbr, app_id, path).await
	}
	async fn vfs_put(&self, app_id: &AppId, path: &str, bytes: &[u8], mime: &str) -> ClResult<VfsRow> {
		vfs::vfs_put(&self.db, app_id, path, bytes, mime).await
	}
	async fn vfs_delete(&self, app_id: &AppId, path: &str) -> ClResult<()> {
		vfs::vfs_delete(&self.db, app_id, path).await
	}
	async fn vfs_list(&self, app_id: &AppId, prefix: &str) -> ClResult<Vec<VfsRow>> {
		vfs::vfs_list(&self.dbr, app_id, prefix).await
	}

	async fn kv_get(&self, app_id: &AppId, key: &str) -> ClResult<Option<KvRow>> {
		kv::kv_get(&self.db, app_id, key).await
	}
	async fn kv_set(
		&self,
		app_id: &AppId,
		key: &str,
		value: &[u8],
		mime: Option<&str>,
		ttl: Option<Timestamp>,
	) -> ClResult<()> {
		kv::kv_set(&self.db, app_id, key, value, mime, ttl).await
	}
	async fn kv_delete(&self, app_id: &AppId, key: &str) -> ClResult<()> {
		kv::kv_delete(&self.db, app_id, key).await
	}
	async fn kv_list(&self, app_id: &AppId, prefix: Option<&str>) -> ClResult<Vec<KvRow>> {
		kv::kv_list(&self.dbr, app_id, prefix).await
	}
	async fn kv_sweep_expired(&self) -> ClResult<u64> {
		kv::kv_sweep_expired(&self.db).await
	}

	async fn doc_insert(
		&self,
		app_id: &AppId,
		collection: &str,
		doc_id: Option<&str>,
		json: &serde_json::Value,
	) -> ClResult<String> {
		documents::doc_insert(&self.db, app_id, collection, doc_id, json).await
	}
	async fn doc_find(&self, app_id: &AppId, collection: &str, query: &Query) -> ClResult<Vec<DocumentRow>> {
		documents::doc_find(&self.dbr, app_id, collection, query).await
	}
	async fn doc_update(
		&self,
		app_id: &AppId,
		collection: &str,
		query: &Query,
		changes: &serde_json::Value,
	) -> ClResult<u64> {
		documents::doc_update(&self.db, app_id, collection, query, changes).await
	}
	async fn doc_delete(&self, app_id: &AppId, collection: &str, query: &Query) -> ClResult<u64> {
		documents::doc_delete(&self.db, app_id, collection, query).await
	}

	async fn create_session(&self, session: &SessionRow) -> ClResult<()> {
		sessions::create_session(&self.db, session).await
	}
	async fn read_session(&self, session_id: &str) -> ClResult<Option<SessionRow>> {
		sessions::read_session(&self.db, session_id).await
	}
	async fn touch_session(&self, session_id: &str, new_expiry: Timestamp) -> ClResult<()> {
		sessions::touch_session(&self.db, session_id, new_expiry).await
	}
	async fn delete_session(&self, session_id: &str) -> ClResult<()> {
		sessions::delete_session(&self.db, session_id).await
	}

	async fn create_api_key(&self, key: &ApiKeyRow) -> ClResult<()> {
		sessions::create_api_key(&self.db, key).await
	}
	async fn find_api_key(&self, prefix: &str) -> ClResult<Option<ApiKeyRow>> {
		sessions::find_api_key(&self.dbr, prefix).await
	}
	async fn touch_api_key(&self, prefix: &str) -> ClResult<()> {
		sessions::touch_api_key(&self.db, prefix).await
	}
	async fn revoke_api_key(&self, prefix: &str) -> ClResult<()> {
		sessions::revoke_api_key(&self.db, prefix).await
	}

	async fn create_account(&self, user_id: &str, password_hash: &str, admin: bool) -> ClResult<()> {
		sessions::create_account(&self.db, user_id, password_hash, admin).await
	}
	async fn read_account(&self, user_id: &str) -> ClResult<Option<(String, bool)>> {
		sessions::read_account(&self.dbr, user_id).await
	}
	async fn hash_password(&self, password: String) -> ClResult<String> {
		crypto::hash_password(&self.worker, password).await
	}
	async fn verify_password(&self, password: String, hash: String) -> ClResult<bool> {
		crypto::verify_password(&self.worker, password, hash).await
	}

	async fn append_events(&self, events: &[TrackingEvent]) -> ClResult<()> {
		events::append_events(&self.db, events).await
	}

	async fn stats(&self) -> ClResult<SubstrateStats> {
		events::stats(&self.dbr).await
	}
	async fn backup_to(&self, path: &Path) -> ClResult<()> {
		events::backup_to(&self.db, path).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	async fn open_test_db() -> (SqliteSubstrate, tempfile::TempDir) {
		let dir = tempfile::tempdir().unwrap();
		let worker = Arc::new(WorkerPool::new(0, 0, 1));
		let substrate = SqliteSubstrate::open(dir.path(), worker).await.unwrap();
		(substrate, dir)
	}

	#[tokio::test]
	async fn create_and_read_app_roundtrips() {
		let (substrate, _dir) = open_test_db().await;
		let app_id = AppId::new("my-app");
		substrate.create_app(&app_id, "My App", "alice", None).await.unwrap();
		let app = substrate.read_app(&app_id).await.unwrap();
		assert_eq!(app.name, "My App");
		assert_eq!(app.owner, "alice");
	}

	#[tokio::test]
	async fn vfs_put_then_get_roundtrips_bytes() {
		let (substrate, _dir) = open_test_db().await;
		let app_id = AppId::new("my-app");
		substrate.create_app(&app_id, "My App", "alice", None).await.unwrap();
		substrate.vfs_put(&app_id, "index.html", b"<h1>hi</h1>", "text/html").await.unwrap();
		let row = substrate.vfs_get(&app_id, "index.html").await.unwrap().unwrap();
		assert_eq!(row.bytes, b"<h1>hi</h1>");
		assert_eq!(row.size, 11);
	}

	#[tokio::test]
	async fn kv_ttl_expiry_is_lazy() {
		let (substrate, _dir) = open_test_db().await;
		let app_id = AppId::new("my-app");
		substrate.create_app(&app_id, "My App", "alice", None).await.unwrap();
		substrate.kv_set(&app_id, "k", b"v", None, Some(Timestamp(0))).await.unwrap();
		assert!(substrate.kv_get(&app_id, "k").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn doc_find_applies_closed_query_grammar() {
		let (substrate, _dir) = open_test_db().await;
		let app_id = AppId::new("my-app");
		substrate.create_app(&app_id, "My App", "alice", None).await.unwrap();
		substrate.doc_insert(&app_id, "todos", None, &serde_json::json!({"done": true})).await.unwrap();
		substrate.doc_insert(&app_id, "todos", None, &serde_json::json!({"done": false})).await.unwrap();
		let query = Query::parse(&serde_json::json!({"done": true})).unwrap();
		let found = substrate.doc_find(&app_id, "todos", &query).await.unwrap();
		assert_eq!(found.len(), 1);
	}
}

// vim: ts=4
