//! The storage substrate adapter trait.
//!
//! One trait, implemented once against the embedded SQLite store, covering
//! every durable namespace Fazt needs (apps, aliases, VFS/blob rows, KV,
//! documents, sessions, API keys, tracking events). Mirrors the adapter-trait
//! boundary the rest of the pack uses (a `Debug + Send + Sync` trait object
//! stored behind an `Arc`), but collapsed to one trait because Fazt mandates
//! a single substrate file rather than split auth/meta/blob stores.
//!
//! Mutating methods are only ever invoked from inside the Write Queue's
//! single worker thread; that is what gives the substrate its single-writer
//! guarantee, not locking inside the adapter itself. Read methods may be
//! called from any request task concurrently.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt::Debug;

use crate::error::ClResult;
use crate::query::Query;
use crate::types::{AppId, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AppState {
	Active,
	Disabled,
	Deleting,
}

impl AppState {
	pub fn as_str(&self) -> &'static str {
		match self {
			AppState::Active => "active",
			AppState::Disabled => "disabled",
			AppState::Deleting => "deleting",
		}
	}

	pub fn parse(s: &str) -> Self {
		match s {
			"disabled" => AppState::Disabled,
			"deleting" => AppState::Deleting,
			_ => AppState::Active,
		}
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct AppRecord {
	pub app_id: AppId,
	pub name: String,
	pub owner: String,
	pub state: AppState,
	pub template: Option<String>,
	pub spa: bool,
	pub created_at: Timestamp,
}

#[derive(Debug, Clone, Default)]
pub struct AppPatch {
	pub name: crate::types::Patch<String>,
	pub state: crate::types::Patch<String>,
	pub spa: crate::types::Patch<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasKind {
	Proxy,
	Redirect,
	Reserved,
}

impl AliasKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			AliasKind::Proxy => "proxy",
			AliasKind::Redirect => "redirect",
			AliasKind::Reserved => "reserved",
		}
	}

	pub fn parse(s: &str) -> Self {
		match s {
			"redirect" => AliasKind::Redirect,
			"reserved" => AliasKind::Reserved,
			_ => AliasKind::Proxy,
		}
	}
}

#[derive(Debug, Clone)]
pub struct AliasRecord {
	pub domain: String,
	pub label: String,
	pub kind: AliasKind,
	pub target: String,
}

#[derive(Debug, Clone)]
pub struct VfsRow {
	pub app_id: AppId,
	pub path: String,
	pub bytes: Vec<u8>,
	pub mime: String,
	pub size: u64,
	pub content_hash: String,
	pub updated_at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct KvRow {
	pub key: String,
	pub value: Vec<u8>,
	pub mime: Option<String>,
	pub ttl_expiry: Option<Timestamp>,
}

#[derive(Debug, Clone)]
pub struct DocumentRow {
	pub doc_id: String,
	pub json: serde_json::Value,
	pub created_at: Timestamp,
	pub updated_at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct SessionRow {
	pub session_id: String,
	pub user_id: String,
	pub created_at: Timestamp,
	pub expiry: Timestamp,
	pub last_seen: Timestamp,
}

#[derive(Debug, Clone)]
pub struct ApiKeyRow {
	pub prefix: String,
	pub hash: String,
	pub owner: String,
	pub created_at: Timestamp,
	pub last_used: Option<Timestamp>,
}

#[derive(Debug, Clone)]
pub struct TrackingEvent {
	pub app_id: AppId,
	pub kind: String,
	pub path: String,
	pub referrer: Option<String>,
	pub ua: Option<String>,
	pub ts: Timestamp,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SubstrateStats {
	pub file_bytes: u64,
	pub app_count: u64,
	pub vfs_row_count: u64,
	pub kv_row_count: u64,
	pub document_row_count: u64,
	pub event_row_count: u64,
}

#[async_trait]
pub trait Substrate: Debug + Send + Sync {
	// Apps
	async fn create_app(
		&self,
		app_id: &AppId,
		name: &str,
		owner: &str,
		template: Option<&str>,
	) -> ClResult<()>;
	async fn read_app(&self, app_id: &AppId) -> ClResult<AppRecord>;
	async fn list_apps(&self) -> ClResult<Vec<AppRecord>>;
	async fn update_app(&self, app_id: &AppId, patch: &AppPatch) -> ClResult<()>;
	async fn delete_app(&self, app_id: &AppId) -> ClResult<()>;

	// Aliases
	async fn resolve_alias(&self, domain: &str, label: &str) -> ClResult<Option<AliasRecord>>;
	async fn create_alias(&self, alias: &AliasRecord) -> ClResult<()>;
	async fn delete_alias(&self, domain: &str, label: &str) -> ClResult<()>;

	// VFS (also backs the blob/S3-like namespace: shared row family)
	async fn vfs_get(&self, app_id: &AppId, path: &str) -> ClResult<Option<VfsRow>>;
	async fn vfs_put(
		&self,
		app_id: &AppId,
		path: &str,
		bytes: &[u8],
		mime: &str,
	) -> ClResult<VfsRow>;
	async fn vfs_delete(&self, app_id: &AppId, path: &str) -> ClResult<()>;
	async fn vfs_list(&self, app_id: &AppId, prefix: &str) -> ClResult<Vec<VfsRow>>;

	// KV
	async fn kv_get(&self, app_id: &AppId, key: &str) -> ClResult<Option<KvRow>>;
	async fn kv_set(
		&self,
		app_id: &AppId,
		key: &str,
		value: &[u8],
		mime: Option<&str>,
		ttl: Option<Timestamp>,
	) -> ClResult<()>;
	async fn kv_delete(&self, app_id: &AppId, key: &str) -> ClResult<()>;
	async fn kv_list(&self, app_id: &AppId, prefix: Option<&str>) -> ClResult<Vec<KvRow>>;
	async fn kv_sweep_expired(&self) -> ClResult<u64>;

	// Documents
	async fn doc_insert(
		&self,
		app_id: &AppId,
		collection: &str,
		doc_id: Option<&str>,
		json: &serde_json::Value,
	) -> ClResult<String>;
	async fn doc_find(
		&self,
		app_id: &AppId,
		collection: &str,
		query: &Query,
	) -> ClResult<Vec<DocumentRow>>;
	async fn doc_update(
		&self,
		app_id: &AppId,
		collection: &str,
		query: &Query,
		changes: &serde_json::Value,
	) -> ClResult<u64>;
	async fn doc_delete(&self, app_id: &AppId, collection: &str, query: &Query) -> ClResult<u64>;

	// Sessions
	async fn create_session(&self, session: &SessionRow) -> ClResult<()>;
	async fn read_session(&self, session_id: &str) -> ClResult<Option<SessionRow>>;
	async fn touch_session(&self, session_id: &str, new_expiry: Timestamp) -> ClResult<()>;
	async fn delete_session(&self, session_id: &str) -> ClResult<()>;

	// API keys
	async fn create_api_key(&self, key: &ApiKeyRow) -> ClResult<()>;
	async fn find_api_key(&self, prefix: &str) -> ClResult<Option<ApiKeyRow>>;
	async fn touch_api_key(&self, prefix: &str) -> ClResult<()>;
	async fn revoke_api_key(&self, prefix: &str) -> ClResult<()>;

	// Accounts (admin login)
	async fn create_account(&self, user_id: &str, password_hash: &str, admin: bool) -> ClResult<()>;
	async fn read_account(&self, user_id: &str) -> ClResult<Option<(String, bool)>>;
	/// Hashes a plaintext password off the request-handling task (bcrypt is
	/// deliberately slow).
	async fn hash_password(&self, password: String) -> ClResult<String>;
	/// Verifies a plaintext password against a stored bcrypt hash.
	async fn verify_password(&self, password: String, hash: String) -> ClResult<bool>;

	// Events
	async fn append_events(&self, events: &[TrackingEvent]) -> ClResult<()>;

	// Introspection / ops
	async fn stats(&self) -> ClResult<SubstrateStats>;
	async fn backup_to(&self, path: &std::path::Path) -> ClResult<()>;
}

// vim: ts=4
