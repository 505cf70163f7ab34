//! App-Scoped Storage (§4.4): the one object every handler and executor
//! invocation gets instead of a raw `Substrate` handle. `app_id` (and
//! optionally `user_id`) are fixed at construction and never taken from a
//! request parameter again, which is what gives the three namespaces their
//! tenancy guarantee — the filter lives at the binding boundary, not in
//! handler code, per the RLS placement rule.

use std::sync::Arc;
use std::time::Duration;

use fazt_types::prelude::*;
use fazt_types::query::Query;
use fazt_types::substrate::{DocumentRow, KvRow, Substrate, VfsRow};

use crate::queue::{WriteQueue, DEFAULT_BUDGET};

#[derive(Clone)]
pub struct ScopedStore {
	app_id: AppId,
	user_id: Option<Box<str>>,
	substrate: Arc<dyn Substrate>,
	write_queue: Arc<WriteQueue>,
}

impl ScopedStore {
	pub fn new(
		app_id: AppId,
		user_id: Option<Box<str>>,
		substrate: Arc<dyn Substrate>,
		write_queue: Arc<WriteQueue>,
	) -> Self {
		Self { app_id, user_id, substrate, write_queue }
	}

	pub fn app_id(&self) -> &AppId {
		&self.app_id
	}

	pub fn user_id(&self) -> Option<&str> {
		self.user_id.as_deref()
	}

	// --- KV ------------------------------------------------------------

	pub async fn kv_get(&self, key: &str) -> ClResult<Option<KvRow>> {
		self.substrate.kv_get(&self.app_id, key).await
	}

	pub async fn kv_list(&self, prefix: Option<&str>) -> ClResult<Vec<KvRow>> {
		self.substrate.kv_list(&self.app_id, prefix).await
	}

	pub async fn kv_set(&self, key: &str, value: Vec<u8>, mime: Option<String>, ttl: Option<Timestamp>) -> ClResult<()> {
		let app_id = self.app_id.clone();
		let key = key.to_string();
		self
			.write_queue
			.submit(self.substrate.clone(), DEFAULT_BUDGET, move |s| async move {
				s.kv_set(&app_id, &key, &value, mime.as_deref(), ttl).await
			})
			.await
	}

	pub async fn kv_delete(&self, key: &str) -> ClResult<()> {
		let app_id = self.app_id.clone();
		let key = key.to_string();
		self
			.write_queue
			.submit(self.substrate.clone(), DEFAULT_BUDGET, move |s| async move { s.kv_delete(&app_id, &key).await })
			.await
	}

	// --- Documents -------------------------------------------------------

	pub async fn ds_find(&self, collection: &str, query: &Query) -> ClResult<Vec<DocumentRow>> {
		self.substrate.doc_find(&self.app_id, collection, query).await
	}

	pub async fn ds_insert(&self, collection: &str, doc_id: Option<String>, json: serde_json::Value) -> ClResult<String> {
		let app_id = self.app_id.clone();
		let collection = collection.to_string();
		self
			.write_queue
			.submit(self.substrate.clone(), DEFAULT_BUDGET, move |s| async move {
				s.doc_insert(&app_id, &collection, doc_id.as_deref(), &json).await
			})
			.await
	}

	pub async fn ds_update(&self, collection: &str, query: Query, changes: serde_json::Value) -> ClResult<u64> {
		let app_id = self.app_id.clone();
		let collection = collection.to_string();
		self
			.write_queue
			.submit(self.substrate.clone(), DEFAULT_BUDGET, move |s| async move {
				s.doc_update(&app_id, &collection, &query, &changes).await
			})
			.await
	}

	pub async fn ds_delete(&self, collection: &str, query: Query) -> ClResult<u64> {
		let app_id = self.app_id.clone();
		let collection = collection.to_string();
		self
			.write_queue
			.submit(self.substrate.clone(), DEFAULT_BUDGET, move |s| async move {
				s.doc_delete(&app_id, &collection, &query).await
			})
			.await
	}

	// --- Blob / S3-like --------------------------------------------------
	// Backed by the vfs table (§3): reserved prefixes `_media/` and `_v/`
	// flow through the same put/get/delete/list as ordinary app assets.

	pub async fn s3_get(&self, key: &str) -> ClResult<Option<VfsRow>> {
		self.substrate.vfs_get(&self.app_id, key).await
	}

	pub async fn s3_list(&self, prefix: &str) -> ClResult<Vec<VfsRow>> {
		self.substrate.vfs_list(&self.app_id, prefix).await
	}

	pub async fn s3_put(&self, key: &str, bytes: Vec<u8>, mime: String) -> ClResult<VfsRow> {
		let app_id = self.app_id.clone();
		let key = key.to_string();
		self
			.write_queue
			.submit(self.substrate.clone(), DEFAULT_BUDGET, move |s| async move {
				s.vfs_put(&app_id, &key, &bytes, &mime).await
			})
			.await
	}

	pub async fn s3_put_with_budget(&self, key: &str, bytes: Vec<u8>, mime: String, budget: Duration) -> ClResult<VfsRow> {
		let app_id = self.app_id.clone();
		let key = key.to_string();
		self
			.write_queue
			.submit(self.substrate.clone(), budget, move |s| async move { s.vfs_put(&app_id, &key, &bytes, &mime).await })
			.await
	}

	pub async fn s3_delete(&self, key: &str) -> ClResult<()> {
		let app_id = self.app_id.clone();
		let key = key.to_string();
		self
			.write_queue
			.submit(self.substrate.clone(), DEFAULT_BUDGET, move |s| async move { s.vfs_delete(&app_id, &key).await })
			.await
	}
}

// vim: ts=4
