//! Password hashing and API-key generation, run on the worker pool so bcrypt
//! never blocks the tokio reactor.

use fazt_core::WorkerPool;
use fazt_types::prelude::*;
use fazt_types::utils::random_id;

const BCRYPT_COST: u32 = 10;
pub const API_KEY_PREFIX: &str = "fzt_";

fn hash_password_sync(password: String) -> ClResult<String> {
	bcrypt::hash(password, BCRYPT_COST).map_err(|e| Error::Internal(format!("bcrypt hash failed: {e}")))
}

pub async fn hash_password(worker: &WorkerPool, password: String) -> ClResult<String> {
	worker.try_run(move || hash_password_sync(password)).await
}

fn verify_password_sync(password: String, hash: String) -> ClResult<bool> {
	bcrypt::verify(password, &hash).map_err(|e| Error::Internal(format!("bcrypt verify failed: {e}")))
}

pub async fn verify_password(worker: &WorkerPool, password: String, hash: String) -> ClResult<bool> {
	worker.try_run(move || verify_password_sync(password, hash)).await
}

/// Generate a new API key: `(plaintext, prefix, sha256_hash)`. The prefix is
/// stored unhashed for O(1) lookup; the remainder is hashed, since the key
/// itself already carries enough entropy that a fast hash is sufficient
/// (unlike a user-chosen password).
pub fn generate_api_key() -> (String, String) {
	let body = random_id();
	let plaintext = format!("{API_KEY_PREFIX}{body}");
	let prefix = plaintext.chars().take(API_KEY_PREFIX.len() + 8).collect();
	(plaintext, prefix)
}

pub fn hash_api_key(key: &str) -> String {
	fazt_types::utils::sha256_hex(key.as_bytes())
}

// vim: ts=4
