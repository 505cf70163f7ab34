//! Session, API-key, and admin-account CRUD.

use sqlx::{Row, SqlitePool};

use fazt_types::prelude::*;
use fazt_types::substrate::{ApiKeyRow, SessionRow};

fn inspect(err: &sqlx::Error) {
	tracing::warn!("substrate db error: {:#?}", err);
}

pub async fn create_session(db: &SqlitePool, session: &SessionRow) -> ClResult<()> {
	sqlx::query(
		"INSERT INTO sessions (session_id, user_id, created_at, expiry, last_seen) VALUES (?, ?, ?, ?, ?)",
	)
	.bind(&session.session_id)
	.bind(&session.user_id)
	.bind(session.created_at.0)
	.bind(session.expiry.0)
	.bind(session.last_seen.0)
	.execute(db)
	.await
	.inspect_err(inspect)?;
	Ok(())
}

pub async fn read_session(db: &SqlitePool, session_id: &str) -> ClResult<Option<SessionRow>> {
	let row = sqlx::query("SELECT * FROM sessions WHERE session_id = ?")
		.bind(session_id)
		.fetch_optional(db)
		.await
		.inspect_err(inspect)?;
	let Some(row) = row else { return Ok(None) };
	let session = SessionRow {
		session_id: row.try_get("session_id")?,
		user_id: row.try_get("user_id")?,
		created_at: Timestamp(row.try_get("created_at")?),
		expiry: Timestamp(row.try_get("expiry")?),
		last_seen: Timestamp(row.try_get("last_seen")?),
	};
	if session.expiry.is_past() {
		delete_session(db, session_id).await?;
		return Ok(None);
	}
	Ok(Some(session))
}

pub async fn touch_session(db: &SqlitePool, session_id: &str, new_expiry: Timestamp) -> ClResult<()> {
	let res = sqlx::query("UPDATE sessions SET expiry = ?, last_seen = unixepoch() WHERE session_id = ?")
		.bind(new_expiry.0)
		.bind(session_id)
		.execute(db)
		.await
		.inspect_err(inspect)?;
	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}
	Ok(())
}

pub async fn delete_session(db: &SqlitePool, session_id: &str) -> ClResult<()> {
	sqlx::query("DELETE FROM sessions WHERE session_id = ?").bind(session_id).execute(db).await.inspect_err(inspect)?;
	Ok(())
}

pub async fn create_api_key(db: &SqlitePool, key: &ApiKeyRow) -> ClResult<()> {
	sqlx::query("INSERT INTO api_keys (prefix, hash, owner, created_at, last_used) VALUES (?, ?, ?, ?, ?)")
		.bind(&key.prefix)
		.bind(&key.hash)
		.bind(&key.owner)
		.bind(key.created_at.0)
		.bind(key.last_used.map(|t| t.0))
		.execute(db)
		.await
		.inspect_err(inspect)?;
	Ok(())
}

pub async fn find_api_key(db: &SqlitePool, prefix: &str) -> ClResult<Option<ApiKeyRow>> {
	let row = sqlx::query("SELECT * FROM api_keys WHERE prefix = ?")
		.bind(prefix)
		.fetch_optional(db)
		.await
		.inspect_err(inspect)?;
	match row {
		None => Ok(None),
		Some(row) => Ok(Some(ApiKeyRow {
			prefix: row.try_get("prefix")?,
			hash: row.try_get("hash")?,
			owner: row.try_get("owner")?,
			created_at: Timestamp(row.try_get("created_at")?),
			last_used: row.try_get::<Option<i64>, _>("last_used")?.map(Timestamp),
		})),
	}
}

pub async fn touch_api_key(db: &SqlitePool, prefix: &str) -> ClResult<()> {
	sqlx::query("UPDATE api_keys SET last_used = unixepoch() WHERE prefix = ?")
		.bind(prefix)
		.execute(db)
		.await
		.inspect_err(inspect)?;
	Ok(())
}

pub async fn revoke_api_key(db: &SqlitePool, prefix: &str) -> ClResult<()> {
	let res = sqlx::query("DELETE FROM api_keys WHERE prefix = ?").bind(prefix).execute(db).await.inspect_err(inspect)?;
	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}
	Ok(())
}

pub async fn create_account(db: &SqlitePool, user_id: &str, password_hash: &str, admin: bool) -> ClResult<()> {
	sqlx::query(
		"INSERT INTO accounts (user_id, password_hash, admin) VALUES (?, ?, ?)
			ON CONFLICT(user_id) DO UPDATE SET password_hash=excluded.password_hash, admin=excluded.admin",
	)
	.bind(user_id)
	.bind(password_hash)
	.bind(admin)
	.execute(db)
	.await
	.inspect_err(inspect)?;
	Ok(())
}

pub async fn read_account(db: &SqlitePool, user_id: &str) -> ClResult<Option<(String, bool)>> {
	let row = sqlx::query("SELECT password_hash, admin FROM accounts WHERE user_id = ?")
		.bind(user_id)
		.fetch_optional(db)
		.await
		.inspect_err(inspect)?;
	match row {
		None => Ok(None),
		Some(row) => Ok(Some((row.try_get("password_hash")?, row.try_get("admin")?))),
	}
}

// vim: ts=4
