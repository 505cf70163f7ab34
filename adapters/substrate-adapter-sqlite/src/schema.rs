//! Schema initialization for the single `data.db` file. One table family per
//! durable namespace the substrate trait exposes; VFS also backs blob/S3-like
//! storage (reserved `_media/` and `_v/` path prefixes, not a separate table).

use sqlx::SqlitePool;

pub(crate) async fn init_db(db: &SqlitePool) -> Result<(), sqlx::Error> {
	let mut tx = db.begin().await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS apps (
			app_id text NOT NULL,
			name text NOT NULL,
			owner text NOT NULL,
			state char(8) NOT NULL DEFAULT 'active',
			template text,
			spa boolean NOT NULL DEFAULT 0,
			created_at integer NOT NULL DEFAULT (unixepoch()),
			PRIMARY KEY(app_id)
		)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS aliases (
			domain text NOT NULL,
			label text NOT NULL,
			kind char(8) NOT NULL,
			target text NOT NULL,
			PRIMARY KEY(domain, label)
		)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS vfs (
			app_id text NOT NULL,
			path text NOT NULL,
			bytes blob NOT NULL,
			mime text NOT NULL,
			size integer NOT NULL,
			content_hash text NOT NULL,
			updated_at integer NOT NULL DEFAULT (unixepoch()),
			PRIMARY KEY(app_id, path)
		)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_vfs_app_prefix ON vfs(app_id, path)")
		.execute(&mut *tx)
		.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS kv (
			app_id text NOT NULL,
			key text NOT NULL,
			value blob NOT NULL,
			mime text,
			ttl_expiry integer,
			PRIMARY KEY(app_id, key)
		)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_kv_ttl ON kv(ttl_expiry) WHERE ttl_expiry IS NOT NULL")
		.execute(&mut *tx)
		.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS documents (
			app_id text NOT NULL,
			collection text NOT NULL,
			doc_id text NOT NULL,
			json text NOT NULL,
			created_at integer NOT NULL DEFAULT (unixepoch()),
			updated_at integer NOT NULL DEFAULT (unixepoch()),
			PRIMARY KEY(app_id, collection, doc_id)
		)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS sessions (
			session_id text NOT NULL,
			user_id text NOT NULL,
			created_at integer NOT NULL DEFAULT (unixepoch()),
			expiry integer NOT NULL,
			last_seen integer NOT NULL DEFAULT (unixepoch()),
			PRIMARY KEY(session_id)
		)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_expiry ON sessions(expiry)")
		.execute(&mut *tx)
		.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS api_keys (
			prefix text NOT NULL,
			hash text NOT NULL,
			owner text NOT NULL,
			created_at integer NOT NULL DEFAULT (unixepoch()),
			last_used integer,
			PRIMARY KEY(prefix)
		)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS accounts (
			user_id text NOT NULL,
			password_hash text NOT NULL,
			admin boolean NOT NULL DEFAULT 0,
			created_at integer NOT NULL DEFAULT (unixepoch()),
			PRIMARY KEY(user_id)
		)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS events (
			e_id integer PRIMARY KEY AUTOINCREMENT,
			app_id text NOT NULL,
			kind text NOT NULL,
			path text NOT NULL,
			referrer text,
			ua text,
			ts integer NOT NULL
		)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_app_ts ON events(app_id, ts)")
		.execute(&mut *tx)
		.await?;

	tx.commit().await?;

	Ok(())
}

// vim: ts=4
