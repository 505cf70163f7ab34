//! App-scoped key/value store with lazy + periodic TTL expiry.

use sqlx::{Row, SqlitePool};

use fazt_types::prelude::*;
use fazt_types::substrate::KvRow;

fn inspect(err: &sqlx::Error) {
	tracing::warn!("substrate db error: {:#?}", err);
}

fn row_to_kv(row: sqlx::sqlite::SqliteRow) -> ClResult<KvRow> {
	Ok(KvRow {
		key: row.try_get("key")?,
		value: row.try_get("value")?,
		mime: row.try_get("mime")?,
		ttl_expiry: row.try_get::<Option<i64>, _>("ttl_expiry")?.map(Timestamp),
	})
}

/// Lazy expiry: a read past the TTL deletes the row and reports it as absent,
/// rather than relying solely on the periodic sweep task.
pub async fn kv_get(db: &SqlitePool, app_id: &AppId, key: &str) -> ClResult<Option<KvRow>> {
	let row = sqlx::query("SELECT * FROM kv WHERE app_id = ? AND key = ?")
		.bind(app_id.as_str())
		.bind(key)
		.fetch_optional(db)
		.await
		.inspect_err(inspect)?;
	let Some(row) = row else { return Ok(None) };
	let kv = row_to_kv(row)?;
	if kv.ttl_expiry.is_some_and(|t| t.is_past()) {
		kv_delete(db, app_id, key).await?;
		return Ok(None);
	}
	Ok(Some(kv))
}

pub async fn kv_set(
	db: &SqlitePool,
	app_id: &AppId,
	key: &str,
	value: &[u8],
	mime: Option<&str>,
	ttl: Option<Timestamp>,
) -> ClResult<()> {
	sqlx::query(
		"INSERT INTO kv (app_id, key, value, mime, ttl_expiry) VALUES (?, ?, ?, ?, ?)
			ON CONFLICT(app_id, key) DO UPDATE SET value=excluded.value, mime=excluded.mime, ttl_expiry=excluded.ttl_expiry",
	)
	.bind(app_id.as_str())
	.bind(key)
	.bind(value)
	.bind(mime)
	.bind(ttl.map(|t| t.0))
	.execute(db)
	.await
	.inspect_err(inspect)?;
	Ok(())
}

pub async fn kv_delete(db: &SqlitePool, app_id: &AppId, key: &str) -> ClResult<()> {
	sqlx::query("DELETE FROM kv WHERE app_id = ? AND key = ?")
		.bind(app_id.as_str())
		.bind(key)
		.execute(db)
		.await
		.inspect_err(inspect)?;
	Ok(())
}

pub async fn kv_list(db: &SqlitePool, app_id: &AppId, prefix: Option<&str>) -> ClResult<Vec<KvRow>> {
	let rows = match prefix {
		Some(prefix) => {
			let like_pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
			sqlx::query("SELECT * FROM kv WHERE app_id = ? AND key LIKE ? ESCAPE '\\' ORDER BY key")
				.bind(app_id.as_str())
				.bind(like_pattern)
				.fetch_all(db)
				.await
		}
		None => {
			sqlx::query("SELECT * FROM kv WHERE app_id = ? ORDER BY key").bind(app_id.as_str()).fetch_all(db).await
		}
	}
	.inspect_err(inspect)?;

	let now = Timestamp::now();
	rows
		.into_iter()
		.map(row_to_kv)
		.collect::<ClResult<Vec<_>>>()
		.map(|kvs| kvs.into_iter().filter(|kv| kv.ttl_expiry.is_none_or(|t| t >= now)).collect())
}

/// Periodic sweep: delete every row past its TTL, across all apps. Returns
/// the number of rows removed for the scheduler's log line.
pub async fn kv_sweep_expired(db: &SqlitePool) -> ClResult<u64> {
	let res = sqlx::query("DELETE FROM kv WHERE ttl_expiry IS NOT NULL AND ttl_expiry < unixepoch()")
		.execute(db)
		.await
		.inspect_err(inspect)?;
	Ok(res.rows_affected())
}

// vim: ts=4
