//! Virtual filesystem rows. Also the backing store for the blob/S3-like
//! namespace and media variant cache (reserved `_media/` and `_v/` path
//! prefixes enforced by the caller, not by this module).

use sqlx::{Row, SqlitePool};

use fazt_types::prelude::*;
use fazt_types::substrate::VfsRow;
use fazt_types::utils::sha256_hex;

fn inspect(err: &sqlx::Error) {
	tracing::warn!("substrate db error: {:#?}", err);
}

fn row_to_vfs(row: sqlx::sqlite::SqliteRow) -> ClResult<VfsRow> {
	Ok(VfsRow {
		app_id: AppId::new(row.try_get::<String, _>("app_id")?),
		path: row.try_get("path")?,
		bytes: row.try_get("bytes")?,
		mime: row.try_get("mime")?,
		size: u64::try_from(row.try_get::<i64, _>("size")?).unwrap_or_default(),
		content_hash: row.try_get("content_hash")?,
		updated_at: Timestamp(row.try_get("updated_at")?),
	})
}

pub async fn vfs_get(db: &SqlitePool, app_id: &AppId, path: &str) -> ClResult<Option<VfsRow>> {
	let row = sqlx::query("SELECT * FROM vfs WHERE app_id = ? AND path = ?")
		.bind(app_id.as_str())
		.bind(path)
		.fetch_optional(db)
		.await
		.inspect_err(inspect)?;
	row.map(row_to_vfs).transpose()
}

pub async fn vfs_put(db: &SqlitePool, app_id: &AppId, path: &str, bytes: &[u8], mime: &str) -> ClResult<VfsRow> {
	let content_hash = sha256_hex(bytes);
	let size = i64::try_from(bytes.len()).unwrap_or(i64::MAX);
	sqlx::query(
		"INSERT INTO vfs (app_id, path, bytes, mime, size, content_hash, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, unixepoch())
			ON CONFLICT(app_id, path) DO UPDATE SET
				bytes=excluded.bytes, mime=excluded.mime, size=excluded.size,
				content_hash=excluded.content_hash, updated_at=excluded.updated_at",
	)
	.bind(app_id.as_str())
	.bind(path)
	.bind(bytes)
	.bind(mime)
	.bind(size)
	.bind(&content_hash)
	.execute(db)
	.await
	.inspect_err(inspect)?;

	vfs_get(db, app_id, path).await?.ok_or(Error::Internal("vfs row vanished after write".into()))
}

pub async fn vfs_delete(db: &SqlitePool, app_id: &AppId, path: &str) -> ClResult<()> {
	let res = sqlx::query("DELETE FROM vfs WHERE app_id = ? AND path = ?")
		.bind(app_id.as_str())
		.bind(path)
		.execute(db)
		.await
		.inspect_err(inspect)?;
	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}
	Ok(())
}

pub async fn vfs_list(db: &SqlitePool, app_id: &AppId, prefix: &str) -> ClResult<Vec<VfsRow>> {
	let like_pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
	let rows = sqlx::query("SELECT * FROM vfs WHERE app_id = ? AND path LIKE ? ESCAPE '\\' ORDER BY path")
		.bind(app_id.as_str())
		.bind(like_pattern)
		.fetch_all(db)
		.await
		.inspect_err(inspect)?;
	rows.into_iter().map(row_to_vfs).collect()
}

// vim: ts=4
