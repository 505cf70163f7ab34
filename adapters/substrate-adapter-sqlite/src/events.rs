//! Analytics event buffer flush, introspection stats, and hot backup.

use sqlx::{Row, SqlitePool};
use std::path::Path;

use fazt_types::prelude::*;
use fazt_types::substrate::{SubstrateStats, TrackingEvent};

fn inspect(err: &sqlx::Error) {
	tracing::warn!("substrate db error: {:#?}", err);
}

/// Batched insert: the analytics buffer accumulates events in memory and
/// flushes them here on a scheduler tick, so this runs once per flush rather
/// than once per pageview.
pub async fn append_events(db: &SqlitePool, events: &[TrackingEvent]) -> ClResult<()> {
	if events.is_empty() {
		return Ok(());
	}
	let mut tx = db.begin().await.inspect_err(inspect)?;
	for event in events {
		sqlx::query("INSERT INTO events (app_id, kind, path, referrer, ua, ts) VALUES (?, ?, ?, ?, ?, ?)")
			.bind(event.app_id.as_str())
			.bind(&event.kind)
			.bind(&event.path)
			.bind(&event.referrer)
			.bind(&event.ua)
			.bind(event.ts.0)
			.execute(&mut *tx)
			.await
			.inspect_err(inspect)?;
	}
	tx.commit().await.inspect_err(inspect)?;
	Ok(())
}

pub async fn stats(db: &SqlitePool) -> ClResult<SubstrateStats> {
	let row = sqlx::query(
		"SELECT
			(SELECT COUNT(*) FROM apps) AS app_count,
			(SELECT COUNT(*) FROM vfs) AS vfs_row_count,
			(SELECT COALESCE(SUM(size), 0) FROM vfs) AS file_bytes,
			(SELECT COUNT(*) FROM kv) AS kv_row_count,
			(SELECT COUNT(*) FROM documents) AS document_row_count,
			(SELECT COUNT(*) FROM events) AS event_row_count",
	)
	.fetch_one(db)
	.await
	.inspect_err(inspect)?;

	Ok(SubstrateStats {
		file_bytes: u64::try_from(row.try_get::<i64, _>("file_bytes")?).unwrap_or_default(),
		app_count: u64::try_from(row.try_get::<i64, _>("app_count")?).unwrap_or_default(),
		vfs_row_count: u64::try_from(row.try_get::<i64, _>("vfs_row_count")?).unwrap_or_default(),
		kv_row_count: u64::try_from(row.try_get::<i64, _>("kv_row_count")?).unwrap_or_default(),
		document_row_count: u64::try_from(row.try_get::<i64, _>("document_row_count")?).unwrap_or_default(),
		event_row_count: u64::try_from(row.try_get::<i64, _>("event_row_count")?).unwrap_or_default(),
	})
}

/// Online backup via SQLite's `VACUUM INTO`, consistent without blocking
/// writers for longer than the copy itself takes.
pub async fn backup_to(db: &SqlitePool, path: &Path) -> ClResult<()> {
	let target = path.to_string_lossy().into_owned();
	sqlx::query("VACUUM INTO ?").bind(target).execute(db).await.inspect_err(inspect)?;
	Ok(())
}

// vim: ts=4
