//! App registry and domain alias CRUD.

use sqlx::{Row, SqlitePool};

use fazt_types::prelude::*;
use fazt_types::substrate::{AliasKind, AliasRecord, AppPatch, AppRecord, AppState};
use fazt_types::types::Patch;

fn inspect(err: &sqlx::Error) {
	tracing::warn!("substrate db error: {:#?}", err);
}

pub async fn create_app(
	db: &SqlitePool,
	app_id: &AppId,
	name: &str,
	owner: &str,
	template: Option<&str>,
) -> ClResult<()> {
	sqlx::query(
		"INSERT INTO apps (app_id, name, owner, state, template, spa) VALUES (?, ?, ?, 'active', ?, 0)",
	)
	.bind(app_id.as_str())
	.bind(name)
	.bind(owner)
	.bind(template)
	.execute(db)
	.await
	.inspect_err(inspect)?;
	Ok(())
}

fn row_to_app(row: sqlx::sqlite::SqliteRow) -> ClResult<AppRecord> {
	let state: String = row.try_get("state")?;
	Ok(AppRecord {
		app_id: AppId::new(row.try_get::<String, _>("app_id")?),
		name: row.try_get("name")?,
		owner: row.try_get("owner")?,
		state: AppState::parse(&state),
		template: row.try_get("template")?,
		spa: row.try_get("spa")?,
		created_at: Timestamp(row.try_get("created_at")?),
	})
}

pub async fn read_app(db: &SqlitePool, app_id: &AppId) -> ClResult<AppRecord> {
	let row = sqlx::query("SELECT * FROM apps WHERE app_id = ?")
		.bind(app_id.as_str())
		.fetch_optional(db)
		.await
		.inspect_err(inspect)?
		.ok_or(Error::NotFound)?;
	row_to_app(row)
}

pub async fn list_apps(db: &SqlitePool) -> ClResult<Vec<AppRecord>> {
	let rows = sqlx::query("SELECT * FROM apps ORDER BY created_at").fetch_all(db).await.inspect_err(inspect)?;
	rows.into_iter().map(row_to_app).collect()
}

pub async fn update_app(db: &SqlitePool, app_id: &AppId, patch: &AppPatch) -> ClResult<()> {
	let mut query = sqlx::QueryBuilder::new("UPDATE apps SET ");
	let mut has_updates = false;

	if let Patch::Value(name) = &patch.name {
		query.push("name=").push_bind(name.clone());
		has_updates = true;
	}
	if let Patch::Value(state) = &patch.state {
		if has_updates {
			query.push(", ");
		}
		query.push("state=").push_bind(state.clone());
		has_updates = true;
	}
	if let Patch::Value(spa) = &patch.spa {
		if has_updates {
			query.push(", ");
		}
		query.push("spa=").push_bind(*spa);
		has_updates = true;
	}

	if !has_updates {
		return Ok(());
	}

	query.push(" WHERE app_id=").push_bind(app_id.as_str());
	let res = query.build().execute(db).await.inspect_err(inspect)?;
	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}
	Ok(())
}

pub async fn delete_app(db: &SqlitePool, app_id: &AppId) -> ClResult<()> {
	let mut tx = db.begin().await.inspect_err(inspect)?;
	for table in ["vfs", "kv", "documents", "events"] {
		sqlx::query(&format!("DELETE FROM {table} WHERE app_id = ?"))
			.bind(app_id.as_str())
			.execute(&mut *tx)
			.await
			.inspect_err(inspect)?;
	}
	let res = sqlx::query("DELETE FROM apps WHERE app_id = ?")
		.bind(app_id.as_str())
		.execute(&mut *tx)
		.await
		.inspect_err(inspect)?;
	tx.commit().await.inspect_err(inspect)?;
	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}
	Ok(())
}

pub async fn resolve_alias(db: &SqlitePool, domain: &str, label: &str) -> ClResult<Option<AliasRecord>> {
	let row = sqlx::query("SELECT domain, label, kind, target FROM aliases WHERE domain = ? AND label = ?")
		.bind(domain)
		.bind(label)
		.fetch_optional(db)
		.await
		.inspect_err(inspect)?;
	match row {
		None => Ok(None),
		Some(row) => {
			let kind: String = row.try_get("kind")?;
			Ok(Some(AliasRecord {
				domain: row.try_get("domain")?,
				label: row.try_get("label")?,
				kind: AliasKind::parse(&kind),
				target: row.try_get("target")?,
			}))
		}
	}
}

pub async fn create_alias(db: &SqlitePool, alias: &AliasRecord) -> ClResult<()> {
	sqlx::query(
		"INSERT INTO aliases (domain, label, kind, target) VALUES (?, ?, ?, ?)
			ON CONFLICT(domain, label) DO UPDATE SET kind=excluded.kind, target=excluded.target",
	)
	.bind(&alias.domain)
	.bind(&alias.label)
	.bind(alias.kind.as_str())
	.bind(&alias.target)
	.execute(db)
	.await
	.inspect_err(inspect)?;
	Ok(())
}

pub async fn delete_alias(db: &SqlitePool, domain: &str, label: &str) -> ClResult<()> {
	let res = sqlx::query("DELETE FROM aliases WHERE domain = ? AND label = ?")
		.bind(domain)
		.bind(label)
		.execute(db)
		.await
		.inspect_err(inspect)?;
	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}
	Ok(())
}

// vim: ts=4
