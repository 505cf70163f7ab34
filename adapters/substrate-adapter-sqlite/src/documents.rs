//! Per-app document collections. Rows are opaque JSON blobs; the closed
//! query grammar (`Query::matches`) is evaluated in-process rather than
//! compiled to SQL, since it only needs to cover equality/`$gt`/`$lt`/`$in`.

use sqlx::{Row, SqlitePool};

use fazt_types::prelude::*;
use fazt_types::query::Query;
use fazt_types::substrate::DocumentRow;
use fazt_types::utils::random_id;

fn inspect(err: &sqlx::Error) {
	tracing::warn!("substrate db error: {:#?}", err);
}

pub async fn doc_insert(
	db: &SqlitePool,
	app_id: &AppId,
	collection: &str,
	doc_id: Option<&str>,
	json: &serde_json::Value,
) -> ClResult<String> {
	let doc_id = doc_id.map(ToOwned::to_owned).unwrap_or_else(random_id);
	let body = serde_json::to_string(json)?;
	sqlx::query(
		"INSERT INTO documents (app_id, collection, doc_id, json) VALUES (?, ?, ?, ?)
			ON CONFLICT(app_id, collection, doc_id) DO UPDATE SET json=excluded.json, updated_at=unixepoch()",
	)
	.bind(app_id.as_str())
	.bind(collection)
	.bind(&doc_id)
	.bind(body)
	.execute(db)
	.await
	.inspect_err(inspect)?;
	Ok(doc_id)
}

async fn scan_collection(
	db: &SqlitePool,
	app_id: &AppId,
	collection: &str,
) -> ClResult<Vec<(String, DocumentRow)>> {
	let rows = sqlx::query("SELECT doc_id, json, created_at, updated_at FROM documents WHERE app_id = ? AND collection = ?")
		.bind(app_id.as_str())
		.bind(collection)
		.fetch_all(db)
		.await
		.inspect_err(inspect)?;

	rows
		.into_iter()
		.map(|row| {
			let doc_id: String = row.try_get("doc_id")?;
			let body: String = row.try_get("json")?;
			let json = serde_json::from_str(&body)?;
			Ok((
				doc_id.clone(),
				DocumentRow {
					doc_id,
					json,
					created_at: Timestamp(row.try_get("created_at")?),
					updated_at: Timestamp(row.try_get("updated_at")?),
				},
			))
		})
		.collect()
}

pub async fn doc_find(db: &SqlitePool, app_id: &AppId, collection: &str, query: &Query) -> ClResult<Vec<DocumentRow>> {
	let docs = scan_collection(db, app_id, collection).await?;
	Ok(docs.into_iter().filter(|(_, doc)| query.matches(&doc.json)).map(|(_, doc)| doc).collect())
}

pub async fn doc_update(
	db: &SqlitePool,
	app_id: &AppId,
	collection: &str,
	query: &Query,
	changes: &serde_json::Value,
) -> ClResult<u64> {
	let Some(patch) = changes.as_object() else {
		return Err(Error::ValidationFailed("document update payload must be an object".into()));
	};

	let docs = scan_collection(db, app_id, collection).await?;
	let matching: Vec<_> = docs.into_iter().filter(|(_, doc)| query.matches(&doc.json)).collect();

	let mut tx = db.begin().await.inspect_err(inspect)?;
	for (doc_id, mut doc) in matching.iter().cloned() {
		let Some(obj) = doc.json.as_object_mut() else { continue };
		for (k, v) in patch {
			obj.insert(k.clone(), v.clone());
		}
		let body = serde_json::to_string(&doc.json)?;
		sqlx::query("UPDATE documents SET json = ?, updated_at = unixepoch() WHERE app_id = ? AND collection = ? AND doc_id = ?")
			.bind(body)
			.bind(app_id.as_str())
			.bind(collection)
			.bind(&doc_id)
			.execute(&mut *tx)
			.await
			.inspect_err(inspect)?;
	}
	tx.commit().await.inspect_err(inspect)?;

	Ok(matching.len() as u64)
}

pub async fn doc_delete(db: &SqlitePool, app_id: &AppId, collection: &str, query: &Query) -> ClResult<u64> {
	let docs = scan_collection(db, app_id, collection).await?;
	let matching: Vec<_> = docs.into_iter().filter(|(_, doc)| query.matches(&doc.json)).map(|(id, _)| id).collect();

	let mut tx = db.begin().await.inspect_err(inspect)?;
	for doc_id in &matching {
		sqlx::query("DELETE FROM documents WHERE app_id = ? AND collection = ? AND doc_id = ?")
			.bind(app_id.as_str())
			.bind(collection)
			.bind(doc_id)
			.execute(&mut *tx)
			.await
			.inspect_err(inspect)?;
	}
	tx.commit().await.inspect_err(inspect)?;

	Ok(matching.len() as u64)
}

// vim: ts=4
