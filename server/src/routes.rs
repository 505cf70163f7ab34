//! The two routers the shared HTTPS listener dispatches between: the
//! `/_fazt/*` admin/system/auth API (same across every hosted domain) and
//! the per-app router (static VFS serving with on-the-fly image derivatives
//! and SPA fallback, the app-scoped storage surface, and `/api/*` dispatch
//! to the app's own serverless handler).

use std::collections::HashMap;

use axum::{
	body::{to_bytes, Body},
	extract::{Path as AxumPath, State},
	http::{header, StatusCode},
	middleware,
	response::{IntoResponse, Response},
	routing::{delete, get, post},
	Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::cache::cached_vfs_get;
use crate::core::extract::{IdTag, OptionalAuth};
use crate::core::middleware::{check_safe_path, optional_auth, require_admin, require_auth};
use crate::executor::{ExecutorLimits, RequestContext};
use crate::media;
use crate::prelude::*;
use crate::storage::ScopedStore;
use fazt_types::substrate::{SessionRow, TrackingEvent};
use fazt_types::utils::random_id;

const HANDLER_SCRIPT_PATH: &str = "_fn/api.js";
const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

// --- System / health -------------------------------------------------------

#[derive(Serialize)]
struct HealthBody {
	status: &'static str,
}

async fn get_health() -> Json<HealthBody> {
	Json(HealthBody { status: "ok" })
}

#[derive(Serialize)]
struct SystemStats {
	#[serde(flatten)]
	substrate: fazt_types::substrate::SubstrateStats,
	write_queue_depth: usize,
	vfs_cache_bytes: usize,
	vfs_cache_budget_bytes: usize,
	vfs_cache_hit_ratio: f64,
	analytics_buffered: usize,
	analytics_dropped: u64,
}

async fn get_stats(State(app): State<App>) -> ClResult<impl IntoResponse> {
	let substrate = app.substrate.stats().await?;
	Ok(Json(SystemStats {
		substrate,
		write_queue_depth: app.write_queue.depth(),
		vfs_cache_bytes: app.vfs_cache.current_weight(),
		vfs_cache_budget_bytes: app.vfs_cache.budget(),
		vfs_cache_hit_ratio: app.vfs_cache.hit_ratio(),
		analytics_buffered: app.analytics.len(),
		analytics_dropped: app.analytics.dropped(),
	}))
}

// --- Auth --------------------------------------------------------------

#[derive(Deserialize)]
struct LoginBody {
	user_id: String,
	password: String,
}

#[derive(Serialize)]
struct LoginRes {
	token: String,
}

async fn post_login(State(app): State<App>, Json(body): Json<LoginBody>) -> ClResult<impl IntoResponse> {
	let (hash, _admin) = app.substrate.read_account(&body.user_id).await?.ok_or(Error::InvalidCredentials)?;
	if !app.substrate.verify_password(body.password, hash).await? {
		return Err(Error::InvalidCredentials);
	}
	let token = random_id();
	let now = Timestamp::now();
	let session = SessionRow { session_id: token.clone(), user_id: body.user_id, created_at: now, expiry: now.add_seconds(3600), last_seen: now };
	app.write_queue.run(app.substrate.clone(), move |s| async move { s.create_session(&session).await }).await?;
	Ok(Json(LoginRes { token }))
}

async fn post_logout(State(app): State<App>, headers: axum::http::HeaderMap) -> ClResult<impl IntoResponse> {
	if let Some(token) = headers.get(header::AUTHORIZATION).and_then(|h| h.to_str().ok()) {
		if let Some(token) = token.strip_prefix("Bearer ").map(str::trim) {
			let token = token.to_string();
			app.write_queue.run(app.substrate.clone(), move |s| async move { s.delete_session(&token).await }).await?;
		}
	}
	Ok(StatusCode::NO_CONTENT)
}

// --- Admin: app management -----------------------------------------------

#[derive(Deserialize)]
struct CreateAppBody {
	app_id: String,
	name: String,
	owner: String,
	template: Option<String>,
}

async fn get_apps(State(app): State<App>) -> ClResult<impl IntoResponse> {
	Ok(Json(app.substrate.list_apps().await?))
}

async fn post_apps(State(app): State<App>, Json(body): Json<CreateAppBody>) -> ClResult<impl IntoResponse> {
	let app_id = AppId::new(body.app_id);
	app
		.write_queue
		.run(app.substrate.clone(), move |s| async move {
			s.create_app(&app_id, &body.name, &body.owner, body.template.as_deref()).await
		})
		.await?;
	Ok(StatusCode::CREATED)
}

async fn delete_app(State(app): State<App>, AxumPath(app_id): AxumPath<String>) -> ClResult<impl IntoResponse> {
	let app_id = AppId::new(app_id);
	app.write_queue.run(app.substrate.clone(), move |s| async move { s.delete_app(&app_id).await }).await?;
	Ok(StatusCode::NO_CONTENT)
}

fn init_admin_routes(app: App) -> Router<App> {
	Router::new()
		.route("/_fazt/admin/apps", get(get_apps).post(post_apps))
		.route("/_fazt/admin/apps/{app_id}", delete(delete_app))
		.route_layer(middleware::from_fn(require_admin))
		.route_layer(middleware::from_fn_with_state(app, require_auth))
}

fn init_stats_route(app: App) -> Router<App> {
	Router::new()
		.route("/_fazt/system/stats", get(get_stats))
		.route_layer(middleware::from_fn(require_admin))
		.route_layer(middleware::from_fn_with_state(app, require_auth))
}

pub fn init_api_router(app: App) -> Router<App> {
	Router::new()
		.route("/_fazt/system/health", get(get_health))
		.route("/_fazt/auth/login", post(post_login))
		.route("/_fazt/auth/logout", post(post_logout))
		.merge(init_stats_route(app.clone()))
		.merge(init_admin_routes(app.clone()))
		.route_layer(middleware::from_fn_with_state(app, optional_auth))
}

// --- Per-app routing ---------------------------------------------------

/// What a hosted domain's label resolves to, before any VFS lookup happens.
enum RouteTarget {
	Serve(AppId),
	Redirect(String),
	NotFound,
}

/// Splits `host` (port stripped) into an alias lookup `(domain, label)` pair:
/// a subdomain of `base_domain` resolves against `(base_domain, label)`,
/// anything else is treated as a custom domain resolving against
/// `(host, "")`.
fn alias_lookup_key<'a>(host: &'a str, base_domain: &'a str) -> (&'a str, &'a str) {
	let host_only = host.split(':').next().unwrap_or(host);
	if host_only == base_domain {
		return (base_domain, "");
	}
	match host_only.strip_suffix(base_domain).and_then(|rest| rest.strip_suffix('.')) {
		Some(label) => (base_domain, label),
		None => (host_only, ""),
	}
}

fn dispatch_alias(alias: fazt_types::substrate::AliasRecord) -> RouteTarget {
	match alias.kind {
		AliasKind::Reserved => RouteTarget::NotFound,
		AliasKind::Redirect => RouteTarget::Redirect(alias.target),
		AliasKind::Proxy => RouteTarget::Serve(AppId::new(alias.target)),
	}
}

/// Resolves a Host header to a routing target: the configured root app for
/// an empty/`www`/`root` label, a dedicated redirect for the `admin` label
/// (the admin API itself is reached by the `/_fazt/*` path prefix on any
/// host, not by a host label), a system 404 for `404`, or an
/// `Substrate::resolve_alias` lookup for everything else (subdomains of
/// `base_domain` and custom domains alike).
async fn resolve_route(app: &App, host: &str) -> ClResult<RouteTarget> {
	let (domain, label) = alias_lookup_key(host, &app.opts.base_domain);
	let lookup_label = match label {
		"" | "www" => "root",
		"404" => return Ok(RouteTarget::NotFound),
		"admin" if domain == app.opts.base_domain.as_ref() => {
			return Ok(RouteTarget::Redirect("/_fazt/system/health".to_string()));
		}
		label => label,
	};
	match app.substrate.resolve_alias(domain, lookup_label).await? {
		Some(alias) => Ok(dispatch_alias(alias)),
		None => Ok(RouteTarget::NotFound),
	}
}

fn parse_query(query: &str) -> HashMap<&str, &str> {
	query.split('&').filter_map(|kv| kv.split_once('=')).collect()
}

/// Generates (and caches) a resized derivative when the request carries
/// `w`/`h`/`fit`/`q` query params against an image row; `None` when no
/// resize params were present, so the caller falls back to the original.
async fn maybe_resize(
	app: &App,
	app_id: &AppId,
	path: &str,
	row: &fazt_types::substrate::VfsRow,
	query: &str,
) -> ClResult<Option<(Vec<u8>, &'static str)>> {
	let params = parse_query(query);
	let Some(width) = params.get("w").and_then(|v| v.parse::<u32>().ok()) else {
		return Ok(None);
	};
	let height = params.get("h").and_then(|v| v.parse::<u32>().ok());
	let fit = params.get("fit").copied().unwrap_or("contain");
	let quality = params.get("q").and_then(|v| v.parse::<u8>().ok());
	let resize_params = media::image::normalize(width, height, fit, quality)?;

	let store = ScopedStore::new(app_id.clone(), None, app.substrate.clone(), app.write_queue.clone());
	let (bytes, mime) = media::serve_resized(&store, &app.vfs_cache, &app.worker, path, row, resize_params).await?;
	Ok(Some((bytes, mime)))
}

async fn dispatch_executor(app: &App, app_id: &AppId, sub_path: &str, req: axum::extract::Request) -> ClResult<Response> {
	let Some(script_row) = app.substrate.vfs_get(app_id, HANDLER_SCRIPT_PATH).await? else {
		return Err(Error::NotFound);
	};
	let script = String::from_utf8(script_row.bytes).map_err(|_| Error::SyntaxError("handler script is not valid utf-8".into()))?;

	let method = req.method().to_string();
	let query = req.uri().query().unwrap_or("").to_string();
	let headers =
		req.headers().iter().filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string()))).collect();
	let body = to_bytes(req.into_body(), MAX_REQUEST_BODY_BYTES)
		.await
		.map_err(|_| Error::ValidationFailed("request body exceeds the size limit".into()))?
		.to_vec();

	let store = ScopedStore::new(app_id.clone(), None, app.substrate.clone(), app.write_queue.clone());
	let request_ctx = RequestContext { method, path: format!("/api/{sub_path}"), query, headers, body };
	let exec_response = app.executor.invoke(script, request_ctx, store, ExecutorLimits::default()).await?;

	let status = StatusCode::from_u16(exec_response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
	let mut builder = Response::builder().status(status);
	for (key, value) in exec_response.headers {
		builder = builder.header(key, value);
	}
	builder.body(Body::from(exec_response.body)).map_err(Error::from)
}

async fn serve_app_asset(State(app): State<App>, IdTag(host): IdTag, req: axum::extract::Request) -> ClResult<Response> {
	let raw_path = req.uri().path().trim_start_matches('/').to_string();
	check_safe_path(&raw_path)?;

	let app_id = match resolve_route(&app, &host).await? {
		RouteTarget::Serve(id) => id,
		RouteTarget::Redirect(to) => return Ok((StatusCode::FOUND, [(header::LOCATION, to)]).into_response()),
		RouteTarget::NotFound => return Err(Error::NotFound),
	};

	let referrer = req.headers().get(header::REFERER).and_then(|h| h.to_str().ok()).map(str::to_string);
	let ua = req.headers().get(header::USER_AGENT).and_then(|h| h.to_str().ok()).map(str::to_string);
	let track = |path: &str| {
		app.analytics.push(TrackingEvent {
			app_id: app_id.clone(),
			kind: "request".to_string(),
			path: path.to_string(),
			referrer: referrer.clone(),
			ua: ua.clone(),
			ts: Timestamp::now(),
		});
	};

	if let Some(sub_path) = raw_path.strip_prefix("api/") {
		track(&raw_path);
		return dispatch_executor(&app, &app_id, sub_path, req).await;
	}

	let path = if raw_path.is_empty() { "index.html" } else { raw_path.as_str() };
	let query = req.uri().query().unwrap_or("").to_string();

	if let Some(row) = cached_vfs_get(&app.vfs_cache, app.substrate.as_ref(), &app_id, path).await? {
		track(path);
		if !query.is_empty() && row.mime.starts_with("image/") {
			if let Some((bytes, mime)) = maybe_resize(&app, &app_id, path, &row, &query).await? {
				return Ok(([(header::CONTENT_TYPE, mime)], bytes).into_response());
			}
		}
		return Ok(([(header::CONTENT_TYPE, row.mime.clone())], row.bytes.clone()).into_response());
	}

	let record = app.substrate.read_app(&app_id).await?;
	if record.spa && path != "index.html" {
		if let Some(row) = cached_vfs_get(&app.vfs_cache, app.substrate.as_ref(), &app_id, "index.html").await? {
			track(path);
			return Ok(([(header::CONTENT_TYPE, row.mime.clone())], row.bytes.clone()).into_response());
		}
	}
	Err(Error::NotFound)
}

// --- App-scoped storage HTTP surface (§4.4) -----------------------------
//
// Reached on the app's own hosted domain under `/api/storage/*`, scoped to
// (app, calling account) rather than taking an app id from the path: the
// app is already resolved from the Host header, and `user_id` is whoever
// has an active session on that domain (or the shared anonymous namespace
// when nobody is signed in).

fn scoped_store(app: &App, app_id: AppId, auth: &OptionalAuth) -> ScopedStore {
	let user_id = auth.0.as_ref().map(|ctx| Box::from(ctx.user_id.as_ref()));
	ScopedStore::new(app_id, user_id, app.substrate.clone(), app.write_queue.clone())
}

async fn resolve_storage_app(app: &App, host: &str) -> ClResult<AppId> {
	match resolve_route(app, host).await? {
		RouteTarget::Serve(id) => Ok(id),
		_ => Err(Error::NotFound),
	}
}

async fn get_kv(
	State(app): State<App>,
	IdTag(host): IdTag,
	auth: OptionalAuth,
	AxumPath(key): AxumPath<String>,
) -> ClResult<Response> {
	let app_id = resolve_storage_app(&app, &host).await?;
	let store = scoped_store(&app, app_id, &auth);
	let row = store.kv_get(&key).await?.ok_or(Error::NotFound)?;
	let mime = row.mime.unwrap_or_else(|| "application/octet-stream".to_string());
	Ok(([(header::CONTENT_TYPE, mime)], row.value).into_response())
}

#[derive(Deserialize)]
struct KvPutBody {
	value: String,
	mime: Option<String>,
	ttl_seconds: Option<i64>,
}

async fn put_kv(
	State(app): State<App>,
	IdTag(host): IdTag,
	auth: OptionalAuth,
	AxumPath(key): AxumPath<String>,
	Json(body): Json<KvPutBody>,
) -> ClResult<impl IntoResponse> {
	let app_id = resolve_storage_app(&app, &host).await?;
	let store = scoped_store(&app, app_id, &auth);
	let ttl = body.ttl_seconds.map(Timestamp::from_now);
	store.kv_set(&key, body.value.into_bytes(), body.mime, ttl).await?;
	Ok(StatusCode::NO_CONTENT)
}

async fn delete_kv(
	State(app): State<App>,
	IdTag(host): IdTag,
	auth: OptionalAuth,
	AxumPath(key): AxumPath<String>,
) -> ClResult<impl IntoResponse> {
	let app_id = resolve_storage_app(&app, &host).await?;
	let store = scoped_store(&app, app_id, &auth);
	store.kv_delete(&key).await?;
	Ok(StatusCode::NO_CONTENT)
}

async fn list_ds(
	State(app): State<App>,
	IdTag(host): IdTag,
	auth: OptionalAuth,
	AxumPath(collection): AxumPath<String>,
) -> ClResult<impl IntoResponse> {
	let app_id = resolve_storage_app(&app, &host).await?;
	let store = scoped_store(&app, app_id, &auth);
	let docs = store.ds_find(&collection, &fazt_types::query::Query::default()).await?;
	Ok(Json(docs.into_iter().map(|d| d.json).collect::<Vec<_>>()))
}

async fn insert_ds(
	State(app): State<App>,
	IdTag(host): IdTag,
	auth: OptionalAuth,
	AxumPath(collection): AxumPath<String>,
	Json(body): Json<serde_json::Value>,
) -> ClResult<impl IntoResponse> {
	let app_id = resolve_storage_app(&app, &host).await?;
	let store = scoped_store(&app, app_id, &auth);
	let doc_id = store.ds_insert(&collection, None, body).await?;
	Ok(Json(serde_json::json!({ "id": doc_id })))
}

#[derive(Deserialize)]
struct DsUpdateBody {
	query: serde_json::Value,
	changes: serde_json::Value,
}

async fn update_ds(
	State(app): State<App>,
	IdTag(host): IdTag,
	auth: OptionalAuth,
	AxumPath(collection): AxumPath<String>,
	Json(body): Json<DsUpdateBody>,
) -> ClResult<impl IntoResponse> {
	let app_id = resolve_storage_app(&app, &host).await?;
	let store = scoped_store(&app, app_id, &auth);
	let query = fazt_types::query::Query::parse(&body.query)?;
	let updated = store.ds_update(&collection, query, body.changes).await?;
	Ok(Json(serde_json::json!({ "updated": updated })))
}

async fn delete_ds(
	State(app): State<App>,
	IdTag(host): IdTag,
	auth: OptionalAuth,
	AxumPath(collection): AxumPath<String>,
	Json(body): Json<serde_json::Value>,
) -> ClResult<impl IntoResponse> {
	let app_id = resolve_storage_app(&app, &host).await?;
	let store = scoped_store(&app, app_id, &auth);
	let query = fazt_types::query::Query::parse(&body)?;
	let deleted = store.ds_delete(&collection, query).await?;
	Ok(Json(serde_json::json!({ "deleted": deleted })))
}

fn init_storage_routes() -> Router<App> {
	Router::new()
		.route("/api/storage/kv/{key}", get(get_kv).put(put_kv).delete(delete_kv))
		.route("/api/storage/ds/{collection}", get(list_ds).post(insert_ds).put(update_ds).delete(delete_ds))
}

pub fn init_app_router(app: App) -> Router<App> {
	Router::new()
		.merge(init_storage_routes())
		.fallback(serve_app_asset)
		.route_layer(middleware::from_fn_with_state(app, optional_auth))
}

/// Plain-HTTP listener: unconditional redirect to HTTPS on the same host.
pub fn http_redirect_router() -> Router {
	async fn redirect(req: axum::extract::Request) -> Response {
		let host = req.headers().get(header::HOST).and_then(|h| h.to_str().ok()).unwrap_or("");
		let location = format!("https://{host}{}", req.uri().path());
		(StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
	}

	Router::new().fallback(redirect)
}

pub fn init(app: App) -> (Router<App>, Router<App>) {
	(init_api_router(app.clone()), init_app_router(app))
}

// vim: ts=4
