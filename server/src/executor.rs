//! Serverless JS executor (§4.5): a per-invocation `rquickjs` runtime with a
//! memory cap, a wall-clock deadline enforced via QuickJS's interrupt
//! handler, an output-size ceiling, and a `fazt` syscall bridge into
//! `ScopedStore` and outbound HTTP. No teacher analogue exists for this
//! module; `rquickjs` is the sandboxed-JS crate chosen for the `Runtime`/
//! `Context`/interrupt-handler shape the isolation model needs (see
//! DESIGN.md).

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rquickjs::{Context, Ctx, Function, Object, Runtime};

use fazt_core::WorkerPool;
use fazt_types::prelude::*;
use fazt_types::query::Query;

use crate::storage::ScopedStore;

#[derive(Debug, Clone)]
pub struct ExecutorLimits {
	pub memory_bytes: usize,
	pub timeout: Duration,
	pub max_output_bytes: usize,
}

impl Default for ExecutorLimits {
	fn default() -> Self {
		Self { memory_bytes: 64 * 1024 * 1024, timeout: Duration::from_secs(10), max_output_bytes: 1024 * 1024 }
	}
}

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
	pub method: String,
	pub path: String,
	pub query: String,
	pub headers: Vec<(String, String)>,
	pub body: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutorResponse {
	pub status: u16,
	pub headers: Vec<(String, String)>,
	pub body: Vec<u8>,
}

pub struct Executor {
	worker: Arc<WorkerPool>,
}

impl Executor {
	pub fn new(worker: Arc<WorkerPool>) -> Self {
		Self { worker }
	}

	/// Runs `script` against `req`, scoped to `store`'s app/user. Offloaded to
	/// the worker pool's slow tier since QuickJS execution is synchronous and
	/// can run up to `limits.timeout`.
	pub async fn invoke(
		&self,
		script: String,
		req: RequestContext,
		store: ScopedStore,
		limits: ExecutorLimits,
	) -> ClResult<ExecutorResponse> {
		let handle = tokio::runtime::Handle::current();
		self.worker.try_run(move || run_script(&script, req, store, limits, handle)).await
	}
}

/// Raises a catchable JS exception carrying `msg`, for host calls (storage,
/// fetch) that fail.
fn throw(ctx: &Ctx<'_>, msg: impl std::fmt::Display) -> rquickjs::Error {
	match rquickjs::String::from_str(ctx.clone(), &msg.to_string()) {
		Ok(value) => ctx.throw(value.into_value()),
		Err(e) => e,
	}
}

fn run_script(
	script: &str,
	req: RequestContext,
	store: ScopedStore,
	limits: ExecutorLimits,
	handle: tokio::runtime::Handle,
) -> ClResult<ExecutorResponse> {
	let runtime = Runtime::new().map_err(Error::from)?;
	runtime.set_memory_limit(limits.memory_bytes);

	let deadline = Instant::now() + limits.timeout;
	runtime.set_interrupt_handler(Some(Box::new(move || Instant::now() > deadline)));

	let context = Context::full(&runtime).map_err(Error::from)?;
	let response = Arc::new(Mutex::new(ExecutorResponse { status: 200, ..Default::default() }));

	let eval_result: ClResult<()> = context.with(|ctx| {
		install_request(&ctx, &req)?;
		install_response(&ctx, response.clone())?;
		install_storage(&ctx, store.clone(), handle.clone())?;
		install_net(&ctx)?;

		match ctx.eval::<rquickjs::Value, _>(script.as_bytes()) {
			Ok(_) => Ok(()),
			Err(rquickjs::Error::Exception) => {
				let exc = ctx.catch();
				Err(Error::RuntimeError(format!("{exc:?}")))
			}
			Err(e) => Err(Error::SyntaxError(e.to_string())),
		}
	});
	eval_result?;

	let response = Arc::try_unwrap(response).map(|m| m.into_inner().unwrap_or_default()).unwrap_or_default();
	if response.body.len() > limits.max_output_bytes {
		return Err(Error::ValidationFailed("handler response exceeds the output size ceiling".into()));
	}
	Ok(response)
}

fn install_request(ctx: &Ctx<'_>, req: &RequestContext) -> ClResult<()> {
	let object = Object::new(ctx.clone()).map_err(Error::from)?;
	object.set("method", req.method.clone()).map_err(Error::from)?;
	object.set("path", req.path.clone()).map_err(Error::from)?;
	object.set("query", req.query.clone()).map_err(Error::from)?;
	object.set("body", String::from_utf8_lossy(&req.body).to_string()).map_err(Error::from)?;
	let headers = Object::new(ctx.clone()).map_err(Error::from)?;
	for (k, v) in &req.headers {
		headers.set(k.as_str(), v.clone()).map_err(Error::from)?;
	}
	object.set("headers", headers).map_err(Error::from)?;
	ctx.globals().set("request", object).map_err(Error::from)?;
	Ok(())
}

fn install_response(ctx: &Ctx<'_>, response: Arc<Mutex<ExecutorResponse>>) -> ClResult<()> {
	let object = Object::new(ctx.clone()).map_err(Error::from)?;
	let respond = Function::new(ctx.clone(), move |status: i32, body: String, headers: Option<Object>| {
		if let Ok(mut r) = response.lock() {
			r.status = status.clamp(100, 599) as u16;
			r.body = body.into_bytes();
			if let Some(headers) = headers {
				if let Ok(keys) = headers.keys::<String>().collect::<Result<Vec<_>, _>>() {
					for key in keys {
						if let Ok(value) = headers.get::<_, String>(key.as_str()) {
							r.headers.push((key, value));
						}
					}
				}
			}
		}
	})
	.map_err(Error::from)?;
	object.set("respond", respond).map_err(Error::from)?;
	ctx.globals().set("response", object).map_err(Error::from)?;
	// console.log/warn/error just forward to tracing; no buffering needed since
	// nothing downstream reads handler logs back through the HTTP response.
	let console = Object::new(ctx.clone()).map_err(Error::from)?;
	console.set("log", Function::new(ctx.clone(), |msg: String| tracing::info!(target: "fazt::handler", "{msg}"))).map_err(Error::from)?;
	console
		.set("warn", Function::new(ctx.clone(), |msg: String| tracing::warn!(target: "fazt::handler", "{msg}")))
		.map_err(Error::from)?;
	console
		.set("error", Function::new(ctx.clone(), |msg: String| tracing::error!(target: "fazt::handler", "{msg}")))
		.map_err(Error::from)?;
	ctx.globals().set("console", console).map_err(Error::from)?;
	Ok(())
}

/// `fazt.storage.{kv,ds,s3}` bridged to `ScopedStore`; each call blocks the
/// worker thread on the async substrate call via the captured tokio handle,
/// since QuickJS execution itself is fully synchronous.
fn install_storage(outer_ctx: &Ctx<'_>, store: ScopedStore, handle: tokio::runtime::Handle) -> ClResult<()> {
	let fazt = Object::new(outer_ctx.clone()).map_err(Error::from)?;
	let storage = Object::new(outer_ctx.clone()).map_err(Error::from)?;

	let kv = Object::new(outer_ctx.clone()).map_err(Error::from)?;
	{
		let store = store.clone();
		let handle = handle.clone();
		let get = Function::new(outer_ctx.clone(), move |ctx: Ctx<'_>, key: String| -> rquickjs::Result<Option<String>> {
			let store = store.clone();
			match handle.block_on(async move { store.kv_get(&key).await }) {
				Ok(Some(row)) => Ok(Some(String::from_utf8_lossy(&row.value).to_string())),
				Ok(None) => Ok(None),
				Err(e) => Err(throw(&ctx, e)),
			}
		})
		.map_err(Error::from)?;
		kv.set("get", get).map_err(Error::from)?;
	}
	{
		let store = store.clone();
		let handle = handle.clone();
		let set = Function::new(outer_ctx.clone(), move |ctx: Ctx<'_>, key: String, value: String| -> rquickjs::Result<()> {
			let store = store.clone();
			handle
				.block_on(async move { store.kv_set(&key, value.into_bytes(), None, None).await })
				.map_err(|e| throw(&ctx, e))
		})
		.map_err(Error::from)?;
		kv.set("set", set).map_err(Error::from)?;
	}
	{
		let store = store.clone();
		let handle = handle.clone();
		let delete = Function::new(outer_ctx.clone(), move |ctx: Ctx<'_>, key: String| -> rquickjs::Result<()> {
			let store = store.clone();
			handle.block_on(async move { store.kv_delete(&key).await }).map_err(|e| throw(&ctx, e))
		})
		.map_err(Error::from)?;
		kv.set("delete", delete).map_err(Error::from)?;
	}
	storage.set("kv", kv).map_err(Error::from)?;

	let ds = Object::new(outer_ctx.clone()).map_err(Error::from)?;
	{
		let store = store.clone();
		let handle = handle.clone();
		let find = Function::new(outer_ctx.clone(), move |ctx: Ctx<'_>, collection: String| -> rquickjs::Result<String> {
			let store = store.clone();
			match handle.block_on(async move { store.ds_find(&collection, &Query::default()).await }) {
				Ok(rows) => {
					let docs: Vec<_> = rows.into_iter().map(|r| r.json).collect();
					Ok(serde_json::to_string(&docs).unwrap_or_else(|_| "[]".to_string()))
				}
				Err(e) => Err(throw(&ctx, e)),
			}
		})
		.map_err(Error::from)?;
		ds.set("find", find).map_err(Error::from)?;
	}
	{
		let store = store.clone();
		let handle = handle.clone();
		let insert =
			Function::new(outer_ctx.clone(), move |ctx: Ctx<'_>, collection: String, json: String| -> rquickjs::Result<String> {
				let value: serde_json::Value = serde_json::from_str(&json).map_err(|e| throw(&ctx, e))?;
				let store = store.clone();
				handle.block_on(async move { store.ds_insert(&collection, None, value).await }).map_err(|e| throw(&ctx, e))
			})
			.map_err(Error::from)?;
		ds.set("insert", insert).map_err(Error::from)?;
	}
	storage.set("ds", ds).map_err(Error::from)?;

	let s3 = Object::new(outer_ctx.clone()).map_err(Error::from)?;
	{
		let store = store.clone();
		let handle = handle.clone();
		let get = Function::new(outer_ctx.clone(), move |ctx: Ctx<'_>, key: String| -> rquickjs::Result<Option<String>> {
			let store = store.clone();
			match handle.block_on(async move { store.s3_get(&key).await }) {
				Ok(Some(row)) => Ok(Some(String::from_utf8_lossy(&row.bytes).to_string())),
				Ok(None) => Ok(None),
				Err(e) => Err(throw(&ctx, e)),
			}
		})
		.map_err(Error::from)?;
		s3.set("get", get).map_err(Error::from)?;
	}
	{
		let handle = handle.clone();
		let put = Function::new(outer_ctx.clone(), move |ctx: Ctx<'_>, key: String, body: String| -> rquickjs::Result<()> {
			let store = store.clone();
			handle
				.block_on(async move { store.s3_put(&key, body.into_bytes(), "application/octet-stream".to_string()).await })
				.map(|_| ())
				.map_err(|e| throw(&ctx, e))
		})
		.map_err(Error::from)?;
		s3.set("put", put).map_err(Error::from)?;
	}
	storage.set("s3", s3).map_err(Error::from)?;

	fazt.set("storage", storage).map_err(Error::from)?;
	outer_ctx.globals().set("fazt", fazt).map_err(Error::from)?;
	Ok(())
}

/// `fazt.net.fetch`: outbound HTTP via a blocking `reqwest` client, since the
/// handler thread is already blocked inside the worker pool.
fn install_net(ctx: &Ctx<'_>) -> ClResult<()> {
	let fazt: Object = ctx.globals().get("fazt").map_err(Error::from)?;
	let net = Object::new(ctx.clone()).map_err(Error::from)?;
	let fetch = Function::new(ctx.clone(), move |ctx: Ctx<'_>, url: String| -> rquickjs::Result<String> {
		let client = reqwest::blocking::Client::builder().timeout(Duration::from_secs(10)).build().map_err(|e| throw(&ctx, e))?;
		client.get(&url).send().and_then(|r| r.text()).map_err(|e| throw(&ctx, e))
	})
	.map_err(Error::from)?;
	net.set("fetch", fetch).map_err(Error::from)?;
	fazt.set("net", net).map_err(Error::from)?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_limits_are_sane() {
		let limits = ExecutorLimits::default();
		assert_eq!(limits.memory_bytes, 64 * 1024 * 1024);
		assert_eq!(limits.max_output_bytes, 1024 * 1024);
	}
}

// vim: ts=4
