//! Application state and the top-level server builder.

use rustls::sign::CertifiedKey;
use std::{
	collections::HashMap,
	path::{Path, PathBuf},
	sync::{Arc, RwLock},
};

use fazt_core::{Scheduler, WorkerPool};
use fazt_types::substrate::Substrate;

use crate::analytics::EventBuffer;
use crate::cache::{VfsCache, DEFAULT_BUDGET_BYTES};
use crate::executor::Executor;
use crate::media::TranscodeLimiter;
use crate::prelude::*;
use crate::queue::WriteQueue;
use crate::{core::webserver, routes, tasks};

/// Shared, `Clone`-cheap application handle. Every extractor, handler and
/// scheduled task gets one of these as its state.
pub type App = Arc<AppState>;

pub struct AppState {
	pub substrate: Arc<dyn Substrate>,
	pub worker: Arc<WorkerPool>,
	pub scheduler: Arc<Scheduler<App>>,
	/// Per-domain TLS certs, keyed by SNI server name. Populated at boot from
	/// `opts.tls_dir` and never refreshed at runtime (no ACME path).
	pub certs: RwLock<HashMap<Box<str>, Arc<CertifiedKey>>>,
	/// Single-writer serialization for every substrate mutation (§4.3).
	pub write_queue: Arc<WriteQueue>,
	/// Process-local cache in front of `Substrate::vfs_get` (§4.2).
	pub vfs_cache: Arc<VfsCache>,
	/// In-memory analytics ring buffer, flushed periodically by `tasks::Flush`.
	pub analytics: Arc<EventBuffer>,
	/// Sandboxed JS handler execution (§4.5).
	pub executor: Arc<Executor>,
	/// Bounds concurrent background video transcodes (§4.6).
	pub transcode_limiter: Arc<TranscodeLimiter>,
	pub opts: BuilderOpts,
}

impl std::fmt::Debug for AppState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AppState")
			.field("substrate", &self.substrate)
			.field("worker", &self.worker)
			.field("opts", &self.opts)
			.finish_non_exhaustive()
	}
}

#[derive(Debug, Clone)]
pub struct BuilderOpts {
	pub listen: Box<str>,
	pub listen_http: Option<Box<str>>,
	/// Directory holding `data.db`; the VFS blob store lives in the same file.
	pub data_dir: Box<Path>,
	/// Directory of `<domain>/cert.pem` + `<domain>/key.pem` pairs, loaded
	/// once at boot.
	pub tls_dir: Option<Box<Path>>,
	pub admin_user: Option<Box<str>>,
	pub admin_password: Option<Box<str>>,
	/// Domain whose leading label is stripped to get an app's routing label
	/// (`myapp.<base_domain>` -> label `myapp`); an empty label after
	/// stripping means the configured root app.
	pub base_domain: Box<str>,
	/// Bytes budgeted to the process-local VFS cache.
	pub vfs_cache_budget: usize,
	/// Max concurrent background video transcodes.
	pub transcode_concurrency: usize,
}

pub struct Builder {
	opts: BuilderOpts,
	worker: Option<Arc<WorkerPool>>,
	substrate: Option<Arc<dyn Substrate>>,
}

impl Builder {
	pub fn new() -> Self {
		Builder {
			opts: BuilderOpts {
				listen: "0.0.0.0:443".into(),
				listen_http: Some("0.0.0.0:80".into()),
				data_dir: PathBuf::from("./data").into(),
				tls_dir: None,
				admin_user: None,
				admin_password: None,
				base_domain: "localhost".into(),
				vfs_cache_budget: DEFAULT_BUDGET_BYTES,
				transcode_concurrency: 2,
			},
			worker: None,
			substrate: None,
		}
	}

	pub fn listen(&mut self, listen: impl Into<Box<str>>) -> &mut Self {
		self.opts.listen = listen.into();
		self
	}
	pub fn listen_http(&mut self, listen_http: impl Into<Box<str>>) -> &mut Self {
		self.opts.listen_http = Some(listen_http.into());
		self
	}
	pub fn data_dir(&mut self, data_dir: impl Into<Box<Path>>) -> &mut Self {
		self.opts.data_dir = data_dir.into();
		self
	}
	pub fn tls_dir(&mut self, tls_dir: impl Into<Box<Path>>) -> &mut Self {
		self.opts.tls_dir = Some(tls_dir.into());
		self
	}
	pub fn admin_user(&mut self, admin_user: impl Into<Box<str>>) -> &mut Self {
		self.opts.admin_user = Some(admin_user.into());
		self
	}
	pub fn admin_password(&mut self, admin_password: impl Into<Box<str>>) -> &mut Self {
		self.opts.admin_password = Some(admin_password.into());
		self
	}
	pub fn base_domain(&mut self, base_domain: impl Into<Box<str>>) -> &mut Self {
		self.opts.base_domain = base_domain.into();
		self
	}
	pub fn vfs_cache_budget(&mut self, bytes: usize) -> &mut Self {
		self.opts.vfs_cache_budget = bytes;
		self
	}
	pub fn transcode_concurrency(&mut self, n: usize) -> &mut Self {
		self.opts.transcode_concurrency = n;
		self
	}
	pub fn worker(&mut self, worker: Arc<WorkerPool>) -> &mut Self {
		self.worker = Some(worker);
		self
	}
	pub fn substrate(&mut self, substrate: Arc<dyn Substrate>) -> &mut Self {
		self.substrate = Some(substrate);
		self
	}

	pub async fn run(self) -> ClResult<()> {
		tracing_subscriber::fmt()
			.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
			.with_target(false)
			.init();

		rustls::crypto::ring::default_provider()
			.install_default()
			.map_err(|_| Error::Internal("rustls crypto provider already installed".into()))?;

		let worker = self.worker.ok_or_else(|| Error::Internal("no worker pool configured".into()))?;
		let substrate = self.substrate.ok_or_else(|| Error::Internal("no storage substrate configured".into()))?;

		let scheduler = Scheduler::<App>::new();
		let vfs_cache_budget = self.opts.vfs_cache_budget;
		let transcode_concurrency = self.opts.transcode_concurrency;

		let state: App = Arc::new(AppState {
			substrate,
			worker: worker.clone(),
			scheduler: scheduler.clone(),
			certs: RwLock::new(HashMap::new()),
			write_queue: WriteQueue::start(),
			vfs_cache: Arc::new(VfsCache::new(vfs_cache_budget)),
			analytics: Arc::new(EventBuffer::new(4096)),
			executor: Arc::new(Executor::new(worker)),
			transcode_limiter: Arc::new(TranscodeLimiter::new(transcode_concurrency)),
			opts: self.opts,
		});

		if let Some(tls_dir) = state.opts.tls_dir.clone() {
			load_certs(&state, &tls_dir)?;
		}

		scheduler.task(Arc::new(tasks::SweepExpired)).key("kv::sweep_expired").cron(tasks::SWEEP_EXPIRED_CRON).now().await?;
		scheduler.task(Arc::new(tasks::Flush)).key("analytics::flush").cron(tasks::ANALYTICS_FLUSH_CRON).now().await?;
		scheduler.start(state.clone());

		let (api_router, app_router) = routes::init(state.clone());

		let https_server =
			webserver::create_https_server(state.clone(), &state.opts.listen, api_router, app_router).await?;

		let http_server = if let Some(listen_http) = state.opts.listen_http.clone() {
			let redirect = routes::http_redirect_router();
			let http_listener = tokio::net::TcpListener::bind(listen_http.as_ref()).await?;
			info!("Listening on HTTP {}", listen_http);
			Some(tokio::spawn(async move { axum::serve(http_listener, redirect).await }))
		} else {
			None
		};

		if let Some(http_server) = http_server {
			tokio::try_join!(flatten_join(https_server), flatten_join(http_server))?;
		} else {
			https_server.await.map_err(|e| Error::Internal(e.to_string()))??;
		}

		Ok(())
	}
}

impl Default for Builder {
	fn default() -> Self {
		Self::new()
	}
}

async fn flatten_join(handle: tokio::task::JoinHandle<Result<(), std::io::Error>>) -> ClResult<()> {
	handle.await.map_err(|e| Error::Internal(e.to_string()))?.map_err(Error::Io)
}

fn load_certs(state: &AppState, tls_dir: &Path) -> ClResult<()> {
	use rustls::pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer};

	let Ok(entries) = std::fs::read_dir(tls_dir) else {
		warn!("tls_dir {} not readable, starting with no preloaded certs", tls_dir.display());
		return Ok(());
	};

	let mut cache = state.certs.write().map_err(|_| Error::Internal("cert cache lock poisoned".into()))?;
	for entry in entries.flatten() {
		let domain_dir = entry.path();
		if !domain_dir.is_dir() {
			continue;
		}
		let Some(domain) = domain_dir.file_name().and_then(|n| n.to_str()) else { continue };
		let cert_path = domain_dir.join("cert.pem");
		let key_path = domain_dir.join("key.pem");
		let (Ok(cert_pem), Ok(key_pem)) = (std::fs::read(&cert_path), std::fs::read(&key_path)) else {
			warn!("skipping TLS dir entry {domain}: missing cert.pem/key.pem");
			continue;
		};

		let certs: Vec<CertificateDer> = CertificateDer::pem_slice_iter(&cert_pem).filter_map(Result::ok).collect();
		let Ok(key) = PrivateKeyDer::from_pem_slice(&key_pem) else {
			warn!("skipping TLS dir entry {domain}: invalid private key");
			continue;
		};
		let Some(provider) = rustls::crypto::CryptoProvider::get_default() else { continue };
		let Ok(certified_key) = rustls::sign::CertifiedKey::from_der(certs, key, provider.clone()) else {
			warn!("skipping TLS dir entry {domain}: certificate/key mismatch");
			continue;
		};
		cache.insert(Box::from(domain), Arc::new(certified_key));
		info!("loaded TLS cert for {domain}");
	}

	Ok(())
}

// vim: ts=4
