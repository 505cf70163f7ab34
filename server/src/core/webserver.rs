//! HTTPS listener: per-domain SNI cert resolution and Host-based dispatch
//! between the admin/system API router and the per-app static+executor
//! router.

use axum::response::IntoResponse;
use rustls::{
	server::{ClientHello, ResolvesServerCert},
	sign::CertifiedKey,
};
use std::{net::SocketAddr, str::FromStr, sync::Arc};
use tower::Service;

use crate::core::extract::IdTag;
use crate::prelude::*;

#[derive(Clone)]
pub struct CertResolver {
	state: App,
}

impl CertResolver {
	pub fn new(state: App) -> CertResolver {
		CertResolver { state }
	}

	fn get(&self, name: &str) -> Option<Arc<CertifiedKey>> {
		match self.state.certs.read() {
			Ok(cache) => cache.get(name).cloned(),
			Err(poisoned) => {
				error!("RwLock poisoned in cert cache read (recovering)");
				poisoned.into_inner().get(name).cloned()
			}
		}
	}
}

impl std::fmt::Debug for CertResolver {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CertResolver").finish()
	}
}

impl ResolvesServerCert for CertResolver {
	fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
		let name = client_hello.server_name()?;
		match self.get(name) {
			Some(cert) => Some(cert),
			None => {
				warn!("no TLS cert loaded for {}", name);
				None
			}
		}
	}
}

pub async fn create_https_server(
	state: App,
	listen: &str,
	api_router: axum::Router<App>,
	app_router: axum::Router<App>,
) -> ClResult<tokio::task::JoinHandle<Result<(), std::io::Error>>> {
	let cert_resolver = Arc::new(CertResolver::new(state.clone()));
	let mut server_config =
		rustls::ServerConfig::builder().with_no_client_auth().with_cert_resolver(cert_resolver);
	server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

	let addr =
		SocketAddr::from_str(listen).map_err(|_| Error::Internal(format!("invalid listen address: {listen}")))?;
	let https_server = axum_server::bind_rustls(
		addr,
		axum_server::tls_rustls::RustlsConfig::from_config(Arc::new(server_config)),
	);

	let api_router = api_router.with_state(state.clone());
	let app_router = app_router.with_state(state.clone());

	let svc = tower::service_fn(move |mut req: axum::http::Request<axum::body::Body>| {
		let mut api_router = api_router.clone();
		let mut app_router = app_router.clone();
		async move {
			let start = std::time::Instant::now();
			let host = req
				.uri()
				.host()
				.map(str::to_owned)
				.or_else(|| {
					req.headers().get(axum::http::header::HOST).and_then(|h| h.to_str().ok()).map(str::to_owned)
				})
				.unwrap_or_default();

			// The admin/system API is reached under a fixed path prefix on
			// the shared listener; every other Host is a hosted app domain.
			let is_api = req.uri().path().starts_with("/_fazt/");
			req.extensions_mut().insert(IdTag(host.clone().into_boxed_str()));

			let res = if is_api {
				info!("REQ api: {} {}", req.method(), req.uri().path());
				api_router.call(req).await
			} else {
				info!("REQ app[{host}]: {} {}", req.method(), req.uri().path());
				app_router.call(req).await
			};

			let status = res.as_ref().map(|r| r.status()).unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
			if status.is_client_error() || status.is_server_error() {
				warn!("RES: {} tm:{:?}", status, start.elapsed());
			} else {
				info!("RES: {} tm:{:?}", status, start.elapsed());
			}
			res.map(IntoResponse::into_response)
		}
	});

	info!("Listening on HTTPS {}", listen);
	let handle =
		tokio::spawn(async move { https_server.serve(svc.into_make_service_with_connect_info::<SocketAddr>()).await });

	Ok(handle)
}

// vim: ts=4
