//! Request middlewares: session auth and the path-safety checks the static
//! file and VFS routes depend on.

use axum::{
	body::Body,
	extract::State,
	http::{header, Request},
	middleware::Next,
	response::Response,
};

use crate::core::extract::{AccountCtx, Auth};
use crate::prelude::*;

fn bearer_token(req: &Request<Body>) -> Option<&str> {
	let header = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
	header.strip_prefix("Bearer ").map(str::trim)
}

/// API keys are presented as `fzt_<24 safe chars>`; the first
/// `API_KEY_LOOKUP_LEN` characters (prefix included) are the lookup key
/// `Substrate::find_api_key` indexes on, the full token hashes against the
/// stored `ApiKeyRow::hash`.
const API_KEY_TOKEN_PREFIX: &str = "fzt_";
const API_KEY_LOOKUP_LEN: usize = 12;

/// Fixed-time byte comparison so a wrong-length-prefix timing signal can't
/// leak how many leading bytes of a guessed key hash are already correct.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}
	a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

async fn resolve_api_key(state: &App, token: &str) -> ClResult<AccountCtx> {
	let lookup = token.get(..API_KEY_LOOKUP_LEN).ok_or(Error::Unauthorized)?;
	let key = state.substrate.find_api_key(lookup).await?.ok_or(Error::Unauthorized)?;
	let presented_hash = fazt_types::utils::sha256_hex(token.as_bytes());
	if !constant_time_eq(presented_hash.as_bytes(), key.hash.as_bytes()) {
		return Err(Error::Unauthorized);
	}
	state.substrate.touch_api_key(lookup).await?;
	let (_, admin) = state.substrate.read_account(&key.owner).await?.ok_or(Error::Unauthorized)?;
	Ok(AccountCtx { user_id: key.owner.into_boxed_str(), admin })
}

async fn resolve_session(state: &App, token: &str) -> ClResult<AccountCtx> {
	if token.starts_with(API_KEY_TOKEN_PREFIX) {
		return resolve_api_key(state, token).await;
	}
	let session = state.substrate.read_session(token).await?.ok_or(Error::Unauthorized)?;
	let (_, admin) = state.substrate.read_account(&session.user_id).await?.ok_or(Error::Unauthorized)?;
	state.substrate.touch_session(token, Timestamp::from_now(3600)).await?;
	Ok(AccountCtx { user_id: session.user_id.into_boxed_str(), admin })
}

/// Rejects the request unless a valid session token is presented.
pub async fn require_auth(
	State(state): State<App>,
	mut req: Request<Body>,
	next: Next,
) -> ClResult<Response<Body>> {
	let token = bearer_token(&req).ok_or(Error::Unauthorized)?.to_string();
	let ctx = resolve_session(&state, &token).await?;
	req.extensions_mut().insert(Auth(ctx));
	Ok(next.run(req).await)
}

/// Like `require_auth`, but lets the request through with no `Auth` extension
/// when no token (or an invalid one) was presented.
pub async fn optional_auth(
	State(state): State<App>,
	mut req: Request<Body>,
	next: Next,
) -> ClResult<Response<Body>> {
	if let Some(token) = bearer_token(&req).map(str::to_string) {
		if let Ok(ctx) = resolve_session(&state, &token).await {
			req.extensions_mut().insert(Auth(ctx));
		}
	}
	Ok(next.run(req).await)
}

/// Rejects the request unless the authenticated account is an admin.
pub async fn require_admin(req: Request<Body>, next: Next) -> ClResult<Response<Body>> {
	let Some(Auth(ctx)) = req.extensions().get::<Auth>().cloned() else {
		return Err(Error::Unauthorized);
	};
	if !ctx.admin {
		return Err(Error::Forbidden);
	}
	Ok(next.run(req).await)
}

/// Decoded-path safety check shared by the static-file router and the VFS
/// API: rejects any segment that normalizes to `..` (path traversal) or
/// starts with `.` (dotfiles), matching the normalization
/// `fazt_types::utils::normalize_vfs_path` already applies to stored paths.
pub fn check_safe_path(path: &str) -> ClResult<()> {
	for segment in path.split('/') {
		if segment == ".." {
			return Err(Error::PathTraversal);
		}
		if segment.starts_with('.') && !segment.is_empty() {
			return Err(Error::DotfileBlocked);
		}
	}
	Ok(())
}

// vim: ts=4
