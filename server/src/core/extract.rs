//! Request extractors shared by the admin API router and the per-app router.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::prelude::*;

/// The Host header the shared listener dispatched this request on, i.e. the
/// app domain. Inserted by `core::webserver` before either router runs.
#[derive(Clone, Debug)]
pub struct IdTag(pub Box<str>);

impl IdTag {
	pub fn new(host: &str) -> IdTag {
		IdTag(Box::from(host))
	}
}

impl<S> FromRequestParts<S> for IdTag
where
	S: Send + Sync,
{
	type Rejection = Error;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		parts.extensions.get::<IdTag>().cloned().ok_or(Error::Internal("IdTag missing from request".into()))
	}
}

/// An authenticated local account, resolved from a session cookie or bearer
/// token by `core::middleware::require_auth`.
#[derive(Clone, Debug)]
pub struct AccountCtx {
	pub user_id: Box<str>,
	pub admin: bool,
}

#[derive(Clone, Debug)]
pub struct Auth(pub AccountCtx);

impl<S> FromRequestParts<S> for Auth
where
	S: Send + Sync,
{
	type Rejection = Error;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		parts.extensions.get::<Auth>().cloned().ok_or(Error::Unauthorized)
	}
}

/// Like `Auth`, but doesn't fail the request when no session was presented.
#[derive(Clone, Debug)]
pub struct OptionalAuth(pub Option<AccountCtx>);

impl<S> FromRequestParts<S> for OptionalAuth
where
	S: Send + Sync,
{
	type Rejection = Error;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		Ok(OptionalAuth(parts.extensions.get::<Auth>().cloned().map(|a| a.0)))
	}
}

// vim: ts=4
