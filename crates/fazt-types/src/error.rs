//! Error taxonomy and HTTP mapping for the Fazt runtime.

use axum::{http::StatusCode, response::IntoResponse, Json};

use crate::types::ErrorResponse;

pub type ClResult<T> = std::result::Result<T, Error>;

/// Error kinds, named by what went wrong rather than by the library that
/// raised it. Every HTTP-facing handler converts through `IntoResponse`.
#[derive(Debug)]
pub enum Error {
	/// Route, app, blob, document, or key does not exist.
	NotFound,
	/// Missing or invalid credentials.
	Unauthorized,
	/// Invalid credentials presented at login specifically.
	InvalidCredentials,
	/// Valid credentials, insufficient role/capability.
	Forbidden,
	/// `..` segment survived one URL-decode pass.
	PathTraversal,
	/// Decoded path has a segment starting with `.`.
	DotfileBlocked,
	/// Malformed input: bad query shape, out-of-range parameter, bad archive.
	ValidationFailed(String),
	/// Admission control refused a write (queue full past the deadline budget).
	QueueUnavailable,
	/// A context deadline fired before an upstream-style operation completed.
	DeadlineExceeded,
	/// The executor's wall-clock budget expired mid-invocation.
	ExecutorTimeout,
	/// User script raised an uncaught exception; class name carried for the body.
	RuntimeError(String),
	/// User script failed to parse.
	SyntaxError(String),
	/// Substrate read/write failed transiently (busy, locked, io).
	StorageError(String),
	/// Programming bug or invariant violation.
	Internal(String),
	Io(std::io::Error),
	Parse,
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		tracing::warn!("io error: {}", err);
		Self::Io(err)
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{:?}", self)
	}
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
	fn into_response(self) -> axum::response::Response {
		let (status, code, message) = match self {
			Error::NotFound => {
				(StatusCode::NOT_FOUND, "NOT_FOUND", "Resource not found".to_string())
			}
			Error::Unauthorized => (
				StatusCode::UNAUTHORIZED,
				"UNAUTHORIZED",
				"Authentication required or invalid token".to_string(),
			),
			Error::InvalidCredentials => (
				StatusCode::UNAUTHORIZED,
				"INVALID_CREDENTIALS",
				"Invalid username or password".to_string(),
			),
			Error::Forbidden => (
				StatusCode::FORBIDDEN,
				"FORBIDDEN",
				"You do not have permission to access this resource".to_string(),
			),
			Error::PathTraversal => {
				(StatusCode::BAD_REQUEST, "PATH_TRAVERSAL", "Path traversal rejected".to_string())
			}
			Error::DotfileBlocked => {
				(StatusCode::FORBIDDEN, "DOTFILE_BLOCKED", "Dotfile access rejected".to_string())
			}
			Error::ValidationFailed(msg) => {
				(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", msg)
			}
			Error::QueueUnavailable => (
				StatusCode::SERVICE_UNAVAILABLE,
				"QUEUE_UNAVAILABLE",
				"Write queue is at capacity".to_string(),
			),
			Error::DeadlineExceeded => (
				StatusCode::GATEWAY_TIMEOUT,
				"DEADLINE_EXCEEDED",
				"Request deadline exceeded".to_string(),
			),
			Error::ExecutorTimeout => (
				StatusCode::INTERNAL_SERVER_ERROR,
				"TimeoutError",
				"Handler exceeded its execution budget".to_string(),
			),
			Error::RuntimeError(class) => {
				(StatusCode::INTERNAL_SERVER_ERROR, "RuntimeError", class)
			}
			Error::SyntaxError(msg) => {
				(StatusCode::INTERNAL_SERVER_ERROR, "SyntaxError", msg)
			}
			Error::StorageError(msg) => {
				tracing::warn!("storage error: {}", msg);
				(StatusCode::SERVICE_UNAVAILABLE, "STORAGE_ERROR", "Storage unavailable".to_string())
			}
			Error::Internal(msg) => {
				tracing::warn!("internal error: {}", msg);
				(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", "Internal server error".to_string())
			}
			Error::Io(_) => (
				StatusCode::INTERNAL_SERVER_ERROR,
				"INTERNAL",
				"Internal server error".to_string(),
			),
			Error::Parse => {
				(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", "Malformed request body".to_string())
			}
		};

		let error_response = ErrorResponse::new(code, message);
		(status, Json(error_response)).into_response()
	}
}

impl From<std::num::ParseIntError> for Error {
	fn from(err: std::num::ParseIntError) -> Self {
		tracing::warn!("parse int error: {}", err);
		Error::Parse
	}
}

impl From<std::time::SystemTimeError> for Error {
	fn from(err: std::time::SystemTimeError) -> Self {
		tracing::warn!("system time error: {}", err);
		Error::StorageError("system clock error".into())
	}
}

impl From<axum::Error> for Error {
	fn from(err: axum::Error) -> Self {
		tracing::warn!("axum error: {}", err);
		Error::ValidationFailed("malformed request".into())
	}
}

impl From<axum::http::Error> for Error {
	fn from(err: axum::http::Error) -> Self {
		tracing::warn!("http error: {}", err);
		Error::Internal("http error".into())
	}
}

impl From<axum::http::header::ToStrError> for Error {
	fn from(err: axum::http::header::ToStrError) -> Self {
		tracing::warn!("header to str error: {}", err);
		Error::Parse
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		tracing::warn!("json error: {}", err);
		Error::Parse
	}
}

impl From<tokio::task::JoinError> for Error {
	fn from(err: tokio::task::JoinError) -> Self {
		tracing::warn!("tokio join error: {}", err);
		Error::Internal("worker task failed".into())
	}
}

#[cfg(feature = "server")]
impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		tracing::warn!("substrate error: {}", err);
		match err {
			sqlx::Error::RowNotFound => Error::NotFound,
			other => Error::StorageError(other.to_string()),
		}
	}
}

#[cfg(feature = "server")]
impl From<image::error::ImageError> for Error {
	fn from(err: image::error::ImageError) -> Self {
		tracing::warn!("image error: {:?}", err);
		Error::ValidationFailed("image processing failed".into())
	}
}

#[cfg(feature = "server")]
impl From<rquickjs::Error> for Error {
	fn from(err: rquickjs::Error) -> Self {
		tracing::warn!("js runtime error: {}", err);
		Error::RuntimeError(err.to_string())
	}
}

/// Locks a mutex and converts poisoning to `Error::Internal`, with optional context.
#[macro_export]
macro_rules! lock {
	($mutex:expr) => {
		$mutex.lock().map_err(|_| $crate::error::Error::Internal("mutex poisoned".into()))
	};
	($mutex:expr, $context:expr) => {
		$mutex
			.lock()
			.map_err(|_| $crate::error::Error::Internal(format!("mutex poisoned: {}", $context)))
	};
}

// vim: ts=4
