//! Media pipeline (§4.6): on-the-fly image derivatives cached under
//! `_media/`, and best-effort video transcode-on-upload under `_v/h264/`.

pub mod image;
pub mod video;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use fazt_types::prelude::*;

use crate::cache::VfsCache;
use crate::storage::ScopedStore;

/// Derivative paths live under this prefix so a whole source's derivatives
/// can be dropped together (`VfsCache::invalidate_prefix`) when the source
/// is overwritten or deleted.
pub fn image_cache_path(source_path: &str, params: &self::image::ResizeParams) -> String {
	let digest = fazt_types::utils::sha256_hex(source_path.as_bytes());
	format!("_media/{digest}/{}", params.cache_key())
}

pub fn image_cache_prefix(source_path: &str) -> String {
	format!("_media/{}/", fazt_types::utils::sha256_hex(source_path.as_bytes()))
}

/// Path the H.264/AAC transcode of `source_path` is stored at.
pub fn transcoded_path(source_path: &str) -> String {
	format!("_v/h264/{source_path}")
}

/// Serves a resized derivative of an image VFS row, generating and caching
/// it on first request. Falls back to the original bytes if the source
/// isn't decodable (caller already knows the mime type is an image one).
pub async fn serve_resized(
	store: &ScopedStore,
	cache: &VfsCache,
	worker: &fazt_core::WorkerPool,
	source_path: &str,
	source: &fazt_types::substrate::VfsRow,
	params: self::image::ResizeParams,
) -> ClResult<(Vec<u8>, &'static str)> {
	let derived_path = image_cache_path(source_path, &params);
	if let Some(row) = cache.get(store.app_id(), &derived_path) {
		let mime = if row.mime == "image/png" { "image/png" } else { "image/jpeg" };
		return Ok((row.bytes.clone(), mime));
	}
	if let Some(row) = store.s3_get(&derived_path).await? {
		cache.put(Arc::new(row.clone()));
		let mime = if row.mime == "image/png" { "image/png" } else { "image/jpeg" };
		return Ok((row.bytes, mime));
	}

	let resized = self::image::resize(worker, source.bytes.clone(), params, &source.mime).await?;
	let row = store.s3_put(&derived_path, resized.bytes.clone(), resized.mime.to_string()).await?;
	cache.put(Arc::new(row));
	Ok((resized.bytes, resized.mime))
}

/// Bounds how many transcodes run at once; video encode is heavy enough that
/// unbounded concurrency would starve request-handling entirely.
pub struct TranscodeLimiter {
	semaphore: Arc<Semaphore>,
}

impl TranscodeLimiter {
	pub fn new(max_concurrent: usize) -> Self {
		Self { semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))) }
	}

	/// Spawns a best-effort background transcode if a slot is free and
	/// `ffmpeg` is installed; silently does nothing otherwise (upload still
	/// succeeds, original bytes stay servable as-is).
	pub fn maybe_spawn_transcode(&self, store: ScopedStore, source_path: String, source_bytes: Vec<u8>, deadline: Duration) {
		if !self::video::Ffmpeg::is_available() || !self::video::Ffmpeg::is_probe_available() {
			return;
		}
		let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
			tracing::debug!("transcode slot unavailable, skipping {source_path}");
			return;
		};
		tokio::task::spawn_blocking(move || {
			let _permit = permit;
			if let Err(err) = transcode_sync(&store, &source_path, &source_bytes, deadline) {
				tracing::warn!("transcode of {source_path} failed: {err}");
			}
		});
	}
}

fn transcode_sync(store: &ScopedStore, source_path: &str, source_bytes: &[u8], deadline: Duration) -> ClResult<()> {
	let tmp_dir = std::env::temp_dir();
	let src_file: PathBuf = tmp_dir.join(format!("fazt-in-{}", fazt_types::utils::random_id()));
	let dst_file: PathBuf = tmp_dir.join(format!("fazt-out-{}.mp4", fazt_types::utils::random_id()));
	std::fs::write(&src_file, source_bytes).map_err(Error::Io)?;

	let info = self::video::Ffmpeg::probe(&src_file)?;
	if info.is_web_compatible() {
		let _ = std::fs::remove_file(&src_file);
		return Ok(());
	}

	let result = self::video::Ffmpeg::transcode_video(&src_file, &dst_file, &self::video::VideoTranscodeOpts::default(), deadline);
	let _ = std::fs::remove_file(&src_file);
	result?;

	let transcoded = std::fs::read(&dst_file).map_err(Error::Io)?;
	let _ = std::fs::remove_file(&dst_file);

	let path = transcoded_path(source_path);
	let store = store.clone();
	tokio::runtime::Handle::current()
		.block_on(async move { store.s3_put(&path, transcoded, "video/mp4".to_string()).await })?;
	Ok(())
}

// vim: ts=4
