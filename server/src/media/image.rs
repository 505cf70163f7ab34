//! On-the-fly image resize/encode (media pipeline, image half). Ported from
//! the teacher's `file/image.rs` resize path, adapted to run off
//! `fazt_core::WorkerPool` instead of the teacher's task-registration hook,
//! and to take/return plain byte buffers instead of touching a blob adapter
//! directly, since the caller is `ScopedStore`, not this module.

use std::io::Cursor;

use image::{imageops::FilterType, ImageReader};

use fazt_core::WorkerPool;
use fazt_types::prelude::*;

/// Largest side a resize will produce. Requests above this are rejected, not
/// clamped, so a cache key never silently stands in for a different request.
pub const MAX_DIMENSION: u32 = 4096;
/// Width is snapped up to the next multiple of this so that nearby requested
/// widths collapse onto the same cached derivative.
const WIDTH_STEP: u32 = 50;
const DEFAULT_QUALITY: u8 = 85;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fit {
	/// Scale to fit entirely inside the box, preserving aspect ratio.
	Contain,
	/// Scale to fill the box, cropping the overflow.
	Cover,
	/// Stretch to the exact box, ignoring aspect ratio.
	Fill,
}

impl Fit {
	pub fn parse(s: &str) -> Fit {
		match s {
			"cover" => Fit::Cover,
			"fill" => Fit::Fill,
			_ => Fit::Contain,
		}
	}
}

#[derive(Debug, Clone, Copy)]
pub struct ResizeParams {
	pub width: u32,
	pub height: Option<u32>,
	pub fit: Fit,
	pub quality: u8,
}

/// Validates and snaps raw `w`/`h`/`fit`/`q` query params into a cacheable,
/// bounded resize request.
pub fn normalize(width: u32, height: Option<u32>, fit: &str, quality: Option<u8>) -> ClResult<ResizeParams> {
	if width == 0 || width > MAX_DIMENSION {
		return Err(Error::ValidationFailed(format!("width must be in (0, {MAX_DIMENSION}]")));
	}
	if let Some(h) = height {
		if h == 0 || h > MAX_DIMENSION {
			return Err(Error::ValidationFailed(format!("height must be in (0, {MAX_DIMENSION}]")));
		}
	}
	let snapped_width = width.div_ceil(WIDTH_STEP) * WIDTH_STEP;
	let snapped_height = height.map(|h| ((h as u64 * snapped_width as u64) / width.max(1) as u64) as u32);
	Ok(ResizeParams {
		width: snapped_width,
		height: snapped_height,
		fit: Fit::parse(fit),
		quality: quality.unwrap_or(DEFAULT_QUALITY).clamp(1, 100),
	})
}

impl ResizeParams {
	/// Cache-key fragment appended under `_media/{hash(source path)}/...`.
	pub fn cache_key(&self) -> String {
		let fit = match self.fit {
			Fit::Contain => "contain",
			Fit::Cover => "cover",
			Fit::Fill => "fill",
		};
		format!("{}x{}-{}-q{}", self.width, self.height.unwrap_or(0), fit, self.quality)
	}
}

pub struct Resized {
	pub bytes: Vec<u8>,
	pub mime: &'static str,
}

/// PNG sources stay PNG (lossless); everything else is re-encoded to JPEG at
/// `params.quality`. Mirrors the teacher's `ImageFormat` dispatch but drops
/// the formats Fazt doesn't need to preserve (gif, bmp, tiff).
fn resize_sync(source: Vec<u8>, params: ResizeParams, source_is_png: bool) -> ClResult<Resized> {
	let decoded = ImageReader::new(Cursor::new(&source)).with_guessed_format()?.decode()?;
	let (src_w, src_h) = (decoded.width().max(1), decoded.height().max(1));
	let target_h = params.height.unwrap_or_else(|| ((src_h as u64 * params.width as u64) / src_w as u64) as u32).max(1);

	let resized = match params.fit {
		Fit::Fill => decoded.resize_exact(params.width, target_h, FilterType::Lanczos3),
		Fit::Cover => decoded.resize_to_fill(params.width, target_h, FilterType::Lanczos3),
		Fit::Contain => decoded.resize(params.width, target_h, FilterType::Lanczos3),
	};

	let mut out = Cursor::new(Vec::new());
	let mime = if source_is_png {
		resized.write_with_encoder(image::codecs::png::PngEncoder::new(&mut out))?;
		"image/png"
	} else {
		resized.write_with_encoder(image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, params.quality))?;
		"image/jpeg"
	};
	Ok(Resized { bytes: out.into_inner(), mime })
}

/// Runs the resize on the worker pool's CPU-bound tier so request-handling
/// tasks never block on image decode/encode.
pub async fn resize(worker: &WorkerPool, source: Vec<u8>, params: ResizeParams, source_mime: &str) -> ClResult<Resized> {
	let source_is_png = source_mime == "image/png";
	worker.try_run(move || resize_sync(source, params, source_is_png)).await
}

/// Sniffs an image's natural dimensions without a full decode+resize pass,
/// used to decide whether a resize is even necessary.
pub fn dimensions(bytes: &[u8]) -> ClResult<(u32, u32)> {
	let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
	let (w, h) = reader.into_dimensions()?;
	Ok((w, h))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn snaps_width_up_to_step_and_scales_height() {
		let params = normalize(101, Some(202), "cover", None).unwrap();
		assert_eq!(params.width, 150);
		assert_eq!(params.height, Some(300));
	}

	#[test]
	fn rejects_zero_and_oversized_dimensions() {
		assert!(normalize(0, None, "contain", None).is_err());
		assert!(normalize(MAX_DIMENSION + 1, None, "contain", None).is_err());
	}

	#[test]
	fn clamps_quality_into_valid_range() {
		let params = normalize(100, None, "contain", Some(255)).unwrap();
		assert_eq!(params.quality, 100);
	}
}

// vim: ts=4
