//! Container sniffing and transcode (media pipeline, video half).
//!
//! `sniff_container` is pure byte inspection with no teacher analogue: it
//! walks ISO-BMFF top-level boxes (MP4/MOV) or checks the EBML header
//! (WebM) to decide, cheaply, whether an upload is already in a
//! browser-compatible container before paying for a `ffprobe` round trip.
//!
//! `Ffmpeg` below is ported from the teacher's `file/ffmpeg.rs`: the same
//! `Command`-wrapping-`ffprobe`/`ffmpeg` shape, trimmed to the probe and
//! H.264/AAC transcode paths Fazt actually serves.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use fazt_types::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
	Mp4,
	Mov,
	WebM,
	Unknown,
}

/// Walks top-level ISO-BMFF boxes looking for `ftyp`; falls back to the WebM
/// EBML magic. Never shells out, so this is safe to run on every upload
/// regardless of whether `ffmpeg` is even installed.
pub fn sniff_container(bytes: &[u8]) -> Container {
	if bytes.len() >= 4 && bytes[0..4] == [0x1A, 0x45, 0xDF, 0xA3] {
		return Container::WebM;
	}
	let mut offset = 0usize;
	while offset + 8 <= bytes.len() {
		let size = u32::from_be_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]]) as usize;
		let box_type = &bytes[offset + 4..offset + 8];
		if box_type == b"ftyp" {
			return if bytes.len() >= offset + 12 && &bytes[offset + 8..offset + 12] == b"qt  " {
				Container::Mov
			} else {
				Container::Mp4
			};
		}
		if size < 8 {
			break;
		}
		offset += size;
	}
	Container::Unknown
}

#[derive(Debug, Clone)]
pub struct VideoStream {
	pub codec: String,
	pub width: u32,
	pub height: u32,
}

#[derive(Debug, Clone)]
pub struct AudioStream {
	pub codec: String,
}

#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
	pub duration_secs: f64,
	pub video: Option<VideoStream>,
	pub audio: Option<AudioStream>,
}

impl MediaInfo {
	/// Already playable in a browser `<video>` tag without transcoding.
	pub fn is_web_compatible(&self) -> bool {
		let video_ok = self.video.as_ref().map(|v| v.codec == "h264").unwrap_or(false);
		let audio_ok = self.audio.as_ref().map(|a| a.codec == "aac").unwrap_or(true);
		video_ok && audio_ok
	}
}

#[derive(Debug, Clone)]
pub struct VideoTranscodeOpts {
	pub crf: u8,
	pub preset: &'static str,
	pub max_width: u32,
}

impl Default for VideoTranscodeOpts {
	fn default() -> Self {
		Self { crf: 23, preset: "veryfast", max_width: 1920 }
	}
}

pub struct Ffmpeg;

impl Ffmpeg {
	pub fn is_available() -> bool {
		Command::new("ffmpeg").arg("-version").output().map(|o| o.status.success()).unwrap_or(false)
	}

	pub fn is_probe_available() -> bool {
		Command::new("ffprobe").arg("-version").output().map(|o| o.status.success()).unwrap_or(false)
	}

	/// Runs `ffprobe -print_format json -show_streams -show_format` and
	/// parses the minimal subset of its output Fazt needs.
	pub fn probe(path: &Path) -> ClResult<MediaInfo> {
		let output = Command::new("ffprobe")
			.args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
			.arg(path)
			.output()
			.map_err(|e| Error::Internal(format!("ffprobe spawn failed: {e}")))?;
		if !output.status.success() {
			return Err(Error::RuntimeError(format!(
				"ffprobe exited with {}: {}",
				output.status,
				String::from_utf8_lossy(&output.stderr)
			)));
		}
		let json: serde_json::Value =
			serde_json::from_slice(&output.stdout).map_err(|e| Error::Internal(format!("ffprobe json: {e}")))?;

		let duration_secs = json["format"]["duration"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0);
		let mut video = None;
		let mut audio = None;
		for stream in json["streams"].as_array().into_iter().flatten() {
			match stream["codec_type"].as_str() {
				Some("video") if video.is_none() => {
					video = Some(VideoStream {
						codec: stream["codec_name"].as_str().unwrap_or("").to_string(),
						width: stream["width"].as_u64().unwrap_or(0) as u32,
						height: stream["height"].as_u64().unwrap_or(0) as u32,
					});
				}
				Some("audio") if audio.is_none() => {
					audio = Some(AudioStream { codec: stream["codec_name"].as_str().unwrap_or("").to_string() });
				}
				_ => {}
			}
		}
		Ok(MediaInfo { duration_secs, video, audio })
	}

	/// Transcodes to H.264/AAC in an MP4 container, scaling down to
	/// `opts.max_width` when the source is wider. Runs with a wall-clock
	/// deadline since `ffmpeg` has no built-in one.
	pub fn transcode_video(src: &Path, dst: &Path, opts: &VideoTranscodeOpts, deadline: Duration) -> ClResult<()> {
		let scale = format!("scale='min({},iw)':-2", opts.max_width);
		let mut child = Command::new("ffmpeg")
			.arg("-y")
			.arg("-i")
			.arg(src)
			.args(["-vf", &scale])
			.args(["-c:v", "libx264", "-preset", opts.preset, "-crf", &opts.crf.to_string()])
			.args(["-c:a", "aac", "-b:a", "128k"])
			.args(["-movflags", "+faststart"])
			.arg(dst)
			.spawn()
			.map_err(|e| Error::Internal(format!("ffmpeg spawn failed: {e}")))?;

		let start = std::time::Instant::now();
		loop {
			if let Some(status) = child.try_wait().map_err(|e| Error::Internal(e.to_string()))? {
				return if status.success() {
					Ok(())
				} else {
					Err(Error::RuntimeError(format!("ffmpeg transcode exited with {status}")))
				};
			}
			if start.elapsed() > deadline {
				let _ = child.kill();
				return Err(Error::ExecutorTimeout);
			}
			std::thread::sleep(Duration::from_millis(50));
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sniffs_mp4_ftyp_box() {
		let mut bytes = vec![0u8, 0, 0, 24];
		bytes.extend_from_slice(b"ftyp");
		bytes.extend_from_slice(b"isom");
		assert_eq!(sniff_container(&bytes), Container::Mp4);
	}

	#[test]
	fn sniffs_webm_ebml_header() {
		let bytes = [0x1A, 0x45, 0xDF, 0xA3, 0, 0];
		assert_eq!(sniff_container(&bytes), Container::WebM);
	}

	#[test]
	fn unknown_for_garbage() {
		assert_eq!(sniff_container(b"not a container"), Container::Unknown);
	}

	#[test]
	fn web_compatible_requires_h264_and_aac_or_no_audio() {
		let info = MediaInfo {
			duration_secs: 1.0,
			video: Some(VideoStream { codec: "h264".into(), width: 640, height: 480 }),
			audio: None,
		};
		assert!(info.is_web_compatible());
	}
}

// vim: ts=4
