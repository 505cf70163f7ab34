//! Recurring housekeeping tasks registered on the scheduler at boot
//! (`core::app::Builder::run`): the KV TTL sweep and the analytics flush.

use async_trait::async_trait;

use fazt_core::Task;
use fazt_types::prelude::*;

use crate::core::app::App;

/// Sweeps KV rows past their TTL. Lazy expiry already happens on read
/// (`kv_get` deletes a stale row and returns `None`); this catches keys
/// nobody reads again so they don't linger in storage forever.
#[derive(Debug)]
pub struct SweepExpired;

#[async_trait]
impl Task<App> for SweepExpired {
	fn kind() -> &'static str {
		"kv::SweepExpired"
	}
	fn kind_of(&self) -> &'static str {
		Self::kind()
	}
	async fn run(&self, state: &App) -> ClResult<()> {
		let substrate = state.substrate.clone();
		let swept = state.write_queue.run(substrate, |s| async move { s.kv_sweep_expired().await }).await?;
		if swept > 0 {
			debug!("swept {swept} expired kv rows");
		}
		Ok(())
	}
}

/// Flushes the in-memory analytics ring buffer to the substrate in one
/// batched `append_events` call.
#[derive(Debug)]
pub struct Flush;

#[async_trait]
impl Task<App> for Flush {
	fn kind() -> &'static str {
		"analytics::Flush"
	}
	fn kind_of(&self) -> &'static str {
		Self::kind()
	}
	async fn run(&self, state: &App) -> ClResult<()> {
		let events = state.analytics.drain();
		if events.is_empty() {
			return Ok(());
		}
		let dropped = state.analytics.dropped();
		if dropped > 0 {
			warn!("analytics buffer has dropped {dropped} events total (buffer overflow)");
		}
		let substrate = state.substrate.clone();
		state.write_queue.run(substrate, move |s| async move { s.append_events(&events).await }).await
	}
}

/// KV TTL sweep: every 5 minutes.
pub const SWEEP_EXPIRED_CRON: &str = "*/5 * * * *";
/// Analytics flush: every minute. `croner`'s standard 5-field grammar has no
/// sub-minute resolution; the buffer's own capacity absorbs whatever accrues
/// between flushes.
pub const ANALYTICS_FLUSH_CRON: &str = "* * * * *";

// vim: ts=4
