use anyhow::Result;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

use crate::logging::{log, obj, ts_epoch_ms, Domain, Level};
use crate::stream::LastEvent;

/// Request to re-read every variable because the stream has gone quiet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTick {
    pub idle_ms: Option<u64>,
}

/// Whether a tick at `now_ms` should fall back to a full read.
pub fn should_poll(last_event: &LastEvent, now_ms: u64, stale: Duration) -> bool {
    last_event.is_stale(now_ms, stale)
}

/// Every `every`, ask for a full read if no stream frame arrived within
/// `stale`. The first check happens one period after start; the caller does
/// the initial read itself.
pub async fn start_poll_fallback(
    every: Duration,
    stale: Duration,
    last_event: LastEvent,
    sender: mpsc::Sender<PollTick>,
) -> Result<()> {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let now = ts_epoch_ms();
        let idle_ms = last_event.get().map(|t| now.saturating_sub(t));
        if !should_poll(&last_event, now, stale) {
            log(
                Level::Trace,
                Domain::Poll,
                "skip",
                obj(&[("idle_ms", json!(idle_ms))]),
            );
            continue;
        }
        log(
            Level::Debug,
            Domain::Poll,
            "fallback_read",
            obj(&[("idle_ms", json!(idle_ms))]),
        );
        if sender.send(PollTick { idle_ms }).await.is_err() {
            return Ok(());
        }
    }
}
