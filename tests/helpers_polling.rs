//! Polling utilities for tests driving a bridge against a live transport.
//!
//! The backend answers on tokio's blocking pool, so tests tick the bridge
//! repeatedly until the expected state shows up.

use std::time::Duration;

use inference_bridge::{InferenceBridge, Scheduler, TickReport, Transport};

/// Poll until a predicate returns Some(T) or max attempts reached.
///
/// # Arguments
/// * `max_attempts` - Maximum number of polling attempts
/// * `delay_ms` - Delay between attempts in milliseconds
/// * `predicate` - Function that returns Some(T) on success, None to retry
pub async fn poll_until<T, F>(max_attempts: usize, delay_ms: u64, mut predicate: F) -> Option<T>
where
    F: FnMut() -> Option<T>,
{
    for attempt in 1..=max_attempts {
        if let Some(result) = predicate() {
            return Some(result);
        }
        if attempt < max_attempts {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }
    None
}

/// Tick `bridge` until `done` holds, accumulating what the ticks did.
///
/// Returns `None` if `done` never held within roughly two seconds.
pub async fn tick_until<T, S, F>(
    bridge: &mut InferenceBridge<T>,
    scheduler: &mut S,
    mut done: F,
) -> Option<TickReport>
where
    T: Transport,
    S: Scheduler,
    F: FnMut(&InferenceBridge<T>, &TickReport) -> bool,
{
    let mut total = TickReport::default();
    poll_until(400, 5, || {
        let report = bridge.tick(scheduler);
        total.events += report.events;
        total.resolved += report.resolved;
        total.broadcasts += report.broadcasts;
        total.rejected += report.rejected;
        total.cancelled += report.cancelled;
        total.resumed += report.resumed;
        done(bridge, &total).then_some(total)
    })
    .await
}
