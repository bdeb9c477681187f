//! Background eviction of idle client counters.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::gate::AdmissionGate;

/// Spawn the eviction sweep for `gate` on the current tokio runtime.
///
/// The task runs every `sweep_interval`, independent of traffic, and holds
/// only a weak reference: it exits on the first tick after the gate is
/// dropped. Each run also reports how many requests were rejected since the
/// previous one, so rejections are logged once per interval rather than once
/// per request.
pub fn spawn_sweeper(gate: &Arc<AdmissionGate>) -> JoinHandle<()> {
    let period = gate.settings().sweep_interval;
    let gate = Arc::downgrade(gate);

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let Some(gate) = gate.upgrade() else {
                debug!("Admission gate dropped, stopping sweeper");
                break;
            };
            sweep_once(&gate, Instant::now().into_std());
        }
    })
}

fn sweep_once(gate: &AdmissionGate, now: std::time::Instant) {
    let evicted = gate.evict_idle(now);
    let rejected = gate.take_rejected();

    if rejected > 0 {
        info!(
            rejected = rejected,
            evicted = evicted,
            tracked = gate.len(),
            "Requests rejected by admission gate since last sweep"
        );
    }
}
