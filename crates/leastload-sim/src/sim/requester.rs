use crate::sim::config::Workload;
use core::time::Duration;
use leastload::{Error, Requester};
use rand::{Rng, rng};

/// Outcome of one requester's run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RequesterSummary {
    pub replies: usize,
    pub failures: usize,
}

/// Submits `workload.requests` random payloads one at a time, waiting for each
/// reply before sending the next, then signals exit.
///
/// Failed replies are logged and counted; they are never retried. The loop
/// stops early if the balancer is gone.
pub async fn drive_requester(
    requester: Requester<u32, f64>,
    workload: Workload,
) -> RequesterSummary {
    let id = requester.id();
    let mut summary = RequesterSummary::default();

    for i in 0..workload.requests {
        if let Some(pause) = think_time(workload.think_time) {
            tokio::time::sleep(pause).await;
        }

        let payload = rng().random_range(0..workload.max_payload);
        let result = match workload.reply_timeout {
            Some(after) => requester.submit_timeout(payload, after).await,
            None => requester.submit(payload).await,
        };

        match result {
            Ok(value) => {
                summary.replies += 1;
                tracing::info!("Requester {id} reply #{i}: sin({payload}) = {value:.4}");
            }
            Err(Error::ServiceShutdown) => {
                tracing::error!("Requester {id} found the balancer shut down");
                break;
            }
            Err(e) => {
                summary.failures += 1;
                tracing::warn!("Requester {id} request #{i} failed: {e}");
            }
        }
    }

    tracing::info!("Requester {id} exiting");
    requester.exit();
    summary
}

fn think_time(max: Duration) -> Option<Duration> {
    if max.is_zero() {
        return None;
    }
    let millis = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    Some(Duration::from_millis(rng().random_range(0..=millis)))
}
