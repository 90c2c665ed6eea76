//! Backoff timers.

use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

use certrelay_common::RetryPolicy;

use super::events::Event;

/// Computes jittered delays and arms timers that re-enqueue events.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    policy: RetryPolicy,
}

impl Backoff {
    pub(crate) fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub(crate) fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Delay before re-queue number `attempt` (1-based).
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.policy.nominal_delay(attempt);
        if self.policy.jitter <= 0.0 {
            return nominal;
        }
        let sample: f64 = rand::thread_rng().gen();
        self.policy.jittered(nominal, sample)
    }

    /// Send `event` on `tx` once `delay` has elapsed.
    pub(crate) fn schedule(tx: &UnboundedSender<Event>, delay: Duration, event: Event) {
        let tx = tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(event).is_err() {
                trace!("Orchestrator gone, dropping timer event");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certrelay_common::{Generation, RequestId};
    use tokio::sync::mpsc;

    #[test]
    fn test_delay_without_jitter_is_nominal() {
        let backoff = Backoff::new(RetryPolicy {
            jitter: 0.0,
            ..Default::default()
        });
        assert_eq!(backoff.delay(1), Duration::from_secs(30));
        assert_eq!(backoff.delay(3), Duration::from_secs(120));
    }

    #[test]
    fn test_delay_with_jitter_stays_in_band() {
        let backoff = Backoff::new(RetryPolicy::default());
        for _ in 0..100 {
            let delay = backoff.delay(2);
            assert!(delay >= Duration::from_secs(48));
            assert!(delay <= Duration::from_secs(72));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let start = tokio::time::Instant::now();

        Backoff::schedule(
            &tx,
            Duration::from_secs(30),
            Event::RetryDue {
                request_id: RequestId::new("a"),
                generation: Generation::new(1),
            },
        );

        match rx.recv().await {
            Some(Event::RetryDue { request_id, .. }) => assert_eq!(request_id.as_str(), "a"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(start.elapsed() >= Duration::from_secs(30));
    }
}
