// services/status_poller.rs
use std::future::Future;
use std::time::Duration;

use crate::models::status::TransactionStatus;

/// Re-query cadence: quick first check, a medium interval while the payment
/// stays pending, and a wide interval once the vendor rate-limits us. The
/// interval never narrows again within one session.
const INITIAL_INTERVAL: Duration = Duration::from_secs(5);
const PENDING_INTERVAL: Duration = Duration::from_secs(10);
const RATE_LIMITED_INTERVAL: Duration = Duration::from_secs(30);

/// Probes stop after this many observations even if the payment never
/// settles, so an abandoned checkout cannot leak a polling task.
const DEFAULT_PROBE_BUDGET: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Checking,
    Settled(TransactionStatus),
    Errored,
}

/// What one status probe observed. Rate limiting is flow control, not an
/// error: it widens the interval and polling continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollObservation {
    Pending { rate_limited: bool },
    Terminal(TransactionStatus),
    Error,
}

/// Client-observed polling state machine. Transitions are driven only by
/// observed responses, never by wall-clock coincidence.
#[derive(Debug)]
pub struct PollSession {
    state: PollState,
    interval: Duration,
    widened: bool,
    remaining_probes: u32,
}

impl PollSession {
    pub fn new() -> Self {
        Self::with_probe_budget(DEFAULT_PROBE_BUDGET)
    }

    pub fn with_probe_budget(budget: u32) -> Self {
        PollSession {
            state: PollState::Checking,
            interval: INITIAL_INTERVAL,
            widened: false,
            remaining_probes: budget,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, PollState::Checking) && self.remaining_probes > 0
    }

    pub fn observe(&mut self, observation: PollObservation) {
        if !matches!(self.state, PollState::Checking) {
            return;
        }
        self.remaining_probes = self.remaining_probes.saturating_sub(1);

        match observation {
            PollObservation::Terminal(status) => {
                self.state = PollState::Settled(status);
            }
            PollObservation::Error => {
                self.state = PollState::Errored;
            }
            PollObservation::Pending { rate_limited: true } => {
                self.widened = true;
                self.interval = RATE_LIMITED_INTERVAL;
            }
            PollObservation::Pending {
                rate_limited: false,
            } => {
                if !self.widened {
                    self.interval = PENDING_INTERVAL;
                }
            }
        }
    }
}

impl Default for PollSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives a session until it leaves the Checking state or exhausts its probe
/// budget, sleeping the session's current interval between probes. Dropping
/// or aborting the future cancels the session; no timer survives it.
pub async fn poll_until_settled<F, Fut>(session: &mut PollSession, mut probe: F) -> PollState
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PollObservation>,
{
    loop {
        if !session.is_active() {
            return session.state();
        }
        let observation = probe().await;
        session.observe(observation);
        if !session.is_active() {
            return session.state();
        }
        tokio::time::sleep(session.interval()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn pending_moves_to_medium_interval() {
        let mut session = PollSession::new();
        assert_eq!(session.interval(), INITIAL_INTERVAL);

        session.observe(PollObservation::Pending {
            rate_limited: false,
        });
        assert_eq!(session.interval(), PENDING_INTERVAL);
        assert!(session.is_active());
    }

    #[test]
    fn rate_limiting_widens_and_never_narrows() {
        let mut session = PollSession::new();
        session.observe(PollObservation::Pending { rate_limited: true });
        assert_eq!(session.interval(), RATE_LIMITED_INTERVAL);

        // A later non-limited pending answer must not shrink the interval.
        session.observe(PollObservation::Pending {
            rate_limited: false,
        });
        assert_eq!(session.interval(), RATE_LIMITED_INTERVAL);
        assert!(session.is_active());
    }

    #[test]
    fn terminal_observation_stops_the_session() {
        let mut session = PollSession::new();
        session.observe(PollObservation::Terminal(TransactionStatus::Success));
        assert_eq!(
            session.state(),
            PollState::Settled(TransactionStatus::Success)
        );
        assert!(!session.is_active());

        // A late observation against a settled session is a no-op.
        session.observe(PollObservation::Pending { rate_limited: true });
        assert_eq!(
            session.state(),
            PollState::Settled(TransactionStatus::Success)
        );
    }

    #[test]
    fn probe_errors_stop_the_session() {
        let mut session = PollSession::new();
        session.observe(PollObservation::Error);
        assert_eq!(session.state(), PollState::Errored);
        assert!(!session.is_active());
    }

    #[test]
    fn probe_budget_bounds_the_session() {
        let mut session = PollSession::with_probe_budget(2);
        session.observe(PollObservation::Pending {
            rate_limited: false,
        });
        assert!(session.is_active());
        session.observe(PollObservation::Pending {
            rate_limited: false,
        });
        assert!(!session.is_active());
        assert_eq!(session.state(), PollState::Checking);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_polls_until_terminal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut session = PollSession::new();
        let outcome = poll_until_settled(&mut session, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                match n {
                    0 => PollObservation::Pending {
                        rate_limited: false,
                    },
                    1 => PollObservation::Pending { rate_limited: true },
                    _ => PollObservation::Terminal(TransactionStatus::Success),
                }
            }
        })
        .await;

        assert_eq!(outcome, PollState::Settled(TransactionStatus::Success));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_gives_up_when_budget_is_spent() {
        let mut session = PollSession::with_probe_budget(3);
        let outcome = poll_until_settled(&mut session, || async {
            PollObservation::Pending {
                rate_limited: false,
            }
        })
        .await;

        assert_eq!(outcome, PollState::Checking);
    }
}
