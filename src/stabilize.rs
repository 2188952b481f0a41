//! Job Stabilization
//!
//! Polls an asynchronous remote job until it reaches a verified terminal
//! state. Completion alone is not trusted: every poll must also report
//! counters that are jointly consistent, since a job's progress reporter
//! and its completion flag are updated independently on the worker.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{HarnessError, Result};
use crate::node::{JobHandle, JobStatusSnapshot, NodeClient};

/// Extra progress steps a job reports beyond its work units (the final
/// commit of the model).
pub const DEFAULT_COMMIT_STEPS: i64 = 1;

/// Result of one poll
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    /// Not terminal yet, poll again
    Pending,
    /// Terminal and verified
    Done(T),
    /// Terminal failure; never retried
    Inconsistent(String),
}

/// Poll `check` every `interval` until it reports `Done`, `Inconsistent`,
/// or `timeout` elapses.
///
/// A `Transport` error from `check` counts as one more pending poll; any
/// other error is returned as is.
pub async fn stabilize<T, F, Fut>(
    mut check: F,
    description: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollOutcome<T>>>,
{
    let start = Instant::now();
    let mut polls = 0usize;

    loop {
        polls += 1;
        match check().await {
            Ok(PollOutcome::Done(value)) => {
                info!(
                    "'{}' stabilized after {} poll(s) in {:.1}s",
                    description,
                    polls,
                    start.elapsed().as_secs_f64()
                );
                return Ok(value);
            }
            Ok(PollOutcome::Inconsistent(reason)) => {
                error!("'{}' inconsistent on poll {}: {}", description, polls, reason);
                return Err(HarnessError::StabilizationInconsistent {
                    description: description.to_string(),
                    reason,
                });
            }
            Ok(PollOutcome::Pending) => {
                debug!("'{}' still pending (poll {})", description, polls);
            }
            Err(e) if e.is_transport() => {
                warn!("'{}' poll {} failed, retrying: {}", description, polls, e);
            }
            Err(e) => return Err(e),
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(HarnessError::StabilizationTimeout {
                description: description.to_string(),
                timeout,
                polls,
            });
        }
        // one last poll lands on the deadline instead of past it
        sleep(interval.min(timeout - elapsed)).await;
    }
}

/// Counters a job must report consistently on every poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressInvariants {
    /// Units acknowledged when the job was submitted
    pub units_requested: i64,
    /// `progress_total - units_requested` expected from the worker
    pub commit_steps: i64,
}

impl ProgressInvariants {
    pub fn new(units_requested: i64) -> Self {
        Self {
            units_requested,
            commit_steps: DEFAULT_COMMIT_STEPS,
        }
    }

    pub fn with_commit_steps(mut self, commit_steps: i64) -> Self {
        self.commit_steps = commit_steps;
        self
    }

    /// `Err` carries the reason, including the full snapshot.
    pub fn verify(&self, s: &JobStatusSnapshot) -> std::result::Result<(), String> {
        let violation = if s.units_completed < 0 || s.units_requested < 0 {
            Some("negative unit count")
        } else if s.units_completed > s.units_requested {
            Some("more units completed than requested")
        } else if s.progress < 0 || s.progress_total < 0 {
            Some("negative progress")
        } else if s.progress > s.progress_total {
            Some("progress beyond total")
        } else if s.progress_total != s.units_requested + self.commit_steps {
            Some("progress total does not match requested units")
        } else if s.units_requested != self.units_requested {
            Some("requested units changed since submission")
        } else if s.is_done() && s.units_completed != self.units_requested {
            Some("done before all requested units completed")
        } else {
            None
        };

        match violation {
            Some(what) => Err(format!(
                "{} ({}; submitted units: {}, commit steps: {})",
                what, s, self.units_requested, self.commit_steps
            )),
            None => Ok(()),
        }
    }

    pub fn evaluate(&self, snapshot: JobStatusSnapshot) -> PollOutcome<JobStatusSnapshot> {
        match self.verify(&snapshot) {
            Err(reason) => PollOutcome::Inconsistent(reason),
            Ok(()) if snapshot.is_done() => PollOutcome::Done(snapshot),
            Ok(()) => PollOutcome::Pending,
        }
    }
}

/// Poll `job` on `node` to a verified `Done`.
pub async fn stabilize_job(
    node: &dyn NodeClient,
    job: &JobHandle,
    timeout: Duration,
    interval: Duration,
) -> Result<JobStatusSnapshot> {
    stabilize_job_with(node, job, ProgressInvariants::new(job.units_requested), timeout, interval).await
}

/// `stabilize_job` for workers whose progress total follows a different
/// commit-step convention.
pub async fn stabilize_job_with(
    node: &dyn NodeClient,
    job: &JobHandle,
    invariants: ProgressInvariants,
    timeout: Duration,
    interval: Duration,
) -> Result<JobStatusSnapshot> {
    let description = format!(
        "{} on {} reporting {} units",
        job.algorithm,
        node.endpoint(),
        job.units_requested
    );
    stabilize(
        move || async move {
            let snapshot = node.poll_job_status(job).await?;
            if !snapshot.is_done() && snapshot.units_completed > 0 {
                debug!(
                    "{} polling: {} of {} units done",
                    job.algorithm, snapshot.units_completed, snapshot.units_requested
                );
            }
            Ok(invariants.evaluate(snapshot))
        },
        &description,
        timeout,
        interval,
    )
    .await
}


#[cfg(test)]
mod tests {
    use super::test_utils::{done, running};
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const TIMEOUT: Duration = Duration::from_secs(30);
    const INTERVAL: Duration = Duration::from_secs(1);

    /// Feed snapshots through the invariants, one per poll; the last one repeats.
    async fn run_sequence(
        seq: Vec<JobStatusSnapshot>,
        requested: i64,
    ) -> (Result<JobStatusSnapshot>, usize) {
        let queue = Mutex::new(VecDeque::from(seq));
        let polls = AtomicUsize::new(0);
        let invariants = ProgressInvariants::new(requested);
        let result = stabilize(
            || async {
                polls.fetch_add(1, Ordering::SeqCst);
                let mut q = queue.lock().unwrap();
                let next = if q.len() > 1 { q.pop_front() } else { q.front().cloned() };
                Ok(invariants.evaluate(next.unwrap()))
            },
            "test job",
            TIMEOUT,
            INTERVAL,
        )
        .await;
        (result, polls.load(Ordering::SeqCst))
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_after_three_polls() {
        let (result, polls) = run_sequence(vec![running(5, 10), running(8, 10), done(10, 10)], 10).await;
        let last = result.unwrap();
        assert!(last.is_done());
        assert_eq!(last.units_completed, 10);
        assert_eq!(polls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_with_short_count_is_inconsistent() {
        let (result, polls) = run_sequence(vec![running(5, 10), done(7, 10)], 10).await;
        assert!(matches!(result, Err(HarnessError::StabilizationInconsistent { .. })));
        assert_eq!(polls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_progress_total_fails_on_first_such_poll() {
        let mut bad = running(3, 10);
        bad.progress_total = 10;
        let (result, polls) = run_sequence(vec![running(1, 10), bad, done(10, 10)], 10).await;
        match result {
            Err(HarnessError::StabilizationInconsistent { reason, .. }) => {
                assert!(reason.contains("progress total"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(polls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requested_units_must_match_submission() {
        let (result, _) = run_sequence(vec![running(2, 12)], 10).await;
        assert!(matches!(result, Err(HarnessError::StabilizationInconsistent { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_done_times_out() {
        let (result, polls) = run_sequence(vec![running(0, 10)], 10).await;
        match result {
            Err(HarnessError::StabilizationTimeout { polls: reported, timeout, .. }) => {
                assert_eq!(reported, polls);
                assert_eq!(timeout, TIMEOUT);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        // one poll at t=0 plus one per elapsed interval
        assert_eq!(polls, 31);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_are_retried() {
        let polls = AtomicUsize::new(0);
        let result = stabilize(
            || async {
                let n = polls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(HarnessError::transport("127.0.0.1:55300", "connection refused"))
                } else {
                    Ok(PollOutcome::Done(n))
                }
            },
            "flaky",
            TIMEOUT,
            INTERVAL,
        )
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_abort() {
        let polls = AtomicUsize::new(0);
        let result: Result<()> = stabilize(
            || async {
                polls.fetch_add(1, Ordering::SeqCst);
                Err(HarnessError::remote("127.0.0.1:55300", "Only integer or enum columns can be classes!"))
            },
            "broken",
            TIMEOUT,
            INTERVAL,
        )
        .await;
        assert!(matches!(result, Err(HarnessError::Remote { .. })));
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invariant_violations() {
        let inv = ProgressInvariants::new(10);
        assert!(inv.verify(&running(0, 10)).is_ok());
        assert!(inv.verify(&done(10, 10)).is_ok());

        let mut s = running(11, 10);
        s.progress = 10;
        assert!(inv.verify(&s).is_err());

        let mut s = running(4, 10);
        s.progress = -1;
        assert!(inv.verify(&s).is_err());

        let mut s = running(4, 10);
        s.progress = 12;
        assert!(inv.verify(&s).is_err());

        let s = running(-1, 10);
        assert!(inv.verify(&s).is_err());
    }

    #[test]
    fn test_commit_steps_are_configurable() {
        let mut s = running(3, 10);
        s.progress_total = 10;
        assert!(ProgressInvariants::new(10).verify(&s).is_err());
        assert!(ProgressInvariants::new(10).with_commit_steps(0).verify(&s).is_ok());
    }

    #[test]
    fn test_reason_carries_counters() {
        let reason = ProgressInvariants::new(10).verify(&done(7, 10)).unwrap_err();
        assert!(reason.contains("units: 7/10"));
    }
}
