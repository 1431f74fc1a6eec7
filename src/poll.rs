//! Bounded status polling.
//!
//! Waits for a remote resource to reach a target state by checking its status
//! at a fixed interval, at most `floor(max / interval)` times (at least once).
//! There is no sleep after the target is seen or after the last allowed check.

use async_trait::async_trait;
use std::fmt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WaitPolicy;
use crate::emit;
use crate::error::{PollError, ServiceError};
use crate::metrics::events::{WaitCompleted, WaitDuration, WaitResult};

/// Something whose status can be checked until it reaches a target.
#[async_trait]
pub trait StatusProbe: Send {
    type Status: fmt::Display + Send;

    /// Short metric label, e.g. `workgroup`.
    fn label(&self) -> &'static str;

    /// Human readable name of the thing being waited on.
    fn describe(&self) -> String;

    /// Fetch the current status once.
    async fn status(&mut self) -> Result<Self::Status, ServiceError>;

    /// Whether `status` is the state being waited for.
    fn is_target(&mut self, status: &Self::Status) -> bool;

    /// A terminal failure reason, if `status` can never lead to the target.
    fn failure(&mut self, _status: &Self::Status) -> Option<String> {
        None
    }
}

/// The status that satisfied the wait and how many checks it took.
#[derive(Debug)]
pub struct WaitOutcome<S> {
    pub polls: u32,
    pub status: S,
}

/// Check `probe` until it reaches its target, fails, or the budget runs out.
pub async fn wait_until<P>(
    probe: &mut P,
    policy: &WaitPolicy,
    shutdown: &CancellationToken,
) -> Result<WaitOutcome<P::Status>, PollError>
where
    P: StatusProbe + ?Sized,
{
    let label = probe.label();
    let what = probe.describe();
    let max_polls = policy.max_polls();
    let started = Instant::now();
    let mut last_status = String::from("unknown");

    let finish = |result: WaitResult, polls: u32| {
        emit!(WaitCompleted {
            target: label,
            result,
            polls,
        });
        emit!(WaitDuration {
            target: label,
            duration: started.elapsed(),
        });
    };

    for poll in 1..=max_polls {
        let fetched = tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("Shutdown requested while waiting for {}", what);
                finish(WaitResult::Cancelled, poll - 1);
                return Err(PollError::Cancelled { what });
            }

            result = probe.status() => result,
        };

        let status = match fetched {
            Ok(status) => status,
            Err(source) => {
                finish(WaitResult::Failed, poll);
                return Err(PollError::Status { what, source });
            }
        };
        debug!("{} is {} (check {}/{})", what, status, poll, max_polls);

        if probe.is_target(&status) {
            finish(WaitResult::Reached, poll);
            return Ok(WaitOutcome { polls: poll, status });
        }
        if let Some(reason) = probe.failure(&status) {
            finish(WaitResult::Failed, poll);
            return Err(PollError::Failed { what, reason });
        }
        last_status = status.to_string();

        if poll < max_polls {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown requested while waiting for {}", what);
                    finish(WaitResult::Cancelled, poll);
                    return Err(PollError::Cancelled { what });
                }

                _ = tokio::time::sleep(policy.interval()) => {}
            }
        }
    }

    warn!(
        "Gave up waiting for {} after {} checks, last status {}",
        what, max_polls, last_status
    );
    finish(WaitResult::TimedOut, max_polls);
    Err(PollError::Timeout {
        what,
        max_secs: policy.max_secs,
        polls: max_polls,
        last_status,
    })
}
