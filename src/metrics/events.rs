//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in a stage. Events
//! implement the `InternalEvent` trait which records the corresponding metric.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

use crate::resource::{EnsureOutcome, ResourceKind};
use crate::stage::{ResponseStatus, StatementPhase};

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when a stage finishes an invocation.
pub struct StageInvoked {
    pub stage: &'static str,
    pub status: ResponseStatus,
}

impl InternalEvent for StageInvoked {
    fn emit(self) {
        trace!(stage = self.stage, status = self.status.as_str(), "Stage invoked");
        counter!(
            "sleet_stage_invocations_total",
            "stage" => self.stage,
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted when a batch job run is started.
pub struct JobRunStarted {
    pub job: String,
}

impl InternalEvent for JobRunStarted {
    fn emit(self) {
        trace!(job = %self.job, "Job run started");
        counter!("sleet_job_runs_started_total", "job" => self.job).increment(1);
    }
}

/// Event emitted when an object notification does not start a job.
pub struct NotificationSkipped {
    pub reason: &'static str,
}

impl InternalEvent for NotificationSkipped {
    fn emit(self) {
        trace!(reason = self.reason, "Notification skipped");
        counter!("sleet_notifications_skipped_total", "reason" => self.reason).increment(1);
    }
}

/// Event emitted when a resource has been ensured.
pub struct ResourceEnsured {
    pub kind: ResourceKind,
    pub outcome: EnsureOutcome,
}

impl InternalEvent for ResourceEnsured {
    fn emit(self) {
        trace!(
            kind = self.kind.as_str(),
            outcome = self.outcome.as_str(),
            "Resource ensured"
        );
        counter!(
            "sleet_resources_ensured_total",
            "kind" => self.kind.as_str(),
            "outcome" => self.outcome.as_str()
        )
        .increment(1);
    }
}

/// How a bounded wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Reached,
    Failed,
    TimedOut,
    Cancelled,
}

impl WaitResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitResult::Reached => "reached",
            WaitResult::Failed => "failed",
            WaitResult::TimedOut => "timed_out",
            WaitResult::Cancelled => "cancelled",
        }
    }
}

/// Event emitted when a bounded wait ends.
pub struct WaitCompleted {
    pub target: &'static str,
    pub result: WaitResult,
    pub polls: u32,
}

impl InternalEvent for WaitCompleted {
    fn emit(self) {
        trace!(
            target = self.target,
            result = self.result.as_str(),
            polls = self.polls,
            "Wait completed"
        );
        counter!(
            "sleet_waits_total",
            "target" => self.target,
            "result" => self.result.as_str()
        )
        .increment(1);
        counter!("sleet_wait_polls_total", "target" => self.target).increment(u64::from(self.polls));
    }
}

/// Event emitted with the wall time a bounded wait took.
pub struct WaitDuration {
    pub target: &'static str,
    pub duration: Duration,
}

impl InternalEvent for WaitDuration {
    fn emit(self) {
        trace!(
            target = self.target,
            duration_ms = self.duration.as_millis(),
            "Wait duration"
        );
        histogram!("sleet_wait_duration_seconds", "target" => self.target)
            .record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a SQL statement is submitted to the warehouse.
pub struct StatementSubmitted {
    pub phase: StatementPhase,
}

impl InternalEvent for StatementSubmitted {
    fn emit(self) {
        trace!(phase = self.phase.as_str(), "Statement submitted");
        counter!("sleet_statements_submitted_total", "phase" => self.phase.as_str()).increment(1);
    }
}
