//! Pipeline stages.
//!
//! The two triggers are pure planners: they turn the events of one invocation
//! into [`Effect`]s, which [`invoke`] then executes against the batch engine.
//! The loader is a single sequential procedure (see [`loader`]). Every stage
//! reports a [`StageResponse`] instead of failing the invocation.

pub mod loader;
pub mod object_written;
pub mod schedule;

pub use loader::{LoadReport, Loader, LoaderApi};
pub use object_written::{KeyFilter, ObjectWrittenTrigger};
pub use schedule::ScheduleTrigger;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{error, info};

use crate::cloud::{JobApi, JobRunId};
use crate::emit;
use crate::error::{EventError, EventJsonSnafu, StageError, StartJobSnafu};
use crate::metrics::events::{JobRunStarted, NotificationSkipped, StageInvoked};

/// What a stage is invoked with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEvent {
    /// Periodic timer; carries no payload.
    TimerTick,
    /// An object was written to storage.
    ObjectWritten { bucket: String, key: String },
}

#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(rename = "Records")]
    records: Vec<NotificationRecord>,
}

#[derive(Debug, Deserialize)]
struct NotificationRecord {
    s3: StorageEntity,
}

#[derive(Debug, Deserialize)]
struct StorageEntity {
    bucket: BucketEntity,
    object: ObjectEntity,
}

#[derive(Debug, Deserialize)]
struct BucketEntity {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ObjectEntity {
    key: String,
}

/// Parse a raw invocation payload.
///
/// A storage notification (an object with a `Records` array) yields one
/// `ObjectWritten` per record. Any other payload, including an empty one, is a
/// single `TimerTick`.
pub fn parse_events(payload: &str) -> Result<Vec<StageEvent>, EventError> {
    if payload.trim().is_empty() {
        return Ok(vec![StageEvent::TimerTick]);
    }

    let value: serde_json::Value = serde_json::from_str(payload).context(EventJsonSnafu)?;
    if value.get("Records").is_none() {
        return Ok(vec![StageEvent::TimerTick]);
    }

    let notification: Notification = serde_json::from_value(value).context(EventJsonSnafu)?;
    Ok(notification
        .records
        .into_iter()
        .map(|record| StageEvent::ObjectWritten {
            bucket: record.s3.bucket.name,
            key: record.s3.object.key,
        })
        .collect())
}

/// Why an event did not start a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotAnObject,
    PrefixMismatch,
    SuffixMismatch,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotAnObject => "not_an_object",
            SkipReason::PrefixMismatch => "prefix_mismatch",
            SkipReason::SuffixMismatch => "suffix_mismatch",
        }
    }
}

/// A side effect planned by a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StartJob {
        job: String,
        arguments: BTreeMap<String, String>,
    },
    Skip {
        subject: String,
        reason: SkipReason,
    },
}

/// A stage that decides from its events which jobs to start.
pub trait Trigger {
    /// Stage name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Plan the effects of one invocation. Pure.
    fn plan(&self, events: &[StageEvent]) -> Vec<Effect>;

    /// Whether the invocation payload matters. Stages that ignore it always
    /// plan from a single timer tick.
    fn reads_payload(&self) -> bool {
        true
    }
}

/// Execute planned effects in order, stopping at the first failed job start.
///
/// Runs started before a failure stay in `run_ids`.
pub async fn execute_effects<J>(
    jobs: &J,
    effects: Vec<Effect>,
    run_ids: &mut Vec<JobRunId>,
) -> Result<(), StageError>
where
    J: JobApi + ?Sized,
{
    for effect in effects {
        match effect {
            Effect::Skip { subject, reason } => {
                info!("Skipping {} ({})", subject, reason.as_str());
                emit!(NotificationSkipped {
                    reason: reason.as_str(),
                });
            }
            Effect::StartJob { job, arguments } => {
                info!("Starting job '{}'", job);
                let run_id = jobs
                    .start_job_run(&job, &arguments)
                    .await
                    .context(StartJobSnafu { job: job.clone() })?;
                info!("Job '{}' started, run id {}", job, run_id);
                emit!(JobRunStarted { job });
                run_ids.push(run_id);
            }
        }
    }
    Ok(())
}

/// Plan and execute one trigger invocation.
pub async fn invoke<T, J>(trigger: &T, jobs: &J, events: &[StageEvent]) -> StageResponse
where
    T: Trigger + ?Sized,
    J: JobApi + ?Sized,
{
    let stage = trigger.name();
    info!("{} invoked with {} event(s)", stage, events.len());

    let mut run_ids = Vec::new();
    let response = match execute_effects(jobs, trigger.plan(events), &mut run_ids).await {
        Ok(()) if run_ids.is_empty() => StageResponse::success("No job started"),
        Ok(()) => {
            StageResponse::success(format!("Started {} job run(s)", run_ids.len())).with_job_runs(run_ids)
        }
        // Runs that did start are still in flight.
        Err(e) => StageResponse::from_error(stage, &e).with_job_runs(run_ids),
    };
    emit!(StageInvoked {
        stage,
        status: response.status,
    });
    response
}

/// Parse a raw payload and invoke the trigger with it.
///
/// A payload that cannot be parsed becomes an error response rather than a
/// failed invocation.
pub async fn invoke_payload<T, J>(trigger: &T, jobs: &J, payload: &str) -> StageResponse
where
    T: Trigger + ?Sized,
    J: JobApi + ?Sized,
{
    if !trigger.reads_payload() {
        return invoke(trigger, jobs, &[StageEvent::TimerTick]).await;
    }
    match parse_events(payload) {
        Ok(events) => invoke(trigger, jobs, &events).await,
        Err(e) => {
            let response = StageResponse::from_error(trigger.name(), &e);
            emit!(StageInvoked {
                stage: trigger.name(),
                status: response.status,
            });
            response
        }
    }
}

/// Outcome reported by every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Success => "success",
            ResponseStatus::Error => "error",
        }
    }
}

/// Structured result of a stage invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub job_run_ids: Vec<JobRunId>,
}

impl StageResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: Some(message.into()),
            job_run_ids: Vec::new(),
        }
    }

    pub fn with_job_runs(mut self, job_run_ids: Vec<JobRunId>) -> Self {
        self.job_run_ids = job_run_ids;
        self
    }

    /// Log `error` with its full cause chain and turn it into an error response.
    pub fn from_error<E>(stage: &str, error: &E) -> Self
    where
        E: std::error::Error + 'static,
    {
        error!("{} failed: {}", stage, snafu::Report::from_error(error));
        Self {
            status: ResponseStatus::Error,
            message: Some(error_chain(error)),
            job_run_ids: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

/// `error: cause: cause ...` on one line.
fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Which group of loader statements a statement belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementPhase {
    Schema,
    Truncate,
    Load,
}

impl StatementPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementPhase::Schema => "schema",
            StatementPhase::Truncate => "truncate",
            StatementPhase::Load => "load",
        }
    }
}

impl fmt::Display for StatementPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
