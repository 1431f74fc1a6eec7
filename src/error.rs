//! Error types for sleet using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase.

use snafu::prelude::*;
use std::fmt;

use crate::resource::ResourceKind;
use crate::stage::StatementPhase;

// ============ Service Errors ============

/// Classification of a failed cloud API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    /// The named resource does not exist.
    NotFound,
    /// A resource with that name already exists.
    AlreadyExists,
    /// The resource is busy with a conflicting operation (e.g. a crawl is running).
    Busy,
    /// The caller lacks permission.
    AccessDenied,
    /// Anything else: throttling, validation, transport, service faults.
    Other,
}

impl ServiceErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceErrorKind::NotFound => "not found",
            ServiceErrorKind::AlreadyExists => "already exists",
            ServiceErrorKind::Busy => "busy",
            ServiceErrorKind::AccessDenied => "access denied",
            ServiceErrorKind::Other => "service error",
        }
    }
}

impl fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call against an external service.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), display("{operation} failed ({kind}): {message}"))]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub operation: &'static str,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ServiceErrorKind, operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            operation,
            message: message.into(),
        }
    }

    /// Check if this error represents a "not found" condition.
    pub fn is_not_found(&self) -> bool {
        self.kind == ServiceErrorKind::NotFound
    }

    /// Check if this error represents an "already exists" conflict.
    pub fn is_already_exists(&self) -> bool {
        self.kind == ServiceErrorKind::AlreadyExists
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Bucket name is empty.
    #[snafu(display("Bucket name cannot be empty"))]
    EmptyBucket,

    /// Bucket name is not a valid S3 bucket name.
    #[snafu(display("Invalid bucket name: {bucket}"))]
    InvalidBucket { bucket: String },

    /// A required name is empty.
    #[snafu(display("{field} cannot be empty"))]
    EmptyName { field: &'static str },

    /// A storage prefix does not end with '/'.
    #[snafu(display("{field} must be a non-empty prefix ending with '/': {value:?}"))]
    InvalidPrefix { field: &'static str, value: String },

    /// A wait policy has a zero poll interval.
    #[snafu(display("{field}.interval_secs must be greater than zero"))]
    ZeroPollInterval { field: &'static str },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Provision Errors ============

/// Errors raised while ensuring a resource exists.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProvisionError {
    /// Looking the resource up failed for a reason other than "not found".
    #[snafu(display("Failed to look up {kind} '{name}'"))]
    Lookup {
        kind: ResourceKind,
        name: String,
        source: ServiceError,
    },

    /// Creating the resource failed.
    #[snafu(display("Failed to create {kind} '{name}'"))]
    Create {
        kind: ResourceKind,
        name: String,
        source: ServiceError,
    },

    /// A concurrent creator won the race but the resource could not be read back.
    #[snafu(display("Failed to re-read {kind} '{name}' after a concurrent create"))]
    Reread {
        kind: ResourceKind,
        name: String,
        source: ServiceError,
    },
}

// ============ Poll Errors ============

/// Errors raised by the bounded poller.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PollError {
    /// The target status was not reached within the wait budget.
    #[snafu(display(
        "Timed out waiting for {what} after {max_secs}s ({polls} polls, last status: {last_status})"
    ))]
    Timeout {
        what: String,
        max_secs: u64,
        polls: u32,
        last_status: String,
    },

    /// The awaited resource reached a terminal failure state.
    #[snafu(display("{what} failed: {reason}"))]
    Failed { what: String, reason: String },

    /// Fetching the status failed.
    #[snafu(display("Failed to fetch status of {what}"))]
    Status { what: String, source: ServiceError },

    /// Shutdown was requested while waiting.
    #[snafu(display("Shutdown requested while waiting for {what}"))]
    Cancelled { what: String },
}

// ============ Event Errors ============

/// Errors that can occur while reading a trigger payload.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EventError {
    /// Payload is not valid JSON or does not match the notification shape.
    #[snafu(display("Failed to parse event payload"))]
    EventJson { source: serde_json::Error },

    /// Failed to read the event payload.
    #[snafu(display("Failed to read event payload from {path}"))]
    ReadEvent {
        path: String,
        source: std::io::Error,
    },
}

// ============ Stage Errors ============

/// Errors raised by the trigger stages.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StageError {
    /// Starting a batch job run failed.
    #[snafu(display("Failed to start job '{job}'"))]
    StartJob { job: String, source: ServiceError },
}

// ============ Loader Errors ============

/// Errors raised by the warehouse loader, one variant per step.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LoaderError {
    /// Resolving the account identity failed.
    #[snafu(display("Failed to resolve account identity"))]
    Identity { source: ServiceError },

    /// Ensuring a warehouse or catalog resource failed.
    #[snafu(display("Failed to ensure loader resource"))]
    Ensure { source: ProvisionError },

    /// The workgroup never became available.
    #[snafu(display("Workgroup '{workgroup}' is not available"))]
    WorkgroupWait {
        workgroup: String,
        source: PollError,
    },

    /// Reading the crawler before starting it failed.
    #[snafu(display("Failed to read crawler '{crawler}'"))]
    CrawlerStatus {
        crawler: String,
        source: ServiceError,
    },

    /// Starting the crawler failed.
    #[snafu(display("Failed to start crawler '{crawler}'"))]
    CrawlerStart {
        crawler: String,
        source: ServiceError,
    },

    /// The crawl did not complete.
    #[snafu(display("Crawler '{crawler}' did not complete"))]
    CrawlerWait { crawler: String, source: PollError },

    /// Submitting a SQL statement failed.
    #[snafu(display("Failed to submit {phase} statement for {table}"))]
    Statement {
        phase: StatementPhase,
        table: String,
        source: ServiceError,
    },

    /// A submitted SQL statement did not finish.
    #[snafu(display("{phase} statement for {table} did not finish"))]
    StatementWait {
        phase: StatementPhase,
        table: String,
        source: PollError,
    },
}

// ============ Wiring Errors ============

/// Errors raised while wiring triggers to functions.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WiringError {
    /// Resolving the account identity failed.
    #[snafu(display("Failed to resolve account identity"))]
    WiringIdentity { source: ServiceError },

    /// Looking up a function ARN failed.
    #[snafu(display("Failed to look up function '{function}'"))]
    FunctionLookup {
        function: String,
        source: ServiceError,
    },

    /// Granting invoke permission failed.
    #[snafu(display("Failed to grant {principal} permission to invoke '{function}'"))]
    Permission {
        function: String,
        principal: String,
        source: ServiceError,
    },

    /// Reading or writing the bucket notification configuration failed.
    #[snafu(display("Failed to configure notifications on bucket '{bucket}'"))]
    Notification {
        bucket: String,
        source: ServiceError,
    },

    /// Ensuring the schedule rule failed.
    #[snafu(display("Failed to ensure schedule rule"))]
    ScheduleRule { source: ProvisionError },

    /// Pointing the schedule rule at its function failed.
    #[snafu(display("Failed to target rule '{rule}' at '{function}'"))]
    RuleTarget {
        rule: String,
        function: String,
        source: ServiceError,
    },
}

// ============ Setup Errors ============

/// Errors raised while ensuring roles and batch jobs.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SetupError {
    /// Resolving the account identity failed.
    #[snafu(display("Failed to resolve account identity"))]
    SetupIdentity { source: ServiceError },

    /// Ensuring a resource failed.
    #[snafu(display("Setup failed"))]
    SetupEnsure { source: ProvisionError },
}

// ============ CLI Error (top-level) ============

/// Top-level errors surfaced by the command line tool.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CliError {
    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Setup error.
    #[snafu(display("Setup error"))]
    Setup { source: SetupError },

    /// Wiring error.
    #[snafu(display("Wiring error"))]
    Wiring { source: WiringError },

    /// Failed to write the response.
    #[snafu(display("Failed to serialize response"))]
    Response { source: serde_json::Error },
}
