//! Service seams for the cloud APIs the pipeline calls.
//!
//! Stages, the provisioner and the wiring script talk to these traits only.
//! [`aws::AwsCloud`] implements them against the real services;
//! [`memory::MemoryCloud`] implements them in process for tests and dry runs.

pub mod aws;
pub mod memory;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ServiceError;
use crate::resource::{ResourceDescriptor, ResourceId, ResourceKind};

/// Read and create named resources.
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// Look a resource up by name. Absence is reported as a not-found error.
    async fn get_resource(&self, kind: ResourceKind, name: &str) -> Result<ResourceId, ServiceError>;

    /// Create a resource. A name conflict is reported as an already-exists error.
    async fn create_resource(&self, descriptor: &ResourceDescriptor) -> Result<ResourceId, ServiceError>;
}

/// Identifier of a started batch job run.
pub type JobRunId = String;

/// Start batch job runs.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Start a run of `job` with the given arguments and return its run id.
    async fn start_job_run(
        &self,
        job: &str,
        arguments: &BTreeMap<String, String>,
    ) -> Result<JobRunId, ServiceError>;
}

/// Lifecycle state of a crawler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlerState {
    Ready,
    Running,
    Stopping,
    Other(String),
}

impl CrawlerState {
    pub fn parse(state: &str) -> Self {
        match state {
            "READY" => CrawlerState::Ready,
            "RUNNING" => CrawlerState::Running,
            "STOPPING" => CrawlerState::Stopping,
            other => CrawlerState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for CrawlerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlerState::Ready => f.write_str("READY"),
            CrawlerState::Running => f.write_str("RUNNING"),
            CrawlerState::Stopping => f.write_str("STOPPING"),
            CrawlerState::Other(s) => f.write_str(s),
        }
    }
}

/// Result of a finished crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlOutcome {
    Succeeded,
    Failed,
    Cancelled,
    Other(String),
}

impl CrawlOutcome {
    pub fn parse(status: &str) -> Self {
        match status {
            "SUCCEEDED" => CrawlOutcome::Succeeded,
            "FAILED" => CrawlOutcome::Failed,
            "CANCELLED" => CrawlOutcome::Cancelled,
            other => CrawlOutcome::Other(other.to_string()),
        }
    }
}

/// The most recent crawl a crawler reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastCrawl {
    /// Start time in epoch seconds.
    pub started_at: i64,
    pub outcome: CrawlOutcome,
    pub message: Option<String>,
}

/// Crawler state together with its last crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlerStatus {
    pub state: CrawlerState,
    pub last_crawl: Option<LastCrawl>,
}

impl fmt::Display for CrawlerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.state)
    }
}

/// Start crawlers and read their status.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Start a crawl. A crawl already in progress is reported as a busy error.
    async fn start_crawler(&self, name: &str) -> Result<(), ServiceError>;

    async fn crawler_status(&self, name: &str) -> Result<CrawlerStatus, ServiceError>;
}

/// Provisioning status of a warehouse workgroup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkgroupStatus {
    Creating,
    Available,
    Modifying,
    Deleting,
    Failed,
    Other(String),
}

impl WorkgroupStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "CREATING" => WorkgroupStatus::Creating,
            "AVAILABLE" => WorkgroupStatus::Available,
            "MODIFYING" => WorkgroupStatus::Modifying,
            "DELETING" => WorkgroupStatus::Deleting,
            "FAILED" => WorkgroupStatus::Failed,
            other => WorkgroupStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for WorkgroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkgroupStatus::Creating => f.write_str("CREATING"),
            WorkgroupStatus::Available => f.write_str("AVAILABLE"),
            WorkgroupStatus::Modifying => f.write_str("MODIFYING"),
            WorkgroupStatus::Deleting => f.write_str("DELETING"),
            WorkgroupStatus::Failed => f.write_str("FAILED"),
            WorkgroupStatus::Other(s) => f.write_str(s),
        }
    }
}

/// Where a SQL statement runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlTarget {
    pub workgroup: String,
    pub database: String,
}

/// Identifier of a submitted SQL statement.
pub type StatementId = String;

/// Execution status of a submitted statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementStatus {
    Submitted,
    Picked,
    Started,
    Finished,
    Failed(String),
    Aborted,
    Other(String),
}

impl fmt::Display for StatementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementStatus::Submitted => f.write_str("SUBMITTED"),
            StatementStatus::Picked => f.write_str("PICKED"),
            StatementStatus::Started => f.write_str("STARTED"),
            StatementStatus::Finished => f.write_str("FINISHED"),
            StatementStatus::Failed(_) => f.write_str("FAILED"),
            StatementStatus::Aborted => f.write_str("ABORTED"),
            StatementStatus::Other(s) => f.write_str(s),
        }
    }
}

/// Workgroup status and asynchronous SQL execution.
#[async_trait]
pub trait WarehouseApi: Send + Sync {
    async fn workgroup_status(&self, name: &str) -> Result<WorkgroupStatus, ServiceError>;

    /// Submit one statement. Returns as soon as it is accepted.
    async fn execute_statement(&self, target: &SqlTarget, sql: &str) -> Result<StatementId, ServiceError>;

    async fn statement_status(&self, id: &str) -> Result<StatementStatus, ServiceError>;
}

/// Resolve the calling account.
#[async_trait]
pub trait IdentityApi: Send + Sync {
    async fn account_id(&self) -> Result<String, ServiceError>;
}

/// Permission for a service principal to invoke a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeGrant {
    pub function: String,
    pub statement_id: String,
    pub principal: String,
    pub source_arn: String,
    pub source_account: Option<String>,
}

/// A bucket notification that invokes a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionNotification {
    pub id: String,
    pub function_arn: String,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
}

/// Grants, bucket notifications and schedule targets.
#[async_trait]
pub trait WiringApi: Send + Sync {
    async fn function_arn(&self, function: &str) -> Result<String, ServiceError>;

    /// Add an invoke permission. An existing statement id is reported as already-exists.
    async fn add_invoke_permission(&self, grant: &InvokeGrant) -> Result<(), ServiceError>;

    /// Function notifications currently configured on the bucket.
    async fn bucket_notifications(&self, bucket: &str) -> Result<Vec<FunctionNotification>, ServiceError>;

    /// Add a function notification, keeping every existing notification.
    async fn put_bucket_notification(
        &self,
        bucket: &str,
        notification: &FunctionNotification,
    ) -> Result<(), ServiceError>;

    /// Point a schedule rule at a function. Repeating the call is harmless.
    async fn put_rule_target(&self, rule: &str, target_id: &str, function_arn: &str) -> Result<(), ServiceError>;
}
