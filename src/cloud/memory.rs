//! In-process implementation of every service seam.
//!
//! Keeps resources, job runs, crawls, statements and wiring in memory and
//! records each call, so stages can be exercised end to end without an
//! account. Used by the test suite and by the `plan` command.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{
    CatalogApi, CrawlOutcome, CrawlerState, CrawlerStatus, FunctionNotification, IdentityApi,
    InvokeGrant, JobApi, JobRunId, LastCrawl, ResourceApi, SqlTarget, StatementId,
    StatementStatus, WarehouseApi, WiringApi, WorkgroupStatus,
};
use crate::error::{ServiceError, ServiceErrorKind};
use crate::resource::{ResourceDescriptor, ResourceId, ResourceKind, ResourceSpec};

pub const ACCOUNT_ID: &str = "123456789012";
const REGION: &str = "us-east-1";

/// A recorded service call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetResource { kind: ResourceKind, name: String },
    CreateResource { kind: ResourceKind, name: String },
    StartJobRun {
        job: String,
        arguments: BTreeMap<String, String>,
    },
    StartCrawler { name: String },
    CrawlerStatus { name: String },
    WorkgroupStatus { name: String },
    ExecuteStatement { sql: String },
    StatementStatus { id: String },
    AccountId,
    FunctionArn { function: String },
    AddInvokePermission { function: String, statement_id: String },
    BucketNotifications { bucket: String },
    PutBucketNotification { bucket: String, id: String },
    PutRuleTarget { rule: String, function_arn: String },
}

#[derive(Debug)]
struct WorkgroupSim {
    /// Status checks that still report CREATING; `None` never becomes available.
    creating_polls: Option<u32>,
}

#[derive(Debug)]
struct CrawlerSim {
    state: CrawlerState,
    running_polls: u32,
    last_crawl: Option<LastCrawl>,
    /// Crawl in progress, reported as the last crawl once it finishes.
    pending: Option<LastCrawl>,
}

#[derive(Debug)]
struct StatementSim {
    pending_polls: u32,
    terminal: StatementStatus,
}

#[derive(Debug, Default)]
struct State {
    resources: BTreeMap<(ResourceKind, String), ResourceId>,
    calls: Vec<Call>,
    races: HashSet<(ResourceKind, String)>,
    create_failures: HashMap<ResourceKind, ServiceErrorKind>,
    get_failures: HashMap<ResourceKind, ServiceErrorKind>,
    workgroups: HashMap<String, WorkgroupSim>,
    crawlers: HashMap<String, CrawlerSim>,
    statements: HashMap<StatementId, StatementSim>,
    permissions: HashSet<(String, String)>,
    notifications: HashMap<String, Vec<FunctionNotification>>,
    rule_targets: BTreeMap<String, (String, String)>,
    clock: i64,
    next_id: u64,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:04}", self.next_id)
    }

    fn insert_resource(&mut self, kind: ResourceKind, name: &str, creating_polls: Option<u32>) -> ResourceId {
        let id = memory_id(kind, name);
        self.resources.insert((kind, name.to_string()), id.clone());
        match kind {
            ResourceKind::WarehouseWorkgroup => {
                self.workgroups
                    .insert(name.to_string(), WorkgroupSim { creating_polls });
            }
            ResourceKind::Crawler => {
                self.crawlers.insert(
                    name.to_string(),
                    CrawlerSim {
                        state: CrawlerState::Ready,
                        running_polls: 0,
                        last_crawl: None,
                        pending: None,
                    },
                );
            }
            _ => {}
        }
        id
    }

    fn has(&self, kind: ResourceKind, name: &str) -> bool {
        self.resources.contains_key(&(kind, name.to_string()))
    }
}

fn memory_id(kind: ResourceKind, name: &str) -> ResourceId {
    match kind {
        ResourceKind::Role => ResourceId::new(format!("arn:aws:iam::{ACCOUNT_ID}:role/{name}")),
        ResourceKind::ScheduleRule => ResourceId::new(format!(
            "arn:aws:events:{REGION}:{ACCOUNT_ID}:rule/{name}"
        )),
        _ => ResourceId::new(name),
    }
}

fn not_found(operation: &'static str, what: &str) -> ServiceError {
    ServiceError::new(ServiceErrorKind::NotFound, operation, format!("{what} not found"))
}

/// In-memory cloud.
#[derive(Debug)]
pub struct MemoryCloud {
    state: Mutex<State>,
    workgroup_polls: Option<u32>,
    crawl_polls: u32,
    crawl_outcome: CrawlOutcome,
    statement_polls: u32,
    failing_sql: Vec<String>,
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCloud {
    /// Resources become ready immediately and every statement succeeds.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            workgroup_polls: Some(0),
            crawl_polls: 0,
            crawl_outcome: CrawlOutcome::Succeeded,
            statement_polls: 0,
            failing_sql: Vec::new(),
        }
    }

    /// Newly created workgroups report CREATING for `polls` status checks.
    pub fn with_workgroup_provisioning_polls(mut self, polls: u32) -> Self {
        self.workgroup_polls = Some(polls);
        self
    }

    /// Newly created workgroups never become available.
    pub fn with_stuck_workgroups(mut self) -> Self {
        self.workgroup_polls = None;
        self
    }

    /// Crawls report RUNNING until the `polls`-th status check. Zero finishes on start.
    pub fn with_crawl_polls(mut self, polls: u32) -> Self {
        self.crawl_polls = polls;
        self
    }

    pub fn with_crawl_outcome(mut self, outcome: CrawlOutcome) -> Self {
        self.crawl_outcome = outcome;
        self
    }

    /// Statements report STARTED for `polls` status checks before finishing.
    pub fn with_statement_polls(mut self, polls: u32) -> Self {
        self.statement_polls = polls;
        self
    }

    /// Statements whose text contains `pattern` end FAILED.
    pub fn with_failing_statements(mut self, pattern: impl Into<String>) -> Self {
        self.failing_sql.push(pattern.into());
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a resource as if it had been created earlier. Workgroups are available.
    pub fn seed_resource(&self, kind: ResourceKind, name: &str) -> ResourceId {
        self.state().insert_resource(kind, name, Some(0))
    }

    /// The next create of `(kind, name)` loses a race: another caller creates it first.
    pub fn race_next_create(&self, kind: ResourceKind, name: &str) {
        self.state().races.insert((kind, name.to_string()));
    }

    /// The next create of any `kind` resource fails with `error`.
    pub fn fail_next_create(&self, kind: ResourceKind, error: ServiceErrorKind) {
        self.state().create_failures.insert(kind, error);
    }

    /// The next lookup of any `kind` resource fails with `error`.
    pub fn fail_next_get(&self, kind: ResourceKind, error: ServiceErrorKind) {
        self.state().get_failures.insert(kind, error);
    }

    /// Put an existing crawler into a crawl that does not finish.
    pub fn set_crawler_running(&self, name: &str) {
        let mut state = self.state();
        if let Some(crawler) = state.crawlers.get_mut(name) {
            crawler.state = CrawlerState::Running;
            crawler.running_polls = u32::MAX;
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn resource_id(&self, kind: ResourceKind, name: &str) -> Option<ResourceId> {
        self.state().resources.get(&(kind, name.to_string())).cloned()
    }

    /// Resources created through `create_resource`, in order.
    pub fn created(&self) -> Vec<(ResourceKind, String)> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::CreateResource { kind, name } => Some((*kind, name.clone())),
                _ => None,
            })
            .collect()
    }

    /// Submitted SQL, in order.
    pub fn statements(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::ExecuteStatement { sql } => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    /// Started job runs, in order.
    pub fn job_runs(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::StartJobRun { job, arguments } => Some((job.clone(), arguments.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn notifications(&self, bucket: &str) -> Vec<FunctionNotification> {
        self.state()
            .notifications
            .get(bucket)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_permission(&self, function: &str, statement_id: &str) -> bool {
        self.state()
            .permissions
            .contains(&(function.to_string(), statement_id.to_string()))
    }

    /// `(target id, function arn)` a rule points at.
    pub fn rule_target(&self, rule: &str) -> Option<(String, String)> {
        self.state().rule_targets.get(rule).cloned()
    }
}

#[async_trait]
impl ResourceApi for MemoryCloud {
    async fn get_resource(&self, kind: ResourceKind, name: &str) -> Result<ResourceId, ServiceError> {
        let mut state = self.state();
        state.calls.push(Call::GetResource {
            kind,
            name: name.to_string(),
        });
        if let Some(error) = state.get_failures.remove(&kind) {
            return Err(ServiceError::new(error, "GetResource", format!("injected failure for {name}")));
        }
        state
            .resources
            .get(&(kind, name.to_string()))
            .cloned()
            .ok_or_else(|| not_found("GetResource", name))
    }

    async fn create_resource(&self, descriptor: &ResourceDescriptor) -> Result<ResourceId, ServiceError> {
        let kind = descriptor.kind();
        let name = descriptor.name.as_str();
        let mut state = self.state();
        state.calls.push(Call::CreateResource {
            kind,
            name: name.to_string(),
        });

        if let Some(error) = state.create_failures.remove(&kind) {
            return Err(ServiceError::new(error, "CreateResource", format!("injected failure for {name}")));
        }
        if state.races.remove(&(kind, name.to_string())) {
            state.insert_resource(kind, name, Some(0));
        }
        if state.has(kind, name) {
            return Err(ServiceError::new(
                ServiceErrorKind::AlreadyExists,
                "CreateResource",
                format!("{kind} {name} already exists"),
            ));
        }
        if let ResourceSpec::WarehouseWorkgroup { namespace, .. } = &descriptor.spec {
            if !state.has(ResourceKind::WarehouseNamespace, namespace) {
                return Err(not_found("CreateWorkgroup", namespace));
            }
        }

        Ok(state.insert_resource(kind, name, self.workgroup_polls))
    }
}

#[async_trait]
impl JobApi for MemoryCloud {
    async fn start_job_run(
        &self,
        job: &str,
        arguments: &BTreeMap<String, String>,
    ) -> Result<JobRunId, ServiceError> {
        let mut state = self.state();
        state.calls.push(Call::StartJobRun {
            job: job.to_string(),
            arguments: arguments.clone(),
        });
        if !state.has(ResourceKind::BatchJob, job) {
            return Err(not_found("StartJobRun", job));
        }
        Ok(state.next_id("jr"))
    }
}

#[async_trait]
impl CatalogApi for MemoryCloud {
    async fn start_crawler(&self, name: &str) -> Result<(), ServiceError> {
        let mut state = self.state();
        state.calls.push(Call::StartCrawler {
            name: name.to_string(),
        });
        state.clock += 60;
        let started_at = state.clock;
        let crawler = state
            .crawlers
            .get_mut(name)
            .ok_or_else(|| not_found("StartCrawler", name))?;
        if crawler.state != CrawlerState::Ready {
            return Err(ServiceError::new(
                ServiceErrorKind::Busy,
                "StartCrawler",
                format!("crawler {name} is {}", crawler.state),
            ));
        }

        let crawl = LastCrawl {
            started_at,
            outcome: self.crawl_outcome.clone(),
            message: match self.crawl_outcome {
                CrawlOutcome::Succeeded => None,
                _ => Some("crawl did not succeed".to_string()),
            },
        };
        if self.crawl_polls == 0 {
            crawler.last_crawl = Some(crawl);
        } else {
            crawler.state = CrawlerState::Running;
            crawler.running_polls = self.crawl_polls;
            crawler.pending = Some(crawl);
        }
        Ok(())
    }

    async fn crawler_status(&self, name: &str) -> Result<CrawlerStatus, ServiceError> {
        let mut state = self.state();
        state.calls.push(Call::CrawlerStatus {
            name: name.to_string(),
        });
        let crawler = state
            .crawlers
            .get_mut(name)
            .ok_or_else(|| not_found("GetCrawler", name))?;
        if crawler.state == CrawlerState::Running {
            crawler.running_polls = crawler.running_polls.saturating_sub(1);
            if crawler.running_polls == 0 {
                crawler.state = CrawlerState::Ready;
                if let Some(crawl) = crawler.pending.take() {
                    crawler.last_crawl = Some(crawl);
                }
            }
        }
        Ok(CrawlerStatus {
            state: crawler.state.clone(),
            last_crawl: crawler.last_crawl.clone(),
        })
    }
}

#[async_trait]
impl WarehouseApi for MemoryCloud {
    async fn workgroup_status(&self, name: &str) -> Result<WorkgroupStatus, ServiceError> {
        let mut state = self.state();
        state.calls.push(Call::WorkgroupStatus {
            name: name.to_string(),
        });
        let workgroup = state
            .workgroups
            .get_mut(name)
            .ok_or_else(|| not_found("GetWorkgroup", name))?;
        match workgroup.creating_polls.as_mut() {
            None => Ok(WorkgroupStatus::Creating),
            Some(0) => Ok(WorkgroupStatus::Available),
            Some(left) => {
                *left -= 1;
                Ok(WorkgroupStatus::Creating)
            }
        }
    }

    async fn execute_statement(&self, target: &SqlTarget, sql: &str) -> Result<StatementId, ServiceError> {
        let mut state = self.state();
        state.calls.push(Call::ExecuteStatement {
            sql: sql.to_string(),
        });
        if !state.has(ResourceKind::WarehouseWorkgroup, &target.workgroup) {
            return Err(not_found("ExecuteStatement", &target.workgroup));
        }

        let terminal = match self.failing_sql.iter().find(|p| sql.contains(p.as_str())) {
            Some(pattern) => StatementStatus::Failed(format!("statement matching '{pattern}' failed")),
            None => StatementStatus::Finished,
        };
        let id = state.next_id("stmt");
        state.statements.insert(
            id.clone(),
            StatementSim {
                pending_polls: self.statement_polls,
                terminal,
            },
        );
        Ok(id)
    }

    async fn statement_status(&self, id: &str) -> Result<StatementStatus, ServiceError> {
        let mut state = self.state();
        state.calls.push(Call::StatementStatus { id: id.to_string() });
        let statement = state
            .statements
            .get_mut(id)
            .ok_or_else(|| not_found("DescribeStatement", id))?;
        if statement.pending_polls > 0 {
            statement.pending_polls -= 1;
            return Ok(StatementStatus::Started);
        }
        Ok(statement.terminal.clone())
    }
}

#[async_trait]
impl IdentityApi for MemoryCloud {
    async fn account_id(&self) -> Result<String, ServiceError> {
        self.state().calls.push(Call::AccountId);
        Ok(ACCOUNT_ID.to_string())
    }
}

#[async_trait]
impl WiringApi for MemoryCloud {
    async fn function_arn(&self, function: &str) -> Result<String, ServiceError> {
        self.state().calls.push(Call::FunctionArn {
            function: function.to_string(),
        });
        Ok(format!(
            "arn:aws:lambda:{REGION}:{ACCOUNT_ID}:function:{function}"
        ))
    }

    async fn add_invoke_permission(&self, grant: &InvokeGrant) -> Result<(), ServiceError> {
        let mut state = self.state();
        state.calls.push(Call::AddInvokePermission {
            function: grant.function.clone(),
            statement_id: grant.statement_id.clone(),
        });
        let key = (grant.function.clone(), grant.statement_id.clone());
        if !state.permissions.insert(key) {
            return Err(ServiceError::new(
                ServiceErrorKind::AlreadyExists,
                "AddPermission",
                format!("statement id {} already exists", grant.statement_id),
            ));
        }
        Ok(())
    }

    async fn bucket_notifications(&self, bucket: &str) -> Result<Vec<FunctionNotification>, ServiceError> {
        let mut state = self.state();
        state.calls.push(Call::BucketNotifications {
            bucket: bucket.to_string(),
        });
        Ok(state.notifications.get(bucket).cloned().unwrap_or_default())
    }

    async fn put_bucket_notification(
        &self,
        bucket: &str,
        notification: &FunctionNotification,
    ) -> Result<(), ServiceError> {
        let mut state = self.state();
        state.calls.push(Call::PutBucketNotification {
            bucket: bucket.to_string(),
            id: notification.id.clone(),
        });
        let notifications = state.notifications.entry(bucket.to_string()).or_default();
        notifications.retain(|n| n.id != notification.id);
        notifications.push(notification.clone());
        Ok(())
    }

    async fn put_rule_target(&self, rule: &str, target_id: &str, function_arn: &str) -> Result<(), ServiceError> {
        let mut state = self.state();
        state.calls.push(Call::PutRuleTarget {
            rule: rule.to_string(),
            function_arn: function_arn.to_string(),
        });
        if !state.has(ResourceKind::ScheduleRule, rule) {
            return Err(not_found("PutTargets", rule));
        }
        state
            .rule_targets
            .insert(rule.to_string(), (target_id.to_string(), function_arn.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> SqlTarget {
        SqlTarget {
            workgroup: "dw-workgroup".to_string(),
            database: "dev".to_string(),
        }
    }

    #[tokio::test]
    async fn test_workgroup_requires_namespace() {
        let cloud = MemoryCloud::new();
        let descriptor = ResourceDescriptor::new(
            "dw-workgroup",
            ResourceSpec::WarehouseWorkgroup {
                namespace: "dw-namespace".to_string(),
                base_capacity: 8,
            },
        );

        let err = cloud.create_resource(&descriptor).await.unwrap_err();
        assert!(err.is_not_found());

        cloud.seed_resource(ResourceKind::WarehouseNamespace, "dw-namespace");
        cloud.create_resource(&descriptor).await.unwrap();
    }

    #[tokio::test]
    async fn test_workgroup_provisioning_polls() {
        let cloud = MemoryCloud::new().with_workgroup_provisioning_polls(2);
        cloud.seed_resource(ResourceKind::WarehouseNamespace, "dw-namespace");
        cloud
            .create_resource(&ResourceDescriptor::new(
                "dw-workgroup",
                ResourceSpec::WarehouseWorkgroup {
                    namespace: "dw-namespace".to_string(),
                    base_capacity: 8,
                },
            ))
            .await
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(cloud.workgroup_status("dw-workgroup").await.unwrap());
        }
        assert_eq!(
            seen,
            vec![
                WorkgroupStatus::Creating,
                WorkgroupStatus::Creating,
                WorkgroupStatus::Available
            ]
        );
    }

    #[tokio::test]
    async fn test_crawl_lifecycle() {
        let cloud = MemoryCloud::new().with_crawl_polls(2);
        cloud.seed_resource(ResourceKind::Crawler, "crawler");

        cloud.start_crawler("crawler").await.unwrap();
        let err = cloud.start_crawler("crawler").await.unwrap_err();
        assert_eq!(err.kind, ServiceErrorKind::Busy);

        let first = cloud.crawler_status("crawler").await.unwrap();
        assert_eq!(first.state, CrawlerState::Running);
        assert!(first.last_crawl.is_none());

        let second = cloud.crawler_status("crawler").await.unwrap();
        assert_eq!(second.state, CrawlerState::Ready);
        assert_eq!(
            second.last_crawl.map(|c| c.outcome),
            Some(CrawlOutcome::Succeeded)
        );
    }

    #[tokio::test]
    async fn test_failing_statement() {
        let cloud = MemoryCloud::new()
            .with_statement_polls(1)
            .with_failing_statements("COPY");
        cloud.seed_resource(ResourceKind::WarehouseWorkgroup, "dw-workgroup");

        let ok = cloud.execute_statement(&target(), "TRUNCATE t;").await.unwrap();
        let bad = cloud.execute_statement(&target(), "COPY t FROM 's3://b/'").await.unwrap();

        assert_eq!(cloud.statement_status(&ok).await.unwrap(), StatementStatus::Started);
        assert_eq!(cloud.statement_status(&ok).await.unwrap(), StatementStatus::Finished);
        cloud.statement_status(&bad).await.unwrap();
        assert!(matches!(
            cloud.statement_status(&bad).await.unwrap(),
            StatementStatus::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_job_run_requires_job() {
        let cloud = MemoryCloud::new();
        let err = cloud
            .start_job_run("glue-clean-transform", &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        cloud.seed_resource(ResourceKind::BatchJob, "glue-clean-transform");
        let run = cloud
            .start_job_run("glue-clean-transform", &BTreeMap::new())
            .await
            .unwrap();
        assert!(run.starts_with("jr-"));
    }

    #[tokio::test]
    async fn test_duplicate_permission_conflicts() {
        let cloud = MemoryCloud::new();
        let grant = InvokeGrant {
            function: "f".to_string(),
            statement_id: "s3invoke".to_string(),
            principal: "s3.amazonaws.com".to_string(),
            source_arn: "arn:aws:s3:::b".to_string(),
            source_account: None,
        };

        cloud.add_invoke_permission(&grant).await.unwrap();
        let err = cloud.add_invoke_permission(&grant).await.unwrap_err();
        assert!(err.is_already_exists());
        assert!(cloud.has_permission("f", "s3invoke"));
    }
}
