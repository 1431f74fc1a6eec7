//! Warehouse loader.
//!
//! Runs once per invocation, strictly in order and without resuming:
//!
//! 1. resolve the account to build role ARNs
//! 2. ensure the warehouse namespace and workgroup, wait for the workgroup
//! 3. ensure the catalog database and crawler, run a crawl and wait for it
//! 4. create the star schema tables if missing
//! 5. truncate every table, then bulk load each from its curated prefix
//!
//! Any failure aborts the remaining steps. Nothing is rolled back; the next
//! invocation starts from the top and finds the ensured resources in place.

use async_trait::async_trait;
use snafu::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cloud::{
    CatalogApi, CrawlOutcome, CrawlerState, CrawlerStatus, IdentityApi, LastCrawl, ResourceApi,
    SqlTarget, StatementId, StatementStatus, WarehouseApi, WorkgroupStatus,
};
use crate::config::{Config, role_arn};
use crate::emit;
use crate::error::{
    CrawlerStartSnafu, CrawlerStatusSnafu, CrawlerWaitSnafu, EnsureSnafu, IdentitySnafu,
    LoaderError, ServiceError, StatementSnafu, StatementWaitSnafu, WorkgroupWaitSnafu,
};
use crate::metrics::events::{StageInvoked, StatementSubmitted};
use crate::poll::{StatusProbe, wait_until};
use crate::resource::{EnsureOutcome, ResourceDescriptor, ResourceKind, ResourceSpec, ensure};
use crate::stage::{StageResponse, StatementPhase};
use crate::warehouse::{self, STAR_SCHEMA, TableDef};

/// Everything the loader calls.
pub trait LoaderApi: ResourceApi + CatalogApi + WarehouseApi + IdentityApi {}

impl<T> LoaderApi for T where T: ResourceApi + CatalogApi + WarehouseApi + IdentityApi + ?Sized {}

/// What a successful load did.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Each ensured resource and whether it had to be created.
    pub resources: Vec<(ResourceKind, String, EnsureOutcome)>,
    /// Submitted statements, in order.
    pub statements: Vec<StatementId>,
}

impl LoadReport {
    pub fn created(&self) -> usize {
        self.resources
            .iter()
            .filter(|(_, _, outcome)| *outcome != EnsureOutcome::Existing)
            .count()
    }
}

/// The loader stage.
pub struct Loader<'a, C: ?Sized> {
    cloud: &'a C,
    config: &'a Config,
    shutdown: CancellationToken,
}

impl<'a, C> Loader<'a, C>
where
    C: LoaderApi + ?Sized,
{
    pub fn new(cloud: &'a C, config: &'a Config, shutdown: CancellationToken) -> Self {
        Self {
            cloud,
            config,
            shutdown,
        }
    }

    /// Run the load and report the outcome as a stage response.
    pub async fn invoke(&self) -> StageResponse {
        let response = match self.run().await {
            Ok(report) => {
                info!(
                    "Data loaded into '{}' ({} resources created, {} statements)",
                    self.config.warehouse.workgroup,
                    report.created(),
                    report.statements.len()
                );
                StageResponse::success(format!(
                    "Loaded {} tables into {}",
                    STAR_SCHEMA.len(),
                    self.config.warehouse.workgroup
                ))
            }
            Err(e) => StageResponse::from_error("loader", &e),
        };
        emit!(StageInvoked {
            stage: "loader",
            status: response.status,
        });
        response
    }

    /// Run every step, stopping at the first failure.
    pub async fn run(&self) -> Result<LoadReport, LoaderError> {
        let config = self.config;
        let warehouse = &config.warehouse;
        let catalog = &config.catalog;
        let mut report = LoadReport::default();

        let account = self.cloud.account_id().await.context(IdentitySnafu)?;
        let copy_role = role_arn(&account, &warehouse.copy_role);
        let crawler_role = role_arn(&account, &catalog.crawler_role);

        self.ensure(
            &mut report,
            ResourceDescriptor::new(
                &warehouse.namespace,
                ResourceSpec::WarehouseNamespace {
                    admin_user: warehouse.admin_user.clone(),
                    admin_password: warehouse.admin_password.clone(),
                    iam_roles: vec![copy_role.clone()],
                },
            ),
        )
        .await?;
        self.ensure(
            &mut report,
            ResourceDescriptor::new(
                &warehouse.workgroup,
                ResourceSpec::WarehouseWorkgroup {
                    namespace: warehouse.namespace.clone(),
                    base_capacity: warehouse.base_capacity,
                },
            ),
        )
        .await?;

        info!("Waiting for workgroup '{}' to become available", warehouse.workgroup);
        let mut probe = WorkgroupProbe {
            cloud: self.cloud,
            name: &warehouse.workgroup,
        };
        wait_until(&mut probe, &warehouse.wait, &self.shutdown)
            .await
            .context(WorkgroupWaitSnafu {
                workgroup: warehouse.workgroup.clone(),
            })?;
        info!("Workgroup '{}' is available", warehouse.workgroup);

        self.ensure(
            &mut report,
            ResourceDescriptor::new(&catalog.database, ResourceSpec::CatalogDatabase),
        )
        .await?;
        self.ensure(
            &mut report,
            ResourceDescriptor::new(
                &catalog.crawler,
                ResourceSpec::Crawler {
                    role_arn: crawler_role,
                    database: catalog.database.clone(),
                    s3_target: config.bucket_url(&config.prefixes.curated),
                    table_prefix: catalog.table_prefix.clone(),
                },
            ),
        )
        .await?;
        self.crawl().await?;

        let target = SqlTarget {
            workgroup: warehouse.workgroup.clone(),
            database: warehouse.database.clone(),
        };
        if !warehouse.statements.wait_for_completion {
            warn!("Not waiting for statements; loads may still be running when this stage reports success");
        }
        for table in STAR_SCHEMA {
            let sql = warehouse::create_table_sql(table);
            self.statement(&mut report, &target, StatementPhase::Schema, table, &sql)
                .await?;
        }
        info!("Warehouse tables ensured");
        for table in STAR_SCHEMA {
            let sql = warehouse::truncate_sql(table);
            self.statement(&mut report, &target, StatementPhase::Truncate, table, &sql)
                .await?;
        }
        for table in STAR_SCHEMA {
            let source = config.bucket_url(&config.curated_prefix(table.name));
            let sql = warehouse::copy_sql(table, &source, &copy_role);
            self.statement(&mut report, &target, StatementPhase::Load, table, &sql)
                .await?;
        }

        Ok(report)
    }

    async fn ensure(&self, report: &mut LoadReport, descriptor: ResourceDescriptor) -> Result<(), LoaderError> {
        let ensured = ensure(self.cloud, &descriptor).await.context(EnsureSnafu)?;
        report
            .resources
            .push((descriptor.kind(), descriptor.name, ensured.outcome));
        Ok(())
    }

    /// Start a crawl and wait until that crawl, not an earlier one, has finished.
    async fn crawl(&self) -> Result<(), LoaderError> {
        let catalog = &self.config.catalog;
        let crawler = catalog.crawler.as_str();

        let before = self
            .cloud
            .crawler_status(crawler)
            .await
            .context(CrawlerStatusSnafu { crawler })?;
        self.cloud
            .start_crawler(crawler)
            .await
            .context(CrawlerStartSnafu { crawler })?;
        info!("Started crawler '{}', waiting for it to finish", crawler);

        let mut probe = CrawlProbe {
            cloud: self.cloud,
            name: crawler,
            baseline: before.last_crawl.map(|c| c.started_at),
            seen_active: false,
        };
        wait_until(&mut probe, &catalog.wait, &self.shutdown)
            .await
            .context(CrawlerWaitSnafu { crawler })?;
        info!("Crawler '{}' finished", crawler);
        Ok(())
    }

    async fn statement(
        &self,
        report: &mut LoadReport,
        target: &SqlTarget,
        phase: StatementPhase,
        table: &TableDef,
        sql: &str,
    ) -> Result<(), LoaderError> {
        let id = self
            .cloud
            .execute_statement(target, sql)
            .await
            .context(StatementSnafu {
                phase,
                table: table.name,
            })?;
        emit!(StatementSubmitted { phase });
        info!("Submitted {} statement for {} (id {})", phase, table.name, id);

        if self.config.warehouse.statements.wait_for_completion {
            let mut probe = StatementProbe {
                cloud: self.cloud,
                id: &id,
                phase,
                table: table.name,
            };
            wait_until(&mut probe, &self.config.warehouse.statements.wait, &self.shutdown)
                .await
                .context(StatementWaitSnafu {
                    phase,
                    table: table.name,
                })?;
        }
        report.statements.push(id);
        Ok(())
    }
}

struct WorkgroupProbe<'a, C: ?Sized> {
    cloud: &'a C,
    name: &'a str,
}

#[async_trait]
impl<C> StatusProbe for WorkgroupProbe<'_, C>
where
    C: WarehouseApi + ?Sized,
{
    type Status = WorkgroupStatus;

    fn label(&self) -> &'static str {
        "workgroup"
    }

    fn describe(&self) -> String {
        format!("workgroup '{}'", self.name)
    }

    async fn status(&mut self) -> Result<WorkgroupStatus, ServiceError> {
        self.cloud.workgroup_status(self.name).await
    }

    fn is_target(&mut self, status: &WorkgroupStatus) -> bool {
        *status == WorkgroupStatus::Available
    }

    fn failure(&mut self, status: &WorkgroupStatus) -> Option<String> {
        match status {
            WorkgroupStatus::Failed => Some("workgroup provisioning failed".to_string()),
            WorkgroupStatus::Deleting => Some("workgroup is being deleted".to_string()),
            _ => None,
        }
    }
}

/// Waits for the crawl started by this invocation.
///
/// A crawler reports READY both before a freshly started crawl is picked up and
/// after it has finished. READY only counts once RUNNING or STOPPING has been
/// observed, or once the last crawl differs from the one recorded before start.
struct CrawlProbe<'a, C: ?Sized> {
    cloud: &'a C,
    name: &'a str,
    baseline: Option<i64>,
    seen_active: bool,
}

impl<C: ?Sized> CrawlProbe<'_, C> {
    fn finished(&mut self, status: &CrawlerStatus) -> bool {
        match status.state {
            CrawlerState::Running | CrawlerState::Stopping => {
                self.seen_active = true;
                false
            }
            CrawlerState::Ready => {
                self.seen_active
                    || status
                        .last_crawl
                        .as_ref()
                        .is_some_and(|crawl| Some(crawl.started_at) != self.baseline)
            }
            CrawlerState::Other(_) => false,
        }
    }

    /// The last crawl, if it is not the one recorded before start.
    fn new_crawl<'s>(&self, status: &'s CrawlerStatus) -> Option<&'s LastCrawl> {
        status
            .last_crawl
            .as_ref()
            .filter(|crawl| Some(crawl.started_at) != self.baseline)
    }

    /// Only a new crawl can fail this wait; an earlier failure is not ours.
    fn crawl_failed(&self, status: &CrawlerStatus) -> bool {
        self.new_crawl(status).is_some_and(|crawl| {
            matches!(crawl.outcome, CrawlOutcome::Failed | CrawlOutcome::Cancelled)
        })
    }
}

#[async_trait]
impl<C> StatusProbe for CrawlProbe<'_, C>
where
    C: CatalogApi + ?Sized,
{
    type Status = CrawlerStatus;

    fn label(&self) -> &'static str {
        "crawler"
    }

    fn describe(&self) -> String {
        format!("crawler '{}'", self.name)
    }

    async fn status(&mut self) -> Result<CrawlerStatus, ServiceError> {
        self.cloud.crawler_status(self.name).await
    }

    fn is_target(&mut self, status: &CrawlerStatus) -> bool {
        self.finished(status) && !self.crawl_failed(status)
    }

    fn failure(&mut self, status: &CrawlerStatus) -> Option<String> {
        if !(self.finished(status) && self.crawl_failed(status)) {
            return None;
        }
        let crawl = self.new_crawl(status)?;
        Some(match &crawl.message {
            Some(message) => format!("crawl ended {:?}: {}", crawl.outcome, message),
            None => format!("crawl ended {:?}", crawl.outcome),
        })
    }
}

struct StatementProbe<'a, C: ?Sized> {
    cloud: &'a C,
    id: &'a str,
    phase: StatementPhase,
    table: &'static str,
}

#[async_trait]
impl<C> StatusProbe for StatementProbe<'_, C>
where
    C: WarehouseApi + ?Sized,
{
    type Status = StatementStatus;

    fn label(&self) -> &'static str {
        "statement"
    }

    fn describe(&self) -> String {
        format!("{} statement {} for {}", self.phase, self.id, self.table)
    }

    async fn status(&mut self) -> Result<StatementStatus, ServiceError> {
        self.cloud.statement_status(self.id).await
    }

    fn is_target(&mut self, status: &StatementStatus) -> bool {
        *status == StatementStatus::Finished
    }

    fn failure(&mut self, status: &StatementStatus) -> Option<String> {
        match status {
            StatementStatus::Failed(message) => Some(message.clone()),
            StatementStatus::Aborted => Some("statement was aborted".to_string()),
            _ => None,
        }
    }
}
