//! Batch jobs, catalog databases and crawlers.

use async_trait::async_trait;
use aws_sdk_glue::types::{
    CrawlerTargets, DatabaseInput, JobCommand, LastCrawlInfo, S3Target, WorkerType,
};
use std::collections::{BTreeMap, HashMap};

use super::{AwsCloud, classify, invalid, missing};
use crate::cloud::{
    CatalogApi, CrawlOutcome, CrawlerState, CrawlerStatus, JobApi, JobRunId, LastCrawl,
};
use crate::error::ServiceError;
use crate::resource::{BatchJobSpec, ResourceId};

/// Job arguments as Glue expects them: every key prefixed with `--`.
fn job_arguments(arguments: &BTreeMap<String, String>) -> HashMap<String, String> {
    arguments
        .iter()
        .map(|(key, value)| {
            let key = if key.starts_with("--") {
                key.clone()
            } else {
                format!("--{key}")
            };
            (key, value.clone())
        })
        .collect()
}

fn last_crawl(info: &LastCrawlInfo) -> Option<LastCrawl> {
    let started_at = info.start_time()?.secs();
    Some(LastCrawl {
        started_at,
        outcome: info
            .status()
            .map(|s| CrawlOutcome::parse(s.as_str()))
            .unwrap_or_else(|| CrawlOutcome::Other("UNKNOWN".to_string())),
        message: info.error_message().map(str::to_string),
    })
}

impl AwsCloud {
    pub(super) async fn get_job(&self, name: &str) -> Result<ResourceId, ServiceError> {
        self.glue
            .get_job()
            .job_name(name)
            .send()
            .await
            .map_err(|e| classify("GetJob", e))?;
        Ok(ResourceId::new(name))
    }

    pub(super) async fn create_job(&self, name: &str, job: &BatchJobSpec) -> Result<ResourceId, ServiceError> {
        let command = JobCommand::builder()
            .name("glueetl")
            .script_location(&job.script_location)
            .python_version("3")
            .build();
        self.glue
            .create_job()
            .name(name)
            .role(&job.role_arn)
            .command(command)
            .default_arguments("--TempDir", &job.temp_dir)
            .default_arguments("--job-language", "python")
            .glue_version(&job.glue_version)
            .worker_type(WorkerType::from(job.worker_type.as_str()))
            .number_of_workers(job.number_of_workers)
            .set_description(job.description.clone())
            .send()
            .await
            .map_err(|e| classify("CreateJob", e))?;
        Ok(ResourceId::new(name))
    }

    pub(super) async fn get_database(&self, name: &str) -> Result<ResourceId, ServiceError> {
        self.glue
            .get_database()
            .name(name)
            .send()
            .await
            .map_err(|e| classify("GetDatabase", e))?;
        Ok(ResourceId::new(name))
    }

    pub(super) async fn create_database(&self, name: &str) -> Result<ResourceId, ServiceError> {
        let input = DatabaseInput::builder()
            .name(name)
            .build()
            .map_err(|e| invalid("CreateDatabase", e))?;
        self.glue
            .create_database()
            .database_input(input)
            .send()
            .await
            .map_err(|e| classify("CreateDatabase", e))?;
        Ok(ResourceId::new(name))
    }

    pub(super) async fn get_crawler(&self, name: &str) -> Result<ResourceId, ServiceError> {
        self.glue
            .get_crawler()
            .name(name)
            .send()
            .await
            .map_err(|e| classify("GetCrawler", e))?;
        Ok(ResourceId::new(name))
    }

    pub(super) async fn create_crawler(
        &self,
        name: &str,
        role_arn: &str,
        database: &str,
        s3_target: &str,
        table_prefix: &str,
    ) -> Result<ResourceId, ServiceError> {
        let targets = CrawlerTargets::builder()
            .s3_targets(S3Target::builder().path(s3_target).build())
            .build();
        self.glue
            .create_crawler()
            .name(name)
            .role(role_arn)
            .database_name(database)
            .targets(targets)
            .table_prefix(table_prefix)
            .send()
            .await
            .map_err(|e| classify("CreateCrawler", e))?;
        Ok(ResourceId::new(name))
    }
}

#[async_trait]
impl JobApi for AwsCloud {
    async fn start_job_run(
        &self,
        job: &str,
        arguments: &BTreeMap<String, String>,
    ) -> Result<JobRunId, ServiceError> {
        let arguments = (!arguments.is_empty()).then(|| job_arguments(arguments));
        let output = self
            .glue
            .start_job_run()
            .job_name(job)
            .set_arguments(arguments)
            .send()
            .await
            .map_err(|e| classify("StartJobRun", e))?;
        output
            .job_run_id()
            .map(str::to_string)
            .ok_or_else(|| missing("StartJobRun", "job run id"))
    }
}

#[async_trait]
impl CatalogApi for AwsCloud {
    async fn start_crawler(&self, name: &str) -> Result<(), ServiceError> {
        self.glue
            .start_crawler()
            .name(name)
            .send()
            .await
            .map_err(|e| classify("StartCrawler", e))?;
        Ok(())
    }

    async fn crawler_status(&self, name: &str) -> Result<CrawlerStatus, ServiceError> {
        let output = self
            .glue
            .get_crawler()
            .name(name)
            .send()
            .await
            .map_err(|e| classify("GetCrawler", e))?;
        let crawler = output
            .crawler()
            .ok_or_else(|| missing("GetCrawler", "crawler"))?;
        Ok(CrawlerStatus {
            state: crawler
                .state()
                .map(|s| CrawlerState::parse(s.as_str()))
                .unwrap_or_else(|| CrawlerState::Other("UNKNOWN".to_string())),
            last_crawl: crawler.last_crawl().and_then(last_crawl),
        })
    }
}
