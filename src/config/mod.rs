//! Configuration parsing and validation.
//!
//! One YAML file describes the whole pipeline: bucket and prefixes, the batch
//! jobs, the schedule, the catalog and the warehouse. Every stage loads the same
//! file; values that differ per deployment are usually `${VAR}` references
//! resolved from the environment (see [`vars`]).

mod vars;

pub use vars::{InterpolationResult, interpolate};

use regex::Regex;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use crate::error::{
    ConfigError, EmptyBucketSnafu, EmptyNameSnafu, EnvInterpolationSnafu, InvalidBucketSnafu,
    InvalidPrefixSnafu, ReadFileSnafu, YamlParseSnafu, ZeroPollIntervalSnafu,
};

static BUCKET_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9.\-]{1,61}[a-z0-9]$").expect("bucket pattern is a valid regex")
});

/// Main configuration structure for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bucket holding raw, transformed and curated data.
    pub bucket: String,
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub prefixes: PrefixConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    /// IAM roles ensured by `setup` (optional; roles may be managed elsewhere).
    #[serde(default)]
    pub roles: Vec<RoleConfig>,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub functions: FunctionsConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub wiring: WiringConfig,
}

/// AWS client configuration. Credentials always come from the default provider chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwsConfig {
    #[serde(default)]
    pub region: Option<String>,
    /// Override endpoint, e.g. for a local emulator.
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

/// Storage prefixes shared by the jobs, the triggers and the loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefixConfig {
    /// Output of the transform job; writes here fire the object-written trigger.
    #[serde(default = "default_transformed_prefix")]
    pub transformed: String,
    /// Suffix a transformed object must carry to start the split job.
    #[serde(default = "default_transformed_suffix")]
    pub transformed_suffix: String,
    /// Root of the fact/dimension outputs, one sub-prefix per table.
    #[serde(default = "default_curated_prefix")]
    pub curated: String,
}

impl Default for PrefixConfig {
    fn default() -> Self {
        Self {
            transformed: default_transformed_prefix(),
            transformed_suffix: default_transformed_suffix(),
            curated: default_curated_prefix(),
        }
    }
}

fn default_transformed_prefix() -> String {
    "transformed/".to_string()
}

fn default_transformed_suffix() -> String {
    ".parquet".to_string()
}

fn default_curated_prefix() -> String {
    "curated/".to_string()
}

/// Batch job definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Role (name or ARN) the jobs run as.
    #[serde(default = "default_job_role")]
    pub role: String,
    #[serde(default = "default_glue_version")]
    pub glue_version: String,
    #[serde(default = "default_worker_type")]
    pub worker_type: String,
    #[serde(default = "default_number_of_workers")]
    pub number_of_workers: i32,
    /// Scratch location; defaults to `s3://<bucket>/temp/`.
    #[serde(default)]
    pub temp_dir: Option<String>,
    #[serde(default = "default_transform_job")]
    pub transform: JobConfig,
    #[serde(default = "default_split_job")]
    pub split: JobConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            role: default_job_role(),
            glue_version: default_glue_version(),
            worker_type: default_worker_type(),
            number_of_workers: default_number_of_workers(),
            temp_dir: None,
            transform: default_transform_job(),
            split: default_split_job(),
        }
    }
}

/// A single batch job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    /// Script location; defaults to `s3://<bucket>/glue_scripts/<script>.py`.
    #[serde(default)]
    pub script_location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_job_role() -> String {
    "glue-etl-role".to_string()
}

fn default_glue_version() -> String {
    "4.0".to_string()
}

fn default_worker_type() -> String {
    "G.1X".to_string()
}

fn default_number_of_workers() -> i32 {
    2
}

fn default_transform_job() -> JobConfig {
    JobConfig {
        name: "glue-clean-transform".to_string(),
        script_location: None,
        description: Some("Clean and transform raw product sales data.".to_string()),
    }
}

fn default_split_job() -> JobConfig {
    JobConfig {
        name: "glue-split-fact-dim".to_string(),
        script_location: None,
        description: Some("Split transformed data into fact and dimension tables.".to_string()),
    }
}

/// An IAM role assumed by one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    pub name: String,
    /// Service principal allowed to assume the role, e.g. `glue.amazonaws.com`.
    pub service: String,
    #[serde(default)]
    pub managed_policies: Vec<String>,
}

/// Timer that drives the first stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_rule_name")]
    pub rule_name: String,
    #[serde(default = "default_schedule_expression")]
    pub expression: String,
    #[serde(default = "default_schedule_description")]
    pub description: String,
    /// Function the rule invokes (the timer stage).
    #[serde(default = "default_schedule_function")]
    pub function: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            rule_name: default_rule_name(),
            expression: default_schedule_expression(),
            description: default_schedule_description(),
            function: default_schedule_function(),
        }
    }
}

fn default_rule_name() -> String {
    "trigger-lambda1-every-10min".to_string()
}

fn default_schedule_expression() -> String {
    "rate(10 minutes)".to_string()
}

fn default_schedule_description() -> String {
    "Start the transform job every 10 minutes".to_string()
}

fn default_schedule_function() -> String {
    "lambda-trigger-glue".to_string()
}

/// Names of the other two compute units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionsConfig {
    /// Function invoked by writes under the transformed prefix.
    #[serde(default = "default_object_written_function")]
    pub object_written: String,
    /// Loader stage function the split job invokes once curated outputs are
    /// written. `wire` checks that it is deployed.
    #[serde(default = "default_loader_function")]
    pub loader: String,
}

impl Default for FunctionsConfig {
    fn default() -> Self {
        Self {
            object_written: default_object_written_function(),
            loader: default_loader_function(),
        }
    }
}

fn default_object_written_function() -> String {
    "lambda-split-fact-dim".to_string()
}

fn default_loader_function() -> String {
    "lambda-load-redshift".to_string()
}

/// Schema catalog and crawler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_database")]
    pub database: String,
    #[serde(default = "default_crawler")]
    pub crawler: String,
    /// Role (name or ARN) the crawler runs as.
    #[serde(default = "default_crawler_role")]
    pub crawler_role: String,
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
    #[serde(default = "default_crawler_wait")]
    pub wait: WaitPolicy,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            database: default_catalog_database(),
            crawler: default_crawler(),
            crawler_role: default_crawler_role(),
            table_prefix: default_table_prefix(),
            wait: default_crawler_wait(),
        }
    }
}

fn default_catalog_database() -> String {
    "product_db".to_string()
}

fn default_crawler() -> String {
    "product-data-crawler".to_string()
}

fn default_crawler_role() -> String {
    "glue-crawler-role".to_string()
}

fn default_table_prefix() -> String {
    "curated_".to_string()
}

fn default_crawler_wait() -> WaitPolicy {
    WaitPolicy::new(600, 15)
}

/// Serverless warehouse namespace, workgroup and load settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_workgroup")]
    pub workgroup: String,
    #[serde(default = "default_warehouse_database")]
    pub database: String,
    #[serde(default = "default_admin_user")]
    pub admin_user: String,
    /// Admin password, used only when the namespace has to be created.
    pub admin_password: Secret,
    #[serde(default = "default_base_capacity")]
    pub base_capacity: i32,
    /// Load-only role (name or ARN) used by the namespace and by `COPY`.
    #[serde(default = "default_copy_role")]
    pub copy_role: String,
    #[serde(default = "default_workgroup_wait")]
    pub wait: WaitPolicy,
    #[serde(default)]
    pub statements: StatementConfig,
}

fn default_namespace() -> String {
    "dw-namespace".to_string()
}

fn default_workgroup() -> String {
    "dw-workgroup".to_string()
}

fn default_warehouse_database() -> String {
    "dev".to_string()
}

fn default_admin_user() -> String {
    "awsuser".to_string()
}

fn default_base_capacity() -> i32 {
    8
}

fn default_copy_role() -> String {
    "redshift-copy-role".to_string()
}

fn default_workgroup_wait() -> WaitPolicy {
    WaitPolicy::new(900, 15)
}

/// How submitted SQL statements are tracked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementConfig {
    /// Wait for each statement to finish before submitting the next (default: true).
    /// When false, statements are submitted back to back and may still be
    /// running, or run out of order, when the loader reports success.
    #[serde(default = "default_wait_for_completion")]
    pub wait_for_completion: bool,
    #[serde(default = "default_statement_wait")]
    pub wait: WaitPolicy,
}

impl Default for StatementConfig {
    fn default() -> Self {
        Self {
            wait_for_completion: default_wait_for_completion(),
            wait: default_statement_wait(),
        }
    }
}

fn default_wait_for_completion() -> bool {
    true
}

fn default_statement_wait() -> WaitPolicy {
    WaitPolicy::new(300, 5)
}

/// Identifiers used when wiring triggers to functions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WiringConfig {
    #[serde(default = "default_notification_id")]
    pub notification_id: String,
    #[serde(default = "default_storage_permission_id")]
    pub storage_permission_id: String,
    #[serde(default = "default_schedule_permission_id")]
    pub schedule_permission_id: String,
    #[serde(default = "default_schedule_target_id")]
    pub schedule_target_id: String,
}

impl Default for WiringConfig {
    fn default() -> Self {
        Self {
            notification_id: default_notification_id(),
            storage_permission_id: default_storage_permission_id(),
            schedule_permission_id: default_schedule_permission_id(),
            schedule_target_id: default_schedule_target_id(),
        }
    }
}

fn default_notification_id() -> String {
    "trigger-lambda2-on-transform".to_string()
}

fn default_storage_permission_id() -> String {
    "s3invoke-transformed".to_string()
}

fn default_schedule_permission_id() -> String {
    "trigger-lambda1-every-10min-permission".to_string()
}

fn default_schedule_target_id() -> String {
    "1".to_string()
}

/// Bound on a blocking status wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitPolicy {
    /// Total wait budget in seconds.
    pub max_secs: u64,
    /// Fixed delay between status checks in seconds.
    pub interval_secs: u64,
}

impl WaitPolicy {
    pub const fn new(max_secs: u64, interval_secs: u64) -> Self {
        Self {
            max_secs,
            interval_secs,
        }
    }

    /// Number of status checks the budget allows: `floor(max / interval)`, at least one.
    pub fn max_polls(&self) -> u32 {
        let polls = self.max_secs.checked_div(self.interval_secs).unwrap_or(0);
        u32::try_from(polls).unwrap_or(u32::MAX).max(1)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// A string that is never printed by `Debug`.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text, interpolating environment variables first.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let result = vars::interpolate(content);
        if !result.is_ok() {
            return EnvInterpolationSnafu {
                message: result.errors.join("\n"),
            }
            .fail();
        }

        let config: Config = serde_yaml::from_str(&result.text).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.bucket.is_empty(), EmptyBucketSnafu);
        ensure!(
            BUCKET_NAME.is_match(&self.bucket),
            InvalidBucketSnafu {
                bucket: self.bucket.clone()
            }
        );

        validate_prefix("prefixes.transformed", &self.prefixes.transformed)?;
        validate_prefix("prefixes.curated", &self.prefixes.curated)?;

        for (field, value) in [
            ("jobs.transform.name", &self.jobs.transform.name),
            ("jobs.split.name", &self.jobs.split.name),
            ("catalog.database", &self.catalog.database),
            ("catalog.crawler", &self.catalog.crawler),
            ("warehouse.namespace", &self.warehouse.namespace),
            ("warehouse.workgroup", &self.warehouse.workgroup),
            ("warehouse.database", &self.warehouse.database),
            ("warehouse.copy_role", &self.warehouse.copy_role),
        ] {
            ensure!(!value.is_empty(), EmptyNameSnafu { field });
        }

        for (field, policy) in [
            ("catalog.wait", &self.catalog.wait),
            ("warehouse.wait", &self.warehouse.wait),
            ("warehouse.statements.wait", &self.warehouse.statements.wait),
        ] {
            ensure!(policy.interval_secs > 0, ZeroPollIntervalSnafu { field });
        }

        Ok(())
    }

    /// `s3://<bucket>/<prefix>` for a prefix inside the pipeline bucket.
    pub fn bucket_url(&self, prefix: &str) -> String {
        format!("s3://{}/{}", self.bucket, prefix)
    }

    /// Curated prefix of one table, e.g. `curated/dim_product/`.
    pub fn curated_prefix(&self, table: &str) -> String {
        format!("{}{}/", self.prefixes.curated, table)
    }

    pub fn temp_dir(&self) -> String {
        self.jobs
            .temp_dir
            .clone()
            .unwrap_or_else(|| self.bucket_url("temp/"))
    }

    /// Script location of a job, falling back to `glue_scripts/<underscored name>.py`.
    pub fn script_location(&self, job: &JobConfig) -> String {
        job.script_location.clone().unwrap_or_else(|| {
            let script = job.name.trim_start_matches("glue-").replace('-', "_");
            self.bucket_url(&format!("glue_scripts/glue_{script}.py"))
        })
    }
}

fn validate_prefix(field: &'static str, value: &str) -> Result<(), ConfigError> {
    ensure!(
        !value.is_empty() && value.ends_with('/') && !value.starts_with('/'),
        InvalidPrefixSnafu {
            field,
            value: value.to_string()
        }
    );
    Ok(())
}

/// Resolve a role name to an ARN in `account`; values that already are ARNs pass through.
pub fn role_arn(account: &str, role: &str) -> String {
    if role.starts_with("arn:") {
        role.to_string()
    } else {
        format!("arn:aws:iam::{account}:role/{role}")
    }
}
