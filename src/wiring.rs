//! Connect the stages to their event sources.
//!
//! Two independent steps, both safe to repeat:
//!
//! - schedule: ensure the timer rule, point it at the timer stage and allow the
//!   scheduler to invoke that function
//! - storage: allow the bucket to invoke the object-written stage and add an
//!   object-created notification for the transformed prefix, unless the bucket
//!   already notifies that function

use serde::Serialize;
use snafu::prelude::*;
use tracing::info;

use crate::cloud::{FunctionNotification, IdentityApi, InvokeGrant, ResourceApi, WiringApi};
use crate::config::Config;
use crate::error::{
    FunctionLookupSnafu, NotificationSnafu, PermissionSnafu, RuleTargetSnafu, ScheduleRuleSnafu,
    WiringError, WiringIdentitySnafu,
};
use crate::resource::{EnsureOutcome, ResourceDescriptor, ResourceSpec, ensure};

const SCHEDULER_PRINCIPAL: &str = "events.amazonaws.com";
const STORAGE_PRINCIPAL: &str = "s3.amazonaws.com";

/// Everything the wiring steps call.
pub trait WireApi: ResourceApi + WiringApi + IdentityApi {}

impl<T> WireApi for T where T: ResourceApi + WiringApi + IdentityApi + ?Sized {}

/// Result of [`wire_schedule`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleWiring {
    pub rule: String,
    pub rule_outcome: EnsureOutcome,
    pub function_arn: String,
    /// Whether the invoke permission was added by this run.
    pub permission_added: bool,
}

/// Result of [`wire_object_written`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageWiring {
    pub bucket: String,
    pub function_arn: String,
    pub permission_added: bool,
    pub notification_added: bool,
}

/// Both wiring steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WiringReport {
    pub schedule: ScheduleWiring,
    pub storage: StorageWiring,
    /// ARN of the loader function the split job hands off to.
    pub loader_function_arn: String,
}

/// Run both wiring steps, schedule first, then check the loader function exists.
pub async fn wire<C>(cloud: &C, config: &Config) -> Result<WiringReport, WiringError>
where
    C: WireApi + ?Sized,
{
    let schedule = wire_schedule(cloud, config).await?;
    let storage = wire_object_written(cloud, config).await?;
    let loader_function_arn = lookup_function(cloud, &config.functions.loader).await?;
    info!("Loader function '{}' is deployed", config.functions.loader);
    Ok(WiringReport {
        schedule,
        storage,
        loader_function_arn,
    })
}

/// Ensure the timer rule and make it invoke the timer stage.
pub async fn wire_schedule<C>(cloud: &C, config: &Config) -> Result<ScheduleWiring, WiringError>
where
    C: WireApi + ?Sized,
{
    let schedule = &config.schedule;
    let rule = ensure(
        cloud,
        &ResourceDescriptor::new(
            &schedule.rule_name,
            ResourceSpec::ScheduleRule {
                expression: schedule.expression.clone(),
                description: schedule.description.clone(),
            },
        ),
    )
    .await
    .context(ScheduleRuleSnafu)?;

    let function_arn = lookup_function(cloud, &schedule.function).await?;
    cloud
        .put_rule_target(&schedule.rule_name, &config.wiring.schedule_target_id, &function_arn)
        .await
        .context(RuleTargetSnafu {
            rule: schedule.rule_name.as_str(),
            function: schedule.function.as_str(),
        })?;
    info!("Rule '{}' targets '{}'", schedule.rule_name, schedule.function);

    let permission_added = grant(
        cloud,
        InvokeGrant {
            function: schedule.function.clone(),
            statement_id: config.wiring.schedule_permission_id.clone(),
            principal: SCHEDULER_PRINCIPAL.to_string(),
            source_arn: rule.id.to_string(),
            source_account: None,
        },
    )
    .await?;

    Ok(ScheduleWiring {
        rule: rule.id.to_string(),
        rule_outcome: rule.outcome,
        function_arn,
        permission_added,
    })
}

/// Make writes under the transformed prefix invoke the object-written stage.
pub async fn wire_object_written<C>(cloud: &C, config: &Config) -> Result<StorageWiring, WiringError>
where
    C: WireApi + ?Sized,
{
    let bucket = config.bucket.as_str();
    let function = config.functions.object_written.as_str();

    let account = cloud.account_id().await.context(WiringIdentitySnafu)?;
    let function_arn = lookup_function(cloud, function).await?;

    let permission_added = grant(
        cloud,
        InvokeGrant {
            function: function.to_string(),
            statement_id: config.wiring.storage_permission_id.clone(),
            principal: STORAGE_PRINCIPAL.to_string(),
            source_arn: format!("arn:aws:s3:::{bucket}"),
            source_account: Some(account),
        },
    )
    .await?;

    let existing = cloud
        .bucket_notifications(bucket)
        .await
        .context(NotificationSnafu { bucket })?;
    let notification_added = if existing.iter().any(|n| n.function_arn == function_arn) {
        info!("Bucket '{}' already notifies '{}'", bucket, function);
        false
    } else {
        if existing.iter().any(|n| n.id == config.wiring.notification_id) {
            info!(
                "Replacing notification '{}' on bucket '{}'",
                config.wiring.notification_id, bucket
            );
        }
        let notification = FunctionNotification {
            id: config.wiring.notification_id.clone(),
            function_arn: function_arn.clone(),
            prefix: Some(config.prefixes.transformed.clone()),
            suffix: Some(config.prefixes.transformed_suffix.clone()),
        };
        cloud
            .put_bucket_notification(bucket, &notification)
            .await
            .context(NotificationSnafu { bucket })?;
        info!(
            "Bucket '{}' now notifies '{}' for {}*{}",
            bucket, function, config.prefixes.transformed, config.prefixes.transformed_suffix
        );
        true
    };

    Ok(StorageWiring {
        bucket: bucket.to_string(),
        function_arn,
        permission_added,
        notification_added,
    })
}

async fn lookup_function<C>(cloud: &C, function: &str) -> Result<String, WiringError>
where
    C: WiringApi + ?Sized,
{
    cloud
        .function_arn(function)
        .await
        .context(FunctionLookupSnafu { function })
}

/// Add an invoke permission. An existing statement with the same id counts as granted.
async fn grant<C>(cloud: &C, permission: InvokeGrant) -> Result<bool, WiringError>
where
    C: WiringApi + ?Sized,
{
    match cloud.add_invoke_permission(&permission).await {
        Ok(()) => {
            info!(
                "Granted {} permission to invoke '{}'",
                permission.principal, permission.function
            );
            Ok(true)
        }
        Err(e) if e.is_already_exists() => {
            info!(
                "{} may already invoke '{}' (statement '{}')",
                permission.principal, permission.function, permission.statement_id
            );
            Ok(false)
        }
        Err(source) => Err(source).context(PermissionSnafu {
            function: permission.function,
            principal: permission.principal,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::memory::{ACCOUNT_ID, Call, MemoryCloud};
    use crate::resource::ResourceKind;

    fn config() -> Config {
        Config::from_yaml(
            r#"
bucket: dw-bucket
warehouse:
  admin_password: "Password123!"
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_schedule_wiring_creates_rule_target_and_permission() {
        let cloud = MemoryCloud::new();
        let config = config();

        let wired = wire_schedule(&cloud, &config).await.unwrap();

        assert_eq!(wired.rule_outcome, EnsureOutcome::Created);
        assert!(wired.permission_added);
        let (target_id, arn) = cloud.rule_target("trigger-lambda1-every-10min").unwrap();
        assert_eq!(target_id, "1");
        assert_eq!(
            arn,
            format!("arn:aws:lambda:us-east-1:{ACCOUNT_ID}:function:lambda-trigger-glue")
        );
        assert!(cloud.has_permission(
            "lambda-trigger-glue",
            "trigger-lambda1-every-10min-permission"
        ));
    }

    #[tokio::test]
    async fn test_schedule_wiring_twice_keeps_one_rule() {
        let cloud = MemoryCloud::new();
        let config = config();

        wire_schedule(&cloud, &config).await.unwrap();
        let again = wire_schedule(&cloud, &config).await.unwrap();

        assert_eq!(again.rule_outcome, EnsureOutcome::Existing);
        assert!(!again.permission_added);
        let rules = cloud
            .created()
            .into_iter()
            .filter(|(kind, _)| *kind == ResourceKind::ScheduleRule)
            .count();
        assert_eq!(rules, 1);
    }

    #[tokio::test]
    async fn test_storage_wiring_adds_filtered_notification() {
        let cloud = MemoryCloud::new();
        let config = config();

        let wired = wire_object_written(&cloud, &config).await.unwrap();

        assert!(wired.permission_added);
        assert!(wired.notification_added);
        let notifications = cloud.notifications("dw-bucket");
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].id, "trigger-lambda2-on-transform");
        assert_eq!(notifications[0].prefix.as_deref(), Some("transformed/"));
        assert_eq!(notifications[0].suffix.as_deref(), Some(".parquet"));
        assert!(cloud.has_permission("lambda-split-fact-dim", "s3invoke-transformed"));
    }

    #[tokio::test]
    async fn test_storage_wiring_skips_existing_notification() {
        let cloud = MemoryCloud::new();
        let config = config();

        wire_object_written(&cloud, &config).await.unwrap();
        let again = wire_object_written(&cloud, &config).await.unwrap();

        assert!(!again.permission_added);
        assert!(!again.notification_added);
        assert_eq!(cloud.notifications("dw-bucket").len(), 1);
        let puts = cloud
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::PutBucketNotification { .. }))
            .count();
        assert_eq!(puts, 1);
    }

    #[tokio::test]
    async fn test_storage_wiring_replaces_notification_with_same_id() {
        let cloud = MemoryCloud::new();
        let config = config();
        cloud
            .put_bucket_notification(
                "dw-bucket",
                &FunctionNotification {
                    id: "trigger-lambda2-on-transform".to_string(),
                    function_arn: "arn:aws:lambda:us-east-1:123456789012:function:retired".to_string(),
                    prefix: None,
                    suffix: None,
                },
            )
            .await
            .unwrap();

        let wired = wire_object_written(&cloud, &config).await.unwrap();

        assert!(wired.notification_added);
        let notifications = cloud.notifications("dw-bucket");
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].function_arn, wired.function_arn);
        assert_eq!(notifications[0].prefix.as_deref(), Some("transformed/"));
    }

    #[tokio::test]
    async fn test_wire_runs_both_steps() {
        let cloud = MemoryCloud::new();
        let config = config();

        let report = wire(&cloud, &config).await.unwrap();

        assert!(report.schedule.rule.starts_with("arn:aws:events:"));
        assert_eq!(report.storage.bucket, "dw-bucket");
        assert_eq!(
            report.loader_function_arn,
            format!("arn:aws:lambda:us-east-1:{ACCOUNT_ID}:function:lambda-load-redshift")
        );
    }
}
