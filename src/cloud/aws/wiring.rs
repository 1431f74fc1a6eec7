//! Roles, schedule rules, invoke permissions and bucket notifications.

use async_trait::async_trait;
use aws_sdk_eventbridge::types::{PutTargetsResultEntry, RuleState, Target};
use aws_sdk_s3::types::{
    Event, FilterRule, FilterRuleName, LambdaFunctionConfiguration, NotificationConfiguration,
    NotificationConfigurationFilter, QueueConfiguration, S3KeyFilter, TopicConfiguration,
};
use serde_json::json;

use super::{AwsCloud, classify, invalid, kind_for_code, missing};
use crate::cloud::{FunctionNotification, InvokeGrant, WiringApi};
use crate::error::ServiceError;
use crate::resource::ResourceId;

fn trust_policy(service: &str) -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": {"Service": service},
            "Action": "sts:AssumeRole"
        }]
    })
    .to_string()
}

fn key_filter(prefix: Option<&str>, suffix: Option<&str>) -> Option<NotificationConfigurationFilter> {
    let mut rules = Vec::new();
    if let Some(prefix) = prefix {
        rules.push(FilterRule::builder().name(FilterRuleName::Prefix).value(prefix).build());
    }
    if let Some(suffix) = suffix {
        rules.push(FilterRule::builder().name(FilterRuleName::Suffix).value(suffix).build());
    }
    if rules.is_empty() {
        return None;
    }
    Some(
        NotificationConfigurationFilter::builder()
            .key(S3KeyFilter::builder().set_filter_rules(Some(rules)).build())
            .build(),
    )
}

fn to_notification(config: &LambdaFunctionConfiguration) -> FunctionNotification {
    let function_arn: Option<&str> = config.lambda_function_arn().into();
    let mut prefix = None;
    let mut suffix = None;
    let rules: Option<&[FilterRule]> = config
        .filter()
        .and_then(|f| f.key())
        .and_then(|k| Option::<&[FilterRule]>::from(k.filter_rules()));
    for rule in rules.unwrap_or_default() {
        let value = rule.value().map(str::to_string);
        match rule.name().map(|n| n.as_str().to_ascii_lowercase()).as_deref() {
            Some("prefix") => prefix = value,
            Some("suffix") => suffix = value,
            _ => {}
        }
    }
    FunctionNotification {
        id: config.id().unwrap_or_default().to_string(),
        function_arn: function_arn.unwrap_or_default().to_string(),
        prefix,
        suffix,
    }
}

impl AwsCloud {
    pub(super) async fn get_role(&self, name: &str) -> Result<ResourceId, ServiceError> {
        self.iam
            .get_role()
            .role_name(name)
            .send()
            .await
            .map_err(|e| classify("GetRole", e))?;
        Ok(ResourceId::new(name))
    }

    pub(super) async fn create_role(
        &self,
        name: &str,
        service: &str,
        managed_policies: &[String],
    ) -> Result<ResourceId, ServiceError> {
        self.iam
            .create_role()
            .role_name(name)
            .assume_role_policy_document(trust_policy(service))
            .send()
            .await
            .map_err(|e| classify("CreateRole", e))?;
        for policy in managed_policies {
            self.iam
                .attach_role_policy()
                .role_name(name)
                .policy_arn(policy)
                .send()
                .await
                .map_err(|e| classify("AttachRolePolicy", e))?;
        }
        Ok(ResourceId::new(name))
    }

    pub(super) async fn get_rule(&self, name: &str) -> Result<ResourceId, ServiceError> {
        let output = self
            .events
            .describe_rule()
            .name(name)
            .send()
            .await
            .map_err(|e| classify("DescribeRule", e))?;
        Ok(ResourceId::new(output.arn().unwrap_or(name)))
    }

    pub(super) async fn create_rule(
        &self,
        name: &str,
        expression: &str,
        description: &str,
    ) -> Result<ResourceId, ServiceError> {
        let output = self
            .events
            .put_rule()
            .name(name)
            .schedule_expression(expression)
            .state(RuleState::Enabled)
            .description(description)
            .send()
            .await
            .map_err(|e| classify("PutRule", e))?;
        Ok(ResourceId::new(output.rule_arn().unwrap_or(name)))
    }

    /// Current notification configuration of `bucket`, optionally extended by one function.
    async fn notification_configuration(
        &self,
        bucket: &str,
        added: Option<LambdaFunctionConfiguration>,
    ) -> Result<NotificationConfiguration, ServiceError> {
        let current = self
            .s3
            .get_bucket_notification_configuration()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| classify("GetBucketNotificationConfiguration", e))?;
        let topics: Option<&[TopicConfiguration]> = current.topic_configurations().into();
        let queues: Option<&[QueueConfiguration]> = current.queue_configurations().into();
        let existing: Option<&[LambdaFunctionConfiguration]> =
            current.lambda_function_configurations().into();

        let mut functions = existing.unwrap_or_default().to_vec();
        if let Some(added) = added {
            // Ids are unique per bucket; the new entry takes over its id.
            functions.retain(|f| f.id() != added.id());
            functions.push(added);
        }
        Ok(NotificationConfiguration::builder()
            .set_topic_configurations(topics.map(<[_]>::to_vec))
            .set_queue_configurations(queues.map(<[_]>::to_vec))
            .set_lambda_function_configurations(Some(functions))
            .set_event_bridge_configuration(current.event_bridge_configuration().cloned())
            .build())
    }
}

#[async_trait]
impl WiringApi for AwsCloud {
    async fn function_arn(&self, function: &str) -> Result<String, ServiceError> {
        let output = self
            .lambda
            .get_function()
            .function_name(function)
            .send()
            .await
            .map_err(|e| classify("GetFunction", e))?;
        output
            .configuration()
            .and_then(|c| c.function_arn())
            .map(str::to_string)
            .ok_or_else(|| missing("GetFunction", "function ARN"))
    }

    async fn add_invoke_permission(&self, grant: &InvokeGrant) -> Result<(), ServiceError> {
        self.lambda
            .add_permission()
            .function_name(&grant.function)
            .statement_id(&grant.statement_id)
            .action("lambda:InvokeFunction")
            .principal(&grant.principal)
            .source_arn(&grant.source_arn)
            .set_source_account(grant.source_account.clone())
            .send()
            .await
            .map_err(|e| classify("AddPermission", e))?;
        Ok(())
    }

    async fn bucket_notifications(&self, bucket: &str) -> Result<Vec<FunctionNotification>, ServiceError> {
        let configuration = self.notification_configuration(bucket, None).await?;
        let functions: Option<&[LambdaFunctionConfiguration]> =
            configuration.lambda_function_configurations().into();
        Ok(functions
            .unwrap_or_default()
            .iter()
            .map(to_notification)
            .collect())
    }

    async fn put_bucket_notification(
        &self,
        bucket: &str,
        notification: &FunctionNotification,
    ) -> Result<(), ServiceError> {
        let operation = "PutBucketNotificationConfiguration";
        let added = LambdaFunctionConfiguration::builder()
            .id(&notification.id)
            .lambda_function_arn(&notification.function_arn)
            .events(Event::from("s3:ObjectCreated:*"))
            .set_filter(key_filter(
                notification.prefix.as_deref(),
                notification.suffix.as_deref(),
            ))
            .build()
            .map_err(|e| invalid(operation, e))?;

        let updated = self.notification_configuration(bucket, Some(added)).await?;

        self.s3
            .put_bucket_notification_configuration()
            .bucket(bucket)
            .notification_configuration(updated)
            .send()
            .await
            .map_err(|e| classify(operation, e))?;
        Ok(())
    }

    async fn put_rule_target(&self, rule: &str, target_id: &str, function_arn: &str) -> Result<(), ServiceError> {
        let operation = "PutTargets";
        let target = Target::builder()
            .id(target_id)
            .arn(function_arn)
            .build()
            .map_err(|e| invalid(operation, e))?;
        let output = self
            .events
            .put_targets()
            .rule(rule)
            .targets(target)
            .send()
            .await
            .map_err(|e| classify(operation, e))?;

        let failed: Option<&[PutTargetsResultEntry]> = output.failed_entries().into();
        if let Some(entry) = failed.unwrap_or_default().first() {
            return Err(ServiceError::new(
                kind_for_code(entry.error_code()),
                operation,
                entry.error_message().unwrap_or("target rejected").to_string(),
            ));
        }
        Ok(())
    }
}
