//! AWS implementation of the service seams.
//!
//! One SDK client per service, all built from a single shared configuration
//! (default credential chain, optional region and endpoint override).

mod glue;
mod redshift;
mod wiring;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_glue::error::{DisplayErrorContext, ProvideErrorMetadata};
use tracing::debug;

use super::{IdentityApi, ResourceApi};
use crate::config::AwsConfig;
use crate::error::{ServiceError, ServiceErrorKind};
use crate::resource::{ResourceDescriptor, ResourceId, ResourceKind, ResourceSpec};

/// Clients for every service the pipeline touches.
#[derive(Debug, Clone)]
pub struct AwsCloud {
    glue: aws_sdk_glue::Client,
    iam: aws_sdk_iam::Client,
    lambda: aws_sdk_lambda::Client,
    events: aws_sdk_eventbridge::Client,
    s3: aws_sdk_s3::Client,
    serverless: aws_sdk_redshiftserverless::Client,
    data: aws_sdk_redshiftdata::Client,
    sts: aws_sdk_sts::Client,
}

impl AwsCloud {
    /// Resolve credentials and region and build the clients.
    pub async fn load(config: &AwsConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = config.region.clone() {
            loader = loader.region(Region::new(region));
        }
        if let Some(endpoint) = config.endpoint_url.clone() {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;
        debug!("AWS clients configured for region {:?}", shared.region());
        Self::from_shared(&shared, config.endpoint_url.is_some())
    }

    fn from_shared(shared: &SdkConfig, path_style: bool) -> Self {
        let s3_config = aws_sdk_s3::config::Builder::from(shared)
            .force_path_style(path_style)
            .build();
        Self {
            glue: aws_sdk_glue::Client::new(shared),
            iam: aws_sdk_iam::Client::new(shared),
            lambda: aws_sdk_lambda::Client::new(shared),
            events: aws_sdk_eventbridge::Client::new(shared),
            s3: aws_sdk_s3::Client::from_conf(s3_config),
            serverless: aws_sdk_redshiftserverless::Client::new(shared),
            data: aws_sdk_redshiftdata::Client::new(shared),
            sts: aws_sdk_sts::Client::new(shared),
        }
    }
}

/// Map a service error code to its kind.
pub(crate) fn kind_for_code(code: Option<&str>) -> ServiceErrorKind {
    match code {
        Some(
            "EntityNotFoundException"
            | "ResourceNotFoundException"
            | "NoSuchEntity"
            | "NotFoundException",
        ) => ServiceErrorKind::NotFound,
        Some(
            "AlreadyExistsException"
            | "ConflictException"
            | "ResourceConflictException"
            | "EntityAlreadyExists",
        ) => ServiceErrorKind::AlreadyExists,
        Some("CrawlerRunningException" | "ConcurrentRunsExceededException") => {
            ServiceErrorKind::Busy
        }
        Some("AccessDeniedException" | "AccessDenied") => ServiceErrorKind::AccessDenied,
        _ => ServiceErrorKind::Other,
    }
}

/// Classify an SDK error, keeping its full context as the message.
pub(crate) fn classify<E>(operation: &'static str, error: E) -> ServiceError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let kind = kind_for_code(error.code());
    ServiceError::new(kind, operation, DisplayErrorContext(&error).to_string())
}

/// A response that lacked a field the pipeline needs.
pub(crate) fn missing(operation: &'static str, field: &str) -> ServiceError {
    ServiceError::new(
        ServiceErrorKind::Other,
        operation,
        format!("response has no {field}"),
    )
}

/// A request that could not be built.
pub(crate) fn invalid(operation: &'static str, error: impl std::fmt::Display) -> ServiceError {
    ServiceError::new(ServiceErrorKind::Other, operation, error.to_string())
}

#[async_trait]
impl ResourceApi for AwsCloud {
    async fn get_resource(&self, kind: ResourceKind, name: &str) -> Result<ResourceId, ServiceError> {
        match kind {
            ResourceKind::Role => self.get_role(name).await,
            ResourceKind::BatchJob => self.get_job(name).await,
            ResourceKind::ScheduleRule => self.get_rule(name).await,
            ResourceKind::CatalogDatabase => self.get_database(name).await,
            ResourceKind::Crawler => self.get_crawler(name).await,
            ResourceKind::WarehouseNamespace => self.get_namespace(name).await,
            ResourceKind::WarehouseWorkgroup => self.get_workgroup(name).await,
        }
    }

    async fn create_resource(&self, descriptor: &ResourceDescriptor) -> Result<ResourceId, ServiceError> {
        let name = descriptor.name.as_str();
        match &descriptor.spec {
            ResourceSpec::Role {
                service,
                managed_policies,
            } => self.create_role(name, service, managed_policies).await,
            ResourceSpec::BatchJob(job) => self.create_job(name, job).await,
            ResourceSpec::ScheduleRule {
                expression,
                description,
            } => self.create_rule(name, expression, description).await,
            ResourceSpec::CatalogDatabase => self.create_database(name).await,
            ResourceSpec::Crawler {
                role_arn,
                database,
                s3_target,
                table_prefix,
            } => {
                self.create_crawler(name, role_arn, database, s3_target, table_prefix)
                    .await
            }
            ResourceSpec::WarehouseNamespace {
                admin_user,
                admin_password,
                iam_roles,
            } => {
                self.create_namespace(name, admin_user, admin_password, iam_roles)
                    .await
            }
            ResourceSpec::WarehouseWorkgroup {
                namespace,
                base_capacity,
            } => self.create_workgroup(name, namespace, *base_capacity).await,
        }
    }
}

#[async_trait]
impl IdentityApi for AwsCloud {
    async fn account_id(&self) -> Result<String, ServiceError> {
        let output = self
            .sts
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| classify("GetCallerIdentity", e))?;
        output
            .account()
            .map(str::to_string)
            .ok_or_else(|| missing("GetCallerIdentity", "account"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_classified() {
        assert_eq!(
            kind_for_code(Some("EntityNotFoundException")),
            ServiceErrorKind::NotFound
        );
        assert_eq!(kind_for_code(Some("NoSuchEntity")), ServiceErrorKind::NotFound);
        assert_eq!(
            kind_for_code(Some("ResourceNotFoundException")),
            ServiceErrorKind::NotFound
        );
        assert_eq!(
            kind_for_code(Some("ConflictException")),
            ServiceErrorKind::AlreadyExists
        );
        assert_eq!(
            kind_for_code(Some("ResourceConflictException")),
            ServiceErrorKind::AlreadyExists
        );
        assert_eq!(
            kind_for_code(Some("EntityAlreadyExists")),
            ServiceErrorKind::AlreadyExists
        );
        assert_eq!(
            kind_for_code(Some("CrawlerRunningException")),
            ServiceErrorKind::Busy
        );
        assert_eq!(
            kind_for_code(Some("AccessDeniedException")),
            ServiceErrorKind::AccessDenied
        );
        assert_eq!(
            kind_for_code(Some("ThrottlingException")),
            ServiceErrorKind::Other
        );
        assert_eq!(kind_for_code(None), ServiceErrorKind::Other);
    }

    #[test]
    fn test_helpers_name_the_operation() {
        let err = missing("GetCallerIdentity", "account");
        assert_eq!(
            err.to_string(),
            "GetCallerIdentity failed (service error): response has no account"
        );
        assert_eq!(invalid("CreateDatabase", "name is required").kind, ServiceErrorKind::Other);
    }
}
