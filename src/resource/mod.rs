//! Idempotent resource provisioning.
//!
//! Every long-lived piece of infrastructure the pipeline touches is described by
//! a [`ResourceDescriptor`] and brought into existence with [`ensure`]: read by
//! name, create only when absent, and treat an "already exists" conflict from a
//! concurrent creator as success. Existing resources are accepted as they are;
//! configuration drift is never reconciled.

use serde::Serialize;
use snafu::prelude::*;
use std::fmt;
use tracing::{info, warn};

use crate::cloud::ResourceApi;
use crate::config::Secret;
use crate::emit;
use crate::error::{CreateSnafu, LookupSnafu, ProvisionError, RereadSnafu};
use crate::metrics::events::ResourceEnsured;

/// The kinds of resource the provisioner knows how to ensure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Role,
    BatchJob,
    ScheduleRule,
    CatalogDatabase,
    Crawler,
    WarehouseNamespace,
    WarehouseWorkgroup,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Role => "role",
            ResourceKind::BatchJob => "batch-job",
            ResourceKind::ScheduleRule => "schedule-rule",
            ResourceKind::CatalogDatabase => "catalog-db",
            ResourceKind::Crawler => "crawler",
            ResourceKind::WarehouseNamespace => "warehouse-namespace",
            ResourceKind::WarehouseWorkgroup => "warehouse-workgroup",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identifier of an ensured resource (an ARN where the service has one, else the name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Batch job definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJobSpec {
    pub role_arn: String,
    pub script_location: String,
    pub temp_dir: String,
    pub glue_version: String,
    pub worker_type: String,
    pub number_of_workers: i32,
    pub description: Option<String>,
}

/// Desired configuration of a resource, used only when it has to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSpec {
    Role {
        /// Service principal trusted to assume the role.
        service: String,
        managed_policies: Vec<String>,
    },
    BatchJob(BatchJobSpec),
    ScheduleRule {
        expression: String,
        description: String,
    },
    CatalogDatabase,
    Crawler {
        role_arn: String,
        database: String,
        s3_target: String,
        table_prefix: String,
    },
    WarehouseNamespace {
        admin_user: String,
        admin_password: Secret,
        iam_roles: Vec<String>,
    },
    WarehouseWorkgroup {
        namespace: String,
        base_capacity: i32,
    },
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::Role { .. } => ResourceKind::Role,
            ResourceSpec::BatchJob(_) => ResourceKind::BatchJob,
            ResourceSpec::ScheduleRule { .. } => ResourceKind::ScheduleRule,
            ResourceSpec::CatalogDatabase => ResourceKind::CatalogDatabase,
            ResourceSpec::Crawler { .. } => ResourceKind::Crawler,
            ResourceSpec::WarehouseNamespace { .. } => ResourceKind::WarehouseNamespace,
            ResourceSpec::WarehouseWorkgroup { .. } => ResourceKind::WarehouseWorkgroup,
        }
    }
}

/// A named resource and the configuration to create it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub name: String,
    pub spec: ResourceSpec,
}

impl ResourceDescriptor {
    pub fn new(name: impl Into<String>, spec: ResourceSpec) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }
}

/// How [`ensure`] arrived at the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnsureOutcome {
    /// The resource was already there.
    Existing,
    /// This call created it.
    Created,
    /// A concurrent caller created it between our read and our create.
    Raced,
}

impl EnsureOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnsureOutcome::Existing => "existing",
            EnsureOutcome::Created => "created",
            EnsureOutcome::Raced => "raced",
        }
    }
}

/// An ensured resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ensured {
    pub id: ResourceId,
    pub outcome: EnsureOutcome,
}

/// Make sure the described resource exists and return its identifier.
///
/// Not-found and already-exists conditions are handled here and never reach the
/// caller. Any other failure is returned as is; creation is attempted once.
pub async fn ensure<R>(api: &R, descriptor: &ResourceDescriptor) -> Result<Ensured, ProvisionError>
where
    R: ResourceApi + ?Sized,
{
    let kind = descriptor.kind();
    let name = descriptor.name.as_str();

    let ensured = match api.get_resource(kind, name).await {
        Ok(id) => {
            info!("{} '{}' already exists", kind, name);
            Ensured {
                id,
                outcome: EnsureOutcome::Existing,
            }
        }
        Err(e) if e.is_not_found() => {
            info!("{} '{}' not found, creating", kind, name);
            match api.create_resource(descriptor).await {
                Ok(id) => {
                    info!("Created {} '{}' ({})", kind, name, id);
                    Ensured {
                        id,
                        outcome: EnsureOutcome::Created,
                    }
                }
                Err(e) if e.is_already_exists() => {
                    warn!("{} '{}' was created concurrently, reusing it", kind, name);
                    let id = api
                        .get_resource(kind, name)
                        .await
                        .context(RereadSnafu { kind, name })?;
                    Ensured {
                        id,
                        outcome: EnsureOutcome::Raced,
                    }
                }
                Err(e) => return Err(e).context(CreateSnafu { kind, name }),
            }
        }
        Err(e) => return Err(e).context(LookupSnafu { kind, name }),
    };

    emit!(ResourceEnsured {
        kind,
        outcome: ensured.outcome,
    });
    Ok(ensured)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::memory::{Call, MemoryCloud};
    use crate::error::ServiceErrorKind;

    fn database(name: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(name, ResourceSpec::CatalogDatabase)
    }

    fn creates(cloud: &MemoryCloud) -> usize {
        cloud
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::CreateResource { .. }))
            .count()
    }

    #[tokio::test]
    async fn test_ensure_twice_creates_once() {
        let cloud = MemoryCloud::new();
        let descriptor = database("product_db");

        let first = ensure(&cloud, &descriptor).await.unwrap();
        let second = ensure(&cloud, &descriptor).await.unwrap();

        assert_eq!(first.outcome, EnsureOutcome::Created);
        assert_eq!(second.outcome, EnsureOutcome::Existing);
        assert_eq!(first.id, second.id);
        assert_eq!(creates(&cloud), 1);
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent_for_every_kind() {
        let cloud = MemoryCloud::new();
        let descriptors = vec![
            ResourceDescriptor::new(
                "glue-etl-role",
                ResourceSpec::Role {
                    service: "glue.amazonaws.com".to_string(),
                    managed_policies: vec![],
                },
            ),
            ResourceDescriptor::new(
                "glue-split-fact-dim",
                ResourceSpec::BatchJob(BatchJobSpec {
                    role_arn: "arn:aws:iam::1:role/glue-etl-role".to_string(),
                    script_location: "s3://b/glue_scripts/split.py".to_string(),
                    temp_dir: "s3://b/temp/".to_string(),
                    glue_version: "4.0".to_string(),
                    worker_type: "G.1X".to_string(),
                    number_of_workers: 2,
                    description: None,
                }),
            ),
            ResourceDescriptor::new(
                "every-10min",
                ResourceSpec::ScheduleRule {
                    expression: "rate(10 minutes)".to_string(),
                    description: String::new(),
                },
            ),
            database("product_db"),
            ResourceDescriptor::new(
                "product-data-crawler",
                ResourceSpec::Crawler {
                    role_arn: "arn:aws:iam::1:role/glue-crawler-role".to_string(),
                    database: "product_db".to_string(),
                    s3_target: "s3://b/curated/".to_string(),
                    table_prefix: "curated_".to_string(),
                },
            ),
            ResourceDescriptor::new(
                "dw-namespace",
                ResourceSpec::WarehouseNamespace {
                    admin_user: "awsuser".to_string(),
                    admin_password: Secret::new("pw"),
                    iam_roles: vec![],
                },
            ),
            ResourceDescriptor::new(
                "dw-workgroup",
                ResourceSpec::WarehouseWorkgroup {
                    namespace: "dw-namespace".to_string(),
                    base_capacity: 8,
                },
            ),
        ];

        for descriptor in &descriptors {
            let first = ensure(&cloud, descriptor).await.unwrap();
            let second = ensure(&cloud, descriptor).await.unwrap();
            assert_eq!(first.id, second.id, "{} changed identity", descriptor.kind());
        }
        assert_eq!(creates(&cloud), descriptors.len());
    }

    #[tokio::test]
    async fn test_ensure_treats_concurrent_create_as_success() {
        let cloud = MemoryCloud::new();
        let descriptor = database("product_db");
        cloud.race_next_create(ResourceKind::CatalogDatabase, "product_db");

        let ensured = ensure(&cloud, &descriptor).await.unwrap();

        assert_eq!(ensured.outcome, EnsureOutcome::Raced);
        assert_eq!(ensured.id, cloud.resource_id(ResourceKind::CatalogDatabase, "product_db").unwrap());
    }

    #[tokio::test]
    async fn test_ensure_propagates_other_create_failures() {
        let cloud = MemoryCloud::new();
        cloud.fail_next_create(ResourceKind::Crawler, ServiceErrorKind::AccessDenied);
        let descriptor = ResourceDescriptor::new(
            "product-data-crawler",
            ResourceSpec::Crawler {
                role_arn: "arn".to_string(),
                database: "db".to_string(),
                s3_target: "s3://b/curated/".to_string(),
                table_prefix: "curated_".to_string(),
            },
        );

        let err = ensure(&cloud, &descriptor).await.unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::Create {
                kind: ResourceKind::Crawler,
                ..
            }
        ));
        assert_eq!(creates(&cloud), 1);
    }

    #[tokio::test]
    async fn test_ensure_propagates_lookup_failures() {
        let cloud = MemoryCloud::new();
        cloud.fail_next_get(ResourceKind::CatalogDatabase, ServiceErrorKind::AccessDenied);

        let err = ensure(&cloud, &database("product_db")).await.unwrap_err();

        assert!(matches!(err, ProvisionError::Lookup { .. }));
        assert_eq!(creates(&cloud), 0);
    }
}
