//! One-off provisioning of the roles and batch jobs the stages rely on.

use serde::Serialize;
use snafu::prelude::*;
use tracing::info;

use crate::cloud::{IdentityApi, ResourceApi};
use crate::config::{Config, JobConfig, role_arn};
use crate::error::{SetupEnsureSnafu, SetupError, SetupIdentitySnafu};
use crate::resource::{BatchJobSpec, EnsureOutcome, ResourceDescriptor, ResourceSpec, ensure};

/// A resource handled by [`setup`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupEntry {
    pub kind: &'static str,
    pub name: String,
    pub id: String,
    pub outcome: EnsureOutcome,
}

/// Ensure every configured role, then the transform and split jobs.
pub async fn setup<C>(cloud: &C, config: &Config) -> Result<Vec<SetupEntry>, SetupError>
where
    C: ResourceApi + IdentityApi + ?Sized,
{
    let account = cloud.account_id().await.context(SetupIdentitySnafu)?;

    let mut descriptors: Vec<ResourceDescriptor> = config
        .roles
        .iter()
        .map(|role| {
            ResourceDescriptor::new(
                &role.name,
                ResourceSpec::Role {
                    service: role.service.clone(),
                    managed_policies: role.managed_policies.clone(),
                },
            )
        })
        .collect();
    descriptors.push(job_descriptor(config, &account, &config.jobs.transform));
    descriptors.push(job_descriptor(config, &account, &config.jobs.split));

    let mut entries = Vec::with_capacity(descriptors.len());
    for descriptor in &descriptors {
        let ensured = ensure(cloud, descriptor).await.context(SetupEnsureSnafu)?;
        entries.push(SetupEntry {
            kind: descriptor.kind().as_str(),
            name: descriptor.name.clone(),
            id: ensured.id.to_string(),
            outcome: ensured.outcome,
        });
    }

    let created = entries
        .iter()
        .filter(|e| e.outcome != EnsureOutcome::Existing)
        .count();
    info!("Setup finished: {} resources, {} created", entries.len(), created);
    Ok(entries)
}

fn job_descriptor(config: &Config, account: &str, job: &JobConfig) -> ResourceDescriptor {
    let jobs = &config.jobs;
    ResourceDescriptor::new(
        &job.name,
        ResourceSpec::BatchJob(BatchJobSpec {
            role_arn: role_arn(account, &jobs.role),
            script_location: config.script_location(job),
            temp_dir: config.temp_dir(),
            glue_version: jobs.glue_version.clone(),
            worker_type: jobs.worker_type.clone(),
            number_of_workers: jobs.number_of_workers,
            description: job.description.clone(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::memory::MemoryCloud;
    use crate::error::{ProvisionError, ServiceErrorKind};
    use crate::resource::ResourceKind;

    fn config() -> Config {
        Config::from_yaml(
            r#"
bucket: dw-bucket
roles:
  - name: glue-etl-role
    service: glue.amazonaws.com
    managed_policies:
      - arn:aws:iam::aws:policy/service-role/AWSGlueServiceRole
warehouse:
  admin_password: "Password123!"
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_setup_creates_roles_then_jobs() {
        let cloud = MemoryCloud::new();
        let config = config();

        let entries = setup(&cloud, &config).await.unwrap();

        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            ["glue-etl-role", "glue-clean-transform", "glue-split-fact-dim"]
        );
        assert!(entries.iter().all(|e| e.outcome == EnsureOutcome::Created));
        assert_eq!(entries[0].kind, "role");
        assert_eq!(entries[0].id, "arn:aws:iam::123456789012:role/glue-etl-role");
        assert_eq!(entries[2].kind, ResourceKind::BatchJob.as_str());
    }

    #[test]
    fn test_job_descriptor_defaults() {
        let config = config();

        let descriptor = job_descriptor(&config, "123456789012", &config.jobs.transform);

        let ResourceSpec::BatchJob(spec) = descriptor.spec else {
            panic!("expected a batch job");
        };
        assert_eq!(spec.role_arn, "arn:aws:iam::123456789012:role/glue-etl-role");
        assert_eq!(
            spec.script_location,
            "s3://dw-bucket/glue_scripts/glue_clean_transform.py"
        );
        assert_eq!(spec.temp_dir, "s3://dw-bucket/temp/");
        assert_eq!(spec.glue_version, "4.0");
        assert_eq!(spec.worker_type, "G.1X");
        assert_eq!(spec.number_of_workers, 2);
    }

    #[tokio::test]
    async fn test_second_setup_creates_nothing() {
        let cloud = MemoryCloud::new();
        let config = config();

        setup(&cloud, &config).await.unwrap();
        let entries = setup(&cloud, &config).await.unwrap();

        assert!(entries.iter().all(|e| e.outcome == EnsureOutcome::Existing));
        assert_eq!(cloud.created().len(), 3);
    }

    #[tokio::test]
    async fn test_setup_stops_at_first_failure() {
        let cloud = MemoryCloud::new();
        cloud.fail_next_create(ResourceKind::Role, ServiceErrorKind::AccessDenied);
        let config = config();

        let err = setup(&cloud, &config).await.unwrap_err();

        assert!(matches!(
            err,
            SetupError::SetupEnsure {
                source: ProvisionError::Create { .. }
            }
        ));
        // Only the failed role create was attempted.
        assert_eq!(
            cloud.created(),
            vec![(ResourceKind::Role, "glue-etl-role".to_string())]
        );
    }
}
