//! Serverless warehouse namespaces, workgroups and the data API.

use async_trait::async_trait;
use aws_sdk_redshiftserverless::types::Workgroup;

use super::{AwsCloud, classify, missing};
use crate::cloud::{SqlTarget, StatementId, StatementStatus, WarehouseApi, WorkgroupStatus};
use crate::config::Secret;
use crate::error::ServiceError;
use crate::resource::ResourceId;

fn statement_status(status: &str, error: Option<&str>) -> StatementStatus {
    match status {
        "SUBMITTED" => StatementStatus::Submitted,
        "PICKED" => StatementStatus::Picked,
        "STARTED" => StatementStatus::Started,
        "FINISHED" => StatementStatus::Finished,
        "FAILED" => StatementStatus::Failed(error.unwrap_or("statement failed").to_string()),
        "ABORTED" => StatementStatus::Aborted,
        other => StatementStatus::Other(other.to_string()),
    }
}

impl AwsCloud {
    pub(super) async fn get_namespace(&self, name: &str) -> Result<ResourceId, ServiceError> {
        self.serverless
            .get_namespace()
            .namespace_name(name)
            .send()
            .await
            .map_err(|e| classify("GetNamespace", e))?;
        Ok(ResourceId::new(name))
    }

    pub(super) async fn create_namespace(
        &self,
        name: &str,
        admin_user: &str,
        admin_password: &Secret,
        iam_roles: &[String],
    ) -> Result<ResourceId, ServiceError> {
        self.serverless
            .create_namespace()
            .namespace_name(name)
            .admin_username(admin_user)
            .admin_user_password(admin_password.expose())
            .set_iam_roles(Some(iam_roles.to_vec()))
            .send()
            .await
            .map_err(|e| classify("CreateNamespace", e))?;
        Ok(ResourceId::new(name))
    }

    pub(super) async fn get_workgroup(&self, name: &str) -> Result<ResourceId, ServiceError> {
        self.serverless
            .get_workgroup()
            .workgroup_name(name)
            .send()
            .await
            .map_err(|e| classify("GetWorkgroup", e))?;
        Ok(ResourceId::new(name))
    }

    pub(super) async fn create_workgroup(
        &self,
        name: &str,
        namespace: &str,
        base_capacity: i32,
    ) -> Result<ResourceId, ServiceError> {
        self.serverless
            .create_workgroup()
            .workgroup_name(name)
            .namespace_name(namespace)
            .base_capacity(base_capacity)
            .send()
            .await
            .map_err(|e| classify("CreateWorkgroup", e))?;
        Ok(ResourceId::new(name))
    }
}

#[async_trait]
impl WarehouseApi for AwsCloud {
    async fn workgroup_status(&self, name: &str) -> Result<WorkgroupStatus, ServiceError> {
        let output = self
            .serverless
            .get_workgroup()
            .workgroup_name(name)
            .send()
            .await
            .map_err(|e| classify("GetWorkgroup", e))?;
        // Required in newer models, optional in older ones.
        let workgroup: Option<&Workgroup> = output.workgroup().into();
        let status = workgroup
            .and_then(|w| w.status())
            .ok_or_else(|| missing("GetWorkgroup", "workgroup status"))?;
        Ok(WorkgroupStatus::parse(status.as_str()))
    }

    async fn execute_statement(&self, target: &SqlTarget, sql: &str) -> Result<StatementId, ServiceError> {
        let output = self
            .data
            .execute_statement()
            .workgroup_name(&target.workgroup)
            .database(&target.database)
            .sql(sql)
            .send()
            .await
            .map_err(|e| classify("ExecuteStatement", e))?;
        let id: Option<&str> = output.id().into();
        id.map(str::to_string)
            .ok_or_else(|| missing("ExecuteStatement", "statement id"))
    }

    async fn statement_status(&self, id: &str) -> Result<StatementStatus, ServiceError> {
        let output = self
            .data
            .describe_statement()
            .id(id)
            .send()
            .await
            .map_err(|e| classify("DescribeStatement", e))?;
        let status = output
            .status()
            .ok_or_else(|| missing("DescribeStatement", "status"))?;
        Ok(statement_status(status.as_str(), output.error()))
    }
}
