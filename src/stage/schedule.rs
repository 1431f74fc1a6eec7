//! Timer-driven stage: start the transform job.

use std::collections::BTreeMap;

use super::{Effect, StageEvent, Trigger};
use crate::config::Config;

/// Starts one run of the transform job per invocation, whatever the payload.
#[derive(Debug, Clone)]
pub struct ScheduleTrigger {
    job: String,
}

impl ScheduleTrigger {
    pub fn new(job: impl Into<String>) -> Self {
        Self { job: job.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.jobs.transform.name.clone())
    }
}

impl Trigger for ScheduleTrigger {
    fn name(&self) -> &'static str {
        "schedule"
    }

    fn plan(&self, _events: &[StageEvent]) -> Vec<Effect> {
        vec![Effect::StartJob {
            job: self.job.clone(),
            arguments: BTreeMap::new(),
        }]
    }

    fn reads_payload(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::memory::MemoryCloud;
    use crate::resource::ResourceKind;
    use crate::stage::{ResponseStatus, invoke};

    #[test]
    fn test_plan_ignores_payload() {
        let trigger = ScheduleTrigger::new("glue-clean-transform");
        let expected = vec![Effect::StartJob {
            job: "glue-clean-transform".to_string(),
            arguments: BTreeMap::new(),
        }];

        assert_eq!(trigger.plan(&[StageEvent::TimerTick]), expected);
        assert_eq!(trigger.plan(&[]), expected);
        assert_eq!(
            trigger.plan(&[
                StageEvent::TimerTick,
                StageEvent::ObjectWritten {
                    bucket: "b".to_string(),
                    key: "k".to_string()
                }
            ]),
            expected
        );
    }

    #[tokio::test]
    async fn test_invoke_returns_run_id() {
        let cloud = MemoryCloud::new();
        cloud.seed_resource(ResourceKind::BatchJob, "glue-clean-transform");

        let response = invoke(
            &ScheduleTrigger::new("glue-clean-transform"),
            &cloud,
            &[StageEvent::TimerTick],
        )
        .await;

        assert!(response.is_success());
        assert_eq!(response.job_run_ids.len(), 1);
        assert_eq!(cloud.job_runs().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_job_reports_error() {
        let cloud = MemoryCloud::new();

        let response = invoke(
            &ScheduleTrigger::new("glue-clean-transform"),
            &cloud,
            &[StageEvent::TimerTick],
        )
        .await;

        assert_eq!(response.status, ResponseStatus::Error);
        assert!(
            response
                .message
                .unwrap()
                .contains("Failed to start job 'glue-clean-transform'")
        );
        assert!(response.job_run_ids.is_empty());
    }
}
