//! Storage-driven stage: start the split job when transformed output lands.

use std::collections::BTreeMap;

use super::{Effect, SkipReason, StageEvent, Trigger};
use crate::config::Config;

/// Prefix and suffix an object key must carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFilter {
    pub prefix: String,
    pub suffix: String,
}

impl KeyFilter {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    /// `None` when `key` passes, else why it does not.
    pub fn check(&self, key: &str) -> Option<SkipReason> {
        if !key.starts_with(&self.prefix) {
            Some(SkipReason::PrefixMismatch)
        } else if !key.ends_with(&self.suffix) {
            Some(SkipReason::SuffixMismatch)
        } else {
            None
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        self.check(key).is_none()
    }
}

/// Starts one split job run per matching object.
#[derive(Debug, Clone)]
pub struct ObjectWrittenTrigger {
    job: String,
    filter: KeyFilter,
}

impl ObjectWrittenTrigger {
    pub fn new(job: impl Into<String>, filter: KeyFilter) -> Self {
        Self {
            job: job.into(),
            filter,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.jobs.split.name.clone(),
            KeyFilter::new(
                config.prefixes.transformed.clone(),
                config.prefixes.transformed_suffix.clone(),
            ),
        )
    }

    fn plan_one(&self, event: &StageEvent) -> Effect {
        let (bucket, key) = match event {
            StageEvent::ObjectWritten { bucket, key } => (bucket, key),
            StageEvent::TimerTick => {
                return Effect::Skip {
                    subject: "timer tick".to_string(),
                    reason: SkipReason::NotAnObject,
                };
            }
        };

        if let Some(reason) = self.filter.check(key) {
            return Effect::Skip {
                subject: format!("s3://{bucket}/{key}"),
                reason,
            };
        }

        // The split job reads the whole transformed prefix, not the single object.
        let arguments = BTreeMap::from([
            ("BUCKET_NAME".to_string(), bucket.clone()),
            ("INPUT_KEY".to_string(), self.filter.prefix.clone()),
        ]);
        Effect::StartJob {
            job: self.job.clone(),
            arguments,
        }
    }
}

impl Trigger for ObjectWrittenTrigger {
    fn name(&self) -> &'static str {
        "object_written"
    }

    fn plan(&self, events: &[StageEvent]) -> Vec<Effect> {
        events.iter().map(|event| self.plan_one(event)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::memory::MemoryCloud;
    use crate::resource::ResourceKind;
    use crate::stage::invoke;

    fn trigger() -> ObjectWrittenTrigger {
        ObjectWrittenTrigger::new(
            "glue-split-fact-dim",
            KeyFilter::new("transformed/", ".parquet"),
        )
    }

    fn written(key: &str) -> StageEvent {
        StageEvent::ObjectWritten {
            bucket: "dw-bucket".to_string(),
            key: key.to_string(),
        }
    }

    #[test]
    fn test_filter_on_prefix_and_suffix() {
        let effects = trigger().plan(&[
            written("transformed/a.parquet"),
            written("raw/a.parquet"),
            written("transformed/a.csv"),
        ]);

        assert_eq!(
            effects,
            vec![
                Effect::StartJob {
                    job: "glue-split-fact-dim".to_string(),
                    arguments: BTreeMap::from([
                        ("BUCKET_NAME".to_string(), "dw-bucket".to_string()),
                        ("INPUT_KEY".to_string(), "transformed/".to_string()),
                    ]),
                },
                Effect::Skip {
                    subject: "s3://dw-bucket/raw/a.parquet".to_string(),
                    reason: SkipReason::PrefixMismatch,
                },
                Effect::Skip {
                    subject: "s3://dw-bucket/transformed/a.csv".to_string(),
                    reason: SkipReason::SuffixMismatch,
                },
            ]
        );
    }

    #[test]
    fn test_timer_tick_is_skipped() {
        let effects = trigger().plan(&[StageEvent::TimerTick]);
        assert!(matches!(
            effects.as_slice(),
            [Effect::Skip {
                reason: SkipReason::NotAnObject,
                ..
            }]
        ));
    }

    #[test]
    fn test_key_filter() {
        let filter = KeyFilter::new("transformed/", ".parquet");
        assert!(filter.matches("transformed/year=2024/part-0.parquet"));
        assert!(!filter.matches("transformed.parquet"));
        assert!(!filter.matches("curated/transformed/a.parquet"));
    }

    #[tokio::test]
    async fn test_invoke_starts_one_run_per_match() {
        let cloud = MemoryCloud::new();
        cloud.seed_resource(ResourceKind::BatchJob, "glue-split-fact-dim");

        let response = invoke(
            &trigger(),
            &cloud,
            &[
                written("transformed/a.parquet"),
                written("raw/a.parquet"),
                written("transformed/b.parquet"),
                written("transformed/a.csv"),
            ],
        )
        .await;

        assert!(response.is_success());
        assert_eq!(response.job_run_ids.len(), 2);
        let runs = cloud.job_runs();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|(job, args)| {
            job == "glue-split-fact-dim" && args["INPUT_KEY"] == "transformed/"
        }));
    }

    #[tokio::test]
    async fn test_no_match_is_success_without_runs() {
        let cloud = MemoryCloud::new();

        let response = invoke(&trigger(), &cloud, &[written("raw/a.parquet")]).await;

        assert!(response.is_success());
        assert!(response.job_run_ids.is_empty());
        assert!(cloud.job_runs().is_empty());
    }
}
