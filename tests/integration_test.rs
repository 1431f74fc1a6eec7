//! Integration tests for sleet

use sleet::cloud::memory::{Call, MemoryCloud};
use sleet::config::Config;
use sleet::resource::ResourceKind;
use sleet::stage::{self, Loader, ObjectWrittenTrigger, ScheduleTrigger, StageEvent};
use tokio_util::sync::CancellationToken;

const CONFIG: &str = r#"
bucket: dp-datawarehouse-solution-1
roles:
  - name: glue-etl-role
    service: glue.amazonaws.com
warehouse:
  admin_password: "Password123!"
"#;

fn config() -> Config {
    Config::from_yaml(CONFIG).unwrap()
}

fn count(cloud: &MemoryCloud, matches: impl Fn(&Call) -> bool) -> usize {
    cloud.calls().iter().filter(|c| matches(c)).count()
}

mod config_tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_from_file_with_env() {
        // SAFETY: test-only variable, not read by any other test.
        unsafe { std::env::set_var("SLEET_TEST_ADMIN_PASSWORD", "from-env") };
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
bucket: dw-bucket
warehouse:
  admin_password: "${{SLEET_TEST_ADMIN_PASSWORD}}"
  base_capacity: 16
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.warehouse.admin_password.expose(), "from-env");
        assert_eq!(config.warehouse.base_capacity, 16);
        assert_eq!(config.warehouse.workgroup, "dw-workgroup");
    }

    #[test]
    fn test_config_missing_file() {
        assert!(Config::from_file("/nonexistent/sleet.yaml").is_err());
    }

    #[test]
    fn test_config_rejects_prefix_without_slash() {
        let yaml = r#"
bucket: dw-bucket
prefixes:
  transformed: transformed
warehouse:
  admin_password: "x"
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("prefixes.transformed"));
    }
}

mod pipeline_tests {
    use super::*;

    #[tokio::test]
    async fn test_end_to_end_on_fresh_account() {
        let cloud = MemoryCloud::new();
        let config = config();

        sleet::setup::setup(&cloud, &config).await.unwrap();
        sleet::wiring::wire(&cloud, &config).await.unwrap();

        let tick = stage::invoke(
            &ScheduleTrigger::from_config(&config),
            &cloud,
            &[StageEvent::TimerTick],
        )
        .await;
        assert!(tick.is_success());
        assert_eq!(tick.job_run_ids.len(), 1);

        let payload = r#"{"Records": [
            {"s3": {"bucket": {"name": "dp-datawarehouse-solution-1"}, "object": {"key": "transformed/part-0.parquet"}}},
            {"s3": {"bucket": {"name": "dp-datawarehouse-solution-1"}, "object": {"key": "transformed/_SUCCESS"}}},
            {"s3": {"bucket": {"name": "dp-datawarehouse-solution-1"}, "object": {"key": "raw/part-0.parquet"}}}
        ]}"#;
        let events = stage::parse_events(payload).unwrap();
        let split = stage::invoke(&ObjectWrittenTrigger::from_config(&config), &cloud, &events).await;
        assert!(split.is_success());
        assert_eq!(split.job_run_ids.len(), 1);

        let runs = cloud.job_runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].0, "glue-clean-transform");
        assert!(runs[0].1.is_empty());
        assert_eq!(runs[1].0, "glue-split-fact-dim");
        assert_eq!(runs[1].1["BUCKET_NAME"], "dp-datawarehouse-solution-1");
        assert_eq!(runs[1].1["INPUT_KEY"], "transformed/");

        let load = Loader::new(&cloud, &config, CancellationToken::new())
            .invoke()
            .await;
        assert!(load.is_success(), "{:?}", load.message);
        assert_eq!(
            load.message.as_deref(),
            Some("Loaded 3 tables into dw-workgroup")
        );

        let created: Vec<_> = cloud.created().into_iter().map(|(kind, _)| kind).collect();
        assert_eq!(
            created,
            [
                ResourceKind::Role,
                ResourceKind::BatchJob,
                ResourceKind::BatchJob,
                ResourceKind::ScheduleRule,
                ResourceKind::WarehouseNamespace,
                ResourceKind::WarehouseWorkgroup,
                ResourceKind::CatalogDatabase,
                ResourceKind::Crawler,
            ]
        );
        assert_eq!(cloud.statements().len(), 9);
    }

    #[tokio::test]
    async fn test_reinvoked_loader_creates_nothing() {
        let cloud = MemoryCloud::new();
        let config = config();
        let loader = Loader::new(&cloud, &config, CancellationToken::new());

        let first = loader.run().await.unwrap();
        let creates_after_first = cloud.created().len();
        let second = loader.run().await.unwrap();

        assert_eq!(first.created(), 4);
        assert_eq!(second.created(), 0);
        assert_eq!(cloud.created().len(), creates_after_first);
        assert_eq!(count(&cloud, |c| matches!(c, Call::StartCrawler { .. })), 2);
        assert_eq!(cloud.statements().len(), 18);
    }

    #[tokio::test(start_paused = true)]
    async fn test_workgroup_provisioning_is_awaited() {
        let cloud = MemoryCloud::new().with_workgroup_provisioning_polls(3);
        let config = config();
        let start = tokio::time::Instant::now();

        let response = Loader::new(&cloud, &config, CancellationToken::new())
            .invoke()
            .await;

        assert!(response.is_success());
        assert_eq!(count(&cloud, |c| matches!(c, Call::WorkgroupStatus { .. })), 4);
        assert_eq!(start.elapsed(), std::time::Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_workgroup_stops_the_loader() {
        let cloud = MemoryCloud::new().with_stuck_workgroups();
        let config = config();

        let response = Loader::new(&cloud, &config, CancellationToken::new())
            .invoke()
            .await;

        assert!(!response.is_success());
        let message = response.message.unwrap();
        assert!(message.contains("dw-workgroup"), "{message}");
        assert!(message.contains("900s"), "{message}");
        assert_eq!(count(&cloud, |c| matches!(c, Call::WorkgroupStatus { .. })), 60);
        assert!(
            !cloud
                .created()
                .iter()
                .any(|(kind, _)| matches!(kind, ResourceKind::CatalogDatabase | ResourceKind::Crawler))
        );
        assert_eq!(count(&cloud, |c| matches!(c, Call::StartCrawler { .. })), 0);
        assert!(cloud.statements().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_load_statement_stops_remaining_loads() {
        let cloud = MemoryCloud::new()
            .with_statement_polls(1)
            .with_failing_statements("COPY dim_product");
        let config = config();

        let response = Loader::new(&cloud, &config, CancellationToken::new())
            .invoke()
            .await;

        assert!(!response.is_success());
        let message = response.message.unwrap();
        assert!(message.contains("load statement for dim_product"), "{message}");
        // Three DDL, three truncates and the failing copy.
        assert_eq!(cloud.statements().len(), 7);
    }

    #[tokio::test]
    async fn test_crawler_already_running_is_reported() {
        let cloud = MemoryCloud::new();
        let config = config();
        cloud.seed_resource(ResourceKind::Crawler, "product-data-crawler");
        cloud.set_crawler_running("product-data-crawler");

        let response = Loader::new(&cloud, &config, CancellationToken::new())
            .invoke()
            .await;

        assert!(!response.is_success());
        let message = response.message.unwrap();
        assert!(message.contains("Failed to start crawler"), "{message}");
        assert!(message.contains("busy"), "{message}");
        assert!(cloud.statements().is_empty());
    }

    #[tokio::test]
    async fn test_split_trigger_without_job_reports_error() {
        let cloud = MemoryCloud::new();
        let config = config();
        let events = vec![StageEvent::ObjectWritten {
            bucket: config.bucket.clone(),
            key: "transformed/part-0.parquet".to_string(),
        }];

        let response = stage::invoke(&ObjectWrittenTrigger::from_config(&config), &cloud, &events).await;

        assert!(!response.is_success());
        assert!(response.job_run_ids.is_empty());
        assert!(
            response
                .message
                .unwrap()
                .contains("Failed to start job 'glue-split-fact-dim'")
        );
    }
}
