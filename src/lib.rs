//! sleet: provisions and drives a scheduled batch pipeline from object storage
//! into a serverless warehouse.
//!
//! Three stages run as independent, stateless invocations:
//!
//! - a timer tick starts the transform job
//! - a write under the transformed prefix starts the split job
//! - the loader ensures the warehouse and catalog, crawls the curated data and
//!   loads the star schema
//!
//! Every remote resource is created through [`resource::ensure`], so any stage
//! can run against a fresh or a fully provisioned account.
//!
//! # Example
//!
//! ```ignore
//! use sleet::{Config, Loader, cloud::aws::AwsCloud};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = Config::from_file("sleet.yaml")?;
//! let cloud = AwsCloud::load(&config.aws).await;
//! let response = Loader::new(&cloud, &config, CancellationToken::new()).invoke().await;
//! println!("{}", serde_json::to_string(&response)?);
//! ```

pub mod cloud;
pub mod config;
pub mod error;
pub mod metrics;
pub mod poll;
pub mod resource;
pub mod setup;
pub mod signal;
pub mod stage;
pub mod warehouse;
pub mod wiring;

// Re-export main types
pub use config::Config;
pub use resource::{EnsureOutcome, ResourceDescriptor, ResourceSpec, ensure};
pub use stage::{
    Loader, ObjectWrittenTrigger, ScheduleTrigger, StageEvent, StageResponse, Trigger, invoke,
    invoke_payload, parse_events,
};
