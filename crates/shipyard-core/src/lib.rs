//! Shipyard Core: repository in, running service out.
//!
//! Layer 2 of the workspace. A [`Pipeline`] validates a repository with the
//! security gate from `shipyard-scan`, builds an image with the
//! [`ImageBuilder`], and publishes it with the [`DeploymentManager`], both of
//! which talk to the remote services through the `shipyard-cloud` seams.

pub mod builder;
pub mod config;
pub mod deployer;
pub mod error;
pub mod metrics;
pub mod obs;
pub mod pipeline;
pub mod request;
pub mod telemetry;

pub use builder::{BuiltImage, ImageBuilder};
pub use config::{PollPolicy, ServiceDefaults, ShipyardConfig};
pub use deployer::{DeployAction, DeployedService, DeploymentManager, PublicAccess};
pub use error::{DeployError, DeployResult};
pub use pipeline::{DeploymentOutcome, Pipeline, Stage};
pub use request::DeploymentRequest;
