pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::cli::CliConfig;

pub use adapters::managed::StdoutWriter;
pub use config::{topology::TopologyConfig, DeployOptions};
pub use core::deployment::Deployment;
pub use core::handle::{PortStream, ServerPort, ServicePorts, Sink};
pub use domain::model::{Address, DeploymentState, HostId, PortId, PortRole, ServiceId};
pub use utils::broadcast::LineStream;
pub use utils::error::{Culprit, DeployError, FailureCause, Result};
