pub mod programs;
pub mod runner;

pub use runner::{DeploymentPlan, DeploymentReport, DeploymentRunner, RunningDeployment};
