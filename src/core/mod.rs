pub mod deployment;
pub mod graph;
pub mod handle;
pub mod handshake;

pub use crate::domain::model::{Address, DeploymentState, HostId, PortId, PortRole, ServiceId};
pub use crate::domain::ports::{Host, Service};
pub use crate::utils::error::Result;
