#[cfg(feature = "cli")]
pub mod cli;
pub mod topology;

use crate::utils::error::Result;
use crate::utils::validation::{validate_range, Validate};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(feature = "cli")]
pub use cli::CliConfig;

pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
pub const MAX_HANDSHAKE_TIMEOUT_MS: u64 = 10 * 60 * 1000;

/// 部署的執行參數
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployOptions {
    /// connect / accept 階段的上限
    pub handshake_timeout_ms: u64,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
        }
    }
}

impl DeployOptions {
    pub fn with_handshake_timeout(timeout: Duration) -> Self {
        Self {
            handshake_timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Validate for DeployOptions {
    fn validate(&self) -> Result<()> {
        validate_range(
            "handshake_timeout_ms",
            self.handshake_timeout_ms,
            1,
            MAX_HANDSHAKE_TIMEOUT_MS,
        )
    }
}
