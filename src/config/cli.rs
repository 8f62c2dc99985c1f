use crate::config::DeployOptions;
use crate::utils::error::Result;
use crate::utils::validation::{validate_path, validate_range, Validate};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "small-deploy")]
#[command(about = "Deploy a topology of services wired together by typed ports")]
pub struct CliConfig {
    #[arg(long, short = 't', help = "Topology file (TOML)")]
    pub topology: PathBuf,

    #[arg(long, help = "Override the handshake timeout in milliseconds")]
    pub handshake_timeout_ms: Option<u64>,

    #[arg(long, help = "Stop after this many seconds instead of waiting for Ctrl-C")]
    pub run_for_secs: Option<u64>,

    #[arg(long, help = "Validate the topology and print the plan without deploying")]
    pub dry_run: bool,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[arg(long, help = "Log CPU and memory usage per phase")]
    pub monitor: bool,

    #[arg(long, help = "Write the deployment report (JSON) to this path")]
    pub report: Option<PathBuf>,
}

impl CliConfig {
    /// CLI 參數優先於拓撲檔的設定
    pub fn apply_overrides(&self, mut options: DeployOptions) -> DeployOptions {
        if let Some(timeout_ms) = self.handshake_timeout_ms {
            options.handshake_timeout_ms = timeout_ms;
        }
        options
    }

    pub fn run_for(&self) -> Option<Duration> {
        self.run_for_secs.map(Duration::from_secs)
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validate_path("topology", &self.topology.to_string_lossy())?;
        if let Some(timeout_ms) = self.handshake_timeout_ms {
            validate_range("handshake_timeout_ms", timeout_ms, 1, crate::config::MAX_HANDSHAKE_TIMEOUT_MS)?;
        }
        if let Some(report) = &self.report {
            validate_path("report", &report.to_string_lossy())?;
        }
        Ok(())
    }
}
