use clap::Parser;
use small_deploy::app::DeploymentRunner;
use small_deploy::utils::error::{DeployError, ErrorSeverity};
use small_deploy::utils::monitor::PhaseMonitor;
use small_deploy::utils::{logger, validation::Validate};
use small_deploy::{CliConfig, TopologyConfig};

fn exit_with(e: &DeployError) -> ! {
    tracing::error!(
        "❌ {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    let exit_code = match e.severity() {
        ErrorSeverity::Low => 4,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code);
}

async fn hold(config: &CliConfig) {
    match config.run_for() {
        Some(duration) => {
            tracing::info!("⏳ Running for {:?}", duration);
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = tokio::signal::ctrl_c() => tracing::info!("🛑 Ctrl-C received"),
            }
        }
        None => {
            tracing::info!("⏳ Running until Ctrl-C");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("⚠️ Cannot listen for Ctrl-C: {}", e);
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();

    // 初始化日誌
    logger::init_logger(config.verbose, config.json_logs);

    tracing::info!("Starting small-deploy CLI");
    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        exit_with(&e);
    }

    let topology = match TopologyConfig::from_file(&config.topology) {
        Ok(topology) => topology,
        Err(e) => exit_with(&e),
    };
    let runner = DeploymentRunner::new(topology);
    let runner = {
        let options = config.apply_overrides(runner.options());
        runner.with_options(options)
    };

    if config.dry_run {
        match runner.plan() {
            Ok(plan) => {
                tracing::info!("📝 Dry run for `{}`: topology is valid", plan.name);
                println!("{}", serde_json::to_string_pretty(&plan)?);
                return Ok(());
            }
            Err(e) => exit_with(&e),
        }
    }

    let mut monitor = PhaseMonitor::new(config.monitor);
    if monitor.is_enabled() {
        tracing::info!("🔍 System monitoring enabled");
    }

    let running = match runner.deploy_and_start(&mut monitor).await {
        Ok(running) => running,
        Err(e) => exit_with(&e),
    };
    for (port, address) in &running.report().addresses {
        println!("📍 {} -> {}", port, address);
    }

    hold(&config).await;

    let report = match running.stop(&mut monitor).await {
        Ok(report) => report,
        Err(e) => exit_with(&e),
    };
    monitor.log_final_stats();

    let rendered = serde_json::to_string_pretty(&report)?;
    match &config.report {
        Some(path) => {
            std::fs::write(path, rendered)?;
            tracing::info!("📁 Report saved to: {}", path.display());
        }
        None => tracing::debug!("Deployment report: {}", rendered),
    }

    println!("✅ Deployment `{}` finished", report.name);
    Ok(())
}
