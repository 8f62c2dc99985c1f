use crate::adapters::managed::StdoutWriter;
use crate::core::handle::ServicePorts;
use crate::utils::error::{DeployError, Result};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;

fn unknown_args(program: &str, args: &HashMap<String, String>, allowed: &[&str]) -> Result<()> {
    match args.keys().find(|key| !allowed.contains(&key.as_str())) {
        Some(key) => Err(DeployError::InvalidConfigValueError {
            field: "services.args".to_string(),
            value: key.clone(),
            reason: format!(
                "Unknown argument for `{}`; allowed: {}",
                program,
                if allowed.is_empty() { "none".to_string() } else { allowed.join(", ") }
            ),
        }),
        None => Ok(()),
    }
}

fn parse_u64(args: &HashMap<String, String>, key: &str, default: u64, min: u64) -> Result<u64> {
    let Some(raw) = args.get(key) else {
        return Ok(default);
    };
    let value = raw.trim().parse::<u64>().map_err(|e| DeployError::InvalidConfigValueError {
        field: format!("services.args.{}", key),
        value: raw.clone(),
        reason: format!("Expected an unsigned integer: {}", e),
    })?;
    crate::utils::validation::validate_range(&format!("services.args.{}", key), value, min, u64::MAX)?;
    Ok(value)
}

/// `ticker` 的參數
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickerArgs {
    pub interval_ms: u64,
    pub count: u64,
}

impl Default for TickerArgs {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            count: 10,
        }
    }
}

impl TickerArgs {
    pub fn from_args(args: &HashMap<String, String>) -> Result<Self> {
        unknown_args("ticker", args, &["interval_ms", "count"])?;
        let defaults = Self::default();
        Ok(Self {
            interval_ms: parse_u64(args, "interval_ms", defaults.interval_ms, 1)?,
            count: parse_u64(args, "count", defaults.count, 0)?,
        })
    }
}

/// `echo` 不接受參數
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EchoArgs;

impl EchoArgs {
    pub fn from_args(args: &HashMap<String, String>) -> Result<Self> {
        unknown_args("echo", args, &[])?;
        Ok(Self)
    }
}

/// 每隔 `interval_ms` 在 `output` 送出 `tick <n>`，共 `count` 次
pub async fn ticker(args: TickerArgs, mut ports: ServicePorts, stdout: StdoutWriter) -> anyhow::Result<()> {
    let mut output = ports.take_sink("output")?;
    let mut interval = tokio::time::interval(Duration::from_millis(args.interval_ms));

    for n in 1..=args.count {
        interval.tick().await;
        let line = format!("tick {}", n);
        output.send(line.clone()).await?;
        stdout.println(line);
    }

    output.close().await?;
    Ok(())
}

/// 把 `input` 收到的每個 payload 印成 `echo "<payload>"`，有綁定 `output` 時一併轉送
pub async fn echo(mut ports: ServicePorts, stdout: StdoutWriter) -> anyhow::Result<()> {
    let mut input = ports.take_stream("input")?;
    let mut output = if ports.contains("output") {
        Some(ports.take_sink("output")?)
    } else {
        None
    };

    while let Some(payload) = input.next().await {
        let payload = payload?;
        stdout.println(format!("echo \"{}\"", String::from_utf8_lossy(&payload)));
        if let Some(output) = output.as_mut() {
            output.send(payload).await?;
        }
    }

    tracing::debug!("Echo input drained after all senders closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_ticker_args_defaults_and_overrides() {
        assert_eq!(TickerArgs::from_args(&HashMap::new()).unwrap(), TickerArgs::default());

        let parsed = TickerArgs::from_args(&args(&[("interval_ms", "50"), ("count", "2")])).unwrap();
        assert_eq!(parsed, TickerArgs { interval_ms: 50, count: 2 });
    }

    #[test]
    fn test_ticker_args_rejects_bad_values() {
        assert!(TickerArgs::from_args(&args(&[("interval_ms", "0")])).is_err());
        assert!(TickerArgs::from_args(&args(&[("count", "-1")])).is_err());
        assert!(TickerArgs::from_args(&args(&[("speed", "fast")])).is_err());
    }

    #[test]
    fn test_echo_takes_no_args() {
        assert!(EchoArgs::from_args(&HashMap::new()).is_ok());
        assert!(EchoArgs::from_args(&args(&[("prefix", ">")])).is_err());
    }
}
