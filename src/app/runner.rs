use crate::app::programs::{self, EchoArgs, TickerArgs};
use crate::config::topology::{parse_endpoint, HostKindConfig, ProgramKind, TopologyConfig};
use crate::config::DeployOptions;
use crate::core::deployment::Deployment;
use crate::domain::model::{DeploymentState, HostId, PortId, PortRole, ServiceId, ServiceKind};
use crate::utils::error::{DeployError, Result};
use crate::utils::monitor::PhaseMonitor;
use crate::utils::validation::Validate;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tokio::task::JoinHandle;

/// dry run 的輸出：部署前就能確定的拓撲形狀
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentPlan {
    pub name: String,
    pub handshake_timeout_ms: u64,
    pub services: Vec<PlannedService>,
    pub bindings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedService {
    pub name: String,
    pub host: String,
    pub kind: ServiceKind,
    pub ports: Vec<PlannedPort>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedPort {
    pub name: String,
    pub role: PortRole,
    pub merge: bool,
    pub fan_out: bool,
    pub bindings: usize,
}

/// 部署結果，可序列化成 JSON 報告
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentReport {
    pub name: String,
    pub attempt: u64,
    pub state: DeploymentState,
    pub deployed_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    /// `svc.port` → `tcp://host:port`
    pub addresses: BTreeMap<String, String>,
}

/// 從拓撲建好、尚未部署的 Deployment
pub struct BuiltTopology {
    pub deployment: Deployment,
    pub services: HashMap<String, ServiceId>,
    pub ports: HashMap<String, PortId>,
}

/// 把 TopologyConfig 轉成 Deployment 並驅動它的生命週期
pub struct DeploymentRunner {
    config: TopologyConfig,
    options: DeployOptions,
}

impl DeploymentRunner {
    pub fn new(config: TopologyConfig) -> Self {
        let options = config.options();
        Self { config, options }
    }

    pub fn with_options(mut self, options: DeployOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> DeployOptions {
        self.options
    }

    /// 依宣告順序建立 Host、Service、Port 與 Binding
    pub fn build(&self) -> Result<BuiltTopology> {
        self.config.validate()?;
        self.options.validate()?;

        let mut deployment = Deployment::named(self.config.deployment.name.clone(), self.options);

        let mut hosts: HashMap<&str, HostId> = HashMap::new();
        for host in &self.config.hosts {
            let id = match host.kind {
                HostKindConfig::Local => deployment.localhost()?,
                #[cfg(unix)]
                HostKindConfig::Unix => deployment.unix_host()?,
                #[cfg(not(unix))]
                HostKindConfig::Unix => {
                    return Err(DeployError::ConfigError {
                        message: format!("host `{}`: unix sockets are not available on this platform", host.name),
                    })
                }
                HostKindConfig::Remote => deployment.remote_host(
                    &host.name,
                    host.bind_ip(),
                    host.advertise.as_deref().unwrap_or_default(),
                )?,
                HostKindConfig::ClientOnly => {
                    let of = host.of.as_deref().unwrap_or_default();
                    let inner = hosts.get(of).copied().ok_or_else(|| DeployError::MissingConfigError {
                        field: format!("hosts.of ({})", of),
                    })?;
                    deployment.client_only(inner)?
                }
            };
            hosts.insert(host.name.as_str(), id);
        }

        let mut services = HashMap::new();
        let mut ports = HashMap::new();
        for service in &self.config.services {
            let host = hosts
                .get(service.host.as_str())
                .copied()
                .ok_or_else(|| DeployError::MissingConfigError {
                    field: format!("services.host ({})", service.host),
                })?;

            let id = match service.program {
                ProgramKind::Custom => deployment.custom_service(&service.name, host)?,
                ProgramKind::Ticker => {
                    let args = TickerArgs::from_args(&service.args)?;
                    deployment.managed_service(&service.name, host, move |ports, stdout| {
                        programs::ticker(args, ports, stdout)
                    })?
                }
                ProgramKind::Echo => {
                    EchoArgs::from_args(&service.args)?;
                    deployment.managed_service(&service.name, host, programs::echo)?
                }
            };

            for (port, role) in service.program.declared_ports() {
                let port_id = match role {
                    PortRole::Sender => deployment.sender(id, port)?,
                    PortRole::Receiver => deployment.receiver(id, port)?,
                };
                ports.insert(format!("{}.{}", service.name, port), port_id);
            }
            services.insert(service.name.clone(), id);
        }

        let mut resolve = |deployment: &mut Deployment, field: &str, value: &str, role: PortRole| -> Result<PortId> {
            if let Some(port) = ports.get(value) {
                return Ok(*port);
            }
            let endpoint = parse_endpoint(field, value)?;
            let service = services
                .get(endpoint.service)
                .copied()
                .ok_or_else(|| DeployError::MissingConfigError {
                    field: format!("{} ({})", field, value),
                })?;
            let port = match role {
                PortRole::Sender => deployment.sender(service, endpoint.port)?,
                PortRole::Receiver => deployment.receiver(service, endpoint.port)?,
            };
            ports.insert(value.to_string(), port);
            Ok(port)
        };

        let mut resolved = Vec::with_capacity(self.config.bindings.len());
        for binding in &self.config.bindings {
            let from = resolve(&mut deployment, "bindings.from", &binding.from, PortRole::Sender)?;
            let to = resolve(&mut deployment, "bindings.to", &binding.to, PortRole::Receiver)?;
            // 基數標記要在所有 send_to 之前完成
            if binding.fan_out {
                deployment.fan_out(from)?;
            }
            if binding.merge {
                deployment.merge(to)?;
            }
            resolved.push((from, to));
        }
        for (from, to) in resolved {
            deployment.send_to(from, to)?;
        }

        tracing::debug!(
            "🧩 Built `{}`: {} host(s), {} service(s), {} binding(s)",
            deployment.name(),
            hosts.len(),
            services.len(),
            deployment.graph().bindings().len()
        );

        Ok(BuiltTopology {
            deployment,
            services,
            ports,
        })
    }

    /// 只檢查與建圖，不保留任何位址
    pub fn plan(&self) -> Result<DeploymentPlan> {
        let built = self.build()?;
        let graph = built.deployment.graph();

        let mut services = Vec::new();
        for (_, node) in graph.services() {
            let host = built.deployment.host(node.host)?;
            let kind = match self.config.service(&node.name).map(|s| s.program) {
                Some(ProgramKind::Custom) | None => ServiceKind::Custom,
                Some(_) => ServiceKind::Managed,
            };
            let mut ports: Vec<PlannedPort> = node
                .ports()
                .filter_map(|port| graph.port(port).ok().map(|spec| (port, spec)))
                .map(|(port, spec)| PlannedPort {
                    name: spec.name.clone(),
                    role: spec.role,
                    merge: spec.is_merge(),
                    fan_out: spec.is_fan_out(),
                    bindings: match spec.role {
                        PortRole::Sender => graph.outgoing(port).count(),
                        PortRole::Receiver => graph.in_degree(port),
                    },
                })
                .collect();
            ports.sort_by(|a, b| a.name.cmp(&b.name));
            services.push(PlannedService {
                name: node.name.clone(),
                host: host.name().to_string(),
                kind,
                ports,
            });
        }

        let bindings = graph
            .bindings()
            .iter()
            .map(|b| {
                format!(
                    "{} -> {}",
                    graph.qualified_name(b.sender),
                    graph.qualified_name(b.receiver)
                )
            })
            .collect();

        Ok(DeploymentPlan {
            name: built.deployment.name().to_string(),
            handshake_timeout_ms: self.options.handshake_timeout_ms,
            services,
            bindings,
        })
    }

    /// 建圖、deploy、start，每個階段交給 monitor 記錄
    pub async fn deploy_and_start(&self, monitor: &mut PhaseMonitor) -> Result<RunningDeployment> {
        let BuiltTopology {
            mut deployment,
            ports,
            ..
        } = self.build()?;

        monitor.begin("deploy");
        deployment.deploy().await?;
        monitor.finish("deploy");
        let deployed_at = Utc::now();

        let taps = self.tap_custom_receivers(&mut deployment, &ports)?;

        monitor.begin("start");
        deployment.start().await?;
        monitor.finish("start");

        let addresses = ports
            .iter()
            .filter_map(|(name, port)| {
                deployment
                    .address(*port)
                    .map(|address| (name.clone(), address.to_string()))
            })
            .collect();

        let report = DeploymentReport {
            name: deployment.name().to_string(),
            attempt: deployment.attempt(),
            state: deployment.state(),
            deployed_at,
            started_at: Some(Utc::now()),
            stopped_at: None,
            addresses,
        };

        Ok(RunningDeployment {
            deployment,
            taps,
            report,
        })
    }

    /// 拓撲檔裡的 custom receiver 沒有呼叫端讀取，收到的 payload 改寫進日誌
    fn tap_custom_receivers(
        &self,
        deployment: &mut Deployment,
        ports: &HashMap<String, PortId>,
    ) -> Result<Vec<JoinHandle<()>>> {
        let mut taps = Vec::new();
        for (name, port) in ports {
            let is_custom = parse_endpoint("bindings.to", name)
                .ok()
                .and_then(|endpoint| self.config.service(endpoint.service))
                .is_some_and(|service| service.program == ProgramKind::Custom);
            if !is_custom || deployment.graph().port(*port)?.role != PortRole::Receiver {
                continue;
            }

            let mut stream = deployment.server_port(*port)?.into_stream()?;
            let name = name.clone();
            tracing::debug!("👂 Tapping custom receiver {}", name);
            taps.push(tokio::spawn(async move {
                while let Some(payload) = stream.next().await {
                    match payload {
                        Ok(payload) => {
                            tracing::info!("[{}] {}", name, String::from_utf8_lossy(&payload))
                        }
                        Err(e) => {
                            tracing::warn!("⚠️ {}", e);
                            break;
                        }
                    }
                }
            }));
        }
        Ok(taps)
    }
}

/// 已啟動的部署；`stop()` 之後產生最終報告
pub struct RunningDeployment {
    deployment: Deployment,
    taps: Vec<JoinHandle<()>>,
    report: DeploymentReport,
}

impl RunningDeployment {
    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub fn report(&self) -> &DeploymentReport {
        &self.report
    }

    pub async fn stop(mut self, monitor: &mut PhaseMonitor) -> Result<DeploymentReport> {
        monitor.begin("stop");
        self.deployment.stop().await?;
        for tap in self.taps.drain(..) {
            tap.abort();
        }
        monitor.finish("stop");

        self.report.state = self.deployment.state();
        self.report.stopped_at = Some(Utc::now());
        Ok(self.report)
    }
}
