use crate::adapters::client_only::ClientOnlyHost;
use crate::adapters::custom::CustomService;
use crate::adapters::localhost::TcpHost;
#[cfg(unix)]
use crate::adapters::unix::UnixHost;
use crate::adapters::managed::{ManagedService, StdoutWriter};
use crate::config::DeployOptions;
use crate::core::graph::BindingGraph;
use crate::core::handle::{Connection, ServerPort, ServicePorts};
use crate::core::handshake::{HandshakeEngine, Wiring};
use crate::domain::model::{
    Address, BindingId, DeploymentState, HostId, PortId, PortRole, ServiceId, ServiceKind,
};
use crate::domain::ports::{Host, Service};
use crate::utils::broadcast::LineStream;
use crate::utils::error::{Culprit, DeployError, Result};
use futures::future::{join_all, try_join_all};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// 部署失敗或被取消時，把已經 materialize 的 service 全部收回
struct RollbackGuard {
    services: Vec<Arc<dyn Service>>,
    armed: bool,
}

impl RollbackGuard {
    fn arm(services: Vec<Arc<dyn Service>>) -> Self {
        Self {
            services,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(
            "↩️ Rolling back {} service(s) after an incomplete deploy",
            self.services.len()
        );
        for service in &self.services {
            service.dematerialize();
        }
    }
}

/// 整個部署的根物件：擁有 Host、Service 與 Binding 圖，並驅動兩階段生命週期
/// （`Building → Deployed → Started → Stopped`）。
pub struct Deployment {
    name: String,
    options: DeployOptions,
    hosts: Vec<Arc<dyn Host>>,
    services: Vec<Arc<dyn Service>>,
    graph: BindingGraph,
    state: DeploymentState,
    attempt: u64,
    addresses: Arc<HashMap<PortId, Address>>,
    handles: HashMap<PortId, Connection>,
}

impl Default for Deployment {
    fn default() -> Self {
        Self::new()
    }
}

impl Deployment {
    pub fn new() -> Self {
        Self::with_options(DeployOptions::default())
    }

    pub fn with_options(options: DeployOptions) -> Self {
        let name = format!("deploy_{}", chrono::Utc::now().format("%Y%m%d_%H%M%S"));
        Self::named(name, options)
    }

    pub fn named(name: impl Into<String>, options: DeployOptions) -> Self {
        Self {
            name: name.into(),
            options,
            hosts: Vec::new(),
            services: Vec::new(),
            graph: BindingGraph::new(),
            state: DeploymentState::Building,
            attempt: 0,
            addresses: Arc::new(HashMap::new()),
            handles: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> DeploymentState {
        self.state
    }

    /// 已執行過的 `deploy()` 次數（含失敗）
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn graph(&self) -> &BindingGraph {
        &self.graph
    }

    // ---- 宣告 ----

    pub fn add_host(&mut self, host: Arc<dyn Host>) -> Result<HostId> {
        self.ensure_building("add a host")?;
        self.hosts.push(host);
        Ok(HostId(self.hosts.len() - 1))
    }

    pub fn localhost(&mut self) -> Result<HostId> {
        let name = format!("localhost-{}", self.hosts.len());
        self.add_host(Arc::new(TcpHost::local(name)))
    }

    pub fn remote_host(&mut self, name: &str, bind_ip: &str, advertise: &str) -> Result<HostId> {
        self.add_host(Arc::new(TcpHost::remote(name, bind_ip, advertise)))
    }

    /// 以 Unix domain socket 接受連線的本機 Host
    #[cfg(unix)]
    pub fn unix_host(&mut self) -> Result<HostId> {
        let name = format!("unix-{}", self.hosts.len());
        self.add_host(Arc::new(UnixHost::new(name)))
    }

    /// 同一台 Host 的 client-only 視圖
    pub fn client_only(&mut self, host: HostId) -> Result<HostId> {
        let inner = Arc::clone(self.host(host)?);
        self.add_host(Arc::new(ClientOnlyHost::new(inner)))
    }

    pub fn host(&self, id: HostId) -> Result<&Arc<dyn Host>> {
        self.hosts.get(id.0).ok_or_else(|| DeployError::UnknownEntity {
            kind: "host",
            id: id.to_string(),
        })
    }

    pub fn add_service(&mut self, on: HostId, service: Arc<dyn Service>) -> Result<ServiceId> {
        self.ensure_building("add a service")?;
        self.host(on)?;
        let id = self.graph.add_service(service.name(), on)?;
        self.services.push(service);
        Ok(id)
    }

    pub fn custom_service(&mut self, name: &str, on: HostId) -> Result<ServiceId> {
        self.add_service(on, Arc::new(CustomService::new(name)))
    }

    pub fn managed_service<F, Fut>(&mut self, name: &str, on: HostId, program: F) -> Result<ServiceId>
    where
        F: FnOnce(ServicePorts, StdoutWriter) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add_service(on, Arc::new(ManagedService::new(name, program)))
    }

    pub fn sender(&mut self, service: ServiceId, name: &str) -> Result<PortId> {
        self.ensure_building("declare a port")?;
        self.graph.declare_port(service, name, PortRole::Sender)
    }

    pub fn receiver(&mut self, service: ServiceId, name: &str) -> Result<PortId> {
        self.ensure_building("declare a port")?;
        self.graph.declare_port(service, name, PortRole::Receiver)
    }

    pub fn client_port(&mut self, service: ServiceId) -> Result<PortId> {
        self.ensure_building("declare a port")?;
        self.graph.anonymous_sender(service)
    }

    pub fn merge(&mut self, port: PortId) -> Result<PortId> {
        self.ensure_building("mark a port as merge")?;
        self.graph.merge(port)
    }

    pub fn fan_out(&mut self, port: PortId) -> Result<PortId> {
        self.ensure_building("mark a port as fan-out")?;
        self.graph.fan_out(port)
    }

    pub fn send_to(&mut self, sender: PortId, receiver: PortId) -> Result<BindingId> {
        self.ensure_building("bind ports")?;
        self.graph.send_to(sender, receiver)
    }

    // ---- 生命週期 ----

    /// 第一階段：materialize 所有 service，再保留位址並完成每條 Binding 的連線。
    ///
    /// 失敗或被取消時整個部署回到 `Building`，不留下任何半接好的連線，可以直接重試。
    pub async fn deploy(&mut self) -> Result<()> {
        if self.state != DeploymentState::Building {
            return Err(DeployError::InvalidState {
                operation: "deploy",
                state: self.state,
            });
        }

        self.attempt += 1;
        tracing::info!(
            "🚀 Deploying `{}` (attempt {}): {} service(s), {} binding(s)",
            self.name,
            self.attempt,
            self.services.len(),
            self.graph.bindings().len()
        );

        let guard = RollbackGuard::arm(self.services.clone());

        let wiring = {
            let graph = &self.graph;
            let hosts = &self.hosts;
            let services = &self.services;

            try_join_all(services.iter().enumerate().map(|(index, service)| async move {
                let node = graph.service(ServiceId(index))?;
                let host = hosts.get(node.host.0).cloned().ok_or_else(|| {
                    DeployError::UnknownEntity {
                        kind: "host",
                        id: node.host.to_string(),
                    }
                })?;
                service
                    .materialize(host)
                    .await
                    .map_err(|cause| DeployError::DeployFailed {
                        culprit: Culprit::Service(node.name.clone()),
                        cause,
                    })
            }))
            .await
            .inspect_err(|e| tracing::error!("❌ {}", e))?;
            tracing::debug!("📦 All services materialized");

            HandshakeEngine::new(
                &self.name,
                graph,
                hosts,
                self.attempt,
                self.options.handshake_timeout(),
            )
            .run()
            .await
            .inspect_err(|e| tracing::error!("❌ {}", e))?
        };

        self.commit(wiring);
        guard.disarm();

        tracing::info!(
            "✅ Deployment `{}` deployed with {} address(es)",
            self.name,
            self.addresses.len()
        );
        Ok(())
    }

    fn commit(&mut self, wiring: Wiring) {
        let Wiring {
            addresses,
            mut sinks,
            mut streams,
        } = wiring;

        let mut per_service: Vec<HashMap<String, Connection>> =
            (0..self.services.len()).map(|_| HashMap::new()).collect();
        let mut custom = HashMap::new();

        for (port, spec) in self.graph.ports() {
            let connection = match spec.role {
                PortRole::Sender => sinks.remove(&port).map(Connection::Sink),
                PortRole::Receiver => streams.remove(&port).map(Connection::Stream),
            };
            let Some(connection) = connection else {
                continue;
            };
            match self.services[spec.service.0].kind() {
                ServiceKind::Managed => {
                    per_service[spec.service.0].insert(spec.name.clone(), connection);
                }
                ServiceKind::Custom => {
                    custom.insert(port, connection);
                }
            }
        }

        for (index, connections) in per_service.into_iter().enumerate() {
            let service = &self.services[index];
            if service.kind() == ServiceKind::Managed {
                service.attach(ServicePorts::new(service.name().to_string(), connections));
            }
        }

        self.addresses = Arc::new(addresses);
        self.handles = custom;
        self.state = DeploymentState::Deployed;
    }

    /// 第二階段：通知所有 service 開始運作。必須在 `deploy()` 成功之後、且只能呼叫一次。
    pub async fn start(&mut self) -> Result<()> {
        match self.state {
            DeploymentState::Deployed => {}
            DeploymentState::Building => return Err(DeployError::NotDeployed { operation: "start" }),
            state => {
                return Err(DeployError::InvalidState {
                    operation: "start",
                    state,
                })
            }
        }

        tracing::info!("🎬 Starting {} service(s) of `{}`", self.services.len(), self.name);
        let started = try_join_all(self.services.iter().map(|service| service.on_start())).await;

        if let Err(e) = started {
            tracing::error!("❌ Start failed, stopping `{}`: {}", self.name, e);
            self.shutdown().await;
            return Err(e);
        }

        self.state = DeploymentState::Started;
        tracing::info!("✅ Deployment `{}` started", self.name);
        Ok(())
    }

    /// 停止所有 service 並釋放所有連線；對已停止的部署是 no-op
    pub async fn stop(&mut self) -> Result<()> {
        match self.state {
            DeploymentState::Building => Err(DeployError::NotDeployed { operation: "stop" }),
            DeploymentState::Stopped => Ok(()),
            DeploymentState::Deployed | DeploymentState::Started => {
                self.shutdown().await;
                tracing::info!("🛑 Deployment `{}` stopped", self.name);
                Ok(())
            }
        }
    }

    async fn shutdown(&mut self) {
        let results = join_all(self.services.iter().map(|service| service.on_stop())).await;
        for (service, result) in self.services.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!("⚠️ Service `{}` did not stop cleanly: {}", service.name(), e);
            }
        }
        self.handles.clear();
        self.state = DeploymentState::Stopped;
    }

    // ---- 部署後的存取 ----

    pub fn address(&self, port: PortId) -> Option<&Address> {
        self.addresses.get(&port)
    }

    /// 部署完成後唯讀的 Port → Address 表，可自由分享
    pub fn addresses(&self) -> Arc<HashMap<PortId, Address>> {
        Arc::clone(&self.addresses)
    }

    /// 取出 custom service 上某個 port 的 handle；每個 port 只能取一次
    pub fn server_port(&mut self, port: PortId) -> Result<ServerPort> {
        let (role, owner) = {
            let spec = self.graph.port(port)?;
            (spec.role, spec.service)
        };
        let name = self.graph.qualified_name(port);
        match self.state {
            DeploymentState::Deployed | DeploymentState::Started => {}
            DeploymentState::Building => {
                return Err(DeployError::NotDeployed {
                    operation: "resolve a server port",
                })
            }
            state => {
                return Err(DeployError::InvalidState {
                    operation: "resolve a server port",
                    state,
                })
            }
        }

        let addresses = match role {
            PortRole::Receiver => self.address(port).cloned().into_iter().collect(),
            PortRole::Sender => self
                .graph
                .outgoing(port)
                .filter_map(|binding| self.address(binding.receiver).cloned())
                .collect(),
        };

        if self.services[owner.0].kind() != ServiceKind::Custom {
            return Err(DeployError::HandleUnavailable {
                port: name,
                reason: "handles of managed services belong to their program".to_string(),
            });
        }
        let connection = self
            .handles
            .remove(&port)
            .ok_or_else(|| DeployError::HandleUnavailable {
                port: name.clone(),
                reason: "the handle was already taken".to_string(),
            })?;

        Ok(ServerPort::new(port, name, addresses, connection))
    }

    pub fn stdout(&self, service: ServiceId) -> Result<LineStream> {
        self.graph.service(service)?;
        match self.state {
            DeploymentState::Deployed | DeploymentState::Started => self.services[service.0].stdout(),
            DeploymentState::Building => Err(DeployError::NotDeployed {
                operation: "read stdout",
            }),
            DeploymentState::Stopped => Err(DeployError::InvalidState {
                operation: "read stdout",
                state: DeploymentState::Stopped,
            }),
        }
    }

    fn ensure_building(&self, operation: &'static str) -> Result<()> {
        if self.state == DeploymentState::Building {
            Ok(())
        } else {
            Err(DeployError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }
}

impl Drop for Deployment {
    fn drop(&mut self) {
        if self.state != DeploymentState::Building {
            for service in &self.services {
                service.dematerialize();
            }
        }
    }
}
