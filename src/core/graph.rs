use crate::domain::model::{
    Binding, BindingId, Cardinality, HostId, PortId, PortRole, PortSpec, ServiceId,
};
use crate::utils::error::{DeployError, Result};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ServiceNode {
    pub name: String,
    pub host: HostId,
    ports: HashMap<String, PortId>,
    anonymous_ports: usize,
}

impl ServiceNode {
    pub fn port_named(&self, name: &str) -> Option<PortId> {
        self.ports.get(name).copied()
    }

    pub fn ports(&self) -> impl Iterator<Item = PortId> + '_ {
        self.ports.values().copied()
    }
}

/// Service、Port 與 Binding 的 arena；`deploy()` 之前只累積、不連線
#[derive(Debug, Default, Clone)]
pub struct BindingGraph {
    services: Vec<ServiceNode>,
    ports: Vec<PortSpec>,
    bindings: Vec<Binding>,
}

impl BindingGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_service(&mut self, name: &str, host: HostId) -> Result<ServiceId> {
        if self.services.iter().any(|s| s.name == name) {
            return Err(DeployError::DuplicateName {
                kind: "service",
                name: name.to_string(),
            });
        }

        self.services.push(ServiceNode {
            name: name.to_string(),
            host,
            ports: HashMap::new(),
            anonymous_ports: 0,
        });
        Ok(ServiceId(self.services.len() - 1))
    }

    /// 宣告具名 port；同名同角色時回傳既有的 id
    pub fn declare_port(&mut self, service: ServiceId, name: &str, role: PortRole) -> Result<PortId> {
        if let Some(existing) = self.service(service)?.port_named(name) {
            let spec = &self.ports[existing.0];
            if spec.role != role {
                return Err(DeployError::RoleMismatch {
                    port: self.qualified_name(existing),
                    expected: role,
                    actual: spec.role,
                });
            }
            return Ok(existing);
        }

        let id = PortId(self.ports.len());
        self.ports.push(PortSpec {
            service,
            name: name.to_string(),
            role,
            cardinality: Cardinality::Single,
        });
        self.services[service.0].ports.insert(name.to_string(), id);
        Ok(id)
    }

    /// 匿名 sender port，供 custom service 的呼叫端直接取得 sink
    pub fn anonymous_sender(&mut self, service: ServiceId) -> Result<PortId> {
        let node = self.service(service)?;
        let mut index = node.anonymous_ports;
        let mut name = format!("client_port_{}", index);
        while node.port_named(&name).is_some() {
            index += 1;
            name = format!("client_port_{}", index);
        }

        let id = self.declare_port(service, &name, PortRole::Sender)?;
        self.services[service.0].anonymous_ports = index + 1;
        Ok(id)
    }

    pub fn merge(&mut self, port: PortId) -> Result<PortId> {
        self.widen(port, PortRole::Receiver)
    }

    pub fn fan_out(&mut self, port: PortId) -> Result<PortId> {
        self.widen(port, PortRole::Sender)
    }

    fn widen(&mut self, port: PortId, role: PortRole) -> Result<PortId> {
        let spec = self.port(port)?;
        if spec.role != role {
            return Err(DeployError::RoleMismatch {
                port: self.qualified_name(port),
                expected: role,
                actual: spec.role,
            });
        }
        self.ports[port.0].cardinality = Cardinality::Many;
        Ok(port)
    }

    pub fn send_to(&mut self, sender: PortId, receiver: PortId) -> Result<BindingId> {
        let sender_spec = self.port(sender)?;
        let receiver_spec = self.port(receiver)?;

        if sender == receiver {
            return Err(DeployError::SelfLoop {
                port: self.qualified_name(sender),
            });
        }
        if sender_spec.role != PortRole::Sender {
            return Err(DeployError::RoleMismatch {
                port: self.qualified_name(sender),
                expected: PortRole::Sender,
                actual: sender_spec.role,
            });
        }
        if receiver_spec.role != PortRole::Receiver {
            return Err(DeployError::RoleMismatch {
                port: self.qualified_name(receiver),
                expected: PortRole::Receiver,
                actual: receiver_spec.role,
            });
        }

        if let Some(existing) = self
            .bindings
            .iter()
            .find(|b| b.sender == sender && b.receiver == receiver)
        {
            return Ok(existing.id);
        }

        if !receiver_spec.is_merge() {
            if let Some(existing) = self.incoming(receiver).next() {
                return Err(DeployError::CardinalityViolation {
                    port: self.qualified_name(receiver),
                    existing: self.qualified_name(existing.sender),
                    attempted: self.qualified_name(sender),
                });
            }
        }
        if !sender_spec.is_fan_out() {
            if let Some(existing) = self.outgoing(sender).next() {
                return Err(DeployError::CardinalityViolation {
                    port: self.qualified_name(sender),
                    existing: self.qualified_name(existing.receiver),
                    attempted: self.qualified_name(receiver),
                });
            }
        }

        let id = BindingId(self.bindings.len());
        self.bindings.push(Binding {
            id,
            sender,
            receiver,
        });
        Ok(id)
    }

    pub fn service(&self, id: ServiceId) -> Result<&ServiceNode> {
        self.services.get(id.0).ok_or_else(|| DeployError::UnknownEntity {
            kind: "service",
            id: id.to_string(),
        })
    }

    pub fn port(&self, id: PortId) -> Result<&PortSpec> {
        self.ports.get(id.0).ok_or_else(|| DeployError::UnknownEntity {
            kind: "port",
            id: id.to_string(),
        })
    }

    /// `service.port` 形式的名稱，用於錯誤與日誌
    pub fn qualified_name(&self, id: PortId) -> String {
        match self.ports.get(id.0) {
            Some(spec) => format!("{}.{}", self.services[spec.service.0].name, spec.name),
            None => id.to_string(),
        }
    }

    pub fn host_of(&self, port: PortId) -> Result<HostId> {
        let spec = self.port(port)?;
        Ok(self.service(spec.service)?.host)
    }

    pub fn services(&self) -> impl Iterator<Item = (ServiceId, &ServiceNode)> {
        self.services
            .iter()
            .enumerate()
            .map(|(index, node)| (ServiceId(index), node))
    }

    pub fn ports(&self) -> impl Iterator<Item = (PortId, &PortSpec)> {
        self.ports
            .iter()
            .enumerate()
            .map(|(index, spec)| (PortId(index), spec))
    }

    pub fn receivers(&self) -> impl Iterator<Item = PortId> + '_ {
        self.ports()
            .filter(|(_, spec)| spec.role == PortRole::Receiver)
            .map(|(id, _)| id)
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn incoming(&self, receiver: PortId) -> impl Iterator<Item = &Binding> {
        self.bindings.iter().filter(move |b| b.receiver == receiver)
    }

    pub fn outgoing(&self, sender: PortId) -> impl Iterator<Item = &Binding> {
        self.bindings.iter().filter(move |b| b.sender == sender)
    }

    pub fn in_degree(&self, receiver: PortId) -> usize {
        self.incoming(receiver).count()
    }
}
