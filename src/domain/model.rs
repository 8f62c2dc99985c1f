use crate::utils::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub(crate) usize);

        impl $name {
            pub fn index(self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }
    };
}

arena_id!(
    /// Deployment 內 Host 的索引
    HostId,
    "host"
);
arena_id!(
    /// Deployment 內 Service 的索引
    ServiceId,
    "service"
);
arena_id!(
    /// Deployment 內 Port 的索引
    PortId,
    "port"
);
arena_id!(
    /// `send_to` 建立的 Binding 索引，同時作為 handshake 的識別碼
    BindingId,
    "binding"
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortRole {
    Sender,
    Receiver,
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortRole::Sender => write!(f, "sender"),
            PortRole::Receiver => write!(f, "receiver"),
        }
    }
}

/// Port 可連接的對端數量：receiver 為 merge，sender 為 fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    #[default]
    Single,
    Many,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub service: ServiceId,
    pub name: String,
    pub role: PortRole,
    pub cardinality: Cardinality,
}

impl PortSpec {
    pub fn is_merge(&self) -> bool {
        self.role == PortRole::Receiver && self.cardinality == Cardinality::Many
    }

    pub fn is_fan_out(&self) -> bool {
        self.role == PortRole::Sender && self.cardinality == Cardinality::Many
    }
}

/// 一條已宣告、尚未實體化的 sender -> receiver 邊
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Binding {
    pub id: BindingId,
    pub sender: PortId,
    pub receiver: PortId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Tcp,
    /// 同一台機器上的 Unix domain socket
    Unix,
}

/// Host 層級可到達的端點，只在 `deploy()` 期間產生。
///
/// `Unix` 位址的 `host` 是 socket 檔案路徑，`port` 固定為 0。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            transport: Transport::Tcp,
            host: host.into(),
            port,
        }
    }

    pub fn unix(path: impl Into<String>) -> Self {
        Self {
            transport: Transport::Unix,
            host: path.into(),
            port: 0,
        }
    }

    /// 在 receiver 所在的 Host 上序列化，準備交給 sender 的 Host
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// 在 sender 所在的 Host 上還原
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.transport {
            Transport::Tcp => "tcp",
            Transport::Unix => return write!(f, "unix://{}", self.host),
        };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Building,
    Deployed,
    Started,
    Stopped,
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeploymentState::Building => "building",
            DeploymentState::Deployed => "deployed",
            DeploymentState::Started => "started",
            DeploymentState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKind {
    Local,
    Remote,
    ClientOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Managed,
    Custom,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_brackets_ipv6() {
        assert_eq!(Address::tcp("127.0.0.1", 4000).to_string(), "tcp://127.0.0.1:4000");
        assert_eq!(Address::tcp("::1", 4000).to_string(), "tcp://[::1]:4000");
        assert_eq!(Address::unix("/tmp/a.sock").to_string(), "unix:///tmp/a.sock");
    }

    #[test]
    fn test_address_wire_format() {
        let address = Address::tcp("10.0.0.7", 9100);
        let wire = address.to_wire().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&wire).unwrap();
        assert_eq!(json["transport"], "tcp");
        assert_eq!(json["host"], "10.0.0.7");
        assert_eq!(json["port"], 9100);
        assert_eq!(Address::from_wire(&wire).unwrap(), address);

        let unix = Address::unix("/tmp/a.sock").to_wire().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&unix).unwrap();
        assert_eq!(json["transport"], "unix");
    }

    #[test]
    fn test_port_spec_flags() {
        let mut spec = PortSpec {
            service: ServiceId(0),
            name: "in".to_string(),
            role: PortRole::Receiver,
            cardinality: Cardinality::Many,
        };
        assert!(spec.is_merge());
        assert!(!spec.is_fan_out());

        spec.role = PortRole::Sender;
        assert!(spec.is_fan_out());
        assert!(!spec.is_merge());
    }
}
