use crate::app::programs::{EchoArgs, TickerArgs};
use crate::config::DeployOptions;
use crate::domain::model::PortRole;
use crate::utils::error::{DeployError, Result};
use crate::utils::validation::{
    validate_host, validate_identifier, validate_range, validate_required_field, validate_unique,
    Validate,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// TOML 拓撲檔：Host、Service 與 Binding 的宣告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    pub deployment: DeploymentSection,
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSection {
    pub name: String,
    pub handshake_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKindConfig {
    Local,
    Remote,
    /// 本機 Unix domain socket
    Unix,
    ClientOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub name: String,
    pub kind: HostKindConfig,
    /// remote：綁定的介面，預設 `0.0.0.0`
    pub bind: Option<String>,
    /// remote：對外公布的位址
    pub advertise: Option<String>,
    /// client_only：包裝的 Host
    pub of: Option<String>,
}

impl HostConfig {
    pub fn bind_ip(&self) -> &str {
        self.bind.as_deref().unwrap_or("0.0.0.0")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramKind {
    Custom,
    Ticker,
    Echo,
}

impl ProgramKind {
    /// 內建程式固定宣告的 port；custom service 的 port 由 binding 決定
    pub fn declared_ports(&self) -> &'static [(&'static str, PortRole)] {
        match self {
            ProgramKind::Custom => &[],
            ProgramKind::Ticker => &[("output", PortRole::Sender)],
            ProgramKind::Echo => &[("input", PortRole::Receiver), ("output", PortRole::Sender)],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub host: String,
    pub program: ProgramKind,
    #[serde(default)]
    pub args: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingConfig {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub merge: bool,
    #[serde(default)]
    pub fan_out: bool,
}

/// `svc.port`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint<'a> {
    pub service: &'a str,
    pub port: &'a str,
}

pub fn parse_endpoint<'a>(field_name: &str, value: &'a str) -> Result<Endpoint<'a>> {
    let (service, port) = value
        .split_once('.')
        .ok_or_else(|| DeployError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Expected `service.port`".to_string(),
        })?;
    validate_identifier(field_name, service)?;
    validate_identifier(field_name, port)?;
    Ok(Endpoint { service, port })
}

impl TopologyConfig {
    /// 從 TOML 檔案載入拓撲
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(DeployError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析拓撲
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| DeployError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${EDGE_IP})；未設定的變數保留原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| DeployError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn options(&self) -> DeployOptions {
        self.deployment
            .handshake_timeout_ms
            .map(|handshake_timeout_ms| DeployOptions {
                handshake_timeout_ms,
            })
            .unwrap_or_default()
    }

    pub fn host(&self, name: &str) -> Option<&HostConfig> {
        self.hosts.iter().find(|h| h.name == name)
    }

    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }

    fn validate_hosts(&self) -> Result<()> {
        validate_unique("hosts.name", self.hosts.iter().map(|h| h.name.as_str()))?;

        for (index, host) in self.hosts.iter().enumerate() {
            validate_identifier("hosts.name", &host.name)?;
            match host.kind {
                HostKindConfig::Local | HostKindConfig::Unix => {}
                HostKindConfig::Remote => {
                    validate_host("hosts.bind", host.bind_ip())?;
                    let advertise = validate_required_field("hosts.advertise", &host.advertise)?;
                    validate_host("hosts.advertise", advertise)?;
                }
                HostKindConfig::ClientOnly => {
                    let of = validate_required_field("hosts.of", &host.of)?;
                    // 只能包裝先前宣告、且本身可接受連線的 Host
                    let wrapped = self.hosts[..index].iter().find(|h| &h.name == of);
                    match wrapped {
                        Some(h) if h.kind != HostKindConfig::ClientOnly => {}
                        _ => {
                            return Err(DeployError::InvalidConfigValueError {
                                field: "hosts.of".to_string(),
                                value: of.clone(),
                                reason: "Must name an earlier local, unix or remote host".to_string(),
                            })
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_services(&self) -> Result<()> {
        validate_unique("services.name", self.services.iter().map(|s| s.name.as_str()))?;

        for service in &self.services {
            validate_identifier("services.name", &service.name)?;
            if self.host(&service.host).is_none() {
                return Err(DeployError::InvalidConfigValueError {
                    field: "services.host".to_string(),
                    value: service.host.clone(),
                    reason: format!("Unknown host for service `{}`", service.name),
                });
            }
            match service.program {
                ProgramKind::Custom => {}
                ProgramKind::Ticker => {
                    TickerArgs::from_args(&service.args)?;
                }
                ProgramKind::Echo => {
                    EchoArgs::from_args(&service.args)?;
                }
            }
        }
        Ok(())
    }

    fn validate_endpoint(&self, field_name: &str, value: &str, role: PortRole) -> Result<()> {
        let endpoint = parse_endpoint(field_name, value)?;
        let service = self
            .service(endpoint.service)
            .ok_or_else(|| DeployError::InvalidConfigValueError {
                field: field_name.to_string(),
                value: value.to_string(),
                reason: format!("Unknown service `{}`", endpoint.service),
            })?;

        if service.program == ProgramKind::Custom {
            return Ok(());
        }
        let declared = service
            .program
            .declared_ports()
            .iter()
            .find(|(name, _)| *name == endpoint.port);
        match declared {
            Some((_, declared_role)) if *declared_role == role => Ok(()),
            Some((_, declared_role)) => Err(DeployError::InvalidConfigValueError {
                field: field_name.to_string(),
                value: value.to_string(),
                reason: format!("Port is a {}, expected a {}", declared_role, role),
            }),
            None => Err(DeployError::InvalidConfigValueError {
                field: field_name.to_string(),
                value: value.to_string(),
                reason: format!("Program {:?} has no port `{}`", service.program, endpoint.port),
            }),
        }
    }

    fn validate_bindings(&self) -> Result<()> {
        for binding in &self.bindings {
            self.validate_endpoint("bindings.from", &binding.from, PortRole::Sender)?;
            self.validate_endpoint("bindings.to", &binding.to, PortRole::Receiver)?;
            if binding.from == binding.to {
                return Err(DeployError::InvalidConfigValueError {
                    field: "bindings.to".to_string(),
                    value: binding.to.clone(),
                    reason: "A port cannot be bound to itself".to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Validate for TopologyConfig {
    fn validate(&self) -> Result<()> {
        validate_identifier("deployment.name", &self.deployment.name)?;
        if let Some(timeout_ms) = self.deployment.handshake_timeout_ms {
            validate_range(
                "deployment.handshake_timeout_ms",
                timeout_ms,
                1,
                crate::config::MAX_HANDSHAKE_TIMEOUT_MS,
            )?;
        }
        self.validate_hosts()?;
        self.validate_services()?;
        self.validate_bindings()
    }
}
