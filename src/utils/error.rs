use crate::domain::model::{Address, DeploymentState, PortRole};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// 部署期間單一 Host / Service / Channel 失敗的原因
#[derive(Error, Debug)]
pub enum FailureCause {
    #[error("address allocation failed: {0}")]
    AllocationFailed(String),

    #[error("connection to {address} failed: {reason}")]
    ConnectFailed { address: Address, reason: String },

    #[error("service failed to materialize: {0}")]
    ServiceMaterializeFailed(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("handshake did not complete within {0:?}")]
    Timeout(Duration),
}

/// 造成部署失敗的對象
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Culprit {
    Service(String),
    Port(String),
    Deployment(String),
}

impl fmt::Display for Culprit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Culprit::Service(name) => write!(f, "service `{}`", name),
            Culprit::Port(name) => write!(f, "port `{}`", name),
            Culprit::Deployment(name) => write!(f, "deployment `{}`", name),
        }
    }
}

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Port `{port}` is a {actual}, expected a {expected}")]
    RoleMismatch {
        port: String,
        expected: PortRole,
        actual: PortRole,
    },

    #[error("Port `{port}` accepts a single peer and is already bound to `{existing}` (attempted `{attempted}`)")]
    CardinalityViolation {
        port: String,
        existing: String,
        attempted: String,
    },

    #[error("Port `{port}` cannot be bound to itself")]
    SelfLoop { port: String },

    #[error("Unknown {kind}: {id}")]
    UnknownEntity { kind: &'static str, id: String },

    #[error("Duplicate {kind} name: {name}")]
    DuplicateName { kind: &'static str, name: String },

    #[error("Cannot {operation} while the deployment is {state}")]
    InvalidState {
        operation: &'static str,
        state: DeploymentState,
    },

    #[error("Cannot {operation} before deploy() has completed")]
    NotDeployed { operation: &'static str },

    #[error("Deployment failed at {culprit}: {cause}")]
    DeployFailed {
        culprit: Culprit,
        #[source]
        cause: FailureCause,
    },

    #[error("Service `{service}` failed to start: {reason}")]
    StartFailed { service: String, reason: String },

    #[error("Channel closed for port `{port}`: {reason}")]
    ChannelClosed { port: String, reason: String },

    #[error("Payload of {size} bytes on port `{port}` exceeds the {limit}-byte frame limit")]
    PayloadTooLarge { port: String, size: usize, limit: usize },

    #[error("Handle for port `{port}` is unavailable: {reason}")]
    HandleUnavailable { port: String, reason: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for `{field}`: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value `{value}` for `{field}`: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Declaration,
    Deployment,
    Lifecycle,
    Runtime,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl DeployError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DeployError::RoleMismatch { .. }
            | DeployError::CardinalityViolation { .. }
            | DeployError::SelfLoop { .. }
            | DeployError::UnknownEntity { .. }
            | DeployError::DuplicateName { .. } => ErrorCategory::Declaration,
            DeployError::DeployFailed { .. } => ErrorCategory::Deployment,
            DeployError::InvalidState { .. }
            | DeployError::NotDeployed { .. }
            | DeployError::StartFailed { .. } => ErrorCategory::Lifecycle,
            DeployError::ChannelClosed { .. }
            | DeployError::PayloadTooLarge { .. }
            | DeployError::HandleUnavailable { .. } => ErrorCategory::Runtime,
            DeployError::ConfigError { .. }
            | DeployError::ConfigValidationError { .. }
            | DeployError::InvalidConfigValueError { .. }
            | DeployError::MissingConfigError { .. } => ErrorCategory::Configuration,
            DeployError::IoError(_) | DeployError::SerializationError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Runtime => ErrorSeverity::Low,
            ErrorCategory::Deployment => ErrorSeverity::Medium,
            ErrorCategory::Declaration
            | ErrorCategory::Lifecycle
            | ErrorCategory::Configuration => ErrorSeverity::High,
            ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    /// 部署失敗已經回滾，呼叫端可以修正後重試；其餘錯誤重試不會改變結果
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeployError::DeployFailed { .. })
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            DeployError::RoleMismatch { expected, .. } => {
                format!("Declare the port as a {} before binding it", expected)
            }
            DeployError::CardinalityViolation { port, .. } => {
                format!("Call merge() on `{}` (or fan_out() on the sender) before binding more peers", port)
            }
            DeployError::SelfLoop { .. } => "Bind the sender to a different receiver port".to_string(),
            DeployError::UnknownEntity { kind, .. } => {
                format!("Use a {} id returned by this deployment", kind)
            }
            DeployError::DuplicateName { kind, .. } => format!("Give every {} a unique name", kind),
            DeployError::InvalidState { .. } => {
                "Create a new deployment to change the topology".to_string()
            }
            DeployError::NotDeployed { .. } => "Await deploy() before this call".to_string(),
            DeployError::DeployFailed { culprit, .. } => {
                format!("Fix {} and call deploy() again; nothing was left wired", culprit)
            }
            DeployError::StartFailed { service, .. } => {
                format!("Inspect the output of `{}` and redeploy", service)
            }
            DeployError::ChannelClosed { .. } => {
                "The listed receivers have shut down; the others already got this payload, so do not resend it".to_string()
            }
            DeployError::PayloadTooLarge { limit, .. } => {
                format!("Split the payload into chunks of at most {} bytes", limit)
            }
            DeployError::HandleUnavailable { .. } => {
                "Take each port handle once, from a custom service".to_string()
            }
            DeployError::ConfigError { .. }
            | DeployError::ConfigValidationError { .. }
            | DeployError::InvalidConfigValueError { .. }
            | DeployError::MissingConfigError { .. } => {
                "Check the topology file against the documented format".to_string()
            }
            DeployError::IoError(_) => "Check file paths and permissions".to_string(),
            DeployError::SerializationError(_) => "Check the data being exchanged".to_string(),
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Declaration => format!("Invalid topology: {}", self),
            ErrorCategory::Deployment => format!("Deployment did not complete: {}", self),
            ErrorCategory::Lifecycle => format!("Lifecycle error: {}", self),
            ErrorCategory::Runtime => format!("Connection error: {}", self),
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::System => format!("System error: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
