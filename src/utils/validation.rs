use crate::utils::error::{DeployError, Result};
use std::collections::HashSet;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn invalid(field_name: &str, value: impl ToString, reason: impl Into<String>) -> DeployError {
    DeployError::InvalidConfigValueError {
        field: field_name.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Service、Host 與 Port 名稱：英數字、`-`、`_`，不可含 `.`（`.` 用來分隔 `svc.port`）
pub fn validate_identifier(field_name: &str, value: &str) -> Result<()> {
    validate_non_empty_string(field_name, value)?;
    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(invalid(
            field_name,
            value,
            format!("Character `{}` is not allowed; use letters, digits, `-` or `_`", c),
        ));
    }
    Ok(())
}

/// IP 或網域名稱（`url::Host` 的語法）
pub fn validate_host(field_name: &str, value: &str) -> Result<()> {
    validate_non_empty_string(field_name, value)?;
    // IPv6 需要中括號才能被 url::Host 解析
    let candidate = if value.contains(':') && !value.starts_with('[') {
        format!("[{}]", value)
    } else {
        value.to_string()
    };
    url::Host::parse(&candidate)
        .map(|_| ())
        .map_err(|e| invalid(field_name, value, format!("Invalid host: {}", e)))
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(invalid(field_name, path, "Path cannot be empty"));
    }
    if path.contains('\0') {
        return Err(invalid(field_name, path, "Path contains null bytes"));
    }
    Ok(())
}

pub fn validate_unique<'a>(field_name: &str, values: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for value in values {
        if !seen.insert(value) {
            return Err(invalid(field_name, value, "Name is declared more than once"));
        }
    }
    Ok(())
}

pub fn validate_required_field<'a, T>(field_name: &str, value: &'a Option<T>) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| DeployError::MissingConfigError {
        field: field_name.to_string(),
    })
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(field_name, value, "Value cannot be empty or whitespace-only"));
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(invalid(
            field_name,
            value,
            format!("Value must be between {} and {}", min, max),
        ));
    }
    Ok(())
}
