use std::str::FromStr;

use crate::{FunctionFormat, FunctionPatch, MilliCpus};

pub const MAX_NAME_LENGTH: usize = 255;

/// Upper bound for both `timeout` and `idle_timeout`, one hour.
pub const MAX_TIMEOUT_SECS: i64 = 60 * 60;

/// 8 GiB
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 8 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid request, function wrapper is missing from the request body")]
    MissingPayload,

    #[error("Missing image on function")]
    MissingImage,

    #[error("Missing version on function")]
    MissingVersion,

    #[error(
        "Invalid function name `{0}`, names must be 1 to {max} characters of [A-Za-z0-9_.-]",
        max = MAX_NAME_LENGTH
    )]
    InvalidName(String),

    #[error("Function name `{name}` conflicts with `{key}`, functions cannot be renamed or overwritten through another name")]
    NameMismatch { name: String, key: String },

    #[error("Invalid format `{0}`, expected one of: {formats}", formats = FunctionFormat::variants())]
    InvalidFormat(String),

    #[error("Invalid cpus `{0}`, expected a positive quantity such as `0.5` or `500m`")]
    InvalidCpus(String),

    #[error("Invalid timeout {0}, must be between 1 and {max} seconds", max = MAX_TIMEOUT_SECS)]
    InvalidTimeout(i64),

    #[error("Invalid idle_timeout {0}, must be between 1 and {max} seconds", max = MAX_TIMEOUT_SECS)]
    InvalidIdleTimeout(i64),

    #[error("Invalid memory {value}, must be between 1 and {max} bytes")]
    InvalidMemory { value: i64, max: u64 },
}

/// Platform bounds a function definition is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationLimits {
    pub max_memory: u64,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_memory: DEFAULT_MAX_MEMORY_BYTES,
        }
    }
}

pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() &&
        name.len() <= MAX_NAME_LENGTH &&
        name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn valid_timeout(value: i64) -> bool {
    value > 0 && value <= MAX_TIMEOUT_SECS
}

/// Checks a fully merged candidate.
///
/// Required fields are checked first, then every optional field that is
/// present. The first failing rule is reported.
pub fn validate(candidate: &FunctionPatch, limits: &ValidationLimits) -> Result<(), ValidationError> {
    if candidate.image.as_deref().is_none_or(str::is_empty) {
        return Err(ValidationError::MissingImage);
    }
    if candidate.version.as_deref().is_none_or(str::is_empty) {
        return Err(ValidationError::MissingVersion);
    }
    if let Some(name) = &candidate.name {
        if !is_valid_name(name) {
            return Err(ValidationError::InvalidName(name.clone()));
        }
    }
    if let Some(format) = &candidate.format {
        FunctionFormat::from_str(format)
            .map_err(|_| ValidationError::InvalidFormat(format.clone()))?;
    }
    if let Some(cpus) = &candidate.cpus {
        MilliCpus::from_str(cpus)?;
    }
    if let Some(timeout) = candidate.timeout {
        if !valid_timeout(timeout) {
            return Err(ValidationError::InvalidTimeout(timeout));
        }
    }
    if let Some(idle_timeout) = candidate.idle_timeout {
        if !valid_timeout(idle_timeout) {
            return Err(ValidationError::InvalidIdleTimeout(idle_timeout));
        }
    }
    if let Some(memory) = candidate.memory {
        if memory <= 0 || memory as u64 > limits.max_memory {
            return Err(ValidationError::InvalidMemory {
                value: memory,
                max: limits.max_memory,
            });
        }
    }
    Ok(())
}
