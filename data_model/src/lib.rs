pub mod test_objects;
pub mod validation;

use std::{collections::BTreeMap, fmt, str::FromStr};

use derive_builder::Builder;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use strum::IntoEnumIterator;
pub use validation::{validate, ValidationError, ValidationLimits};

/// 128 MiB
pub const DEFAULT_MEMORY_BYTES: u64 = 128 * 1024 * 1024;
pub const DEFAULT_TIMEOUT_SECS: u32 = 30;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u32 = 30;

/// Protocol spoken between the platform and the function's container.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum FunctionFormat {
    #[default]
    Default,
    Http,
    HttpStream,
    Json,
    Cloudevent,
}

impl FunctionFormat {
    pub fn variants() -> String {
        FunctionFormat::iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// CPU request normalized to thousandths of a core.
///
/// Parses either a decimal number of cores (`"0.2"`) or a milli quantity
/// (`"200m"`); both of those examples normalize to `MilliCpus(200)`. Only
/// strictly positive quantities parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MilliCpus(u64);

impl MilliCpus {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl FromStr for MilliCpus {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidCpus(value.to_string());
        let trimmed = value.trim();
        let millis = match trimmed.strip_suffix('m') {
            Some(milli) => milli.parse::<i64>().map_err(|_| invalid())?,
            None => {
                let cores = trimmed.parse::<f64>().map_err(|_| invalid())?;
                if !cores.is_finite() {
                    return Err(invalid());
                }
                (cores * 1000.0).round() as i64
            }
        };
        if millis <= 0 {
            return Err(invalid());
        }
        Ok(MilliCpus(millis as u64))
    }
}

impl fmt::Display for MilliCpus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.0)
    }
}

impl Serialize for MilliCpus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MilliCpus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(de::Error::custom)
    }
}

/// Incoming, possibly partial, function definition.
///
/// Values are kept as the caller sent them so that the validator can report
/// exactly what was wrong. A merged `FunctionPatch` is the candidate that gets
/// validated before anything is written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionPatch {
    pub name: Option<String>,
    pub image: Option<String>,
    pub version: Option<String>,
    pub format: Option<String>,
    pub cpus: Option<String>,
    pub memory: Option<i64>,
    pub timeout: Option<i64>,
    pub idle_timeout: Option<i64>,
    pub config: Option<BTreeMap<String, String>>,
}

// Empty values delete a key.
fn apply_config(
    mut config: BTreeMap<String, String>,
    incoming: Option<BTreeMap<String, String>>,
) -> BTreeMap<String, String> {
    for (key, value) in incoming.unwrap_or_default() {
        if value.is_empty() {
            config.remove(&key);
        } else {
            config.insert(key, value);
        }
    }
    config
}

impl FunctionPatch {
    /// Candidate for a name that has no stored record yet. The key becomes the
    /// name unless the patch carries one, and absent optional fields take the
    /// platform defaults.
    pub fn into_new_candidate(self, key: &str) -> FunctionPatch {
        FunctionPatch {
            name: self.name.or_else(|| Some(key.to_string())),
            image: self.image,
            version: self.version,
            format: self
                .format
                .or_else(|| Some(FunctionFormat::default().to_string())),
            cpus: self.cpus,
            memory: self.memory.or(Some(DEFAULT_MEMORY_BYTES as i64)),
            timeout: self.timeout.or(Some(DEFAULT_TIMEOUT_SECS.into())),
            idle_timeout: self.idle_timeout.or(Some(DEFAULT_IDLE_TIMEOUT_SECS.into())),
            config: Some(apply_config(BTreeMap::new(), self.config)),
        }
    }
}

/// Overlays `patch` on `existing`. Fields absent from the patch keep their
/// stored value; the result still has to pass validation before it replaces
/// the stored record.
pub fn merge(existing: &FunctionRecord, patch: FunctionPatch) -> FunctionPatch {
    FunctionPatch {
        name: patch.name.or_else(|| Some(existing.name.clone())),
        image: patch.image.or_else(|| Some(existing.image.clone())),
        version: patch.version.or_else(|| Some(existing.version.clone())),
        format: patch.format.or_else(|| Some(existing.format.to_string())),
        cpus: patch.cpus.or_else(|| existing.cpus.map(|c| c.to_string())),
        memory: patch
            .memory
            .or_else(|| Some(i64::try_from(existing.memory).unwrap_or(i64::MAX))),
        timeout: patch.timeout.or(Some(existing.timeout.into())),
        idle_timeout: patch.idle_timeout.or(Some(existing.idle_timeout.into())),
        config: Some(apply_config(existing.config.clone(), patch.config)),
    }
}

/// A stored, fully valid function definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct FunctionRecord {
    pub id: String,
    pub name: String,
    pub image: String,
    pub version: String,
    #[builder(default)]
    pub format: FunctionFormat,
    #[builder(default)]
    pub cpus: Option<MilliCpus>,
    #[builder(default = "DEFAULT_MEMORY_BYTES")]
    pub memory: u64,
    #[builder(default = "DEFAULT_TIMEOUT_SECS")]
    pub timeout: u32,
    #[builder(default = "DEFAULT_IDLE_TIMEOUT_SECS")]
    pub idle_timeout: u32,
    #[builder(default)]
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    #[builder(default)]
    pub created_at: u64,
    #[builder(default)]
    pub updated_at: u64,
}

impl FunctionRecord {
    pub fn generate_id() -> String {
        nanoid::nanoid!()
    }

    /// Builds a record from a candidate, validating it first.
    pub fn from_candidate(
        candidate: FunctionPatch,
        id: String,
        created_at: u64,
        updated_at: u64,
        limits: &ValidationLimits,
    ) -> Result<FunctionRecord, ValidationError> {
        validate(&candidate, limits)?;

        let name = candidate
            .name
            .ok_or_else(|| ValidationError::InvalidName(String::new()))?;
        let image = candidate.image.ok_or(ValidationError::MissingImage)?;
        let version = candidate.version.ok_or(ValidationError::MissingVersion)?;
        let format = match candidate.format {
            Some(format) => {
                FunctionFormat::from_str(&format).map_err(|_| ValidationError::InvalidFormat(format))?
            }
            None => FunctionFormat::default(),
        };
        let cpus = candidate.cpus.as_deref().map(MilliCpus::from_str).transpose()?;
        let memory = candidate.memory.map_or(DEFAULT_MEMORY_BYTES, |m| m as u64);
        let timeout = match candidate.timeout {
            Some(t) => u32::try_from(t).map_err(|_| ValidationError::InvalidTimeout(t))?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        let idle_timeout = match candidate.idle_timeout {
            Some(t) => u32::try_from(t).map_err(|_| ValidationError::InvalidIdleTimeout(t))?,
            None => DEFAULT_IDLE_TIMEOUT_SECS,
        };

        Ok(FunctionRecord {
            id,
            name,
            image,
            version,
            format,
            cpus,
            memory,
            timeout,
            idle_timeout,
            config: candidate.config.unwrap_or_default(),
            created_at,
            updated_at,
        })
    }
}
