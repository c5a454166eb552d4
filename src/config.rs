use std::{env, net::SocketAddr, path::PathBuf};

use anyhow::Result;
use data_model::validation::DEFAULT_MAX_MEMORY_BYTES;
use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub state_store_path: String,
    pub listen_addr: String,
    pub structured_logging: bool,
    pub limits: LimitsConfig,
    pub pagination: PaginationConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let state_store_path = env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("fn_registry_storage/state");
        ServerConfig {
            state_store_path: state_store_path.to_string_lossy().into_owned(),
            listen_addr: "0.0.0.0:8900".to_string(),
            structured_logging: false,
            limits: LimitsConfig::default(),
            pagination: PaginationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest `memory` a function may request, in bytes.
    pub max_memory: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_memory: DEFAULT_MAX_MEMORY_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub default_per_page: usize,
    pub max_per_page: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_per_page: 30,
            max_per_page: 100,
        }
    }
}

impl PaginationConfig {
    /// Zero or absent selects the default page size; anything above the
    /// maximum is capped.
    pub fn page_size(&self, per_page: Option<usize>) -> usize {
        match per_page {
            None | Some(0) => self.default_per_page,
            Some(n) => n.min(self.max_per_page),
        }
    }
}

impl ServerConfig {
    pub fn from_path(path: &str) -> Result<ServerConfig> {
        let config_str = std::fs::read_to_string(path)?;
        let config: ServerConfig = Figment::new().merge(Yaml::string(&config_str)).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(anyhow::anyhow!(
                "invalid listen address: {}",
                self.listen_addr
            ));
        }
        if self.limits.max_memory == 0 {
            return Err(anyhow::anyhow!("limits.max_memory must be greater than 0"));
        }
        // Memory values travel as signed integers.
        if self.limits.max_memory > i64::MAX as u64 {
            return Err(anyhow::anyhow!(
                "limits.max_memory must not exceed {}",
                i64::MAX
            ));
        }
        if self.pagination.default_per_page == 0 || self.pagination.max_per_page == 0 {
            return Err(anyhow::anyhow!("page sizes must be greater than 0"));
        }
        if self.pagination.default_per_page > self.pagination.max_per_page {
            return Err(anyhow::anyhow!(
                "pagination.default_per_page ({}) exceeds pagination.max_per_page ({})",
                self.pagination.default_per_page,
                self.pagination.max_per_page
            ));
        }
        Ok(())
    }

    pub fn validation_limits(&self) -> data_model::ValidationLimits {
        data_model::ValidationLimits {
            max_memory: self.limits.max_memory,
        }
    }
}
