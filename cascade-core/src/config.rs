//! Domain configuration.
//!
//! A domain is configured from JSON (or built in code). Every field has a
//! default, so `{}` is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Settings for a [`Domain`](crate::transaction::Domain).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Name used in log output.
    #[serde(default = "default_name")]
    pub name: String,

    /// How many follow-up passes observers may trigger within one commit
    /// before the commit is aborted.
    #[serde(default = "default_max_continuations")]
    pub max_continuations: usize,
}

fn default_name() -> String {
    "default".to_string()
}

fn default_max_continuations() -> usize {
    256
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            max_continuations: default_max_continuations(),
        }
    }
}

impl DomainConfig {
    /// Parse and validate a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "domain name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the domain name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the continuation limit.
    pub fn with_max_continuations(mut self, limit: usize) -> Self {
        self.max_continuations = limit;
        self
    }
}
