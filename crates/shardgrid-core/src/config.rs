//! balancer.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BalancerConfig {
    #[serde(default)]
    pub weights: WeightsSection,
    #[serde(default)]
    pub balance: BalanceSection,
}

/// Raw balance weights. Normalized to sum 1 when the weight function is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WeightsSection {
    pub index: f64,
    pub shard: f64,
    pub primary: f64,
}

impl WeightsSection {
    /// Every weight must be a non-negative number and at least one positive.
    pub fn validate(&self) -> CoreResult<()> {
        let weights = [
            ("index", self.index),
            ("shard", self.shard),
            ("primary", self.primary),
        ];
        for (name, value) in weights {
            if !value.is_finite() || value < 0.0 {
                return Err(CoreError::InvalidConfig(format!(
                    "weights.{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if self.index + self.shard + self.primary == 0.0 {
            return Err(CoreError::InvalidConfig(
                "at least one balance weight must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for WeightsSection {
    fn default() -> Self {
        Self {
            index: 0.5,
            shard: 0.5,
            primary: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BalanceSection {
    /// Maximum weight spread tolerated between the extremes of an index.
    pub threshold: f64,
    pub seed: SeedMode,
    /// Re-sort nodes by weight after every relocation instead of reading the
    /// extremes of the initial order.
    pub resort_each_iteration: bool,
    /// Hard cap on relocations per index in one pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_steps_per_index: Option<u32>,
}

impl Default for BalanceSection {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            seed: SeedMode::Scratch,
            resort_each_iteration: false,
            max_steps_per_index: None,
        }
    }
}

/// How the in-memory mirror is seeded before balancing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SeedMode {
    /// Place every copy from scratch.
    #[default]
    Scratch,
    /// Keep copies where they are; place only unassigned ones.
    Current,
}

impl std::str::FromStr for SeedMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scratch" => Ok(SeedMode::Scratch),
            "current" => Ok(SeedMode::Current),
            other => Err(CoreError::InvalidConfig(format!("unknown seed mode: {other}"))),
        }
    }
}

impl BalancerConfig {
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> CoreResult<Self> {
        let config: BalancerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> CoreResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> CoreResult<()> {
        self.weights.validate()?;

        let b = &self.balance;
        if !b.threshold.is_finite() || b.threshold <= 0.0 {
            return Err(CoreError::InvalidConfig(format!(
                "balance.threshold must be positive, got {}",
                b.threshold
            )));
        }
        if b.max_steps_per_index == Some(0) {
            return Err(CoreError::InvalidConfig(
                "balance.max_steps_per_index must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
