//! Hyper-parameters of the structure-module layers.
//!
//! The defaults are AlphaFold's monomer structure-module settings. Both configs can
//! be read from the JSON fragment stored next to a checkpoint; missing keys fall
//! back to the defaults.
use crate::error::{FoldingError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpaConfig {
    pub num_head: usize,
    pub num_scalar_qk: usize,
    pub num_scalar_v: usize,
    pub num_point_qk: usize,
    pub num_point_v: usize,
    /// Width of the output embedding.
    pub num_channel: usize,
    /// Added inside the square root of the point-norm features.
    pub dist_epsilon: f64,
}

impl Default for IpaConfig {
    fn default() -> Self {
        Self {
            num_head: 12,
            num_scalar_qk: 16,
            num_scalar_v: 16,
            num_point_qk: 4,
            num_point_v: 8,
            num_channel: 384,
            dist_epsilon: 1e-8,
        }
    }
}

impl IpaConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| FoldingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_head == 0 || self.num_channel == 0 {
            return Err(FoldingError::Config(format!(
                "num_head ({}) and num_channel ({}) must be positive",
                self.num_head, self.num_channel
            )));
        }
        if self.dist_epsilon.is_nan() || self.dist_epsilon < 0.0 {
            return Err(FoldingError::Config(format!(
                "dist_epsilon must be non-negative, got {}",
                self.dist_epsilon
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidechainConfig {
    pub num_channel: usize,
    pub num_residual_block: usize,
}

impl Default for SidechainConfig {
    fn default() -> Self {
        Self {
            num_channel: 128,
            num_residual_block: 2,
        }
    }
}

impl SidechainConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| FoldingError::Config(e.to_string()))?;
        if config.num_channel == 0 {
            return Err(FoldingError::Config("num_channel must be positive".into()));
        }
        Ok(config)
    }
}
