//! Decay and Maintenance Configuration
//!
//! `SectorConfig` is the single source of truth for decay lambdas,
//! reinforcement boosts, the minimum-strength floor, and the pruning
//! threshold. Readers take an immutable snapshot; updates merge, validate,
//! and swap atomically so no partial state is ever observed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::memory::Sector;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Configuration error type
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An update would violate a config invariant
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    /// No multiplier configured for the sector
    #[error("Unknown sector: {0}")]
    UnknownSector(String),
}

impl ConfigError {
    /// Stable wire code for the facade.
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::InvalidConfig(_) => "INVALID_CONFIG",
            ConfigError::UnknownSector(_) => "UNKNOWN_SECTOR",
        }
    }
}

// ============================================================================
// DECAY CONFIG
// ============================================================================

/// Decay and maintenance parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayConfig {
    /// Base decay lambda per day
    pub base_lambda: f64,
    /// Per-sector multiplier on the base lambda; one strictly positive
    /// entry per sector
    pub sector_multipliers: HashMap<Sector, f64>,
    /// Boost applied on reinforcement-by-access
    pub reinforcement_boost: f64,
    /// Boost applied on importance reinforcement
    pub importance_boost: f64,
    /// Floor below which strength never decays
    pub minimum_strength: f64,
    /// Strength below which a memory becomes a pruning candidate
    pub pruning_threshold: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        let mut multipliers = HashMap::new();
        multipliers.insert(Sector::Episodic, 1.5);
        multipliers.insert(Sector::Semantic, 0.5);
        multipliers.insert(Sector::Procedural, 0.3);
        multipliers.insert(Sector::Emotional, 1.0);
        multipliers.insert(Sector::Reflective, 0.8);

        Self {
            base_lambda: 0.02,
            sector_multipliers: multipliers,
            reinforcement_boost: 0.1,
            importance_boost: 0.25,
            minimum_strength: 0.01,
            pruning_threshold: 0.1,
        }
    }
}

impl DecayConfig {
    /// Validate all invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_lambda < 0.0 || !self.base_lambda.is_finite() {
            return Err(ConfigError::InvalidConfig(format!(
                "base lambda must be non-negative, got {}",
                self.base_lambda
            )));
        }
        for sector in Sector::ALL {
            match self.sector_multipliers.get(&sector) {
                None => {
                    return Err(ConfigError::InvalidConfig(format!(
                        "missing multiplier for sector '{}'",
                        sector
                    )));
                }
                Some(m) if *m <= 0.0 || !m.is_finite() => {
                    return Err(ConfigError::InvalidConfig(format!(
                        "multiplier for sector '{}' must be strictly positive, got {}",
                        sector, m
                    )));
                }
                Some(_) => {}
            }
        }
        if self.reinforcement_boost < 0.0 {
            return Err(ConfigError::InvalidConfig(format!(
                "reinforcement boost must be non-negative, got {}",
                self.reinforcement_boost
            )));
        }
        if self.importance_boost < 0.0 {
            return Err(ConfigError::InvalidConfig(format!(
                "importance boost must be non-negative, got {}",
                self.importance_boost
            )));
        }
        if !(0.0..=1.0).contains(&self.minimum_strength) {
            return Err(ConfigError::InvalidConfig(format!(
                "minimum strength must be in [0,1], got {}",
                self.minimum_strength
            )));
        }
        if !(0.0..=1.0).contains(&self.pruning_threshold) {
            return Err(ConfigError::InvalidConfig(format!(
                "pruning threshold must be in [0,1], got {}",
                self.pruning_threshold
            )));
        }
        if self.pruning_threshold < self.minimum_strength {
            return Err(ConfigError::InvalidConfig(format!(
                "pruning threshold {} must not be below minimum strength {}",
                self.pruning_threshold, self.minimum_strength
            )));
        }
        Ok(())
    }
}

/// Partial update applied over the current config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayConfigPatch {
    pub base_lambda: Option<f64>,
    /// Merged entry-by-entry into the existing multipliers
    pub sector_multipliers: Option<HashMap<Sector, f64>>,
    pub reinforcement_boost: Option<f64>,
    pub importance_boost: Option<f64>,
    pub minimum_strength: Option<f64>,
    pub pruning_threshold: Option<f64>,
}

// ============================================================================
// SECTOR CONFIG CELL
// ============================================================================

/// Lock-protected snapshot cell for the decay config.
///
/// `get` hands out an `Arc` snapshot; `update` merges a patch, validates the
/// merged result, and swaps it in atomically. A failed update leaves the
/// current snapshot untouched.
pub struct SectorConfig {
    current: Mutex<Arc<DecayConfig>>,
}

impl Default for SectorConfig {
    fn default() -> Self {
        Self::new(DecayConfig::default())
    }
}

impl SectorConfig {
    pub fn new(config: DecayConfig) -> Self {
        Self {
            current: Mutex::new(Arc::new(config)),
        }
    }

    /// Immutable snapshot of the current config.
    pub fn get(&self) -> Arc<DecayConfig> {
        self.current.lock().expect("config lock poisoned").clone()
    }

    /// Merge a partial update, validate, and swap atomically.
    pub fn update(&self, patch: DecayConfigPatch) -> Result<Arc<DecayConfig>, ConfigError> {
        let mut guard = self.current.lock().expect("config lock poisoned");
        let mut merged = (**guard).clone();

        if let Some(lambda) = patch.base_lambda {
            merged.base_lambda = lambda;
        }
        if let Some(multipliers) = patch.sector_multipliers {
            for (sector, value) in multipliers {
                merged.sector_multipliers.insert(sector, value);
            }
        }
        if let Some(boost) = patch.reinforcement_boost {
            merged.reinforcement_boost = boost;
        }
        if let Some(boost) = patch.importance_boost {
            merged.importance_boost = boost;
        }
        if let Some(floor) = patch.minimum_strength {
            merged.minimum_strength = floor;
        }
        if let Some(threshold) = patch.pruning_threshold {
            merged.pruning_threshold = threshold;
        }

        merged.validate()?;
        let snapshot = Arc::new(merged);
        *guard = snapshot.clone();
        Ok(snapshot)
    }

    /// Effective decay lambda for a sector: `base_lambda * multiplier`.
    pub fn effective_decay_rate(&self, sector: Sector) -> Result<f64, ConfigError> {
        let snapshot = self.get();
        snapshot
            .sector_multipliers
            .get(&sector)
            .map(|m| snapshot.base_lambda * m)
            .ok_or_else(|| ConfigError::UnknownSector(sector.to_string()))
    }

    /// Restore the built-in defaults.
    pub fn reset_to_defaults(&self) {
        let mut guard = self.current.lock().expect("config lock poisoned");
        *guard = Arc::new(DecayConfig::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        assert!(DecayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_effective_rate_episodic() {
        let config = SectorConfig::default();
        let rate = config.effective_decay_rate(Sector::Episodic).unwrap();
        assert!((rate - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_update_merges_and_validates() {
        let config = SectorConfig::default();
        let patch = DecayConfigPatch {
            base_lambda: Some(0.05),
            ..Default::default()
        };
        let snapshot = config.update(patch).unwrap();
        assert_eq!(snapshot.base_lambda, 0.05);
        // Untouched fields survive the merge
        assert_eq!(snapshot.pruning_threshold, 0.1);
    }

    #[test]
    fn test_update_rejects_negative_lambda() {
        let config = SectorConfig::default();
        let patch = DecayConfigPatch {
            base_lambda: Some(-0.1),
            ..Default::default()
        };
        let err = config.update(patch).unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
        // Failed update leaves the snapshot untouched
        assert_eq!(config.get().base_lambda, 0.02);
    }

    #[test]
    fn test_update_rejects_zero_multiplier() {
        let config = SectorConfig::default();
        let mut multipliers = HashMap::new();
        multipliers.insert(Sector::Semantic, 0.0);
        let patch = DecayConfigPatch {
            sector_multipliers: Some(multipliers),
            ..Default::default()
        };
        assert!(config.update(patch).is_err());
    }

    #[test]
    fn test_update_rejects_threshold_inversion() {
        let config = SectorConfig::default();
        let patch = DecayConfigPatch {
            minimum_strength: Some(0.5),
            ..Default::default()
        };
        // pruning_threshold stays at 0.1 < 0.5
        assert!(config.update(patch).is_err());
    }

    #[test]
    fn test_reset_to_defaults() {
        let config = SectorConfig::default();
        config
            .update(DecayConfigPatch {
                base_lambda: Some(0.9),
                ..Default::default()
            })
            .unwrap();
        config.reset_to_defaults();
        assert_eq!(config.get().base_lambda, 0.02);
    }
}
