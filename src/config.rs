//! Builder configuration
//!
//! Tunables for the values new random effects, error models and allometry
//! start from, plus code generation options. Loaded from JSON and checked
//! on load.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::catalog::PkCatalog;
use crate::codegen::CodegenOptions;
use crate::error::BuilderError;
use crate::features::EtaForm;

/// Configuration of a [crate::regen::ModelRegenerator]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuilderConfig {
    /// Initial variance of an added IIV
    pub iiv_initial_estimate: f64,
    /// Initial variance of an added IOV
    pub iov_initial_estimate: f64,
    /// Initial covariance between etas joined into a block
    pub covariance_initial_estimate: f64,
    /// Functional form of an IIV added without one
    pub iiv_expression: EtaForm,
    /// Cutoff of the time-varying error model
    pub time_varying_cutoff: f64,
    /// Reference body size for allometric scaling
    pub allometric_reference: f64,
    pub codegen: CodegenOptions,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            iiv_initial_estimate: 0.09,
            iov_initial_estimate: 0.01,
            covariance_initial_estimate: 0.0031,
            iiv_expression: EtaForm::Exponential,
            time_varying_cutoff: 1.0,
            allometric_reference: 70.0,
            codegen: CodegenOptions::default(),
        }
    }
}

impl BuilderConfig {
    /// Parse and validate a JSON configuration; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, BuilderError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BuilderError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, BuilderError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| BuilderError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, BuilderError> {
        serde_json::to_string_pretty(self).map_err(|e| BuilderError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), BuilderError> {
        let positive = [
            ("iiv_initial_estimate", self.iiv_initial_estimate),
            ("iov_initial_estimate", self.iov_initial_estimate),
            ("time_varying_cutoff", self.time_varying_cutoff),
            ("allometric_reference", self.allometric_reference),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(BuilderError::Config(format!(
                    "{name} must be positive and finite, got {value}"
                )));
            }
        }
        if !self.covariance_initial_estimate.is_finite() {
            return Err(BuilderError::Config(
                "covariance_initial_estimate must be finite".to_string(),
            ));
        }
        self.codegen.validate()
    }

    /// The PK catalog configured with these initial estimates
    pub fn catalog(&self) -> PkCatalog {
        PkCatalog::new()
            .with_initial_variances(self.iiv_initial_estimate, self.iov_initial_estimate)
            .with_covariance_init(self.covariance_initial_estimate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = BuilderConfig::from_json(r#"{"iiv_initial_estimate": 0.2}"#).unwrap();
        assert_eq!(config.iiv_initial_estimate, 0.2);
        assert_eq!(config.iov_initial_estimate, 0.01);
        assert_eq!(config.codegen, CodegenOptions::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = BuilderConfig::from_json(r#"{"time_varying_cutoff": 0.0}"#);
        assert!(matches!(result, Err(BuilderError::Config(_))));

        let result = BuilderConfig::from_json(r#"{"codegen": {"variable": "1model"}}"#);
        assert!(matches!(result, Err(BuilderError::Config(_))));

        let result = BuilderConfig::from_json(r#"{"iiv_init": 0.2}"#);
        assert!(matches!(result, Err(BuilderError::Config(_))));
    }

    #[test]
    fn test_json_round_trip() {
        let config = BuilderConfig {
            allometric_reference: 75.0,
            iiv_expression: EtaForm::Additive,
            ..Default::default()
        };
        let back = BuilderConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }
}
