//! Feature vectors and feature configuration
//!
//! A `FeatureVector` is the per-record numeric derivation used by the
//! similarity engine; it is ephemeral and never persisted. Which features
//! are compared, with what tolerance and weight, is an explicit validated
//! configuration loaded once at startup rather than string-keyed tables
//! scattered through the scoring code.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

/// Feature name → numeric value, derived per record by a `FeatureExtractor`.
pub type FeatureVector = BTreeMap<String, f64>;

/// Comparison parameters for one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    /// Feature name, matching the extractor's output keys.
    pub name: String,
    /// Relative difference below which two values count as equal.
    pub tolerance: f64,
    /// Weight of this feature in the overall similarity average.
    pub weight: f64,
    /// Critical features score zero when present on only one side;
    /// non-critical ones receive fixed partial credit.
    #[serde(default)]
    pub critical: bool,
}

impl FeatureSpec {
    /// Convenience constructor for a non-critical feature.
    pub fn new(name: impl Into<String>, tolerance: f64, weight: f64) -> Self {
        Self {
            name: name.into(),
            tolerance,
            weight,
            critical: false,
        }
    }

    /// Convenience constructor for a critical feature.
    pub fn critical(name: impl Into<String>, tolerance: f64, weight: f64) -> Self {
        Self {
            name: name.into(),
            tolerance,
            weight,
            critical: true,
        }
    }
}

/// Validated list of feature specs for one dataset kind.
///
/// Validation: at least one spec, unique non-empty names, tolerance and
/// weight strictly positive and finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FeatureSpec>", into = "Vec<FeatureSpec>")]
pub struct FeatureConfig {
    specs: Vec<FeatureSpec>,
}

impl FeatureConfig {
    /// Build a validated configuration.
    pub fn new(specs: Vec<FeatureSpec>) -> Result<Self, ValidationError> {
        if specs.is_empty() {
            return Err(ValidationError::FeatureConfig {
                reason: "at least one feature spec required".to_string(),
            });
        }

        let mut seen = std::collections::BTreeSet::new();
        for spec in &specs {
            if spec.name.is_empty() {
                return Err(ValidationError::FeatureConfig {
                    reason: "empty feature name".to_string(),
                });
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(ValidationError::FeatureConfig {
                    reason: format!("duplicate feature `{}`", spec.name),
                });
            }
            if !(spec.tolerance.is_finite() && spec.tolerance > 0.0) {
                return Err(ValidationError::FeatureConfig {
                    reason: format!(
                        "feature `{}`: tolerance must be finite and > 0, got {}",
                        spec.name, spec.tolerance
                    ),
                });
            }
            if !(spec.weight.is_finite() && spec.weight > 0.0) {
                return Err(ValidationError::FeatureConfig {
                    reason: format!(
                        "feature `{}`: weight must be finite and > 0, got {}",
                        spec.name, spec.weight
                    ),
                });
            }
        }

        Ok(Self { specs })
    }

    /// Iterate the configured specs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &FeatureSpec> {
        self.specs.iter()
    }

    /// Look up a spec by feature name.
    pub fn get(&self, name: &str) -> Option<&FeatureSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Number of configured features.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether there are no specs (never true for a validated config).
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl TryFrom<Vec<FeatureSpec>> for FeatureConfig {
    type Error = ValidationError;

    fn try_from(specs: Vec<FeatureSpec>) -> Result<Self, Self::Error> {
        Self::new(specs)
    }
}

impl From<FeatureConfig> for Vec<FeatureSpec> {
    fn from(config: FeatureConfig) -> Self {
        config.specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = FeatureConfig::new(vec![
            FeatureSpec::new("level", 0.1, 1.0),
            FeatureSpec::critical("tier", 0.05, 2.0),
        ])
        .unwrap();

        assert_eq!(config.len(), 2);
        assert!(config.get("tier").unwrap().critical);
        assert!(!config.get("level").unwrap().critical);
        assert!(config.get("missing").is_none());
    }

    #[test]
    fn test_rejects_empty() {
        assert!(FeatureConfig::new(vec![]).is_err());
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let result = FeatureConfig::new(vec![
            FeatureSpec::new("level", 0.1, 1.0),
            FeatureSpec::new("level", 0.2, 1.0),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_bad_tolerance_and_weight() {
        assert!(FeatureConfig::new(vec![FeatureSpec::new("a", 0.0, 1.0)]).is_err());
        assert!(FeatureConfig::new(vec![FeatureSpec::new("a", -0.1, 1.0)]).is_err());
        assert!(FeatureConfig::new(vec![FeatureSpec::new("a", f64::NAN, 1.0)]).is_err());
        assert!(FeatureConfig::new(vec![FeatureSpec::new("a", 0.1, 0.0)]).is_err());
        assert!(FeatureConfig::new(vec![FeatureSpec::new("a", 0.1, f64::INFINITY)]).is_err());
    }

    #[test]
    fn test_serde_enforces_validation() {
        let json = r#"[{"name":"level","tolerance":0.1,"weight":1.0}]"#;
        let config: FeatureConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.len(), 1);

        let bad = r#"[{"name":"level","tolerance":-1.0,"weight":1.0}]"#;
        assert!(serde_json::from_str::<FeatureConfig>(bad).is_err());
    }
}
