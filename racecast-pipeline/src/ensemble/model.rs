//! Scoring model capability and the linear (logistic) implementation

use racecast_common::config::ModelDefinition;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::models::{FeatureVector, ModelScore};

/// A model could not score one entry
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("{model}: required feature '{feature}' is missing")]
    MissingFeature { model: String, feature: String },

    #[error("{model}: produced invalid score {value}")]
    InvalidOutput { model: String, value: f64 },

    #[error("{model}: {message}")]
    Unsupported { model: String, message: String },
}

/// Uniform interface the ensemble scores through
pub trait ScoringModel: Send + Sync {
    fn id(&self) -> &str;

    fn version(&self) -> &str;

    /// Score one entry; score and confidence in [0, 1]
    fn score(&self, features: &FeatureVector) -> Result<ModelScore, ModelError>;
}

/// Logistic regression over named features
///
/// Missing non-required features contribute nothing to the linear term and
/// lower the reported confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearModel {
    id: String,
    version: String,
    bias: f64,
    coefficients: BTreeMap<String, f64>,
    required_features: Vec<String>,
}

impl LinearModel {
    pub fn new(
        id: impl Into<String>,
        version: impl Into<String>,
        bias: f64,
        coefficients: BTreeMap<String, f64>,
        required_features: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            bias,
            coefficients,
            required_features,
        }
    }

    pub fn from_definition(def: &ModelDefinition) -> Self {
        Self::new(
            def.id.clone(),
            def.version.clone(),
            def.bias,
            def.coefficients.clone(),
            def.required_features.clone(),
        )
    }

    pub fn coefficients(&self) -> &BTreeMap<String, f64> {
        &self.coefficients
    }

    pub fn required_features(&self) -> &[String] {
        &self.required_features
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl ScoringModel for LinearModel {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn score(&self, features: &FeatureVector) -> Result<ModelScore, ModelError> {
        if self.coefficients.is_empty() {
            return Err(ModelError::Unsupported {
                model: self.id.clone(),
                message: "no coefficients".to_string(),
            });
        }
        if let Some(feature) = self
            .required_features
            .iter()
            .find(|name| features.is_missing(name))
        {
            return Err(ModelError::MissingFeature {
                model: self.id.clone(),
                feature: feature.clone(),
            });
        }

        let mut z = self.bias;
        let mut present = 0usize;
        for (name, coefficient) in &self.coefficients {
            if features.is_missing(name) {
                continue;
            }
            if let Some(value) = features.get(name) {
                z += coefficient * value;
                present += 1;
            }
        }

        let score = sigmoid(z);
        if !score.is_finite() {
            return Err(ModelError::InvalidOutput {
                model: self.id.clone(),
                value: score,
            });
        }

        Ok(ModelScore {
            model_id: self.id.clone(),
            model_version: self.version.clone(),
            post_position: features.post_position,
            score,
            confidence: present as f64 / self.coefficients.len() as f64,
        })
    }
}
