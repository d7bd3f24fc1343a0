//! Built-in model catalogue
//!
//! Five linear models covering form, jockey, ability, performance and market
//! signals, weighted 0.20 / 0.22 / 0.18 / 0.15 / 0.02. Configuration may
//! replace the catalogue (`[[models]]`) and override any weight.

use racecast_common::config::{EnsembleConfig, ModelDefinition};
use racecast_common::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::model::{LinearModel, ScoringModel};
use super::Ensemble;
use crate::features::schema::*;

/// Weight for a model with neither a built-in nor a configured weight
pub const DEFAULT_WEIGHT: f64 = 1.0;

struct BuiltIn {
    id: &'static str,
    weight: f64,
    bias: f64,
    coefficients: &'static [(&'static str, f64)],
    required: &'static [&'static str],
}

const BUILT_IN_VERSION: &str = "1.0.0";

const BUILT_INS: &[BuiltIn] = &[
    BuiltIn {
        id: "form",
        weight: 0.20,
        bias: -1.0,
        coefficients: &[
            (HORSE_WIN_RATE, 2.0),
            (HORSE_PLACE_RATE, 1.5),
            (HORSE_AVG_FINISH, -0.15),
            (DAYS_SINCE_LAST_RUN, -0.002),
        ],
        required: &[],
    },
    BuiltIn {
        id: "jockey",
        weight: 0.22,
        bias: -1.2,
        coefficients: &[(JOCKEY_WIN_RATE, 4.0), (JOCKEY_HORSE_SYNERGY, 1.0)],
        required: &[],
    },
    BuiltIn {
        id: "ability",
        weight: 0.18,
        bias: -2.0,
        coefficients: &[
            (CLASS_ADJUSTED_SPEED, 2.0),
            (DISTANCE_FIT, 0.8),
            (SURFACE_FIT, 0.6),
        ],
        required: &[],
    },
    BuiltIn {
        id: "performance",
        weight: 0.15,
        bias: -0.5,
        coefficients: &[
            (HORSE_PLACE_RATE, 1.0),
            (POST_POSITION_NORM, -0.4),
            (WEIGHT_CARRIED, -0.01),
            (IS_DEBUT, -0.3),
        ],
        required: &[],
    },
    BuiltIn {
        id: "market",
        weight: 0.02,
        bias: -2.0,
        coefficients: &[(ODDS_IMPLIED_PROB, 5.0)],
        required: &[ODDS_IMPLIED_PROB],
    },
];

/// Definitions of the built-in models
pub fn built_in_definitions() -> Vec<ModelDefinition> {
    BUILT_INS
        .iter()
        .map(|b| ModelDefinition {
            id: b.id.to_string(),
            version: BUILT_IN_VERSION.to_string(),
            bias: b.bias,
            coefficients: b
                .coefficients
                .iter()
                .map(|(name, c)| (name.to_string(), *c))
                .collect(),
            required_features: b.required.iter().map(|s| s.to_string()).collect(),
        })
        .collect()
}

/// Built-in weight table
pub fn built_in_weights() -> BTreeMap<String, f64> {
    BUILT_INS
        .iter()
        .map(|b| (b.id.to_string(), b.weight))
        .collect()
}

/// Ensemble from configuration; an empty model list selects the built-ins
///
/// A weight naming no model of the resolved catalogue is a configuration error.
pub fn ensemble_from_config(
    models: &[ModelDefinition],
    config: &EnsembleConfig,
) -> Result<Ensemble> {
    let (definitions, base_weights) = if models.is_empty() {
        (built_in_definitions(), built_in_weights())
    } else {
        (models.to_vec(), BTreeMap::new())
    };

    let unknown: Vec<&str> = config
        .weights
        .keys()
        .filter(|id| !definitions.iter().any(|def| &def.id == *id))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        let known: Vec<&str> = definitions.iter().map(|def| def.id.as_str()).collect();
        return Err(Error::Config(format!(
            "ensemble weights given for unknown model(s) {} (known: {})",
            unknown.join(", "),
            known.join(", ")
        )));
    }

    let mut ensemble = Ensemble::new(config.policy);
    for def in &definitions {
        let weight = config
            .weights
            .get(&def.id)
            .or_else(|| base_weights.get(&def.id))
            .copied()
            .unwrap_or(DEFAULT_WEIGHT);
        let model: Arc<dyn ScoringModel> = Arc::new(LinearModel::from_definition(def));
        ensemble.add_member(model, weight);
    }
    Ok(ensemble)
}
