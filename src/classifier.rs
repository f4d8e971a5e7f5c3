use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::MonitorError;

/// label shown when no model is loaded
pub const NO_MODEL_LABEL: &str = "N/A";

/// Output of a classifier for one temperature/humidity pair
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub confidence: Option<f64>,
}

/// An opaque pre-trained model that labels temperature/humidity pairs
pub trait Classifier: Send + Sync {
    fn predict(&self, temperature: f64, humidity: f64) -> Prediction;
}

/// Inclusive bounds, either side may be open
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Range {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Range {
    fn contains(&self, val: f64) -> bool {
        self.min.map_or(true, |min| val >= min) && self.max.map_or(true, |max| val <= max)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    pub label: String,
    #[serde(default)]
    pub temperature: Range,
    #[serde(default)]
    pub humidity: Range,
    pub confidence: Option<f64>,
}

/// The exported model artifact, an ordered rule list, first match wins
#[derive(Debug, Clone, Deserialize)]
pub struct RuleModel {
    pub rules: Vec<Rule>,
    pub fallback: String,
}

impl Classifier for RuleModel {
    fn predict(&self, temperature: f64, humidity: f64) -> Prediction {
        match self
            .rules
            .iter()
            .find(|r| r.temperature.contains(temperature) && r.humidity.contains(humidity))
        {
            Some(rule) => Prediction {
                label: rule.label.clone(),
                confidence: rule.confidence,
            },
            None => Prediction {
                label: self.fallback.clone(),
                confidence: None,
            },
        }
    }
}

impl RuleModel {
    pub fn from_path(path: &Path) -> Result<RuleModel, MonitorError> {
        let raw = std::fs::read_to_string(path).map_err(|err| MonitorError::Model {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|err| MonitorError::Model {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    }
}

/// Loads the optional model, a failure is logged and leaves the monitor without one
pub fn load_model(path: Option<&Path>) -> Option<Box<dyn Classifier>> {
    let path = path?;
    match RuleModel::from_path(path) {
        Ok(model) => {
            info!(
                "Loaded model {} with {} rules",
                path.display(),
                model.rules.len()
            );
            Some(Box::new(model))
        }
        Err(err) => {
            warn!("ML model not loaded: {}", err);
            None
        }
    }
}
