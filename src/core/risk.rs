//! Ordered threshold tables mapping named features to risk levels
//!
//! Rules are tested in priority order and the first rule with any satisfied
//! condition wins. When nothing matches the table's fallback applies.

use crate::types::{FeatureVector, RiskAssessment, RiskLevel};
use serde::{Deserialize, Serialize};

pub const LAKE_CHANGE_PERCENT: &str = "lake_change_percent";
pub const WATER_PERCENTAGE: &str = "water_percentage";
pub const OVERFLOW_RATE: &str = "overflow_rate";
pub const AVG_FLOW_VELOCITY: &str = "avg_flow_velocity";
pub const FLOW_VOLUME_M3: &str = "flow_volume_m3";
pub const FLOW_VELOCITY: &str = "flow_velocity";
pub const GLOF_PROBABILITY: &str = "glof_probability";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    /// value > threshold
    Greater,
    /// value >= threshold
    AtLeast,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub feature: String,
    pub comparison: Comparison,
    pub threshold: f64,
}

impl Condition {
    pub fn greater(feature: &str, threshold: f64) -> Self {
        Self {
            feature: feature.to_string(),
            comparison: Comparison::Greater,
            threshold,
        }
    }

    pub fn at_least(feature: &str, threshold: f64) -> Self {
        Self {
            feature: feature.to_string(),
            comparison: Comparison::AtLeast,
            threshold,
        }
    }

    /// A missing or NaN feature never satisfies a condition
    pub fn is_met(&self, features: &FeatureVector) -> bool {
        match features.get(&self.feature) {
            Some(value) => match self.comparison {
                Comparison::Greater => value > self.threshold,
                Comparison::AtLeast => value >= self.threshold,
            },
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRule {
    pub level: RiskLevel,
    pub message: String,
    /// Disjunction: one satisfied condition is enough
    pub any_of: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskTable {
    pub rules: Vec<RiskRule>,
    pub fallback_level: RiskLevel,
    pub fallback_message: String,
}

impl RiskTable {
    pub fn new(fallback_level: RiskLevel, fallback_message: &str) -> Self {
        Self {
            rules: Vec::new(),
            fallback_level,
            fallback_message: fallback_message.to_string(),
        }
    }

    pub fn rule(mut self, level: RiskLevel, message: &str, any_of: Vec<Condition>) -> Self {
        self.rules.push(RiskRule {
            level,
            message: message.to_string(),
            any_of,
        });
        self
    }

    /// First matching rule wins; contributing factors are the satisfied conditions' features
    pub fn evaluate(&self, features: &FeatureVector) -> RiskAssessment {
        for rule in &self.rules {
            let factors: Vec<&str> = rule
                .any_of
                .iter()
                .filter(|c| c.is_met(features))
                .map(|c| c.feature.as_str())
                .collect();
            if !factors.is_empty() {
                log::debug!("Risk rule {} matched on {:?}", rule.level, factors);
                return RiskAssessment::new(rule.level, rule.message.clone()).with_factors(factors);
            }
        }
        RiskAssessment::new(self.fallback_level, self.fallback_message.clone())
    }
}

/// Lake expansion: change percentage and water coverage
pub fn lake_risk_table() -> RiskTable {
    RiskTable::new(RiskLevel::Low, "Lake conditions stable")
        .rule(
            RiskLevel::High,
            "Significant lake expansion detected - High GLOF risk",
            vec![
                Condition::greater(LAKE_CHANGE_PERCENT, 20.0),
                Condition::greater(WATER_PERCENTAGE, 60.0),
            ],
        )
        .rule(
            RiskLevel::Moderate,
            "Notable lake changes - Monitor closely",
            vec![
                Condition::greater(LAKE_CHANGE_PERCENT, 10.0),
                Condition::greater(WATER_PERCENTAGE, 40.0),
            ],
        )
}

/// Terrain flow: overflow rate and mean flow velocity
pub fn dem_risk_table() -> RiskTable {
    RiskTable::new(RiskLevel::Low, "Normal water flow conditions")
        .rule(
            RiskLevel::High,
            "High water flow detected - Significant flood risk",
            vec![
                Condition::greater(OVERFLOW_RATE, 1000.0),
                Condition::greater(AVG_FLOW_VELOCITY, 0.5),
            ],
        )
        .rule(
            RiskLevel::Moderate,
            "Moderate water flow - Monitor conditions",
            vec![
                Condition::greater(OVERFLOW_RATE, 500.0),
                Condition::greater(AVG_FLOW_VELOCITY, 0.3),
            ],
        )
}

/// Surface motion: flow volume and velocity of a pair or a whole video
pub fn motion_risk_table() -> RiskTable {
    RiskTable::new(RiskLevel::Low, "Normal water motion levels")
        .rule(
            RiskLevel::High,
            "Significant water motion detected - High flood risk",
            vec![
                Condition::greater(FLOW_VOLUME_M3, 10.0),
                Condition::greater(FLOW_VELOCITY, 5.0),
            ],
        )
        .rule(
            RiskLevel::Moderate,
            "Notable water motion - Monitor closely",
            vec![
                Condition::greater(FLOW_VOLUME_M3, 5.0),
                Condition::greater(FLOW_VELOCITY, 2.0),
            ],
        )
}

/// Tabular predictor buckets on probability in [0,1]
pub fn probability_risk_table() -> RiskTable {
    RiskTable::new(RiskLevel::Low, "Low Risk - Normal conditions")
        .rule(
            RiskLevel::High,
            "High Risk of GLOF - Immediate action recommended",
            vec![Condition::at_least(GLOF_PROBABILITY, 0.7)],
        )
        .rule(
            RiskLevel::Moderate,
            "Moderate Risk - Monitor closely",
            vec![Condition::at_least(GLOF_PROBABILITY, 0.4)],
        )
}
