//! Temporal trend over a time-ordered sequence of observations

use crate::core::batch::ObservationOutcome;
use crate::types::RiskAssessment;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    Expanding,
    Shrinking,
    Stable,
    InsufficientData,
    Unknown,
}

/// A result that contributes one scalar to a trend
pub trait TrendSubject {
    /// The designated "after" value of the observation
    fn trend_value(&self) -> f64;
    fn risk(&self) -> &RiskAssessment;
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendPoint {
    pub source: String,
    pub value: f64,
    pub risk: RiskAssessment,
}

/// Successful observations in order, plus the derived trend
#[derive(Debug, Clone, Serialize)]
pub struct TrendRecord {
    pub points: Vec<TrendPoint>,
    pub trend: Trend,
    pub total_change: Option<f64>,
    pub average_change: Option<f64>,
}

impl TrendRecord {
    /// Failed outcomes are skipped; they stay in the caller's outcome list
    pub fn from_outcomes<T: TrendSubject>(outcomes: &[ObservationOutcome<T>]) -> Self {
        let points: Vec<TrendPoint> = outcomes
            .iter()
            .filter_map(|o| {
                o.value.as_ref().map(|v| TrendPoint {
                    source: o.source.clone(),
                    value: v.trend_value(),
                    risk: v.risk().clone(),
                })
            })
            .collect();

        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        let (trend, total_change, average_change) = classify(&values);
        Self {
            points,
            trend,
            total_change,
            average_change,
        }
    }

    pub fn from_values(values: &[f64]) -> Self {
        let (trend, total_change, average_change) = classify(values);
        Self {
            points: Vec::new(),
            trend,
            total_change,
            average_change,
        }
    }
}

/// Trend of a value sequence: (trend, total change, average change per step)
pub fn classify(values: &[f64]) -> (Trend, Option<f64>, Option<f64>) {
    match values {
        [] => (Trend::InsufficientData, None, None),
        [_] => (Trend::Unknown, None, None),
        [first, .., last] => {
            let total = last - first;
            if !total.is_finite() {
                log::warn!("Trend over {} values is not finite", values.len());
                return (Trend::Unknown, None, None);
            }
            let average = total / (values.len() - 1) as f64;
            let trend = if total > 0.0 {
                Trend::Expanding
            } else if total < 0.0 {
                Trend::Shrinking
            } else {
                Trend::Stable
            };
            (trend, Some(total), Some(average))
        }
    }
}
