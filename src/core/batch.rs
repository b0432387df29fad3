//! Per-observation outcomes and batch reports
//!
//! A failing observation never aborts its siblings: its error is recorded in
//! its outcome and the aggregate statistics only use the successful ones.

use crate::types::{GlofResult, Modality};
use serde::Serialize;
use std::path::Path;

/// Result of analysing one observation
#[derive(Debug, Clone, Serialize)]
pub struct ObservationOutcome<T> {
    pub source: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub value: Option<T>,
}

impl<T> ObservationOutcome<T> {
    pub fn from_result(source: impl Into<String>, result: GlofResult<T>) -> Self {
        let source = source.into();
        match result {
            Ok(value) => Self {
                source,
                success: true,
                error: None,
                value: Some(value),
            },
            Err(e) => {
                log::warn!("Observation {} failed: {}", source, e);
                Self {
                    source,
                    success: false,
                    error: Some(e.to_string()),
                    value: None,
                }
            }
        }
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }
}

/// Outcomes of a batch in input order
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport<T> {
    pub modality: Modality,
    pub total: usize,
    pub successful: usize,
    pub outcomes: Vec<ObservationOutcome<T>>,
}

impl<T> BatchReport<T> {
    pub fn from_outcomes(modality: Modality, outcomes: Vec<ObservationOutcome<T>>) -> Self {
        let successful = outcomes.iter().filter(|o| o.success).count();
        Self {
            modality,
            total: outcomes.len(),
            successful,
            outcomes,
        }
    }

    /// Successful values with their source, in input order
    pub fn successes(&self) -> impl Iterator<Item = (&str, &T)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.value.as_ref().map(|v| (o.source.as_str(), v)))
    }
}

/// Analyse every path independently; results keep the input order
pub fn run_batch<P, T, F>(modality: Modality, paths: &[P], analyze: F) -> BatchReport<T>
where
    P: AsRef<Path> + Sync,
    T: Send,
    F: Fn(&Path) -> GlofResult<T> + Sync,
{
    log::info!("Running {} batch of {} observations", modality, paths.len());

    let run_one = |p: &P| {
        let path = p.as_ref();
        ObservationOutcome::from_result(path.display().to_string(), analyze(path))
    };

    #[cfg(feature = "parallel")]
    let outcomes: Vec<ObservationOutcome<T>> = {
        use rayon::prelude::*;
        paths.par_iter().map(run_one).collect()
    };

    #[cfg(not(feature = "parallel"))]
    let outcomes: Vec<ObservationOutcome<T>> = paths.iter().map(run_one).collect();

    let report = BatchReport::from_outcomes(modality, outcomes);
    log::info!("Batch finished: {}/{} successful", report.successful, report.total);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GlofError;

    #[test]
    fn test_failures_do_not_abort_batch() {
        let paths = vec!["a.png", "bad.png", "c.png"];
        let report = run_batch(Modality::OpticalImage, &paths, |p| {
            if p.to_string_lossy().contains("bad") {
                Err(GlofError::decode(p.display().to_string(), "corrupt"))
            } else {
                Ok(p.to_string_lossy().len())
            }
        });
        assert_eq!(report.total, 3);
        assert_eq!(report.modality, Modality::OpticalImage);
        assert_eq!(report.successful, 2);
        assert!(!report.outcomes[1].success);
        assert!(report.outcomes[1].error.as_deref().unwrap().contains("corrupt"));
        let sources: Vec<&str> = report.successes().map(|(s, _)| s).collect();
        assert_eq!(sources, vec!["a.png", "c.png"]);
    }

    #[test]
    fn test_outcome_serialization_flattens_value() {
        #[derive(Serialize)]
        struct Metric {
            size: f64,
        }
        let ok = ObservationOutcome::from_result("x", Ok(Metric { size: 2.5 }));
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["size"], 2.5);
        assert_eq!(json["success"], true);
        assert!(json.get("error").is_none());

        let failed: ObservationOutcome<Metric> =
            ObservationOutcome::from_result("y", Err(GlofError::Processing("boom".to_string())));
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("boom"));
    }
}
