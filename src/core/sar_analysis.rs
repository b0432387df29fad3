//! GLOF-stage classification of radar images

use crate::config::SarConfig;
use crate::core::batch::{run_batch, BatchReport};
use crate::core::calibrate::SarPreprocessor;
use crate::core::trend::{TrendRecord, TrendSubject};
use crate::io::image::ImageLoader;
use crate::types::{round_to, GlofError, GlofResult, GrayImage, ImageTensor, Modality, RiskAssessment, RiskLevel};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// A trained image classifier returning one probability per [`GlofClass`]
pub trait ImageClassifier: Send + Sync {
    fn predict(&self, tensor: &ImageTensor) -> GlofResult<Vec<f32>>;
}

/// Classifier output classes, in output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GlofClass {
    PreGlof,
    DuringGlof,
    PostGlof,
}

impl GlofClass {
    pub const ALL: [GlofClass; 3] = [GlofClass::PreGlof, GlofClass::DuringGlof, GlofClass::PostGlof];

    pub fn label(&self) -> &'static str {
        match self {
            GlofClass::PreGlof => "pre_glof",
            GlofClass::DuringGlof => "during_glof",
            GlofClass::PostGlof => "post_glof",
        }
    }

    /// Weight of this class in the overall GLOF probability
    fn glof_weight(&self) -> f64 {
        match self {
            GlofClass::PreGlof => 0.1,
            GlofClass::DuringGlof => 1.0,
            GlofClass::PostGlof => 0.3,
        }
    }

    pub fn risk(&self) -> RiskAssessment {
        let (level, score, message) = match self {
            GlofClass::PreGlof => (RiskLevel::Low, 25.0, "Normal conditions - Pre-GLOF state"),
            GlofClass::DuringGlof => (
                RiskLevel::Critical,
                95.0,
                "GLOF IN PROGRESS - Immediate evacuation required!",
            ),
            GlofClass::PostGlof => (
                RiskLevel::Moderate,
                50.0,
                "Post-GLOF conditions - Monitor for secondary events",
            ),
        };
        RiskAssessment::new(level, message)
            .with_score(score)
            .with_factors([self.label()])
    }
}

/// Classification of one radar image; percentages in [0, 100]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SarPrediction {
    pub predicted_class: GlofClass,
    pub confidence: f64,
    pub probabilities: BTreeMap<String, f64>,
    pub glof_probability: f64,
    pub risk: RiskAssessment,
}

impl SarPrediction {
    /// Build from raw classifier output
    pub fn from_probabilities(raw: &[f32]) -> GlofResult<Self> {
        if raw.len() != GlofClass::ALL.len() {
            return Err(GlofError::Classifier(format!(
                "expected {} class probabilities, got {}",
                GlofClass::ALL.len(),
                raw.len()
            )));
        }
        if raw.iter().any(|p| !p.is_finite()) {
            return Err(GlofError::Classifier("classifier returned non-finite probabilities".to_string()));
        }

        let mut best = 0;
        for (i, p) in raw.iter().enumerate() {
            if *p > raw[best] {
                best = i;
            }
        }
        let predicted_class = GlofClass::ALL[best];

        let percents: Vec<f64> = raw.iter().map(|&p| p as f64 * 100.0).collect();
        let glof_probability = GlofClass::ALL
            .iter()
            .zip(&percents)
            .map(|(class, p)| p * class.glof_weight())
            .sum::<f64>()
            .min(100.0);

        Ok(Self {
            predicted_class,
            confidence: percents[best],
            probabilities: GlofClass::ALL
                .iter()
                .zip(&percents)
                .map(|(class, p)| (class.label().to_string(), *p))
                .collect(),
            glof_probability,
            risk: predicted_class.risk(),
        })
    }

    pub fn to_presentation(&self) -> Self {
        Self {
            confidence: round_to(self.confidence, 2),
            probabilities: self
                .probabilities
                .iter()
                .map(|(k, v)| (k.clone(), round_to(*v, 2)))
                .collect(),
            glof_probability: round_to(self.glof_probability, 2),
            ..self.clone()
        }
    }
}

impl TrendSubject for SarPrediction {
    fn trend_value(&self) -> f64 {
        self.glof_probability
    }

    fn risk(&self) -> &RiskAssessment {
        &self.risk
    }
}

/// Batch results with probability statistics over the successful images
#[derive(Debug, Clone, Serialize)]
pub struct SarBatchSummary {
    pub report: BatchReport<SarPrediction>,
    pub average_glof_probability: Option<f64>,
    pub max_glof_probability: Option<f64>,
    pub trend: TrendRecord,
}

/// Radar image analyser: preprocessing plus an optional trained classifier
pub struct SarAnalyzer {
    preprocessor: SarPreprocessor,
    classifier: Option<Box<dyn ImageClassifier>>,
}

impl SarAnalyzer {
    pub fn new(config: SarConfig) -> Self {
        Self {
            preprocessor: SarPreprocessor::new(config),
            classifier: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn ImageClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_preprocessor(mut self, preprocessor: SarPreprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn has_classifier(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn preprocessor(&self) -> &SarPreprocessor {
        &self.preprocessor
    }

    fn classifier(&self) -> GlofResult<&dyn ImageClassifier> {
        self.classifier
            .as_deref()
            .ok_or_else(|| GlofError::Unavailable("model not loaded".to_string()))
    }

    pub fn predict(&self, image: &GrayImage) -> GlofResult<SarPrediction> {
        let classifier = self.classifier()?;
        let tensor = self.preprocessor.preprocess(image)?;
        let raw = classifier.predict(&tensor).map_err(|e| match e {
            GlofError::Classifier(_) => e,
            other => GlofError::Classifier(other.to_string()),
        })?;
        let prediction = SarPrediction::from_probabilities(&raw)?;
        log::info!(
            "SAR prediction {} ({:.1}%), GLOF probability {:.1}%",
            prediction.predicted_class.label(),
            prediction.confidence,
            prediction.glof_probability
        );
        Ok(prediction)
    }

    pub fn predict_path<P: AsRef<Path>>(&self, path: P) -> GlofResult<SarPrediction> {
        self.classifier()?;
        let image = ImageLoader::load_gray_from_path(path)?;
        self.predict(&image)
    }

    pub fn predict_bytes(&self, bytes: &[u8]) -> GlofResult<SarPrediction> {
        self.classifier()?;
        let image = ImageLoader::load_gray_from_bytes(bytes)?;
        self.predict(&image)
    }

    /// Classify a chronologically ordered image series
    pub fn analyze_batch<P: AsRef<Path> + Sync>(&self, paths: &[P]) -> SarBatchSummary {
        let report = run_batch(Modality::RadarImage, paths, |p| self.predict_path(p));

        let probabilities: Vec<f64> = report.successes().map(|(_, p)| p.glof_probability).collect();
        let average_glof_probability =
            (!probabilities.is_empty()).then(|| probabilities.iter().sum::<f64>() / probabilities.len() as f64);
        let max_glof_probability = probabilities.iter().copied().reduce(f64::max);
        let trend = TrendRecord::from_outcomes(&report.outcomes);

        SarBatchSummary {
            report,
            average_glof_probability,
            max_glof_probability,
            trend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    struct FixedClassifier(Vec<f32>);

    impl ImageClassifier for FixedClassifier {
        fn predict(&self, tensor: &ImageTensor) -> GlofResult<Vec<f32>> {
            assert_eq!(tensor.dim().3, 3);
            Ok(self.0.clone())
        }
    }

    struct BrokenClassifier;

    impl ImageClassifier for BrokenClassifier {
        fn predict(&self, _tensor: &ImageTensor) -> GlofResult<Vec<f32>> {
            Err(GlofError::Processing("tensor shape mismatch".to_string()))
        }
    }

    fn small_config() -> SarConfig {
        SarConfig {
            target_size: (8, 8),
            sigma_spatial: 1.0,
            ..SarConfig::default()
        }
    }

    #[test]
    fn test_glof_probability_weights() {
        let p = SarPrediction::from_probabilities(&[0.2, 0.5, 0.3]).unwrap();
        assert_eq!(p.predicted_class, GlofClass::DuringGlof);
        assert_abs_diff_eq!(p.glof_probability, 50.0 + 9.0 + 2.0, epsilon = 1e-4);
        assert_eq!(p.risk.risk_level, RiskLevel::Critical);
        assert_eq!(p.risk.numeric_score, Some(95.0));
        assert_eq!(p.risk.contributing_factors, vec!["during_glof".to_string()]);
    }

    #[test]
    fn test_wrong_class_count_is_classifier_error() {
        let err = SarPrediction::from_probabilities(&[0.5, 0.5]).unwrap_err();
        assert!(matches!(err, GlofError::Classifier(_)));
    }

    #[test]
    fn test_missing_model_is_unavailable() {
        let analyzer = SarAnalyzer::new(small_config());
        let err = analyzer.predict(&Array2::zeros((8, 8))).unwrap_err();
        assert!(matches!(err, GlofError::Unavailable(_)));
    }

    #[test]
    fn test_classifier_failure_is_surfaced() {
        let analyzer = SarAnalyzer::new(small_config()).with_classifier(Box::new(BrokenClassifier));
        let err = analyzer.predict(&Array2::from_elem((8, 8), 90u8)).unwrap_err();
        match err {
            GlofError::Classifier(msg) => assert!(msg.contains("tensor shape mismatch")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_pre_glof_prediction() {
        let analyzer =
            SarAnalyzer::new(small_config()).with_classifier(Box::new(FixedClassifier(vec![0.9, 0.05, 0.05])));
        let image = Array2::from_shape_fn((12, 12), |(i, j)| (i * 20 + j) as u8);
        let p = analyzer.predict(&image).unwrap();
        assert_eq!(p.predicted_class, GlofClass::PreGlof);
        assert_eq!(p.risk.risk_level, RiskLevel::Low);
        assert_abs_diff_eq!(p.confidence, 90.0, epsilon = 1e-4);
    }
}
