use approx::assert_abs_diff_eq;
use glofscan::config::SarConfig;
use glofscan::core::calibrate::normalize_min_max;
use glofscan::core::{GlofClass, ImageClassifier, SarAnalyzer, SarPreprocessor, Trend};
use glofscan::io::image::{encode_png, gray_to_rgb};
use glofscan::{GlofError, GlofResult, GrayImage, ImageTensor, RiskLevel};
use ndarray::Array2;
use tempfile::TempDir;

fn config() -> SarConfig {
    SarConfig {
        target_size: (16, 16),
        sigma_spatial: 2.0,
        ..SarConfig::default()
    }
}

fn textured() -> GrayImage {
    Array2::from_shape_fn((24, 24), |(i, j)| ((i * 7 + j * 13) % 200 + 20) as u8)
}

/// Calls a flat tensor pre-GLOF and anything else an active outburst
struct ContrastClassifier;

impl ImageClassifier for ContrastClassifier {
    fn predict(&self, tensor: &ImageTensor) -> GlofResult<Vec<f32>> {
        if tensor.iter().all(|&v| v == 0.0) {
            Ok(vec![0.8, 0.1, 0.1])
        } else {
            Ok(vec![0.1, 0.8, 0.1])
        }
    }
}

#[test]
fn test_tensor_layout_and_range() {
    let tensor = SarPreprocessor::new(config()).preprocess(&textured()).unwrap();
    assert_eq!(tensor.dim(), (1, 16, 16, 3));
    assert!(tensor.iter().all(|&v| (0.0..=1.0).contains(&v)));
    for i in 0..16 {
        for j in 0..16 {
            assert_eq!(tensor[[0, i, j, 0]], tensor[[0, i, j, 2]]);
        }
    }
}

#[test]
fn test_constant_image_gives_zero_tensor() {
    let tensor = SarPreprocessor::new(config())
        .preprocess(&Array2::from_elem((20, 20), 120u8))
        .unwrap();
    assert!(tensor.iter().all(|&v| v == 0.0));
}

#[test]
fn test_stages_keep_intermediates() {
    let stages = SarPreprocessor::new(config()).run_stages(&textured()).unwrap();
    assert_eq!(stages.filtered.dim(), (24, 24));
    assert!(stages.sigma0_db.iter().all(|v| v.is_finite() && *v <= 0.0));
    assert_eq!(stages.resized.dim(), (16, 16));
}

#[test]
fn test_normalization_is_idempotent() {
    let grid = Array2::from_shape_fn((5, 5), |(i, j)| (i * 5 + j) as f64 / 24.0);
    let once = normalize_min_max(&grid);
    let twice = normalize_min_max(&once);
    for (a, b) in once.iter().zip(twice.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
    }
}

#[test]
fn test_batch_with_failures_and_trend() {
    let dir = TempDir::new().unwrap();
    let calm = dir.path().join("a_calm.png");
    std::fs::write(&calm, encode_png(&gray_to_rgb(&Array2::from_elem((20, 20), 90u8))).unwrap()).unwrap();
    let broken = dir.path().join("b_broken.png");
    std::fs::write(&broken, b"corrupt").unwrap();
    let active = dir.path().join("c_active.png");
    std::fs::write(&active, encode_png(&gray_to_rgb(&textured())).unwrap()).unwrap();

    let analyzer = SarAnalyzer::new(config()).with_classifier(Box::new(ContrastClassifier));
    let summary = analyzer.analyze_batch(&[calm, broken, active]);

    assert_eq!(summary.report.total, 3);
    assert_eq!(summary.report.successful, 2);
    assert!(!summary.report.outcomes[1].success);

    let first = summary.report.outcomes[0].value().unwrap();
    assert_eq!(first.predicted_class, GlofClass::PreGlof);
    assert_eq!(first.risk.risk_level, RiskLevel::Low);
    let last = summary.report.outcomes[2].value().unwrap();
    assert_eq!(last.predicted_class, GlofClass::DuringGlof);
    assert_eq!(last.risk.risk_level, RiskLevel::Critical);

    // 80*0.1 + 10 + 10*0.3 and 10*0.1 + 80 + 10*0.3
    assert_abs_diff_eq!(summary.max_glof_probability.unwrap(), 84.0, epsilon = 1e-3);
    assert_abs_diff_eq!(summary.average_glof_probability.unwrap(), 52.5, epsilon = 1e-3);
    assert_eq!(summary.trend.trend, Trend::Expanding);
}

#[test]
fn test_batch_without_model_reports_every_failure() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scene.png");
    std::fs::write(&path, encode_png(&gray_to_rgb(&textured())).unwrap()).unwrap();

    let summary = SarAnalyzer::new(config()).analyze_batch(&[path]);
    assert_eq!(summary.report.successful, 0);
    assert!(summary.average_glof_probability.is_none());
    assert_eq!(summary.trend.trend, Trend::InsufficientData);
    assert!(summary.report.outcomes[0].error.as_deref().unwrap().contains("model not loaded"));

    let err = SarAnalyzer::new(config()).predict(&textured()).unwrap_err();
    assert!(matches!(err, GlofError::Unavailable(_)));
}
