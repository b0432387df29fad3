use glofscan::config::LakeConfig;
use glofscan::core::risk::{lake_risk_table, LAKE_CHANGE_PERCENT, WATER_PERCENTAGE};
use glofscan::core::{LakeAnalyzer, Trend};
use glofscan::io::image::{encode_png, gray_to_rgb};
use glofscan::{FeatureVector, GrayImage, RiskLevel};
use ndarray::Array2;
use tempfile::TempDir;

/// Dark square of `side` pixels on a light background
fn dark_square(side: usize) -> GrayImage {
    Array2::from_shape_fn((100, 100), |(i, j)| {
        if (20..20 + side).contains(&i) && (30..30 + side).contains(&j) {
            10
        } else {
            200
        }
    })
}

fn write_png(dir: &TempDir, name: &str, image: &GrayImage) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, encode_png(&gray_to_rgb(image)).unwrap()).unwrap();
    path
}

#[test]
fn test_dark_square_is_the_lake() {
    let analyzer = LakeAnalyzer::new(LakeConfig::default());
    let analysis = analyzer.analyze_with_resolution(&dark_square(30), Some(10.0)).unwrap();

    assert!(analysis.threshold >= 10 && analysis.threshold < 200);
    assert_eq!(analysis.lake.size_before_m2, 900.0 * 100.0);
    assert!(analysis.lake.size_after_m2 > analysis.lake.size_before_m2);
    assert!(analysis.lake.change_percent > 0.0);
    assert_eq!(analysis.coverage.total_area_m2, 10_000.0 * 100.0);
    assert_eq!(
        analysis.coverage.water_percentage,
        analysis.lake.size_after_m2 / analysis.coverage.total_area_m2 * 100.0
    );
    // Growth of a 30 px square by 5 px is far beyond 20%
    assert_eq!(analysis.risk.risk_level, RiskLevel::High);
}

#[test]
fn test_png_bytes_and_path_agree() {
    let dir = TempDir::new().unwrap();
    let image = dark_square(30);
    let path = write_png(&dir, "lake.png", &image);
    let bytes = std::fs::read(&path).unwrap();

    let analyzer = LakeAnalyzer::default();
    let from_path = analyzer.analyze_path(&path, None).unwrap();
    let from_bytes = analyzer.analyze_bytes(&bytes, None).unwrap();
    assert_eq!(from_path, from_bytes);
    assert_eq!(from_path.image_dimensions.width, 100);
}

#[test]
fn test_change_threshold_is_strict() {
    let table = lake_risk_table();
    let at = FeatureVector::new().with(LAKE_CHANGE_PERCENT, 20.0).with(WATER_PERCENTAGE, 0.0);
    let above = FeatureVector::new().with(LAKE_CHANGE_PERCENT, 20.0001).with(WATER_PERCENTAGE, 0.0);
    assert_eq!(table.evaluate(&at).risk_level, RiskLevel::Moderate);
    assert_eq!(table.evaluate(&above).risk_level, RiskLevel::High);
}

#[test]
fn test_compare_images_trends_and_isolates_failures() {
    let dir = TempDir::new().unwrap();
    let small = write_png(&dir, "2020.png", &dark_square(20));
    let broken = dir.path().join("2021.png");
    std::fs::write(&broken, b"not an image").unwrap();
    let large = write_png(&dir, "2022.png", &dark_square(40));

    let comparison = LakeAnalyzer::default().compare_images(&[small, broken, large]);
    assert_eq!(comparison.report.total, 3);
    assert_eq!(comparison.report.modality, glofscan::Modality::OpticalImage);
    assert_eq!(comparison.report.successful, 2);
    assert!(!comparison.report.outcomes[1].success);
    assert!(comparison.report.outcomes[1].error.is_some());

    assert_eq!(comparison.trend.trend, Trend::Expanding);
    assert_eq!(comparison.trend.points.len(), 2);
    assert!(comparison.trend.total_change.unwrap() > 0.0);
}

#[test]
fn test_uniform_image_has_no_ice() {
    let analysis = LakeAnalyzer::default()
        .analyze(&Array2::from_elem((16, 16), 90u8))
        .unwrap();
    assert_eq!(analysis.ice.status, "No ice detected");
    assert_eq!(analysis.lake.change_percent, 0.0);
}
