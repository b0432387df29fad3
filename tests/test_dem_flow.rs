use flate2::write::GzEncoder;
use flate2::Compression;
use glofscan::config::DemConfig;
use glofscan::core::{DemAnalyzer, DemOverrides};
use glofscan::io::DemReader;
use glofscan::{GlofError, RiskLevel};
use std::io::{Cursor, Write};
use tempfile::TempDir;
use tiff::encoder::{colortype, TiffEncoder};

fn hgt_bytes(side: usize, elevation: impl Fn(usize, usize) -> i16) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(side * side * 2);
    for i in 0..side {
        for j in 0..side {
            bytes.extend_from_slice(&elevation(i, j).to_be_bytes());
        }
    }
    bytes
}

#[test]
fn test_flat_terrain_is_fully_submerged_and_low_risk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("N28E086.hgt");
    std::fs::write(&path, hgt_bytes(60, |_, _| 1500)).unwrap();

    let analysis = DemAnalyzer::new(DemConfig::default())
        .analyze_path(&path, None, DemOverrides::default())
        .unwrap();

    assert_eq!(analysis.dimensions.height, 12);
    assert_eq!(analysis.water_flow.submerged_area_m2, 3600.0);
    assert_eq!(analysis.water_flow.submerged_volume_m3, 0.0);
    assert_eq!(analysis.water_flow.overflow_rate_m3_per_s, 0.0);
    assert_eq!(analysis.water_flow.avg_flow_velocity_m_per_s, 0.0);
    assert_eq!(analysis.elevation.water_level_threshold_m, 1500.0);
    assert_eq!(analysis.risk.risk_level, RiskLevel::Low);
}

#[test]
fn test_flat_terrain_any_percentile() {
    let analyzer = DemAnalyzer::default();
    let bytes = hgt_bytes(20, |_, _| 900);
    for percentile in [0.0, 37.5, 100.0] {
        let overrides = DemOverrides {
            downscale_factor: Some(1),
            water_level_percentile: Some(percentile),
        };
        let analysis = analyzer.analyze_hgt_bytes(&bytes, None, overrides).unwrap();
        assert_eq!(analysis.water_flow.submerged_area_m2, 400.0);
    }
}

#[test]
fn test_gzipped_tile_with_voids() {
    let bytes = hgt_bytes(30, |i, j| if i == 3 && j == 4 { -32768 } else { 2000 + (i as i16) });
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&bytes).unwrap();
    let gz = encoder.finish().unwrap();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tile.hgt.gz");
    std::fs::write(&path, gz).unwrap();

    let grid = DemReader::read_dem(&path, None).unwrap();
    assert!(grid.data[[3, 4]].is_nan());
    assert_eq!(grid.data[[10, 10]], 2010.0);

    let analysis = DemAnalyzer::default()
        .analyze_with(&grid, DemOverrides { downscale_factor: Some(1), water_level_percentile: None })
        .unwrap();
    assert!(analysis.elevation.min_m >= 2000.0);
    assert!(analysis.water_flow.avg_flow_velocity_m_per_s.is_finite());
}

#[test]
fn test_steep_geotiff_flows_downhill() {
    let (width, height) = (50u32, 40u32);
    let data: Vec<f32> = (0..height)
        .flat_map(|_| (0..width).map(|j| 3000.0 - 10.0 * j as f32))
        .collect();
    let mut cursor = Cursor::new(Vec::new());
    TiffEncoder::new(&mut cursor)
        .unwrap()
        .write_image::<colortype::Gray32Float>(width, height, &data)
        .unwrap();

    let analysis = DemAnalyzer::default()
        .analyze_bytes(cursor.get_ref(), None, DemOverrides::default())
        .unwrap();
    assert_eq!(analysis.dimensions.width, 10);
    assert!(analysis.water_flow.avg_flow_velocity_m_per_s > 0.5);
    assert_eq!(analysis.risk.risk_level, RiskLevel::High);
}

#[test]
fn test_unreadable_rasters() {
    let analyzer = DemAnalyzer::default();
    let err = analyzer
        .analyze_bytes(b"definitely not a raster", None, DemOverrides::default())
        .unwrap_err();
    assert!(matches!(err, GlofError::Unavailable(_)));

    let all_void = hgt_bytes(10, |_, _| -32768);
    let err = analyzer
        .analyze_hgt_bytes(&all_void, None, DemOverrides::default())
        .unwrap_err();
    assert!(matches!(err, GlofError::Processing(_)));
}

#[test]
fn test_junk_upload_is_not_read_as_a_tile() {
    // Even length and a perfect square of samples, but not an SRTM tile size
    let junk = b"this is a corrupted upload file.";
    assert_eq!(junk.len(), 32);
    let result = DemAnalyzer::default().analyze_bytes(junk, None, DemOverrides::default());
    assert!(matches!(result, Err(GlofError::Unavailable(_))));
}
