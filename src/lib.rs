//! glofscan: multi-modal glacial lake outburst flood risk assessment
//!
//! Turns radar imagery, optical lake imagery, elevation models, video frames
//! and tabular sensor readings into calibrated risk assessments, and
//! aggregates repeated observations into temporal trends.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    FeatureVector, FloatGrid, GlofError, GlofResult, GrayImage, ImageTensor, Modality, RgbImage, RiskAssessment,
    RiskLevel,
};

pub use config::GlofConfig;
pub use io::{DemReader, ElevationGrid, FrameSource, ImageLoader};

pub use crate::core::{
    DemAnalyzer, GlofPredictor, LakeAnalyzer, MotionDetector, SarAnalyzer, TrendRecord,
};

#[cfg(feature = "python")]
mod python {
    use crate::config::{DemConfig, LakeConfig, PredictorConfig};
    use crate::core::terrain_flow::FlowField;
    use crate::core::{DemAnalyzer, DemOverrides, GlofPredictor, LakeAnalyzer};
    use crate::io::ElevationGrid;
    use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
    use pyo3::prelude::*;
    use std::collections::HashMap;

    fn to_py_err(e: crate::GlofError) -> PyErr {
        PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e))
    }

    fn to_json<T: serde::Serialize>(value: &T) -> PyResult<String> {
        serde_json::to_string(value)
            .map_err(|e| PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", e)))
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_class::<PyLakeAnalyzer>()?;
        m.add_class::<PyDemAnalyzer>()?;
        m.add_class::<PyPredictor>()?;
        m.add_function(wrap_pyfunction!(flow_magnitude, m)?)?;
        Ok(())
    }

    /// Python wrapper for LakeAnalyzer
    #[pyclass(name = "LakeAnalyzer")]
    struct PyLakeAnalyzer {
        inner: LakeAnalyzer,
    }

    #[pymethods]
    impl PyLakeAnalyzer {
        #[new]
        fn new(resolution_m: Option<f64>) -> Self {
            let mut config = LakeConfig::default();
            if let Some(r) = resolution_m {
                config.resolution_m = r;
            }
            PyLakeAnalyzer {
                inner: LakeAnalyzer::new(config),
            }
        }

        /// Analyse an image file; returns the result as JSON
        fn analyze_path(&self, path: String, resolution_m: Option<f64>) -> PyResult<String> {
            let analysis = self.inner.analyze_path(&path, resolution_m).map_err(to_py_err)?;
            to_json(&analysis.to_presentation())
        }

        fn analyze_array(&self, gray: PyReadonlyArray2<u8>) -> PyResult<String> {
            let analysis = self.inner.analyze(&gray.as_array().to_owned()).map_err(to_py_err)?;
            to_json(&analysis.to_presentation())
        }
    }

    /// Python wrapper for DemAnalyzer
    #[pyclass(name = "DemAnalyzer")]
    struct PyDemAnalyzer {
        inner: DemAnalyzer,
    }

    #[pymethods]
    impl PyDemAnalyzer {
        #[new]
        fn new() -> Self {
            PyDemAnalyzer {
                inner: DemAnalyzer::new(DemConfig::default()),
            }
        }

        fn analyze_path(
            &self,
            path: String,
            no_data: Option<f64>,
            downscale_factor: Option<usize>,
            water_level_percentile: Option<f64>,
        ) -> PyResult<String> {
            let overrides = DemOverrides {
                downscale_factor,
                water_level_percentile,
            };
            let analysis = self.inner.analyze_path(&path, no_data, overrides).map_err(to_py_err)?;
            to_json(&analysis.to_presentation())
        }

        fn analyze_array(&self, elevation: PyReadonlyArray2<f64>, no_data: Option<f64>) -> PyResult<String> {
            let grid = ElevationGrid::from_array(elevation.as_array().to_owned(), no_data, "<array>");
            let analysis = self.inner.analyze(&grid).map_err(to_py_err)?;
            to_json(&analysis.to_presentation())
        }
    }

    /// Downhill flow magnitude of an elevation grid
    #[pyfunction]
    fn flow_magnitude<'py>(
        py: Python<'py>,
        elevation: PyReadonlyArray2<f64>,
        sigma: f64,
        water_level_percentile: f64,
    ) -> PyResult<&'py PyArray2<f64>> {
        let field = FlowField::compute(&elevation.as_array().to_owned(), sigma, water_level_percentile)
            .map_err(to_py_err)?;
        Ok(field.magnitude.into_pyarray(py))
    }

    /// Python wrapper for GlofPredictor
    #[pyclass(name = "Predictor")]
    struct PyPredictor {
        inner: GlofPredictor,
    }

    #[pymethods]
    impl PyPredictor {
        #[new]
        fn new() -> Self {
            PyPredictor {
                inner: GlofPredictor::new(PredictorConfig::default()),
            }
        }

        fn predict(&mut self, readings: Option<HashMap<String, f64>>) -> PyResult<String> {
            let prediction = self
                .inner
                .predict(&readings.unwrap_or_default())
                .map_err(to_py_err)?;
            to_json(&prediction.to_presentation())
        }
    }
}
