//! Core GLOF analysis modules

pub mod batch;
pub mod calibrate;
pub mod contours;
pub mod morphology;
pub mod motion;
pub mod optical_flow;
pub mod predictor;
pub mod risk;
pub mod sar_analysis;
pub mod segmentation;
pub mod speckle_filter;
pub mod terrain_flow;
pub mod trend;

// Re-export main types
pub use batch::{run_batch, BatchReport, ObservationOutcome};
pub use calibrate::{PreprocessStages, SarPreprocessor};
pub use contours::{find_external_contours, BoundingBox, Contour};
pub use motion::{FrameMotion, FramePairMotion, MotionDetector, MotionRegion, VideoMotionSummary};
pub use optical_flow::{DisplacementField, OpticalFlow};
pub use predictor::{
    GlofPredictor, Prediction, PredictionSource, SensorField, SensorReadings, SensorSimulator,
    TabularClassifier,
};
pub use risk::{Condition, RiskTable};
pub use sar_analysis::{GlofClass, ImageClassifier, SarAnalyzer, SarBatchSummary, SarPrediction};
pub use segmentation::{LakeAnalysis, LakeAnalyzer, LakeComparison};
pub use speckle_filter::{BorderMode, SpeckleFilter, SpeckleFilterParams};
pub use terrain_flow::{DemAnalysis, DemAnalyzer, DemOverrides, FlowField};
pub use trend::{Trend, TrendRecord, TrendSubject};
