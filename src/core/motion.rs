//! Water-surface motion detection on frame pairs and frame streams

use crate::config::{HsvRange, MotionConfig};
use crate::core::batch::ObservationOutcome;
use crate::core::contours::{find_external_contours, BoundingBox};
use crate::core::optical_flow::OpticalFlow;
use crate::core::risk::{motion_risk_table, RiskTable, FLOW_VELOCITY, FLOW_VOLUME_M3};
use crate::io::frames::{FrameSource, VideoInfo};
use crate::io::image::{rgb_to_gray, ImageLoader};
use crate::types::{round_to, FeatureVector, GlofError, GlofResult, Mask, RgbImage, RiskAssessment};
use ndarray::{Array2, Zip};
use serde::Serialize;
use std::sync::Arc;

/// RGB to HSV in the 8-bit convention: H in [0,180), S and V in [0,255]
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (rf, gf, bf) = (r as f64, g as f64, b as f64);
    let v = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let diff = v - min;

    let s = if v > 0.0 { diff / v * 255.0 } else { 0.0 };
    let mut h = if diff == 0.0 {
        0.0
    } else if v == rf {
        60.0 * (gf - bf) / diff
    } else if v == gf {
        120.0 + 60.0 * (bf - rf) / diff
    } else {
        240.0 + 60.0 * (rf - gf) / diff
    };
    if h < 0.0 {
        h += 360.0;
    }

    [
        ((h / 2.0).round() as u32 % 180) as u8,
        s.round().clamp(0.0, 255.0) as u8,
        v as u8,
    ]
}

/// Pixels whose colour falls in any of the ranges
pub fn water_mask(frame: &RgbImage, ranges: &[HsvRange]) -> Mask {
    let (rows, cols, _) = frame.dim();
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        let hsv = rgb_to_hsv(frame[[i, j, 0]], frame[[i, j, 1]], frame[[i, j, 2]]);
        ranges.iter().any(|r| r.contains(hsv))
    })
}

/// One moving water region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MotionRegion {
    pub bbox: BoundingBox,
    pub pixel_area: f64,
    pub area_m2: f64,
    pub volume_m3: f64,
}

/// Motion between two frames
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FramePairMotion {
    pub water_detected_pixels: usize,
    pub motion_detected_pixels: usize,
    pub water_motion_regions: usize,
    pub regions: Vec<MotionRegion>,
    pub total_flow_volume_m3: f64,
    /// Mean displacement magnitude over moving pixels, 0 without motion
    pub avg_flow_velocity: f64,
    pub risk: RiskAssessment,
}

impl FramePairMotion {
    pub fn features(&self) -> FeatureVector {
        FeatureVector::new()
            .with(FLOW_VOLUME_M3, self.total_flow_volume_m3)
            .with(FLOW_VELOCITY, self.avg_flow_velocity)
    }

    /// Copy rounded for display (4 decimals)
    pub fn to_presentation(&self) -> Self {
        Self {
            regions: self
                .regions
                .iter()
                .map(|r| MotionRegion {
                    area_m2: round_to(r.area_m2, 4),
                    volume_m3: round_to(r.volume_m3, 4),
                    ..r.clone()
                })
                .collect(),
            total_flow_volume_m3: round_to(self.total_flow_volume_m3, 4),
            avg_flow_velocity: round_to(self.avg_flow_velocity, 4),
            ..self.clone()
        }
    }
}

/// A pair result tagged with the stream position of its second frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameMotion {
    pub frame_number: usize,
    #[serde(flatten)]
    pub motion: FramePairMotion,
}

/// Aggregate over the successfully analysed pairs of a stream
#[derive(Debug, Clone, Serialize)]
pub struct VideoMotionSummary {
    pub video_info: VideoInfo,
    pub frames_analyzed: usize,
    pub frames_failed: usize,
    pub avg_flow_volume_m3: f64,
    pub max_flow_volume_m3: f64,
    pub avg_flow_velocity: f64,
    pub max_flow_velocity: f64,
    /// `None` when no pair could be analysed
    pub risk: Option<RiskAssessment>,
    pub frames: Vec<ObservationOutcome<FrameMotion>>,
}

enum PairJob {
    Pair(usize, Arc<RgbImage>, Arc<RgbImage>),
    Failed(usize, GlofError),
}

/// Optical-flow water motion detector
pub struct MotionDetector {
    config: MotionConfig,
    flow: OpticalFlow,
    table: RiskTable,
}

impl MotionDetector {
    pub fn new(config: MotionConfig) -> Self {
        let flow = OpticalFlow::new(config.flow.clone());
        Self {
            config,
            flow,
            table: motion_risk_table(),
        }
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    pub fn analyze_frame_pair(&self, first: &RgbImage, second: &RgbImage) -> GlofResult<FramePairMotion> {
        if first.dim() != second.dim() {
            return Err(GlofError::InvalidInput(format!(
                "frame sizes differ: {:?} vs {:?}",
                first.dim(),
                second.dim()
            )));
        }

        let water = water_mask(second, &self.config.color_ranges);
        let displacement = self.flow.compute(&rgb_to_gray(first), &rgb_to_gray(second))?;
        let (magnitude, _angle) = displacement.to_polar();

        let threshold = self.config.motion_threshold;
        let motion = magnitude.mapv(|m| m > threshold);
        let combined = Zip::from(&water).and(&motion).map_collect(|&w, &m| w && m);

        let pixel_area_m2 = self.config.pixel_to_meter * self.config.pixel_to_meter;
        let regions: Vec<MotionRegion> = find_external_contours(&combined)
            .into_iter()
            .filter_map(|contour| {
                let pixel_area = contour.area();
                if pixel_area <= self.config.min_region_area_px {
                    return None;
                }
                let area_m2 = pixel_area * pixel_area_m2;
                Some(MotionRegion {
                    bbox: contour.bounding_box,
                    pixel_area,
                    area_m2,
                    volume_m3: area_m2 * self.config.estimated_depth_m,
                })
            })
            .collect();
        let total_flow_volume_m3: f64 = regions.iter().map(|r| r.volume_m3).sum();

        let (moving_sum, moving_count) = Zip::from(&magnitude)
            .and(&motion)
            .fold((0.0, 0usize), |(s, c), &m, &moving| if moving { (s + m, c + 1) } else { (s, c) });
        let avg_flow_velocity = if moving_count > 0 {
            moving_sum / moving_count as f64
        } else {
            0.0
        };

        let water_detected_pixels = water.iter().filter(|&&w| w).count();
        let features = FeatureVector::new()
            .with(FLOW_VOLUME_M3, total_flow_volume_m3)
            .with(FLOW_VELOCITY, avg_flow_velocity);
        let risk = self.table.evaluate(&features);

        log::debug!(
            "Pair: water {} px, motion {} px, {} regions, volume {:.4} m3",
            water_detected_pixels,
            moving_count,
            regions.len(),
            total_flow_volume_m3
        );

        Ok(FramePairMotion {
            water_detected_pixels,
            motion_detected_pixels: moving_count,
            water_motion_regions: regions.len(),
            regions,
            total_flow_volume_m3,
            avg_flow_velocity,
            risk,
        })
    }

    /// Decode two encoded images and analyse them as a pair
    pub fn analyze_image_pair(&self, first: &[u8], second: &[u8]) -> GlofResult<FramePairMotion> {
        let a = ImageLoader::decode_rgb(first, "<first image>")?;
        let b = ImageLoader::decode_rgb(second, "<second image>")?;
        self.analyze_frame_pair(&a, &b)
    }

    pub fn analyze_video(&self, source: &mut dyn FrameSource) -> GlofResult<VideoMotionSummary> {
        self.analyze_video_with(source, self.config.max_frames, self.config.frame_skip)
    }

    /// Analyse every `frame_skip`-th frame against the previously kept frame,
    /// stopping after `max_frames` decoded pairs.
    ///
    /// A stream whose kept frames form no pair at all is `InvalidInput`.
    pub fn analyze_video_with(
        &self,
        source: &mut dyn FrameSource,
        max_frames: usize,
        frame_skip: usize,
    ) -> GlofResult<VideoMotionSummary> {
        if frame_skip == 0 {
            return Err(GlofError::InvalidInput("frame_skip must be at least 1".to_string()));
        }
        let video_info = source.info().clone();
        log::info!(
            "Analysing video: {} frames {}x{}, skip {}, cap {}",
            video_info.total_frames,
            video_info.width,
            video_info.height,
            frame_skip,
            max_frames
        );

        let jobs = collect_pair_jobs(source, max_frames, frame_skip);
        if jobs.is_empty() {
            return Err(GlofError::InvalidInput(format!(
                "No frames analyzed: {} frames at skip {} form no frame pair",
                video_info.total_frames, frame_skip
            )));
        }
        let run_job = |job: PairJob| match job {
            PairJob::Pair(n, a, b) => ObservationOutcome::from_result(
                format!("frame {}", n),
                self.analyze_frame_pair(&a, &b).map(|motion| FrameMotion {
                    frame_number: n,
                    motion,
                }),
            ),
            PairJob::Failed(n, e) => ObservationOutcome::from_result(format!("frame {}", n), Err(e)),
        };

        #[cfg(feature = "parallel")]
        let frames: Vec<ObservationOutcome<FrameMotion>> = {
            use rayon::prelude::*;
            jobs.into_par_iter().map(run_job).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let frames: Vec<ObservationOutcome<FrameMotion>> = jobs.into_iter().map(run_job).collect();

        Ok(self.summarize(video_info, frames))
    }

    fn summarize(&self, video_info: VideoInfo, frames: Vec<ObservationOutcome<FrameMotion>>) -> VideoMotionSummary {
        let ok: Vec<&FramePairMotion> = frames.iter().filter_map(|f| f.value().map(|v| &v.motion)).collect();
        let frames_analyzed = ok.len();
        let frames_failed = frames.len() - frames_analyzed;

        if ok.is_empty() {
            log::warn!("No frame pair could be analysed");
            return VideoMotionSummary {
                video_info,
                frames_analyzed,
                frames_failed,
                avg_flow_volume_m3: 0.0,
                max_flow_volume_m3: 0.0,
                avg_flow_velocity: 0.0,
                max_flow_velocity: 0.0,
                risk: None,
                frames,
            };
        }

        let n = ok.len() as f64;
        let avg_flow_volume_m3 = ok.iter().map(|m| m.total_flow_volume_m3).sum::<f64>() / n;
        let max_flow_volume_m3 = ok.iter().map(|m| m.total_flow_volume_m3).fold(0.0, f64::max);
        let avg_flow_velocity = ok.iter().map(|m| m.avg_flow_velocity).sum::<f64>() / n;
        let max_flow_velocity = ok.iter().map(|m| m.avg_flow_velocity).fold(0.0, f64::max);

        let risk = self.table.evaluate(
            &FeatureVector::new()
                .with(FLOW_VOLUME_M3, avg_flow_volume_m3)
                .with(FLOW_VELOCITY, avg_flow_velocity),
        );
        log::info!(
            "Video motion: {} pairs ({} failed), avg volume {:.4} m3, avg velocity {:.4} => {}",
            frames_analyzed,
            frames_failed,
            avg_flow_volume_m3,
            avg_flow_velocity,
            risk.risk_level
        );

        VideoMotionSummary {
            video_info,
            frames_analyzed,
            frames_failed,
            avg_flow_volume_m3,
            max_flow_volume_m3,
            avg_flow_velocity,
            max_flow_velocity,
            risk: Some(risk),
            frames,
        }
    }
}

impl Default for MotionDetector {
    fn default() -> Self {
        Self::new(MotionConfig::default())
    }
}

/// Walk the stream and pair each kept frame with the previous kept one.
///
/// A frame that fails to decode becomes a failed job and the next decodable
/// kept frame starts a fresh pair. Only pairs count toward `max_frames`.
fn collect_pair_jobs(source: &mut dyn FrameSource, max_frames: usize, frame_skip: usize) -> Vec<PairJob> {
    let mut jobs = Vec::new();
    let mut pairs = 0usize;
    let mut previous: Option<Arc<RgbImage>> = None;
    let mut frame_number = 0usize;

    while pairs < max_frames {
        let Some(frame) = source.next_frame() else { break };
        frame_number += 1;
        if frame_number % frame_skip != 0 {
            continue;
        }

        match frame {
            Ok(frame) => {
                let frame = Arc::new(frame);
                if let Some(prev) = previous.take() {
                    jobs.push(PairJob::Pair(frame_number, prev, Arc::clone(&frame)));
                    pairs += 1;
                }
                previous = Some(frame);
            }
            Err(e) => {
                jobs.push(PairJob::Failed(frame_number, e));
                previous = None;
            }
        }
    }
    jobs
}
