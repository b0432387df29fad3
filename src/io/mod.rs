//! I/O modules for reading optical/SAR images, DEMs, and video frames

pub mod image;
pub mod dem;
pub mod frames;

pub use image::ImageLoader;
pub use dem::{DemReader, ElevationGrid};
pub use frames::{FrameSource, ImageSequenceSource, MemoryFrameSource, VideoInfo, ZipFrameSource};
