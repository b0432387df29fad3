//! Frame sources for video motion analysis
//!
//! A "video" is any ordered stream of RGB frames: numbered image files in a
//! directory, image entries of a zip archive, or frames already in memory.

use crate::io::image::ImageLoader;
use crate::types::{GlofError, GlofResult, RgbImage};
use regex::Regex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

const FRAME_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// Static description of a frame stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoInfo {
    pub fps: Option<f64>,
    pub total_frames: usize,
    pub width: usize,
    pub height: usize,
}

/// Sequential access to decoded frames
pub trait FrameSource {
    fn info(&self) -> &VideoInfo;

    /// Next frame, `None` at end of stream. A frame that fails to decode is
    /// reported as `Some(Err(..))` and the stream continues after it.
    fn next_frame(&mut self) -> Option<GlofResult<RgbImage>>;
}

fn has_frame_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Order frame names by the last run of digits in the name, then by name
fn sort_frame_names(names: &mut [String]) -> GlofResult<()> {
    let digits = Regex::new(r"(\d+)").map_err(|e| GlofError::Processing(format!("Regex error: {}", e)))?;
    let frame_index = |name: &str| -> Option<u64> {
        let stem = Path::new(name).file_stem().and_then(|s| s.to_str()).unwrap_or(name);
        digits
            .find_iter(stem)
            .last()
            .and_then(|m| m.as_str().parse::<u64>().ok())
    };
    names.sort_by(|a, b| frame_index(a).cmp(&frame_index(b)).then_with(|| a.cmp(b)));
    Ok(())
}

/// Numbered image files in one directory
pub struct ImageSequenceSource {
    frames: VecDeque<PathBuf>,
    info: VideoInfo,
}

impl ImageSequenceSource {
    pub fn open<P: AsRef<Path>>(dir: P, fps: Option<f64>) -> GlofResult<Self> {
        let dir = dir.as_ref();
        let source_id = dir.display().to_string();
        log::info!("Opening frame sequence: {}", source_id);

        let entries = std::fs::read_dir(dir).map_err(|e| GlofError::decode(&source_id, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| GlofError::decode(&source_id, e))?;
            if !entry.path().is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if has_frame_extension(name) {
                    names.push(name.to_string());
                }
            }
        }

        if names.is_empty() {
            return Err(GlofError::decode(&source_id, "directory contains no image frames"));
        }
        sort_frame_names(&mut names)?;

        let first = dir.join(&names[0]);
        let (width, height) = ::image::image_dimensions(&first)
            .map_err(|e| GlofError::decode(first.display().to_string(), e))?;

        log::debug!("Found {} frames of {}x{}", names.len(), width, height);
        Ok(Self {
            info: VideoInfo {
                fps,
                total_frames: names.len(),
                width: width as usize,
                height: height as usize,
            },
            frames: names.into_iter().map(|n| dir.join(n)).collect(),
        })
    }
}

impl FrameSource for ImageSequenceSource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Option<GlofResult<RgbImage>> {
        let path = self.frames.pop_front()?;
        Some(ImageLoader::load_rgb_from_path(&path))
    }
}

/// Image frames stored as entries of a zip archive
pub struct ZipFrameSource<R: Read + Seek> {
    archive: ZipArchive<R>,
    source_id: String,
    entries: VecDeque<String>,
    pending_first: Option<RgbImage>,
    info: VideoInfo,
}

impl ZipFrameSource<File> {
    pub fn open<P: AsRef<Path>>(zip_path: P, fps: Option<f64>) -> GlofResult<Self> {
        let zip_path = zip_path.as_ref();
        let source_id = zip_path.display().to_string();
        log::info!("Opening frame archive: {}", source_id);
        let file = File::open(zip_path).map_err(|e| GlofError::decode(&source_id, e))?;
        Self::from_reader(file, source_id, fps)
    }
}

impl ZipFrameSource<std::io::Cursor<Vec<u8>>> {
    pub fn from_bytes(bytes: Vec<u8>, fps: Option<f64>) -> GlofResult<Self> {
        Self::from_reader(std::io::Cursor::new(bytes), "<zip bytes>".to_string(), fps)
    }
}

impl<R: Read + Seek> ZipFrameSource<R> {
    fn from_reader(reader: R, source_id: String, fps: Option<f64>) -> GlofResult<Self> {
        let archive = ZipArchive::new(reader)
            .map_err(|e| GlofError::decode(&source_id, format!("Failed to open ZIP: {}", e)))?;

        let mut names: Vec<String> = archive
            .file_names()
            .filter(|n| !n.ends_with('/') && has_frame_extension(n))
            .map(str::to_string)
            .collect();
        if names.is_empty() {
            return Err(GlofError::decode(&source_id, "archive contains no image frames"));
        }
        sort_frame_names(&mut names)?;

        let mut source = Self {
            archive,
            source_id,
            entries: names.into_iter().collect(),
            pending_first: None,
            info: VideoInfo {
                fps,
                total_frames: 0,
                width: 0,
                height: 0,
            },
        };
        source.info.total_frames = source.entries.len();

        // Dimensions come from the first frame, which is kept for the first read
        let first = match source.read_next_entry() {
            Some(frame) => frame?,
            None => return Err(GlofError::decode(&source.source_id, "archive contains no image frames")),
        };
        let (height, width, _) = first.dim();
        source.info.width = width;
        source.info.height = height;
        source.pending_first = Some(first);

        log::debug!("Found {} frames of {}x{}", source.info.total_frames, width, height);
        Ok(source)
    }

    fn read_next_entry(&mut self) -> Option<GlofResult<RgbImage>> {
        let name = self.entries.pop_front()?;
        let entry_id = format!("{}:{}", self.source_id, name);

        let mut buffer = Vec::new();
        let read = self
            .archive
            .by_name(&name)
            .map_err(|e| GlofError::decode(&entry_id, format!("Failed to read ZIP entry: {}", e)))
            .and_then(|mut file| {
                file.read_to_end(&mut buffer)
                    .map_err(|e| GlofError::decode(&entry_id, e))
            });

        Some(read.and_then(|_| ImageLoader::decode_rgb(&buffer, &entry_id)))
    }
}

impl<R: Read + Seek> FrameSource for ZipFrameSource<R> {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Option<GlofResult<RgbImage>> {
        if let Some(first) = self.pending_first.take() {
            return Some(Ok(first));
        }
        self.read_next_entry()
    }
}

/// Frames already decoded in memory
pub struct MemoryFrameSource {
    frames: VecDeque<RgbImage>,
    info: VideoInfo,
}

impl MemoryFrameSource {
    pub fn new(frames: Vec<RgbImage>, fps: Option<f64>) -> GlofResult<Self> {
        let (height, width, _) = frames
            .first()
            .map(|f| f.dim())
            .ok_or_else(|| GlofError::decode("<memory>", "no frames supplied"))?;
        Ok(Self {
            info: VideoInfo {
                fps,
                total_frames: frames.len(),
                width,
                height,
            },
            frames: frames.into(),
        })
    }
}

impl FrameSource for MemoryFrameSource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Option<GlofResult<RgbImage>> {
        self.frames.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::image::encode_png;
    use ndarray::Array3;
    use std::io::Write;
    use zip::write::FileOptions;

    fn solid_frame(value: u8) -> RgbImage {
        Array3::from_elem((6, 8, 3), value)
    }

    #[test]
    fn test_frame_names_sorted_numerically() {
        let mut names = vec![
            "frame_10.png".to_string(),
            "frame_2.png".to_string(),
            "frame_1.png".to_string(),
        ];
        sort_frame_names(&mut names).unwrap();
        assert_eq!(names, vec!["frame_1.png", "frame_2.png", "frame_10.png"]);
    }

    #[test]
    fn test_missing_directory_fails() {
        let err = ImageSequenceSource::open("/nonexistent/frames", None).err().unwrap();
        assert!(matches!(err, GlofError::Decode { .. }));
    }

    #[test]
    fn test_directory_sequence() {
        let dir = tempfile::tempdir().unwrap();
        for (idx, value) in [(2, 20u8), (1, 10), (10, 100)] {
            let png = encode_png(&solid_frame(value)).unwrap();
            std::fs::write(dir.path().join(format!("f{}.png", idx)), png).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), Some(25.0)).unwrap();
        assert_eq!(source.info().total_frames, 3);
        assert_eq!((source.info().width, source.info().height), (8, 6));

        let order: Vec<u8> = std::iter::from_fn(|| source.next_frame())
            .map(|f| f.unwrap()[[0, 0, 0]])
            .collect();
        assert_eq!(order, vec![10, 20, 100]);
    }

    #[test]
    fn test_zip_sequence_with_corrupt_entry() {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = FileOptions::default();
        writer.start_file("000.png", options).unwrap();
        writer.write_all(&encode_png(&solid_frame(5)).unwrap()).unwrap();
        writer.start_file("001.png", options).unwrap();
        writer.write_all(b"broken").unwrap();
        writer.start_file("002.png", options).unwrap();
        writer.write_all(&encode_png(&solid_frame(7)).unwrap()).unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let mut source = ZipFrameSource::from_bytes(bytes, None).unwrap();
        assert_eq!(source.info().total_frames, 3);
        assert_eq!(source.next_frame().unwrap().unwrap()[[0, 0, 0]], 5);
        assert!(source.next_frame().unwrap().is_err());
        assert_eq!(source.next_frame().unwrap().unwrap()[[0, 0, 0]], 7);
        assert!(source.next_frame().is_none());
    }

    #[test]
    fn test_memory_source_requires_frames() {
        assert!(MemoryFrameSource::new(Vec::new(), None).is_err());
        let source = MemoryFrameSource::new(vec![solid_frame(1)], None).unwrap();
        assert_eq!(source.info().total_frames, 1);
    }
}
