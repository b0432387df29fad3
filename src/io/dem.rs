use crate::types::{FloatGrid, GeoTransform, GlofError, GlofResult, RasterMetadata};
use ndarray::Array2;
use std::io::{Cursor, Read};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

/// SRTM void marker
pub const SRTM_NO_DATA: f64 = -32768.0;

/// Side lengths of published SRTM tiles (3 and 1 arc-second)
const SRTM_TILE_SIDES: [usize; 2] = [1201, 3601];

// GeoTIFF / GDAL private tags
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GDAL_NODATA: u16 = 42113;

/// Elevation raster with missing cells already set to NaN
#[derive(Debug, Clone)]
pub struct ElevationGrid {
    pub data: FloatGrid,
    pub metadata: RasterMetadata,
    pub source_id: String,
}

impl ElevationGrid {
    /// Wrap an in-memory grid, masking `no_data` cells
    pub fn from_array(mut data: FloatGrid, no_data: Option<f64>, source_id: impl Into<String>) -> Self {
        mask_no_data(&mut data, no_data);
        Self {
            data,
            metadata: RasterMetadata {
                pixel_resolution: None,
                no_data,
                geo_transform: None,
            },
            source_id: source_id.into(),
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }
}

/// Digital Elevation Model reader
pub struct DemReader;

impl DemReader {
    /// Read a DEM from disk.
    ///
    /// GeoTIFF and SRTM `.hgt` (optionally gzip-compressed) are decoded natively;
    /// other formats need the `gdal` feature. `no_data` overrides the sentinel
    /// stored in the file.
    pub fn read_dem<P: AsRef<Path>>(dem_path: P, no_data: Option<f64>) -> GlofResult<ElevationGrid> {
        let path = dem_path.as_ref();
        log::info!("Reading DEM from: {}", path.display());
        let source_id = path.display().to_string();

        let bytes = std::fs::read(path)?;
        let is_hgt = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| {
                let lower = n.to_ascii_lowercase();
                lower.ends_with(".hgt") || lower.ends_with(".hgt.gz")
            })
            .unwrap_or(false);

        match Self::decode(&bytes, &source_id, no_data, is_hgt) {
            Err(GlofError::Unavailable(reason)) => Self::read_with_gdal(path, no_data, reason),
            other => other,
        }
    }

    /// Read a DEM from an in-memory buffer.
    ///
    /// Headerless buffers are only taken as SRTM tiles at the published tile
    /// sizes; use [`read_hgt_bytes`](Self::read_hgt_bytes) for other grids.
    pub fn read_dem_bytes(bytes: &[u8], no_data: Option<f64>) -> GlofResult<ElevationGrid> {
        Self::decode(bytes, "<bytes>", no_data, false)
    }

    /// Read a buffer known to hold a (possibly gzipped) `.hgt` grid of any square size
    pub fn read_hgt_bytes(bytes: &[u8], no_data: Option<f64>) -> GlofResult<ElevationGrid> {
        Self::decode(bytes, "<hgt bytes>", no_data, true)
    }

    fn decode(bytes: &[u8], source_id: &str, no_data: Option<f64>, hgt_hint: bool) -> GlofResult<ElevationGrid> {
        if bytes.is_empty() {
            return Err(GlofError::decode(source_id, "empty DEM file"));
        }

        if Self::is_gzip_content(bytes) {
            let decompressed = Self::decompress_gzip(bytes, source_id)?;
            return Self::decode(&decompressed, source_id, no_data, hgt_hint);
        }

        if Self::is_tiff_content(bytes) {
            return Self::decode_geotiff(bytes, source_id, no_data);
        }

        if hgt_hint || Self::is_srtm_tile(bytes.len()) {
            return Self::decode_hgt(bytes, source_id, no_data);
        }

        Err(GlofError::Unavailable(format!(
            "no native decoder for the raster format of {}",
            source_id
        )))
    }

    /// Check if content is gzip format by examining magic bytes
    fn is_gzip_content(content: &[u8]) -> bool {
        content.len() >= 2 && content[0] == 0x1F && content[1] == 0x8B
    }

    /// Little- or big-endian TIFF header
    fn is_tiff_content(content: &[u8]) -> bool {
        content.len() >= 4 && (content[0..4] == [0x49, 0x49, 0x2A, 0x00] || content[0..4] == [0x4D, 0x4D, 0x00, 0x2A])
    }

    fn decompress_gzip(gzip_data: &[u8], source_id: &str) -> GlofResult<Vec<u8>> {
        use flate2::read::GzDecoder;

        log::debug!("Decompressing gzipped DEM");
        let mut decoder = GzDecoder::new(gzip_data);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| GlofError::decode(source_id, format!("failed to decompress gzip data: {}", e)))?;

        if decompressed.is_empty() {
            return Err(GlofError::decode(source_id, "decompressed DEM is empty"));
        }
        log::debug!("Decompressed {} bytes", decompressed.len());
        Ok(decompressed)
    }

    fn is_srtm_tile(len: usize) -> bool {
        SRTM_TILE_SIDES.iter().any(|side| side * side * 2 == len)
    }

    /// Side length of a square i16 tile of `len` bytes, if any
    fn hgt_side(len: usize) -> Option<usize> {
        if len < 8 || len % 2 != 0 {
            return None;
        }
        let samples = len / 2;
        let side = (samples as f64).sqrt().round() as usize;
        (side * side == samples).then_some(side)
    }

    /// SRTM tile: square grid of big-endian i16, row-major from the north-west corner
    fn decode_hgt(bytes: &[u8], source_id: &str, no_data: Option<f64>) -> GlofResult<ElevationGrid> {
        let side = Self::hgt_side(bytes.len())
            .ok_or_else(|| GlofError::decode(source_id, format!("{} bytes is not a square SRTM tile", bytes.len())))?;
        log::debug!("SRTM tile size: {}x{}", side, side);

        let values: Vec<f64> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_be_bytes([pair[0], pair[1]]) as f64)
            .collect();
        let mut data = Array2::from_shape_vec((side, side), values)
            .map_err(|e| GlofError::Processing(format!("Failed to reshape DEM data: {}", e)))?;

        let sentinel = no_data.unwrap_or(SRTM_NO_DATA);
        mask_no_data(&mut data, Some(sentinel));

        Ok(ElevationGrid {
            data,
            metadata: RasterMetadata {
                pixel_resolution: None,
                no_data: Some(sentinel),
                geo_transform: None,
            },
            source_id: source_id.to_string(),
        })
    }

    fn decode_geotiff(bytes: &[u8], source_id: &str, no_data: Option<f64>) -> GlofResult<ElevationGrid> {
        let mut decoder = Decoder::new(Cursor::new(bytes))
            .map_err(|e| GlofError::decode(source_id, format!("TIFF decode error: {}", e)))?;

        let (width, height) = decoder
            .dimensions()
            .map_err(|e| GlofError::decode(source_id, format!("cannot read dimensions: {}", e)))?;
        let (rows, cols) = (height as usize, width as usize);
        log::debug!("DEM size: {}x{}", cols, rows);

        let file_no_data = decoder
            .get_tag_ascii_string(Tag::Unknown(TAG_GDAL_NODATA))
            .ok()
            .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f64>().ok());
        let geo_transform = read_geotransform(&mut decoder);

        let result = decoder
            .read_image()
            .map_err(|e| GlofError::decode(source_id, format!("cannot read image data: {}", e)))?;

        let values: Vec<f64> = match result {
            DecodingResult::U8(buf) => buf.into_iter().map(f64::from).collect(),
            DecodingResult::U16(buf) => buf.into_iter().map(f64::from).collect(),
            DecodingResult::U32(buf) => buf.into_iter().map(f64::from).collect(),
            DecodingResult::I8(buf) => buf.into_iter().map(f64::from).collect(),
            DecodingResult::I16(buf) => buf.into_iter().map(f64::from).collect(),
            DecodingResult::I32(buf) => buf.into_iter().map(f64::from).collect(),
            DecodingResult::F32(buf) => buf.into_iter().map(f64::from).collect(),
            DecodingResult::F64(buf) => buf,
            _ => return Err(GlofError::decode(source_id, "unsupported TIFF sample format")),
        };

        // Multi-band rasters are interleaved; band 1 is every n-th sample
        let samples_per_pixel = values.len() / (rows * cols).max(1);
        if samples_per_pixel == 0 || values.len() != rows * cols * samples_per_pixel {
            return Err(GlofError::decode(
                source_id,
                format!("{} samples do not fill a {}x{} grid", values.len(), rows, cols),
            ));
        }
        let band: Vec<f64> = values.into_iter().step_by(samples_per_pixel).collect();

        let mut data = Array2::from_shape_vec((rows, cols), band)
            .map_err(|e| GlofError::Processing(format!("Failed to reshape DEM data: {}", e)))?;

        let sentinel = no_data.or(file_no_data);
        mask_no_data(&mut data, sentinel);

        Ok(ElevationGrid {
            data,
            metadata: RasterMetadata {
                pixel_resolution: geo_transform.map(|gt| gt.pixel_width.abs()),
                no_data: sentinel,
                geo_transform,
            },
            source_id: source_id.to_string(),
        })
    }

    #[cfg(feature = "gdal")]
    fn read_with_gdal(path: &Path, no_data: Option<f64>, _native_reason: String) -> GlofResult<ElevationGrid> {
        use gdal::Dataset;

        log::debug!("Falling back to GDAL for {}", path.display());
        let dataset = Dataset::open(path)?;
        let geo_transform = GeoTransform::from_gdal(dataset.geo_transform()?);
        let (width, height) = dataset.raster_size();

        let rasterband = dataset.rasterband(1)?;
        let sentinel = no_data.or_else(|| rasterband.no_data_value());
        let band_data = rasterband.read_as::<f64>((0, 0), (width, height), (width, height), None)?;

        let mut data = Array2::from_shape_vec((height, width), band_data.data)
            .map_err(|e| GlofError::Processing(format!("Failed to reshape DEM data: {}", e)))?;
        mask_no_data(&mut data, sentinel);

        Ok(ElevationGrid {
            data,
            metadata: RasterMetadata {
                pixel_resolution: Some(geo_transform.pixel_width.abs()),
                no_data: sentinel,
                geo_transform: Some(geo_transform),
            },
            source_id: path.display().to_string(),
        })
    }

    #[cfg(not(feature = "gdal"))]
    fn read_with_gdal(path: &Path, _no_data: Option<f64>, native_reason: String) -> GlofResult<ElevationGrid> {
        log::warn!("{} needs GDAL support, which is not compiled in", path.display());
        Err(GlofError::Unavailable(format!(
            "{} (rebuild with the `gdal` feature for other raster formats)",
            native_reason
        )))
    }
}

/// Replace cells equal to `no_data` with NaN
pub fn mask_no_data(data: &mut FloatGrid, no_data: Option<f64>) {
    if let Some(sentinel) = no_data {
        if sentinel.is_nan() {
            return;
        }
        let mut masked = 0usize;
        data.mapv_inplace(|v| {
            if v == sentinel {
                masked += 1;
                f64::NAN
            } else {
                v
            }
        });
        if masked > 0 {
            log::debug!("Masked {} no-data cells (sentinel {})", masked, sentinel);
        }
    }
}

/// Pixel scale + tiepoint to an affine transform, when both tags are present
fn read_geotransform<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let scale = decoder.get_tag_f64_vec(Tag::Unknown(TAG_MODEL_PIXEL_SCALE)).ok()?;
    let tiepoint = decoder.get_tag_f64_vec(Tag::Unknown(TAG_MODEL_TIEPOINT)).ok()?;

    if scale.len() >= 2 && tiepoint.len() >= 6 {
        Some(GeoTransform {
            top_left_x: tiepoint[3] - tiepoint[0] * scale[0],
            pixel_width: scale[0],
            rotation_x: 0.0,
            top_left_y: tiepoint[4] + tiepoint[1] * scale[1],
            rotation_y: 0.0,
            pixel_height: -scale[1],
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn hgt_bytes(side: usize, value: impl Fn(usize, usize) -> i16) -> Vec<u8> {
        let mut out = Vec::with_capacity(side * side * 2);
        for i in 0..side {
            for j in 0..side {
                out.extend_from_slice(&value(i, j).to_be_bytes());
            }
        }
        out
    }

    #[test]
    fn test_hgt_decoding_masks_voids() {
        let bytes = hgt_bytes(4, |i, j| if i == 0 && j == 0 { -32768 } else { (i * 10 + j) as i16 });
        let grid = DemReader::read_hgt_bytes(&bytes, None).unwrap();
        assert_eq!(grid.dim(), (4, 4));
        assert!(grid.data[[0, 0]].is_nan());
        assert_eq!(grid.data[[2, 3]], 23.0);
        assert_eq!(grid.metadata.no_data, Some(SRTM_NO_DATA));
    }

    #[test]
    fn test_gzipped_hgt() {
        let raw = hgt_bytes(3, |_, _| 1500);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        let gz = encoder.finish().unwrap();

        let grid = DemReader::read_hgt_bytes(&gz, None).unwrap();
        assert_eq!(grid.dim(), (3, 3));
        assert!(grid.data.iter().all(|&v| v == 1500.0));
    }

    #[test]
    fn test_headerless_bytes_need_srtm_tile_size() {
        // 32 bytes would be a 4x4 grid, but no SRTM tile is that small
        let err = DemReader::read_dem_bytes(b"this is a corrupted upload file.", None).unwrap_err();
        assert!(matches!(err, GlofError::Unavailable(_)));

        let tile = hgt_bytes(1201, |i, _| i as i16);
        let grid = DemReader::read_dem_bytes(&tile, None).unwrap();
        assert_eq!(grid.dim(), (1201, 1201));
        assert_eq!(grid.data[[1200, 0]], 1200.0);
    }

    #[test]
    fn test_unknown_format_is_unavailable() {
        let err = DemReader::read_dem_bytes(b"ncols 3\nnrows 3\n", None).unwrap_err();
        assert!(matches!(err, GlofError::Unavailable(_)));
    }

    #[test]
    fn test_corrupt_tiff_is_decode_error() {
        let err = DemReader::read_dem_bytes(&[0x49, 0x49, 0x2A, 0x00, 0xFF, 0xFF], None).unwrap_err();
        assert!(matches!(err, GlofError::Decode { .. }));
    }

    #[test]
    fn test_from_array_masks_sentinel() {
        let grid = ElevationGrid::from_array(
            Array2::from_shape_vec((1, 3), vec![1.0, -9999.0, 3.0]).unwrap(),
            Some(-9999.0),
            "memory",
        );
        assert!(grid.data[[0, 1]].is_nan());
        assert_eq!(grid.data[[0, 2]], 3.0);
    }
}
