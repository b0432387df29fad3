use crate::types::{GlofError, GlofResult, GrayImage, RgbImage};
use ndarray::{Array2, Array3};
use std::path::Path;

/// Identifier used in errors when decoding from memory
const BYTES_SOURCE: &str = "<bytes>";

/// Decodes encoded images (PNG, JPEG, BMP, TIFF) into arrays
pub struct ImageLoader;

impl ImageLoader {
    /// Decode an RGB image from a file
    pub fn load_rgb_from_path<P: AsRef<Path>>(path: P) -> GlofResult<RgbImage> {
        let path = path.as_ref();
        log::debug!("Reading image: {}", path.display());
        let source_id = path.display().to_string();
        let bytes = std::fs::read(path).map_err(|e| GlofError::decode(&source_id, e))?;
        Self::decode_rgb(&bytes, &source_id)
    }

    /// Decode an RGB image from encoded bytes
    pub fn load_rgb_from_bytes(bytes: &[u8]) -> GlofResult<RgbImage> {
        Self::decode_rgb(bytes, BYTES_SOURCE)
    }

    /// Decode a grayscale image from a file
    pub fn load_gray_from_path<P: AsRef<Path>>(path: P) -> GlofResult<GrayImage> {
        Ok(rgb_to_gray(&Self::load_rgb_from_path(path)?))
    }

    /// Decode a grayscale image from encoded bytes
    pub fn load_gray_from_bytes(bytes: &[u8]) -> GlofResult<GrayImage> {
        Ok(rgb_to_gray(&Self::load_rgb_from_bytes(bytes)?))
    }

    pub(crate) fn decode_rgb(bytes: &[u8], source_id: &str) -> GlofResult<RgbImage> {
        if bytes.is_empty() {
            return Err(GlofError::decode(source_id, "empty input"));
        }

        let decoded = ::image::load_from_memory(bytes)
            .map_err(|e| GlofError::decode(source_id, e))?
            .to_rgb8();

        let (width, height) = decoded.dimensions();
        if width == 0 || height == 0 {
            return Err(GlofError::decode(source_id, "image has no pixels"));
        }

        Array3::from_shape_vec((height as usize, width as usize, 3), decoded.into_raw())
            .map_err(|e| GlofError::decode(source_id, format!("unexpected buffer shape: {}", e)))
    }
}

/// Luma conversion `round(0.299 R + 0.587 G + 0.114 B)`
pub fn rgb_to_gray(rgb: &RgbImage) -> GrayImage {
    let (rows, cols, _) = rgb.dim();
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        let r = rgb[[i, j, 0]] as f64;
        let g = rgb[[i, j, 1]] as f64;
        let b = rgb[[i, j, 2]] as f64;
        (0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8
    })
}

/// Expand a gray image into three identical channels
pub fn gray_to_rgb(gray: &GrayImage) -> RgbImage {
    let (rows, cols) = gray.dim();
    Array3::from_shape_fn((rows, cols, 3), |(i, j, _)| gray[[i, j]])
}

/// Encode an RGB array as PNG; used to build fixtures and frame archives
pub fn encode_png(rgb: &RgbImage) -> GlofResult<Vec<u8>> {
    let (rows, cols, _) = rgb.dim();
    let raw: Vec<u8> = rgb.iter().copied().collect();
    let buffer = ::image::RgbImage::from_raw(cols as u32, rows as u32, raw)
        .ok_or_else(|| GlofError::Processing("RGB buffer does not match its dimensions".to_string()))?;

    let mut out = std::io::Cursor::new(Vec::new());
    buffer
        .write_to(&mut out, ::image::ImageFormat::Png)
        .map_err(|e| GlofError::Processing(format!("PNG encoding failed: {}", e)))?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gray_conversion_weights() {
        let mut rgb = Array3::<u8>::zeros((1, 3, 3));
        rgb[[0, 0, 0]] = 255;
        rgb[[0, 1, 1]] = 255;
        rgb[[0, 2, 2]] = 255;
        let gray = rgb_to_gray(&rgb);
        assert_eq!(gray[[0, 0]], 76);
        assert_eq!(gray[[0, 1]], 150);
        assert_eq!(gray[[0, 2]], 29);
    }

    #[test]
    fn test_png_roundtrip_through_loader() {
        let gray = Array2::from_shape_fn((4, 5), |(i, j)| (i * 40 + j * 10) as u8);
        let png = encode_png(&gray_to_rgb(&gray)).unwrap();
        let decoded = ImageLoader::load_gray_from_bytes(&png).unwrap();
        assert_eq!(decoded, gray);
    }

    #[test]
    fn test_garbage_bytes_are_decode_errors() {
        let err = ImageLoader::load_gray_from_bytes(b"definitely not an image").unwrap_err();
        assert!(matches!(err, GlofError::Decode { .. }));

        let err = ImageLoader::load_rgb_from_path("/nonexistent/frame.png").unwrap_err();
        match err {
            GlofError::Decode { source_id, .. } => assert!(source_id.contains("frame.png")),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
