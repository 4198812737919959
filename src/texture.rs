// Texture decoding - PNG to tightly packed RGBA8

use anyhow::{Context, Result};
use std::path::Path;

/// Decoded pixels ready for a staging buffer
#[derive(Debug, Clone)]
pub struct TextureData {
    /// RGBA8, row-major, no padding
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl TextureData {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Loading texture from {:?}", path);

        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read texture {:?}", path))?;
        let texture =
            Self::from_bytes(&bytes).with_context(|| format!("Failed to load texture {:?}", path))?;

        log::info!(
            "Loaded texture {}x{} ({} bytes) from {:?}",
            texture.width,
            texture.height,
            texture.size_bytes(),
            path
        );
        Ok(texture)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("Failed to decode texture bytes")?;
        Self::from_rgba(image.to_rgba8())
    }

    fn from_rgba(image: image::RgbaImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            anyhow::bail!("Texture has zero size ({}x{})", width, height);
        }
        Ok(Self {
            pixels: image.into_raw(),
            width,
            height,
        })
    }

    pub fn size_bytes(&self) -> usize {
        self.pixels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn encode_png(image: image::DynamicImage) -> Vec<u8> {
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn decodes_png_to_rgba() {
        let mut source = RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 255]));
        source.put_pixel(2, 1, Rgba([200, 100, 50, 128]));

        let texture = TextureData::from_bytes(&encode_png(source.into())).unwrap();

        assert_eq!((texture.width, texture.height), (3, 2));
        assert_eq!(texture.size_bytes(), 3 * 2 * 4);
        assert_eq!(&texture.pixels[0..4], &[10, 20, 30, 255]);
        assert_eq!(&texture.pixels[20..24], &[200, 100, 50, 128]);
    }

    #[test]
    fn rgb_input_gains_opaque_alpha() {
        let source = RgbImage::from_pixel(2, 2, Rgb([1, 2, 3]));
        let texture = TextureData::from_bytes(&encode_png(source.into())).unwrap();
        assert_eq!(&texture.pixels[0..4], &[1, 2, 3, 255]);
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        assert!(TextureData::from_bytes(b"definitely not a png").is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(TextureData::from_file("does/not/exist.png").is_err());
    }
}
