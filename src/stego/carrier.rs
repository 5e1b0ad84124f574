//! Lossless carrier images.

use std::io::Cursor;
use std::path::Path;

use image::{ColorType, DynamicImage, ExtendedColorType, ImageDecoder, ImageFormat, ImageReader};
use tracing::debug;

use crate::error::StegoError;
use crate::storage::Storage;

/// A decoded 8-bit raster whose color samples can hold hidden bits.
///
/// Samples are addressed in row-major pixel order and, within a pixel, in
/// channel order (R, G, B or L). Alpha is never addressed.
#[derive(Debug, Clone)]
pub struct Carrier {
    width: u32,
    height: u32,
    color: ColorType,
    format: ImageFormat,
    pixels: Vec<u8>,
}

impl Carrier {
    /// Decodes the image at `path`.
    pub fn open(path: &Path) -> Result<Self, StegoError> {
        let storage = Storage::new(path);
        if !storage.exists() {
            return Err(StegoError::Input(format!(
                "carrier image {} does not exist",
                path.display()
            )));
        }
        let bytes = storage
            .load()
            .map_err(|e| StegoError::Input(format!("cannot read {}: {e}", path.display())))?;
        Self::load(&bytes)
    }

    /// Decodes an encoded image, guessing its format from the content.
    ///
    /// Only images stored as 8-bit samples are accepted: palette and
    /// sub-byte images would be written back expanded, changing their
    /// color type and bit depth.
    pub fn load(bytes: &[u8]) -> Result<Self, StegoError> {
        let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
        let format = match reader.format() {
            Some(f @ (ImageFormat::Png | ImageFormat::Bmp)) => f,
            Some(other) => {
                return Err(StegoError::Input(format!(
                    "{other:?} is not a supported lossless carrier format (use PNG or BMP)"
                )));
            }
            None => return Err(StegoError::Input("unrecognized image format".into())),
        };

        let decoder = reader
            .into_decoder()
            .map_err(|e| StegoError::Input(format!("cannot decode carrier image: {e}")))?;
        let stored = decoder.original_color_type();
        let image = DynamicImage::from_decoder(decoder)
            .map_err(|e| StegoError::Input(format!("cannot decode carrier image: {e}")))?;

        let lossless = match format {
            ImageFormat::Bmp => matches!(
                (bmp_bit_count(bytes), image.color()),
                (Some(24), ColorType::Rgb8) | (Some(32), ColorType::Rgba8)
            ),
            _ => stored == ExtendedColorType::from(image.color()),
        };
        if !lossless {
            return Err(StegoError::Input(format!(
                "carrier is stored as {stored:?}; only 8-bit grey or RGB samples can be \
                 rewritten unchanged"
            )));
        }
        Self::from_image(image, format)
    }

    /// Wraps an already decoded image that will be written back as `format`.
    pub fn from_image(image: DynamicImage, format: ImageFormat) -> Result<Self, StegoError> {
        let color = image.color();
        if !matches!(
            color,
            ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8
        ) {
            return Err(StegoError::Input(format!(
                "unsupported carrier color type {color:?} (8-bit grey or RGB expected)"
            )));
        }
        match (format, color) {
            (ImageFormat::Png, _) => {}
            (ImageFormat::Bmp, ColorType::Rgb8 | ColorType::Rgba8) => {}
            (ImageFormat::Bmp, _) => {
                return Err(StegoError::Input(format!(
                    "{color:?} cannot be written to BMP without a palette"
                )));
            }
            _ => {
                return Err(StegoError::Input(format!(
                    "{format:?} is not a supported lossless carrier format"
                )));
            }
        }

        Ok(Self {
            width: image.width(),
            height: image.height(),
            color,
            format,
            pixels: image.into_bytes(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn color(&self) -> ColorType {
        self.color
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Raw interleaved pixel bytes, alpha included.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    fn color_channels(&self) -> usize {
        let channels = self.color.channel_count() as usize;
        if self.color.has_alpha() { channels - 1 } else { channels }
    }

    /// Number of color samples, i.e. the capacity in hidden bits.
    pub fn sample_count(&self) -> usize {
        self.width as usize * self.height as usize * self.color_channels()
    }

    fn offset(&self, sample: usize) -> usize {
        let colors = self.color_channels();
        let bpp = self.color.bytes_per_pixel() as usize;
        (sample / colors) * bpp + sample % colors
    }

    pub fn sample(&self, index: usize) -> u8 {
        self.pixels[self.offset(index)]
    }

    /// Overwrites the least significant bit of one color sample.
    pub fn set_lsb(&mut self, index: usize, bit: u8) {
        let offset = self.offset(index);
        self.pixels[offset] = (self.pixels[offset] & 0xFE) | (bit & 1);
    }

    /// Encodes the image in its original format and color type.
    pub fn encode(&self) -> Result<Vec<u8>, StegoError> {
        let mut out = Cursor::new(Vec::new());
        image::write_buffer_with_format(
            &mut out,
            &self.pixels,
            self.width,
            self.height,
            self.color,
            self.format,
        )?;
        Ok(out.into_inner())
    }

    /// Replaces the file at `path` with this image, atomically.
    pub fn save(&self, path: &Path) -> Result<(), StegoError> {
        let encoded = self.encode()?;
        Storage::new(path).save(&encoded)?;
        debug!(path = %path.display(), bytes = encoded.len(), "carrier image written");
        Ok(())
    }
}

/// Bits per pixel from a BMP header, for the header layouts `image` reads.
fn bmp_bit_count(bytes: &[u8]) -> Option<u16> {
    let header_len = u32::from_le_bytes(bytes.get(14..18)?.try_into().ok()?);
    let at = if header_len == 12 { 24 } else { 28 };
    Some(u16::from_le_bytes(bytes.get(at..at + 2)?.try_into().ok()?))
}
