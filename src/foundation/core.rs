use crate::foundation::error::{WiggleError, WiggleResult};

/// Absolute 0-based frame index in export timeline space.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

/// Straight-alpha RGBA8 color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Rgba8 {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
    /// Alpha channel.
    pub a: u8,
}

impl Rgba8 {
    /// Fully transparent black.
    pub const TRANSPARENT: Self = Self {
        r: 0,
        g: 0,
        b: 0,
        a: 0,
    };

    /// Fully opaque white.
    pub const WHITE: Self = Self {
        r: 255,
        g: 255,
        b: 255,
        a: 255,
    };
}

/// A decoded source bitmap: straight-alpha RGBA8, tightly packed, row-major.
///
/// This is the only input value type the engine accepts. Decoding (and any
/// vector rasterization) happens upstream; the engine never sees file formats.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Bitmap {
    /// Create a bitmap from raw RGBA8 bytes, validating the buffer length.
    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>) -> WiggleResult<Self> {
        if width == 0 || height == 0 {
            return Err(WiggleError::validation("bitmap dimensions must be non-zero"));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(4))
            .ok_or_else(|| WiggleError::validation("bitmap size overflows"))?;
        if data.len() != expected {
            return Err(WiggleError::validation(format!(
                "bitmap data length {} does not match {}x{}x4",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A `width` x `height` bitmap filled with one color. Mostly for tests.
    pub fn solid(width: u32, height: u32, color: Rgba8) -> WiggleResult<Self> {
        let px = [color.r, color.g, color.b, color.a];
        let count = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| WiggleError::validation("bitmap size overflows"))?;
        Self::from_rgba8(width, height, px.repeat(count))
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// RGBA8 bytes, tightly packed, row-major.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// A rendered output frame: straight-alpha RGBA8 pixels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRGBA {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// RGBA8 bytes, tightly packed, row-major.
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_rejects_mismatched_buffer() {
        assert!(Bitmap::from_rgba8(2, 2, vec![0u8; 15]).is_err());
        assert!(Bitmap::from_rgba8(2, 2, vec![0u8; 16]).is_ok());
    }

    #[test]
    fn bitmap_rejects_zero_dimensions() {
        assert!(Bitmap::from_rgba8(0, 4, Vec::new()).is_err());
        assert!(Bitmap::from_rgba8(4, 0, Vec::new()).is_err());
    }

    #[test]
    fn solid_fills_every_pixel() {
        let bmp = Bitmap::solid(3, 2, Rgba8::WHITE).unwrap();
        assert_eq!(bmp.data().len(), 3 * 2 * 4);
        assert!(bmp.data().iter().all(|&b| b == 255));
    }
}
