//! RGB frame type shared by sensor sessions and capture workers.

use crate::settings::Rect;

/// An 8-bit interleaved RGB image.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    /// Interleaved RGB bytes, row-major.
    pixels: Vec<u8>,
    /// Frame width in pixels.
    width: u32,
    /// Frame height in pixels.
    height: u32,
}

/// Mean intensity of each colour channel over a region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelMeans {
    /// Mean of the red channel.
    pub red: f64,
    /// Mean of the green channel.
    pub green: f64,
    /// Mean of the blue channel.
    pub blue: f64,
}

impl Frame {
    /// Number of bytes per pixel.
    pub const CHANNELS: usize = 3;

    /// Creates a frame from interleaved RGB bytes.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            pixels,
            width,
            height,
        }
    }

    /// Creates a frame where every pixel has the same colour.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let count = (width as usize) * (height as usize);
        let pixels = rgb.iter().copied().cycle().take(count * Self::CHANNELS).collect();
        Self::new(pixels, width, height)
    }

    /// Returns a reference to the raw pixel data.
    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Consumes the frame and returns its pixel buffer.
    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Returns the frame width.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the frame height.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the total number of pixels (width * height).
    #[inline]
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Validates that the pixel buffer size matches dimensions.
    pub fn is_valid(&self) -> bool {
        self.pixels.len() == self.pixel_count() * Self::CHANNELS
    }

    /// Per-channel means over `region`, or `None` if the region does not fit.
    pub fn channel_means(&self, region: &Rect) -> Option<ChannelMeans> {
        if !self.is_valid()
            || region.width() == 0
            || region.height() == 0
            || region.x_max > self.width
            || region.y_max > self.height
        {
            return None;
        }

        let mut sums = [0u64; 3];
        let row_stride = self.width as usize * Self::CHANNELS;
        for y in region.y_min..region.y_max {
            let start = y as usize * row_stride + region.x_min as usize * Self::CHANNELS;
            let end = y as usize * row_stride + region.x_max as usize * Self::CHANNELS;
            for px in self.pixels[start..end].chunks_exact(Self::CHANNELS) {
                sums[0] += u64::from(px[0]);
                sums[1] += u64::from(px[1]);
                sums[2] += u64::from(px[2]);
            }
        }

        let n = (region.width() as f64) * (region.height() as f64);
        Some(ChannelMeans {
            red: sums[0] as f64 / n,
            green: sums[1] as f64 / n,
            blue: sums[2] as f64 / n,
        })
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pixel_bytes", &self.pixels.len())
            .finish()
    }
}
