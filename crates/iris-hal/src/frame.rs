//! Camera frame views and the owned image handed to the classifier.
//!
//! A [`FrameBuffer`] borrows pixel memory owned by the capture driver and is
//! only valid for the duration of one [`FrameSink::on_frame`][crate::FrameSink::on_frame]
//! call; the lifetime parameter keeps it from being retained.  Anything that
//! needs the pixels afterwards copies them into an [`ImageInput`].

use iris_types::DeviceError;
use serde::{Deserialize, Serialize};

/// Pixel layout of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 32-bit blue/green/red/alpha, the usual camera preview format.
    #[default]
    Bgra8,
    Rgb8,
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 => 4,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// Borrowed view of one decoded camera frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameBuffer<'a> {
    width: u32,
    height: u32,
    bytes_per_row: usize,
    format: PixelFormat,
    data: &'a [u8],
}

impl<'a> FrameBuffer<'a> {
    /// Wrap driver memory.  `bytes_per_row` may exceed the packed row width
    /// when the driver pads rows.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::HardwareFault`] when the geometry is empty or
    /// `data` is too short for it.
    pub fn new(
        width: u32,
        height: u32,
        bytes_per_row: usize,
        format: PixelFormat,
        data: &'a [u8],
    ) -> Result<Self, DeviceError> {
        if width == 0 || height == 0 {
            return Err(malformed(format!("empty frame {width}x{height}")));
        }
        let packed = (width as usize)
            .checked_mul(format.bytes_per_pixel())
            .ok_or_else(|| malformed(format!("row of {width} pixels overflows")))?;
        if bytes_per_row < packed {
            return Err(malformed(format!(
                "row stride {bytes_per_row} shorter than {packed} pixel bytes"
            )));
        }
        let required = bytes_per_row
            .checked_mul(height as usize - 1)
            .and_then(|rows| rows.checked_add(packed))
            .ok_or_else(|| {
                malformed(format!(
                    "{height} rows of stride {bytes_per_row} overflow the address space"
                ))
            })?;
        if data.len() < required {
            return Err(malformed(format!(
                "buffer holds {} bytes, frame needs {required}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            bytes_per_row,
            format,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Pixel bytes of row `y`, stride padding excluded.
    ///
    /// # Panics
    ///
    /// Panics if `y >= height`.
    pub fn row(&self, y: u32) -> &'a [u8] {
        assert!(y < self.height, "row {y} out of bounds");
        let start = y as usize * self.bytes_per_row;
        &self.data[start..start + self.width as usize * self.format.bytes_per_pixel()]
    }
}

fn malformed(details: String) -> DeviceError {
    DeviceError::HardwareFault {
        component: "frame_buffer".to_string(),
        details,
    }
}

/// Owned, tightly packed image submitted to a [`Classifier`][crate::Classifier].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Vec<u8>,
}

impl ImageInput {
    /// Copy `frame` out of driver memory.
    ///
    /// With `center_crop` the copy is restricted to the largest centred
    /// square, which is what square-input classifiers expect.
    pub fn from_frame(frame: &FrameBuffer<'_>, center_crop: bool) -> Self {
        let (x0, y0, width, height) = if center_crop {
            let side = frame.width.min(frame.height);
            ((frame.width - side) / 2, (frame.height - side) / 2, side, side)
        } else {
            (0, 0, frame.width, frame.height)
        };

        let bpp = frame.format.bytes_per_pixel();
        let start = x0 as usize * bpp;
        let end = start + width as usize * bpp;
        let mut pixels = Vec::with_capacity(end.saturating_sub(start) * height as usize);
        for y in y0..y0 + height {
            pixels.extend_from_slice(&frame.row(y)[start..end]);
        }

        Self {
            width,
            height,
            format: frame.format,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}
