//! Crop rectangles in output-local pixel coordinates.
//!
//! A [`CropRect`] names the sub-region of a duplicated output that the
//! materializer extracts instead of the full frame. Coordinates are
//! relative to the output's top-left corner, not the virtual desktop.

use crate::error::{CaptureError, CaptureResult};
use crate::frame::FrameDescriptor;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> CaptureResult<Self> {
        if width == 0 || height == 0 {
            return Err(CaptureError::InvalidConfig(
                "crop width and height must be > 0".into(),
            ));
        }
        x.checked_add(width)
            .and(y.checked_add(height))
            .ok_or(CaptureError::BufferOverflow)?;
        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }

    /// Build a crop from `left/top/right/bottom` edges, right and bottom
    /// exclusive, the way platform `RECT`s describe regions.
    pub fn from_edges(left: u32, top: u32, right: u32, bottom: u32) -> CaptureResult<Self> {
        if right <= left || bottom <= top {
            return Err(CaptureError::InvalidConfig(format!(
                "crop edges are inverted or empty: left={left} top={top} right={right} bottom={bottom}"
            )));
        }
        Self::new(left, top, right - left, bottom - top)
    }

    /// The crop covering a whole `width x height` frame.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Right edge (exclusive).
    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// Bottom edge (exclusive).
    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Fail with `InvalidConfig` unless the crop lies entirely inside the
    /// frame described by `desc`.
    pub fn validate_within(&self, desc: &FrameDescriptor) -> CaptureResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::InvalidConfig(
                "crop width and height must be > 0".into(),
            ));
        }
        if self.right() > desc.width || self.bottom() > desc.height {
            return Err(CaptureError::InvalidConfig(format!(
                "crop {}x{}+{}+{} exceeds frame bounds {}x{}",
                self.width, self.height, self.x, self.y, desc.width, desc.height
            )));
        }
        Ok(())
    }
}
