use std::sync::Arc;

use crate::error::CaptureResult;
use crate::frame::{FrameDescriptor, FrameInfo, OutputRotation, PixelFormat};

/// A CPU-readable view of the acquired desktop image, valid only while the
/// platform keeps the staging resource mapped.
///
/// `row_pitch` is the platform's pitch and may exceed `width * 4` because
/// of alignment padding.
#[derive(Clone, Copy, Debug)]
pub struct MappedSurface<'a> {
    pub data: &'a [u8],
    pub row_pitch: usize,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl<'a> MappedSurface<'a> {
    pub fn new(
        data: &'a [u8],
        row_pitch: usize,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Self {
        Self {
            data,
            row_pitch,
            width,
            height,
            format,
        }
    }
}

/// Raw result of one acquire call against a duplication output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireStatus {
    /// A frame is held by the caller and must be released.
    Ready(FrameInfo),
    /// Nothing changed on the desktop within the timeout.
    WaitTimeout,
    /// The duplication handle is no longer valid.
    AccessLost,
}

/// Output bounds in virtual desktop coordinates, right/bottom exclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DesktopBounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl DesktopBounds {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top).max(0) as u32
    }
}

/// One duplicable output as reported by the platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputInfo {
    /// Flat index across all adapters, as accepted by `open_output`.
    pub index: u32,
    pub adapter_index: u32,
    pub name: String,
    pub desktop_bounds: DesktopBounds,
    pub attached: bool,
    pub rotation: OutputRotation,
}

/// A live duplication of one output.
///
/// Implementations hold at most one acquired frame at a time; callers pair
/// every `AcquireStatus::Ready` with exactly one `release_frame`.
pub trait DuplicationOutput {
    fn descriptor(&self) -> FrameDescriptor;

    fn acquire_next_frame(&mut self, timeout_ms: u32) -> CaptureResult<AcquireStatus>;

    fn release_frame(&mut self) -> CaptureResult<()>;

    /// Copy the currently acquired frame into CPU-visible memory and hand
    /// the mapping to `visit`. The mapping is released before this returns,
    /// whether or not `visit` succeeds.
    ///
    /// With `overlay_cursor`, a visible cursor is composited into the copy
    /// before read-back.
    fn read_frame(
        &mut self,
        overlay_cursor: bool,
        visit: &mut dyn FnMut(&MappedSurface<'_>) -> CaptureResult<()>,
    ) -> CaptureResult<()>;
}

pub trait DuplicationBackend: Send + Sync {
    fn enumerate_outputs(&self) -> CaptureResult<Vec<OutputInfo>>;

    fn open_output(&self, index: u32) -> CaptureResult<Box<dyn DuplicationOutput>>;
}

pub fn default_backend() -> CaptureResult<Arc<dyn DuplicationBackend>> {
    crate::platform::build_backend()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_bounds_have_zero_extent() {
        let bounds = DesktopBounds {
            left: 100,
            top: 0,
            right: 50,
            bottom: 720,
        };
        assert_eq!(bounds.width(), 0);
        assert_eq!(bounds.height(), 720);
    }
}
