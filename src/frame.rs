use std::time::Instant;

use crate::convert;
use crate::error::{CaptureError, CaptureResult};

/// Byte layout of a 4-byte-per-pixel desktop surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PixelFormat {
    /// `DXGI_FORMAT_B8G8R8A8_UNORM`, the format desktop duplication
    /// hands out for SDR outputs.
    #[default]
    Bgra8,
    Rgba8,
}

impl PixelFormat {
    pub const BYTES_PER_PIXEL: usize = 4;

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bgra8 => "bgra8",
            Self::Rgba8 => "rgba8",
        }
    }
}

/// Rotation of the output relative to its native scan-out orientation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputRotation {
    #[default]
    Identity,
    Rotate90,
    Rotate180,
    Rotate270,
}

/// Geometry and format of the frames a duplication session produces.
///
/// Derived from the output mode when the session opens and stable until
/// the session is recreated (a mode change always surfaces as a lost
/// session first).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Tightly packed row pitch of a materialized full frame: `width * 4`.
    pub row_pitch: usize,
    pub rotation: OutputRotation,
    /// Top-left corner of the output in virtual desktop coordinates, used
    /// to translate global cursor positions into output space.
    pub desktop_origin: (i32, i32),
}

impl FrameDescriptor {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> CaptureResult<Self> {
        if width == 0 || height == 0 {
            return Err(CaptureError::InvalidConfig(format!(
                "frame dimensions must be > 0, got {width}x{height}"
            )));
        }
        let row_pitch = row_bytes(width)?;
        pixel_bytes(width, height)?;
        Ok(Self {
            width,
            height,
            format,
            row_pitch,
            rotation: OutputRotation::Identity,
            desktop_origin: (0, 0),
        })
    }

    pub fn with_rotation(mut self, rotation: OutputRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_desktop_origin(mut self, x: i32, y: i32) -> Self {
        self.desktop_origin = (x, y);
        self
    }

    /// Bytes needed for one tightly packed full frame.
    pub fn frame_len(&self) -> usize {
        self.row_pitch * self.height as usize
    }
}

/// Cursor position reported alongside an acquired frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PointerPosition {
    /// Output-local X of the cursor's top-left corner.
    pub x: i32,
    /// Output-local Y of the cursor's top-left corner.
    pub y: i32,
    pub visible: bool,
}

/// Metadata the platform attaches to each acquired frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameInfo {
    /// `true` when the desktop image changed since the previous acquire.
    /// `false` means the notification carried only pointer updates.
    pub has_new_image: bool,
    /// Monotonic present-time marker in QPC ticks. Zero when the platform
    /// has not presented a desktop image for this notification yet.
    pub present_time_qpc: i64,
    /// Number of desktop presents folded into this notification.
    pub accumulated_frames: u32,
    /// Pointer position, when the notification carried a pointer update.
    pub pointer: Option<PointerPosition>,
}

/// Row order of a [`PixelBuffer`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RowOrder {
    /// Row 0 is the top of the image.
    #[default]
    TopDown,
    /// Row 0 is the bottom of the image (DIB / bottom-up bitmap layout).
    BottomUp,
}

/// Timing handed to a sink together with each materialized frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameTimestamp {
    /// Zero-based index of the frame within the capture run.
    pub sequence: u64,
    /// Monotonic instant taken right after the frame was acquired.
    pub captured_at: Instant,
    /// Platform present-time marker, when one was reported.
    pub present_time_qpc: Option<i64>,
}

impl FrameTimestamp {
    pub fn now(sequence: u64) -> Self {
        Self {
            sequence,
            captured_at: Instant::now(),
            present_time_qpc: None,
        }
    }
}

/// One materialized frame in CPU memory, rows packed at `width * 4`.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    row_order: RowOrder,
}

impl PixelBuffer {
    pub fn from_raw(
        width: u32,
        height: u32,
        format: PixelFormat,
        row_order: RowOrder,
        data: Vec<u8>,
    ) -> CaptureResult<Self> {
        let expected = pixel_bytes(width, height)?;
        if data.len() != expected {
            return Err(CaptureError::InvalidConfig(format!(
                "pixel data length mismatch: got {}, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            format,
            row_order,
        })
    }

    pub(crate) fn zeroed(
        width: u32,
        height: u32,
        format: PixelFormat,
        row_order: RowOrder,
    ) -> CaptureResult<Self> {
        let len = pixel_bytes(width, height)?;
        Ok(Self {
            data: vec![0u8; len],
            width,
            height,
            format,
            row_order,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn row_order(&self) -> RowOrder {
        self.row_order
    }

    pub fn stride(&self) -> usize {
        self.width as usize * PixelFormat::BYTES_PER_PIXEL
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Row `index` in storage order.
    pub fn row(&self, index: u32) -> Option<&[u8]> {
        if index >= self.height {
            return None;
        }
        let stride = self.stride();
        let start = index as usize * stride;
        self.data.get(start..start + stride)
    }

    pub fn rows(&self) -> std::slice::ChunksExact<'_, u8> {
        self.data.chunks_exact(self.stride().max(1))
    }

    /// Return a copy whose storage order is `order`, reversing rows when
    /// the current order differs.
    pub fn with_row_order(&self, order: RowOrder) -> PixelBuffer {
        if order == self.row_order {
            return self.clone();
        }
        let mut data = vec![0u8; self.data.len()];
        convert::reverse_rows(&self.data, &mut data, self.stride());
        PixelBuffer {
            data,
            width: self.width,
            height: self.height,
            format: self.format,
            row_order: order,
        }
    }

    /// Top-down RGBA8 bytes, swizzling BGRA sources and reversing
    /// bottom-up storage. This is the layout still-image encoders take.
    pub fn to_rgba8_top_down(&self) -> Vec<u8> {
        let top_down = self.with_row_order(RowOrder::TopDown);
        let mut data = top_down.data;
        if self.format == PixelFormat::Bgra8 {
            convert::swizzle_bgra_rgba_in_place(&mut data);
        }
        data
    }
}

pub(crate) fn row_bytes(width: u32) -> CaptureResult<usize> {
    usize::try_from(width)
        .map_err(|_| CaptureError::BufferOverflow)?
        .checked_mul(PixelFormat::BYTES_PER_PIXEL)
        .ok_or(CaptureError::BufferOverflow)
}

pub(crate) fn pixel_bytes(width: u32, height: u32) -> CaptureResult<usize> {
    let h = usize::try_from(height).map_err(|_| CaptureError::BufferOverflow)?;
    row_bytes(width)?
        .checked_mul(h)
        .ok_or(CaptureError::BufferOverflow)
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("row_order", &self.row_order)
            .field("data_len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_row_buffer(order: RowOrder) -> PixelBuffer {
        let data = vec![
            1, 2, 3, 4, //
            5, 6, 7, 8,
        ];
        PixelBuffer::from_raw(1, 2, PixelFormat::Bgra8, order, data).unwrap()
    }

    #[test]
    fn from_raw_rejects_wrong_length() {
        let result = PixelBuffer::from_raw(2, 2, PixelFormat::Bgra8, RowOrder::TopDown, vec![0; 15]);
        assert!(matches!(result, Err(CaptureError::InvalidConfig(_))));
    }

    #[test]
    fn descriptor_rejects_zero_size() {
        assert!(FrameDescriptor::new(0, 10, PixelFormat::Bgra8).is_err());
        let desc = FrameDescriptor::new(3, 2, PixelFormat::Bgra8).unwrap();
        assert_eq!(desc.row_pitch, 12);
        assert_eq!(desc.frame_len(), 24);
    }

    #[test]
    fn changing_row_order_reverses_rows() {
        let buffer = two_row_buffer(RowOrder::BottomUp);
        let top_down = buffer.with_row_order(RowOrder::TopDown);
        assert_eq!(top_down.row(0), Some(&[5u8, 6, 7, 8][..]));
        assert_eq!(top_down.row(1), Some(&[1u8, 2, 3, 4][..]));
        assert_eq!(top_down.row_order(), RowOrder::TopDown);
    }

    #[test]
    fn rgba_conversion_swaps_red_and_blue() {
        let buffer = two_row_buffer(RowOrder::TopDown);
        assert_eq!(buffer.to_rgba8_top_down(), vec![3, 2, 1, 4, 7, 6, 5, 8]);
    }
}
