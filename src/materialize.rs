use crate::acquire::AcquiredFrame;
use crate::backend::MappedSurface;
use crate::convert;
use crate::error::{CaptureError, CaptureResult};
use crate::frame::{PixelBuffer, RowOrder};
use crate::region::CropRect;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MaterializeOptions {
    /// Sub-rectangle to extract; `None` takes the whole frame.
    pub crop: Option<CropRect>,
    /// Store rows bottom-up, the layout DIB-style file formats and the
    /// RGB32 video input expect.
    pub flip_vertical: bool,
    /// Composite the visible cursor into the frame before read-back.
    pub overlay_cursor: bool,
}

impl MaterializeOptions {
    pub fn with_crop(mut self, crop: CropRect) -> Self {
        self.crop = Some(crop);
        self
    }

    pub fn flipped(mut self) -> Self {
        self.flip_vertical = true;
        self
    }

    pub fn with_cursor(mut self) -> Self {
        self.overlay_cursor = true;
        self
    }
}

/// Turns an acquired GPU frame into a packed [`PixelBuffer`].
///
/// Synchronous: reading the frame blocks until the GPU copy into the
/// staging resource has finished.
#[derive(Debug, Default)]
pub struct Materializer {
    frames: u64,
}

impl Materializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames materialized so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn materialize(
        &mut self,
        frame: &mut AcquiredFrame<'_>,
        options: &MaterializeOptions,
    ) -> CaptureResult<PixelBuffer> {
        let descriptor = frame.descriptor();
        let crop = options
            .crop
            .unwrap_or_else(|| CropRect::full(descriptor.width, descriptor.height));
        crop.validate_within(&descriptor)?;

        let row_order = if options.flip_vertical {
            RowOrder::BottomUp
        } else {
            RowOrder::TopDown
        };
        let mut buffer = PixelBuffer::zeroed(crop.width, crop.height, descriptor.format, row_order)?;
        let flip = options.flip_vertical;
        frame.read(options.overlay_cursor, &mut |surface: &MappedSurface<'_>| {
            if surface.format != descriptor.format {
                return Err(CaptureError::UnsupportedFormat(format!(
                    "mapped {} but the session reports {}",
                    surface.format.as_str(),
                    descriptor.format.as_str()
                )));
            }
            convert::copy_rows(surface, crop, flip, buffer.as_mut_bytes())
        })?;
        self.frames += 1;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::{FrameAcquirer, FrameOutcome};
    use crate::session::CaptureSession;
    use crate::testing::{ScriptedBackend, Step, new_image};

    fn materialize_once(
        backend: &ScriptedBackend,
        options: MaterializeOptions,
    ) -> CaptureResult<PixelBuffer> {
        backend.push_steps([Step::Frame(new_image())]);
        let mut session = CaptureSession::builder()
            .with_backend(backend.shared())
            .build()?;
        let mut acquirer = FrameAcquirer::default();
        let mut materializer = Materializer::new();
        let outcome = acquirer.acquire_next(&mut session, 0);
        match outcome {
            FrameOutcome::Ready(mut frame) => {
                let buffer = materializer.materialize(&mut frame, &options)?;
                frame.release()?;
                Ok(buffer)
            }
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[test]
    fn crop_sets_output_dimensions() -> CaptureResult<()> {
        let backend = ScriptedBackend::new(16, 12);
        let crop = CropRect::new(2, 3, 5, 7)?;
        let buffer = materialize_once(&backend, MaterializeOptions::default().with_crop(crop))?;
        assert_eq!(buffer.dimensions(), (5, 7));
        assert_eq!(buffer.as_bytes().len(), 5 * 7 * 4);
        assert_eq!(buffer.row(0).map(|row| &row[..2]), Some(&[2u8, 3][..]));
        Ok(())
    }

    #[test]
    fn flipped_rows_mirror_unflipped_rows() -> CaptureResult<()> {
        let backend = ScriptedBackend::new(6, 5);
        let plain = materialize_once(&backend, MaterializeOptions::default())?;
        let flipped = materialize_once(&backend, MaterializeOptions::default().flipped())?;
        assert_eq!(flipped.row_order(), RowOrder::BottomUp);
        for i in 0..5 {
            assert_eq!(flipped.row(i), plain.row(4 - i));
        }
        Ok(())
    }

    #[test]
    fn full_frame_crop_matches_no_crop() -> CaptureResult<()> {
        let backend = ScriptedBackend::new(9, 7);
        let uncropped = materialize_once(&backend, MaterializeOptions::default())?;
        let cropped = materialize_once(
            &backend,
            MaterializeOptions::default().with_crop(CropRect::full(9, 7)),
        )?;
        assert_eq!(uncropped.as_bytes(), cropped.as_bytes());
        Ok(())
    }

    #[test]
    fn out_of_bounds_crop_is_rejected_and_frame_still_released() -> CaptureResult<()> {
        let backend = ScriptedBackend::new(8, 8);
        let crop = CropRect::new(4, 4, 8, 8)?;
        let result = materialize_once(&backend, MaterializeOptions::default().with_crop(crop));
        assert!(matches!(result, Err(CaptureError::InvalidConfig(_))));
        assert_eq!(backend.acquired(), backend.released());
        Ok(())
    }

    #[test]
    fn cursor_overlay_is_requested_from_the_output() -> CaptureResult<()> {
        let backend = ScriptedBackend::new(4, 4);
        materialize_once(&backend, MaterializeOptions::default().with_cursor())?;
        assert_eq!(backend.overlay_reads(), 1);
        Ok(())
    }
}
