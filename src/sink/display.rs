use crate::error::CaptureResult;
use crate::frame::{FrameDescriptor, FrameTimestamp, PixelBuffer};

/// Puts a frame on screen: upload, draw into the back buffer, present.
pub trait FramePresenter {
    fn present(&mut self, buffer: &PixelBuffer, descriptor: &FrameDescriptor) -> CaptureResult<()>;

    /// The target surface changed size.
    fn resize(&mut self, _width: u32, _height: u32) -> CaptureResult<()> {
        Ok(())
    }
}

pub struct DisplaySink {
    presenter: Box<dyn FramePresenter>,
    presented: u64,
}

impl DisplaySink {
    pub fn new(presenter: Box<dyn FramePresenter>) -> Self {
        Self {
            presenter,
            presented: 0,
        }
    }

    pub fn frames_presented(&self) -> u64 {
        self.presented
    }

    pub fn resize(&mut self, width: u32, height: u32) -> CaptureResult<()> {
        self.presenter.resize(width, height)
    }

    pub fn accept(
        &mut self,
        buffer: &PixelBuffer,
        descriptor: &FrameDescriptor,
        _timestamp: FrameTimestamp,
    ) -> CaptureResult<()> {
        self.presenter.present(buffer, descriptor)?;
        self.presented += 1;
        Ok(())
    }
}
