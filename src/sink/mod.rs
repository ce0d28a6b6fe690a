//! Frame consumers: video stream, still image, on-screen display.

mod display;
mod still;
mod video;

pub use display::{DisplaySink, FramePresenter};
pub use still::{ImageContainer, StillImageSink};
pub use video::{
    DEFAULT_BITRATE, DEFAULT_FRAME_RATE, HNS_PER_SECOND, MediaTypeSpec, VideoCodec,
    VideoInputFormat, VideoSample, VideoSink, VideoSinkConfig, VideoWriter,
};

use std::path::PathBuf;

use crate::error::CaptureResult;
use crate::frame::{FrameDescriptor, FrameTimestamp, PixelBuffer};

/// Where materialized frames go. The variant is fixed at construction.
pub enum FrameSink {
    Video(VideoSink),
    Still(StillImageSink),
    Display(DisplaySink),
}

impl FrameSink {
    pub fn video(writer: Box<dyn VideoWriter>, config: VideoSinkConfig) -> Self {
        Self::Video(VideoSink::new(writer, config))
    }

    pub fn still(path: impl Into<PathBuf>, container: ImageContainer) -> Self {
        Self::Still(StillImageSink::new(path, container))
    }

    pub fn display(presenter: Box<dyn FramePresenter>) -> Self {
        Self::Display(DisplaySink::new(presenter))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Video(_) => "video",
            Self::Still(_) => "still",
            Self::Display(_) => "display",
        }
    }

    pub fn accept(
        &mut self,
        buffer: &PixelBuffer,
        descriptor: &FrameDescriptor,
        timestamp: FrameTimestamp,
    ) -> CaptureResult<()> {
        match self {
            Self::Video(sink) => sink.accept(buffer, descriptor, timestamp),
            Self::Still(sink) => sink.accept(buffer, descriptor, timestamp),
            Self::Display(sink) => sink.accept(buffer, descriptor, timestamp),
        }
    }

    /// `false` once the sink cannot take another frame (a still image that
    /// has been written, a finalized video).
    pub fn wants_more(&self) -> bool {
        match self {
            Self::Video(sink) => !sink.is_finished(),
            Self::Still(sink) => !sink.is_complete(),
            Self::Display(_) => true,
        }
    }

    /// Flush whatever the sink buffers. Only the video stream has work to do.
    pub fn finish(&mut self) -> CaptureResult<()> {
        match self {
            Self::Video(sink) => sink.finish(),
            Self::Still(_) | Self::Display(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::frame::{PixelFormat, RowOrder};

    struct CountingPresenter(Rc<Cell<u32>>);

    impl FramePresenter for CountingPresenter {
        fn present(&mut self, _buffer: &PixelBuffer, _descriptor: &FrameDescriptor) -> CaptureResult<()> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn display_sink_presents_every_frame() -> CaptureResult<()> {
        let count = Rc::new(Cell::new(0));
        let mut sink = FrameSink::display(Box::new(CountingPresenter(Rc::clone(&count))));
        let buffer = PixelBuffer::from_raw(1, 1, PixelFormat::Bgra8, RowOrder::TopDown, vec![0; 4])?;
        let descriptor = FrameDescriptor::new(1, 1, PixelFormat::Bgra8)?;
        for n in 0..3 {
            sink.accept(&buffer, &descriptor, FrameTimestamp::now(n))?;
        }
        assert_eq!(count.get(), 3);
        assert!(sink.wants_more());
        assert_eq!(sink.kind(), "display");
        Ok(())
    }
}
