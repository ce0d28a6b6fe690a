use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, info};

use crate::error::{CaptureError, CaptureResult};
use crate::frame::{FrameDescriptor, FrameTimestamp, PixelBuffer};

/// File format a still image is written in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImageContainer {
    #[default]
    Png,
    Bmp,
    /// Lossy; the alpha channel is dropped.
    Jpeg,
}

impl ImageContainer {
    /// Pick a container from the path's extension, PNG when it has none or
    /// an unknown one.
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("bmp") | Some("dib") => Self::Bmp,
            Some("jpg") | Some("jpeg") => Self::Jpeg,
            _ => Self::Png,
        }
    }

    fn image_format(self) -> image::ImageFormat {
        match self {
            Self::Png => image::ImageFormat::Png,
            Self::Bmp => image::ImageFormat::Bmp,
            Self::Jpeg => image::ImageFormat::Jpeg,
        }
    }
}

/// Writes frames to one file. Every accepted frame overwrites the previous
/// one; after the first write the sink reports itself complete so a capture
/// loop stops.
#[derive(Debug)]
pub struct StillImageSink {
    path: PathBuf,
    container: ImageContainer,
    written: bool,
}

impl StillImageSink {
    pub fn new(path: impl Into<PathBuf>, container: ImageContainer) -> Self {
        Self {
            path: path.into(),
            container,
            written: false,
        }
    }

    /// Sink whose container follows the path's extension.
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let container = ImageContainer::from_path(&path);
        Self::new(path, container)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn container(&self) -> ImageContainer {
        self.container
    }

    /// `true` once a frame has been written.
    pub fn is_complete(&self) -> bool {
        self.written
    }

    /// Ask for another frame. The next write still lands on the same path.
    pub fn rearm(&mut self) {
        self.written = false;
    }

    pub fn accept(
        &mut self,
        buffer: &PixelBuffer,
        _descriptor: &FrameDescriptor,
        timestamp: FrameTimestamp,
    ) -> CaptureResult<()> {
        let (width, height) = buffer.dimensions();
        let rgba = image::RgbaImage::from_raw(width, height, buffer.to_rgba8_top_down())
            .ok_or(CaptureError::BufferOverflow)?;
        let format = self.container.image_format();
        let saved = match self.container {
            ImageContainer::Jpeg => image::DynamicImage::ImageRgba8(rgba)
                .to_rgb8()
                .save_with_format(&self.path, format),
            ImageContainer::Png | ImageContainer::Bmp => rgba.save_with_format(&self.path, format),
        };
        saved
            .with_context(|| format!("failed to write still image to {}", self.path.display()))
            .map_err(CaptureError::Platform)?;
        if self.written {
            debug!(path = %self.path.display(), "still image overwritten");
        }
        self.written = true;
        info!(
            path = %self.path.display(),
            width,
            height,
            sequence = timestamp.sequence,
            "still image written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{PixelFormat, RowOrder};

    /// 2x2 BGRA frame stored bottom-up: blue on the bottom row, red on top.
    fn two_tone() -> PixelBuffer {
        let data = vec![
            255, 0, 0, 255, 255, 0, 0, 255, //
            0, 0, 255, 255, 0, 0, 255, 255,
        ];
        PixelBuffer::from_raw(2, 2, PixelFormat::Bgra8, RowOrder::BottomUp, data).unwrap()
    }

    fn solid(bgra: [u8; 4]) -> PixelBuffer {
        PixelBuffer::from_raw(1, 1, PixelFormat::Bgra8, RowOrder::TopDown, bgra.to_vec()).unwrap()
    }

    #[test]
    fn container_follows_extension() {
        assert_eq!(ImageContainer::from_path(Path::new("SCREENSHOT.PNG")), ImageContainer::Png);
        assert_eq!(ImageContainer::from_path(Path::new("shot.BMP")), ImageContainer::Bmp);
        assert_eq!(ImageContainer::from_path(Path::new("shot.jpeg")), ImageContainer::Jpeg);
        assert_eq!(ImageContainer::from_path(Path::new("shot")), ImageContainer::Png);
    }

    #[test]
    fn png_is_written_top_down_in_rgba() -> CaptureResult<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("two-tone.png");
        let mut sink = StillImageSink::for_path(&path);
        let descriptor = FrameDescriptor::new(2, 2, PixelFormat::Bgra8)?;
        sink.accept(&two_tone(), &descriptor, FrameTimestamp::now(0))?;
        assert!(sink.is_complete());

        let decoded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(decoded.get_pixel(1, 1).0, [0, 0, 255, 255]);
        Ok(())
    }

    #[test]
    fn second_frame_overwrites_the_first() -> CaptureResult<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overwrite.bmp");
        let mut sink = StillImageSink::for_path(&path);
        let descriptor = FrameDescriptor::new(1, 1, PixelFormat::Bgra8)?;

        sink.accept(&solid([0, 0, 255, 255]), &descriptor, FrameTimestamp::now(0))?;
        assert_eq!(image::open(&path).unwrap().to_rgba8().get_pixel(0, 0).0, [255, 0, 0, 255]);

        sink.accept(&solid([255, 0, 0, 255]), &descriptor, FrameTimestamp::now(1))?;
        assert_eq!(image::open(&path).unwrap().to_rgba8().get_pixel(0, 0).0, [0, 0, 255, 255]);
        assert!(sink.is_complete());
        Ok(())
    }

    #[test]
    fn rearm_asks_for_another_frame() -> CaptureResult<()> {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = StillImageSink::for_path(dir.path().join("rearm.png"));
        let descriptor = FrameDescriptor::new(1, 1, PixelFormat::Bgra8)?;
        sink.accept(&solid([0, 0, 0, 255]), &descriptor, FrameTimestamp::now(0))?;
        assert!(sink.is_complete());
        sink.rearm();
        assert!(!sink.is_complete());
        Ok(())
    }
}
