//! Video stream sink and the container/encoder seam it writes through.

use tracing::{debug, info, warn};

use crate::convert;
use crate::error::{CaptureError, CaptureResult};
use crate::frame::{FrameDescriptor, FrameTimestamp, PixelBuffer, PixelFormat, RowOrder};

/// Media time units per second (100 ns ticks).
pub const HNS_PER_SECOND: i64 = 10_000_000;
pub const DEFAULT_FRAME_RATE: u32 = 25;
pub const DEFAULT_BITRATE: u32 = 1_000_000;

/// Compressed stream subtype written into the container.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VideoCodec {
    /// Windows Media Video 9.
    #[default]
    Wmv3,
}

/// Uncompressed subtype handed to the encoder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VideoInputFormat {
    /// 32-bit BGRX, one pixel per little-endian `u32`.
    #[default]
    Rgb32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoSinkConfig {
    pub frame_rate: u32,
    pub bitrate: u32,
    pub codec: VideoCodec,
}

impl Default for VideoSinkConfig {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            bitrate: DEFAULT_BITRATE,
            codec: VideoCodec::Wmv3,
        }
    }
}

/// Output and input media types negotiated with the writer before the first
/// sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MediaTypeSpec {
    pub output_subtype: VideoCodec,
    pub input_subtype: VideoInputFormat,
    pub width: u32,
    pub height: u32,
    /// Numerator and denominator.
    pub frame_rate: (u32, u32),
    pub pixel_aspect: (u32, u32),
    pub bitrate: u32,
    pub progressive: bool,
}

impl MediaTypeSpec {
    pub fn new(width: u32, height: u32, config: &VideoSinkConfig) -> CaptureResult<Self> {
        if width == 0 || height == 0 {
            return Err(CaptureError::InvalidConfig(format!(
                "video frame size must be > 0, got {width}x{height}"
            )));
        }
        if config.frame_rate == 0 {
            return Err(CaptureError::InvalidConfig("video frame rate must be > 0".into()));
        }
        Ok(Self {
            output_subtype: config.codec,
            input_subtype: VideoInputFormat::Rgb32,
            width,
            height,
            frame_rate: (config.frame_rate, 1),
            pixel_aspect: (1, 1),
            bitrate: config.bitrate,
            progressive: true,
        })
    }

    /// Length of one frame in 100 ns units.
    pub fn frame_duration_hns(&self) -> i64 {
        let (num, den) = self.frame_rate;
        HNS_PER_SECOND * i64::from(den) / i64::from(num.max(1))
    }

    /// Bytes in one input sample: top-down rows of `width * 4`.
    pub fn sample_len(&self) -> usize {
        self.width as usize * PixelFormat::BYTES_PER_PIXEL * self.height as usize
    }
}

/// One uncompressed frame ready for the encoder.
#[derive(Clone, Copy, Debug)]
pub struct VideoSample<'a> {
    /// Top-down BGRX rows, tightly packed.
    pub data: &'a [u8],
    /// Presentation time in 100 ns units.
    pub time_hns: i64,
    pub duration_hns: i64,
}

/// Container plus encoder. Not `Send`: platform writers are bound to the
/// thread that started them.
pub trait VideoWriter {
    /// Configure the stream and start writing. Called once, before the
    /// first sample.
    fn begin(&mut self, media: &MediaTypeSpec) -> CaptureResult<()>;

    fn write_sample(&mut self, sample: &VideoSample<'_>) -> CaptureResult<()>;

    /// Flush and close the container.
    fn finalize(&mut self) -> CaptureResult<()>;
}

pub struct VideoSink {
    writer: Box<dyn VideoWriter>,
    config: VideoSinkConfig,
    media: Option<MediaTypeSpec>,
    frames_written: u64,
    finished: bool,
    scratch: Vec<u8>,
}

impl VideoSink {
    pub fn new(writer: Box<dyn VideoWriter>, config: VideoSinkConfig) -> Self {
        Self {
            writer,
            config,
            media: None,
            frames_written: 0,
            finished: false,
            scratch: Vec::new(),
        }
    }

    pub fn config(&self) -> &VideoSinkConfig {
        &self.config
    }

    /// Media type agreed on with the writer, once the first frame arrived.
    pub fn media_type(&self) -> Option<&MediaTypeSpec> {
        self.media.as_ref()
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn accept(
        &mut self,
        buffer: &PixelBuffer,
        _descriptor: &FrameDescriptor,
        timestamp: FrameTimestamp,
    ) -> CaptureResult<()> {
        if self.finished {
            return Err(CaptureError::EncoderRejected(
                "video stream is already finalized".into(),
            ));
        }
        let media = match self.media {
            Some(media) => media,
            None => self.negotiate(buffer.width(), buffer.height())?,
        };
        if buffer.dimensions() != (media.width, media.height) {
            return Err(CaptureError::EncoderRejected(format!(
                "frame is {}x{} but the stream was negotiated at {}x{}",
                buffer.width(),
                buffer.height(),
                media.width,
                media.height
            )));
        }

        let duration = media.frame_duration_hns();
        let time = i64::try_from(self.frames_written)
            .ok()
            .and_then(|n| n.checked_mul(duration))
            .ok_or(CaptureError::BufferOverflow)?;
        let data = normalize(&mut self.scratch, buffer);
        let sample = VideoSample {
            data,
            time_hns: time,
            duration_hns: duration,
        };
        self.writer
            .write_sample(&sample)
            .map_err(|error| rejected("WriteSample", error))?;
        self.frames_written += 1;
        debug!(
            frame = self.frames_written,
            sequence = timestamp.sequence,
            time_hns = time,
            "video sample written"
        );
        Ok(())
    }

    /// Finalize the container. Further frames are rejected. A sink that
    /// never received a frame has nothing to finalize.
    pub fn finish(&mut self) -> CaptureResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if self.media.is_none() {
            return Ok(());
        }
        self.writer
            .finalize()
            .map_err(|error| rejected("Finalize", error))?;
        info!(frames = self.frames_written, "video stream finalized");
        Ok(())
    }

    fn negotiate(&mut self, width: u32, height: u32) -> CaptureResult<MediaTypeSpec> {
        let media = MediaTypeSpec::new(width, height, &self.config)?;
        self.writer
            .begin(&media)
            .map_err(|error| rejected("media type negotiation", error))?;
        info!(
            width,
            height,
            fps = media.frame_rate.0,
            bitrate = media.bitrate,
            codec = ?media.output_subtype,
            "video stream started"
        );
        self.media = Some(media);
        Ok(media)
    }
}

impl Drop for VideoSink {
    fn drop(&mut self) {
        if let Err(error) = self.finish() {
            warn!(%error, "failed to finalize video stream on drop");
        }
    }
}

/// Top-down BGRA bytes of `buffer`, borrowing when no rework is needed.
fn normalize<'a>(scratch: &'a mut Vec<u8>, buffer: &'a PixelBuffer) -> &'a [u8] {
    let needs_flip = buffer.row_order() == RowOrder::BottomUp;
    let needs_swizzle = buffer.format() == PixelFormat::Rgba8;
    if !needs_flip && !needs_swizzle {
        return buffer.as_bytes();
    }
    scratch.resize(buffer.as_bytes().len(), 0);
    if needs_flip {
        convert::reverse_rows(buffer.as_bytes(), scratch, buffer.stride());
    } else {
        scratch.copy_from_slice(buffer.as_bytes());
    }
    if needs_swizzle {
        convert::swizzle_bgra_rgba_in_place(scratch);
    }
    scratch
}

fn rejected(stage: &str, error: CaptureError) -> CaptureError {
    match error {
        CaptureError::EncoderRejected(_) => error,
        other => CaptureError::EncoderRejected(format!("{stage}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default)]
    struct Recorded {
        media: Vec<MediaTypeSpec>,
        samples: Vec<(Vec<u8>, i64, i64)>,
        finalized: u32,
    }

    struct RecordingWriter {
        log: Arc<Mutex<Recorded>>,
        reject_begin: bool,
    }

    impl VideoWriter for RecordingWriter {
        fn begin(&mut self, media: &MediaTypeSpec) -> CaptureResult<()> {
            if self.reject_begin {
                return Err(CaptureError::Platform(anyhow::anyhow!("AddStream failed")));
            }
            self.log.lock().unwrap().media.push(*media);
            Ok(())
        }

        fn write_sample(&mut self, sample: &VideoSample<'_>) -> CaptureResult<()> {
            self.log.lock().unwrap().samples.push((
                sample.data.to_vec(),
                sample.time_hns,
                sample.duration_hns,
            ));
            Ok(())
        }

        fn finalize(&mut self) -> CaptureResult<()> {
            self.log.lock().unwrap().finalized += 1;
            Ok(())
        }
    }

    fn sink(reject_begin: bool) -> (VideoSink, Arc<Mutex<Recorded>>) {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let writer = RecordingWriter {
            log: Arc::clone(&log),
            reject_begin,
        };
        (VideoSink::new(Box::new(writer), VideoSinkConfig::default()), log)
    }

    fn frame(width: u32, height: u32, order: RowOrder) -> PixelBuffer {
        let data = (0..width * height * 4).map(|i| (i / 4) as u8).collect();
        PixelBuffer::from_raw(width, height, PixelFormat::Bgra8, order, data).unwrap()
    }

    fn descriptor() -> FrameDescriptor {
        FrameDescriptor::new(2, 2, PixelFormat::Bgra8).unwrap()
    }

    #[test]
    fn first_frame_negotiates_the_stream() -> CaptureResult<()> {
        let (mut sink, log) = sink(false);
        sink.accept(&frame(2, 2, RowOrder::TopDown), &descriptor(), FrameTimestamp::now(0))?;
        let log = log.lock().unwrap();
        assert_eq!(log.media.len(), 1);
        let media = log.media[0];
        assert_eq!(media.output_subtype, VideoCodec::Wmv3);
        assert_eq!(media.input_subtype, VideoInputFormat::Rgb32);
        assert_eq!(media.frame_rate, (25, 1));
        assert_eq!(media.pixel_aspect, (1, 1));
        assert_eq!(media.bitrate, 1_000_000);
        assert!(media.progressive);
        Ok(())
    }

    #[test]
    fn sample_times_advance_by_one_frame_duration() -> CaptureResult<()> {
        let (mut sink, log) = sink(false);
        for n in 0..3 {
            sink.accept(&frame(2, 2, RowOrder::TopDown), &descriptor(), FrameTimestamp::now(n))?;
        }
        let log = log.lock().unwrap();
        let times: Vec<_> = log.samples.iter().map(|(_, t, d)| (*t, *d)).collect();
        assert_eq!(times, vec![(0, 400_000), (400_000, 400_000), (800_000, 400_000)]);
        Ok(())
    }

    #[test]
    fn bottom_up_frames_are_submitted_top_down() -> CaptureResult<()> {
        let (mut sink, log) = sink(false);
        sink.accept(&frame(1, 2, RowOrder::BottomUp), &descriptor(), FrameTimestamp::now(0))?;
        let log = log.lock().unwrap();
        assert_eq!(log.samples[0].0, vec![1, 1, 1, 1, 0, 0, 0, 0]);
        Ok(())
    }

    #[test]
    fn size_change_after_negotiation_is_rejected() -> CaptureResult<()> {
        let (mut sink, _log) = sink(false);
        sink.accept(&frame(2, 2, RowOrder::TopDown), &descriptor(), FrameTimestamp::now(0))?;
        let result = sink.accept(&frame(4, 2, RowOrder::TopDown), &descriptor(), FrameTimestamp::now(1));
        assert!(matches!(result, Err(CaptureError::EncoderRejected(_))));
        Ok(())
    }

    #[test]
    fn writer_failures_surface_as_encoder_rejections() {
        let (mut sink, _log) = sink(true);
        let result = sink.accept(&frame(2, 2, RowOrder::TopDown), &descriptor(), FrameTimestamp::now(0));
        assert!(matches!(result, Err(CaptureError::EncoderRejected(_))));
    }

    #[test]
    fn finish_finalizes_once_and_blocks_further_frames() -> CaptureResult<()> {
        let (mut sink, log) = sink(false);
        sink.accept(&frame(2, 2, RowOrder::TopDown), &descriptor(), FrameTimestamp::now(0))?;
        sink.finish()?;
        sink.finish()?;
        assert!(sink
            .accept(&frame(2, 2, RowOrder::TopDown), &descriptor(), FrameTimestamp::now(1))
            .is_err());
        drop(sink);
        assert_eq!(log.lock().unwrap().finalized, 1);
        Ok(())
    }
}
