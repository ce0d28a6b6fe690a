use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, info, warn};
use windows::Win32::Media::MediaFoundation::{
    IMFAttributes, IMFByteStream, IMFMediaBuffer, IMFMediaType, IMFSinkWriter,
    MF_MT_AVG_BITRATE, MF_MT_DEFAULT_STRIDE, MF_MT_FRAME_RATE, MF_MT_FRAME_SIZE,
    MF_MT_INTERLACE_MODE, MF_MT_MAJOR_TYPE, MF_MT_PIXEL_ASPECT_RATIO, MF_MT_SUBTYPE,
    MF_VERSION, MFCreateMediaType, MFCreateMemoryBuffer, MFCreateSample,
    MFCreateSinkWriterFromURL, MFMediaType_Video, MFSTARTUP_FULL, MFShutdown, MFStartup,
    MFVideoFormat_RGB32, MFVideoFormat_WMV3, MFVideoInterlace_Progressive,
};
use windows::core::{GUID, HSTRING};

use crate::error::{CaptureError, CaptureResult};
use crate::frame::PixelFormat;
use crate::sink::{MediaTypeSpec, VideoCodec, VideoInputFormat, VideoSample, VideoWriter};

use super::com::CoInitGuard;

/// Keeps Media Foundation started for as long as it lives.
struct MfStartupGuard;

impl MfStartupGuard {
    fn start() -> CaptureResult<Self> {
        unsafe { MFStartup(MF_VERSION, MFSTARTUP_FULL) }
            .context("MFStartup failed")
            .map_err(CaptureError::Platform)?;
        Ok(Self)
    }
}

impl Drop for MfStartupGuard {
    fn drop(&mut self) {
        if let Err(error) = unsafe { MFShutdown() } {
            warn!(%error, "MFShutdown failed");
        }
    }
}

/// A locked media buffer. Unlocked on drop.
struct BufferLock<'a> {
    buffer: &'a IMFMediaBuffer,
    data: *mut u8,
    max_len: u32,
}

impl<'a> BufferLock<'a> {
    fn lock(buffer: &'a IMFMediaBuffer) -> CaptureResult<Self> {
        let mut data = std::ptr::null_mut();
        let mut max_len = 0u32;
        unsafe { buffer.Lock(&mut data, Some(&mut max_len), None) }
            .map_err(|error| rejected("lock sample buffer", error))?;
        Ok(Self {
            buffer,
            data,
            max_len,
        })
    }

    fn write(&mut self, bytes: &[u8]) -> CaptureResult<()> {
        if self.data.is_null() || bytes.len() > self.max_len as usize {
            return Err(CaptureError::BufferOverflow);
        }
        // SAFETY: the lock hands out `max_len` writable bytes at `data`.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.data, bytes.len()) };
        Ok(())
    }
}

impl Drop for BufferLock<'_> {
    fn drop(&mut self) {
        if let Err(error) = unsafe { self.buffer.Unlock() } {
            warn!(%error, "IMFMediaBuffer::Unlock failed");
        }
    }
}

fn rejected(stage: &str, error: windows::core::Error) -> CaptureError {
    CaptureError::EncoderRejected(format!("{stage}: {error}"))
}

fn pack(high: u32, low: u32) -> u64 {
    (u64::from(high) << 32) | u64::from(low)
}

fn codec_guid(codec: VideoCodec) -> GUID {
    match codec {
        VideoCodec::Wmv3 => MFVideoFormat_WMV3,
    }
}

fn input_guid(format: VideoInputFormat) -> GUID {
    match format {
        VideoInputFormat::Rgb32 => MFVideoFormat_RGB32,
    }
}

fn video_type(subtype: GUID, media: &MediaTypeSpec) -> windows::core::Result<IMFMediaType> {
    let media_type = unsafe { MFCreateMediaType() }?;
    unsafe {
        media_type.SetGUID(&MF_MT_MAJOR_TYPE, &MFMediaType_Video)?;
        media_type.SetGUID(&MF_MT_SUBTYPE, &subtype)?;
        if media.progressive {
            media_type.SetUINT32(&MF_MT_INTERLACE_MODE, MFVideoInterlace_Progressive.0 as u32)?;
        }
        media_type.SetUINT64(&MF_MT_FRAME_SIZE, pack(media.width, media.height))?;
        media_type.SetUINT64(&MF_MT_FRAME_RATE, pack(media.frame_rate.0, media.frame_rate.1))?;
        media_type.SetUINT64(
            &MF_MT_PIXEL_ASPECT_RATIO,
            pack(media.pixel_aspect.0, media.pixel_aspect.1),
        )?;
    }
    Ok(media_type)
}

/// Media Foundation sink writer producing an ASF/WMV file.
pub struct MediaFoundationWriter {
    path: PathBuf,
    writer: Option<IMFSinkWriter>,
    stream_index: u32,
    sample_len: usize,
    _mf: MfStartupGuard,
    _com: CoInitGuard,
}

impl MediaFoundationWriter {
    /// Start Media Foundation and open a sink writer for `path`. The file
    /// is created when the first media type is negotiated.
    pub fn create(path: impl AsRef<Path>) -> CaptureResult<Self> {
        let path = path.as_ref().to_path_buf();
        let com = CoInitGuard::init_multithreaded()?;
        let mf = MfStartupGuard::start()?;
        let url = HSTRING::from(path.as_os_str());
        let writer = unsafe {
            MFCreateSinkWriterFromURL(&url, None::<&IMFByteStream>, None::<&IMFAttributes>)
        }
        .with_context(|| format!("MFCreateSinkWriterFromURL failed for {}", path.display()))
        .map_err(CaptureError::Platform)?;
        debug!(path = %path.display(), "sink writer created");
        Ok(Self {
            path,
            writer: Some(writer),
            stream_index: 0,
            sample_len: 0,
            _mf: mf,
            _com: com,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&self) -> CaptureResult<&IMFSinkWriter> {
        self.writer
            .as_ref()
            .ok_or_else(|| CaptureError::EncoderRejected("sink writer already finalized".into()))
    }
}

impl VideoWriter for MediaFoundationWriter {
    fn begin(&mut self, media: &MediaTypeSpec) -> CaptureResult<()> {
        let writer = self.writer()?.clone();

        let output = video_type(codec_guid(media.output_subtype), media)
            .map_err(|error| rejected("build output media type", error))?;
        unsafe { output.SetUINT32(&MF_MT_AVG_BITRATE, media.bitrate) }
            .map_err(|error| rejected("set bitrate", error))?;
        let stream_index = unsafe { writer.AddStream(&output) }
            .map_err(|error| rejected("add output stream", error))?;

        let input = video_type(input_guid(media.input_subtype), media)
            .map_err(|error| rejected("build input media type", error))?;
        // Samples arrive top-down, so the stride is positive.
        let stride = media.width.saturating_mul(PixelFormat::BYTES_PER_PIXEL as u32);
        unsafe { input.SetUINT32(&MF_MT_DEFAULT_STRIDE, stride) }
            .map_err(|error| rejected("set input stride", error))?;
        unsafe { writer.SetInputMediaType(stream_index, &input, None::<&IMFAttributes>) }
            .map_err(|error| rejected("set input media type", error))?;

        unsafe { writer.BeginWriting() }.map_err(|error| rejected("begin writing", error))?;

        self.stream_index = stream_index;
        self.sample_len = media.sample_len();
        info!(
            path = %self.path.display(),
            width = media.width,
            height = media.height,
            bitrate = media.bitrate,
            "media foundation stream negotiated"
        );
        Ok(())
    }

    fn write_sample(&mut self, sample: &VideoSample<'_>) -> CaptureResult<()> {
        let writer = self.writer()?.clone();
        if sample.data.len() != self.sample_len {
            return Err(CaptureError::EncoderRejected(format!(
                "sample holds {} bytes, stream expects {}",
                sample.data.len(),
                self.sample_len
            )));
        }
        let len = u32::try_from(sample.data.len()).map_err(|_| CaptureError::BufferOverflow)?;

        let buffer = unsafe { MFCreateMemoryBuffer(len) }
            .map_err(|error| rejected("allocate sample buffer", error))?;
        {
            let mut lock = BufferLock::lock(&buffer)?;
            lock.write(sample.data)?;
        }
        unsafe { buffer.SetCurrentLength(len) }
            .map_err(|error| rejected("set sample length", error))?;

        let media_sample =
            unsafe { MFCreateSample() }.map_err(|error| rejected("create sample", error))?;
        unsafe {
            media_sample
                .AddBuffer(&buffer)
                .map_err(|error| rejected("attach sample buffer", error))?;
            media_sample
                .SetSampleTime(sample.time_hns)
                .map_err(|error| rejected("set sample time", error))?;
            media_sample
                .SetSampleDuration(sample.duration_hns)
                .map_err(|error| rejected("set sample duration", error))?;
            writer
                .WriteSample(self.stream_index, &media_sample)
                .map_err(|error| rejected("write sample", error))?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> CaptureResult<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        unsafe { writer.Finalize() }.map_err(|error| rejected("finalize", error))?;
        info!(path = %self.path.display(), "video file finalized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_packs_width_high() {
        assert_eq!(pack(1920, 1080), (1920u64 << 32) | 1080);
        assert_eq!(pack(25, 1), 0x0000_0019_0000_0001);
    }
}
