pub mod acquire;
pub mod backend;
pub mod capture_loop;
pub mod convert;
pub(crate) mod env_config;
pub mod error;
pub mod frame;
pub mod materialize;
mod platform;
pub mod region;
pub mod retry;
pub mod session;
pub mod sink;

#[cfg(test)]
pub(crate) mod testing;

/// Default file the recording demo writes.
pub const DEFAULT_VIDEO_PATH: &str = "output.wmv";
/// Default file the screenshot demo writes.
pub const DEFAULT_SCREENSHOT_PATH: &str = "SCREENSHOT.PNG";

pub use acquire::{AcquiredFrame, FrameAcquirer, FrameAcquirerConfig, FrameOutcome, NewImagePolicy};
pub use backend::{DuplicationBackend, DuplicationOutput, OutputInfo};
pub use capture_loop::{
    CaptureLoop, CaptureLoopConfig, LoopState, LoopStats, LoopStatsSnapshot, StopSignal,
    TickOutcome,
};
pub use error::{CaptureError, CaptureErrorClass, CaptureResult};
pub use frame::{FrameDescriptor, FrameInfo, FrameTimestamp, PixelBuffer, PixelFormat, RowOrder};
pub use materialize::{MaterializeOptions, Materializer};
pub use region::CropRect;
pub use retry::RetryPolicy;
pub use session::{CaptureSession, CaptureSessionBuilder, CaptureSessionConfig};
pub use sink::{FrameSink, ImageContainer, VideoSinkConfig};

#[cfg(target_os = "windows")]
pub use platform::windows::{AppContext, MediaFoundationWriter, SwapChainPresenter};

/// Capture one frame from output `output_index` as a top-down buffer.
pub fn capture_once(output_index: u32) -> CaptureResult<PixelBuffer> {
    let mut session = CaptureSession::open(output_index)?;
    let config = FrameAcquirerConfig {
        retry: RetryPolicy {
            max_attempts: 10,
            ..RetryPolicy::acquire_timeouts()
        },
        require_present_time: true,
        ..FrameAcquirerConfig::default()
    };
    let mut acquirer = FrameAcquirer::new(config);
    let outcome = acquirer.acquire_next(&mut session, 500);
    match outcome {
        FrameOutcome::Ready(mut frame) => {
            let buffer = Materializer::new().materialize(&mut frame, &MaterializeOptions::default())?;
            frame.release()?;
            Ok(buffer)
        }
        FrameOutcome::TimedOut => Err(CaptureError::Timeout),
        FrameOutcome::SessionLost => Err(CaptureError::SessionLost),
        FrameOutcome::Fatal(error) => Err(error),
    }
}
