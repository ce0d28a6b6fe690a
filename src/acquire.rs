use std::time::Duration;

use tracing::{trace, warn};

use crate::backend::{AcquireStatus, MappedSurface};
use crate::env_config;
use crate::error::{CaptureError, CaptureResult};
use crate::frame::{FrameDescriptor, FrameInfo, FrameTimestamp};
use crate::retry::RetryPolicy;
use crate::session::CaptureSession;

/// What to do with notifications that carry no new desktop image (only a
/// pointer move or shape change).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NewImagePolicy {
    /// Hand the frame on; the image equals the previous one.
    #[default]
    Accept,
    /// Release it at once and poll again, spending one attempt.
    Skip,
}

/// Pause before re-polling a frame that has not been presented yet.
const UNPRESENTED_FRAME_PAUSE: Duration = Duration::from_millis(1);

/// Result of one [`FrameAcquirer::acquire_next`] call.
#[derive(Debug)]
pub enum FrameOutcome<'s> {
    Ready(AcquiredFrame<'s>),
    /// Every attempt timed out or was skipped. Nothing is held.
    TimedOut,
    /// The duplication handle is gone; the session needs `recover`.
    SessionLost,
    Fatal(CaptureError),
}

impl FrameOutcome<'_> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FrameAcquirerConfig {
    /// Bounds re-polling on timeouts and skipped frames.
    pub retry: RetryPolicy,
    pub new_image_policy: NewImagePolicy,
    /// Treat frames whose present time is zero as not ready yet: release,
    /// pause for a millisecond, and poll again.
    pub require_present_time: bool,
}

impl Default for FrameAcquirerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::acquire_timeouts(),
            new_image_policy: NewImagePolicy::Accept,
            require_present_time: env_config::require_present_time_default(),
        }
    }
}

/// Polls a [`CaptureSession`] for frames and classifies what came back.
#[derive(Debug, Default)]
pub struct FrameAcquirer {
    config: FrameAcquirerConfig,
    next_sequence: u64,
}

impl FrameAcquirer {
    pub fn new(config: FrameAcquirerConfig) -> Self {
        Self {
            config,
            next_sequence: 0,
        }
    }

    pub fn config(&self) -> &FrameAcquirerConfig {
        &self.config
    }

    /// Frames handed out so far.
    pub fn frames_acquired(&self) -> u64 {
        self.next_sequence
    }

    /// Wait up to `timeout_ms` per attempt for the next frame.
    ///
    /// Timeouts, skipped pointer-only frames and unpresented frames each
    /// spend one attempt of the configured retry budget, and are polled
    /// again only while the policy retries [`CaptureError::Timeout`]; a lost
    /// session is reported at once. Frames that are skipped are released before the
    /// next poll, so nothing is held unless the outcome is `Ready`.
    pub fn acquire_next<'s>(
        &mut self,
        session: &'s mut CaptureSession,
        timeout_ms: u32,
    ) -> FrameOutcome<'s> {
        let attempts = self.config.retry.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let status = match session
                .output_mut()
                .and_then(|output| output.acquire_next_frame(timeout_ms))
            {
                Ok(status) => status,
                Err(CaptureError::SessionLost) => return FrameOutcome::SessionLost,
                Err(error) => return FrameOutcome::Fatal(error),
            };

            let pause = match status {
                AcquireStatus::AccessLost => return FrameOutcome::SessionLost,
                AcquireStatus::WaitTimeout => {
                    trace!(attempt, attempts, "acquire timed out");
                    self.config.retry.delay
                }
                AcquireStatus::Ready(info) => match self.screen(&info) {
                    Screen::Keep => {
                        let sequence = self.next_sequence;
                        self.next_sequence += 1;
                        return FrameOutcome::Ready(AcquiredFrame::new(session, info, sequence));
                    }
                    Screen::Drop(pause) => {
                        match session.output_mut().and_then(|output| output.release_frame()) {
                            Ok(()) => {}
                            Err(CaptureError::SessionLost) => return FrameOutcome::SessionLost,
                            Err(error) => return FrameOutcome::Fatal(error),
                        }
                        pause
                    }
                },
            };

            // Skipped and unpresented frames count as "no frame yet".
            if attempt >= attempts || !self.config.retry.should_retry(&CaptureError::Timeout) {
                return FrameOutcome::TimedOut;
            }
            if !pause.is_zero() {
                std::thread::sleep(pause);
            }
        }
    }

    fn screen(&self, info: &FrameInfo) -> Screen {
        if self.config.require_present_time && info.present_time_qpc == 0 {
            trace!("frame not presented yet");
            return Screen::Drop(UNPRESENTED_FRAME_PAUSE);
        }
        if !info.has_new_image && self.config.new_image_policy == NewImagePolicy::Skip {
            trace!("skipping pointer-only frame");
            return Screen::Drop(self.config.retry.delay);
        }
        Screen::Keep
    }
}

enum Screen {
    Keep,
    Drop(Duration),
}

/// A frame held by the duplication output.
///
/// Holding one keeps the session mutably borrowed, so no second acquire can
/// start. The frame goes back to the platform exactly once: through
/// [`AcquiredFrame::release`], or on drop along every other path.
pub struct AcquiredFrame<'s> {
    session: &'s mut CaptureSession,
    info: FrameInfo,
    timestamp: FrameTimestamp,
    released: bool,
}

impl<'s> AcquiredFrame<'s> {
    fn new(session: &'s mut CaptureSession, info: FrameInfo, sequence: u64) -> Self {
        let mut timestamp = FrameTimestamp::now(sequence);
        timestamp.present_time_qpc = (info.present_time_qpc != 0).then_some(info.present_time_qpc);
        Self {
            session,
            info,
            timestamp,
            released: false,
        }
    }

    pub fn info(&self) -> &FrameInfo {
        &self.info
    }

    pub fn timestamp(&self) -> FrameTimestamp {
        self.timestamp
    }

    pub fn descriptor(&self) -> FrameDescriptor {
        self.session.descriptor()
    }

    /// Map the frame for CPU reads and pass the mapping to `visit`.
    pub(crate) fn read(
        &mut self,
        overlay_cursor: bool,
        visit: &mut dyn FnMut(&MappedSurface<'_>) -> CaptureResult<()>,
    ) -> CaptureResult<()> {
        self.session.output_mut()?.read_frame(overlay_cursor, visit)
    }

    /// Hand the frame back to the platform.
    pub fn release(mut self) -> CaptureResult<()> {
        self.released = true;
        self.session.output_mut()?.release_frame()
    }
}

impl Drop for AcquiredFrame<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let result = self
            .session
            .output_mut()
            .and_then(|output| output.release_frame());
        if let Err(error) = result {
            warn!(%error, sequence = self.timestamp.sequence, "failed to release acquired frame");
        }
    }
}

impl std::fmt::Debug for AcquiredFrame<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquiredFrame")
            .field("info", &self.info)
            .field("timestamp", &self.timestamp)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedBackend, Step, new_image, pointer_only};

    fn session_with(backend: &ScriptedBackend) -> CaptureResult<CaptureSession> {
        CaptureSession::builder()
            .with_backend(backend.shared())
            .build()
    }

    fn acquirer(policy: NewImagePolicy, require_present_time: bool) -> FrameAcquirer {
        FrameAcquirer::new(FrameAcquirerConfig {
            retry: RetryPolicy::acquire_timeouts(),
            new_image_policy: policy,
            require_present_time,
        })
    }

    #[test]
    fn dropping_a_ready_frame_releases_it_once() -> CaptureResult<()> {
        let backend = ScriptedBackend::new(4, 4);
        backend.push_steps([Step::Frame(new_image())]);
        let mut session = session_with(&backend)?;
        let mut acquirer = acquirer(NewImagePolicy::Accept, false);
        {
            let outcome = acquirer.acquire_next(&mut session, 0);
            assert!(outcome.is_ready());
        }
        assert_eq!(backend.acquired(), 1);
        assert_eq!(backend.released(), 1);
        Ok(())
    }

    #[test]
    fn explicit_release_is_not_repeated_on_drop() -> CaptureResult<()> {
        let backend = ScriptedBackend::new(4, 4);
        backend.push_steps([Step::Frame(new_image())]);
        let mut session = session_with(&backend)?;
        let mut acquirer = acquirer(NewImagePolicy::Accept, false);
        match acquirer.acquire_next(&mut session, 0) {
            FrameOutcome::Ready(frame) => frame.release()?,
            other => panic!("expected a frame, got {other:?}"),
        }
        assert_eq!(backend.released(), 1);
        Ok(())
    }

    #[test]
    fn timeouts_are_bounded() -> CaptureResult<()> {
        let backend = ScriptedBackend::new(4, 4);
        backend.push_steps((0..10).map(|_| Step::Timeout));
        let mut session = session_with(&backend)?;
        let mut acquirer = acquirer(NewImagePolicy::Accept, false);
        assert!(matches!(
            acquirer.acquire_next(&mut session, 0),
            FrameOutcome::TimedOut
        ));
        // Four attempts per call; the second call drains four more.
        assert!(matches!(
            acquirer.acquire_next(&mut session, 0),
            FrameOutcome::TimedOut
        ));
        assert_eq!(backend.acquired(), 0);
        Ok(())
    }

    #[test]
    fn predicate_that_refuses_timeouts_polls_once() -> CaptureResult<()> {
        let backend = ScriptedBackend::new(4, 4);
        backend.push_steps([Step::Timeout, Step::Frame(new_image())]);
        let mut session = session_with(&backend)?;
        let mut acquirer = FrameAcquirer::new(FrameAcquirerConfig {
            retry: RetryPolicy::acquire_timeouts().with_predicate(|_| false),
            new_image_policy: NewImagePolicy::Accept,
            require_present_time: false,
        });
        assert!(matches!(
            acquirer.acquire_next(&mut session, 0),
            FrameOutcome::TimedOut
        ));
        // The queued frame was left for the next call.
        assert!(acquirer.acquire_next(&mut session, 0).is_ready());
        Ok(())
    }

    #[test]
    fn timeout_then_frame_within_budget_is_ready() -> CaptureResult<()> {
        let backend = ScriptedBackend::new(4, 4);
        backend.push_steps([Step::Timeout, Step::Timeout, Step::Frame(new_image())]);
        let mut session = session_with(&backend)?;
        let mut acquirer = acquirer(NewImagePolicy::Accept, false);
        let outcome = acquirer.acquire_next(&mut session, 0);
        assert!(outcome.is_ready());
        Ok(())
    }

    #[test]
    fn access_lost_is_reported_without_retrying() -> CaptureResult<()> {
        let backend = ScriptedBackend::new(4, 4);
        backend.push_steps([Step::Lost, Step::Frame(new_image())]);
        let mut session = session_with(&backend)?;
        let mut acquirer = acquirer(NewImagePolicy::Accept, false);
        assert!(matches!(
            acquirer.acquire_next(&mut session, 0),
            FrameOutcome::SessionLost
        ));
        assert_eq!(backend.acquired(), 0);
        Ok(())
    }

    #[test]
    fn platform_failures_are_fatal() -> CaptureResult<()> {
        let backend = ScriptedBackend::new(4, 4);
        backend.push_steps([Step::Fail(CaptureError::Platform(anyhow::anyhow!(
            "device removed"
        )))]);
        let mut session = session_with(&backend)?;
        let mut acquirer = acquirer(NewImagePolicy::Accept, false);
        assert!(matches!(
            acquirer.acquire_next(&mut session, 0),
            FrameOutcome::Fatal(CaptureError::Platform(_))
        ));
        Ok(())
    }

    #[test]
    fn skip_policy_releases_pointer_only_frames() -> CaptureResult<()> {
        let backend = ScriptedBackend::new(4, 4);
        backend.push_steps([Step::Frame(pointer_only()), Step::Frame(new_image())]);
        let mut session = session_with(&backend)?;
        let mut acquirer = acquirer(NewImagePolicy::Skip, false);
        match acquirer.acquire_next(&mut session, 0) {
            FrameOutcome::Ready(frame) => {
                assert!(frame.info().has_new_image);
                assert_eq!(frame.timestamp().sequence, 0);
            }
            other => panic!("expected a frame, got {other:?}"),
        }
        assert_eq!(backend.acquired(), 2);
        assert_eq!(backend.released(), 2);
        Ok(())
    }

    #[test]
    fn accept_policy_keeps_pointer_only_frames() -> CaptureResult<()> {
        let backend = ScriptedBackend::new(4, 4);
        backend.push_steps([Step::Frame(pointer_only())]);
        let mut session = session_with(&backend)?;
        let mut acquirer = acquirer(NewImagePolicy::Accept, false);
        match acquirer.acquire_next(&mut session, 0) {
            FrameOutcome::Ready(frame) => {
                assert!(!frame.info().has_new_image);
                assert_eq!(frame.timestamp().present_time_qpc, None);
            }
            other => panic!("expected a frame, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn unpresented_frames_are_retried_when_required() -> CaptureResult<()> {
        let backend = ScriptedBackend::new(4, 4);
        let unpresented = FrameInfo {
            present_time_qpc: 0,
            ..new_image()
        };
        backend.push_steps([Step::Frame(unpresented), Step::Frame(new_image())]);
        let mut session = session_with(&backend)?;
        let mut acquirer = acquirer(NewImagePolicy::Accept, true);
        match acquirer.acquire_next(&mut session, 0) {
            FrameOutcome::Ready(frame) => {
                assert_eq!(frame.timestamp().present_time_qpc, Some(1));
            }
            other => panic!("expected a frame, got {other:?}"),
        }
        assert_eq!(backend.released(), 2);
        Ok(())
    }
}
