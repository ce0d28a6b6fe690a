//! The poll-driven capture loop: acquire, materialize, sink, repeat.
//!
//! Everything runs on the caller's thread. Each tick waits at most the
//! configured acquire timeout (times the acquire retry budget) plus the
//! blocking map of the staging copy. A lost session is recovered in place
//! and the loop carries on with the next tick. Before every tick the
//! caller's pump runs, which is where window messages are drained and the
//! stop key is polled.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, info, warn};

use crate::acquire::{FrameAcquirer, FrameAcquirerConfig, FrameOutcome};
use crate::error::{CaptureError, CaptureResult};
use crate::frame::FrameTimestamp;
use crate::materialize::{MaterializeOptions, Materializer};
use crate::retry::RetryPolicy;
use crate::session::CaptureSession;
use crate::sink::FrameSink;

/// Shared stop request. Cloning hands out another handle to the same flag.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoopState {
    #[default]
    Idle,
    Acquiring,
    Materializing,
    Sinking,
    Recovering,
    Stopped,
}

/// What a single tick achieved.
#[derive(Clone, Copy, Debug)]
pub enum TickOutcome {
    /// A frame reached the sink.
    Delivered(FrameTimestamp),
    /// The acquire budget ran out without a usable frame.
    NoFrame,
    /// The session was lost and has been reopened.
    Recovered,
    /// Stop was requested, the frame limit was hit, or the sink is done.
    Stopped,
}

#[derive(Clone, Copy, Debug)]
pub struct CaptureLoopConfig {
    /// Per-attempt acquire wait.
    pub timeout_ms: u32,
    pub acquirer: FrameAcquirerConfig,
    pub materialize: MaterializeOptions,
    pub recovery: RetryPolicy,
    /// Stop after this many delivered frames.
    pub max_frames: Option<u64>,
}

impl Default for CaptureLoopConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 100,
            acquirer: FrameAcquirerConfig::default(),
            materialize: MaterializeOptions::default(),
            recovery: RetryPolicy::session_recovery(),
            max_frames: None,
        }
    }
}

/// Counters updated by the loop. Readable from any thread through the
/// `Arc` returned by [`CaptureLoop::stats`].
#[derive(Debug, Default)]
pub struct LoopStats {
    pub frames_delivered: AtomicU64,
    /// Ticks that ended without a frame.
    pub idle_ticks: AtomicU64,
    pub sessions_lost: AtomicU64,
    pub recoveries: AtomicU64,
}

impl LoopStats {
    pub fn snapshot(&self) -> LoopStatsSnapshot {
        LoopStatsSnapshot {
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            idle_ticks: self.idle_ticks.load(Ordering::Relaxed),
            sessions_lost: self.sessions_lost.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStatsSnapshot {
    pub frames_delivered: u64,
    pub idle_ticks: u64,
    pub sessions_lost: u64,
    pub recoveries: u64,
}

pub struct CaptureLoop {
    session: CaptureSession,
    acquirer: FrameAcquirer,
    materializer: Materializer,
    sink: FrameSink,
    config: CaptureLoopConfig,
    stop: StopSignal,
    state: LoopState,
    stats: Arc<LoopStats>,
}

impl CaptureLoop {
    pub fn new(session: CaptureSession, sink: FrameSink, config: CaptureLoopConfig) -> Self {
        Self {
            session,
            acquirer: FrameAcquirer::new(config.acquirer),
            materializer: Materializer::new(),
            sink,
            config,
            stop: StopSignal::new(),
            state: LoopState::Idle,
            stats: Arc::new(LoopStats::default()),
        }
    }

    /// Use an existing stop flag, for example one shared with a window.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &Arc<LoopStats> {
        &self.stats
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn sink(&self) -> &FrameSink {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut FrameSink {
        &mut self.sink
    }

    pub fn into_parts(self) -> (CaptureSession, FrameSink) {
        (self.session, self.sink)
    }

    /// Run one acquire → materialize → sink pass.
    ///
    /// Errors are fatal to the loop: after one, the state is `Stopped`.
    /// A lost session that cannot be recovered within the recovery policy
    /// surfaces as [`CaptureError::SessionLost`].
    pub fn tick(&mut self) -> CaptureResult<TickOutcome> {
        if self.state == LoopState::Stopped || self.should_stop() {
            self.state = LoopState::Stopped;
            return Ok(TickOutcome::Stopped);
        }
        let result = self.tick_inner();
        if result.is_err() {
            self.state = LoopState::Stopped;
        }
        result
    }

    /// Tick until stopped. `pump` runs before every tick; returning
    /// `ControlFlow::Break` requests a stop. The sink is finished on every
    /// exit path.
    pub fn run(
        &mut self,
        mut pump: impl FnMut() -> ControlFlow<()>,
    ) -> CaptureResult<LoopStatsSnapshot> {
        info!(
            sink = self.sink.kind(),
            output = self.session.output_index(),
            "capture loop started"
        );
        let result = loop {
            if pump().is_break() {
                self.stop.stop();
            }
            match self.tick() {
                Ok(TickOutcome::Stopped) => break Ok(()),
                Ok(_) => {}
                Err(error) => break Err(error),
            }
        };
        self.state = LoopState::Stopped;
        let finished = self.sink.finish();
        let stats = self.stats.snapshot();
        match &result {
            Ok(()) => info!(?stats, "capture loop stopped"),
            Err(error) => warn!(%error, ?stats, "capture loop stopped on error"),
        }
        result?;
        finished?;
        Ok(stats)
    }

    fn should_stop(&self) -> bool {
        if self.stop.is_stopped() {
            debug!("stop requested");
            return true;
        }
        if let Some(limit) = self.config.max_frames {
            if self.stats.frames_delivered.load(Ordering::Relaxed) >= limit {
                return true;
            }
        }
        !self.sink.wants_more()
    }

    fn tick_inner(&mut self) -> CaptureResult<TickOutcome> {
        self.state = LoopState::Acquiring;
        match self
            .acquirer
            .acquire_next(&mut self.session, self.config.timeout_ms)
        {
            FrameOutcome::TimedOut => {
                self.stats.idle_ticks.fetch_add(1, Ordering::Relaxed);
                return Ok(TickOutcome::NoFrame);
            }
            FrameOutcome::Fatal(error) => return Err(error),
            FrameOutcome::Ready(mut frame) => {
                self.state = LoopState::Materializing;
                let descriptor = frame.descriptor();
                let timestamp = frame.timestamp();
                let materialized = self
                    .materializer
                    .materialize(&mut frame, &self.config.materialize);
                // Hand the frame back before the sink runs so the
                // duplication queue is not held across encoding.
                let released = frame.release();
                let buffer = materialized?;
                match released {
                    Ok(()) | Err(CaptureError::SessionLost) => {}
                    Err(error) => return Err(error),
                }

                self.state = LoopState::Sinking;
                self.sink.accept(&buffer, &descriptor, timestamp)?;
                self.stats.frames_delivered.fetch_add(1, Ordering::Relaxed);
                self.state = LoopState::Acquiring;
                return Ok(TickOutcome::Delivered(timestamp));
            }
            FrameOutcome::SessionLost => {}
        }

        self.state = LoopState::Recovering;
        self.stats.sessions_lost.fetch_add(1, Ordering::Relaxed);
        warn!(output = self.session.output_index(), "desktop duplication lost");
        self.session.recover(&self.config.recovery)?;
        self.stats.recoveries.fetch_add(1, Ordering::Relaxed);
        self.state = LoopState::Acquiring;
        Ok(TickOutcome::Recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameDescriptor, PixelBuffer};
    use crate::sink::FramePresenter;
    use crate::testing::{ScriptedBackend, Step, new_image};

    struct NullPresenter;

    impl FramePresenter for NullPresenter {
        fn present(&mut self, _buffer: &PixelBuffer, _descriptor: &FrameDescriptor) -> CaptureResult<()> {
            Ok(())
        }
    }

    fn instant_config() -> CaptureLoopConfig {
        CaptureLoopConfig {
            timeout_ms: 0,
            recovery: RetryPolicy {
                max_attempts: 3,
                delay: std::time::Duration::ZERO,
                ..RetryPolicy::session_recovery()
            },
            ..CaptureLoopConfig::default()
        }
    }

    fn display_loop(backend: &ScriptedBackend, config: CaptureLoopConfig) -> CaptureResult<CaptureLoop> {
        let session = CaptureSession::builder()
            .with_backend(backend.shared())
            .build()?;
        Ok(CaptureLoop::new(
            session,
            FrameSink::display(Box::new(NullPresenter)),
            config,
        ))
    }

    #[test]
    fn state_starts_idle_and_ends_stopped() -> CaptureResult<()> {
        let backend = ScriptedBackend::new(4, 4);
        backend.push_steps([Step::Frame(new_image())]);
        let mut capture = display_loop(&backend, instant_config())?;
        assert_eq!(capture.state(), LoopState::Idle);
        assert!(matches!(capture.tick()?, TickOutcome::Delivered(_)));
        assert_eq!(capture.state(), LoopState::Acquiring);
        capture.stop_signal().stop();
        assert!(matches!(capture.tick()?, TickOutcome::Stopped));
        assert_eq!(capture.state(), LoopState::Stopped);
        Ok(())
    }

    #[test]
    fn max_frames_stops_the_run() -> CaptureResult<()> {
        let backend = ScriptedBackend::new(4, 4);
        backend.push_steps((0..5).map(|_| Step::Frame(new_image())));
        let config = CaptureLoopConfig {
            max_frames: Some(2),
            ..instant_config()
        };
        let mut capture = display_loop(&backend, config)?;
        let stats = capture.run(|| ControlFlow::Continue(()))?;
        assert_eq!(stats.frames_delivered, 2);
        assert_eq!(backend.acquired(), backend.released());
        Ok(())
    }

    #[test]
    fn pump_break_stops_before_the_next_tick() -> CaptureResult<()> {
        let backend = ScriptedBackend::new(4, 4);
        backend.push_steps((0..5).map(|_| Step::Frame(new_image())));
        let mut capture = display_loop(&backend, instant_config())?;
        let mut pumps = 0;
        let stats = capture.run(|| {
            pumps += 1;
            if pumps > 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
        assert_eq!(stats.frames_delivered, 3);
        Ok(())
    }

    #[test]
    fn unrecoverable_session_stops_with_session_lost() -> CaptureResult<()> {
        let backend = ScriptedBackend::new(4, 4);
        backend.push_steps([Step::Lost]);
        let mut capture = display_loop(&backend, instant_config())?;
        backend.fail_next_opens((0..3).map(|_| CaptureError::SessionLost).collect());
        let result = capture.tick();
        assert!(matches!(result, Err(CaptureError::SessionLost)));
        assert_eq!(capture.state(), LoopState::Stopped);
        Ok(())
    }

    #[test]
    fn fatal_acquire_errors_stop_the_run() -> CaptureResult<()> {
        let backend = ScriptedBackend::new(4, 4);
        backend.push_steps([Step::Fail(CaptureError::Platform(anyhow::anyhow!("device hung")))]);
        let mut capture = display_loop(&backend, instant_config())?;
        let result = capture.run(|| ControlFlow::Continue(()));
        assert!(matches!(result, Err(CaptureError::Platform(_))));
        Ok(())
    }
}
