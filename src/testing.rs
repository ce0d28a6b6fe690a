//! Scripted duplication backend shared by the unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::backend::{
    AcquireStatus, DesktopBounds, DuplicationBackend, DuplicationOutput, MappedSurface,
    OutputInfo,
};
use crate::error::{CaptureError, CaptureResult};
use crate::frame::{FrameDescriptor, FrameInfo, OutputRotation, PixelFormat};

pub(crate) enum Step {
    Frame(FrameInfo),
    Timeout,
    Lost,
    Fail(CaptureError),
}

pub(crate) fn new_image() -> FrameInfo {
    FrameInfo {
        has_new_image: true,
        present_time_qpc: 1,
        accumulated_frames: 1,
        pointer: None,
    }
}

pub(crate) fn pointer_only() -> FrameInfo {
    FrameInfo {
        has_new_image: false,
        present_time_qpc: 0,
        accumulated_frames: 0,
        pointer: None,
    }
}

struct MockState {
    width: u32,
    height: u32,
    row_pitch: usize,
    pixels: Vec<u8>,
    steps: VecDeque<Step>,
    open_failures: VecDeque<CaptureError>,
    open_attempts: u32,
    opens: u32,
    acquired: u32,
    released: u32,
    outstanding: bool,
    overlay_reads: u32,
}

#[derive(Clone)]
pub(crate) struct ScriptedBackend {
    state: Arc<Mutex<MockState>>,
}

impl ScriptedBackend {
    /// Single-output backend whose frame stores `(x, y)` in the first two
    /// bytes of every pixel.
    pub(crate) fn new(width: u32, height: u32) -> Self {
        let row_pitch = width as usize * 4;
        let mut pixels = vec![0u8; row_pitch * height as usize];
        for (y, row) in pixels.chunks_exact_mut(row_pitch).enumerate() {
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                px.copy_from_slice(&[x as u8, y as u8, 0, 255]);
            }
        }
        Self::with_pixels(width, height, row_pitch, pixels)
    }

    pub(crate) fn with_pixels(width: u32, height: u32, row_pitch: usize, pixels: Vec<u8>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                width,
                height,
                row_pitch,
                pixels,
                steps: VecDeque::new(),
                open_failures: VecDeque::new(),
                open_attempts: 0,
                opens: 0,
                acquired: 0,
                released: 0,
                outstanding: false,
                overlay_reads: 0,
            })),
        }
    }

    pub(crate) fn shared(&self) -> Arc<dyn DuplicationBackend> {
        Arc::new(self.clone())
    }

    pub(crate) fn push_steps(&self, steps: impl IntoIterator<Item = Step>) {
        self.lock().steps.extend(steps);
    }

    pub(crate) fn fail_next_opens(&self, errors: Vec<CaptureError>) {
        self.lock().open_failures.extend(errors);
    }

    pub(crate) fn opens(&self) -> u32 {
        self.lock().opens
    }

    pub(crate) fn open_attempts(&self) -> u32 {
        self.lock().open_attempts
    }

    pub(crate) fn acquired(&self) -> u32 {
        self.lock().acquired
    }

    pub(crate) fn released(&self) -> u32 {
        self.lock().released
    }

    pub(crate) fn overlay_reads(&self) -> u32 {
        self.lock().overlay_reads
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

impl DuplicationBackend for ScriptedBackend {
    fn enumerate_outputs(&self) -> CaptureResult<Vec<OutputInfo>> {
        let state = self.lock();
        Ok(vec![OutputInfo {
            index: 0,
            adapter_index: 0,
            name: "\\\\.\\DISPLAY1".into(),
            desktop_bounds: DesktopBounds {
                left: 0,
                top: 0,
                right: state.width as i32,
                bottom: state.height as i32,
            },
            attached: true,
            rotation: OutputRotation::Identity,
        }])
    }

    fn open_output(&self, index: u32) -> CaptureResult<Box<dyn DuplicationOutput>> {
        let mut state = self.lock();
        state.open_attempts += 1;
        if index != 0 {
            return Err(CaptureError::OutputUnavailable(format!(
                "output {index} not found"
            )));
        }
        if let Some(error) = state.open_failures.pop_front() {
            return Err(error);
        }
        state.opens += 1;
        let descriptor = FrameDescriptor::new(state.width, state.height, PixelFormat::Bgra8)?;
        Ok(Box::new(ScriptedOutput {
            state: Arc::clone(&self.state),
            descriptor,
        }))
    }
}

struct ScriptedOutput {
    state: Arc<Mutex<MockState>>,
    descriptor: FrameDescriptor,
}

impl DuplicationOutput for ScriptedOutput {
    fn descriptor(&self) -> FrameDescriptor {
        self.descriptor
    }

    fn acquire_next_frame(&mut self, _timeout_ms: u32) -> CaptureResult<AcquireStatus> {
        let mut state = self.state.lock().unwrap();
        assert!(!state.outstanding, "acquire while a frame is still held");
        match state.steps.pop_front() {
            None | Some(Step::Timeout) => Ok(AcquireStatus::WaitTimeout),
            Some(Step::Lost) => Ok(AcquireStatus::AccessLost),
            Some(Step::Fail(error)) => Err(error),
            Some(Step::Frame(info)) => {
                state.acquired += 1;
                state.outstanding = true;
                Ok(AcquireStatus::Ready(info))
            }
        }
    }

    fn release_frame(&mut self) -> CaptureResult<()> {
        let mut state = self.state.lock().unwrap();
        assert!(state.outstanding, "release without a held frame");
        state.outstanding = false;
        state.released += 1;
        Ok(())
    }

    fn read_frame(
        &mut self,
        overlay_cursor: bool,
        visit: &mut dyn FnMut(&MappedSurface<'_>) -> CaptureResult<()>,
    ) -> CaptureResult<()> {
        let mut state = self.state.lock().unwrap();
        assert!(state.outstanding, "read without a held frame");
        if overlay_cursor {
            state.overlay_reads += 1;
        }
        let surface = MappedSurface::new(
            &state.pixels,
            state.row_pitch,
            state.width,
            state.height,
            PixelFormat::Bgra8,
        );
        visit(&surface)
    }
}
