use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::{self, DuplicationBackend, DuplicationOutput, OutputInfo};
use crate::error::{CaptureError, CaptureResult};
use crate::frame::FrameDescriptor;
use crate::retry::RetryPolicy;

#[derive(Clone, Copy, Debug, Default)]
pub struct CaptureSessionConfig {
    /// Flat output index across all adapters; 0 is the first output of the
    /// first adapter.
    pub output_index: u32,
}

pub struct CaptureSessionBuilder {
    backend_override: Option<Arc<dyn DuplicationBackend>>,
    config: CaptureSessionConfig,
}

impl CaptureSessionBuilder {
    pub fn new() -> Self {
        Self {
            backend_override: None,
            config: CaptureSessionConfig::default(),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn DuplicationBackend>) -> Self {
        self.backend_override = Some(backend);
        self
    }

    pub fn output_index(mut self, output_index: u32) -> Self {
        self.config.output_index = output_index;
        self
    }

    /// Resolve the backend and duplicate the configured output.
    pub fn build(self) -> CaptureResult<CaptureSession> {
        let backend = match self.backend_override {
            Some(backend) => backend,
            None => backend::default_backend()?,
        };
        crate::convert::warmup();
        let output = open_logged(backend.as_ref(), self.config.output_index)?;
        Ok(CaptureSession {
            backend,
            config: self.config,
            descriptor: output.descriptor(),
            output: Some(output),
            open_count: 1,
        })
    }
}

impl Default for CaptureSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner of one output's duplication handle.
///
/// At most one handle is live at a time: every reopen drops the previous
/// one first. Frames are acquired through [`crate::FrameAcquirer`], which
/// borrows the session mutably for as long as the frame is held.
pub struct CaptureSession {
    backend: Arc<dyn DuplicationBackend>,
    config: CaptureSessionConfig,
    output: Option<Box<dyn DuplicationOutput>>,
    descriptor: FrameDescriptor,
    open_count: u64,
}

impl CaptureSession {
    pub fn builder() -> CaptureSessionBuilder {
        CaptureSessionBuilder::new()
    }

    /// Duplicate output `output_index` on the default platform backend.
    pub fn open(output_index: u32) -> CaptureResult<Self> {
        Self::builder().output_index(output_index).build()
    }

    pub fn output_index(&self) -> u32 {
        self.config.output_index
    }

    pub fn is_open(&self) -> bool {
        self.output.is_some()
    }

    /// Geometry of the frames this session produces.
    ///
    /// After `close()` this still reports the last opened mode; the next
    /// successful reopen replaces it.
    pub fn descriptor(&self) -> FrameDescriptor {
        self.descriptor
    }

    /// Number of successful opens, the initial one included.
    pub fn open_count(&self) -> u64 {
        self.open_count
    }

    pub fn enumerate_outputs(&self) -> CaptureResult<Vec<OutputInfo>> {
        self.backend.enumerate_outputs()
    }

    /// Drop the duplication handle. Idempotent.
    pub fn close(&mut self) {
        if self.output.take().is_some() {
            debug!(output = self.config.output_index, "duplication closed");
        }
    }

    /// Close, then reopen the output with `policy`'s bounded backoff.
    ///
    /// Exhausting the attempts reports [`CaptureError::SessionLost`];
    /// errors the policy does not retry are returned unchanged.
    pub fn recover(&mut self, policy: &RetryPolicy) -> CaptureResult<()> {
        self.close();
        let output = self.config.output_index;
        let result = policy.run(|attempt| {
            info!(output, attempt, "reopening desktop duplication");
            self.reopen()
        });
        match result {
            Ok(()) => Ok(()),
            Err(error) if policy.should_retry(&error) => {
                warn!(
                    output,
                    attempts = policy.attempts(),
                    %error,
                    "desktop duplication could not be recovered"
                );
                Err(CaptureError::SessionLost)
            }
            Err(error) => Err(error),
        }
    }

    fn reopen(&mut self) -> CaptureResult<()> {
        self.close();
        let output = open_logged(self.backend.as_ref(), self.config.output_index)?;
        self.descriptor = output.descriptor();
        self.output = Some(output);
        self.open_count += 1;
        Ok(())
    }

    pub(crate) fn output_mut(&mut self) -> CaptureResult<&mut dyn DuplicationOutput> {
        match self.output.as_mut() {
            Some(output) => Ok(output.as_mut()),
            None => Err(CaptureError::SessionLost),
        }
    }
}

fn open_logged(
    backend: &dyn DuplicationBackend,
    output_index: u32,
) -> CaptureResult<Box<dyn DuplicationOutput>> {
    let output = backend.open_output(output_index)?;
    let descriptor = output.descriptor();
    info!(
        output = output_index,
        width = descriptor.width,
        height = descriptor.height,
        format = descriptor.format.as_str(),
        "desktop duplication opened"
    );
    Ok(output)
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}
