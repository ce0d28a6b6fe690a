pub(crate) mod app;
pub(crate) mod com;
pub(crate) mod cursor;
pub(crate) mod d3d11;
pub(crate) mod duplication;
pub(crate) mod media_foundation;
pub(crate) mod output;
pub(crate) mod presenter;
pub(crate) mod surface;

pub use app::AppContext;
pub use media_foundation::MediaFoundationWriter;
pub use presenter::SwapChainPresenter;

use tracing::debug;

use crate::backend::{DuplicationBackend, DuplicationOutput, OutputInfo};
use crate::error::{CaptureError, CaptureResult};

/// DXGI desktop duplication. Outputs are re-enumerated on every open so a
/// recovery after a mode change sees the current topology.
pub(crate) struct WindowsBackend;

impl WindowsBackend {
    pub(crate) fn new() -> Self {
        Self
    }
}

impl DuplicationBackend for WindowsBackend {
    fn enumerate_outputs(&self) -> CaptureResult<Vec<OutputInfo>> {
        Ok(output::enumerate_resolved()?
            .into_iter()
            .map(|resolved| resolved.info)
            .collect())
    }

    fn open_output(&self, index: u32) -> CaptureResult<Box<dyn DuplicationOutput>> {
        let resolved = output::resolve(index)?;
        if !resolved.info.attached {
            return Err(CaptureError::OutputUnavailable(format!(
                "{} is not attached to the desktop",
                resolved.info.name
            )));
        }
        debug!(index, output = %resolved.info.name, "opening output");
        Ok(Box::new(duplication::WindowsDuplicationOutput::open(&resolved)?))
    }
}
