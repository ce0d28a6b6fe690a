use std::sync::Arc;

use crate::backend::DuplicationBackend;
#[cfg(not(target_os = "windows"))]
use crate::backend::{DuplicationOutput, OutputInfo};
#[cfg(not(target_os = "windows"))]
use crate::error::CaptureError;
use crate::error::CaptureResult;

#[cfg(target_os = "windows")]
pub(crate) mod windows;

#[cfg(not(target_os = "windows"))]
fn unsupported_error() -> CaptureError {
    CaptureError::Platform(anyhow::anyhow!(
        "desktop duplication is only supported on Windows"
    ))
}

#[cfg(not(target_os = "windows"))]
struct UnsupportedBackend;

#[cfg(not(target_os = "windows"))]
impl DuplicationBackend for UnsupportedBackend {
    fn enumerate_outputs(&self) -> CaptureResult<Vec<OutputInfo>> {
        Err(unsupported_error())
    }

    fn open_output(&self, _index: u32) -> CaptureResult<Box<dyn DuplicationOutput>> {
        Err(unsupported_error())
    }
}

#[cfg(target_os = "windows")]
pub(crate) fn build_backend() -> CaptureResult<Arc<dyn DuplicationBackend>> {
    Ok(Arc::new(windows::WindowsBackend::new()))
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn build_backend() -> CaptureResult<Arc<dyn DuplicationBackend>> {
    Ok(Arc::new(UnsupportedBackend))
}
