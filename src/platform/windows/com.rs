use anyhow::Context;
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::System::Com::{
    COINIT, COINIT_APARTMENTTHREADED, COINIT_MULTITHREADED, CoInitializeEx, CoUninitialize,
};

use crate::error::{CaptureError, CaptureResult};

/// Keeps COM initialized on the current thread for as long as it lives.
///
/// If the thread was already initialized in a different apartment the guard
/// piggybacks on that initialization and does not uninitialize on drop.
pub(crate) struct CoInitGuard {
    should_uninit: bool,
}

impl CoInitGuard {
    pub(crate) fn init_multithreaded() -> CaptureResult<Self> {
        Self::init(COINIT_MULTITHREADED, "COINIT_MULTITHREADED")
    }

    /// Window-owning threads use a single-threaded apartment.
    pub(crate) fn init_apartment() -> CaptureResult<Self> {
        Self::init(COINIT_APARTMENTTHREADED, "COINIT_APARTMENTTHREADED")
    }

    fn init(model: COINIT, label: &'static str) -> CaptureResult<Self> {
        let hr = unsafe { CoInitializeEx(None, model) };
        if hr == RPC_E_CHANGED_MODE {
            return Ok(Self {
                should_uninit: false,
            });
        }

        hr.ok()
            .with_context(|| format!("CoInitializeEx({label}) failed"))
            .map_err(CaptureError::Platform)?;
        Ok(Self {
            should_uninit: true,
        })
    }
}

impl Drop for CoInitGuard {
    fn drop(&mut self) {
        if self.should_uninit {
            unsafe {
                CoUninitialize();
            }
        }
    }
}
