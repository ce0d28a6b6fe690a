use anyhow::Context;
use tracing::debug;
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE, D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_REFERENCE,
    D3D_DRIVER_TYPE_UNKNOWN, D3D_DRIVER_TYPE_WARP, D3D_FEATURE_LEVEL, D3D_FEATURE_LEVEL_9_1,
    D3D_FEATURE_LEVEL_10_0, D3D_FEATURE_LEVEL_10_1, D3D_FEATURE_LEVEL_11_0,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_CREATE_DEVICE_SINGLETHREADED, D3D11_SDK_VERSION,
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext,
};
use windows::Win32::Graphics::Dxgi::{IDXGIAdapter, IDXGIDevice};
use windows::core::Interface;

use crate::error::{CaptureError, CaptureResult};

/// Feature levels requested from every driver, highest first.
pub(crate) const FEATURE_LEVELS: [D3D_FEATURE_LEVEL; 4] = [
    D3D_FEATURE_LEVEL_11_0,
    D3D_FEATURE_LEVEL_10_1,
    D3D_FEATURE_LEVEL_10_0,
    D3D_FEATURE_LEVEL_9_1,
];

/// Driver types tried after the output's own adapter, in order.
pub(crate) const FALLBACK_DRIVERS: [D3D_DRIVER_TYPE; 3] = [
    D3D_DRIVER_TYPE_HARDWARE,
    D3D_DRIVER_TYPE_WARP,
    D3D_DRIVER_TYPE_REFERENCE,
];

pub(crate) struct Device {
    pub device: ID3D11Device,
    pub context: ID3D11DeviceContext,
    pub feature_level: D3D_FEATURE_LEVEL,
    pub driver: D3D_DRIVER_TYPE,
}

impl Device {
    /// The adapter the device was actually created on. For the fallback
    /// drivers this is what `EnumOutputs` must be called on.
    pub(crate) fn adapter(&self) -> CaptureResult<IDXGIAdapter> {
        let dxgi_device: IDXGIDevice = self
            .device
            .cast()
            .context("failed to query IDXGIDevice from the D3D11 device")
            .map_err(CaptureError::Platform)?;
        unsafe { dxgi_device.GetAdapter() }
            .context("IDXGIDevice::GetAdapter failed")
            .map_err(CaptureError::Platform)
    }
}

/// Create a device for duplication work.
///
/// With a `preferred` adapter, that adapter is tried first; afterwards the
/// default adapter is tried with hardware, WARP and reference drivers.
pub(crate) fn create_device(preferred: Option<&IDXGIAdapter>) -> CaptureResult<Device> {
    let mut failures = Vec::new();

    if let Some(adapter) = preferred {
        match create_with(Some(adapter), D3D_DRIVER_TYPE_UNKNOWN) {
            Ok(device) => return Ok(device),
            Err(error) => failures.push(format!("adapter: {error:#}")),
        }
    }

    for driver in FALLBACK_DRIVERS {
        match create_with(None, driver) {
            Ok(device) => return Ok(device),
            Err(error) => failures.push(format!("{}: {error:#}", driver_name(driver))),
        }
    }

    Err(CaptureError::DeviceUnavailable(failures.join("; ")))
}

fn create_with(adapter: Option<&IDXGIAdapter>, driver: D3D_DRIVER_TYPE) -> anyhow::Result<Device> {
    let mut device: Option<ID3D11Device> = None;
    let mut context: Option<ID3D11DeviceContext> = None;
    let mut feature_level = D3D_FEATURE_LEVEL::default();

    // Duplication only touches the device from the capture thread.
    let flags = D3D11_CREATE_DEVICE_BGRA_SUPPORT | D3D11_CREATE_DEVICE_SINGLETHREADED;

    unsafe {
        D3D11CreateDevice(
            adapter,
            driver,
            None,
            flags,
            Some(&FEATURE_LEVELS),
            D3D11_SDK_VERSION,
            Some(&mut device),
            Some(&mut feature_level),
            Some(&mut context),
        )
    }
    .with_context(|| format!("D3D11CreateDevice({}) failed", driver_name(driver)))?;

    let device = device.context("D3D11CreateDevice did not return a device")?;
    let context = context.context("D3D11CreateDevice did not return a device context")?;
    debug!(
        driver = driver_name(driver),
        feature_level = feature_level.0,
        "created D3D11 device"
    );
    Ok(Device {
        device,
        context,
        feature_level,
        driver,
    })
}

pub(crate) fn driver_name(driver: D3D_DRIVER_TYPE) -> &'static str {
    match driver {
        D3D_DRIVER_TYPE_UNKNOWN => "adapter",
        D3D_DRIVER_TYPE_HARDWARE => "hardware",
        D3D_DRIVER_TYPE_WARP => "warp",
        D3D_DRIVER_TYPE_REFERENCE => "reference",
        _ => "other",
    }
}
