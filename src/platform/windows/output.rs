use anyhow::Context;
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_MODE_ROTATION, DXGI_MODE_ROTATION_ROTATE90, DXGI_MODE_ROTATION_ROTATE180,
    DXGI_MODE_ROTATION_ROTATE270,
};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory1, DXGI_ERROR_NOT_FOUND, DXGI_OUTPUT_DESC, IDXGIAdapter, IDXGIFactory1,
    IDXGIOutput,
};
use windows::core::Interface;

use crate::backend::{DesktopBounds, OutputInfo};
use crate::error::{CaptureError, CaptureResult};
use crate::frame::OutputRotation;

/// An output located during enumeration, with the handles needed to
/// duplicate it.
pub(crate) struct ResolvedOutput {
    pub info: OutputInfo,
    pub adapter: IDXGIAdapter,
    /// Index of the output on its own adapter.
    pub local_index: u32,
}

fn utf16z_to_string(input: &[u16]) -> String {
    let len = input.iter().position(|&c| c == 0).unwrap_or(input.len());
    String::from_utf16_lossy(&input[..len])
}

pub(crate) fn rotation_from_dxgi(rotation: DXGI_MODE_ROTATION) -> OutputRotation {
    match rotation {
        DXGI_MODE_ROTATION_ROTATE90 => OutputRotation::Rotate90,
        DXGI_MODE_ROTATION_ROTATE180 => OutputRotation::Rotate180,
        DXGI_MODE_ROTATION_ROTATE270 => OutputRotation::Rotate270,
        _ => OutputRotation::Identity,
    }
}

pub(crate) fn bounds_from_desc(desc: &DXGI_OUTPUT_DESC) -> DesktopBounds {
    let rect = desc.DesktopCoordinates;
    DesktopBounds {
        left: rect.left,
        top: rect.top,
        right: rect.right,
        bottom: rect.bottom,
    }
}

pub(crate) fn output_desc(output: &IDXGIOutput) -> CaptureResult<DXGI_OUTPUT_DESC> {
    unsafe { output.GetDesc() }
        .context("IDXGIOutput::GetDesc failed")
        .map_err(CaptureError::Platform)
}

/// Walk every adapter and every output on it. Indices are flat across
/// adapters in enumeration order.
pub(crate) fn enumerate_resolved() -> CaptureResult<Vec<ResolvedOutput>> {
    let factory: IDXGIFactory1 = unsafe { CreateDXGIFactory1() }
        .context("CreateDXGIFactory1 failed")
        .map_err(CaptureError::Platform)?;

    let mut outputs = Vec::new();
    let mut adapter_index = 0u32;

    loop {
        let adapter1 = match unsafe { factory.EnumAdapters1(adapter_index) } {
            Ok(adapter) => adapter,
            Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
            Err(e) => {
                return Err(CaptureError::Platform(
                    anyhow::Error::from(e)
                        .context(format!("EnumAdapters1({adapter_index}) failed")),
                ));
            }
        };
        let adapter: IDXGIAdapter = adapter1
            .cast()
            .context("failed to cast IDXGIAdapter1 to IDXGIAdapter")
            .map_err(CaptureError::Platform)?;

        let mut local_index = 0u32;
        loop {
            let output = match unsafe { adapter.EnumOutputs(local_index) } {
                Ok(output) => output,
                Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
                Err(e) => {
                    return Err(CaptureError::Platform(anyhow::Error::from(e).context(
                        format!("EnumOutputs({local_index}) on adapter {adapter_index} failed"),
                    )));
                }
            };
            let desc = output_desc(&output)?;
            let index = u32::try_from(outputs.len()).map_err(|_| CaptureError::BufferOverflow)?;
            outputs.push(ResolvedOutput {
                info: OutputInfo {
                    index,
                    adapter_index,
                    name: utf16z_to_string(&desc.DeviceName),
                    desktop_bounds: bounds_from_desc(&desc),
                    attached: desc.AttachedToDesktop.as_bool(),
                    rotation: rotation_from_dxgi(desc.Rotation),
                },
                adapter: adapter.clone(),
                local_index,
            });
            local_index += 1;
        }

        adapter_index += 1;
    }

    Ok(outputs)
}

pub(crate) fn resolve(index: u32) -> CaptureResult<ResolvedOutput> {
    let outputs = enumerate_resolved()?;
    let count = outputs.len();
    outputs
        .into_iter()
        .find(|output| output.info.index == index)
        .ok_or_else(|| {
            CaptureError::OutputUnavailable(format!(
                "output {index} does not exist ({count} outputs found)"
            ))
        })
}
