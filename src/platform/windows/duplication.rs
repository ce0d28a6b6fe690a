use anyhow::Context;
use tracing::{debug, info};
use windows::Win32::Foundation::{E_ACCESSDENIED, E_INVALIDARG};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_TEXTURE2D_DESC, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_NOT_CURRENTLY_AVAILABLE, DXGI_ERROR_SESSION_DISCONNECTED,
    DXGI_ERROR_UNSUPPORTED, DXGI_ERROR_WAIT_TIMEOUT, DXGI_OUTDUPL_DESC, DXGI_OUTDUPL_FRAME_INFO,
    IDXGIOutput, IDXGIOutput1, IDXGIOutputDuplication, IDXGIResource,
};
use windows::core::Interface;

use crate::backend::{AcquireStatus, DuplicationOutput, MappedSurface};
use crate::error::{CaptureError, CaptureResult};
use crate::frame::{FrameDescriptor, FrameInfo, PointerPosition};

use super::cursor;
use super::d3d11::{self, Device};
use super::output::{self, ResolvedOutput};
use super::surface::{self, MappedSubresource, SurfaceKind};

fn create_duplication(
    output: &IDXGIOutput,
    device: &ID3D11Device,
    name: &str,
) -> CaptureResult<IDXGIOutputDuplication> {
    let output1: IDXGIOutput1 = output
        .cast()
        .context("failed to query IDXGIOutput1")
        .map_err(CaptureError::Platform)?;
    unsafe { output1.DuplicateOutput(device) }.map_err(|error| {
        let code = error.code();
        if code == E_ACCESSDENIED
            || code == DXGI_ERROR_UNSUPPORTED
            || code == DXGI_ERROR_NOT_CURRENTLY_AVAILABLE
            || code == DXGI_ERROR_SESSION_DISCONNECTED
            || code == E_INVALIDARG
        {
            CaptureError::OutputUnavailable(format!("{name} cannot be duplicated: {error}"))
        } else {
            CaptureError::Platform(
                anyhow::Error::from(error).context(format!("DuplicateOutput failed for {name}")),
            )
        }
    })
}

/// Pointer positions reported here are already output-local.
fn frame_info(raw: &DXGI_OUTDUPL_FRAME_INFO) -> FrameInfo {
    let pointer = (raw.LastMouseUpdateTime != 0).then(|| PointerPosition {
        x: raw.PointerPosition.Position.x,
        y: raw.PointerPosition.Position.y,
        visible: raw.PointerPosition.Visible.as_bool(),
    });
    FrameInfo {
        has_new_image: raw.LastPresentTime != 0 || raw.AccumulatedFrames > 0,
        present_time_qpc: raw.LastPresentTime,
        accumulated_frames: raw.AccumulatedFrames,
        pointer,
    }
}

/// Desktop duplication of a single output on its own device.
pub(crate) struct WindowsDuplicationOutput {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    duplication: IDXGIOutputDuplication,
    descriptor: FrameDescriptor,
    /// The desktop texture of the frame currently held, if any.
    acquired: Option<ID3D11Texture2D>,
    staging: Option<ID3D11Texture2D>,
    gdi_surface: Option<ID3D11Texture2D>,
}

impl WindowsDuplicationOutput {
    pub(crate) fn open(resolved: &ResolvedOutput) -> CaptureResult<Self> {
        let created = d3d11::create_device(Some(&resolved.adapter))?;
        let adapter = created.adapter()?;
        let Device {
            device,
            context,
            feature_level,
            driver,
        } = created;
        let dxgi_output = unsafe { adapter.EnumOutputs(resolved.local_index) }.map_err(|error| {
            CaptureError::OutputUnavailable(format!(
                "{} is not reachable from the {} device: {error}",
                resolved.info.name,
                d3d11::driver_name(driver)
            ))
        })?;

        let duplication = create_duplication(&dxgi_output, &device, &resolved.info.name)?;

        let mut dupl_desc = DXGI_OUTDUPL_DESC::default();
        unsafe { duplication.GetDesc(&mut dupl_desc) };
        let format = surface::pixel_format(dupl_desc.ModeDesc.Format).ok_or_else(|| {
            CaptureError::UnsupportedFormat(format!("{:?}", dupl_desc.ModeDesc.Format))
        })?;

        let output_desc = output::output_desc(&dxgi_output)?;
        let bounds = output::bounds_from_desc(&output_desc);
        let descriptor = FrameDescriptor::new(
            dupl_desc.ModeDesc.Width,
            dupl_desc.ModeDesc.Height,
            format,
        )?
        .with_rotation(output::rotation_from_dxgi(dupl_desc.Rotation))
        .with_desktop_origin(bounds.left, bounds.top);

        info!(
            output = %resolved.info.name,
            width = descriptor.width,
            height = descriptor.height,
            driver = d3d11::driver_name(driver),
            feature_level = feature_level.0,
            "desktop duplication started"
        );

        Ok(Self {
            device,
            context,
            duplication,
            descriptor,
            acquired: None,
            staging: None,
            gdi_surface: None,
        })
    }

    fn held_texture(&self) -> CaptureResult<ID3D11Texture2D> {
        self.acquired.clone().ok_or_else(|| {
            CaptureError::InvalidConfig("read_frame called with no acquired frame".to_string())
        })
    }

    /// Copy the held frame into the GDI surface and draw the cursor there.
    /// Returns the texture the staging copy should read from.
    fn composite_cursor(&mut self, source: &ID3D11Texture2D) -> CaptureResult<ID3D11Texture2D> {
        let mut src_desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { source.GetDesc(&mut src_desc) };
        surface::ensure_gdi_drawable(src_desc.Format)?;
        let gdi = surface::ensure_texture(
            &self.device,
            &mut self.gdi_surface,
            &src_desc,
            SurfaceKind::GdiCompatible,
        )?
        .clone();
        unsafe { self.context.CopyResource(&gdi, source) };
        cursor::draw_cursor(&gdi, self.descriptor.desktop_origin)?;
        Ok(gdi)
    }
}

impl DuplicationOutput for WindowsDuplicationOutput {
    fn descriptor(&self) -> FrameDescriptor {
        self.descriptor
    }

    fn acquire_next_frame(&mut self, timeout_ms: u32) -> CaptureResult<AcquireStatus> {
        let mut raw = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;
        let acquired =
            unsafe { self.duplication.AcquireNextFrame(timeout_ms, &mut raw, &mut resource) };
        if let Err(error) = acquired {
            if error.code() == DXGI_ERROR_WAIT_TIMEOUT {
                return Ok(AcquireStatus::WaitTimeout);
            }
            if error.code() == DXGI_ERROR_ACCESS_LOST {
                debug!("AcquireNextFrame reported access lost");
                return Ok(AcquireStatus::AccessLost);
            }
            return Err(CaptureError::Platform(
                anyhow::Error::from(error).context("AcquireNextFrame failed"),
            ));
        }

        let texture = match resource.map(|resource| resource.cast::<ID3D11Texture2D>()) {
            Some(Ok(texture)) => texture,
            Some(Err(error)) => {
                unsafe { self.duplication.ReleaseFrame() }.ok();
                return Err(CaptureError::Platform(
                    anyhow::Error::from(error)
                        .context("failed to cast acquired IDXGIResource to ID3D11Texture2D"),
                ));
            }
            None => {
                unsafe { self.duplication.ReleaseFrame() }.ok();
                return Ok(AcquireStatus::WaitTimeout);
            }
        };
        self.acquired = Some(texture);
        Ok(AcquireStatus::Ready(frame_info(&raw)))
    }

    fn release_frame(&mut self) -> CaptureResult<()> {
        self.acquired = None;
        match unsafe { self.duplication.ReleaseFrame() } {
            Ok(()) => Ok(()),
            Err(error) if error.code() == DXGI_ERROR_ACCESS_LOST => Err(CaptureError::SessionLost),
            Err(error) => Err(CaptureError::Platform(
                anyhow::Error::from(error).context("ReleaseFrame failed"),
            )),
        }
    }

    fn read_frame(
        &mut self,
        overlay_cursor: bool,
        visit: &mut dyn FnMut(&MappedSurface<'_>) -> CaptureResult<()>,
    ) -> CaptureResult<()> {
        let desktop = self.held_texture()?;
        let source = if overlay_cursor {
            self.composite_cursor(&desktop)?
        } else {
            desktop
        };

        let mut src_desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { source.GetDesc(&mut src_desc) };
        let staging = surface::ensure_texture(
            &self.device,
            &mut self.staging,
            &src_desc,
            SurfaceKind::Staging,
        )?
        .clone();
        unsafe { self.context.CopyResource(&staging, &source) };

        let mapped = MappedSubresource::map(&self.context, &staging)?;
        let view = mapped.surface()?;
        visit(&view)
    }
}

impl Drop for WindowsDuplicationOutput {
    fn drop(&mut self) {
        if self.acquired.take().is_some() {
            unsafe { self.duplication.ReleaseFrame() }.ok();
        }
        debug!(
            width = self.descriptor.width,
            height = self.descriptor.height,
            "desktop duplication closed"
        );
    }
}
