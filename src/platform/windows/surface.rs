use anyhow::Context;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE, D3D11_CPU_ACCESS_READ,
    D3D11_MAP_FLAG_DO_NOT_WAIT, D3D11_MAP_READ,
    D3D11_MAPPED_SUBRESOURCE, D3D11_RESOURCE_MISC_GDI_COMPATIBLE, D3D11_TEXTURE2D_DESC,
    D3D11_USAGE_DEFAULT, D3D11_USAGE_STAGING, ID3D11Device, ID3D11DeviceContext, ID3D11Resource,
    ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
    DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_SAMPLE_DESC,
};
use windows::core::Interface;

use crate::backend::MappedSurface;
use crate::error::{CaptureError, CaptureResult};
use crate::frame::PixelFormat;

pub(crate) fn pixel_format(format: DXGI_FORMAT) -> Option<PixelFormat> {
    match format {
        DXGI_FORMAT_B8G8R8A8_UNORM | DXGI_FORMAT_B8G8R8A8_UNORM_SRGB => Some(PixelFormat::Bgra8),
        DXGI_FORMAT_R8G8B8A8_UNORM => Some(PixelFormat::Rgba8),
        _ => None,
    }
}

/// GDI only draws into BGRA surfaces; copying any other desktop format into
/// one would cross format families.
pub(crate) fn ensure_gdi_drawable(format: DXGI_FORMAT) -> CaptureResult<()> {
    match pixel_format(format) {
        Some(PixelFormat::Bgra8) => Ok(()),
        _ => Err(CaptureError::UnsupportedFormat(format!(
            "cursor overlay needs a BGRA desktop, got DXGI format {}",
            format.0
        ))),
    }
}

/// Which intermediate texture to build for a desktop image.
#[derive(Clone, Copy)]
pub(crate) enum SurfaceKind {
    /// CPU-readable copy target.
    Staging,
    /// Render target that GDI can draw the cursor into.
    GdiCompatible,
}

impl SurfaceKind {
    fn describe(self, width: u32, height: u32, format: DXGI_FORMAT) -> D3D11_TEXTURE2D_DESC {
        let single_sample = DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        };
        match self {
            Self::Staging => D3D11_TEXTURE2D_DESC {
                Width: width,
                Height: height,
                MipLevels: 1,
                ArraySize: 1,
                Format: format,
                SampleDesc: single_sample,
                Usage: D3D11_USAGE_STAGING,
                BindFlags: Default::default(),
                CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
                MiscFlags: Default::default(),
            },
            // GDI interop requires BGRA with render-target binding.
            Self::GdiCompatible => D3D11_TEXTURE2D_DESC {
                Width: width,
                Height: height,
                MipLevels: 1,
                ArraySize: 1,
                Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                SampleDesc: single_sample,
                Usage: D3D11_USAGE_DEFAULT,
                BindFlags: (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0) as u32,
                CPUAccessFlags: 0,
                MiscFlags: D3D11_RESOURCE_MISC_GDI_COMPATIBLE.0 as u32,
            },
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Staging => "staging",
            Self::GdiCompatible => "GDI-compatible",
        }
    }
}

/// Keep `slot` holding a texture of the requested kind matching `src`,
/// recreating it only when the size or format changed.
pub(crate) fn ensure_texture<'a>(
    device: &ID3D11Device,
    slot: &'a mut Option<ID3D11Texture2D>,
    src: &D3D11_TEXTURE2D_DESC,
    kind: SurfaceKind,
) -> CaptureResult<&'a ID3D11Texture2D> {
    let wanted = kind.describe(src.Width, src.Height, src.Format);
    let stale = match slot.as_ref() {
        Some(existing) => {
            let mut desc = D3D11_TEXTURE2D_DESC::default();
            unsafe { existing.GetDesc(&mut desc) };
            desc.Width != wanted.Width || desc.Height != wanted.Height || desc.Format != wanted.Format
        }
        None => true,
    };

    if stale {
        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe { device.CreateTexture2D(&wanted, None, Some(&mut texture)) }
            .with_context(|| format!("failed to create {} texture", kind.label()))
            .map_err(CaptureError::Platform)?;
        *slot = texture;
    }

    slot.as_ref().ok_or_else(|| {
        CaptureError::Platform(anyhow::anyhow!(
            "CreateTexture2D returned no {} texture",
            kind.label()
        ))
    })
}

/// A mapped staging texture. Unmapped on drop.
pub(crate) struct MappedSubresource<'a> {
    context: &'a ID3D11DeviceContext,
    resource: ID3D11Resource,
    mapped: D3D11_MAPPED_SUBRESOURCE,
    desc: D3D11_TEXTURE2D_DESC,
}

impl<'a> MappedSubresource<'a> {
    /// Map `staging` for read. A non-blocking map is tried first; if the GPU
    /// copy has not landed yet the blocking map waits for it.
    pub(crate) fn map(
        context: &'a ID3D11DeviceContext,
        staging: &ID3D11Texture2D,
    ) -> CaptureResult<Self> {
        let resource: ID3D11Resource = staging
            .cast()
            .context("failed to cast staging texture to ID3D11Resource")
            .map_err(CaptureError::Platform)?;
        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { staging.GetDesc(&mut desc) };

        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        let non_blocking = unsafe {
            context.Map(
                &resource,
                0,
                D3D11_MAP_READ,
                D3D11_MAP_FLAG_DO_NOT_WAIT.0 as u32,
                Some(&mut mapped),
            )
        };
        if non_blocking.is_err() {
            mapped = D3D11_MAPPED_SUBRESOURCE::default();
            unsafe { context.Map(&resource, 0, D3D11_MAP_READ, 0, Some(&mut mapped)) }
                .context("failed to map staging texture for read")
                .map_err(CaptureError::Platform)?;
        }

        Ok(Self {
            context,
            resource,
            mapped,
            desc,
        })
    }

    /// Borrow the mapping as a byte view with its row pitch.
    pub(crate) fn surface(&self) -> CaptureResult<MappedSurface<'_>> {
        let format = pixel_format(self.desc.Format)
            .ok_or_else(|| CaptureError::UnsupportedFormat(format!("{:?}", self.desc.Format)))?;
        let row_pitch = self.mapped.RowPitch as usize;
        let width = self.desc.Width;
        let height = self.desc.Height;
        let row_len = (width as usize)
            .checked_mul(PixelFormat::BYTES_PER_PIXEL)
            .ok_or(CaptureError::BufferOverflow)?;
        if row_pitch < row_len {
            return Err(CaptureError::BufferOverflow);
        }
        let len = row_pitch
            .checked_mul((height as usize).saturating_sub(1))
            .and_then(|base| base.checked_add(row_len))
            .ok_or(CaptureError::BufferOverflow)?;
        if self.mapped.pData.is_null() {
            return Err(CaptureError::Platform(anyhow::anyhow!(
                "Map returned a null data pointer"
            )));
        }
        // SAFETY: the runtime guarantees `len` readable bytes behind pData
        // until Unmap, which only happens when `self` drops.
        let data = unsafe { std::slice::from_raw_parts(self.mapped.pData as *const u8, len) };
        Ok(MappedSurface::new(data, row_pitch, width, height, format))
    }
}

impl Drop for MappedSubresource<'_> {
    fn drop(&mut self) {
        unsafe {
            self.context.Unmap(&self.resource, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_bgra_desktops_take_the_cursor_overlay() {
        assert!(ensure_gdi_drawable(DXGI_FORMAT_B8G8R8A8_UNORM).is_ok());
        assert!(ensure_gdi_drawable(DXGI_FORMAT_B8G8R8A8_UNORM_SRGB).is_ok());
        assert!(matches!(
            ensure_gdi_drawable(DXGI_FORMAT_R8G8B8A8_UNORM),
            Err(CaptureError::UnsupportedFormat(_))
        ));
    }
}
