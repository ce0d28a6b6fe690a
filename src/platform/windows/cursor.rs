//! Cursor compositing through GDI.
//!
//! Duplicated desktop images never contain the hardware cursor. To bake it
//! in, the frame is copied into a GDI-compatible texture, the current cursor
//! icon is drawn into that texture's device context, and the result is read
//! back as usual.

use anyhow::Context;
use tracing::trace;
use windows::Win32::Foundation::{BOOL, POINT};
use windows::Win32::Graphics::Direct3D11::ID3D11Texture2D;
use windows::Win32::Graphics::Dxgi::IDXGISurface1;
use windows::Win32::Graphics::Gdi::{DeleteObject, HBRUSH, HDC, HGDIOBJ};
use windows::Win32::UI::WindowsAndMessaging::{
    CURSOR_SHOWING, CURSORINFO, DI_DEFAULTSIZE, DI_NORMAL, DrawIconEx, GetCursorInfo, GetIconInfo,
    HICON, ICONINFO,
};
use windows::core::Interface;

use crate::error::{CaptureError, CaptureResult};

/// Device context of a GDI-compatible surface. Released on drop.
struct SurfaceDc {
    surface: IDXGISurface1,
    hdc: HDC,
}

impl SurfaceDc {
    fn acquire(texture: &ID3D11Texture2D) -> CaptureResult<Self> {
        let surface: IDXGISurface1 = texture
            .cast()
            .context("failed to query IDXGISurface1 from the GDI-compatible texture")
            .map_err(CaptureError::Platform)?;
        let hdc = unsafe { surface.GetDC(BOOL::from(false)) }
            .context("IDXGISurface1::GetDC failed")
            .map_err(CaptureError::Platform)?;
        Ok(Self { surface, hdc })
    }
}

impl Drop for SurfaceDc {
    fn drop(&mut self) {
        if let Err(error) = unsafe { self.surface.ReleaseDC(None) } {
            tracing::warn!(%error, "IDXGISurface1::ReleaseDC failed");
        }
    }
}

/// Icon bitmaps handed out by `GetIconInfo`. Both are deleted on drop.
struct IconInfo(ICONINFO);

impl IconInfo {
    fn query(icon: HICON) -> CaptureResult<Self> {
        let mut info = ICONINFO::default();
        unsafe { GetIconInfo(icon, &mut info) }
            .context("GetIconInfo failed")
            .map_err(CaptureError::Platform)?;
        Ok(Self(info))
    }

    fn hotspot(&self) -> (i32, i32) {
        (self.0.xHotspot as i32, self.0.yHotspot as i32)
    }
}

impl Drop for IconInfo {
    fn drop(&mut self) {
        unsafe {
            if !self.0.hbmMask.is_invalid() {
                let _ = DeleteObject(HGDIOBJ(self.0.hbmMask.0));
            }
            if !self.0.hbmColor.is_invalid() {
                let _ = DeleteObject(HGDIOBJ(self.0.hbmColor.0));
            }
        }
    }
}

/// Where the cursor icon's top-left corner lands in output space.
pub(crate) fn icon_origin(screen: POINT, desktop_origin: (i32, i32), hotspot: (i32, i32)) -> (i32, i32) {
    (
        screen.x - desktop_origin.0 - hotspot.0,
        screen.y - desktop_origin.1 - hotspot.1,
    )
}

/// Draw the current cursor into `texture`, which must be GDI-compatible.
/// Returns `false` without touching the texture when the cursor is hidden.
pub(crate) fn draw_cursor(
    texture: &ID3D11Texture2D,
    desktop_origin: (i32, i32),
) -> CaptureResult<bool> {
    let mut cursor = CURSORINFO {
        cbSize: std::mem::size_of::<CURSORINFO>() as u32,
        ..Default::default()
    };
    unsafe { GetCursorInfo(&mut cursor) }
        .context("GetCursorInfo failed")
        .map_err(CaptureError::Platform)?;
    if cursor.flags.0 & CURSOR_SHOWING.0 == 0 || cursor.hCursor.is_invalid() {
        return Ok(false);
    }

    let icon = HICON(cursor.hCursor.0);
    let icon_info = IconInfo::query(icon)?;
    let (x, y) = icon_origin(cursor.ptScreenPos, desktop_origin, icon_info.hotspot());

    let dc = SurfaceDc::acquire(texture)?;
    unsafe {
        DrawIconEx(
            dc.hdc,
            x,
            y,
            icon,
            0,
            0,
            0,
            HBRUSH::default(),
            DI_NORMAL | DI_DEFAULTSIZE,
        )
    }
    .context("DrawIconEx failed")
    .map_err(CaptureError::Platform)?;
    trace!(x, y, "cursor composited");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icon_origin_is_output_local() {
        let screen = POINT { x: 2000, y: 300 };
        assert_eq!(icon_origin(screen, (1920, 0), (4, 2)), (76, 298));
    }
}
