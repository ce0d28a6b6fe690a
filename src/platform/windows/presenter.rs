use std::borrow::Cow;

use anyhow::Context;
use tracing::debug;
use windows::Win32::Foundation::{BOOL, HWND};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BOX, D3D11_TEXTURE2D_DESC, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_UNKNOWN, DXGI_MODE_DESC, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    DXGI_PRESENT, DXGI_SWAP_CHAIN_DESC, DXGI_SWAP_CHAIN_FLAG, DXGI_SWAP_EFFECT_DISCARD,
    DXGI_USAGE_RENDER_TARGET_OUTPUT, IDXGIFactory1, IDXGISwapChain,
};

use crate::convert;
use crate::error::{CaptureError, CaptureResult};
use crate::frame::{FrameDescriptor, PixelBuffer, PixelFormat, RowOrder};
use crate::sink::FramePresenter;

use super::app::AppContext;
use super::d3d11;

/// Puts frames into a window through a DXGI swap chain. Each frame is
/// uploaded straight into the back buffer, clipped to whichever of the two
/// is smaller, and presented with vsync.
pub struct SwapChainPresenter {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    swap_chain: IDXGISwapChain,
}

impl SwapChainPresenter {
    pub fn new(app: &AppContext) -> CaptureResult<Self> {
        let (width, height) = app.client_size()?;
        Self::for_window(app.hwnd(), width.max(1), height.max(1))
    }

    pub fn for_window(hwnd: HWND, width: u32, height: u32) -> CaptureResult<Self> {
        let created = d3d11::create_device(None)?;
        let factory: IDXGIFactory1 = unsafe { created.adapter()?.GetParent() }
            .context("failed to get the DXGI factory of the presenter device")
            .map_err(CaptureError::Platform)?;

        let desc = DXGI_SWAP_CHAIN_DESC {
            BufferDesc: DXGI_MODE_DESC {
                Width: width,
                Height: height,
                Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                ..Default::default()
            },
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: 1,
            OutputWindow: hwnd,
            Windowed: BOOL::from(true),
            SwapEffect: DXGI_SWAP_EFFECT_DISCARD,
            Flags: 0,
        };
        let mut swap_chain: Option<IDXGISwapChain> = None;
        unsafe { factory.CreateSwapChain(&created.device, &desc, &mut swap_chain) }
            .ok()
            .context("CreateSwapChain failed")
            .map_err(CaptureError::Platform)?;
        let swap_chain = swap_chain
            .context("CreateSwapChain did not return a swap chain")
            .map_err(CaptureError::Platform)?;
        debug!(width, height, "swap chain created");

        Ok(Self {
            device: created.device,
            context: created.context,
            swap_chain,
        })
    }

    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }
}

/// Bring a buffer into the back buffer's layout: top-down BGRA.
fn as_back_buffer_layout(buffer: &PixelBuffer) -> CaptureResult<Cow<'_, PixelBuffer>> {
    let frame = if buffer.row_order() == RowOrder::TopDown {
        Cow::Borrowed(buffer)
    } else {
        Cow::Owned(buffer.with_row_order(RowOrder::TopDown))
    };
    if frame.format() == PixelFormat::Bgra8 {
        return Ok(frame);
    }
    let (width, height) = frame.dimensions();
    let mut bytes = frame.into_owned().into_bytes();
    convert::swizzle_bgra_rgba_in_place(&mut bytes);
    let swizzled =
        PixelBuffer::from_raw(width, height, PixelFormat::Bgra8, RowOrder::TopDown, bytes)?;
    Ok(Cow::Owned(swizzled))
}

impl FramePresenter for SwapChainPresenter {
    fn present(
        &mut self,
        buffer: &PixelBuffer,
        _descriptor: &FrameDescriptor,
    ) -> CaptureResult<()> {
        let frame = as_back_buffer_layout(buffer)?;
        let back: ID3D11Texture2D = unsafe { self.swap_chain.GetBuffer(0) }
            .context("IDXGISwapChain::GetBuffer failed")
            .map_err(CaptureError::Platform)?;
        let mut back_desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { back.GetDesc(&mut back_desc) };

        let region = D3D11_BOX {
            left: 0,
            top: 0,
            front: 0,
            right: frame.width().min(back_desc.Width),
            bottom: frame.height().min(back_desc.Height),
            back: 1,
        };
        let stride = u32::try_from(frame.stride()).map_err(|_| CaptureError::BufferOverflow)?;
        unsafe {
            self.context.UpdateSubresource(
                &back,
                0,
                Some(&region),
                frame.as_bytes().as_ptr().cast(),
                stride,
                0,
            );
        }
        unsafe { self.swap_chain.Present(1, DXGI_PRESENT(0)) }
            .ok()
            .context("IDXGISwapChain::Present failed")
            .map_err(CaptureError::Platform)
    }

    fn resize(&mut self, width: u32, height: u32) -> CaptureResult<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        unsafe {
            self.swap_chain.ResizeBuffers(
                0,
                width,
                height,
                DXGI_FORMAT_UNKNOWN,
                DXGI_SWAP_CHAIN_FLAG(0),
            )
        }
        .context("IDXGISwapChain::ResizeBuffers failed")
        .map_err(CaptureError::Platform)?;
        debug!(width, height, "swap chain resized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba_bottom_up_becomes_bgra_top_down() -> CaptureResult<()> {
        let data = vec![
            1, 2, 3, 4, //
            5, 6, 7, 8,
        ];
        let buffer = PixelBuffer::from_raw(1, 2, PixelFormat::Rgba8, RowOrder::BottomUp, data)?;
        let laid_out = as_back_buffer_layout(&buffer)?;
        assert_eq!(laid_out.format(), PixelFormat::Bgra8);
        assert_eq!(laid_out.row_order(), RowOrder::TopDown);
        assert_eq!(laid_out.as_bytes(), &[7, 6, 5, 8, 3, 2, 1, 4]);
        Ok(())
    }

    #[test]
    fn bgra_top_down_is_borrowed() -> CaptureResult<()> {
        let buffer =
            PixelBuffer::from_raw(1, 1, PixelFormat::Bgra8, RowOrder::TopDown, vec![0; 4])?;
        assert!(matches!(as_back_buffer_layout(&buffer)?, Cow::Borrowed(_)));
        Ok(())
    }
}
