use std::cell::Cell;
use std::ops::ControlFlow;

use anyhow::Context;
use tracing::{debug, info};
use windows::Win32::Foundation::{HINSTANCE, HWND, LPARAM, LRESULT, RECT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::Input::KeyboardAndMouse::{GetAsyncKeyState, VK_ESCAPE};
use windows::Win32::UI::WindowsAndMessaging::{
    CREATESTRUCTW, CW_USEDEFAULT, CreateWindowExW, DefWindowProcW, DestroyWindow,
    DispatchMessageW, GWLP_USERDATA, GetClientRect, GetWindowLongPtrW, IDC_ARROW, IsWindow,
    LoadCursorW, MSG, PM_REMOVE, PeekMessageW, PostQuitMessage, RegisterClassW, SW_SHOW,
    SetWindowLongPtrW, ShowWindow, TranslateMessage, UnregisterClassW, WM_CLOSE, WM_CREATE,
    WM_DESTROY, WM_QUIT, WM_SIZE, WNDCLASSW, WS_OVERLAPPEDWINDOW,
};
use windows::core::PCWSTR;

use crate::capture_loop::StopSignal;
use crate::error::{CaptureError, CaptureResult};

use super::com::CoInitGuard;

/// Top bit of `GetAsyncKeyState`: the key is down right now.
const KEY_DOWN: u16 = 0x8000;

/// State the window procedure reaches through `GWLP_USERDATA`.
struct WindowState {
    stop: StopSignal,
    pending_resize: Cell<Option<(u32, u32)>>,
}

fn to_wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(std::iter::once(0)).collect()
}

/// The window, its class and the message pump that feed the capture loop.
///
/// Escape and closing the window both set the [`StopSignal`]. Must be used
/// from the thread that created it.
pub struct AppContext {
    class_name: Vec<u16>,
    instance: HINSTANCE,
    hwnd: HWND,
    state: Box<WindowState>,
    _com: CoInitGuard,
}

impl AppContext {
    /// Register a window class and show a `width` x `height` window titled
    /// `title`.
    pub fn new(title: &str, width: u32, height: u32) -> CaptureResult<Self> {
        let com = CoInitGuard::init_apartment()?;
        let instance: HINSTANCE = unsafe { GetModuleHandleW(None) }
            .context("GetModuleHandleW failed")
            .map_err(CaptureError::Platform)?
            .into();

        let class_name = to_wide(&format!("snow-dupl-{}-{title}", std::process::id()));
        let cursor = unsafe { LoadCursorW(None, IDC_ARROW) }
            .context("LoadCursorW failed")
            .map_err(CaptureError::Platform)?;
        let class = WNDCLASSW {
            lpfnWndProc: Some(app_wnd_proc),
            hInstance: instance,
            hCursor: cursor,
            lpszClassName: PCWSTR(class_name.as_ptr()),
            ..Default::default()
        };
        if unsafe { RegisterClassW(&class) } == 0 {
            return Err(CaptureError::Platform(
                anyhow::Error::from(windows::core::Error::from_win32())
                    .context("RegisterClassW failed"),
            ));
        }

        let state = Box::new(WindowState {
            stop: StopSignal::new(),
            pending_resize: Cell::new(None),
        });
        let title_wide = to_wide(title);
        let to_i32 = |value: u32| i32::try_from(value).unwrap_or(i32::MAX);
        let created = unsafe {
            CreateWindowExW(
                Default::default(),
                PCWSTR(class_name.as_ptr()),
                PCWSTR(title_wide.as_ptr()),
                WS_OVERLAPPEDWINDOW,
                CW_USEDEFAULT,
                CW_USEDEFAULT,
                to_i32(width),
                to_i32(height),
                None,
                None,
                instance,
                Some(&*state as *const WindowState as *const std::ffi::c_void),
            )
        };
        let hwnd = match created {
            Ok(hwnd) => hwnd,
            Err(error) => {
                let _ = unsafe { UnregisterClassW(PCWSTR(class_name.as_ptr()), instance) };
                return Err(CaptureError::Platform(
                    anyhow::Error::from(error).context("CreateWindowExW failed"),
                ));
            }
        };
        unsafe {
            let _ = ShowWindow(hwnd, SW_SHOW);
        }
        info!(title, width, height, "application window created");

        Ok(Self {
            class_name,
            instance,
            hwnd,
            state,
            _com: com,
        })
    }

    pub fn hwnd(&self) -> HWND {
        self.hwnd
    }

    /// Another handle to the flag Escape and window close set.
    pub fn stop_signal(&self) -> StopSignal {
        self.state.stop.clone()
    }

    pub fn client_size(&self) -> CaptureResult<(u32, u32)> {
        let mut rect = RECT::default();
        unsafe { GetClientRect(self.hwnd, &mut rect) }
            .context("GetClientRect failed")
            .map_err(CaptureError::Platform)?;
        Ok((
            rect.right.saturating_sub(rect.left).max(0) as u32,
            rect.bottom.saturating_sub(rect.top).max(0) as u32,
        ))
    }

    /// The most recent client size reported by `WM_SIZE` since the last call.
    pub fn take_resize(&self) -> Option<(u32, u32)> {
        self.state.pending_resize.take()
    }

    /// Drain pending window messages, then poll Escape. Breaks once a stop
    /// has been requested.
    pub fn pump(&self) -> ControlFlow<()> {
        let mut msg = MSG::default();
        unsafe {
            while PeekMessageW(&mut msg, HWND::default(), 0, 0, PM_REMOVE).as_bool() {
                if msg.message == WM_QUIT {
                    self.state.stop.stop();
                    break;
                }
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }

        let escape = unsafe { GetAsyncKeyState(i32::from(VK_ESCAPE.0)) } as u16;
        if escape & KEY_DOWN != 0 {
            debug!("escape pressed");
            self.state.stop.stop();
        }

        if self.state.stop.is_stopped() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        unsafe {
            if IsWindow(self.hwnd).as_bool() {
                SetWindowLongPtrW(self.hwnd, GWLP_USERDATA, 0);
                let _ = DestroyWindow(self.hwnd);
            }
            let _ = UnregisterClassW(PCWSTR(self.class_name.as_ptr()), self.instance);
        }
    }
}

unsafe extern "system" fn app_wnd_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let state = unsafe { GetWindowLongPtrW(hwnd, GWLP_USERDATA) } as *const WindowState;
    match msg {
        WM_CREATE => {
            let create = unsafe { &*(lparam.0 as *const CREATESTRUCTW) };
            unsafe {
                SetWindowLongPtrW(hwnd, GWLP_USERDATA, create.lpCreateParams as isize);
            }
            LRESULT(0)
        }
        WM_SIZE => {
            if !state.is_null() {
                let width = (lparam.0 as u32) & 0xFFFF;
                let height = ((lparam.0 as u32) >> 16) & 0xFFFF;
                unsafe { &*state }.pending_resize.set(Some((width, height)));
            }
            LRESULT(0)
        }
        WM_CLOSE => {
            if !state.is_null() {
                unsafe { &*state }.stop.stop();
            }
            unsafe {
                let _ = DestroyWindow(hwnd);
            }
            LRESULT(0)
        }
        WM_DESTROY => {
            unsafe {
                SetWindowLongPtrW(hwnd, GWLP_USERDATA, 0);
                PostQuitMessage(0);
            }
            LRESULT(0)
        }
        _ => unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) },
    }
}
