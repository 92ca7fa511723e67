//! Win32 backend: GDI capture, `SendInput` injection, clipboard
//! access via the Win32 clipboard API.
//!
//! Capture uses a BitBlt from the display DC into a DIB section and
//! compresses the raw BGRA with zstd; the viewer decompresses using
//! the dimensions carried on the frame. Clipboard change detection
//! polls `GetClipboardSequenceNumber`, which avoids owning a message
//! pump in a service process.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use remora_core::{
    CaptureRegion, CursorKind, CursorState, FrameGrabber, InputSink, MonitorInfo, MonitorSource,
    MouseButton, PixelBuffer, RemoraError,
};

use windows::Win32::Foundation::{HWND, LPARAM, RECT};
use windows::Win32::Graphics::Gdi::*;
use windows::Win32::System::DataExchange::*;
use windows::Win32::System::Memory::*;
use windows::Win32::UI::Input::KeyboardAndMouse::*;
use windows::Win32::UI::WindowsAndMessaging::*;
use windows::core::PCWSTR;

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

// ── Monitor enumeration ──────────────────────────────────────────

/// Enumerates displays with `EnumDisplayMonitors`.
pub struct GdiMonitorSource;

impl GdiMonitorSource {
    pub fn new() -> Self {
        Self
    }
}

unsafe extern "system" fn enum_monitor(
    monitor: HMONITOR,
    _dc: HDC,
    _rect: *mut RECT,
    lparam: LPARAM,
) -> windows::Win32::Foundation::BOOL {
    let out = unsafe { &mut *(lparam.0 as *mut Vec<MonitorInfo>) };

    let mut info = MONITORINFOEXW::default();
    info.monitorInfo.cbSize = std::mem::size_of::<MONITORINFOEXW>() as u32;
    if unsafe { GetMonitorInfoW(monitor, &mut info.monitorInfo) }.as_bool() {
        let rect = info.monitorInfo.rcMonitor;
        let name_len = info
            .szDevice
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(info.szDevice.len());
        out.push(MonitorInfo {
            device_name: String::from_utf16_lossy(&info.szDevice[..name_len]),
            x: rect.left,
            y: rect.top,
            width: (rect.right - rect.left).max(0) as u32,
            height: (rect.bottom - rect.top).max(0) as u32,
            is_primary: info.monitorInfo.dwFlags & MONITORINFOF_PRIMARY != 0,
        });
    }
    true.into()
}

impl MonitorSource for GdiMonitorSource {
    fn enumerate(&mut self) -> Result<Vec<MonitorInfo>, RemoraError> {
        let mut monitors: Vec<MonitorInfo> = Vec::new();
        let ok = unsafe {
            EnumDisplayMonitors(
                None,
                None,
                Some(enum_monitor),
                LPARAM(&mut monitors as *mut _ as isize),
            )
        };
        if !ok.as_bool() {
            return Err(RemoraError::Other("EnumDisplayMonitors failed".into()));
        }
        // Primary first, matching user expectations for index 0.
        monitors.sort_by_key(|m| !m.is_primary);
        Ok(monitors)
    }
}

// ── Frame capture ────────────────────────────────────────────────

/// BitBlt-based capturer with zstd compression.
pub struct GdiFrameGrabber;

impl GdiFrameGrabber {
    pub fn new() -> Self {
        Self
    }

    fn grab(&self, device: &str, region: CaptureRegion) -> Result<PixelBuffer, RemoraError> {
        let width = region.width as i32;
        let height = region.height as i32;
        if width <= 0 || height <= 0 {
            return Err(RemoraError::CaptureFailure("empty capture region".into()));
        }

        unsafe {
            let name = wide(device);
            let screen_dc = CreateDCW(
                PCWSTR(name.as_ptr()),
                PCWSTR(name.as_ptr()),
                PCWSTR::null(),
                None,
            );
            if screen_dc.is_invalid() {
                return Err(RemoraError::CaptureFailure(format!(
                    "CreateDCW failed for {device}"
                )));
            }

            let mem_dc = CreateCompatibleDC(screen_dc);
            let bitmap = CreateCompatibleBitmap(screen_dc, width, height);
            let old = SelectObject(mem_dc, bitmap);

            let result = BitBlt(
                mem_dc,
                0,
                0,
                width,
                height,
                screen_dc,
                region.x,
                region.y,
                SRCCOPY | CAPTUREBLT,
            );

            let buffer = if result.is_ok() {
                let mut info = BITMAPINFO {
                    bmiHeader: BITMAPINFOHEADER {
                        biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                        biWidth: width,
                        // Negative height: top-down row order.
                        biHeight: -height,
                        biPlanes: 1,
                        biBitCount: 32,
                        biCompression: BI_RGB.0,
                        ..Default::default()
                    },
                    ..Default::default()
                };
                let stride = (width * 4) as u32;
                let mut data = vec![0u8; (stride * height as u32) as usize];
                let lines = GetDIBits(
                    mem_dc,
                    bitmap,
                    0,
                    height as u32,
                    Some(data.as_mut_ptr() as *mut _),
                    &mut info,
                    DIB_RGB_COLORS,
                );
                if lines == height {
                    Ok(PixelBuffer {
                        width: region.width,
                        height: region.height,
                        stride,
                        data,
                    })
                } else {
                    Err(RemoraError::CaptureFailure("GetDIBits truncated".into()))
                }
            } else {
                Err(RemoraError::CaptureFailure("BitBlt failed".into()))
            };

            SelectObject(mem_dc, old);
            let _ = DeleteObject(bitmap);
            let _ = DeleteDC(mem_dc);
            let _ = DeleteDC(screen_dc);

            buffer
        }
    }

    fn cursor(&self) -> Result<CursorState, RemoraError> {
        unsafe {
            let mut info = CURSORINFO {
                cbSize: std::mem::size_of::<CURSORINFO>() as u32,
                ..Default::default()
            };
            GetCursorInfo(&mut info)
                .map_err(|e| RemoraError::Other(format!("GetCursorInfo: {e}")))?;

            let kind = classify_cursor(info.hCursor);
            Ok(CursorState {
                x: info.ptScreenPos.x,
                y: info.ptScreenPos.y,
                visible: info.flags == CURSOR_SHOWING,
                kind,
            })
        }
    }
}

/// Map a cursor handle onto the coarse shape taxonomy by comparing
/// against the standard system cursors.
fn classify_cursor(cursor: HCURSOR) -> CursorKind {
    let load = |id| unsafe { LoadCursorW(None, id).ok() };
    let matches = |id| load(id).is_some_and(|h| h == cursor);

    if matches(IDC_HAND) {
        CursorKind::Hand
    } else if matches(IDC_IBEAM) {
        CursorKind::Text
    } else if matches(IDC_CROSS) {
        CursorKind::Cross
    } else if matches(IDC_SIZEALL) {
        CursorKind::Move
    } else if matches(IDC_WAIT) {
        CursorKind::Wait
    } else {
        CursorKind::Default
    }
}

/// zstd level for a 0–100 quality parameter: lower quality buys
/// heavier compression.
fn zstd_level(quality: u8) -> i32 {
    ((100 - quality as i32) / 10).clamp(1, 19)
}

#[async_trait]
impl FrameGrabber for GdiFrameGrabber {
    async fn capture_region(
        &mut self,
        device: &str,
        region: CaptureRegion,
    ) -> Result<PixelBuffer, RemoraError> {
        self.grab(device, region)
    }

    async fn encode(&mut self, buffer: &PixelBuffer, quality: u8) -> Result<Vec<u8>, RemoraError> {
        zstd::bulk::compress(&buffer.data, zstd_level(quality))
            .map_err(|e| RemoraError::Encoding(format!("zstd: {e}")))
    }

    async fn query_cursor(&mut self) -> Result<CursorState, RemoraError> {
        self.cursor()
    }
}

// ── Input injection ──────────────────────────────────────────────

/// Injects events with `SendInput`. Requires the process to run in
/// the interactive desktop session.
pub struct SendInputSink;

impl SendInputSink {
    pub fn new() -> Self {
        Self
    }

    fn send(&self, input: INPUT) -> Result<(), RemoraError> {
        let sent = unsafe { SendInput(&[input], std::mem::size_of::<INPUT>() as i32) };
        if sent == 1 {
            Ok(())
        } else {
            Err(RemoraError::Other("SendInput rejected the event".into()))
        }
    }

    fn mouse(&self, x: i32, y: i32, flags: MOUSE_EVENT_FLAGS, data: i32) -> Result<(), RemoraError> {
        let (w, h) = unsafe { (GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN)) };
        if w == 0 || h == 0 {
            return Err(RemoraError::Other("GetSystemMetrics returned 0".into()));
        }
        let input = INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx: (x as i64 * 65535 / w as i64) as i32,
                    dy: (y as i64 * 65535 / h as i64) as i32,
                    mouseData: data as u32,
                    dwFlags: flags | MOUSEEVENTF_ABSOLUTE,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        };
        self.send(input)
    }

    fn key(&self, key: &str, up: bool) -> Result<(), RemoraError> {
        let vk = map_key(key).ok_or(RemoraError::UnsupportedInput("unmapped key name"))?;
        let input = INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: vk,
                    wScan: 0,
                    dwFlags: if up { KEYEVENTF_KEYUP } else { KEYBD_EVENT_FLAGS(0) },
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        };
        self.send(input)
    }

    fn unicode(&self, unit: u16, up: bool) -> Result<(), RemoraError> {
        let mut flags = KEYEVENTF_UNICODE;
        if up {
            flags |= KEYEVENTF_KEYUP;
        }
        let input = INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: VIRTUAL_KEY(0),
                    wScan: unit,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        };
        self.send(input)
    }
}

/// Platform-neutral key name → virtual key. Single characters fall
/// back to the keyboard-layout mapping.
fn map_key(key: &str) -> Option<VIRTUAL_KEY> {
    let vk = match key {
        "Enter" => VK_RETURN,
        "Escape" => VK_ESCAPE,
        "Backspace" => VK_BACK,
        "Tab" => VK_TAB,
        "Space" | " " => VK_SPACE,
        "Shift" => VK_SHIFT,
        "Control" => VK_CONTROL,
        "Alt" => VK_MENU,
        "Meta" => VK_LWIN,
        "CapsLock" => VK_CAPITAL,
        "Delete" => VK_DELETE,
        "Insert" => VK_INSERT,
        "Home" => VK_HOME,
        "End" => VK_END,
        "PageUp" => VK_PRIOR,
        "PageDown" => VK_NEXT,
        "ArrowUp" => VK_UP,
        "ArrowDown" => VK_DOWN,
        "ArrowLeft" => VK_LEFT,
        "ArrowRight" => VK_RIGHT,
        "F1" => VK_F1,
        "F2" => VK_F2,
        "F3" => VK_F3,
        "F4" => VK_F4,
        "F5" => VK_F5,
        "F6" => VK_F6,
        "F7" => VK_F7,
        "F8" => VK_F8,
        "F9" => VK_F9,
        "F10" => VK_F10,
        "F11" => VK_F11,
        "F12" => VK_F12,
        _ => {
            let mut chars = key.chars();
            let c = chars.next()?;
            if chars.next().is_some() {
                return None;
            }
            let scan = unsafe { VkKeyScanW(c as u16) };
            if scan == -1 {
                return None;
            }
            VIRTUAL_KEY((scan & 0xFF) as u16)
        }
    };
    Some(vk)
}

impl InputSink for SendInputSink {
    fn move_cursor(&mut self, x: i32, y: i32) -> Result<(), RemoraError> {
        self.mouse(x, y, MOUSEEVENTF_MOVE, 0)
    }

    fn click(
        &mut self,
        x: i32,
        y: i32,
        button: MouseButton,
        pressed: bool,
    ) -> Result<(), RemoraError> {
        let flags = match (button, pressed) {
            (MouseButton::Left, true) => MOUSEEVENTF_LEFTDOWN,
            (MouseButton::Left, false) => MOUSEEVENTF_LEFTUP,
            (MouseButton::Middle, true) => MOUSEEVENTF_MIDDLEDOWN,
            (MouseButton::Middle, false) => MOUSEEVENTF_MIDDLEUP,
            (MouseButton::Right, true) => MOUSEEVENTF_RIGHTDOWN,
            (MouseButton::Right, false) => MOUSEEVENTF_RIGHTUP,
        };
        self.mouse(x, y, flags, 0)
    }

    fn wheel(&mut self, x: i32, y: i32, delta: i32) -> Result<(), RemoraError> {
        self.mouse(x, y, MOUSEEVENTF_WHEEL, delta)
    }

    fn key_down(&mut self, key: &str) -> Result<(), RemoraError> {
        self.key(key, false)
    }

    fn key_up(&mut self, key: &str) -> Result<(), RemoraError> {
        self.key(key, true)
    }

    fn insert_text(&mut self, text: &str) -> Result<(), RemoraError> {
        for unit in text.encode_utf16() {
            self.unicode(unit, false)?;
            self.unicode(unit, true)?;
        }
        Ok(())
    }
}

// ── Clipboard ────────────────────────────────────────────────────

/// Win32 clipboard access, text formats only.
///
/// Change detection polls `GetClipboardSequenceNumber` from a plain
/// thread; the hook thread exits when the stop flag flips.
pub struct Win32Clipboard {
    hook_stop: Option<Arc<AtomicBool>>,
    hook_thread: Option<std::thread::JoinHandle<()>>,
}

impl Win32Clipboard {
    pub fn new() -> Self {
        Self {
            hook_stop: None,
            hook_thread: None,
        }
    }

    fn read_unicode_text(&self) -> Result<Option<String>, RemoraError> {
        unsafe {
            if OpenClipboard(HWND::default()).is_err() {
                return Err(RemoraError::Clipboard("OpenClipboard failed".into()));
            }
            let result = Self::read_locked();
            let _ = CloseClipboard();
            result
        }
    }

    /// Caller holds the clipboard open.
    unsafe fn read_locked() -> Result<Option<String>, RemoraError> {
        unsafe {
            let Ok(handle) = GetClipboardData(CF_UNICODETEXT.0 as u32) else {
                return Ok(None); // no text on the clipboard
            };
            let global = HGLOBAL(handle.0 as *mut _);
            let ptr = GlobalLock(global) as *const u16;
            if ptr.is_null() {
                return Err(RemoraError::Clipboard("GlobalLock failed".into()));
            }
            let mut len = 0usize;
            while *ptr.add(len) != 0 {
                len += 1;
            }
            let text = String::from_utf16_lossy(std::slice::from_raw_parts(ptr, len));
            let _ = GlobalUnlock(global);
            Ok(Some(text))
        }
    }

    fn write_unicode_text(&self, text: &str) -> Result<(), RemoraError> {
        let units = wide(text);
        unsafe {
            if OpenClipboard(HWND::default()).is_err() {
                return Err(RemoraError::Clipboard("OpenClipboard failed".into()));
            }
            let result = Self::write_locked(&units);
            let _ = CloseClipboard();
            result
        }
    }

    /// Caller holds the clipboard open.
    unsafe fn write_locked(units: &[u16]) -> Result<(), RemoraError> {
        unsafe {
            EmptyClipboard().map_err(|e| RemoraError::Clipboard(format!("EmptyClipboard: {e}")))?;
            let bytes = units.len() * 2;
            let global = GlobalAlloc(GMEM_MOVEABLE, bytes)
                .map_err(|e| RemoraError::Clipboard(format!("GlobalAlloc: {e}")))?;
            let ptr = GlobalLock(global) as *mut u16;
            if ptr.is_null() {
                return Err(RemoraError::Clipboard("GlobalLock failed".into()));
            }
            std::ptr::copy_nonoverlapping(units.as_ptr(), ptr, units.len());
            let _ = GlobalUnlock(global);
            // Ownership of the allocation passes to the clipboard.
            SetClipboardData(
                CF_UNICODETEXT.0 as u32,
                windows::Win32::Foundation::HANDLE(global.0),
            )
            .map_err(|e| RemoraError::Clipboard(format!("SetClipboardData: {e}")))?;
            Ok(())
        }
    }
}

impl remora_core::ClipboardAccess for Win32Clipboard {
    fn read_text(&mut self) -> Result<Option<String>, RemoraError> {
        self.read_unicode_text()
    }

    fn read_image(&mut self) -> Result<Option<Vec<u8>>, RemoraError> {
        Ok(None) // text-only backend
    }

    fn read_file_list(&mut self) -> Result<Option<Vec<String>>, RemoraError> {
        Ok(None)
    }

    fn write_text(&mut self, text: &str) -> Result<(), RemoraError> {
        self.write_unicode_text(text)
    }

    fn write_image(&mut self, _data: &[u8]) -> Result<(), RemoraError> {
        Err(RemoraError::Clipboard(
            "image clipboard formats not supported on this backend".into(),
        ))
    }

    fn write_file_list(&mut self, _paths: &[String]) -> Result<(), RemoraError> {
        Err(RemoraError::Clipboard(
            "file-list clipboard formats not supported on this backend".into(),
        ))
    }

    fn install_hook(
        &mut self,
        notify: tokio::sync::mpsc::UnboundedSender<()>,
    ) -> Result<(), RemoraError> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("clipboard-poll".into())
            .spawn(move || {
                let mut last = unsafe { GetClipboardSequenceNumber() };
                while !stop_clone.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(200));
                    let seq = unsafe { GetClipboardSequenceNumber() };
                    if seq != last {
                        last = seq;
                        if notify.send(()).is_err() {
                            break; // engine gone
                        }
                    }
                }
                debug!("clipboard poll thread exiting");
            })
            .map_err(|e| RemoraError::Clipboard(format!("hook thread spawn: {e}")))?;

        self.hook_stop = Some(stop);
        self.hook_thread = Some(thread);
        Ok(())
    }

    fn uninstall_hook(&mut self) {
        if let Some(stop) = self.hook_stop.take() {
            stop.store(true, Ordering::SeqCst);
        }
        if let Some(thread) = self.hook_thread.take() {
            if thread.join().is_err() {
                warn!("clipboard poll thread panicked");
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zstd_level_tracks_quality() {
        assert_eq!(zstd_level(95), 1);
        assert_eq!(zstd_level(85), 1);
        assert_eq!(zstd_level(60), 4);
        assert_eq!(zstd_level(30), 7);
        assert_eq!(zstd_level(0), 10);
    }

    #[test]
    fn named_keys_map() {
        assert_eq!(map_key("Enter"), Some(VK_RETURN));
        assert_eq!(map_key("ArrowLeft"), Some(VK_LEFT));
        assert!(map_key("NoSuchKey").is_none());
    }
}
