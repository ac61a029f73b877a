//! Operations on native window handles: attributes, manageability
//! classification, positioning and activation.

use crate::vk::Vk;
use crate::Rect;
use log::debug;
use windows::Win32::Foundation::{CloseHandle, HWND, LPARAM, RECT};
use windows::Win32::Graphics::Dwm::{
    DwmGetWindowAttribute, DWMWA_CLOAKED, DWMWA_EXTENDED_FRAME_BOUNDS,
};
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
    PROCESS_QUERY_LIMITED_INFORMATION,
};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetAncestor, GetClassNameW, GetForegroundWindow, GetWindowLongW, GetWindowRect,
    GetWindowTextW, GetWindowThreadProcessId, IsIconic, IsWindowVisible, IsZoomed,
    SetForegroundWindow, SetWindowPos, ShowWindow, GA_ROOT, GWL_EXSTYLE, GWL_STYLE,
    SWP_NOACTIVATE, SWP_NOZORDER, SW_MINIMIZE, SW_RESTORE, SW_SHOWMAXIMIZED, WINDOW_EX_STYLE,
    WINDOW_STYLE, WS_EX_NOACTIVATE, WS_EX_TOOLWINDOW, WS_SIZEBOX,
};

/// Shell windows that are visible and titled but must never be managed.
const CLASSNAME_BLACKLIST: &[&str] = &[
    "Shell_TrayWnd",
    "Shell_SecondaryTrayWnd",
    "Progman",
    "WorkerW",
    "IME",
    "Default IME",
    "MSCTFIME UI",
];

fn hwnd(handle: isize) -> HWND {
    HWND(handle as _)
}

pub fn title(handle: isize) -> String {
    let mut buf = [0u16; 256];
    let len = unsafe { GetWindowTextW(hwnd(handle), &mut buf) };
    String::from_utf16_lossy(&buf[..len.max(0) as usize])
}

pub fn class_name(handle: isize) -> String {
    let mut buf = [0u16; 128];
    let len = unsafe { GetClassNameW(hwnd(handle), &mut buf) };
    String::from_utf16_lossy(&buf[..len.max(0) as usize])
}

/// Base name of the owning process executable, lowercased.
pub fn exe_basename(handle: isize) -> String {
    let mut pid = 0u32;
    unsafe { GetWindowThreadProcessId(hwnd(handle), Some(&mut pid)) };
    if pid == 0 {
        return String::new();
    }
    let process = match unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) } {
        Ok(h) => h,
        Err(_) => return String::new(),
    };
    let mut buf = [0u16; 512];
    let mut len = buf.len() as u32;
    let path = unsafe {
        QueryFullProcessImageNameW(
            process,
            PROCESS_NAME_WIN32,
            windows::core::PWSTR(buf.as_mut_ptr()),
            &mut len,
        )
    };
    unsafe {
        let _ = CloseHandle(process);
    }
    if path.is_err() {
        return String::new();
    }
    let full = String::from_utf16_lossy(&buf[..len as usize]);
    full.rsplit(['\\', '/'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

pub fn rect(handle: isize) -> Option<Rect> {
    let mut r = RECT::default();
    unsafe { GetWindowRect(hwnd(handle), &mut r) }.ok()?;
    Some(Rect::new(r.left, r.top, r.right, r.bottom))
}

/// The DWM frame bounds, i.e. the rect the user actually sees. Differs
/// from `GetWindowRect` by the invisible resize border.
pub fn extended_frame_bounds(handle: isize) -> Option<Rect> {
    let mut r = RECT::default();
    unsafe {
        DwmGetWindowAttribute(
            hwnd(handle),
            DWMWA_EXTENDED_FRAME_BOUNDS,
            &mut r as *mut _ as *mut _,
            std::mem::size_of::<RECT>() as u32,
        )
    }
    .ok()?;
    Some(Rect::new(r.left, r.top, r.right, r.bottom))
}

/// The rect the user perceives: DWM frame bounds when available, the
/// window rect otherwise.
pub fn visible_rect(handle: isize) -> Option<Rect> {
    extended_frame_bounds(handle).or_else(|| rect(handle))
}

pub fn is_cloaked(handle: isize) -> bool {
    let mut cloaked = 0u32;
    let ok = unsafe {
        DwmGetWindowAttribute(
            hwnd(handle),
            DWMWA_CLOAKED,
            &mut cloaked as *mut _ as *mut _,
            std::mem::size_of::<u32>() as u32,
        )
    };
    ok.is_ok() && cloaked != 0
}

pub fn is_minimized(handle: isize) -> bool {
    unsafe { IsIconic(hwnd(handle)) }.as_bool()
}

pub fn is_maximized(handle: isize) -> bool {
    unsafe { IsZoomed(hwnd(handle)) }.as_bool()
}

pub fn is_visible(handle: isize) -> bool {
    unsafe { IsWindowVisible(hwnd(handle)) }.as_bool()
}

fn style(handle: isize) -> WINDOW_STYLE {
    WINDOW_STYLE(unsafe { GetWindowLongW(hwnd(handle), GWL_STYLE) } as u32)
}

fn exstyle(handle: isize) -> WINDOW_EX_STYLE {
    WINDOW_EX_STYLE(unsafe { GetWindowLongW(hwnd(handle), GWL_EXSTYLE) } as u32)
}

/// A window qualifies for management when it is a visible, titled,
/// resizable top-level application window that is not cloaked away by DWM.
pub fn is_manageable(handle: isize) -> bool {
    if !is_visible(handle) {
        return false;
    }
    if unsafe { GetAncestor(hwnd(handle), GA_ROOT) }.0 as isize != handle {
        return false;
    }
    let style = style(handle);
    if style.0 & WS_SIZEBOX.0 == 0 {
        return false;
    }
    let ex = exstyle(handle);
    if ex.0 & WS_EX_TOOLWINDOW.0 != 0 || ex.0 & WS_EX_NOACTIVATE.0 != 0 {
        return false;
    }
    if is_cloaked(handle) {
        return false;
    }
    if title(handle).is_empty() {
        return false;
    }
    !CLASSNAME_BLACKLIST.contains(&class_name(handle).as_str())
}

pub fn set_rect(handle: isize, rect: Rect) {
    let result = unsafe {
        SetWindowPos(
            hwnd(handle),
            HWND::default(),
            rect.left,
            rect.top,
            rect.width(),
            rect.height(),
            SWP_NOACTIVATE | SWP_NOZORDER,
        )
    };
    if let Err(e) = result {
        // the window may have closed between enumeration and placement
        debug!("SetWindowPos on {handle:#x} failed: {e}");
    }
}

pub fn minimize(handle: isize) {
    unsafe {
        let _ = ShowWindow(hwnd(handle), SW_MINIMIZE);
    }
}

pub fn restore(handle: isize) {
    unsafe {
        let _ = ShowWindow(hwnd(handle), SW_RESTORE);
    }
}

pub fn toggle_maximize(handle: isize) {
    let cmd = if is_maximized(handle) {
        SW_RESTORE
    } else {
        SW_SHOWMAXIMIZED
    };
    unsafe {
        let _ = ShowWindow(hwnd(handle), cmd);
    }
}

pub fn foreground() -> Option<isize> {
    let h = unsafe { GetForegroundWindow() };
    let raw = h.0 as isize;
    (raw != 0).then_some(raw)
}

/// Bring a window to the foreground. When the shell refuses (we are not
/// the foreground process), a synthetic Alt release unlocks the
/// foreground so a retry can succeed.
pub fn activate(handle: isize) {
    if is_minimized(handle) {
        restore(handle);
    }
    unsafe {
        if SetForegroundWindow(hwnd(handle)).as_bool() {
            return;
        }
        super::input::send_input(&[(Vk::Menu, false), (Vk::Menu, false)]);
        let _ = SetForegroundWindow(hwnd(handle));
    }
}

/// Handles of all top-level windows, in z-order.
pub fn enum_top_level() -> Vec<isize> {
    unsafe extern "system" fn push(
        hwnd: HWND,
        lparam: LPARAM,
    ) -> windows::Win32::Foundation::BOOL {
        let out = &mut *(lparam.0 as *mut Vec<isize>);
        out.push(hwnd.0 as isize);
        true.into()
    }
    let mut handles: Vec<isize> = Vec::new();
    let result = unsafe {
        EnumWindows(
            Some(push),
            LPARAM(&mut handles as *mut Vec<isize> as isize),
        )
    };
    if let Err(e) = result {
        debug!("EnumWindows failed: {e}");
    }
    handles
}
