//! Monitor enumeration and cursor helpers. Monitors are identified by
//! their device path rather than the HMONITOR handle, which the OS
//! re-issues whenever the topology changes.

use crate::layout::ScreenProfile;
use crate::window_manager::MonitorInfo;
use crate::{Point, Rect};
use log::debug;
use windows::Win32::Foundation::{BOOL, LPARAM, POINT, RECT};
use windows::Win32::Graphics::Gdi::{
    EnumDisplayMonitors, GetDC, GetDeviceCaps, GetMonitorInfoW, ReleaseDC, HDC, HMONITOR,
    HORZSIZE, MONITORINFO, MONITORINFOEXW, VERTSIZE,
};
use windows::Win32::Foundation::HWND;
use windows::Win32::UI::HiDpi::{GetDpiForMonitor, MDT_EFFECTIVE_DPI};
use windows::Win32::UI::WindowsAndMessaging::{GetCursorPos, SetCursorPos};

/// Enumerate attached monitors with their work areas and physical
/// profiles.
pub fn enumerate() -> Vec<MonitorInfo> {
    unsafe extern "system" fn collect(
        hmon: HMONITOR,
        _hdc: HDC,
        _rect: *mut RECT,
        lparam: LPARAM,
    ) -> BOOL {
        let out = &mut *(lparam.0 as *mut Vec<HMONITOR>);
        out.push(hmon);
        true.into()
    }
    let mut handles: Vec<HMONITOR> = Vec::new();
    let ok = unsafe {
        EnumDisplayMonitors(
            HDC::default(),
            None,
            Some(collect),
            LPARAM(&mut handles as *mut Vec<HMONITOR> as isize),
        )
    };
    if !ok.as_bool() {
        debug!("EnumDisplayMonitors failed");
        return Vec::new();
    }
    let (width_mm, height_mm) = primary_physical_size();
    handles.into_iter().filter_map(|h| info_for(h, width_mm, height_mm)).collect()
}

fn info_for(hmon: HMONITOR, width_mm: i32, height_mm: i32) -> Option<MonitorInfo> {
    let mut info = MONITORINFOEXW {
        monitorInfo: MONITORINFO {
            cbSize: std::mem::size_of::<MONITORINFOEXW>() as u32,
            ..Default::default()
        },
        ..Default::default()
    };
    let ok = unsafe { GetMonitorInfoW(hmon, &mut info.monitorInfo as *mut MONITORINFO) };
    if !ok.as_bool() {
        return None;
    }
    let device_end = info
        .szDevice
        .iter()
        .position(|&c| c == 0)
        .unwrap_or(info.szDevice.len());
    let id = String::from_utf16_lossy(&info.szDevice[..device_end]);
    let rect = from_win_rect(info.monitorInfo.rcMonitor);
    let workarea = from_win_rect(info.monitorInfo.rcWork);
    let width_px = rect.width();
    let height_px = rect.height();
    let diagonal_mm = ((width_mm.pow(2) + height_mm.pow(2)) as f64).sqrt();
    let mut dpi_x = 96u32;
    let mut dpi_y = 96u32;
    unsafe {
        let _ = GetDpiForMonitor(hmon, MDT_EFFECTIVE_DPI, &mut dpi_x, &mut dpi_y);
    }
    let profile = ScreenProfile {
        width_px,
        height_px,
        inch: (diagonal_mm / 25.4).round().max(1.0) as u32,
        ratio: width_px as f64 / height_px.max(1) as f64,
        dpi: dpi_x,
        is_primary: rect.left == 0 && rect.top == 0,
    };
    Some(MonitorInfo {
        id,
        rect,
        workarea,
        profile,
    })
}

/// Physical dimensions reported for the primary display device context.
fn primary_physical_size() -> (i32, i32) {
    unsafe {
        let dc = GetDC(HWND::default());
        if dc.is_invalid() {
            return (531, 299); // 24" 16:9, a sane default before logon
        }
        let w = GetDeviceCaps(dc, HORZSIZE);
        let h = GetDeviceCaps(dc, VERTSIZE);
        ReleaseDC(HWND::default(), dc);
        (w.max(1), h.max(1))
    }
}

fn from_win_rect(r: RECT) -> Rect {
    Rect::new(r.left, r.top, r.right, r.bottom)
}

pub fn cursor_pos() -> Point {
    let mut p = POINT::default();
    if unsafe { GetCursorPos(&mut p) }.is_err() {
        return Point::default();
    }
    Point { x: p.x, y: p.y }
}

pub fn set_cursor_pos(x: i32, y: i32) {
    if let Err(e) = unsafe { SetCursorPos(x, y) } {
        debug!("SetCursorPos failed: {e}");
    }
}
