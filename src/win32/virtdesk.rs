//! Current virtual-desktop identity. Windows keeps the id of the active
//! virtual desktop in the registry; reading it there avoids the
//! undocumented COM interfaces that break across builds.

use log::debug;
use windows::core::w;
use windows::Win32::System::Registry::{
    RegGetValueW, HKEY_CURRENT_USER, RRF_RT_REG_BINARY,
};

/// Returns the GUID of the active virtual desktop as a hex string, or
/// `"default"` when the value is unavailable (e.g. before first switch).
pub fn current_desktop_id() -> String {
    let mut buf = [0u8; 16];
    let mut size = buf.len() as u32;
    let status = unsafe {
        RegGetValueW(
            HKEY_CURRENT_USER,
            w!(r"Software\Microsoft\Windows\CurrentVersion\Explorer\SessionInfo\1\VirtualDesktops"),
            w!("CurrentVirtualDesktop"),
            RRF_RT_REG_BINARY,
            None,
            Some(buf.as_mut_ptr() as *mut _),
            Some(&mut size),
        )
    };
    if status.is_err() || size as usize != buf.len() {
        debug!("virtual desktop id unavailable: {status:?}");
        return "default".to_string();
    }
    buf.iter().map(|b| format!("{b:02x}")).collect()
}
