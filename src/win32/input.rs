//! Synthetic input emission. Every event we inject carries [`SENTINEL`] in
//! its extra-info word; the hook callbacks test for it and wave those
//! events through untouched, which is what keeps injection from recursing
//! into the pipeline.

use crate::vk::Vk;
use log::error;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    GetAsyncKeyState, MapVirtualKeyW, SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE,
    KEYBDINPUT, KEYBD_EVENT_FLAGS, KEYEVENTF_EXTENDEDKEY, KEYEVENTF_KEYUP, MAPVK_VK_TO_VSC,
    MOUSEEVENTF_HWHEEL, MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MIDDLEDOWN,
    MOUSEEVENTF_MIDDLEUP, MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP, MOUSEEVENTF_WHEEL,
    MOUSEEVENTF_XDOWN, MOUSEEVENTF_XUP, MOUSEINPUT, MOUSE_EVENT_FLAGS, VIRTUAL_KEY,
};

/// Fixed per-process magic in `dwExtraInfo` marking our own injections.
pub const SENTINEL: usize = 0x4A49_4753_4157_4D4Bu64 as usize;

const WHEEL_DELTA: i32 = 120;

/// Emit a burst of key/button events as one `SendInput` call, so nothing
/// can interleave between a modifier and the key it wraps.
pub fn send_input(events: &[(Vk, bool)]) {
    let inputs: Vec<INPUT> = events
        .iter()
        // wheel notches have no release on the wire; their synthesized
        // up-stroke exists only inside the engine
        .filter(|&&(vk, pressed)| !(vk.is_wheel() && !pressed))
        .map(|&(vk, pressed)| to_input(vk, pressed))
        .collect();
    if inputs.is_empty() {
        return;
    }
    let sent = unsafe { SendInput(&inputs, std::mem::size_of::<INPUT>() as i32) };
    if sent != inputs.len() as u32 {
        error!("SendInput delivered {sent}/{} events", inputs.len());
    }
}

fn to_input(vk: Vk, pressed: bool) -> INPUT {
    if vk.is_mouse() {
        let (flags, data): (MOUSE_EVENT_FLAGS, i32) = match vk {
            Vk::LButton if pressed => (MOUSEEVENTF_LEFTDOWN, 0),
            Vk::LButton => (MOUSEEVENTF_LEFTUP, 0),
            Vk::RButton if pressed => (MOUSEEVENTF_RIGHTDOWN, 0),
            Vk::RButton => (MOUSEEVENTF_RIGHTUP, 0),
            Vk::MButton if pressed => (MOUSEEVENTF_MIDDLEDOWN, 0),
            Vk::MButton => (MOUSEEVENTF_MIDDLEUP, 0),
            Vk::XButton1 if pressed => (MOUSEEVENTF_XDOWN, 1),
            Vk::XButton1 => (MOUSEEVENTF_XUP, 1),
            Vk::XButton2 if pressed => (MOUSEEVENTF_XDOWN, 2),
            Vk::XButton2 => (MOUSEEVENTF_XUP, 2),
            Vk::WheelUp => (MOUSEEVENTF_WHEEL, WHEEL_DELTA),
            Vk::WheelDown => (MOUSEEVENTF_WHEEL, -WHEEL_DELTA),
            Vk::WheelRight => (MOUSEEVENTF_HWHEEL, WHEEL_DELTA),
            Vk::WheelLeft => (MOUSEEVENTF_HWHEEL, -WHEEL_DELTA),
            _ => (MOUSE_EVENT_FLAGS(0), 0),
        };
        INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx: 0,
                    dy: 0,
                    mouseData: data as _,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: SENTINEL,
                },
            },
        }
    } else {
        let mut flags = KEYBD_EVENT_FLAGS(0);
        if !pressed {
            flags |= KEYEVENTF_KEYUP;
        }
        // the navigation cluster needs the extended-key bit or apps
        // receive the numpad variants
        if (vk >= Vk::Prior && vk <= Vk::Help) || vk == Vk::Divide || vk == Vk::NumLock {
            flags |= KEYEVENTF_EXTENDEDKEY;
        }
        let scan = unsafe { MapVirtualKeyW(vk as u32, MAPVK_VK_TO_VSC) } as u16;
        INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: VIRTUAL_KEY(vk as u16),
                    wScan: scan,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: SENTINEL,
                },
            },
        }
    }
}

/// Physical key state straight from the OS, used for stuck-modifier
/// repair.
pub fn is_key_down(vk: Vk) -> bool {
    if vk.is_wheel() {
        return false;
    }
    let state = unsafe { GetAsyncKeyState(vk as u16 as i32) };
    (state as u16 & 0x8000) != 0
}
