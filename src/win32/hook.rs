//! Global low-level keyboard/mouse hooks and the window-event hook, all
//! installed on one dedicated thread running a message pump.
//!
//! The hook callbacks are plain function pointers, so the pipeline and the
//! outbound channels live in `OnceLock` globals. The keyboard/mouse
//! callbacks run the full remapping pipeline synchronously under its mutex
//! and must stay in the low-millisecond range: anything heavier is shipped
//! to the daemon as an action id. Events carrying our injection sentinel
//! bypass the pipeline entirely.

use crate::jmk::{monotonic_ms, Pipeline, PipelineOutput};
use crate::services::DaemonMsg;
use crate::vk::{InputEvent, Vk};
use crate::window_manager::WindowEvent;
use crate::{Result, WindowHandle};
use anyhow::Context;
use log::{debug, error, warn};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::mpsc;
use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::UI::Accessibility::{SetWinEventHook, UnhookWinEvent, HWINEVENTHOOK};
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, DispatchMessageW, GetMessageW, PostThreadMessageW, SetWindowsHookExW,
    TranslateMessage, UnhookWindowsHookEx, EVENT_MAX, EVENT_MIN, EVENT_OBJECT_CLOAKED,
    EVENT_OBJECT_DESTROY, EVENT_OBJECT_HIDE, EVENT_OBJECT_LOCATIONCHANGE, EVENT_OBJECT_SHOW,
    EVENT_OBJECT_UNCLOAKED, EVENT_SYSTEM_FOREGROUND, EVENT_SYSTEM_MINIMIZEEND,
    EVENT_SYSTEM_MINIMIZESTART, EVENT_SYSTEM_MOVESIZEEND, EVENT_SYSTEM_MOVESIZESTART, HHOOK,
    KBDLLHOOKSTRUCT, MSG, MSLLHOOKSTRUCT, OBJID_WINDOW, WH_KEYBOARD_LL, WH_MOUSE_LL,
    WINEVENT_OUTOFCONTEXT, WINEVENT_SKIPOWNPROCESS, WM_KEYDOWN, WM_KEYUP, WM_LBUTTONDOWN,
    WM_LBUTTONUP, WM_MBUTTONDOWN, WM_MBUTTONUP, WM_MOUSEHWHEEL, WM_MOUSEWHEEL, WM_QUIT,
    WM_RBUTTONDOWN, WM_RBUTTONUP, WM_SYSKEYDOWN, WM_SYSKEYUP, WM_XBUTTONDOWN, WM_XBUTTONUP,
};
use windows::Win32::System::Threading::GetCurrentThreadId;

use super::input::{send_input, SENTINEL};

/// Wiring the hook callbacks need; set once at installation.
pub struct HookChannels {
    pub pipeline: Arc<Mutex<Pipeline>>,
    pub daemon_tx: mpsc::UnboundedSender<DaemonMsg>,
    pub event_tx: mpsc::UnboundedSender<WindowEvent>,
}

static CHANNELS: OnceLock<HookChannels> = OnceLock::new();

/// Keeps the hook thread alive; dropping it tears the hooks down.
pub struct HookGuard {
    thread_id: u32,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl HookGuard {
    pub fn stop(&mut self) {
        unsafe {
            let _ = PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Install all hooks on a dedicated pump thread. Failing to install any of
/// them is fatal: returning an error here is expected to abort startup.
pub fn install(channels: HookChannels) -> Result<HookGuard> {
    if CHANNELS.set(channels).is_err() {
        anyhow::bail!("input hooks are already installed");
    }
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<u32>>();
    let thread = std::thread::Builder::new()
        .name("input-hooks".into())
        .spawn(move || hook_thread(ready_tx))
        .context("spawning hook thread")?;
    let thread_id = ready_rx
        .recv()
        .context("hook thread died during installation")??;
    Ok(HookGuard {
        thread_id,
        thread: Some(thread),
    })
}

fn hook_thread(ready_tx: std::sync::mpsc::Sender<Result<u32>>) {
    unsafe {
        let keyboard = SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_proc), None, 0);
        let mouse = SetWindowsHookExW(WH_MOUSE_LL, Some(mouse_proc), None, 0);
        let winevent = SetWinEventHook(
            EVENT_MIN,
            EVENT_MAX,
            None,
            Some(win_event_proc),
            0,
            0,
            WINEVENT_OUTOFCONTEXT | WINEVENT_SKIPOWNPROCESS,
        );
        let (keyboard, mouse) = match (keyboard, mouse) {
            (Ok(k), Ok(m)) if !winevent.is_invalid() => (k, m),
            (k, m) => {
                let _ = ready_tx.send(Err(anyhow::anyhow!(
                    "installing hooks failed: keyboard={:?} mouse={:?} winevent_ok={}",
                    k.err(),
                    m.err(),
                    !winevent.is_invalid()
                )));
                return;
            }
        };
        let _ = ready_tx.send(Ok(GetCurrentThreadId()));
        pump_messages();
        let _ = UnhookWindowsHookEx(keyboard);
        let _ = UnhookWindowsHookEx(mouse);
        let _ = UnhookWinEvent(winevent);
        debug!("hook thread exited");
    }
}

unsafe fn pump_messages() {
    let mut msg = MSG::default();
    while GetMessageW(&mut msg, HWND::default(), 0, 0).as_bool() {
        let _ = TranslateMessage(&msg);
        DispatchMessageW(&msg);
    }
}

/// Run one physical event through the pipeline and emit its output.
/// Returns the suppress decision for the hook return value.
fn dispatch(event: InputEvent) -> bool {
    let Some(channels) = CHANNELS.get() else {
        return false;
    };
    let (out, deadline) = {
        let mut pipeline = match channels.pipeline.lock() {
            Ok(p) => p,
            Err(poisoned) => poisoned.into_inner(),
        };
        let out = pipeline.on_event(event);
        (out, pipeline.next_deadline())
    };
    emit(channels, out, deadline)
}

fn emit(channels: &HookChannels, out: PipelineOutput, deadline: Option<u64>) -> bool {
    // injections must hit the queue before the hook returns so they keep
    // their place relative to the physical stream
    if !out.inject.is_empty() {
        send_input(&out.inject);
    }
    for id in out.actions {
        if channels.daemon_tx.send(DaemonMsg::Action(id)).is_err() {
            warn!("daemon channel closed, dropping action");
        }
    }
    if let Some(deadline) = deadline {
        let _ = channels.daemon_tx.send(DaemonMsg::WakeAt(deadline));
    }
    out.suppress
}

unsafe extern "system" fn keyboard_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if code < 0 {
        return CallNextHookEx(HHOOK::default(), code, wparam, lparam);
    }
    let data = &*(lparam.0 as *const KBDLLHOOKSTRUCT);
    if data.dwExtraInfo == SENTINEL {
        return CallNextHookEx(HHOOK::default(), code, wparam, lparam);
    }
    let pressed = match wparam.0 as u32 {
        WM_KEYDOWN | WM_SYSKEYDOWN => true,
        WM_KEYUP | WM_SYSKEYUP => false,
        _ => return CallNextHookEx(HHOOK::default(), code, wparam, lparam),
    };
    let vk = match Vk::from_code(data.vkCode) {
        Some(vk) if vk != Vk::Packet => vk,
        _ => return CallNextHookEx(HHOOK::default(), code, wparam, lparam),
    };
    if dispatch(InputEvent::new(vk, pressed, monotonic_ms())) {
        LRESULT(1)
    } else {
        CallNextHookEx(HHOOK::default(), code, wparam, lparam)
    }
}

unsafe extern "system" fn mouse_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if code < 0 {
        return CallNextHookEx(HHOOK::default(), code, wparam, lparam);
    }
    let data = &*(lparam.0 as *const MSLLHOOKSTRUCT);
    if data.dwExtraInfo == SENTINEL {
        return CallNextHookEx(HHOOK::default(), code, wparam, lparam);
    }
    let hi = ((data.mouseData as u32) >> 16) as u16;
    let event = match wparam.0 as u32 {
        WM_LBUTTONDOWN => Some((Vk::LButton, true)),
        WM_LBUTTONUP => Some((Vk::LButton, false)),
        WM_RBUTTONDOWN => Some((Vk::RButton, true)),
        WM_RBUTTONUP => Some((Vk::RButton, false)),
        WM_MBUTTONDOWN => Some((Vk::MButton, true)),
        WM_MBUTTONUP => Some((Vk::MButton, false)),
        WM_XBUTTONDOWN => Some((
            if hi == 1 { Vk::XButton1 } else { Vk::XButton2 },
            true,
        )),
        WM_XBUTTONUP => Some((
            if hi == 1 { Vk::XButton1 } else { Vk::XButton2 },
            false,
        )),
        WM_MOUSEWHEEL => {
            let vk = if (hi as i16) > 0 { Vk::WheelUp } else { Vk::WheelDown };
            // wheel notches become a synthetic down/up pair
            let now = monotonic_ms();
            let down = dispatch(InputEvent::new(vk, true, now));
            let up = dispatch(InputEvent::new(vk, false, now));
            return if down || up {
                LRESULT(1)
            } else {
                CallNextHookEx(HHOOK::default(), code, wparam, lparam)
            };
        }
        WM_MOUSEHWHEEL => {
            let vk = if (hi as i16) > 0 { Vk::WheelRight } else { Vk::WheelLeft };
            let now = monotonic_ms();
            let down = dispatch(InputEvent::new(vk, true, now));
            let up = dispatch(InputEvent::new(vk, false, now));
            return if down || up {
                LRESULT(1)
            } else {
                CallNextHookEx(HHOOK::default(), code, wparam, lparam)
            };
        }
        _ => None,
    };
    match event {
        Some((vk, pressed)) if dispatch(InputEvent::new(vk, pressed, monotonic_ms())) => {
            LRESULT(1)
        }
        _ => CallNextHookEx(HHOOK::default(), code, wparam, lparam),
    }
}

unsafe extern "system" fn win_event_proc(
    _hook: HWINEVENTHOOK,
    event: u32,
    hwnd: HWND,
    id_object: i32,
    _id_child: i32,
    _thread: u32,
    _time: u32,
) {
    if id_object != OBJID_WINDOW.0 {
        return;
    }
    let raw = hwnd.0 as isize;
    if raw == 0 {
        return;
    }
    let Some(channels) = CHANNELS.get() else {
        return;
    };
    let handle = WindowHandle(raw);
    let mapped = match event {
        EVENT_SYSTEM_FOREGROUND => WindowEvent::Foreground(handle),
        EVENT_OBJECT_SHOW | EVENT_OBJECT_UNCLOAKED => WindowEvent::Shown(handle),
        EVENT_OBJECT_DESTROY | EVENT_OBJECT_HIDE | EVENT_OBJECT_CLOAKED => {
            WindowEvent::Destroyed(handle)
        }
        EVENT_OBJECT_LOCATIONCHANGE => match super::window::visible_rect(raw) {
            Some(rect) => WindowEvent::Moved(handle, rect),
            None => return,
        },
        EVENT_SYSTEM_MOVESIZESTART => WindowEvent::MoveSizeStart(handle),
        EVENT_SYSTEM_MOVESIZEEND => WindowEvent::MoveSizeEnd(handle),
        EVENT_SYSTEM_MINIMIZESTART | EVENT_SYSTEM_MINIMIZEEND => {
            WindowEvent::MinimizeChanged(handle)
        }
        _ => return,
    };
    if channels.event_tx.send(mapped).is_err() {
        error!("window event channel closed");
    }
}
