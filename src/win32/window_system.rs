//! [`WindowBackend`] implementation over the raw Win32 modules, plus the
//! frame-bound compensation that makes the visible frame of a window land
//! exactly on the rect the tiler computed.

use crate::window_manager::{MonitorInfo, WindowBackend, WindowInfo};
use crate::workspace::PARK_X;
use crate::{Point, Rect, WindowHandle};
use log::debug;
use std::collections::HashMap;

use super::{monitor, virtdesk, window};

pub struct Win32WindowSystem {
    bound_compensation: bool,
    /// Per-window frame offsets (window rect minus DWM frame bounds),
    /// computed on first placement and reused.
    compensations: HashMap<isize, (i32, i32, i32, i32)>,
}

impl Win32WindowSystem {
    pub fn new(bound_compensation: bool) -> Self {
        Self {
            bound_compensation,
            compensations: HashMap::new(),
        }
    }

    fn compensation(&mut self, handle: isize) -> (i32, i32, i32, i32) {
        if !self.bound_compensation {
            return (0, 0, 0, 0);
        }
        if let Some(&c) = self.compensations.get(&handle) {
            return c;
        }
        let c = match (window::rect(handle), window::extended_frame_bounds(handle)) {
            (Some(r), Some(b)) => (
                r.left - b.left,
                r.top - b.top,
                r.right - b.right,
                r.bottom - b.bottom,
            ),
            _ => (0, 0, 0, 0),
        };
        debug!("frame compensation for {handle:#x}: {c:?}");
        self.compensations.insert(handle, c);
        c
    }
}

impl WindowBackend for Win32WindowSystem {
    fn monitors(&mut self) -> Vec<MonitorInfo> {
        monitor::enumerate()
    }

    fn windows(&mut self) -> Vec<WindowInfo> {
        let mut out = Vec::new();
        for handle in window::enum_top_level() {
            if !window::is_manageable(handle) {
                continue;
            }
            let Some(rect) = window::visible_rect(handle) else {
                continue;
            };
            out.push(WindowInfo {
                handle: WindowHandle(handle),
                exe: window::exe_basename(handle),
                title: window::title(handle),
                class_name: window::class_name(handle),
                rect,
                minimized: window::is_minimized(handle),
            });
        }
        self.compensations.retain(|h, _| out.iter().any(|w| w.handle.0 == *h));
        out
    }

    fn window_info(&mut self, handle: WindowHandle) -> Option<WindowInfo> {
        let raw = handle.0;
        let rect = window::visible_rect(raw)?;
        Some(WindowInfo {
            handle,
            exe: window::exe_basename(raw),
            title: window::title(raw),
            class_name: window::class_name(raw),
            rect,
            minimized: window::is_minimized(raw),
        })
    }

    fn set_rect(&mut self, handle: WindowHandle, rect: Rect) {
        if window::is_maximized(handle.0) {
            window::restore(handle.0);
        }
        // rects are exchanged in visible-frame coordinates; inflate by the
        // cached frame offsets before handing them to the OS. Parked rects
        // go out verbatim, nobody sees those frames.
        let rect = if rect.left > PARK_X / 2 {
            let (l, t, r, b) = self.compensation(handle.0);
            Rect::new(rect.left + l, rect.top + t, rect.right + r, rect.bottom + b)
        } else {
            rect
        };
        window::set_rect(handle.0, rect);
    }

    fn activate(&mut self, handle: WindowHandle) {
        window::activate(handle.0);
    }

    fn minimize(&mut self, handle: WindowHandle) {
        window::minimize(handle.0);
    }

    fn restore(&mut self, handle: WindowHandle) {
        window::restore(handle.0);
    }

    fn cursor_pos(&mut self) -> Point {
        monitor::cursor_pos()
    }

    fn set_cursor_pos(&mut self, x: i32, y: i32) {
        monitor::set_cursor_pos(x, y);
    }

    fn foreground(&mut self) -> Option<WindowHandle> {
        window::foreground().map(WindowHandle)
    }

    fn desktop_id(&mut self) -> String {
        virtdesk::current_desktop_id()
    }
}
