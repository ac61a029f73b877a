//! Per-monitor workspace state: ordered window lists, the active slot, and
//! the arithmetic for turning a theme plus a window list into concrete
//! target rectangles. Windows live in one arena keyed by handle; monitors
//! and workspaces only hold handles, never references.

use crate::layout::{self, ScreenProfile, Theme};
use crate::{Rect, WindowHandle};
use std::collections::HashMap;

/// Width of a stacked (overflow) window relative to its tiling area.
const STACK_RATIO: f64 = 0.8;
/// All parked windows live at this x offset, far off every plausible
/// desktop.
pub const PARK_X: i32 = -32000;

/// Everything the manager tracks about one window. The native handle is
/// the identity; text attributes are cached at adoption time and refreshed
/// on observation.
#[derive(Debug, Clone)]
pub struct ManagedWindow {
    pub handle: WindowHandle,
    /// Executable base name, e.g. `firefox.exe`.
    pub exe: String,
    pub title: String,
    pub class_name: String,
    /// Last rect we observed or assigned.
    pub rect: Rect,
    pub tilable: bool,
    pub minimized: bool,
    /// Parked off-screen because its workspace is hidden.
    pub off: bool,
    /// Pinned slot in a static layout.
    pub static_index: Option<usize>,
    /// Home monitor/workspace, set by rules and updated when the user
    /// moves the window; honored when the topology changes.
    pub preferred_monitor: Option<usize>,
    pub preferred_workspace: Option<usize>,
    /// Rect we told the OS to apply; the echoed move event is matched
    /// against this and dropped.
    pub expected_rect: Option<Rect>,
    /// Rect the window is supposed to keep under a strict theme.
    pub restricted_rect: Option<Rect>,
}

impl ManagedWindow {
    pub fn new(handle: WindowHandle, exe: String, title: String, class_name: String) -> Self {
        Self {
            handle,
            exe,
            title,
            class_name,
            rect: Rect::default(),
            tilable: true,
            minimized: false,
            off: false,
            static_index: None,
            preferred_monitor: None,
            preferred_workspace: None,
            expected_rect: None,
            restricted_rect: None,
        }
    }
}

/// An ordered list of window slots and the index of the active one.
/// Minimized and floating windows keep their slot; they are only skipped
/// when tiling areas are handed out.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub name: String,
    pub windows: Vec<WindowHandle>,
    pub active_index: Option<usize>,
    pub showing: bool,
    /// Temporary theme override (monocle toggle); index into the theme
    /// table, with the previous theme stashed for the way back.
    pub theme_override: Option<usize>,
    pub prev_theme: Option<usize>,
}

impl Workspace {
    fn new(name: String, showing: bool) -> Self {
        Self {
            name,
            windows: Vec::new(),
            active_index: None,
            showing,
            theme_override: None,
            prev_theme: None,
        }
    }

    pub fn contains(&self, handle: WindowHandle) -> bool {
        self.windows.contains(&handle)
    }

    pub fn remove(&mut self, handle: WindowHandle) {
        if let Some(pos) = self.windows.iter().position(|&h| h == handle) {
            self.windows.remove(pos);
            match self.active_index {
                Some(_) if self.windows.is_empty() => self.active_index = None,
                Some(i) if i > pos || i >= self.windows.len() => {
                    self.active_index = Some(i.saturating_sub(1));
                }
                _ => {}
            }
        }
    }

    pub fn active_window(&self) -> Option<WindowHandle> {
        self.active_index.and_then(|i| self.windows.get(i).copied())
    }

    pub fn activate(&mut self, handle: WindowHandle) {
        if let Some(pos) = self.windows.iter().position(|&h| h == handle) {
            self.active_index = Some(pos);
        }
    }
}

/// State of one physical monitor. Identified by the device path string:
/// unlike the OS handle it survives topology changes, which lets the
/// active-workspace index stick across monitor unplug/replug.
#[derive(Debug, Clone)]
pub struct MonitorState {
    pub id: String,
    pub rect: Rect,
    pub workarea: Rect,
    pub profile: ScreenProfile,
    pub workspaces: Vec<Workspace>,
    pub active_workspace: usize,
    /// Index into the theme table.
    pub theme: usize,
}

impl MonitorState {
    pub fn new(
        id: String,
        rect: Rect,
        workarea: Rect,
        profile: ScreenProfile,
        workspace_names: &[String],
        theme: usize,
    ) -> Self {
        let workspaces = workspace_names
            .iter()
            .enumerate()
            .map(|(i, name)| Workspace::new(name.clone(), i == 0))
            .collect();
        Self {
            id,
            rect,
            workarea,
            profile,
            workspaces,
            active_workspace: 0,
            theme,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspaces[self.active_workspace]
    }

    pub fn workspace_mut(&mut self) -> &mut Workspace {
        &mut self.workspaces[self.active_workspace]
    }

    /// Effective theme of the active workspace, honoring a monocle
    /// override.
    pub fn effective_theme(&self) -> usize {
        self.workspace().theme_override.unwrap_or(self.theme)
    }

    /// Container rect that windows of a hidden workspace are parked in.
    /// Spread along y by workspace index so parked workspaces do not
    /// interleave and can be told apart when reclaiming.
    pub fn park_container(&self, workspace_index: usize) -> Rect {
        let top = self.rect.bottom + self.rect.height() * workspace_index as i32;
        Rect::new(
            PARK_X,
            top,
            PARK_X + self.workarea.width(),
            top + self.workarea.height(),
        )
    }
}

/// Order the tilable, restored windows of a workspace into layout slots.
/// Under a static layout, pinned windows claim their exact slot and the
/// rest fill the holes left over; otherwise the list order is the slot
/// order. `None` entries are empty reserved slots.
pub fn layout_slots(
    ws: &Workspace,
    arena: &HashMap<WindowHandle, ManagedWindow>,
    theme: &Theme,
) -> Vec<Option<WindowHandle>> {
    let tiling: Vec<WindowHandle> = ws
        .windows
        .iter()
        .copied()
        .filter(|h| {
            arena
                .get(h)
                .map(|w| w.tilable && !w.minimized)
                .unwrap_or(false)
        })
        .collect();
    if !theme.static_layout || theme.max_tiling_areas < 2 {
        return tiling.into_iter().map(Some).collect();
    }
    let mut slots: Vec<Option<WindowHandle>> = vec![None; theme.max_tiling_areas];
    let mut spill = Vec::new();
    for handle in tiling {
        let pinned = arena.get(&handle).and_then(|w| w.static_index);
        match pinned {
            Some(i) if i < slots.len() && slots[i].is_none() => slots[i] = Some(handle),
            _ => spill.push(handle),
        }
    }
    for handle in spill {
        if let Some(hole) = slots.iter().position(|s| s.is_none()) {
            slots[hole] = Some(handle);
        } else {
            slots.push(Some(handle));
        }
    }
    // drop trailing empties so the tiler sees the real occupancy
    while matches!(slots.last(), Some(None)) {
        slots.pop();
    }
    slots
}

/// Compute the target rect for every slot. Slots beyond the theme's area
/// cap cascade inside the last area at [`STACK_RATIO`] of its size.
pub fn target_rects(
    slots: &[Option<WindowHandle>],
    theme: &Theme,
    workarea: Rect,
) -> Vec<(WindowHandle, Rect)> {
    let n = slots.len();
    if n == 0 {
        return Vec::new();
    }
    let areas = if theme.max_tiling_areas > 0 {
        n.min(theme.max_tiling_areas)
    } else {
        n
    };
    let mut rects = layout::tile(theme.layout, workarea, areas);
    layout::apply_gap(&mut rects, workarea, theme.gap);
    let mut out = Vec::with_capacity(n);
    for (i, slot) in slots.iter().enumerate().take(areas.saturating_sub(1)) {
        if let Some(handle) = slot {
            out.push((*handle, rects[i]));
        }
    }
    let last = rects[areas - 1];
    let overflow = n - (areas - 1);
    if overflow <= 1 {
        if let Some(Some(handle)) = slots.last() {
            out.push((*handle, last));
        }
        return out;
    }
    // cascade the overflow into the last area; activation raises them
    let w = (last.width() as f64 * STACK_RATIO) as i32;
    let h = (last.height() as f64 * STACK_RATIO) as i32;
    let x_step = (last.width() - w) / (overflow - 1).max(1) as i32;
    let y_step = (last.height() - h) / (overflow - 1).max(1) as i32;
    let (mut left, mut top) = (last.left, last.top);
    for slot in slots.iter().skip(areas - 1) {
        if let Some(handle) = slot {
            out.push((*handle, Rect::new(left, top, left + w, top + h)));
        }
        left += x_step;
        top += y_step;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::default_themes;

    fn arena_with(handles: &[isize]) -> HashMap<WindowHandle, ManagedWindow> {
        handles
            .iter()
            .map(|&h| {
                (
                    WindowHandle(h),
                    ManagedWindow::new(
                        WindowHandle(h),
                        format!("app{h}.exe"),
                        format!("window {h}"),
                        "AppClass".into(),
                    ),
                )
            })
            .collect()
    }

    fn ws_with(handles: &[isize]) -> Workspace {
        let mut ws = Workspace::new("0".into(), true);
        ws.windows = handles.iter().map(|&h| WindowHandle(h)).collect();
        ws.active_index = if handles.is_empty() { None } else { Some(0) };
        ws
    }

    fn plain_theme(max_areas: usize) -> Theme {
        Theme {
            name: "test",
            layout: crate::layout::LayoutKind::Dwindle,
            gap: 0,
            max_tiling_areas: max_areas,
            static_layout: false,
            new_window_as_master: false,
            strict: true,
            affinity: |_| 0,
        }
    }

    #[test]
    fn remove_keeps_active_index_in_bounds() {
        let mut ws = ws_with(&[1, 2, 3]);
        ws.active_index = Some(2);
        ws.remove(WindowHandle(3));
        assert_eq!(ws.active_index, Some(1));
        ws.remove(WindowHandle(1));
        assert_eq!(ws.active_index, Some(0));
        ws.remove(WindowHandle(2));
        assert_eq!(ws.active_index, None);
    }

    #[test]
    fn minimized_windows_keep_slot_but_skip_layout() {
        let mut arena = arena_with(&[1, 2, 3]);
        arena.get_mut(&WindowHandle(2)).unwrap().minimized = true;
        let ws = ws_with(&[1, 2, 3]);
        let slots = layout_slots(&ws, &arena, &plain_theme(0));
        assert_eq!(slots, vec![Some(WindowHandle(1)), Some(WindowHandle(3))]);
        // the list itself still has all three
        assert_eq!(ws.windows.len(), 3);
    }

    #[test]
    fn non_tilable_windows_skip_layout() {
        let mut arena = arena_with(&[1, 2]);
        arena.get_mut(&WindowHandle(1)).unwrap().tilable = false;
        let ws = ws_with(&[1, 2]);
        let slots = layout_slots(&ws, &arena, &plain_theme(0));
        assert_eq!(slots, vec![Some(WindowHandle(2))]);
    }

    #[test]
    fn static_layout_pins_windows_to_their_slot() {
        let mut arena = arena_with(&[1, 2, 3]);
        arena.get_mut(&WindowHandle(3)).unwrap().static_index = Some(0);
        let ws = ws_with(&[1, 2, 3]);
        let mut theme = plain_theme(4);
        theme.static_layout = true;
        let slots = layout_slots(&ws, &arena, &theme);
        // pinned window takes slot 0, the others fill the holes in order
        assert_eq!(
            slots,
            vec![
                Some(WindowHandle(3)),
                Some(WindowHandle(1)),
                Some(WindowHandle(2)),
            ]
        );
    }

    #[test]
    fn duplicate_static_slot_spills_to_next_free() {
        let mut arena = arena_with(&[1, 2]);
        arena.get_mut(&WindowHandle(1)).unwrap().static_index = Some(0);
        arena.get_mut(&WindowHandle(2)).unwrap().static_index = Some(0);
        let ws = ws_with(&[1, 2]);
        let mut theme = plain_theme(4);
        theme.static_layout = true;
        let slots = layout_slots(&ws, &arena, &theme);
        assert_eq!(slots, vec![Some(WindowHandle(1)), Some(WindowHandle(2))]);
    }

    #[test]
    fn target_rects_match_dwindle() {
        let arena = arena_with(&[1, 2, 3]);
        let ws = ws_with(&[1, 2, 3]);
        let rects = target_rects(
            &layout_slots(&ws, &arena, &plain_theme(0)),
            &plain_theme(0),
            Rect::new(0, 0, 1920, 1080),
        );
        assert_eq!(
            rects,
            vec![
                (WindowHandle(1), Rect::new(0, 0, 960, 1080)),
                (WindowHandle(2), Rect::new(960, 0, 1920, 540)),
                (WindowHandle(3), Rect::new(960, 540, 1920, 1080)),
            ]
        );
    }

    #[test]
    fn overflow_stacks_in_last_area() {
        let arena = arena_with(&[1, 2, 3, 4, 5]);
        let ws = ws_with(&[1, 2, 3, 4, 5]);
        let theme = plain_theme(3);
        let slots = layout_slots(&ws, &arena, &theme);
        let rects = target_rects(&slots, &theme, Rect::new(0, 0, 1920, 1080));
        assert_eq!(rects.len(), 5);
        // first two get their own areas
        assert_eq!(rects[0].1, Rect::new(0, 0, 960, 1080));
        assert_eq!(rects[1].1, Rect::new(960, 0, 1920, 540));
        // the rest cascade inside the third area
        let last_area = Rect::new(960, 540, 1920, 1080);
        for (_, r) in &rects[2..] {
            assert!(r.left >= last_area.left && r.top >= last_area.top);
            assert!(r.right <= last_area.right && r.bottom <= last_area.bottom);
        }
        // cascading steps strictly right and down
        assert!(rects[3].1.left > rects[2].1.left);
        assert!(rects[4].1.top > rects[3].1.top);
    }

    #[test]
    fn park_container_is_far_off_screen() {
        let ms = MonitorState::new(
            r"\\.\DISPLAY1".into(),
            Rect::new(0, 0, 1920, 1080),
            Rect::new(0, 0, 1920, 1040),
            ScreenProfile::default(),
            &["0".into(), "1".into()],
            0,
        );
        let park0 = ms.park_container(0);
        let park1 = ms.park_container(1);
        assert!(park0.left <= -10000);
        assert!(park1.top >= park0.bottom);
    }

    #[test]
    fn effective_theme_honors_override() {
        let themes = default_themes();
        let mut ms = MonitorState::new(
            "m".into(),
            Rect::new(0, 0, 1920, 1080),
            Rect::new(0, 0, 1920, 1040),
            ScreenProfile::default(),
            &["0".into()],
            1,
        );
        assert_eq!(ms.effective_theme(), 1);
        ms.workspace_mut().theme_override = Some(4);
        assert_eq!(ms.effective_theme(), 4);
        let _ = themes;
    }
}
