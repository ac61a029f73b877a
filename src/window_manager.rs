//! The window-manager controller: reacts to window events coming off the
//! OS event hook, keeps the per-desktop monitor/workspace state in shape,
//! and services the command surface driven by hotkeys.
//!
//! Every operation that touches the OS goes through [`WindowBackend`], so
//! the whole controller runs against an in-memory backend in tests.

use crate::layout::{theme_for_monitor, ScreenProfile, Theme};
use crate::workspace::{layout_slots, target_rects, ManagedWindow, MonitorState, PARK_X};
use crate::{Point, Rect, Result, WindowHandle};
use anyhow::bail;
use log::{debug, info, warn};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Self-induced move events may differ from the requested rect by a couple
/// of pixels once the OS has applied frame constraints.
const MOVE_TOLERANCE: i32 = 2;
/// Activating a window in a hidden workspace switches to it, but not more
/// often than this, to break activation feedback loops.
const WS_SWITCH_DEBOUNCE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WindowInfo {
    pub handle: WindowHandle,
    pub exe: String,
    pub title: String,
    pub class_name: String,
    pub rect: Rect,
    pub minimized: bool,
}

#[derive(Debug, Clone)]
pub struct MonitorInfo {
    pub id: String,
    pub rect: Rect,
    pub workarea: Rect,
    pub profile: ScreenProfile,
}

/// The seam between the controller and the OS.
pub trait WindowBackend: Send {
    /// Currently attached monitors, any order.
    fn monitors(&mut self) -> Vec<MonitorInfo>;
    /// Manageable top-level windows, including ones parked off-screen.
    fn windows(&mut self) -> Vec<WindowInfo>;
    fn window_info(&mut self, handle: WindowHandle) -> Option<WindowInfo>;
    fn set_rect(&mut self, handle: WindowHandle, rect: Rect);
    fn activate(&mut self, handle: WindowHandle);
    fn minimize(&mut self, handle: WindowHandle);
    fn restore(&mut self, handle: WindowHandle);
    fn cursor_pos(&mut self) -> Point;
    fn set_cursor_pos(&mut self, x: i32, y: i32);
    fn foreground(&mut self) -> Option<WindowHandle>;
    /// Stable id of the current virtual desktop.
    fn desktop_id(&mut self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    Shown(WindowHandle),
    Destroyed(WindowHandle),
    Foreground(WindowHandle),
    Moved(WindowHandle, Rect),
    MinimizeChanged(WindowHandle),
    MoveSizeStart(WindowHandle),
    MoveSizeEnd(WindowHandle),
    DisplayChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    NextWindow,
    PrevWindow,
    SwapNext,
    SwapPrev,
    SetMaster,
    RollNext,
    RollPrev,
    ToggleTilable,
    ToggleMono,
    NextTheme,
    PrevTheme,
    SetTheme(usize),
    SwitchWorkspace(usize),
    NextWorkspace,
    PrevWorkspace,
    MoveToWorkspace(usize),
    NextMonitor,
    PrevMonitor,
    MoveToNextMonitor,
    MoveToPrevMonitor,
    ArrangeAll,
    Quit,
}

impl Command {
    /// Parse an action string from the hotkey table, e.g. `"next_window"`
    /// or `"switch_to_workspace:2"`.
    pub fn parse(action: &str) -> Result<Command> {
        let (name, arg) = match action.split_once(':') {
            Some((n, a)) => (n, Some(a)),
            None => (action, None),
        };
        let index = || -> Result<usize> {
            match arg {
                Some(a) => Ok(a.trim().parse()?),
                None => bail!("action {action:?} needs a numeric argument"),
            }
        };
        Ok(match name {
            "next_window" => Command::NextWindow,
            "prev_window" => Command::PrevWindow,
            "swap_next" => Command::SwapNext,
            "swap_prev" => Command::SwapPrev,
            "set_master" => Command::SetMaster,
            "roll_next" => Command::RollNext,
            "roll_prev" => Command::RollPrev,
            "toggle_tilable" => Command::ToggleTilable,
            "toggle_mono" => Command::ToggleMono,
            "next_theme" => Command::NextTheme,
            "prev_theme" => Command::PrevTheme,
            "set_theme" => Command::SetTheme(index()?),
            "switch_to_workspace" => Command::SwitchWorkspace(index()?),
            "next_workspace" => Command::NextWorkspace,
            "prev_workspace" => Command::PrevWorkspace,
            "move_to_workspace" => Command::MoveToWorkspace(index()?),
            "next_monitor" => Command::NextMonitor,
            "prev_monitor" => Command::PrevMonitor,
            "move_to_next_monitor" => Command::MoveToNextMonitor,
            "move_to_prev_monitor" => Command::MoveToPrevMonitor,
            "arrange_all" => Command::ArrangeAll,
            "quit" => Command::Quit,
            _ => bail!("unknown action: {action:?}"),
        })
    }
}

/// Matcher over window attributes; all present patterns must match.
#[derive(Debug, Clone)]
pub struct WindowRule {
    pub exe: Option<Regex>,
    pub title: Option<Regex>,
    pub class_name: Option<Regex>,
    pub manageable: Option<bool>,
    pub tilable: Option<bool>,
    pub preferred_monitor: Option<usize>,
    pub preferred_workspace: Option<usize>,
    pub static_index: Option<usize>,
}

impl WindowRule {
    pub fn matches(&self, info: &WindowInfo) -> bool {
        fn hit(pattern: &Option<Regex>, target: &str) -> bool {
            match pattern {
                Some(p) => !target.is_empty() && p.is_match(target),
                None => true,
            }
        }
        hit(&self.exe, &info.exe)
            && hit(&self.title, &info.title)
            && hit(&self.class_name, &info.class_name)
    }
}

/// Configuration shared by every desktop.
pub struct WmOptions {
    pub themes: Vec<Theme>,
    pub rules: Vec<WindowRule>,
    pub workspace_names: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
struct Drag {
    handle: WindowHandle,
    start_rect: Rect,
}

/// All window-management state of one virtual desktop. Rebuilt from live
/// enumeration when a desktop is first seen.
#[derive(Default)]
pub struct DeskState {
    pub monitors: Vec<MonitorState>,
    pub windows: HashMap<WindowHandle, ManagedWindow>,
    /// Windows a rule declared unmanageable; kept so rules run once.
    ignored: HashSet<WindowHandle>,
    /// active-workspace/theme of unplugged monitors, keyed by device id,
    /// restored if the monitor comes back.
    retired: HashMap<String, (usize, usize)>,
    drag: Option<Drag>,
    no_ws_switch_until: Option<Instant>,
}

impl DeskState {
    pub fn locate(&self, handle: WindowHandle) -> Option<(usize, usize, usize)> {
        for (mi, mon) in self.monitors.iter().enumerate() {
            for (wi, ws) in mon.workspaces.iter().enumerate() {
                if let Some(slot) = ws.windows.iter().position(|&h| h == handle) {
                    return Some((mi, wi, slot));
                }
            }
        }
        None
    }

    fn monitor_from_point(&self, p: Point) -> usize {
        self.monitors
            .iter()
            .position(|m| m.rect.contains(p.x, p.y))
            .unwrap_or(0)
    }

    fn monitor_from_rect(&self, rect: &Rect) -> Option<usize> {
        let c = rect.center();
        self.monitors.iter().position(|m| m.rect.contains(c.x, c.y))
    }
}

fn monitor_from_cursor<B: WindowBackend>(desk: &DeskState, backend: &mut B) -> usize {
    let p = backend.cursor_pos();
    desk.monitor_from_point(p)
}

/// Re-scan the monitor topology and fold changes into the desk state.
pub fn sync_monitors<B: WindowBackend>(opts: &WmOptions, desk: &mut DeskState, backend: &mut B) {
    let mut infos = backend.monitors();
    if infos.is_empty() {
        warn!("no monitors reported, keeping previous state");
        return;
    }
    infos.sort_by(|a, b| a.id.cmp(&b.id));
    let same = desk.monitors.len() == infos.len()
        && desk
            .monitors
            .iter()
            .zip(&infos)
            .all(|(m, i)| m.id == i.id && m.rect == i.rect && m.workarea == i.workarea);
    if same {
        return;
    }
    info!("monitor topology changed: {} monitor(s)", infos.len());
    let mut orphans: Vec<WindowHandle> = Vec::new();
    let old: Vec<MonitorState> = std::mem::take(&mut desk.monitors);
    let mut old_by_id: HashMap<String, MonitorState> = HashMap::new();
    for m in old {
        old_by_id.insert(m.id.clone(), m);
    }
    for info in infos {
        match old_by_id.remove(&info.id) {
            Some(mut existing) => {
                existing.rect = info.rect;
                existing.workarea = info.workarea;
                existing.profile = info.profile;
                desk.monitors.push(existing);
            }
            None => {
                let theme = match desk.retired.remove(&info.id) {
                    Some((active_ws, theme)) => {
                        let mut ms = MonitorState::new(
                            info.id.clone(),
                            info.rect,
                            info.workarea,
                            info.profile,
                            &opts.workspace_names,
                            theme,
                        );
                        ms.active_workspace = active_ws.min(ms.workspaces.len() - 1);
                        desk.monitors.push(ms);
                        continue;
                    }
                    None => theme_for_monitor(&opts.themes, &info.profile),
                };
                desk.monitors.push(MonitorState::new(
                    info.id.clone(),
                    info.rect,
                    info.workarea,
                    info.profile,
                    &opts.workspace_names,
                    theme,
                ));
            }
        }
    }
    // windows of unplugged monitors get redistributed below
    for (_, ms) in old_by_id {
        desk.retired
            .insert(ms.id.clone(), (ms.active_workspace, ms.theme));
        for ws in &ms.workspaces {
            orphans.extend(ws.windows.iter().copied());
        }
    }
    for handle in orphans {
        place_window(opts, desk, backend, handle, true);
    }
    arrange_all(opts, desk, backend);
}

/// Poll the window population and adopt/evict accordingly. On start-up,
/// windows parked off-screen by a previous instance are matched back to
/// the workspace whose parking area contains them.
pub fn sync_windows<B: WindowBackend>(
    opts: &WmOptions,
    desk: &mut DeskState,
    backend: &mut B,
    starting_up: bool,
) {
    let infos = backend.windows();
    let live: HashSet<WindowHandle> = infos.iter().map(|i| i.handle).collect();
    let gone: Vec<WindowHandle> = desk
        .windows
        .keys()
        .copied()
        .filter(|h| !live.contains(h))
        .collect();
    let mut changed = !gone.is_empty();
    for handle in gone {
        info!("window disappeared: {handle:?}");
        remove_window(desk, handle);
    }
    desk.ignored.retain(|h| live.contains(h));
    for info in infos {
        if desk.windows.contains_key(&info.handle) {
            if let Some(w) = desk.windows.get_mut(&info.handle) {
                if w.minimized != info.minimized {
                    w.minimized = info.minimized;
                    changed = true;
                }
                w.title = info.title;
            }
            continue;
        }
        if desk.ignored.contains(&info.handle) {
            continue;
        }
        changed = true;
        adopt_window(opts, desk, backend, info, starting_up);
    }
    if changed {
        arrange_all(opts, desk, backend);
    }
}

fn adopt_window<B: WindowBackend>(
    opts: &WmOptions,
    desk: &mut DeskState,
    backend: &mut B,
    info: WindowInfo,
    starting_up: bool,
) {
    let rule = opts.rules.iter().find(|r| r.matches(&info));
    if let Some(rule) = rule {
        if rule.manageable == Some(false) {
            debug!("ignoring {} ({})", info.title, info.exe);
            desk.ignored.insert(info.handle);
            return;
        }
    }
    let mut window = ManagedWindow::new(info.handle, info.exe, info.title, info.class_name);
    window.rect = info.rect;
    window.minimized = info.minimized;
    if let Some(rule) = rule {
        if let Some(tilable) = rule.tilable {
            window.tilable = tilable;
        }
        window.static_index = rule.static_index;
        window.preferred_monitor = rule.preferred_monitor;
        window.preferred_workspace = rule.preferred_workspace;
    }
    info!(
        "managing window {:?} exe={} title={}",
        window.handle, window.exe, window.title
    );
    // a window sitting in a parking area belongs to the hidden workspace
    // that parked it, left behind by a previous instance
    if starting_up && info.rect.left <= PARK_X / 2 {
        for mi in 0..desk.monitors.len() {
            for wi in 0..desk.monitors[mi].workspaces.len() {
                if desk.monitors[mi]
                    .park_container(wi)
                    .contains_center_of(&info.rect)
                {
                    window.off = true;
                    let handle = window.handle;
                    desk.windows.insert(handle, window);
                    desk.monitors[mi].workspaces[wi].windows.push(handle);
                    info!("reclaimed parked window {handle:?} into workspace {wi}");
                    return;
                }
            }
        }
    }
    let handle = window.handle;
    desk.windows.insert(handle, window);
    place_window(opts, desk, backend, handle, starting_up);
}

/// Put a (possibly re-homed) window into a concrete workspace list.
fn place_window<B: WindowBackend>(
    opts: &WmOptions,
    desk: &mut DeskState,
    backend: &mut B,
    handle: WindowHandle,
    by_position: bool,
) {
    if desk.monitors.is_empty() {
        warn!("no monitors, cannot place {handle:?}");
        return;
    }
    let Some(window) = desk.windows.get(&handle) else {
        return;
    };
    let mon_count = desk.monitors.len();
    let mi = match window.preferred_monitor {
        Some(p) => p % mon_count,
        None if by_position => desk
            .monitor_from_rect(&window.rect)
            .unwrap_or_else(|| monitor_from_cursor(desk, backend)),
        None => monitor_from_cursor(desk, backend),
    };
    let mon = &desk.monitors[mi];
    let wi = window
        .preferred_workspace
        .map(|p| p % mon.workspaces.len())
        .unwrap_or(mon.active_workspace);
    let as_master = opts.themes[mon.effective_theme()].new_window_as_master;
    let ws = &mut desk.monitors[mi].workspaces[wi];
    if as_master {
        ws.windows.insert(0, handle);
        ws.active_index = Some(0);
    } else {
        ws.windows.push(handle);
        if ws.active_index.is_none() {
            ws.active_index = Some(0);
        }
    }
    let hidden = wi != desk.monitors[mi].active_workspace;
    if hidden {
        let container = desk.monitors[mi].park_container(wi);
        park_window(desk, backend, handle, mi, container, false);
    } else if desk.windows.get(&handle).map(|w| w.off).unwrap_or(false) {
        // re-homed into a visible workspace while still parked (its old
        // monitor is gone, so the parking container cannot be rebased)
        let workarea = desk.monitors[mi].workarea;
        if let Some(w) = desk.windows.get_mut(&handle) {
            w.off = false;
            if !w.tilable {
                let width = w.rect.width().min(workarea.width());
                let height = w.rect.height().min(workarea.height());
                let c = workarea.center();
                let dest =
                    Rect::new(c.x - width / 2, c.y - height / 2, c.x + width / 2, c.y + height / 2);
                w.expected_rect = Some(dest);
                w.rect = dest;
                backend.set_rect(handle, dest);
            }
        }
    }
    debug!("placed {handle:?} on monitor {mi} workspace {wi}");
}

fn remove_window(desk: &mut DeskState, handle: WindowHandle) {
    if let Some((mi, wi, _)) = desk.locate(handle) {
        desk.monitors[mi].workspaces[wi].remove(handle);
    }
    desk.windows.remove(&handle);
}

/// Apply the active workspace layout of one monitor. Only windows whose
/// rect actually differs get a positioning call, which keeps this both
/// idempotent and loop-free together with the expected-rect check.
pub fn arrange<B: WindowBackend>(
    opts: &WmOptions,
    desk: &mut DeskState,
    backend: &mut B,
    mi: usize,
) {
    let Some(mon) = desk.monitors.get(mi) else {
        return;
    };
    let theme = opts.themes[mon.effective_theme()].clone();
    let ws = mon.workspace();
    let slots = layout_slots(ws, &desk.windows, &theme);
    let targets = target_rects(&slots, &theme, mon.workarea);
    debug!(
        "arranging monitor {mi} ({}): {} tiled of {} windows",
        theme.name,
        targets.len(),
        ws.windows.len()
    );
    for (handle, rect) in targets {
        let Some(window) = desk.windows.get_mut(&handle) else {
            continue;
        };
        window.restricted_rect = Some(rect);
        if window.off || window.rect == rect {
            continue;
        }
        window.expected_rect = Some(rect);
        window.rect = rect;
        backend.set_rect(handle, rect);
    }
}

pub fn arrange_all<B: WindowBackend>(opts: &WmOptions, desk: &mut DeskState, backend: &mut B) {
    for mi in 0..desk.monitors.len() {
        arrange(opts, desk, backend, mi);
    }
}

/// Move one window into or out of the parking area of workspace `wi`.
fn park_window<B: WindowBackend>(
    desk: &mut DeskState,
    backend: &mut B,
    handle: WindowHandle,
    mi: usize,
    container: Rect,
    show: bool,
) {
    let workarea = desk.monitors[mi].workarea;
    let Some(window) = desk.windows.get_mut(&handle) else {
        return;
    };
    if window.off != show {
        // already on the requested side
        return;
    }
    let (from, to) = if show {
        (container, workarea)
    } else {
        (workarea, container)
    };
    let dest = window.rect.rebase(&from, &to);
    window.off = !show;
    window.expected_rect = Some(dest);
    window.rect = dest;
    backend.set_rect(handle, dest);
}

/// Hide the current workspace off-screen, reveal the requested one and
/// re-assert its layout.
pub fn switch_workspace<B: WindowBackend>(
    opts: &WmOptions,
    desk: &mut DeskState,
    backend: &mut B,
    mi: usize,
    target: usize,
) {
    let Some(mon) = desk.monitors.get(mi) else {
        return;
    };
    let count = mon.workspaces.len();
    let target = target % count;
    let current = mon.active_workspace;
    if target == current {
        debug!("already on workspace {target}");
        return;
    }
    info!("monitor {mi}: workspace {current} -> {target}");
    let hide: Vec<WindowHandle> = mon.workspaces[current].windows.clone();
    let show: Vec<WindowHandle> = mon.workspaces[target].windows.clone();
    let hide_container = mon.park_container(current);
    let show_container = mon.park_container(target);
    for handle in hide {
        park_window(desk, backend, handle, mi, hide_container, false);
    }
    for handle in show {
        park_window(desk, backend, handle, mi, show_container, true);
    }
    desk.monitors[mi].active_workspace = target;
    arrange(opts, desk, backend, mi);
    if let Some(handle) = desk.monitors[mi].workspace().active_window() {
        focus_window(desk, backend, handle);
    }
}

/// Bring a window to the foreground and warp the cursor to its center.
fn focus_window<B: WindowBackend>(desk: &mut DeskState, backend: &mut B, handle: WindowHandle) {
    if let Some((mi, wi, slot)) = desk.locate(handle) {
        desk.monitors[mi].workspaces[wi].active_index = Some(slot);
    }
    let center = desk
        .windows
        .get(&handle)
        .map(|w| w.rect.center())
        .unwrap_or_default();
    backend.activate(handle);
    backend.set_cursor_pos(center.x, center.y);
}

/// The foreground window, provided it is one of ours.
fn managed_foreground<B: WindowBackend>(
    desk: &DeskState,
    backend: &mut B,
) -> Option<WindowHandle> {
    backend
        .foreground()
        .filter(|h| desk.windows.contains_key(h))
}

/// Reorder the active workspace list of the cursor monitor with `edit`,
/// which receives the list and the active slot and returns the slot to
/// activate afterwards.
fn reorder<B: WindowBackend>(
    opts: &WmOptions,
    desk: &mut DeskState,
    backend: &mut B,
    edit: impl FnOnce(&mut Vec<WindowHandle>, usize) -> usize,
) {
    let mi = monitor_from_cursor(desk, backend);
    let ws = desk.monitors[mi].workspace_mut();
    let Some(active) = ws.active_index else {
        return;
    };
    if ws.windows.len() < 2 {
        return;
    }
    let next = edit(&mut ws.windows, active);
    ws.active_index = Some(next.min(ws.windows.len() - 1));
    arrange(opts, desk, backend, mi);
    if let Some(handle) = desk.monitors[mi].workspace().active_window() {
        focus_window(desk, backend, handle);
    }
}

fn step_window<B: WindowBackend>(desk: &mut DeskState, backend: &mut B, delta: i32) {
    let mi = monitor_from_cursor(desk, backend);
    let ws = desk.monitors[mi].workspace_mut();
    let n = ws.windows.len();
    if n == 0 {
        return;
    }
    let mut index = ws.active_index.unwrap_or(0);
    // skip minimized windows, they keep their slot but cannot take focus
    for _ in 0..n {
        index = (index as i64 + delta as i64).rem_euclid(n as i64) as usize;
        let handle = ws.windows[index];
        let minimized = desk
            .windows
            .get(&handle)
            .map(|w| w.minimized)
            .unwrap_or(false);
        if !minimized {
            focus_window(desk, backend, handle);
            return;
        }
    }
}

fn move_window_to_monitor<B: WindowBackend>(
    opts: &WmOptions,
    desk: &mut DeskState,
    backend: &mut B,
    handle: WindowHandle,
    dst: usize,
) {
    let Some((src, wi, _)) = desk.locate(handle) else {
        return;
    };
    if src == dst || dst >= desk.monitors.len() {
        return;
    }
    desk.monitors[src].workspaces[wi].remove(handle);
    if let Some(w) = desk.windows.get_mut(&handle) {
        w.preferred_monitor = Some(dst);
        w.preferred_workspace = None;
        w.off = false;
    }
    let target_ws = desk.monitors[dst].active_workspace;
    let as_master = opts.themes[desk.monitors[dst].effective_theme()].new_window_as_master;
    let ws = &mut desk.monitors[dst].workspaces[target_ws];
    if as_master {
        ws.windows.insert(0, handle);
    } else {
        ws.windows.push(handle);
    }
    ws.activate(handle);
    arrange(opts, desk, backend, src);
    arrange(opts, desk, backend, dst);
    focus_window(desk, backend, handle);
}

fn move_window_to_workspace<B: WindowBackend>(
    opts: &WmOptions,
    desk: &mut DeskState,
    backend: &mut B,
    handle: WindowHandle,
    target: usize,
) {
    let Some((mi, wi, _)) = desk.locate(handle) else {
        return;
    };
    let count = desk.monitors[mi].workspaces.len();
    let target = target % count;
    if target == wi {
        return;
    }
    info!("moving {handle:?} to workspace {target}");
    desk.monitors[mi].workspaces[wi].remove(handle);
    desk.monitors[mi].workspaces[target].windows.push(handle);
    desk.monitors[mi].workspaces[target].activate(handle);
    if let Some(w) = desk.windows.get_mut(&handle) {
        w.preferred_workspace = Some(target);
    }
    if target != desk.monitors[mi].active_workspace {
        let container = desk.monitors[mi].park_container(target);
        park_window(desk, backend, handle, mi, container, false);
    }
    arrange(opts, desk, backend, mi);
    if let Some(next) = desk.monitors[mi].workspace().active_window() {
        focus_window(desk, backend, next);
    }
}

/// Index of the tiling area currently under the cursor, for drag-drop
/// reordering.
fn slot_from_cursor<B: WindowBackend>(
    opts: &WmOptions,
    desk: &DeskState,
    backend: &mut B,
    mi: usize,
) -> Option<usize> {
    let p = backend.cursor_pos();
    let mon = &desk.monitors[mi];
    let theme = &opts.themes[mon.effective_theme()];
    let slots = layout_slots(mon.workspace(), &desk.windows, theme);
    let targets = target_rects(&slots, theme, mon.workarea);
    let hit = targets.iter().find(|(_, r)| r.contains(p.x, p.y))?;
    mon.workspace().windows.iter().position(|&h| h == hit.0)
}

/// One virtual-desktop-aware window manager.
///
/// Commands arrive over a channel from hotkey callbacks running on the
/// daemon; window events arrive from the OS event hook. A coarse refresh
/// tick doubles as the poll for window and monitor changes the event
/// stream does not announce.
pub struct WindowManager<B: WindowBackend> {
    opts: WmOptions,
    backend: B,
    desktops: HashMap<String, DeskState>,
    event_rx: mpsc::UnboundedReceiver<WindowEvent>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    started: bool,
}

impl<B: WindowBackend> WindowManager<B> {
    pub fn new(
        opts: WmOptions,
        backend: B,
        event_rx: mpsc::UnboundedReceiver<WindowEvent>,
        command_rx: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            opts,
            backend,
            desktops: HashMap::new(),
            event_rx,
            command_rx,
            started: false,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        info!("starting window manager event loop");
        self.refresh();
        let mut refresh_timer = tokio::time::interval(Duration::from_millis(1000));
        loop {
            tokio::select! {
                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event);
                }
                Some(command) = self.command_rx.recv() => {
                    if command == Command::Quit {
                        info!("shutting down window manager");
                        self.release_hidden_workspaces();
                        return Ok(());
                    }
                    self.handle_command(command);
                }
                _ = refresh_timer.tick() => {
                    self.refresh();
                }
            }
        }
    }

    /// Poll for monitor and window changes the event hook cannot deliver.
    pub fn refresh(&mut self) {
        let starting_up = !self.started;
        self.started = true;
        let id = self.backend.desktop_id();
        let desk = self.desktops.entry(id).or_default();
        sync_monitors(&self.opts, desk, &mut self.backend);
        sync_windows(&self.opts, desk, &mut self.backend, starting_up);
    }

    pub fn handle_event(&mut self, event: WindowEvent) {
        debug!("window event: {event:?}");
        let id = self.backend.desktop_id();
        let desk = self.desktops.entry(id).or_default();
        match event {
            WindowEvent::DisplayChange => {
                sync_monitors(&self.opts, desk, &mut self.backend);
            }
            WindowEvent::Shown(_) | WindowEvent::Destroyed(_) => {
                sync_windows(&self.opts, desk, &mut self.backend, false);
            }
            WindowEvent::MinimizeChanged(handle) => {
                if let Some(info) = self.backend.window_info(handle) {
                    if let Some(w) = desk.windows.get_mut(&handle) {
                        w.minimized = info.minimized;
                    }
                }
                if let Some((mi, _, _)) = desk.locate(handle) {
                    arrange(&self.opts, desk, &mut self.backend, mi);
                }
            }
            WindowEvent::Foreground(handle) => {
                if desk.drag.is_some() {
                    return;
                }
                let Some((mi, wi, slot)) = desk.locate(handle) else {
                    return;
                };
                desk.monitors[mi].workspaces[wi].active_index = Some(slot);
                if wi != desk.monitors[mi].active_workspace {
                    // a hidden window got activated (e.g. a ctrl-click
                    // opened a link in a parked browser): follow it, but
                    // debounced so loops cannot ping-pong workspaces
                    let now = Instant::now();
                    if desk.no_ws_switch_until.map(|t| now < t).unwrap_or(false) {
                        warn!("workspace switch debounced for {handle:?}");
                        return;
                    }
                    desk.no_ws_switch_until = Some(now + WS_SWITCH_DEBOUNCE);
                    switch_workspace(&self.opts, desk, &mut self.backend, mi, wi);
                }
            }
            WindowEvent::Moved(handle, rect) => {
                if desk.drag.map(|d| d.handle) == Some(handle) {
                    // coalesced: resolved on drag end
                    return;
                }
                let Some(window) = desk.windows.get_mut(&handle) else {
                    return;
                };
                if let Some(expected) = window.expected_rect {
                    if expected.almost_eq(&rect, MOVE_TOLERANCE) {
                        // our own positioning echoed back
                        window.expected_rect = None;
                        window.rect = rect;
                        return;
                    }
                }
                window.rect = rect;
            }
            WindowEvent::MoveSizeStart(handle) => {
                if let Some(window) = desk.windows.get(&handle) {
                    desk.drag = Some(Drag {
                        handle,
                        start_rect: window.rect,
                    });
                }
            }
            WindowEvent::MoveSizeEnd(handle) => {
                let Some(drag) = desk.drag.take() else {
                    return;
                };
                if drag.handle != handle {
                    return;
                }
                self.finish_drag(handle, drag.start_rect);
            }
        }
    }

    fn finish_drag(&mut self, handle: WindowHandle, start_rect: Rect) {
        let id = self.backend.desktop_id();
        let desk = self.desktops.entry(id).or_default();
        let Some(info) = self.backend.window_info(handle) else {
            return;
        };
        if let Some(w) = desk.windows.get_mut(&handle) {
            w.rect = info.rect;
        }
        let Some((mi, _, slot)) = desk.locate(handle) else {
            return;
        };
        let cursor_mon = monitor_from_cursor(desk, &mut self.backend);
        if cursor_mon != mi {
            info!("drag moved {handle:?} to monitor {cursor_mon}");
            move_window_to_monitor(&self.opts, desk, &mut self.backend, handle, cursor_mon);
            return;
        }
        let theme = &self.opts.themes[desk.monitors[mi].effective_theme()];
        let tilable = desk
            .windows
            .get(&handle)
            .map(|w| w.tilable)
            .unwrap_or(false);
        let resized = {
            let r = desk.windows.get(&handle).map(|w| w.rect).unwrap_or_default();
            r.width() != start_rect.width() || r.height() != start_rect.height()
        };
        if tilable && !theme.static_layout && !resized {
            if let Some(target) = slot_from_cursor(&self.opts, desk, &mut self.backend, mi) {
                if target != slot {
                    info!("drag reordered {handle:?}: slot {slot} -> {target}");
                    let ws = desk.monitors[mi].workspace_mut();
                    ws.windows.swap(slot, target);
                    ws.active_index = Some(target);
                }
            }
        }
        if theme.strict {
            // snap everything back to its assigned rect
            restrict(desk, &mut self.backend, mi);
            arrange(&self.opts, desk, &mut self.backend, mi);
        }
    }

    pub fn handle_command(&mut self, command: Command) {
        debug!("command: {command:?}");
        let id = self.backend.desktop_id();
        let desk = self.desktops.entry(id).or_default();
        if desk.monitors.is_empty() {
            return;
        }
        match command {
            Command::NextWindow => step_window(desk, &mut self.backend, 1),
            Command::PrevWindow => step_window(desk, &mut self.backend, -1),
            Command::SwapNext => reorder(&self.opts, desk, &mut self.backend, |list, i| {
                let j = (i + 1) % list.len();
                list.swap(i, j);
                j
            }),
            Command::SwapPrev => reorder(&self.opts, desk, &mut self.backend, |list, i| {
                let j = (i + list.len() - 1) % list.len();
                list.swap(i, j);
                j
            }),
            Command::SetMaster => reorder(&self.opts, desk, &mut self.backend, |list, i| {
                let src = if i == 0 { 1 } else { i };
                list.swap(0, src);
                0
            }),
            Command::RollNext => reorder(&self.opts, desk, &mut self.backend, |list, i| {
                list.rotate_right(1);
                (i + 1) % list.len()
            }),
            Command::RollPrev => reorder(&self.opts, desk, &mut self.backend, |list, i| {
                list.rotate_left(1);
                (i + list.len() - 1) % list.len()
            }),
            Command::ToggleTilable => {
                let Some(handle) = managed_foreground(desk, &mut self.backend) else {
                    return;
                };
                if let Some(w) = desk.windows.get_mut(&handle) {
                    w.tilable = !w.tilable;
                    info!("{handle:?} tilable: {}", w.tilable);
                }
                if let Some((mi, _, _)) = desk.locate(handle) {
                    arrange(&self.opts, desk, &mut self.backend, mi);
                }
            }
            Command::ToggleMono => {
                let mi = monitor_from_cursor(desk, &mut self.backend);
                let mono = self
                    .opts
                    .themes
                    .iter()
                    .position(|t| t.layout == crate::layout::LayoutKind::Monocle);
                let Some(mono) = mono else {
                    warn!("no monocle theme configured");
                    return;
                };
                let current = desk.monitors[mi].theme;
                let ws = desk.monitors[mi].workspace_mut();
                if ws.theme_override == Some(mono) {
                    ws.theme_override = ws.prev_theme.take().filter(|&t| t != current);
                } else {
                    ws.prev_theme = ws.theme_override;
                    ws.theme_override = Some(mono);
                }
                arrange(&self.opts, desk, &mut self.backend, mi);
            }
            Command::NextTheme | Command::PrevTheme => {
                let delta: i64 = if command == Command::NextTheme { 1 } else { -1 };
                let mi = monitor_from_cursor(desk, &mut self.backend);
                let n = self.opts.themes.len() as i64;
                let current = desk.monitors[mi].theme as i64;
                desk.monitors[mi].theme = ((current + delta).rem_euclid(n)) as usize;
                desk.monitors[mi].workspace_mut().theme_override = None;
                info!(
                    "monitor {mi} theme: {}",
                    self.opts.themes[desk.monitors[mi].theme].name
                );
                arrange(&self.opts, desk, &mut self.backend, mi);
            }
            Command::SetTheme(index) => {
                if index >= self.opts.themes.len() {
                    warn!("theme index {index} out of range");
                    return;
                }
                let mi = monitor_from_cursor(desk, &mut self.backend);
                desk.monitors[mi].theme = index;
                desk.monitors[mi].workspace_mut().theme_override = None;
                arrange(&self.opts, desk, &mut self.backend, mi);
            }
            Command::SwitchWorkspace(index) => {
                let mi = monitor_from_cursor(desk, &mut self.backend);
                switch_workspace(&self.opts, desk, &mut self.backend, mi, index);
            }
            Command::NextWorkspace | Command::PrevWorkspace => {
                let delta: i64 = if command == Command::NextWorkspace { 1 } else { -1 };
                let mi = monitor_from_cursor(desk, &mut self.backend);
                let n = desk.monitors[mi].workspaces.len() as i64;
                let target = (desk.monitors[mi].active_workspace as i64 + delta).rem_euclid(n);
                switch_workspace(&self.opts, desk, &mut self.backend, mi, target as usize);
            }
            Command::MoveToWorkspace(index) => {
                if let Some(handle) = managed_foreground(desk, &mut self.backend) {
                    move_window_to_workspace(&self.opts, desk, &mut self.backend, handle, index);
                }
            }
            Command::NextMonitor | Command::PrevMonitor => {
                let delta: i64 = if command == Command::NextMonitor { 1 } else { -1 };
                let n = desk.monitors.len() as i64;
                let mi = monitor_from_cursor(desk, &mut self.backend) as i64;
                let dst = ((mi + delta).rem_euclid(n)) as usize;
                match desk.monitors[dst].workspace().active_window() {
                    Some(handle) => focus_window(desk, &mut self.backend, handle),
                    None => {
                        let c = desk.monitors[dst].rect.center();
                        self.backend.set_cursor_pos(c.x, c.y);
                    }
                }
            }
            Command::MoveToNextMonitor | Command::MoveToPrevMonitor => {
                let delta: i64 = if command == Command::MoveToNextMonitor {
                    1
                } else {
                    -1
                };
                let n = desk.monitors.len() as i64;
                if n < 2 {
                    return;
                }
                let Some(handle) = managed_foreground(desk, &mut self.backend) else {
                    return;
                };
                let Some((mi, _, _)) = desk.locate(handle) else {
                    return;
                };
                let dst = ((mi as i64 + delta).rem_euclid(n)) as usize;
                move_window_to_monitor(&self.opts, desk, &mut self.backend, handle, dst);
            }
            Command::ArrangeAll => arrange_all(&self.opts, desk, &mut self.backend),
            Command::Quit => {}
        }
    }

    /// Reveal every hidden workspace so no window is left stranded
    /// off-screen when we exit.
    fn release_hidden_workspaces(&mut self) {
        for desk in self.desktops.values_mut() {
            for mi in 0..desk.monitors.len() {
                for wi in 0..desk.monitors[mi].workspaces.len() {
                    let container = desk.monitors[mi].park_container(wi);
                    let handles: Vec<WindowHandle> =
                        desk.monitors[mi].workspaces[wi].windows.clone();
                    for handle in handles {
                        park_window(desk, &mut self.backend, handle, mi, container, true);
                    }
                }
            }
        }
    }

    #[cfg(test)]
    fn desk(&mut self) -> &mut DeskState {
        let id = self.backend.desktop_id();
        self.desktops.entry(id).or_default()
    }

    #[cfg(test)]
    fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

/// Push every tiled window of the monitor back to its assigned rect.
fn restrict<B: WindowBackend>(desk: &mut DeskState, backend: &mut B, mi: usize) {
    let handles: Vec<WindowHandle> = desk.monitors[mi].workspace().windows.clone();
    for handle in handles {
        let Some(window) = desk.windows.get_mut(&handle) else {
            continue;
        };
        if !window.tilable || window.minimized || window.off {
            continue;
        }
        if let Some(rect) = window.restricted_rect {
            if window.rect != rect {
                window.expected_rect = Some(rect);
                window.rect = rect;
                backend.set_rect(handle, rect);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::default_themes;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct FakeBackend {
        monitors: Vec<MonitorInfo>,
        windows: Vec<WindowInfo>,
        cursor: Point,
        foreground: Option<WindowHandle>,
        set_rect_calls: Vec<(WindowHandle, Rect)>,
        activations: VecDeque<WindowHandle>,
    }

    impl FakeBackend {
        fn single_monitor() -> Self {
            Self {
                monitors: vec![MonitorInfo {
                    id: r"\\.\DISPLAY1".into(),
                    rect: Rect::new(0, 0, 1920, 1080),
                    workarea: Rect::new(0, 0, 1920, 1080),
                    profile: ScreenProfile::default(),
                }],
                cursor: Point { x: 10, y: 10 },
                ..Default::default()
            }
        }

        fn dual_monitor() -> Self {
            let mut b = Self::single_monitor();
            b.monitors.push(MonitorInfo {
                id: r"\\.\DISPLAY2".into(),
                rect: Rect::new(1920, 0, 3840, 1080),
                workarea: Rect::new(1920, 0, 3840, 1080),
                profile: ScreenProfile::default(),
            });
            b
        }

        fn add_window(&mut self, handle: isize, exe: &str, title: &str) {
            self.windows.push(WindowInfo {
                handle: WindowHandle(handle),
                exe: exe.into(),
                title: title.into(),
                class_name: "AppClass".into(),
                rect: Rect::new(100, 100, 700, 500),
                minimized: false,
            });
        }
    }

    impl WindowBackend for FakeBackend {
        fn monitors(&mut self) -> Vec<MonitorInfo> {
            self.monitors.clone()
        }
        fn windows(&mut self) -> Vec<WindowInfo> {
            self.windows.clone()
        }
        fn window_info(&mut self, handle: WindowHandle) -> Option<WindowInfo> {
            self.windows.iter().find(|w| w.handle == handle).cloned()
        }
        fn set_rect(&mut self, handle: WindowHandle, rect: Rect) {
            self.set_rect_calls.push((handle, rect));
            if let Some(w) = self.windows.iter_mut().find(|w| w.handle == handle) {
                w.rect = rect;
            }
        }
        fn activate(&mut self, handle: WindowHandle) {
            self.foreground = Some(handle);
            self.activations.push_back(handle);
        }
        fn minimize(&mut self, handle: WindowHandle) {
            if let Some(w) = self.windows.iter_mut().find(|w| w.handle == handle) {
                w.minimized = true;
            }
        }
        fn restore(&mut self, handle: WindowHandle) {
            if let Some(w) = self.windows.iter_mut().find(|w| w.handle == handle) {
                w.minimized = false;
            }
        }
        fn cursor_pos(&mut self) -> Point {
            self.cursor
        }
        fn set_cursor_pos(&mut self, x: i32, y: i32) {
            self.cursor = Point { x, y };
        }
        fn foreground(&mut self) -> Option<WindowHandle> {
            self.foreground
        }
        fn desktop_id(&mut self) -> String {
            "desktop-1".into()
        }
    }

    fn plain_opts() -> WmOptions {
        let mut themes = default_themes();
        // dwindle without an area cap keeps the expectations simple
        for t in &mut themes {
            t.gap = 0;
            t.max_tiling_areas = 0;
            t.new_window_as_master = false;
        }
        let dwindle = themes
            .iter()
            .position(|t| t.layout == crate::layout::LayoutKind::Dwindle)
            .unwrap();
        themes.swap(0, dwindle);
        themes[0].affinity = |_| 100;
        WmOptions {
            themes,
            rules: Vec::new(),
            workspace_names: vec!["0".into(), "1".into(), "2".into(), "3".into()],
        }
    }

    fn manager_with(backend: FakeBackend, opts: WmOptions) -> WindowManager<FakeBackend> {
        // the channels are unused, events and commands are fed directly
        let (_, erx) = mpsc::unbounded_channel();
        let (_, crx) = mpsc::unbounded_channel();
        WindowManager::new(opts, backend, erx, crx)
    }

    #[test]
    fn three_windows_get_dwindle_rects() {
        let mut backend = FakeBackend::single_monitor();
        backend.add_window(1, "a.exe", "A");
        backend.add_window(2, "b.exe", "B");
        backend.add_window(3, "c.exe", "C");
        let mut wm = manager_with(backend, plain_opts());
        wm.refresh();
        let desk = wm.desk();
        assert_eq!(
            desk.windows[&WindowHandle(1)].rect,
            Rect::new(0, 0, 960, 1080)
        );
        assert_eq!(
            desk.windows[&WindowHandle(2)].rect,
            Rect::new(960, 0, 1920, 540)
        );
        assert_eq!(
            desk.windows[&WindowHandle(3)].rect,
            Rect::new(960, 540, 1920, 1080)
        );
    }

    #[test]
    fn arrange_is_idempotent() {
        let mut backend = FakeBackend::single_monitor();
        backend.add_window(1, "a.exe", "A");
        backend.add_window(2, "b.exe", "B");
        let mut wm = manager_with(backend, plain_opts());
        wm.refresh();
        let calls = wm.backend_mut().set_rect_calls.len();
        assert!(calls > 0);
        wm.handle_command(Command::ArrangeAll);
        wm.handle_command(Command::ArrangeAll);
        assert_eq!(wm.backend_mut().set_rect_calls.len(), calls);
    }

    #[test]
    fn self_induced_move_does_not_relayout() {
        let mut backend = FakeBackend::single_monitor();
        backend.add_window(1, "a.exe", "A");
        backend.add_window(2, "b.exe", "B");
        let mut wm = manager_with(backend, plain_opts());
        wm.refresh();
        let calls = wm.backend_mut().set_rect_calls.clone();
        // echo every positioning call back as a move event, 1px off like
        // the OS likes to report
        for (handle, rect) in calls {
            let echoed = Rect::new(rect.left + 1, rect.top, rect.right, rect.bottom);
            wm.handle_event(WindowEvent::Moved(handle, echoed));
        }
        let before = wm.backend_mut().set_rect_calls.len();
        wm.refresh();
        assert_eq!(wm.backend_mut().set_rect_calls.len(), before);
    }

    #[test]
    fn ignored_rule_keeps_window_unmanaged() {
        let mut opts = plain_opts();
        opts.rules.push(WindowRule {
            exe: Some(Regex::new("(?i)overlay\\.exe$").unwrap()),
            title: None,
            class_name: None,
            manageable: Some(false),
            tilable: None,
            preferred_monitor: None,
            preferred_workspace: None,
            static_index: None,
        });
        let mut backend = FakeBackend::single_monitor();
        backend.add_window(1, "overlay.exe", "HUD");
        backend.add_window(2, "b.exe", "B");
        let mut wm = manager_with(backend, opts);
        wm.refresh();
        let desk = wm.desk();
        assert!(!desk.windows.contains_key(&WindowHandle(1)));
        // the remaining window gets the whole workarea
        assert_eq!(
            desk.windows[&WindowHandle(2)].rect,
            Rect::new(0, 0, 1920, 1080)
        );
    }

    #[test]
    fn static_rule_pins_slot_and_displaces_occupant() {
        let mut opts = plain_opts();
        opts.themes[0].static_layout = true;
        opts.themes[0].max_tiling_areas = 4;
        opts.rules.push(WindowRule {
            exe: Some(Regex::new("(?i)cmd\\.exe$").unwrap()),
            title: Some(Regex::new("(?i)nvim").unwrap()),
            class_name: None,
            manageable: None,
            tilable: None,
            preferred_monitor: None,
            preferred_workspace: None,
            static_index: Some(0),
        });
        let mut backend = FakeBackend::single_monitor();
        backend.add_window(1, "b.exe", "Browser");
        let mut wm = manager_with(backend, opts);
        wm.refresh();
        // slot 0 initially belongs to the browser
        assert_eq!(
            wm.desk().windows[&WindowHandle(1)].rect,
            Rect::new(0, 0, 1920, 1080)
        );
        wm.backend_mut().add_window(2, "cmd.exe", "nvim - main.rs");
        wm.refresh();
        let desk = wm.desk();
        // the pinned window takes slot 0, the browser moves to the next one
        assert_eq!(
            desk.windows[&WindowHandle(2)].rect,
            Rect::new(0, 0, 960, 1080)
        );
        assert_eq!(
            desk.windows[&WindowHandle(1)].rect,
            Rect::new(960, 0, 1920, 1080)
        );
    }

    #[test]
    fn switch_workspace_parks_and_reveals() {
        let mut backend = FakeBackend::single_monitor();
        backend.add_window(1, "a.exe", "A");
        backend.add_window(2, "b.exe", "B");
        let mut wm = manager_with(backend, plain_opts());
        wm.refresh();
        wm.handle_command(Command::SwitchWorkspace(1));
        let desk = wm.desk();
        assert_eq!(desk.monitors[0].active_workspace, 1);
        for h in [WindowHandle(1), WindowHandle(2)] {
            let w = &desk.windows[&h];
            assert!(w.off);
            assert!(w.rect.left <= -10000, "window parked at {:?}", w.rect);
        }
        // and back: both windows return to their tiling rects
        wm.handle_command(Command::SwitchWorkspace(0));
        let desk = wm.desk();
        assert_eq!(desk.monitors[0].active_workspace, 0);
        assert_eq!(
            desk.windows[&WindowHandle(1)].rect,
            Rect::new(0, 0, 960, 1080)
        );
        assert!(!desk.windows[&WindowHandle(1)].off);
    }

    #[test]
    fn windows_live_in_exactly_one_workspace() {
        let mut backend = FakeBackend::dual_monitor();
        for h in 1..=5 {
            backend.add_window(h, "a.exe", "A");
        }
        backend.foreground = Some(WindowHandle(1));
        let mut wm = manager_with(backend, plain_opts());
        wm.refresh();
        for command in [
            Command::SwapNext,
            Command::RollNext,
            Command::MoveToWorkspace(2),
            Command::SetMaster,
            Command::MoveToNextMonitor,
            Command::SwitchWorkspace(3),
            Command::SwapPrev,
            Command::SwitchWorkspace(0),
            Command::MoveToPrevMonitor,
        ] {
            wm.handle_command(command);
            let fg = wm.backend_mut().foreground;
            let desk = wm.desk();
            let mut seen: HashMap<WindowHandle, usize> = HashMap::new();
            for mon in &desk.monitors {
                for ws in &mon.workspaces {
                    for &h in &ws.windows {
                        *seen.entry(h).or_default() += 1;
                    }
                }
            }
            for h in 1..=5 {
                assert_eq!(
                    seen.get(&WindowHandle(h)),
                    Some(&1),
                    "window {h} lost or duplicated after {command:?}"
                );
            }
            let _ = fg;
        }
    }

    #[test]
    fn next_window_cycles_and_centers_cursor() {
        let mut backend = FakeBackend::single_monitor();
        backend.add_window(1, "a.exe", "A");
        backend.add_window(2, "b.exe", "B");
        let mut wm = manager_with(backend, plain_opts());
        wm.refresh();
        wm.handle_command(Command::NextWindow);
        let fg = wm.backend_mut().foreground.unwrap();
        let center = wm.desk().windows[&fg].rect.center();
        assert_eq!(wm.backend_mut().cursor, center);
        let first = fg;
        wm.handle_command(Command::NextWindow);
        assert_ne!(wm.backend_mut().foreground.unwrap(), first);
        wm.handle_command(Command::NextWindow);
        assert_eq!(wm.backend_mut().foreground.unwrap(), first);
    }

    #[test]
    fn minimized_window_keeps_slot_and_skips_focus() {
        let mut backend = FakeBackend::single_monitor();
        backend.add_window(1, "a.exe", "A");
        backend.add_window(2, "b.exe", "B");
        backend.add_window(3, "c.exe", "C");
        backend.windows[1].minimized = true;
        let mut wm = manager_with(backend, plain_opts());
        wm.refresh();
        let desk = wm.desk();
        assert_eq!(desk.monitors[0].workspaces[0].windows.len(), 3);
        // tiling treats it as absent
        assert_eq!(
            desk.windows[&WindowHandle(1)].rect,
            Rect::new(0, 0, 960, 1080)
        );
        assert_eq!(
            desk.windows[&WindowHandle(3)].rect,
            Rect::new(960, 0, 1920, 1080)
        );
        // focus stepping never lands on it
        wm.handle_command(Command::NextWindow);
        wm.handle_command(Command::NextWindow);
        wm.handle_command(Command::NextWindow);
        assert!(wm
            .backend_mut()
            .activations
            .iter()
            .all(|&h| h != WindowHandle(2)));
    }

    #[test]
    fn set_master_swaps_and_toggles_back() {
        let mut backend = FakeBackend::single_monitor();
        backend.add_window(1, "a.exe", "A");
        backend.add_window(2, "b.exe", "B");
        backend.add_window(3, "c.exe", "C");
        let mut wm = manager_with(backend, plain_opts());
        wm.refresh();
        wm.desk().monitors[0].workspaces[0].active_index = Some(2);
        wm.handle_command(Command::SetMaster);
        assert_eq!(
            wm.desk().monitors[0].workspaces[0].windows,
            vec![WindowHandle(3), WindowHandle(2), WindowHandle(1)]
        );
        // master invoked again swaps slots 0 and 1
        wm.handle_command(Command::SetMaster);
        assert_eq!(
            wm.desk().monitors[0].workspaces[0].windows,
            vec![WindowHandle(2), WindowHandle(3), WindowHandle(1)]
        );
    }

    #[test]
    fn destroyed_window_is_evicted_and_layout_heals() {
        let mut backend = FakeBackend::single_monitor();
        backend.add_window(1, "a.exe", "A");
        backend.add_window(2, "b.exe", "B");
        let mut wm = manager_with(backend, plain_opts());
        wm.refresh();
        wm.backend_mut().windows.retain(|w| w.handle != WindowHandle(1));
        wm.handle_event(WindowEvent::Destroyed(WindowHandle(1)));
        let desk = wm.desk();
        assert!(!desk.windows.contains_key(&WindowHandle(1)));
        assert_eq!(
            desk.windows[&WindowHandle(2)].rect,
            Rect::new(0, 0, 1920, 1080)
        );
    }

    #[test]
    fn monitor_replug_restores_workspace_index() {
        let mut backend = FakeBackend::dual_monitor();
        backend.add_window(1, "a.exe", "A");
        let mut wm = manager_with(backend, plain_opts());
        wm.refresh();
        wm.backend_mut().cursor = Point { x: 2000, y: 10 };
        wm.handle_command(Command::SwitchWorkspace(2));
        assert_eq!(wm.desk().monitors[1].active_workspace, 2);
        // unplug the second monitor
        let second = wm.backend_mut().monitors.pop().unwrap();
        wm.handle_event(WindowEvent::DisplayChange);
        assert_eq!(wm.desk().monitors.len(), 1);
        // plug it back in: the active workspace sticks
        wm.backend_mut().monitors.push(second);
        wm.handle_event(WindowEvent::DisplayChange);
        assert_eq!(wm.desk().monitors[1].active_workspace, 2);
    }

    #[test]
    fn drag_end_on_other_monitor_reassigns() {
        let mut backend = FakeBackend::dual_monitor();
        backend.add_window(1, "a.exe", "A");
        backend.add_window(2, "b.exe", "B");
        let mut wm = manager_with(backend, plain_opts());
        wm.refresh();
        assert_eq!(wm.desk().locate(WindowHandle(1)).unwrap().0, 0);
        // user drags window 1 onto the second monitor
        wm.handle_event(WindowEvent::MoveSizeStart(WindowHandle(1)));
        wm.backend_mut().cursor = Point { x: 2500, y: 500 };
        if let Some(w) = wm
            .backend_mut()
            .windows
            .iter_mut()
            .find(|w| w.handle == WindowHandle(1))
        {
            w.rect = Rect::new(2300, 300, 2900, 700);
        }
        wm.handle_event(WindowEvent::MoveSizeEnd(WindowHandle(1)));
        let desk = wm.desk();
        assert_eq!(desk.locate(WindowHandle(1)).unwrap().0, 1);
        // both monitors re-tile to full area layouts
        assert_eq!(
            desk.windows[&WindowHandle(2)].rect,
            Rect::new(0, 0, 1920, 1080)
        );
        assert_eq!(
            desk.windows[&WindowHandle(1)].rect,
            Rect::new(1920, 0, 3840, 1080)
        );
    }

    #[test]
    fn foreground_in_hidden_workspace_switches_to_it() {
        let mut backend = FakeBackend::single_monitor();
        backend.add_window(1, "a.exe", "A");
        backend.add_window(2, "b.exe", "B");
        backend.foreground = Some(WindowHandle(1));
        let mut wm = manager_with(backend, plain_opts());
        wm.refresh();
        wm.handle_command(Command::MoveToWorkspace(1));
        assert!(wm.desk().windows[&WindowHandle(1)].off);
        wm.handle_event(WindowEvent::Foreground(WindowHandle(1)));
        let desk = wm.desk();
        assert_eq!(desk.monitors[0].active_workspace, 1);
        assert!(!desk.windows[&WindowHandle(1)].off);
    }

    #[test]
    fn command_parse_round_trip() {
        assert_eq!(Command::parse("next_window").unwrap(), Command::NextWindow);
        assert_eq!(
            Command::parse("switch_to_workspace:2").unwrap(),
            Command::SwitchWorkspace(2)
        );
        assert_eq!(Command::parse("set_theme:1").unwrap(), Command::SetTheme(1));
        assert!(Command::parse("warp_speed").is_err());
        assert!(Command::parse("switch_to_workspace").is_err());
        assert!(Command::parse("switch_to_workspace:x").is_err());
    }
}
