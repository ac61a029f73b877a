//! The key-remapping engine. It consumes the raw event stream coming off
//! the low-level hooks and produces the stream that actually reaches the
//! OS input queue: plain remaps, dual-role tap-hold keys, layer switching
//! and chord hotkeys (the latter staged through [`crate::hotkeys`]).
//!
//! Everything here is plain state driven by a monotonic millisecond clock
//! carried inside each event, so the whole engine is testable without a
//! single OS call. The hook callback runs [`Pipeline::on_event`] under a
//! mutex and must get its suppress decision synchronously; anything slow
//! (user callbacks) is returned as an action id for the daemon thread to
//! execute.

use crate::hotkeys::HotkeyEngine;
use crate::vk::{InputEvent, Vk};
use crate::Result;
use anyhow::bail;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use std::time::Instant;

/// Opaque identifier of a user callback. The daemon owns the registry that
/// maps ids to closures; the engine only ever moves ids around, which keeps
/// it `Send` and keeps configs inspectable.
pub type ActionId = String;

/// Milliseconds since process start. A single logical clock drives both
/// the tap-hold term timers and the quick-tap window.
pub fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_millis() as u64
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    /// Emit a key, or a whole combination pressed in order and released in
    /// reverse order.
    Keys(Vec<Vk>),
    /// Run a registered callback on the daemon thread.
    Invoke(ActionId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldAction {
    Key(Vk),
    /// Push a layer onto the active stack while held.
    Layer(usize),
    Invoke(ActionId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapHold {
    pub tap: Option<KeyAction>,
    pub hold: Option<HoldAction>,
    pub term_ms: u64,
    pub quick_tap_term_ms: u64,
}

impl TapHold {
    pub fn new(tap: Vk, hold: HoldAction) -> Self {
        Self {
            tap: Some(KeyAction::Keys(vec![tap])),
            hold: Some(hold),
            term_ms: 200,
            quick_tap_term_ms: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Send(KeyAction),
    TapHold(TapHold),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TapHoldPhase {
    Idle,
    /// Key is down, verdict not in yet.
    Pending { pressed_at: u64 },
    Held,
    /// A tap just finished; another press inside the window repeats the tap
    /// instead of arming hold, so a dual-role key can still autorepeat.
    QuickTap { last_tap_at: u64, down: bool },
}

#[derive(Debug)]
struct TapHoldState {
    def: TapHold,
    phase: TapHoldPhase,
}

/// What one engine step wants done, in order: `emit` is the logical event
/// stream handed to the next stage, `actions` run on the daemon thread.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Output {
    pub emit: Vec<(Vk, bool)>,
    pub actions: Vec<ActionId>,
    pub suppress: bool,
}

/// Layered keymap with per-key tap-hold state machines.
///
/// Layer 0 is always active at the bottom of the stack; tap-hold keys whose
/// hold resolves to a layer push that layer on commit and pop it on release
/// of the triggering physical key. Lookup walks the stack top-down, first
/// hit wins.
pub struct LayerEngine {
    layers: Vec<HashMap<Vk, Binding>>,
    active: Vec<usize>,
    /// Pressed key -> layer that bound it, so the release routes to the
    /// same binding even if the layer deactivated in between.
    routes: HashMap<Vk, usize>,
    tapholds: HashMap<Vk, TapHoldState>,
    /// Modifiers we have logically sent down, for stuck-key repair.
    sent_down: HashSet<Vk>,
}

impl LayerEngine {
    pub fn new() -> Self {
        Self {
            layers: vec![HashMap::new()],
            active: vec![0],
            routes: HashMap::new(),
            tapholds: HashMap::new(),
            sent_down: HashSet::new(),
        }
    }

    pub fn register(&mut self, layer: usize, vk: Vk, binding: Binding) -> Result<()> {
        while self.layers.len() <= layer {
            self.layers.push(HashMap::new());
        }
        if let Binding::TapHold(def) = &binding {
            if def.tap.is_none() && def.hold.is_none() {
                bail!("tap-hold on {} binds neither tap nor hold", vk.name());
            }
            if let Some(HoldAction::Layer(target)) = def.hold {
                if target == 0 {
                    bail!("tap-hold on {} targets the base layer", vk.name());
                }
            }
            self.tapholds.insert(
                vk,
                TapHoldState {
                    def: def.clone(),
                    phase: TapHoldPhase::Idle,
                },
            );
        }
        if self.layers[layer].insert(vk, binding).is_some() {
            bail!("key {} bound twice in layer {layer}", vk.name());
        }
        Ok(())
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Earliest pending timer deadline, if any. The daemon schedules a
    /// wake-up for it and calls [`on_timer`](Self::on_timer).
    pub fn next_deadline(&self) -> Option<u64> {
        self.tapholds
            .values()
            .filter_map(|st| match st.phase {
                TapHoldPhase::Pending { pressed_at } => Some(pressed_at + st.def.term_ms),
                TapHoldPhase::QuickTap {
                    last_tap_at,
                    down: false,
                } => Some(last_tap_at + st.def.quick_tap_term_ms),
                _ => None,
            })
            .min()
    }

    pub fn on_event(&mut self, evt: InputEvent, out: &mut Output) {
        if evt.synthetic {
            out.emit.push((evt.vk, evt.pressed));
            return;
        }
        // Any other key pressed while a tap-hold is pending settles it as a
        // hold right away; waiting out the full term would add visible lag
        // to ordinary modifier usage.
        if evt.pressed {
            let pending: Vec<Vk> = self
                .tapholds
                .iter()
                .filter(|(k, st)| {
                    **k != evt.vk && matches!(st.phase, TapHoldPhase::Pending { .. })
                })
                .map(|(k, _)| *k)
                .collect();
            for key in pending {
                self.commit_hold(key, out);
            }
        }
        let route = match self.routes.get(&evt.vk).copied() {
            Some(layer) => {
                if !evt.pressed {
                    self.routes.remove(&evt.vk);
                }
                Some(layer)
            }
            None => {
                let found = self.find_layer(evt.vk);
                if let Some(layer) = found {
                    if evt.pressed {
                        self.routes.insert(evt.vk, layer);
                    }
                }
                found
            }
        };
        match route.and_then(|l| self.layers[l].get(&evt.vk).cloned()) {
            None => out.emit.push((evt.vk, evt.pressed)),
            Some(Binding::Send(action)) => {
                out.suppress = true;
                self.run_key_action(&action, evt.pressed, out);
            }
            Some(Binding::TapHold(_)) => {
                out.suppress = true;
                self.on_taphold_event(evt, out);
            }
        }
        if evt.vk == Vk::Escape && evt.pressed {
            self.repair_stuck_modifiers(out);
        }
        self.track_sent(out);
    }

    /// Settle expired timers. Called from the daemon thread on wake-up;
    /// emitted events are injected straight into the OS queue.
    pub fn on_timer(&mut self, now: u64, out: &mut Output) {
        let expired: Vec<Vk> = self
            .tapholds
            .iter()
            .filter(|(_, st)| match st.phase {
                TapHoldPhase::Pending { pressed_at } => now >= pressed_at + st.def.term_ms,
                _ => false,
            })
            .map(|(k, _)| *k)
            .collect();
        for key in expired {
            self.commit_hold(key, out);
        }
        for st in self.tapholds.values_mut() {
            if let TapHoldPhase::QuickTap {
                last_tap_at,
                down: false,
            } = st.phase
            {
                if now >= last_tap_at + st.def.quick_tap_term_ms {
                    st.phase = TapHoldPhase::Idle;
                }
            }
        }
        self.track_sent(out);
    }

    fn find_layer(&self, vk: Vk) -> Option<usize> {
        self.active
            .iter()
            .rev()
            .copied()
            .find(|&l| self.layers[l].contains_key(&vk))
    }

    fn on_taphold_event(&mut self, evt: InputEvent, out: &mut Output) {
        let (phase, def) = match self.tapholds.get(&evt.vk) {
            Some(st) => (st.phase, st.def.clone()),
            None => return,
        };
        let now = evt.time_ms;
        match (phase, evt.pressed) {
            (TapHoldPhase::Idle, true) => {
                self.set_phase(evt.vk, TapHoldPhase::Pending { pressed_at: now });
            }
            (TapHoldPhase::Idle, false) => {
                // release without a tracked press, e.g. key was down before
                // the engine started
                out.emit.push((evt.vk, false));
            }
            (TapHoldPhase::Pending { pressed_at }, true) => {
                // OS autorepeat while undecided
                if now >= pressed_at + def.term_ms {
                    self.commit_hold(evt.vk, out);
                }
            }
            (TapHoldPhase::Pending { pressed_at }, false) => {
                if now >= pressed_at + def.term_ms {
                    self.commit_hold(evt.vk, out);
                    self.release_hold(evt.vk, out);
                } else {
                    self.set_phase(
                        evt.vk,
                        TapHoldPhase::QuickTap {
                            last_tap_at: now,
                            down: false,
                        },
                    );
                    debug!("{} tapped", evt.vk.name());
                    if let Some(tap) = &def.tap {
                        self.run_key_action(tap, true, out);
                        self.run_key_action(tap, false, out);
                    }
                }
            }
            (TapHoldPhase::Held, true) => {} // autorepeat of a held key
            (TapHoldPhase::Held, false) => self.release_hold(evt.vk, out),
            (TapHoldPhase::QuickTap { last_tap_at, .. }, true) => {
                if now < last_tap_at + def.quick_tap_term_ms {
                    // repeat the tap key for as long as the rapid sequence
                    // lasts; hold is disabled until the window closes
                    self.set_phase(
                        evt.vk,
                        TapHoldPhase::QuickTap {
                            last_tap_at,
                            down: true,
                        },
                    );
                    if let Some(tap) = &def.tap {
                        self.run_key_action(tap, true, out);
                    }
                } else {
                    self.set_phase(evt.vk, TapHoldPhase::Pending { pressed_at: now });
                }
            }
            (TapHoldPhase::QuickTap { down, .. }, false) => {
                // every press inside the window extends it
                self.set_phase(
                    evt.vk,
                    TapHoldPhase::QuickTap {
                        last_tap_at: now,
                        down: false,
                    },
                );
                if down {
                    if let Some(tap) = &def.tap {
                        self.run_key_action(tap, false, out);
                    }
                }
            }
        }
    }

    fn set_phase(&mut self, vk: Vk, phase: TapHoldPhase) {
        if let Some(st) = self.tapholds.get_mut(&vk) {
            st.phase = phase;
        }
    }

    fn commit_hold(&mut self, vk: Vk, out: &mut Output) {
        let Some(st) = self.tapholds.get_mut(&vk) else {
            return;
        };
        if !matches!(st.phase, TapHoldPhase::Pending { .. }) {
            return;
        }
        st.phase = TapHoldPhase::Held;
        debug!("{} held", vk.name());
        match st.def.hold.clone() {
            Some(HoldAction::Key(k)) => out.emit.push((k, true)),
            Some(HoldAction::Layer(layer)) => self.active.push(layer),
            Some(HoldAction::Invoke(id)) => out.actions.push(id),
            None => {}
        }
    }

    fn release_hold(&mut self, vk: Vk, out: &mut Output) {
        let Some(st) = self.tapholds.get_mut(&vk) else {
            return;
        };
        st.phase = TapHoldPhase::Idle;
        match st.def.hold.clone() {
            Some(HoldAction::Key(k)) => out.emit.push((k, false)),
            Some(HoldAction::Layer(layer)) => {
                if let Some(pos) = self.active.iter().rposition(|&l| l == layer) {
                    self.active.remove(pos);
                } else {
                    warn!("layer {layer} already inactive on release");
                }
            }
            Some(HoldAction::Invoke(_)) | None => {}
        }
    }

    fn run_key_action(&self, action: &KeyAction, pressed: bool, out: &mut Output) {
        match action {
            KeyAction::Keys(keys) => {
                if pressed {
                    out.emit.extend(keys.iter().map(|&k| (k, true)));
                } else {
                    out.emit.extend(keys.iter().rev().map(|&k| (k, false)));
                }
            }
            KeyAction::Invoke(id) => {
                // fire on press, absorb the release
                if pressed {
                    out.actions.push(id.clone());
                }
            }
        }
    }

    fn track_sent(&mut self, out: &Output) {
        for &(vk, pressed) in &out.emit {
            if vk.is_modifier() {
                if pressed {
                    self.sent_down.insert(vk);
                } else {
                    self.sent_down.remove(&vk);
                }
            }
        }
    }

    /// Windows occasionally drops the key-up of modifiers released
    /// simultaneously, leaving them logically stuck down. Escape doubles as
    /// the repair trigger: any modifier we sent down whose physical state
    /// reports up gets its release re-sent.
    fn repair_stuck_modifiers(&mut self, out: &mut Output) {
        let stuck: Vec<Vk> = self
            .sent_down
            .iter()
            .copied()
            .filter(|&vk| !physically_down(vk))
            .collect();
        for vk in stuck {
            warn!("re-sending missed release of {}", vk.name());
            self.sent_down.remove(&vk);
            out.emit.push((vk, false));
        }
    }
}

impl Default for LayerEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(windows)]
fn physically_down(vk: Vk) -> bool {
    crate::win32::input::is_key_down(vk)
}

#[cfg(not(windows))]
fn physically_down(_vk: Vk) -> bool {
    // nothing to repair against without the OS keyboard state
    true
}

/// Final output of one pipeline step, as the hook callback needs it: the
/// exact burst to inject, whether to swallow the physical event, and the
/// callbacks to hand to the daemon thread.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PipelineOutput {
    pub inject: Vec<(Vk, bool)>,
    pub suppress: bool,
    pub actions: Vec<ActionId>,
}

/// The full input-rewriting pipeline: layer resolution feeding chord
/// detection. One instance lives behind a mutex shared by the hook thread
/// and the daemon's timer path.
pub struct Pipeline {
    pub layers: LayerEngine,
    pub hotkeys: HotkeyEngine,
}

impl Pipeline {
    pub fn new(layers: LayerEngine, hotkeys: HotkeyEngine) -> Self {
        Self { layers, hotkeys }
    }

    pub fn on_event(&mut self, evt: InputEvent) -> PipelineOutput {
        if evt.synthetic {
            // our own injected events pass through untouched
            return PipelineOutput::default();
        }
        let mut staged = Output::default();
        self.layers.on_event(evt, &mut staged);
        self.finish(evt.vk, evt.pressed, staged)
    }

    pub fn on_timer(&mut self, now: u64) -> PipelineOutput {
        let mut staged = Output::default();
        self.layers.on_timer(now, &mut staged);
        let mut out = PipelineOutput {
            actions: std::mem::take(&mut staged.actions),
            suppress: false,
            inject: Vec::new(),
        };
        for (vk, pressed) in staged.emit {
            self.hotkeys
                .on_event(vk, pressed, &mut out.inject, &mut out.actions);
        }
        out
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.layers.next_deadline()
    }

    fn finish(&mut self, vk: Vk, pressed: bool, staged: Output) -> PipelineOutput {
        let mut out = PipelineOutput {
            actions: staged.actions,
            suppress: true,
            inject: Vec::new(),
        };
        for (k, p) in staged.emit {
            self.hotkeys
                .on_event(k, p, &mut out.inject, &mut out.actions);
        }
        if !staged.suppress && out.actions.is_empty() && out.inject == [(vk, pressed)] {
            // untouched by every stage: let the physical event through
            // instead of swallowing and re-synthesizing it
            out.inject.clear();
            out.suppress = false;
        }
        out
    }
}
