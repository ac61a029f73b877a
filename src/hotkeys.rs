//! Chord hotkeys: an unordered set of keys that must be concurrently
//! depressed to fire. Detection runs on the logical event stream coming out
//! of the layer engine, so remapped keys participate like physical ones.

use crate::jmk::ActionId;
use crate::vk::{expand_chord, Vk};
use crate::Result;
use anyhow::bail;
use log::{debug, info};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotkeyAction {
    /// Inject a synthetic combination, pressed in order and released in
    /// reverse order.
    Send(Vec<Vk>),
    /// Run a registered callback on the daemon thread.
    Invoke(ActionId),
}

#[derive(Debug)]
struct Hotkey {
    keys: Vec<Vk>,
    action: HotkeyAction,
    /// Set once fired; re-arming requires a constituent key to go up.
    fired: bool,
}

/// Keeps the set of currently depressed modifiers and matches it, plus the
/// incoming non-modifier press, against the registered chord table.
///
/// On a match the pressed modifiers are released first so the receiving
/// application never sees the user's physical modifiers layered under the
/// synthetic input, then the action runs, and both the triggering press and
/// its release are swallowed.
pub struct HotkeyEngine {
    table: HashMap<BTreeSet<Vk>, usize>,
    hotkeys: Vec<Hotkey>,
    pressed_modifiers: BTreeSet<Vk>,
    swallow_release: Option<Vk>,
}

impl HotkeyEngine {
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
            hotkeys: Vec::new(),
            pressed_modifiers: BTreeSet::new(),
            swallow_release: None,
        }
    }

    /// Register a chord. Generic modifiers expand to both sides, so
    /// `Ctrl+Q` claims `LCtrl+Q` and `RCtrl+Q`. Overlap with an existing
    /// registration is a configuration error.
    pub fn register(&mut self, chord: &[Vk], action: HotkeyAction) -> Result<()> {
        let Some((&trigger, modifiers)) = chord.split_last() else {
            bail!("empty hotkey combination");
        };
        if trigger.is_modifier() {
            bail!(
                "hotkey {} ends with a modifier; the last key must be a plain key",
                format_chord(chord)
            );
        }
        for &key in modifiers {
            if !key.is_modifier() {
                bail!(
                    "hotkey {}: {} is not a modifier",
                    format_chord(chord),
                    key.name()
                );
            }
        }
        let index = self.hotkeys.len();
        for variant in expand_chord(chord) {
            let set: BTreeSet<Vk> = variant.iter().copied().collect();
            if self.table.contains_key(&set) {
                bail!("hotkey {} is already registered", format_chord(&variant));
            }
            self.table.insert(set, index);
        }
        debug!("registered hotkey {}", format_chord(chord));
        self.hotkeys.push(Hotkey {
            keys: chord.to_vec(),
            action,
            fired: false,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.hotkeys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hotkeys.is_empty()
    }

    /// Feed one logical event. Pass-through events are appended to `emit`;
    /// callback ids go to `actions`.
    pub fn on_event(
        &mut self,
        vk: Vk,
        pressed: bool,
        emit: &mut Vec<(Vk, bool)>,
        actions: &mut Vec<ActionId>,
    ) {
        if pressed {
            if vk.is_modifier() && !vk.is_wheel() {
                self.pressed_modifiers.insert(vk);
                emit.push((vk, true));
                return;
            }
            let mut candidate: BTreeSet<Vk> = self.pressed_modifiers.clone();
            candidate.insert(vk);
            if let Some(&index) = self.table.get(&candidate) {
                if !self.hotkeys[index].fired {
                    self.hotkeys[index].fired = true;
                    info!("hotkey fired: {}", format_chord(&self.hotkeys[index].keys));
                    // release held modifiers before the synthetic input so
                    // the target chord arrives clean
                    for &m in &self.pressed_modifiers {
                        emit.push((m, false));
                    }
                    match &self.hotkeys[index].action {
                        HotkeyAction::Send(keys) => {
                            emit.extend(keys.iter().map(|&k| (k, true)));
                            emit.extend(keys.iter().rev().map(|&k| (k, false)));
                        }
                        HotkeyAction::Invoke(id) => actions.push(id.clone()),
                    }
                    self.swallow_release = Some(vk);
                    return;
                }
            }
            emit.push((vk, true));
        } else {
            if self.pressed_modifiers.remove(&vk) {
                self.rearm();
                emit.push((vk, false));
                return;
            }
            if self.swallow_release == Some(vk) {
                self.swallow_release = None;
                self.rearm();
                return;
            }
            emit.push((vk, false));
        }
    }

    fn rearm(&mut self) {
        for hotkey in &mut self.hotkeys {
            hotkey.fired = false;
        }
    }
}

impl Default for HotkeyEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn format_chord(keys: &[Vk]) -> String {
    keys.iter().map(|k| k.name()).collect::<Vec<_>>().join("+")
}
