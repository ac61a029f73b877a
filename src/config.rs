//! Configuration. The core API is code: build a [`Config`], hand it to the
//! daemon. The binary additionally loads the same structure from a TOML
//! file. Everything is validated up front; a bad entry aborts startup with
//! a diagnostic naming it, nothing is silently skipped.

use crate::hotkeys::{HotkeyAction, HotkeyEngine};
use crate::jmk::{Binding, HoldAction, KeyAction, LayerEngine, Pipeline, TapHold};
use crate::layout::{default_themes, Theme};
use crate::vk::{parse_chord, Vk};
use crate::window_manager::{Command, WindowRule, WmOptions};
use crate::Result;
use anyhow::{bail, Context};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub jmk: JmkConfig,
    #[serde(default)]
    pub hotkeys: HotkeyConfig,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// One workspace per name, on every monitor.
    #[serde(default = "default_workspace_names")]
    pub workspace_names: Vec<String>,
    /// Themes to use, in preference-declaration order. Empty means all
    /// built-in themes.
    #[serde(default)]
    pub themes: Vec<String>,
    /// Inflate target rects by the window's invisible frame so the visible
    /// frame lands exactly on the computed rect.
    #[serde(default = "default_true")]
    pub bound_compensation: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            workspace_names: default_workspace_names(),
            themes: Vec::new(),
            bound_compensation: true,
        }
    }
}

/// Key rewriting: a list of layers, each mapping a key name to what it
/// becomes. Layer 0 is the base layer.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JmkConfig {
    #[serde(default)]
    pub layers: Vec<HashMap<String, KeyDef>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyDef {
    /// `"LCTRL"` or `"Ctrl+C"`: plain remap to a key or combination, or
    /// `"action:some_id"` to run a registered callback.
    Remap(String),
    /// Dual-role key.
    TapHold(TapHoldDef),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapHoldDef {
    #[serde(default)]
    pub tap: Option<String>,
    /// Key to hold down while held, e.g. `"LCTRL"`.
    #[serde(default)]
    pub hold: Option<String>,
    /// Layer to activate while held. Mutually exclusive with `hold`.
    #[serde(default)]
    pub layer: Option<usize>,
    #[serde(default = "default_term_ms")]
    pub term_ms: u64,
    #[serde(default = "default_quick_tap_term_ms")]
    pub quick_tap_term_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotkeyConfig {
    /// Chord -> action. Actions are window-manager commands
    /// (`"next_window"`, `"switch_to_workspace:1"`), `"send:..."` synthetic
    /// combinations, or `"action:..."` registered callbacks.
    #[serde(default)]
    pub bindings: HashMap<String, String>,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            bindings: default_bindings(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuleConfig {
    /// Executable base name; literal unless `exe_is_regex`.
    #[serde(default)]
    pub exe: Option<String>,
    #[serde(default)]
    pub exe_is_regex: bool,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub title_is_regex: bool,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub manageable: Option<bool>,
    #[serde(default)]
    pub tilable: Option<bool>,
    #[serde(default)]
    pub preferred_monitor_index: Option<usize>,
    #[serde(default)]
    pub preferred_workspace_index: Option<usize>,
    #[serde(default)]
    pub static_window_index: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub args: Vec<String>,
    #[serde(default)]
    pub log_path: Option<String>,
    #[serde(default)]
    pub autorestart: bool,
}

fn default_workspace_names() -> Vec<String> {
    vec!["1".into(), "2".into(), "3".into(), "4".into()]
}

fn default_true() -> bool {
    true
}

fn default_term_ms() -> u64 {
    200
}

fn default_quick_tap_term_ms() -> u64 {
    120
}

fn default_bindings() -> HashMap<String, String> {
    let mut bindings = HashMap::new();
    // window navigation
    bindings.insert("Win+J".to_string(), "next_window".to_string());
    bindings.insert("Win+K".to_string(), "prev_window".to_string());
    bindings.insert("Win+Shift+J".to_string(), "swap_next".to_string());
    bindings.insert("Win+Shift+K".to_string(), "swap_prev".to_string());
    bindings.insert("Win+Return".to_string(), "set_master".to_string());
    bindings.insert("Win+Shift+Space".to_string(), "toggle_tilable".to_string());
    // layout
    bindings.insert("Win+M".to_string(), "toggle_mono".to_string());
    bindings.insert("Win+Space".to_string(), "next_theme".to_string());
    bindings.insert("Win+N".to_string(), "arrange_all".to_string());
    // workspaces
    for i in 1..=4usize {
        bindings.insert(format!("Win+{i}"), format!("switch_to_workspace:{}", i - 1));
        bindings.insert(
            format!("Win+Shift+{i}"),
            format!("move_to_workspace:{}", i - 1),
        );
    }
    // monitors
    bindings.insert("Win+OEM_COMMA".to_string(), "prev_monitor".to_string());
    bindings.insert("Win+OEM_PERIOD".to_string(), "next_monitor".to_string());
    bindings.insert(
        "Win+Shift+OEM_COMMA".to_string(),
        "move_to_prev_monitor".to_string(),
    );
    bindings.insert(
        "Win+Shift+OEM_PERIOD".to_string(),
        "move_to_next_monitor".to_string(),
    );
    bindings
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("config file not found at {path:?}, using defaults");
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("validating config file {}", path.display()))?;
        log::info!("configuration loaded from {path:?}");
        Ok(config)
    }

    /// Check everything buildable actually builds, so a bad entry aborts
    /// startup instead of surfacing mid-session.
    pub fn validate(&self) -> Result<()> {
        self.build_pipeline()?;
        self.build_themes()?;
        self.build_rules()?;
        for service in &self.services {
            if service.args.is_empty() {
                bail!("service {:?} has an empty command line", service.name);
            }
        }
        Ok(())
    }

    /// Assemble the input-rewriting pipeline from the layer and hotkey
    /// tables.
    pub fn build_pipeline(&self) -> Result<Pipeline> {
        let mut layers = LayerEngine::new();
        for (index, layer) in self.jmk.layers.iter().enumerate() {
            for (key_name, def) in layer {
                let vk = Vk::parse(key_name)
                    .with_context(|| format!("layer {index}, key {key_name:?}"))?;
                let binding = build_binding(def, self.jmk.layers.len())
                    .with_context(|| format!("layer {index}, key {key_name:?}"))?;
                layers
                    .register(index, vk, binding)
                    .with_context(|| format!("layer {index}, key {key_name:?}"))?;
            }
        }
        let mut hotkeys = HotkeyEngine::new();
        for (combo, action) in &self.hotkeys.bindings {
            let chord =
                parse_chord(combo).with_context(|| format!("hotkey {combo:?}"))?;
            let action = parse_action(action)
                .with_context(|| format!("hotkey {combo:?} -> {action:?}"))?;
            hotkeys
                .register(&chord, action)
                .with_context(|| format!("hotkey {combo:?}"))?;
        }
        Ok(Pipeline::new(layers, hotkeys))
    }

    /// The themes in declaration order; an empty selection means all
    /// built-ins.
    pub fn build_themes(&self) -> Result<Vec<Theme>> {
        let all = default_themes();
        if self.general.themes.is_empty() {
            return Ok(all);
        }
        let mut themes = Vec::with_capacity(self.general.themes.len());
        for name in &self.general.themes {
            match all.iter().find(|t| t.name == name.as_str()) {
                Some(theme) => themes.push(theme.clone()),
                None => bail!("unknown theme {name:?}"),
            }
        }
        Ok(themes)
    }

    pub fn build_rules(&self) -> Result<Vec<WindowRule>> {
        let mut rules = Vec::with_capacity(self.rules.len());
        let mut static_indices = HashMap::new();
        for (i, rule) in self.rules.iter().enumerate() {
            if let Some(slot) = rule.static_window_index {
                if let Some(prev) = static_indices.insert(slot, i) {
                    bail!(
                        "rules {prev} and {i} both pin static window index {slot}"
                    );
                }
            }
            rules.push(WindowRule {
                exe: build_matcher(&rule.exe, rule.exe_is_regex)
                    .with_context(|| format!("rule {i}, exe"))?,
                title: build_matcher(&rule.title, rule.title_is_regex)
                    .with_context(|| format!("rule {i}, title"))?,
                class_name: build_matcher(&rule.class_name, false)
                    .with_context(|| format!("rule {i}, class_name"))?,
                manageable: rule.manageable,
                tilable: rule.tilable,
                preferred_monitor: rule.preferred_monitor_index,
                preferred_workspace: rule.preferred_workspace_index,
                static_index: rule.static_window_index,
            });
        }
        Ok(rules)
    }

    pub fn wm_options(&self) -> Result<WmOptions> {
        if self.general.workspace_names.is_empty() {
            bail!("workspace_names must not be empty");
        }
        Ok(WmOptions {
            themes: self.build_themes()?,
            rules: self.build_rules()?,
            workspace_names: self.general.workspace_names.clone(),
        })
    }

    /// Action strings of all hotkey bindings that resolve to window-manager
    /// commands, deduplicated, for registry wiring.
    pub fn command_actions(&self) -> Vec<(String, Command)> {
        let mut actions: HashMap<String, Command> = HashMap::new();
        for action in self.hotkeys.bindings.values() {
            if let Ok(command) = Command::parse(action) {
                actions.insert(action.clone(), command);
            }
        }
        actions.into_iter().collect()
    }
}

fn build_binding(def: &KeyDef, layer_count: usize) -> Result<Binding> {
    match def {
        KeyDef::Remap(spec) => Ok(Binding::Send(parse_key_action(spec)?)),
        KeyDef::TapHold(def) => {
            let tap = def.tap.as_deref().map(parse_key_action).transpose()?;
            let hold = match (&def.hold, def.layer) {
                (Some(_), Some(_)) => {
                    bail!("tap-hold binds both a hold key and a layer")
                }
                (Some(spec), None) => Some(parse_hold_action(spec)?),
                (None, Some(layer)) => {
                    if layer == 0 || layer >= layer_count.max(1) {
                        bail!("layer index {layer} out of range");
                    }
                    Some(HoldAction::Layer(layer))
                }
                (None, None) => None,
            };
            Ok(Binding::TapHold(TapHold {
                tap,
                hold,
                term_ms: def.term_ms,
                quick_tap_term_ms: def.quick_tap_term_ms,
            }))
        }
    }
}

fn parse_key_action(spec: &str) -> Result<KeyAction> {
    if let Some(id) = spec.strip_prefix("action:") {
        return Ok(KeyAction::Invoke(id.to_string()));
    }
    Ok(KeyAction::Keys(parse_chord(spec)?))
}

fn parse_hold_action(spec: &str) -> Result<HoldAction> {
    if let Some(id) = spec.strip_prefix("action:") {
        return Ok(HoldAction::Invoke(id.to_string()));
    }
    Ok(HoldAction::Key(Vk::parse(spec)?))
}

fn parse_action(action: &str) -> Result<HotkeyAction> {
    if let Some(spec) = action.strip_prefix("send:") {
        return Ok(HotkeyAction::Send(parse_chord(spec)?));
    }
    if action.starts_with("action:") {
        return Ok(HotkeyAction::Invoke(action.to_string()));
    }
    // anything else must be a window-manager command
    Command::parse(action)?;
    Ok(HotkeyAction::Invoke(action.to_string()))
}

fn build_matcher(pattern: &Option<String>, is_regex: bool) -> Result<Option<regex::Regex>> {
    let Some(pattern) = pattern else {
        return Ok(None);
    };
    let source = if is_regex {
        pattern.clone()
    } else {
        format!("^{}$", regex::escape(pattern))
    };
    let compiled = RegexBuilder::new(&source)
        .case_insensitive(true)
        .build()
        .with_context(|| format!("pattern {pattern:?}"))?;
    Ok(Some(compiled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn parses_a_full_toml_config() {
        let config: Config = toml::from_str(
            r#"
            [general]
            workspace_names = ["web", "code", "chat"]
            themes = ["widescreen_dwindle", "monocle"]

            [[jmk.layers]]
            CAPITAL = { tap = "ESCAPE", hold = "LCTRL", term_ms = 150 }
            F13 = "action:open_terminal"

            [[jmk.layers]]
            H = "LEFT"
            L = "RIGHT"

            [hotkeys.bindings]
            "Win+Q" = "send:LAlt+F4"
            "Win+J" = "next_window"

            [[rules]]
            exe = "explorer.exe"
            manageable = false

            [[rules]]
            exe = "cmd.exe"
            title = "nvim"
            title_is_regex = true
            static_window_index = 0

            [[services]]
            name = "syncthing"
            args = ["syncthing", "-no-browser"]
            autorestart = true
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.general.workspace_names.len(), 3);
        assert_eq!(config.build_themes().unwrap().len(), 2);
        assert_eq!(config.build_rules().unwrap().len(), 2);
        let pipeline = config.build_pipeline().unwrap();
        assert_eq!(pipeline.layers.layer_count(), 2);
        assert_eq!(pipeline.hotkeys.len(), 2);
    }

    #[test]
    fn unknown_key_name_fails_with_entry() {
        let mut config = Config::default();
        let mut layer = HashMap::new();
        layer.insert("HYPERKEY".to_string(), KeyDef::Remap("LCTRL".into()));
        config.jmk.layers.push(layer);
        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("HYPERKEY"));
    }

    #[test]
    fn unknown_action_fails_with_entry() {
        let mut config = Config::default();
        config
            .hotkeys
            .bindings
            .insert("Win+X".into(), "explode".into());
        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("Win+X"));
    }

    #[test]
    fn overlapping_chords_fail() {
        let mut config = Config::default();
        config.hotkeys.bindings.clear();
        config
            .hotkeys
            .bindings
            .insert("Ctrl+K".into(), "next_window".into());
        config
            .hotkeys
            .bindings
            .insert("LCtrl+K".into(), "prev_window".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_static_index_fails() {
        let mut config = Config::default();
        for _ in 0..2 {
            config.rules.push(RuleConfig {
                exe: Some("a.exe".into()),
                static_window_index: Some(0),
                ..Default::default()
            });
        }
        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("static window index 0"));
    }

    #[test]
    fn taphold_with_hold_and_layer_fails() {
        let mut config = Config::default();
        let mut layer = HashMap::new();
        layer.insert(
            "F".to_string(),
            KeyDef::TapHold(TapHoldDef {
                tap: Some("F".into()),
                hold: Some("LCTRL".into()),
                layer: Some(1),
                term_ms: 200,
                quick_tap_term_ms: 120,
            }),
        );
        config.jmk.layers.push(layer);
        config.jmk.layers.push(HashMap::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn layer_index_bounds_are_checked() {
        let mut config = Config::default();
        let mut layer = HashMap::new();
        layer.insert(
            "F".to_string(),
            KeyDef::TapHold(TapHoldDef {
                tap: None,
                hold: None,
                layer: Some(3),
                term_ms: 200,
                quick_tap_term_ms: 120,
            }),
        );
        config.jmk.layers.push(layer);
        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("out of range"));
    }

    #[test]
    fn literal_rule_patterns_are_anchored() {
        let mut config = Config::default();
        config.rules.push(RuleConfig {
            exe: Some("cmd.exe".into()),
            ..Default::default()
        });
        let rules = config.build_rules().unwrap();
        let exe = rules[0].exe.as_ref().unwrap();
        assert!(exe.is_match("cmd.exe"));
        assert!(exe.is_match("CMD.EXE"));
        // the dot must not act as a wildcard, nor may substrings match
        assert!(!exe.is_match("cmdaexe"));
        assert!(!exe.is_match("mycmd.exe"));
    }

    #[test]
    fn command_actions_cover_default_bindings() {
        let config = Config::default();
        let actions = config.command_actions();
        assert!(actions
            .iter()
            .any(|(_, c)| *c == Command::NextWindow));
        assert!(actions
            .iter()
            .any(|(_, c)| *c == Command::SwitchWorkspace(3)));
    }
}
