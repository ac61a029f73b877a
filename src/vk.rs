//! Virtual-key model: a closed enumeration of keyboard keys, mouse buttons
//! and synthetic wheel keys, plus parsers for human readable chords such as
//! `"Win+Shift+J"`.

use crate::Result;
use anyhow::bail;

macro_rules! vkeys {
    ($(($variant:ident, $code:literal, $name:literal $(, $alias:literal)*)),* $(,)?) => {
        /// Win32 virtual-key codes extended with synthetic keys for wheel
        /// scrolling. Codes below 0x07 are mouse buttons, codes at 0x1000
        /// and above never leave this process.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u16)]
        pub enum Vk {
            $($variant = $code),*
        }

        impl Vk {
            pub fn from_code(code: u32) -> Option<Vk> {
                match code {
                    $($code => Some(Vk::$variant),)*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Vk::$variant => $name),*
                }
            }

            fn from_token(token: &str) -> Option<Vk> {
                match token {
                    $($name => Some(Vk::$variant),)*
                    $($($alias => Some(Vk::$variant),)*)*
                    _ => None,
                }
            }
        }
    };
}

vkeys! {
    (LButton, 0x01, "LBUTTON"),
    (RButton, 0x02, "RBUTTON"),
    (Cancel, 0x03, "CANCEL"),
    (MButton, 0x04, "MBUTTON"),
    (XButton1, 0x05, "XBUTTON1"),
    (XButton2, 0x06, "XBUTTON2"),
    (Back, 0x08, "BACK", "BACKSPACE"),
    (Tab, 0x09, "TAB"),
    (Clear, 0x0C, "CLEAR"),
    (Return, 0x0D, "RETURN", "ENTER"),
    (Shift, 0x10, "SHIFT", "SFT"),
    (Control, 0x11, "CONTROL", "CTRL", "CTL"),
    (Menu, 0x12, "MENU", "ALT"),
    (Pause, 0x13, "PAUSE"),
    (Capital, 0x14, "CAPITAL", "CAPSLOCK", "CAPS"),
    (Kana, 0x15, "KANA", "HANGUL"),
    (ImeOn, 0x16, "IME_ON"),
    (Junja, 0x17, "JUNJA"),
    (Final, 0x18, "FINAL"),
    (Hanja, 0x19, "HANJA", "KANJI"),
    (ImeOff, 0x1A, "IME_OFF"),
    (Escape, 0x1B, "ESCAPE", "ESC"),
    (Convert, 0x1C, "CONVERT"),
    (NonConvert, 0x1D, "NONCONVERT"),
    (Accept, 0x1E, "ACCEPT"),
    (ModeChange, 0x1F, "MODECHANGE"),
    (Space, 0x20, "SPACE"),
    (Prior, 0x21, "PRIOR", "PGUP", "PAGEUP"),
    (Next, 0x22, "NEXT", "PGDN", "PAGEDOWN"),
    (End, 0x23, "END"),
    (Home, 0x24, "HOME"),
    (Left, 0x25, "LEFT"),
    (Up, 0x26, "UP"),
    (Right, 0x27, "RIGHT"),
    (Down, 0x28, "DOWN"),
    (Select, 0x29, "SELECT"),
    (Print, 0x2A, "PRINT"),
    (Execute, 0x2B, "EXECUTE"),
    (Snapshot, 0x2C, "SNAPSHOT", "PRINTSCREEN"),
    (Insert, 0x2D, "INSERT", "INS"),
    (Delete, 0x2E, "DELETE", "DEL"),
    (Help, 0x2F, "HELP"),
    (Key0, 0x30, "0"),
    (Key1, 0x31, "1"),
    (Key2, 0x32, "2"),
    (Key3, 0x33, "3"),
    (Key4, 0x34, "4"),
    (Key5, 0x35, "5"),
    (Key6, 0x36, "6"),
    (Key7, 0x37, "7"),
    (Key8, 0x38, "8"),
    (Key9, 0x39, "9"),
    (A, 0x41, "A"),
    (B, 0x42, "B"),
    (C, 0x43, "C"),
    (D, 0x44, "D"),
    (E, 0x45, "E"),
    (F, 0x46, "F"),
    (G, 0x47, "G"),
    (H, 0x48, "H"),
    (I, 0x49, "I"),
    (J, 0x4A, "J"),
    (K, 0x4B, "K"),
    (L, 0x4C, "L"),
    (M, 0x4D, "M"),
    (N, 0x4E, "N"),
    (O, 0x4F, "O"),
    (P, 0x50, "P"),
    (Q, 0x51, "Q"),
    (R, 0x52, "R"),
    (S, 0x53, "S"),
    (T, 0x54, "T"),
    (U, 0x55, "U"),
    (V, 0x56, "V"),
    (W, 0x57, "W"),
    (X, 0x58, "X"),
    (Y, 0x59, "Y"),
    (Z, 0x5A, "Z"),
    (LWin, 0x5B, "LWIN", "LSUPER"),
    (RWin, 0x5C, "RWIN", "RSUPER"),
    (Apps, 0x5D, "APPS"),
    (Sleep, 0x5F, "SLEEP"),
    (Numpad0, 0x60, "NUMPAD0"),
    (Numpad1, 0x61, "NUMPAD1"),
    (Numpad2, 0x62, "NUMPAD2"),
    (Numpad3, 0x63, "NUMPAD3"),
    (Numpad4, 0x64, "NUMPAD4"),
    (Numpad5, 0x65, "NUMPAD5"),
    (Numpad6, 0x66, "NUMPAD6"),
    (Numpad7, 0x67, "NUMPAD7"),
    (Numpad8, 0x68, "NUMPAD8"),
    (Numpad9, 0x69, "NUMPAD9"),
    (Multiply, 0x6A, "MULTIPLY"),
    (Add, 0x6B, "ADD"),
    (Separator, 0x6C, "SEPARATOR"),
    (Subtract, 0x6D, "SUBTRACT"),
    (Decimal, 0x6E, "DECIMAL"),
    (Divide, 0x6F, "DIVIDE"),
    (F1, 0x70, "F1"),
    (F2, 0x71, "F2"),
    (F3, 0x72, "F3"),
    (F4, 0x73, "F4"),
    (F5, 0x74, "F5"),
    (F6, 0x75, "F6"),
    (F7, 0x76, "F7"),
    (F8, 0x77, "F8"),
    (F9, 0x78, "F9"),
    (F10, 0x79, "F10"),
    (F11, 0x7A, "F11"),
    (F12, 0x7B, "F12"),
    (F13, 0x7C, "F13"),
    (F14, 0x7D, "F14"),
    (F15, 0x7E, "F15"),
    (F16, 0x7F, "F16"),
    (F17, 0x80, "F17"),
    (F18, 0x81, "F18"),
    (F19, 0x82, "F19"),
    (F20, 0x83, "F20"),
    (F21, 0x84, "F21"),
    (F22, 0x85, "F22"),
    (F23, 0x86, "F23"),
    (F24, 0x87, "F24"),
    (NumLock, 0x90, "NUMLOCK"),
    (Scroll, 0x91, "SCROLL"),
    (LShift, 0xA0, "LSHIFT", "LSFT"),
    (RShift, 0xA1, "RSHIFT", "RSFT"),
    (LControl, 0xA2, "LCONTROL", "LCTRL", "LCTL"),
    (RControl, 0xA3, "RCONTROL", "RCTRL", "RCTL"),
    (LMenu, 0xA4, "LMENU", "LALT"),
    (RMenu, 0xA5, "RMENU", "RALT"),
    (BrowserBack, 0xA6, "BROWSER_BACK"),
    (BrowserForward, 0xA7, "BROWSER_FORWARD"),
    (BrowserRefresh, 0xA8, "BROWSER_REFRESH"),
    (BrowserStop, 0xA9, "BROWSER_STOP"),
    (BrowserSearch, 0xAA, "BROWSER_SEARCH"),
    (BrowserFavorites, 0xAB, "BROWSER_FAVORITES"),
    (BrowserHome, 0xAC, "BROWSER_HOME"),
    (VolumeMute, 0xAD, "VOLUME_MUTE"),
    (VolumeDown, 0xAE, "VOLUME_DOWN"),
    (VolumeUp, 0xAF, "VOLUME_UP"),
    (MediaNextTrack, 0xB0, "MEDIA_NEXT_TRACK"),
    (MediaPrevTrack, 0xB1, "MEDIA_PREV_TRACK"),
    (MediaStop, 0xB2, "MEDIA_STOP"),
    (MediaPlayPause, 0xB3, "MEDIA_PLAY_PAUSE"),
    (LaunchMail, 0xB4, "LAUNCH_MAIL"),
    (LaunchMediaSelect, 0xB5, "LAUNCH_MEDIA_SELECT"),
    (LaunchApp1, 0xB6, "LAUNCH_APP1"),
    (LaunchApp2, 0xB7, "LAUNCH_APP2"),
    (Oem1, 0xBA, "OEM_1", ";", "SEMICOLON"),
    (OemPlus, 0xBB, "OEM_PLUS", "=", "EQUAL"),
    (OemComma, 0xBC, "OEM_COMMA", ",", "COMMA"),
    (OemMinus, 0xBD, "OEM_MINUS", "-", "DASH"),
    (OemPeriod, 0xBE, "OEM_PERIOD", ".", "PERIOD"),
    (Oem2, 0xBF, "OEM_2", "/", "SLASH"),
    (Oem3, 0xC0, "OEM_3", "`", "BACKQUOTE"),
    (Oem4, 0xDB, "OEM_4", "[", "LBRACKET"),
    (Oem5, 0xDC, "OEM_5", "\\", "BACKSLASH"),
    (Oem6, 0xDD, "OEM_6", "]", "RBRACKET"),
    (Oem7, 0xDE, "OEM_7", "'", "QUOTE"),
    (Oem8, 0xDF, "OEM_8"),
    (Oem102, 0xE2, "OEM_102"),
    (ProcessKey, 0xE5, "PROCESSKEY"),
    (Packet, 0xE7, "PACKET"),
    (Attn, 0xF6, "ATTN"),
    (CrSel, 0xF7, "CRSEL"),
    (ExSel, 0xF8, "EXSEL"),
    (ErEof, 0xF9, "EREOF"),
    (Play, 0xFA, "PLAY"),
    (Zoom, 0xFB, "ZOOM"),
    (NoName, 0xFC, "NONAME"),
    (Pa1, 0xFD, "PA1"),
    (OemClear, 0xFE, "OEM_CLEAR"),
    // Synthetic keys. Wheel motion has no press/release pair on the wire,
    // the hook layer fabricates a down followed by an up for each notch.
    (WheelUp, 0x1000, "WHEEL_UP"),
    (WheelDown, 0x1001, "WHEEL_DOWN"),
    (WheelLeft, 0x1002, "WHEEL_LEFT"),
    (WheelRight, 0x1003, "WHEEL_RIGHT"),
}

impl Vk {
    pub fn is_mouse(self) -> bool {
        matches!(
            self,
            Vk::LButton | Vk::RButton | Vk::MButton | Vk::XButton1 | Vk::XButton2
        ) || self.is_wheel()
    }

    pub fn is_wheel(self) -> bool {
        matches!(
            self,
            Vk::WheelUp | Vk::WheelDown | Vk::WheelLeft | Vk::WheelRight
        )
    }

    /// Modifier keys may prefix a chord. The X buttons count as modifiers
    /// so mouse-centric chords like `XBUTTON2+WHEEL_UP` can be bound.
    pub fn is_modifier(self) -> bool {
        matches!(
            self,
            Vk::Shift
                | Vk::LShift
                | Vk::RShift
                | Vk::Control
                | Vk::LControl
                | Vk::RControl
                | Vk::Menu
                | Vk::LMenu
                | Vk::RMenu
                | Vk::LWin
                | Vk::RWin
                | Vk::XButton1
                | Vk::XButton2
        )
    }

    /// Left/right variants of a generic modifier, if this is one.
    pub fn sided_variants(self) -> Option<[Vk; 2]> {
        match self {
            Vk::Shift => Some([Vk::LShift, Vk::RShift]),
            Vk::Control => Some([Vk::LControl, Vk::RControl]),
            Vk::Menu => Some([Vk::LMenu, Vk::RMenu]),
            _ => None,
        }
    }

    pub fn parse(token: &str) -> Result<Vk> {
        let token = token.trim();
        let upper = token.to_ascii_uppercase();
        // WIN expands to both sides at chord registration, there is no
        // generic virtual-key code for it
        let key = match upper.as_str() {
            "WIN" | "SUPER" => Some(Vk::LWin),
            _ => Vk::from_token(&upper).or_else(|| Vk::from_token(token)),
        };
        match key {
            Some(k) => Ok(k),
            None => bail!("unknown key name: {token:?}"),
        }
    }
}

/// Parse a chord like `"Win+Shift+J"` into its keys, in written order.
/// Tokens are case-insensitive; `Win` maps to the left Windows key and is
/// expanded to both sides by [`expand_chord`].
pub fn parse_chord(spec: &str) -> Result<Vec<Vk>> {
    if spec.trim().is_empty() {
        bail!("empty key combination");
    }
    spec.split('+').map(Vk::parse).collect()
}

/// Expand generic modifiers into their sided variants: `Ctrl+S` becomes
/// `LCtrl+S` and `RCtrl+S`, and so on for every generic key in the chord.
pub fn expand_chord(chord: &[Vk]) -> Vec<Vec<Vk>> {
    let mut expanded: Vec<Vec<Vk>> = vec![Vec::with_capacity(chord.len())];
    for &key in chord {
        match key.sided_variants() {
            Some(sides) => {
                expanded = expanded
                    .iter()
                    .flat_map(|prefix| {
                        sides.iter().map(move |&side| {
                            let mut c = prefix.clone();
                            c.push(side);
                            c
                        })
                    })
                    .collect();
            }
            None => {
                for c in &mut expanded {
                    c.push(key);
                }
            }
        }
    }
    expanded
}

/// A single keyboard/mouse event as seen by the remapping engine.
/// `synthetic` marks events this process injected itself; they must flow
/// through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub vk: Vk,
    pub pressed: bool,
    pub synthetic: bool,
    pub time_ms: u64,
}

impl InputEvent {
    pub fn new(vk: Vk, pressed: bool, time_ms: u64) -> Self {
        Self {
            vk,
            pressed,
            synthetic: false,
            time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(Vk::parse("capital").unwrap(), Vk::Capital);
        assert_eq!(Vk::parse("CAPSLOCK").unwrap(), Vk::Capital);
        assert_eq!(Vk::parse("lCtRl").unwrap(), Vk::LControl);
    }

    #[test]
    fn parse_punctuation_aliases() {
        assert_eq!(Vk::parse(";").unwrap(), Vk::Oem1);
        assert_eq!(Vk::parse("[").unwrap(), Vk::Oem4);
        assert_eq!(Vk::parse("backquote").unwrap(), Vk::Oem3);
    }

    #[test]
    fn parse_chord_in_order() {
        let chord = parse_chord("Win+Shift+J").unwrap();
        assert_eq!(chord, vec![Vk::LWin, Vk::Shift, Vk::J]);
    }

    #[test]
    fn parse_chord_rejects_unknown() {
        assert!(parse_chord("Hyper+J").is_err());
        assert!(parse_chord("").is_err());
    }

    #[test]
    fn expand_generic_modifiers() {
        let chords = expand_chord(&parse_chord("Ctrl+Shift+S").unwrap());
        assert_eq!(chords.len(), 4);
        assert!(chords.contains(&vec![Vk::LControl, Vk::LShift, Vk::S]));
        assert!(chords.contains(&vec![Vk::RControl, Vk::RShift, Vk::S]));
    }

    #[test]
    fn expand_keeps_sided_chords() {
        let chords = expand_chord(&[Vk::LMenu, Vk::F4]);
        assert_eq!(chords, vec![vec![Vk::LMenu, Vk::F4]]);
    }

    #[test]
    fn code_round_trip() {
        for code in [0x01u32, 0x14, 0x41, 0x5B, 0xA4, 0xDE, 0x1000] {
            let vk = Vk::from_code(code).unwrap();
            assert_eq!(vk as u32, code);
        }
        assert!(Vk::from_code(0x07).is_none());
    }

    #[test]
    fn wheel_and_buttons_are_mouse() {
        assert!(Vk::WheelUp.is_mouse());
        assert!(Vk::XButton2.is_mouse());
        assert!(!Vk::A.is_mouse());
        assert!(Vk::XButton2.is_modifier());
    }
}
