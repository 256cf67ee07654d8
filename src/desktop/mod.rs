//! Desktop access seam.
//!
//! Every interaction with the operating system (window discovery, focus,
//! capture, OCR, synthesized input, clipboard, processes, time) goes through
//! the [`Desktop`] trait. The automation layers above never touch OS APIs
//! directly, which keeps them testable against a scripted desktop.
//!
//! # Backends
//!
//! - `macos` - Accessibility + CoreGraphics + Vision + xcap
//! - `unsupported` - every window/input operation fails with a clear error;
//!   process and clipboard helpers still work
//! - `fake` (tests only) - an in-memory chat app with a virtual clock

use bitflags::bitflags;
use image::RgbaImage;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::geometry::{Bounds, Point};

#[cfg(target_os = "macos")]
mod macos;
pub mod system;
#[cfg(not(target_os = "macos"))]
mod unsupported;

#[cfg(test)]
pub(crate) mod fake;

/// How the target application is identified on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIdentity {
    /// Display name used for launching and window matching (e.g. "ChatGPT")
    pub name: String,
    /// Executable name as reported by the process table
    pub process_name: String,
    /// Optional bundle identifier, preferred over `name` when present
    pub bundle_id: Option<String>,
}

/// Opaque reference to the target's top-level window, valid for one flow attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowHandle {
    /// Identity token assigned by the backend
    pub id: u64,
    /// Owning process
    pub pid: u32,
    /// Last-known window rectangle in screen points
    pub bounds: Bounds,
    /// False once the backend has reported the window gone
    pub valid: bool,
}

/// Live state of a window as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowState {
    pub exists: bool,
    pub minimized: bool,
    pub visible: bool,
    pub bounds: Option<Bounds>,
}

impl WindowState {
    pub const fn gone() -> Self {
        Self {
            exists: false,
            minimized: false,
            visible: false,
            bounds: None,
        }
    }
}

/// One OCR hit. `bounds` is in pixel coordinates of the recognized image, top-left origin.
#[derive(Debug, Clone, PartialEq)]
pub struct TextObservation {
    pub text: String,
    pub bounds: Bounds,
    pub confidence: f32,
}

/// Description of the element holding keyboard focus.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FocusedElement {
    pub role: String,
    pub name: String,
    pub editable: bool,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u8 {
        const COMMAND = 1 << 0;
        const SHIFT = 1 << 1;
        const OPTION = 1 << 2;
        const CONTROL = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Char(char),
    Tab,
    Enter,
    Escape,
    Delete,
    Space,
    Home,
    End,
    PageDown,
    Left,
    Right,
    Up,
    Down,
}

/// A key plus held modifiers, e.g. `cmd+shift+c`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyChord {
    pub key: Key,
    pub modifiers: Modifiers,
}

impl KeyChord {
    pub const fn new(key: Key, modifiers: Modifiers) -> Self {
        Self { key, modifiers }
    }

    pub const fn plain(key: Key) -> Self {
        Self::new(key, Modifiers::empty())
    }

    pub const fn command(c: char) -> Self {
        Self::new(Key::Char(c), Modifiers::COMMAND)
    }

    pub const SELECT_ALL: KeyChord = KeyChord::command('a');
    pub const COPY: KeyChord = KeyChord::command('c');
    pub const PASTE: KeyChord = KeyChord::command('v');
    pub const SHIFT_TAB: KeyChord = KeyChord::new(Key::Tab, Modifiers::SHIFT);
}

impl FromStr for KeyChord {
    type Err = String;

    /// Parses `cmd+shift+c`, `ctrl+k`, `enter`, `shift+tab` and friends.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut modifiers = Modifiers::empty();
        let mut key = None;
        for part in s.split('+').map(|p| p.trim().to_ascii_lowercase()) {
            match part.as_str() {
                "cmd" | "command" | "meta" | "super" => modifiers |= Modifiers::COMMAND,
                "shift" => modifiers |= Modifiers::SHIFT,
                "alt" | "opt" | "option" => modifiers |= Modifiers::OPTION,
                "ctrl" | "control" => modifiers |= Modifiers::CONTROL,
                other => {
                    if key.is_some() {
                        return Err(format!("more than one key in shortcut '{s}'"));
                    }
                    key = Some(parse_key(other).ok_or_else(|| format!("unknown key '{other}'"))?);
                }
            }
        }
        key.map(|key| KeyChord::new(key, modifiers))
            .ok_or_else(|| format!("shortcut '{s}' has no key"))
    }
}

fn parse_key(name: &str) -> Option<Key> {
    let key = match name {
        "tab" => Key::Tab,
        "enter" | "return" => Key::Enter,
        "esc" | "escape" => Key::Escape,
        "delete" | "backspace" => Key::Delete,
        "space" => Key::Space,
        "home" => Key::Home,
        "end" => Key::End,
        "pagedown" => Key::PageDown,
        "left" => Key::Left,
        "right" => Key::Right,
        "up" => Key::Up,
        "down" => Key::Down,
        single => {
            let mut chars = single.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphanumeric() => Key::Char(c),
                _ => return None,
            }
        }
    };
    Some(key)
}

/// Operating-system surface used by the automation driver.
///
/// Platform failures are `anyhow` errors; the automation layers translate them
/// into the driver's error taxonomy.
pub trait Desktop {
    /// Locate the target's main window, or `None` when it has no usable window.
    fn find_window(&self, app: &AppIdentity) -> anyhow::Result<Option<WindowHandle>>;

    fn window_state(&self, handle: &WindowHandle) -> WindowState;

    fn is_foreground(&self, handle: &WindowHandle) -> bool;

    /// Primary foreground request (application activation).
    fn activate(&self, handle: &WindowHandle) -> anyhow::Result<()>;

    /// Fallback foreground request (raise the window itself).
    fn raise(&self, handle: &WindowHandle) -> anyhow::Result<()>;

    /// Un-minimize / un-hide.
    fn restore(&self, handle: &WindowHandle) -> anyhow::Result<()>;

    fn window_title(&self, handle: &WindowHandle) -> Option<String>;

    fn is_app_running(&self, app: &AppIdentity) -> bool;

    /// Kill every process of the target app. Returns how many were signalled.
    fn terminate_app(&self, app: &AppIdentity) -> anyhow::Result<usize>;

    fn launch_app(&self, app: &AppIdentity) -> anyhow::Result<()>;

    /// Capture a screen region of the window, scaled to logical points.
    fn capture(&self, handle: &WindowHandle, region: Bounds) -> anyhow::Result<RgbaImage>;

    fn recognize_text(&self, image: &RgbaImage) -> anyhow::Result<Vec<TextObservation>>;

    fn click(&self, at: Point) -> anyhow::Result<()>;

    /// Scroll the view under `at`. Positive `lines` scroll toward the end of content.
    fn scroll(&self, at: Point, lines: i32) -> anyhow::Result<()>;

    fn press(&self, chord: KeyChord) -> anyhow::Result<()>;

    fn focused_element(&self) -> Option<FocusedElement>;

    fn clipboard_text(&self) -> anyhow::Result<Option<String>>;

    fn set_clipboard_text(&self, text: &str) -> anyhow::Result<()>;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

/// The backend for the platform this binary was built for.
pub fn system_desktop() -> Box<dyn Desktop> {
    #[cfg(target_os = "macos")]
    {
        Box::new(macos::MacDesktop::new())
    }
    #[cfg(not(target_os = "macos"))]
    {
        Box::new(unsupported::UnsupportedDesktop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_copy_last_message_shortcut() {
        let chord: KeyChord = "cmd+shift+c".parse().unwrap();
        assert_eq!(chord.key, Key::Char('c'));
        assert_eq!(chord.modifiers, Modifiers::COMMAND | Modifiers::SHIFT);
    }

    #[test]
    fn test_parse_named_keys_case_insensitive() {
        assert_eq!("Shift+Tab".parse::<KeyChord>().unwrap(), KeyChord::SHIFT_TAB);
        assert_eq!(
            "enter".parse::<KeyChord>().unwrap(),
            KeyChord::plain(Key::Enter)
        );
        assert_eq!("Cmd+K".parse::<KeyChord>().unwrap(), KeyChord::command('k'));
    }

    #[test]
    fn test_parse_rejects_bad_shortcuts() {
        assert!("cmd+shift".parse::<KeyChord>().is_err());
        assert!("cmd+a+b".parse::<KeyChord>().is_err());
        assert!("cmd+f13".parse::<KeyChord>().is_err());
    }
}
