//! Synthesized mouse and keyboard input using Core Graphics events.

use anyhow::{Context, Result};
use core_graphics::event::{
    CGEvent, CGEventFlags, CGEventTapLocation, CGEventType, CGKeyCode, CGMouseButton,
    ScrollEventUnit,
};
use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};
use core_graphics::geometry::CGPoint;
use std::thread;
use std::time::Duration;
use tracing::debug;

use crate::desktop::{Key, KeyChord, Modifiers};
use crate::geometry::Point;

fn event_source() -> Result<CGEventSource> {
    CGEventSource::new(CGEventSourceStateID::HIDSystemState)
        .ok()
        .context("Failed to create CGEventSource")
}

fn mouse_event(kind: CGEventType, at: CGPoint) -> Result<CGEvent> {
    CGEvent::new_mouse_event(event_source()?, kind, at, CGMouseButton::Left)
        .ok()
        .context("Failed to create mouse event")
}

pub fn click(at: Point) -> Result<()> {
    let point = CGPoint::new(at.x as f64, at.y as f64);

    mouse_event(CGEventType::MouseMoved, point)?.post(CGEventTapLocation::HID);
    thread::sleep(Duration::from_millis(15));
    mouse_event(CGEventType::LeftMouseDown, point)?.post(CGEventTapLocation::HID);
    thread::sleep(Duration::from_millis(30));
    mouse_event(CGEventType::LeftMouseUp, point)?.post(CGEventTapLocation::HID);

    debug!(x = at.x, y = at.y, "Posted click");
    Ok(())
}

/// Wheel scroll under `at`; positive `lines` scroll content toward its end.
pub fn scroll(at: Point, lines: i32) -> Result<()> {
    let point = CGPoint::new(at.x as f64, at.y as f64);
    mouse_event(CGEventType::MouseMoved, point)?.post(CGEventTapLocation::HID);
    thread::sleep(Duration::from_millis(15));

    let event = CGEvent::new_scroll_event(event_source()?, ScrollEventUnit::LINE, 1, -lines, 0, 0)
        .ok()
        .context("Failed to create scroll event")?;
    event.post(CGEventTapLocation::HID);

    debug!(x = at.x, y = at.y, lines, "Posted scroll");
    Ok(())
}

pub fn press(chord: KeyChord) -> Result<()> {
    let code = key_code(chord.key).with_context(|| format!("No key code for {:?}", chord.key))?;
    let flags = event_flags(chord.modifiers);
    let source = event_source()?;

    let key_down = CGEvent::new_keyboard_event(source.clone(), code, true)
        .ok()
        .context("Failed to create key down event")?;
    key_down.set_flags(flags);

    let key_up = CGEvent::new_keyboard_event(source, code, false)
        .ok()
        .context("Failed to create key up event")?;
    key_up.set_flags(flags);

    key_down.post(CGEventTapLocation::HID);
    thread::sleep(Duration::from_millis(5));
    key_up.post(CGEventTapLocation::HID);

    debug!(?chord, "Posted key chord");
    Ok(())
}

fn event_flags(modifiers: Modifiers) -> CGEventFlags {
    let mut flags = CGEventFlags::CGEventFlagNull;
    if modifiers.contains(Modifiers::COMMAND) {
        flags |= CGEventFlags::CGEventFlagCommand;
    }
    if modifiers.contains(Modifiers::SHIFT) {
        flags |= CGEventFlags::CGEventFlagShift;
    }
    if modifiers.contains(Modifiers::OPTION) {
        flags |= CGEventFlags::CGEventFlagAlternate;
    }
    if modifiers.contains(Modifiers::CONTROL) {
        flags |= CGEventFlags::CGEventFlagControl;
    }
    flags
}

/// ANSI-layout virtual key codes.
fn key_code(key: Key) -> Option<CGKeyCode> {
    let code = match key {
        Key::Tab => 48,
        Key::Enter => 36,
        Key::Escape => 53,
        Key::Delete => 51,
        Key::Space => 49,
        Key::Home => 115,
        Key::End => 119,
        Key::PageDown => 121,
        Key::Left => 123,
        Key::Right => 124,
        Key::Down => 125,
        Key::Up => 126,
        Key::Char(c) => return char_code(c.to_ascii_lowercase()),
    };
    Some(code)
}

fn char_code(c: char) -> Option<CGKeyCode> {
    let code = match c {
        'a' => 0,
        's' => 1,
        'd' => 2,
        'f' => 3,
        'h' => 4,
        'g' => 5,
        'z' => 6,
        'x' => 7,
        'c' => 8,
        'v' => 9,
        'b' => 11,
        'q' => 12,
        'w' => 13,
        'e' => 14,
        'r' => 15,
        'y' => 16,
        't' => 17,
        '1' => 18,
        '2' => 19,
        '3' => 20,
        '4' => 21,
        '6' => 22,
        '5' => 23,
        '9' => 25,
        '7' => 26,
        '8' => 28,
        '0' => 29,
        'o' => 31,
        'u' => 32,
        'i' => 34,
        'p' => 35,
        'l' => 37,
        'j' => 38,
        'k' => 40,
        'n' => 45,
        'm' => 46,
        _ => return None,
    };
    Some(code)
}
