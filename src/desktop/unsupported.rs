//! Fallback backend for platforms without window automation support.

use anyhow::{bail, Result};
use image::RgbaImage;

use super::{system, AppIdentity, Desktop, FocusedElement, KeyChord, TextObservation};
use super::{WindowHandle, WindowState};
use crate::geometry::{Bounds, Point};

const UNSUPPORTED: &str = "window automation is only supported on macOS";

pub struct UnsupportedDesktop;

impl Desktop for UnsupportedDesktop {
    fn find_window(&self, _app: &AppIdentity) -> Result<Option<WindowHandle>> {
        bail!(UNSUPPORTED)
    }

    fn window_state(&self, _handle: &WindowHandle) -> WindowState {
        WindowState::gone()
    }

    fn is_foreground(&self, _handle: &WindowHandle) -> bool {
        false
    }

    fn activate(&self, _handle: &WindowHandle) -> Result<()> {
        bail!(UNSUPPORTED)
    }

    fn raise(&self, _handle: &WindowHandle) -> Result<()> {
        bail!(UNSUPPORTED)
    }

    fn restore(&self, _handle: &WindowHandle) -> Result<()> {
        bail!(UNSUPPORTED)
    }

    fn window_title(&self, _handle: &WindowHandle) -> Option<String> {
        None
    }

    fn is_app_running(&self, app: &AppIdentity) -> bool {
        !system::matching_pids(&app.process_name).is_empty()
    }

    fn terminate_app(&self, app: &AppIdentity) -> Result<usize> {
        system::terminate_processes(&app.process_name)
    }

    fn launch_app(&self, _app: &AppIdentity) -> Result<()> {
        bail!(UNSUPPORTED)
    }

    fn capture(&self, _handle: &WindowHandle, _region: Bounds) -> Result<RgbaImage> {
        bail!(UNSUPPORTED)
    }

    fn recognize_text(&self, _image: &RgbaImage) -> Result<Vec<TextObservation>> {
        bail!("OCR is only supported on macOS")
    }

    fn click(&self, _at: Point) -> Result<()> {
        bail!(UNSUPPORTED)
    }

    fn scroll(&self, _at: Point, _lines: i32) -> Result<()> {
        bail!(UNSUPPORTED)
    }

    fn press(&self, _chord: KeyChord) -> Result<()> {
        bail!(UNSUPPORTED)
    }

    fn focused_element(&self) -> Option<FocusedElement> {
        None
    }

    fn clipboard_text(&self) -> Result<Option<String>> {
        system::read_clipboard()
    }

    fn set_clipboard_text(&self, text: &str) -> Result<()> {
        system::write_clipboard(text)
    }
}
