//! macOS desktop backend.
//!
//! ## Architecture
//!
//! - Window discovery and state: NSWorkspace (pid, activation) + AXUIElement
//!   (windows, bounds, AXMinimized, AXHidden, AXTitle, AXFocusedUIElement)
//! - Input: CoreGraphics CGEvent posted to the HID tap
//! - Capture: xcap window capture, cropped and scaled to logical points
//! - OCR: Vision `VNRecognizeTextRequest`
//! - Clipboard and processes: arboard / sysinfo via [`super::system`]
//!
//! ## Permissions
//!
//! Requires Accessibility (input, AX queries) and Screen Recording (capture)
//! permission for the process running the driver.

mod ax;
mod input;
mod ocr;

use anyhow::{bail, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use objc::runtime::{Class, Object};
use objc::{msg_send, sel, sel_impl};
use std::process::Command;
use tracing::{debug, info, instrument, warn};

use super::{system, AppIdentity, Desktop, FocusedElement, KeyChord, TextObservation};
use super::{WindowHandle, WindowState};
use crate::geometry::{Bounds, Point};
use ax::AxElement;

/// NSApplicationActivateIgnoringOtherApps
const ACTIVATE_IGNORING_OTHER_APPS: u64 = 1 << 1;

const EDITABLE_ROLES: &[&str] = &["AXTextArea", "AXTextField", "AXComboBox", "AXSearchField"];

pub struct MacDesktop;

impl MacDesktop {
    pub fn new() -> Self {
        if !ax::is_trusted() {
            warn!("Accessibility permission not granted; window automation will fail");
        }
        Self
    }

    /// The AX element for the handle's window, matched by CGWindowID so a
    /// settings sheet or popover coming to the front cannot stand in for it.
    fn window_element(handle: &WindowHandle) -> Option<AxElement> {
        let app = AxElement::application(handle.pid)?;
        let target = u32::try_from(handle.id).ok()?;
        pick_window(app.windows(), target, AxElement::window_id)
    }
}

impl Default for MacDesktop {
    fn default() -> Self {
        Self::new()
    }
}

/// PIDs of running applications whose name or bundle id matches `app`.
unsafe fn matching_app_pids(app: &AppIdentity) -> Result<Vec<u32>> {
    let workspace_class = Class::get("NSWorkspace").context("Failed to get NSWorkspace")?;
    let workspace: *mut Object = msg_send![workspace_class, sharedWorkspace];
    let running_apps: *mut Object = msg_send![workspace, runningApplications];
    let app_count: usize = msg_send![running_apps, count];

    let mut pids = Vec::new();
    for i in 0..app_count {
        let running: *mut Object = msg_send![running_apps, objectAtIndex: i];
        let name_obj: *mut Object = msg_send![running, localizedName];
        let bundle_obj: *mut Object = msg_send![running, bundleIdentifier];
        let name = nsstring(name_obj);
        let bundle = nsstring(bundle_obj);
        let matches = match &app.bundle_id {
            Some(bundle_id) => bundle.as_deref() == Some(bundle_id.as_str()),
            None => name.as_deref() == Some(app.name.as_str()),
        };
        if matches {
            let pid: i32 = msg_send![running, processIdentifier];
            if pid > 0 {
                pids.push(pid as u32);
            }
        }
    }
    Ok(pids)
}

/// The entry whose window id is `target`, wherever it sits in z-order.
fn pick_window<W>(
    windows: impl IntoIterator<Item = W>,
    target: u32,
    id_of: impl Fn(&W) -> Option<u32>,
) -> Option<W> {
    windows.into_iter().find(|w| id_of(w) == Some(target))
}

unsafe fn nsstring(value: *mut Object) -> Option<String> {
    if value.is_null() {
        return None;
    }
    let utf8: *const i8 = msg_send![value, UTF8String];
    if utf8.is_null() {
        return None;
    }
    Some(std::ffi::CStr::from_ptr(utf8).to_string_lossy().into_owned())
}

unsafe fn running_application(pid: u32) -> Option<*mut Object> {
    let class = Class::get("NSRunningApplication")?;
    let app: *mut Object =
        msg_send![class, runningApplicationWithProcessIdentifier: pid as i32];
    (!app.is_null()).then_some(app)
}

fn frontmost_pid() -> Option<u32> {
    unsafe {
        let workspace_class = Class::get("NSWorkspace")?;
        let workspace: *mut Object = msg_send![workspace_class, sharedWorkspace];
        let front: *mut Object = msg_send![workspace, frontmostApplication];
        if front.is_null() {
            return None;
        }
        let pid: i32 = msg_send![front, processIdentifier];
        (pid > 0).then_some(pid as u32)
    }
}

impl Desktop for MacDesktop {
    #[instrument(skip(self))]
    fn find_window(&self, app: &AppIdentity) -> Result<Option<WindowHandle>> {
        if !ax::is_trusted() {
            bail!("Accessibility permission required for window control");
        }

        for pid in unsafe { matching_app_pids(app)? } {
            let Some(ax_app) = AxElement::application(pid) else {
                continue;
            };
            for window in ax_app.windows() {
                let Ok(bounds) = window.bounds() else {
                    continue;
                };
                // Skip popovers and zero-sized helper windows
                if bounds.width < 200 || bounds.height < 200 {
                    continue;
                }
                let Some(window_id) = window.window_id() else {
                    continue;
                };
                let handle = WindowHandle {
                    id: u64::from(window_id),
                    pid,
                    bounds,
                    valid: true,
                };
                info!(window_id = handle.id, pid, ?bounds, "Found target window");
                return Ok(Some(handle));
            }
        }
        debug!(app = %app.name, "No target window found");
        Ok(None)
    }

    fn window_state(&self, handle: &WindowHandle) -> WindowState {
        let Some(window) = Self::window_element(handle) else {
            return WindowState::gone();
        };
        let Ok(bounds) = window.bounds() else {
            return WindowState::gone();
        };
        let minimized = window.bool_attribute("AXMinimized").unwrap_or(false);
        let hidden = AxElement::application(handle.pid)
            .and_then(|app| app.bool_attribute("AXHidden"))
            .unwrap_or(false);
        WindowState {
            exists: true,
            minimized,
            visible: !hidden && !minimized && !bounds.is_empty(),
            bounds: Some(bounds),
        }
    }

    fn is_foreground(&self, handle: &WindowHandle) -> bool {
        frontmost_pid() == Some(handle.pid)
    }

    fn activate(&self, handle: &WindowHandle) -> Result<()> {
        unsafe {
            let app = running_application(handle.pid).context("Target process not found")?;
            let activated: bool = msg_send![app, activateWithOptions: ACTIVATE_IGNORING_OTHER_APPS];
            if !activated {
                bail!("activateWithOptions returned false");
            }
        }
        debug!(pid = handle.pid, "Requested app activation");
        Ok(())
    }

    fn raise(&self, handle: &WindowHandle) -> Result<()> {
        let window = Self::window_element(handle).context("Window not found")?;
        window.perform("AXRaise")?;
        if let Some(app) = AxElement::application(handle.pid) {
            app.set_bool("AXFrontmost", true)?;
        }
        debug!(window_id = handle.id, "Raised window");
        Ok(())
    }

    fn restore(&self, handle: &WindowHandle) -> Result<()> {
        unsafe {
            if let Some(app) = running_application(handle.pid) {
                let _: bool = msg_send![app, unhide];
            }
        }
        let window = Self::window_element(handle).context("Window not found")?;
        window.set_bool("AXMinimized", false)?;
        info!(window_id = handle.id, "Restored window");
        Ok(())
    }

    fn window_title(&self, handle: &WindowHandle) -> Option<String> {
        Self::window_element(handle)?.string_attribute("AXTitle")
    }

    fn is_app_running(&self, app: &AppIdentity) -> bool {
        !system::matching_pids(&app.process_name).is_empty()
    }

    fn terminate_app(&self, app: &AppIdentity) -> Result<usize> {
        system::terminate_processes(&app.process_name)
    }

    fn launch_app(&self, app: &AppIdentity) -> Result<()> {
        let mut command = Command::new("open");
        match &app.bundle_id {
            Some(bundle_id) => command.arg("-b").arg(bundle_id),
            None => command.arg("-a").arg(&app.name),
        };
        let output = command.output().context("Failed to run open")?;
        if !output.status.success() {
            bail!(
                "open failed for {}: {}",
                app.name,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        info!(app = %app.name, "Launched target app");
        Ok(())
    }

    fn capture(&self, handle: &WindowHandle, region: Bounds) -> Result<RgbaImage> {
        let target = u32::try_from(handle.id).context("Window id out of range")?;
        let window = pick_window(
            xcap::Window::all().context("Failed to enumerate windows")?,
            target,
            |w| w.id().ok(),
        )
        .context("Target window not capturable")?;
        if window.is_minimized().unwrap_or(false) {
            bail!("Target window is minimized");
        }

        let win_x = window.x().unwrap_or(handle.bounds.x);
        let win_y = window.y().unwrap_or(handle.bounds.y);
        let win_width = window.width().unwrap_or(handle.bounds.width).max(1);

        let image = window.capture_image().context("Window capture failed")?;
        // xcap captures at backing resolution (2x on retina)
        let scale = image.width() as f64 / win_width as f64;

        let window_bounds = Bounds::new(win_x, win_y, win_width, window.height().unwrap_or(0));
        let clipped = window_bounds
            .intersect(&region)
            .context("Capture region lies outside the window")?;

        let crop_x = ((clipped.x - win_x) as f64 * scale) as u32;
        let crop_y = ((clipped.y - win_y) as f64 * scale) as u32;
        let crop_w = ((clipped.width as f64 * scale) as u32).min(image.width().saturating_sub(crop_x));
        let crop_h = ((clipped.height as f64 * scale) as u32).min(image.height().saturating_sub(crop_y));
        let cropped = imageops::crop_imm(&image, crop_x, crop_y, crop_w, crop_h).to_image();

        if (scale - 1.0).abs() < f64::EPSILON {
            return Ok(cropped);
        }
        Ok(imageops::resize(
            &cropped,
            clipped.width,
            clipped.height,
            FilterType::Triangle,
        ))
    }

    fn recognize_text(&self, image: &RgbaImage) -> Result<Vec<TextObservation>> {
        #[cfg(feature = "ocr")]
        {
            ocr::recognize(image)
        }
        #[cfg(not(feature = "ocr"))]
        {
            let _ = image;
            bail!("OCR support disabled at build time")
        }
    }

    fn click(&self, at: Point) -> Result<()> {
        input::click(at)
    }

    fn scroll(&self, at: Point, lines: i32) -> Result<()> {
        input::scroll(at, lines)
    }

    fn press(&self, chord: KeyChord) -> Result<()> {
        input::press(chord)
    }

    fn focused_element(&self) -> Option<FocusedElement> {
        let focused = AxElement::system_wide()?.element_attribute("AXFocusedUIElement")?;
        let role = focused.string_attribute("AXRole").unwrap_or_default();
        let name = focused
            .string_attribute("AXDescription")
            .filter(|s| !s.is_empty())
            .or_else(|| focused.string_attribute("AXTitle"))
            .unwrap_or_default();
        let editable = EDITABLE_ROLES.contains(&role.as_str());
        Some(FocusedElement {
            role,
            name,
            editable,
        })
    }

    fn clipboard_text(&self) -> Result<Option<String>> {
        system::read_clipboard()
    }

    fn set_clipboard_text(&self, text: &str) -> Result<()> {
        system::write_clipboard(text)
    }
}
