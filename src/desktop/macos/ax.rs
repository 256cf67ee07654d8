//! Thin owned wrappers over the macOS Accessibility (AXUIElement) C API.
//!
//! Requires Accessibility permission in System Settings > Privacy & Security > Accessibility.

#![allow(non_upper_case_globals)]

use anyhow::{bail, Result};
use core_foundation::base::TCFType;
use core_foundation::string::{CFString, CFStringRef};
use macos_accessibility_client::accessibility;
use std::ffi::c_void;
use tracing::debug;

use crate::geometry::Bounds;

type AXUIElementRef = *const c_void;
type AXValueRef = *const c_void;
type CFTypeRef = *const c_void;
type CFArrayRef = *const c_void;

// ============================================================================
// FFI bindings
// ============================================================================

#[link(name = "ApplicationServices", kind = "framework")]
extern "C" {
    fn AXUIElementCreateSystemWide() -> AXUIElementRef;
    fn AXUIElementCreateApplication(pid: i32) -> AXUIElementRef;
    fn AXUIElementCopyAttributeValue(
        element: AXUIElementRef,
        attribute: CFStringRef,
        value: *mut CFTypeRef,
    ) -> i32;
    fn AXUIElementSetAttributeValue(
        element: AXUIElementRef,
        attribute: CFStringRef,
        value: CFTypeRef,
    ) -> i32;
    fn AXUIElementPerformAction(element: AXUIElementRef, action: CFStringRef) -> i32;
    fn AXValueGetValue(value: AXValueRef, value_type: i32, value_out: *mut c_void) -> bool;
    // Private but long-stable: maps an AX window to its CGWindowID
    fn _AXUIElementGetWindow(element: AXUIElementRef, window_id: *mut u32) -> i32;
}

#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    fn CFRelease(cf: CFTypeRef);
    fn CFRetain(cf: CFTypeRef) -> CFTypeRef;
    fn CFGetTypeID(cf: CFTypeRef) -> usize;
    fn CFBooleanGetTypeID() -> usize;
    fn CFBooleanGetValue(boolean: CFTypeRef) -> bool;
    fn CFArrayGetCount(array: CFArrayRef) -> isize;
    fn CFArrayGetValueAtIndex(array: CFArrayRef, index: isize) -> CFTypeRef;
    static kCFBooleanTrue: CFTypeRef;
    static kCFBooleanFalse: CFTypeRef;
}

const kAXValueTypeCGPoint: i32 = 1;
const kAXValueTypeCGSize: i32 = 2;

const kAXErrorSuccess: i32 = 0;
const kAXErrorInvalidUIElement: i32 = -25202;
const kAXErrorAPIDisabled: i32 = -25211;
const kAXErrorNoValue: i32 = -25212;

pub fn is_trusted() -> bool {
    let trusted = accessibility::application_is_trusted();
    debug!(granted = trusted, "Checked accessibility permission");
    trusted
}

/// Release-on-drop CoreFoundation value returned by a Copy/Create call.
struct Owned(CFTypeRef);

impl Drop for Owned {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { CFRelease(self.0) };
        }
    }
}

/// An owned AXUIElement reference.
pub struct AxElement(AXUIElementRef);

impl Drop for AxElement {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { CFRelease(self.0) };
        }
    }
}

impl AxElement {
    pub fn application(pid: u32) -> Option<Self> {
        let element = unsafe { AXUIElementCreateApplication(pid as i32) };
        (!element.is_null()).then_some(Self(element))
    }

    pub fn system_wide() -> Option<Self> {
        let element = unsafe { AXUIElementCreateSystemWide() };
        (!element.is_null()).then_some(Self(element))
    }

    fn copy_attribute(&self, attribute: &str) -> Result<Owned> {
        let name = CFString::new(attribute);
        let mut value: CFTypeRef = std::ptr::null();
        let result = unsafe {
            AXUIElementCopyAttributeValue(self.0, name.as_concrete_TypeRef(), &mut value)
        };
        match result {
            kAXErrorSuccess => Ok(Owned(value)),
            kAXErrorAPIDisabled => bail!("Accessibility API is disabled"),
            kAXErrorNoValue => bail!("No value for attribute: {}", attribute),
            kAXErrorInvalidUIElement => bail!("Element no longer exists"),
            _ => bail!("Failed to get attribute {}: error {}", attribute, result),
        }
    }

    pub fn string_attribute(&self, attribute: &str) -> Option<String> {
        let value = self.copy_attribute(attribute).ok()?;
        if value.0.is_null() || unsafe { CFGetTypeID(value.0) } != CFString::type_id() as usize {
            return None;
        }
        // SAFETY: type checked above; `get_rule` retains, `value` releases its own reference.
        let string = unsafe { CFString::wrap_under_get_rule(value.0 as CFStringRef) };
        Some(string.to_string())
    }

    pub fn bool_attribute(&self, attribute: &str) -> Option<bool> {
        let value = self.copy_attribute(attribute).ok()?;
        if value.0.is_null() || unsafe { CFGetTypeID(value.0) != CFBooleanGetTypeID() } {
            return None;
        }
        Some(unsafe { CFBooleanGetValue(value.0) })
    }

    pub fn element_attribute(&self, attribute: &str) -> Option<AxElement> {
        let mut value = self.copy_attribute(attribute).ok()?;
        if value.0.is_null() {
            return None;
        }
        let element = AxElement(value.0);
        value.0 = std::ptr::null();
        Some(element)
    }

    /// The application's windows, in AX order (frontmost first).
    pub fn windows(&self) -> Vec<AxElement> {
        let Ok(array) = self.copy_attribute("AXWindows") else {
            return Vec::new();
        };
        let count = unsafe { CFArrayGetCount(array.0) };
        (0..count)
            .filter_map(|i| {
                // CFArrayGetValueAtIndex returns a borrowed reference
                let window = unsafe { CFArrayGetValueAtIndex(array.0, i) };
                (!window.is_null()).then(|| AxElement(unsafe { CFRetain(window) }))
            })
            .collect()
    }

    /// The CGWindowID behind an AX window element. Stable for the window's
    /// lifetime regardless of z-order, and shared with CoreGraphics/xcap.
    pub fn window_id(&self) -> Option<u32> {
        let mut id = 0u32;
        let result = unsafe { _AXUIElementGetWindow(self.0, &mut id) };
        (result == kAXErrorSuccess && id != 0).then_some(id)
    }

    pub fn bounds(&self) -> Result<Bounds> {
        let position = self.copy_attribute("AXPosition")?;
        let mut point = core_graphics::geometry::CGPoint::new(0.0, 0.0);
        let ok = unsafe {
            AXValueGetValue(
                position.0,
                kAXValueTypeCGPoint,
                &mut point as *mut _ as *mut c_void,
            )
        };
        if !ok {
            bail!("Failed to extract position value");
        }

        let size_value = self.copy_attribute("AXSize")?;
        let mut size = core_graphics::geometry::CGSize::new(0.0, 0.0);
        let ok = unsafe {
            AXValueGetValue(
                size_value.0,
                kAXValueTypeCGSize,
                &mut size as *mut _ as *mut c_void,
            )
        };
        if !ok {
            bail!("Failed to extract size value");
        }

        Ok(Bounds::new(
            point.x as i32,
            point.y as i32,
            size.width.max(0.0) as u32,
            size.height.max(0.0) as u32,
        ))
    }

    pub fn set_bool(&self, attribute: &str, value: bool) -> Result<()> {
        let name = CFString::new(attribute);
        let result = unsafe {
            let flag = if value { kCFBooleanTrue } else { kCFBooleanFalse };
            AXUIElementSetAttributeValue(self.0, name.as_concrete_TypeRef(), flag)
        };
        match result {
            kAXErrorSuccess => Ok(()),
            kAXErrorAPIDisabled => bail!("Accessibility API is disabled"),
            _ => bail!("Failed to set attribute {}: error {}", attribute, result),
        }
    }

    pub fn perform(&self, action: &str) -> Result<()> {
        let name = CFString::new(action);
        let result = unsafe { AXUIElementPerformAction(self.0, name.as_concrete_TypeRef()) };
        match result {
            kAXErrorSuccess => Ok(()),
            kAXErrorAPIDisabled => bail!("Accessibility API is disabled"),
            _ => bail!("Failed to perform action {}: error {}", action, result),
        }
    }
}
