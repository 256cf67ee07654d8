//! Copying the newest answer out of the chat window.
//!
//! The copy control has no stable identifier, so it is discovered by walking
//! keyboard focus backwards from the composer and invoking each control until
//! the clipboard changes. The clipboard is seeded with a fresh sentinel before
//! every probe so an answer identical to the previous clipboard still counts.

use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{ExtractionConfig, GeometryConfig};
use crate::desktop::{Desktop, Key, KeyChord, WindowHandle};
use crate::error::{DriverError, ErrorReason, ReasonExt, Result, ResultExt};
use crate::guard::WindowGuard;

/// Settle time after each focus move.
const FOCUS_STEP_MS: u64 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMethod {
    /// Copy control found `position` steps after the skipped leading controls
    FocusProbe { position: u32 },
    Shortcut,
    SelectAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub text: String,
    pub method: CopyMethod,
}

pub fn is_destructive(name: &str, keywords: &[String]) -> bool {
    let name = name.to_lowercase();
    keywords
        .iter()
        .any(|k| !k.is_empty() && name.contains(&k.to_lowercase()))
}

/// Cut a whole-transcript copy down to what follows the last occurrence of
/// the prompt.
pub fn trim_to_last_reply(transcript: &str, prompt: Option<&str>) -> String {
    let prompt = prompt.map(str::trim).filter(|p| !p.is_empty());
    match prompt.and_then(|p| transcript.rfind(p).map(|at| at + p.len())) {
        Some(end) => transcript[end..].trim().to_string(),
        None => transcript.trim().to_string(),
    }
}

pub struct ResponseExtractor<'a> {
    desktop: &'a dyn Desktop,
    guard: &'a WindowGuard<'a>,
    geometry: &'a GeometryConfig,
    config: &'a ExtractionConfig,
}

impl<'a> ResponseExtractor<'a> {
    pub fn new(
        desktop: &'a dyn Desktop,
        guard: &'a WindowGuard<'a>,
        geometry: &'a GeometryConfig,
        config: &'a ExtractionConfig,
    ) -> Self {
        Self {
            desktop,
            guard,
            geometry,
            config,
        }
    }

    fn settle(&self, ms: u64) {
        self.desktop.sleep(Duration::from_millis(ms));
    }

    /// Copy the newest answer. The user's clipboard is put back afterwards on
    /// every path.
    #[instrument(skip_all)]
    pub fn extract_last_response(
        &self,
        handle: &WindowHandle,
        last_prompt: Option<&str>,
    ) -> Result<Extracted> {
        let original = self.desktop.clipboard_text().warn_on_err().flatten();
        let result = self.extract(handle, last_prompt);
        if let Some(original) = original {
            self.desktop.set_clipboard_text(&original).warn_on_err();
        }
        match &result {
            Ok(extracted) => info!(
                method = ?extracted.method,
                chars = extracted.text.chars().count(),
                "Extracted response"
            ),
            Err(e) => warn!(error = %e, "Response extraction failed"),
        }
        result
    }

    fn extract(&self, handle: &WindowHandle, last_prompt: Option<&str>) -> Result<Extracted> {
        self.scroll_to_bottom(handle)?;

        if let Some((text, position)) = self.probe_focus_ring(handle)? {
            return Ok(Extracted {
                text,
                method: CopyMethod::FocusProbe { position },
            });
        }
        debug!("Focus probing found no copy control, trying shortcut");

        if let Some(text) = self.copy_with_shortcut(handle)? {
            return Ok(Extracted {
                text,
                method: CopyMethod::Shortcut,
            });
        }
        debug!("Copy shortcut changed nothing, trying select-all");

        if let Some(text) = self.select_all_copy(handle, last_prompt)? {
            return Ok(Extracted {
                text,
                method: CopyMethod::SelectAll,
            });
        }

        Err(DriverError::failure(
            ErrorReason::CopyFailed,
            "no copy method changed the clipboard",
        ))
    }

    fn scroll_to_bottom(&self, handle: &WindowHandle) -> Result<()> {
        self.guard.ensure_foreground(handle)?;
        let at = self.geometry.conversation.resolve(&handle.bounds);
        self.desktop
            .scroll(at, self.config.bottom_scroll_lines)
            .or_reason(ErrorReason::CopyFailed)?;
        self.settle(self.config.copy_settle_ms);
        Ok(())
    }

    /// Put a unique value on the clipboard and return it.
    fn seed_clipboard(&self) -> Result<String> {
        let sentinel = format!("chat-escalation-sentinel-{}", Uuid::new_v4());
        self.desktop
            .set_clipboard_text(&sentinel)
            .or_reason(ErrorReason::CopyFailed)?;
        Ok(sentinel)
    }

    fn clipboard_changed(&self, sentinel: &str) -> Option<String> {
        let text = self.desktop.clipboard_text().warn_on_err().flatten()?;
        (text != sentinel && !text.trim().is_empty()).then_some(text)
    }

    fn probe_focus_ring(&self, handle: &WindowHandle) -> Result<Option<(String, u32)>> {
        let input = self.geometry.input.resolve(&handle.bounds);
        self.guard.safe_click(handle, input, "composer")?;
        self.settle(self.config.copy_settle_ms);

        for _ in 0..self.config.skip_leading {
            self.guard.safe_press(handle, KeyChord::SHIFT_TAB)?;
            self.settle(FOCUS_STEP_MS);
        }

        for position in 1..=self.config.max_probes {
            self.guard.safe_press(handle, KeyChord::SHIFT_TAB)?;
            self.settle(FOCUS_STEP_MS);

            // Never invoke a control that can't be checked against the keywords
            let Some(element) = self.desktop.focused_element() else {
                debug!(position, "Focused element unknown, stopping focus probe");
                break;
            };
            if is_destructive(&element.name, &self.config.destructive_keywords) {
                debug!(position, name = %element.name, "Skipping destructive control");
                continue;
            }
            // Enter in a text field would submit it
            if element.editable {
                debug!(position, role = %element.role, "Skipping editable element");
                continue;
            }

            for key in [Key::Enter, Key::Space] {
                let sentinel = self.seed_clipboard()?;
                self.guard.safe_press(handle, KeyChord::plain(key))?;
                self.settle(self.config.copy_settle_ms);
                if let Some(text) = self.clipboard_changed(&sentinel) {
                    info!(position, name = %element.name, "Found copy control");
                    return Ok(Some((text, position)));
                }
            }
        }
        Ok(None)
    }

    fn copy_with_shortcut(&self, handle: &WindowHandle) -> Result<Option<String>> {
        let shortcut: KeyChord = self
            .config
            .copy_shortcut
            .parse()
            .map_err(|e: String| DriverError::Config(e))?;
        let sentinel = self.seed_clipboard()?;
        self.guard.safe_press(handle, shortcut)?;
        self.settle(self.config.copy_settle_ms);
        Ok(self.clipboard_changed(&sentinel))
    }

    fn select_all_copy(&self, handle: &WindowHandle, last_prompt: Option<&str>) -> Result<Option<String>> {
        let transcript = self.geometry.conversation.resolve(&handle.bounds);
        self.guard.safe_click(handle, transcript, "transcript")?;
        self.settle(self.config.copy_settle_ms);

        let sentinel = self.seed_clipboard()?;
        self.guard.safe_press(handle, KeyChord::SELECT_ALL)?;
        self.guard.safe_press(handle, KeyChord::COPY)?;
        self.settle(self.config.copy_settle_ms);

        Ok(self
            .clipboard_changed(&sentinel)
            .map(|all| trim_to_last_reply(&all, last_prompt))
            .filter(|text| !text.is_empty()))
    }
}
