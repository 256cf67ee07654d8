//! FlowOrchestrator: the ten-step escalation state machine.
//!
//! ```text
//! Terminated -> Launched -> Focused -> PanelOpen -> GroupSelected
//!   -> ConversationSelected -> InputFocused -> PromptVerified
//!   -> ResponseIdle -> ResponseExtracted -> Done
//! ```
//!
//! Steps run strictly in order on the calling thread. UI steps that can be
//! repeated safely run inside [`WindowGuard::retry_with_recovery`]; prompt
//! submission does not, since repeating it after Enter could send the prompt
//! twice. Any failure is tagged with the step it blocked and the whole flow
//! restarts from a fresh launch, up to `flow.maxAttempts`.
//!
//! The orchestrator never takes the single-flight gate itself. Callers hold a
//! [`GatePass`](crate::gate::GatePass) for as long as they drive the window.

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::time::Duration;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::desktop::{Desktop, Key, KeyChord, WindowHandle};
use crate::error::{DriverError, ErrorReason, ReasonExt, Result, ResultExt};
use crate::extractor::{Extracted, ResponseExtractor};
use crate::guard::WindowGuard;
use crate::locator::{Located, NavigationTarget, TextLocator};
use crate::logging;
use crate::validation::{ResponseValidator, Validation};
use crate::visual::{IdleWait, VisualStateDetector};

/// Poll interval while waiting for the app to exit or its window to appear.
const PROCESS_POLL_MS: u64 = 250;
/// Settle after paste and copy keystrokes in the composer.
const KEYSTROKE_SETTLE_MS: u64 = 150;
/// Settle after Enter before checking that the prompt left the composer.
const SUBMIT_SETTLE_MS: u64 = 500;

/// States of one flow attempt. A failure is reported as the state the flow
/// could not reach; its `number()` is the wire `failedStep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    Terminated,
    Launched,
    Focused,
    PanelOpen,
    GroupSelected,
    ConversationSelected,
    InputFocused,
    PromptVerified,
    ResponseIdle,
    ResponseExtracted,
    Done,
}

impl FlowState {
    pub const STEPS: [FlowState; 10] = [
        FlowState::Terminated,
        FlowState::Launched,
        FlowState::Focused,
        FlowState::PanelOpen,
        FlowState::GroupSelected,
        FlowState::ConversationSelected,
        FlowState::InputFocused,
        FlowState::PromptVerified,
        FlowState::ResponseIdle,
        FlowState::ResponseExtracted,
    ];

    pub fn number(&self) -> u8 {
        match self {
            Self::Terminated => 1,
            Self::Launched => 2,
            Self::Focused => 3,
            Self::PanelOpen => 4,
            Self::GroupSelected => 5,
            Self::ConversationSelected => 6,
            Self::InputFocused => 7,
            Self::PromptVerified => 8,
            Self::ResponseIdle => 9,
            Self::ResponseExtracted => 10,
            Self::Done => 11,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Terminated => "terminated",
            Self::Launched => "launched",
            Self::Focused => "focused",
            Self::PanelOpen => "panel_open",
            Self::GroupSelected => "group_selected",
            Self::ConversationSelected => "conversation_selected",
            Self::InputFocused => "input_focused",
            Self::PromptVerified => "prompt_verified",
            Self::ResponseIdle => "response_idle",
            Self::ResponseExtracted => "response_extracted",
            Self::Done => "done",
        }
    }
}

/// One escalation as the orchestrator sees it.
#[derive(Debug, Clone)]
pub struct EscalationRequest {
    pub target: NavigationTarget,
    pub prompt: String,
    pub timeout: Duration,
    pub run_id: String,
}

/// A completed escalation.
#[derive(Debug, Clone)]
pub struct Escalation {
    pub response: String,
    /// Whole-flow attempts used, including the successful one
    pub attempts: u32,
    /// The template-echo clarification was sent
    pub clarified: bool,
    pub extracted: Extracted,
    /// Window the flow finished on, for session reuse
    pub handle: WindowHandle,
}

/// Bookkeeping for one bounded retry loop. Dropped on success or exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryContext {
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_error: Option<ErrorReason>,
}

impl RetryContext {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 1,
            max_attempts: max_attempts.max(1),
            last_error: None,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Whether a failure with `reason` should start another attempt.
    pub fn should_retry(&self, reason: Option<ErrorReason>) -> bool {
        !self.exhausted() && !reason.is_some_and(|r| r.is_terminal())
    }
}

/// An extracted answer and what the validator made of it.
#[derive(Debug, Clone)]
pub struct ReadResponse {
    pub extracted: Extracted,
    pub validation: Validation,
}

impl ReadResponse {
    /// The answer text, or the failure its validation maps to.
    pub fn accept(self) -> Result<String> {
        let reason = match &self.validation {
            Validation::Valid => return Ok(self.extracted.text),
            Validation::Empty => ErrorReason::EmptyResponse,
            Validation::InvalidFormat(_) => ErrorReason::InvalidResponseFormat,
            Validation::TemplateEcho(_) => ErrorReason::TemplateResponsePersisted,
        };
        let detail = match self.validation {
            Validation::InvalidFormat(d) | Validation::TemplateEcho(d) => d,
            _ => "no text".to_string(),
        };
        Err(DriverError::failure(reason, detail).at_step(FlowState::ResponseExtracted, reason))
    }
}

pub struct FlowOrchestrator<'a> {
    desktop: &'a dyn Desktop,
    config: &'a Config,
    guard: WindowGuard<'a>,
    visual: VisualStateDetector<'a>,
    validator: &'a dyn ResponseValidator,
    attempt: Cell<u32>,
}

impl<'a> FlowOrchestrator<'a> {
    pub fn new(
        desktop: &'a dyn Desktop,
        config: &'a Config,
        validator: &'a dyn ResponseValidator,
    ) -> Self {
        let visual = VisualStateDetector::new(
            desktop,
            &config.geometry,
            &config.detection,
            &config.navigation,
        )
        .with_debug_dir(config.flow.debug_capture_path());
        Self {
            desktop,
            config,
            guard: WindowGuard::new(desktop, config.target.identity(), &config.guard),
            visual,
            validator,
            attempt: Cell::new(1),
        }
    }

    pub fn guard(&self) -> &WindowGuard<'a> {
        &self.guard
    }

    fn locator(&self) -> TextLocator<'_> {
        TextLocator::new(self.desktop, &self.guard, &self.visual, &self.config.navigation)
    }

    fn extractor(&self) -> ResponseExtractor<'_> {
        ResponseExtractor::new(
            self.desktop,
            &self.guard,
            &self.config.geometry,
            &self.config.extraction,
        )
    }

    fn settle(&self, ms: u64) {
        self.desktop.sleep(Duration::from_millis(ms));
    }

    /// Run one step body with logging and step attribution.
    fn step<T>(
        &self,
        state: FlowState,
        fallback: ErrorReason,
        body: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let started = self.desktop.now();
        logging::log_step_started(state.number(), state.label(), self.attempt.get());
        let result = body().map_err(|e| e.at_step(state, fallback));
        let elapsed = self.desktop.now().saturating_duration_since(started);
        logging::log_step_finished(
            state.number(),
            state.label(),
            result.is_ok(),
            elapsed.as_millis() as u64,
        );
        if let Err(e) = &result {
            warn!(step = state.number(), label = state.label(), error = %e, "Step failed");
        }
        result
    }

    // ============================================
    // Steps 1-3: fresh window
    // ============================================

    /// Step 1: kill every instance of the target and wait for them to exit.
    pub fn terminate(&self) -> Result<()> {
        self.step(FlowState::Terminated, ErrorReason::LaunchFailed, || {
            let app = self.guard.app();
            let killed = self
                .desktop
                .terminate_app(app)
                .or_reason(ErrorReason::LaunchFailed)?;
            let deadline =
                self.desktop.now() + Duration::from_millis(self.config.target.terminate_timeout_ms);
            while self.desktop.is_app_running(app) {
                if self.desktop.now() >= deadline {
                    return Err(DriverError::failure(
                        ErrorReason::LaunchFailed,
                        format!("{} still running after terminate", app.name),
                    ));
                }
                self.settle(PROCESS_POLL_MS);
            }
            debug!(killed, "Target app terminated");
            Ok(())
        })
    }

    /// Step 2: start the app and wait for a usable window.
    pub fn launch(&self) -> Result<WindowHandle> {
        self.step(FlowState::Launched, ErrorReason::LaunchFailed, || {
            let app = self.guard.app();
            self.desktop
                .launch_app(app)
                .or_reason(ErrorReason::LaunchFailed)?;
            let deadline =
                self.desktop.now() + Duration::from_millis(self.config.target.launch_timeout_ms);
            loop {
                match self.desktop.find_window(app) {
                    Ok(Some(handle)) if self.guard.is_ready(&handle).is_ready() => {
                        self.settle(self.config.target.post_launch_settle_ms);
                        info!(window_id = handle.id, pid = handle.pid, "Target app launched");
                        return Ok(handle);
                    }
                    Ok(_) => {}
                    Err(e) => debug!(error = ?e, "Window not discoverable yet"),
                }
                if self.desktop.now() >= deadline {
                    return Err(DriverError::failure(
                        ErrorReason::LaunchFailed,
                        format!(
                            "no usable {} window within {}ms",
                            app.name, self.config.target.launch_timeout_ms
                        ),
                    ));
                }
                self.settle(PROCESS_POLL_MS);
            }
        })
    }

    /// Step 3: make the fresh window the foreground window.
    pub fn focus(&self, handle: &mut WindowHandle) -> Result<()> {
        self.step(FlowState::Focused, ErrorReason::FocusFailed, || {
            self.guard
                .retry_with_recovery(handle, "focus window", |_| Ok(()))
        })
    }

    /// Steps 1-3.
    pub fn open_target(&self) -> Result<WindowHandle> {
        self.terminate()?;
        let mut handle = self.launch()?;
        self.focus(&mut handle)?;
        Ok(handle)
    }

    // ============================================
    // Steps 4-6: navigation
    // ============================================

    /// Step 4: open the navigation panel unless it already is.
    pub fn open_panel(&self, handle: &mut WindowHandle) -> Result<()> {
        self.step(FlowState::PanelOpen, ErrorReason::ContainerNotFound, || {
            self.guard
                .retry_with_recovery(handle, "open panel", |h| self.ensure_panel_open(h))
        })
    }

    fn ensure_panel_open(&self, handle: &WindowHandle) -> Result<()> {
        if self.visual.is_panel_open(handle)? {
            debug!("Panel already open");
            return Ok(());
        }
        let toggle = self.config.geometry.panel_toggle.resolve(&handle.bounds);
        self.guard.safe_click(handle, toggle, "panel toggle")?;
        let timeout = Duration::from_millis(self.config.detection.panel_open_timeout_ms);
        if self.visual.wait_for_panel(handle, true, timeout)? {
            Ok(())
        } else {
            Err(DriverError::failure(
                ErrorReason::ContainerNotFound,
                "navigation panel did not open",
            ))
        }
    }

    /// Step 5: select the folder/group in the sidebar.
    pub fn select_group(&self, handle: &mut WindowHandle, container: &str) -> Result<Located> {
        self.step(FlowState::GroupSelected, ErrorReason::ContainerNotFound, || {
            self.guard.retry_with_recovery(handle, "select group", |h| {
                self.locator().find_and_click(
                    h,
                    container,
                    &self.config.geometry.sidebar,
                    ErrorReason::ContainerNotFound,
                )
            })
        })
    }

    /// Step 6: select the conversation, inside the group when there is one.
    pub fn select_conversation(
        &self,
        handle: &mut WindowHandle,
        target: &NavigationTarget,
    ) -> Result<Located> {
        let region = if target.container_label.is_some() {
            &self.config.geometry.content
        } else {
            &self.config.geometry.sidebar
        };
        self.step(
            FlowState::ConversationSelected,
            ErrorReason::ConversationNotFound,
            || {
                self.guard.retry_with_recovery(handle, "select conversation", |h| {
                    self.locator().find_and_click(
                        h,
                        &target.label,
                        region,
                        ErrorReason::ConversationNotFound,
                    )
                })
            },
        )
    }

    /// Steps 4-6.
    pub fn navigate(&self, handle: &mut WindowHandle, target: &NavigationTarget) -> Result<()> {
        self.open_panel(handle)?;
        if let Some(container) = &target.container_label {
            self.select_group(handle, container)?;
        }
        self.select_conversation(handle, target)?;
        Ok(())
    }

    // ============================================
    // Steps 7-8: prompt
    // ============================================

    /// Step 7: click into the composer until it holds keyboard focus.
    pub fn focus_input(&self, handle: &mut WindowHandle) -> Result<()> {
        self.step(FlowState::InputFocused, ErrorReason::FocusFailed, || {
            self.guard
                .retry_with_recovery(handle, "focus input", |h| self.click_into_input(h))
        })
    }

    fn click_into_input(&self, handle: &WindowHandle) -> Result<()> {
        let at = self.config.geometry.input.resolve(&handle.bounds);
        for attempt in 1..=self.config.prompt.focus_attempts {
            self.guard.safe_click(handle, at, "message input")?;
            self.settle(self.config.navigation.click_settle_ms);
            match self.desktop.focused_element() {
                Some(element) if element.editable => return Ok(()),
                // Backend cannot report focus; trust the click
                None => return Ok(()),
                Some(element) => debug!(
                    attempt,
                    role = %element.role,
                    name = %element.name,
                    "Input click focused a non-editable element"
                ),
            }
        }
        Err(DriverError::failure(
            ErrorReason::FocusFailed,
            format!(
                "composer not focused after {} clicks",
                self.config.prompt.focus_attempts
            ),
        ))
    }

    /// Step 8: paste, copy back, compare byte for byte, then send.
    ///
    /// A mismatch clears the composer and pastes again; nothing is sent until
    /// the copy-back equals `prompt`. Submission is confirmed by the
    /// generating indicator or an emptied composer.
    pub fn submit_prompt(&self, handle: &mut WindowHandle, prompt: &str) -> Result<()> {
        self.step(FlowState::PromptVerified, ErrorReason::InputVerifyFailed, || {
            // Never paste over a reply that is still streaming
            let timeout = Duration::from_millis(self.config.flow.response_timeout_ms);
            self.visual
                .wait_for_idle(&self.guard, handle, timeout, Duration::ZERO)?;
            self.guard
                .retry_with_recovery(handle, "prepare input", |_| Ok(()))?;
            let handle: &WindowHandle = handle;

            let original = self.desktop.clipboard_text().warn_on_err().flatten();
            let result = self
                .paste_verified(handle, prompt)
                .and_then(|()| self.send_and_confirm(handle));
            if let Some(original) = original {
                self.desktop.set_clipboard_text(&original).warn_on_err();
            }
            result
        })
    }

    fn paste_verified(&self, handle: &WindowHandle, prompt: &str) -> Result<()> {
        let attempts = self.config.prompt.verify_attempts;
        for attempt in 1..=attempts {
            self.clear_input(handle)?;
            self.desktop
                .set_clipboard_text(prompt)
                .or_reason(ErrorReason::InputVerifyFailed)?;
            self.guard.safe_press(handle, KeyChord::PASTE)?;
            self.settle(KEYSTROKE_SETTLE_MS);

            let echoed = self.copy_input_back(handle)?;
            if echoed.as_deref() == Some(prompt) {
                debug!(attempt, chars = prompt.chars().count(), "Prompt verified");
                return Ok(());
            }
            warn!(
                attempt,
                expected_len = prompt.len(),
                echoed_len = echoed.as_ref().map_or(0, String::len),
                "Composer text differs from prompt, clearing"
            );
        }
        self.clear_input(handle).warn_on_err();
        Err(DriverError::failure(
            ErrorReason::InputVerifyFailed,
            format!("composer text never matched the prompt in {attempts} attempts"),
        ))
    }

    /// Composer contents via select-all + copy. `None` when the composer is empty.
    fn copy_input_back(&self, handle: &WindowHandle) -> Result<Option<String>> {
        let sentinel = format!("chat-escalation-sentinel-{}", Uuid::new_v4());
        self.desktop
            .set_clipboard_text(&sentinel)
            .or_reason(ErrorReason::InputVerifyFailed)?;
        self.guard.safe_press(handle, KeyChord::SELECT_ALL)?;
        self.guard.safe_press(handle, KeyChord::COPY)?;
        self.settle(KEYSTROKE_SETTLE_MS);
        let text = self
            .desktop
            .clipboard_text()
            .or_reason(ErrorReason::InputVerifyFailed)?;
        Ok(text.filter(|t| *t != sentinel))
    }

    fn clear_input(&self, handle: &WindowHandle) -> Result<()> {
        self.guard.safe_press(handle, KeyChord::SELECT_ALL)?;
        self.guard.safe_press(handle, KeyChord::plain(Key::Delete))
    }

    fn send_and_confirm(&self, handle: &WindowHandle) -> Result<()> {
        // Collapse the select-all left by the copy-back before Enter
        self.guard.safe_press(handle, KeyChord::plain(Key::Right))?;
        self.guard.safe_press(handle, KeyChord::plain(Key::Enter))?;
        self.settle(SUBMIT_SETTLE_MS);

        if self.visual.is_generating(handle)? {
            info!("Prompt submitted, reply streaming");
            return Ok(());
        }
        match self.copy_input_back(handle)? {
            None => {
                info!("Prompt submitted, composer empty");
                Ok(())
            }
            Some(left) => Err(DriverError::failure(
                ErrorReason::InputVerifyFailed,
                format!("{} characters still in the composer after Enter", left.len()),
            )),
        }
    }

    /// Steps 7-8.
    pub fn send(&self, handle: &mut WindowHandle, prompt: &str) -> Result<()> {
        self.focus_input(handle)?;
        self.submit_prompt(handle, prompt)
    }

    // ============================================
    // Steps 9-10: response
    // ============================================

    /// Step 9: wait for the reply to stop streaming.
    pub fn wait_for_response(&self, handle: &mut WindowHandle, timeout: Duration) -> Result<IdleWait> {
        let start_delay = Duration::from_millis(self.config.detection.generation_start_delay_ms);
        self.step(
            FlowState::ResponseIdle,
            ErrorReason::TimeoutWaitingResponse,
            || {
                self.visual
                    .wait_for_idle(&self.guard, handle, timeout, start_delay)
            },
        )
    }

    /// Step 10: copy the newest reply and validate it.
    pub fn read_response(
        &self,
        handle: &mut WindowHandle,
        last_prompt: Option<&str>,
    ) -> Result<ReadResponse> {
        self.step(FlowState::ResponseExtracted, ErrorReason::CopyFailed, || {
            let extracted = self.guard.retry_with_recovery(handle, "extract response", |h| {
                self.extractor().extract_last_response(h, last_prompt)
            })?;
            let validation = self.validator.validate(&extracted.text);
            debug!(validation = ?validation, "Validated response");
            Ok(ReadResponse {
                extracted,
                validation,
            })
        })
    }

    // ============================================
    // Whole flow
    // ============================================

    /// Steps 1-10 once, with at most one clarification round.
    pub fn run_attempt(&self, request: &EscalationRequest) -> Result<Escalation> {
        let mut handle = self.open_target()?;
        self.navigate(&mut handle, &request.target)?;
        self.send(&mut handle, &request.prompt)?;
        self.wait_for_response(&mut handle, request.timeout)?;

        let mut read = self.read_response(&mut handle, Some(&request.prompt))?;
        let mut clarified = false;
        if let Validation::TemplateEcho(marker) = &read.validation {
            info!(marker = %marker, "Reply echoed the template, asking again");
            let clarification = &self.config.prompt.clarification_message;
            self.send(&mut handle, clarification)?;
            self.wait_for_response(&mut handle, request.timeout)?;
            read = self.read_response(&mut handle, Some(clarification))?;
            clarified = true;
        }

        let extracted = read.extracted.clone();
        let response = read.accept()?;
        Ok(Escalation {
            response,
            attempts: self.attempt.get(),
            clarified,
            extracted,
            handle,
        })
    }

    /// The full flow with whole-flow retry. Every retry relaunches the app,
    /// so nothing typed by a failed attempt survives into the next one.
    pub fn escalate(&self, request: &EscalationRequest) -> Result<Escalation> {
        let span = info_span!("flow", run_id = %request.run_id, attempt = tracing::field::Empty);
        let _entered = span.enter();

        let mut retry = RetryContext::new(self.config.flow.max_attempts);
        loop {
            span.record("attempt", retry.attempt);
            self.attempt.set(retry.attempt);
            info!(
                attempt = retry.attempt,
                max_attempts = retry.max_attempts,
                label = %request.target.label,
                container = ?request.target.container_label,
                "Starting escalation attempt"
            );

            let error = match self.run_attempt(request) {
                Ok(escalation) => {
                    info!(
                        attempts = escalation.attempts,
                        clarified = escalation.clarified,
                        chars = escalation.response.chars().count(),
                        "Escalation finished"
                    );
                    return Ok(escalation);
                }
                Err(e) => e,
            };

            retry.last_error = error.reason();
            if !retry.should_retry(retry.last_error) {
                warn!(
                    attempts = retry.attempt,
                    reason = ?retry.last_error,
                    "Escalation failed, giving up"
                );
                return Err(error);
            }
            warn!(
                attempt = retry.attempt,
                reason = ?retry.last_error,
                error = %error,
                "Escalation attempt failed, relaunching"
            );
            self.settle(self.config.flow.retry_pause_ms);
            retry.attempt += 1;
        }
    }
}

#[cfg(test)]
#[path = "flow_tests.rs"]
mod tests;
