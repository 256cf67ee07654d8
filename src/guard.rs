//! Window guard: readiness checks, foreground restoration, handle refresh and
//! the bounded step retry every UI-touching step runs inside.
//!
//! The guard never stores a window handle. Callers own their `WindowHandle`
//! for one flow attempt; [`WindowGuard::refresh_handle`] returns a fresh one
//! and [`WindowGuard::retry_with_recovery`] replaces the caller's copy
//! explicitly when recovery re-discovers the window.

use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::GuardConfig;
use crate::desktop::{AppIdentity, Desktop, KeyChord, WindowHandle};
use crate::error::{DriverError, ErrorReason, ReasonExt, Result};
use crate::geometry::Point;
use crate::logging;

/// Why a window is or is not ready for input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// The handle no longer refers to a live window
    Invalid,
    Minimized,
    /// Hidden, off-screen or zero-sized
    NotVisible,
}

impl Readiness {
    pub fn is_ready(self) -> bool {
        self == Readiness::Ready
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Readiness::Ready => "ready",
            Readiness::Invalid => "invalid",
            Readiness::Minimized => "minimized",
            Readiness::NotVisible => "not_visible",
        }
    }

    fn reason(self) -> ErrorReason {
        match self {
            Readiness::Minimized => ErrorReason::WindowMinimized,
            Readiness::Invalid | Readiness::NotVisible => ErrorReason::WindowInvalid,
            Readiness::Ready => ErrorReason::FocusFailed,
        }
    }
}

pub struct WindowGuard<'a> {
    desktop: &'a dyn Desktop,
    app: AppIdentity,
    config: &'a GuardConfig,
}

impl<'a> WindowGuard<'a> {
    pub fn new(desktop: &'a dyn Desktop, app: AppIdentity, config: &'a GuardConfig) -> Self {
        Self {
            desktop,
            app,
            config,
        }
    }

    pub fn app(&self) -> &AppIdentity {
        &self.app
    }

    /// Classify the window without touching it.
    pub fn is_ready(&self, handle: &WindowHandle) -> Readiness {
        if !handle.valid {
            return Readiness::Invalid;
        }
        let state = self.desktop.window_state(handle);
        let readiness = if !state.exists {
            Readiness::Invalid
        } else if state.minimized {
            Readiness::Minimized
        } else if !state.visible || state.bounds.map_or(true, |b| b.is_empty()) {
            Readiness::NotVisible
        } else {
            Readiness::Ready
        };
        if !readiness.is_ready() {
            debug!(window_id = handle.id, readiness = readiness.as_str(), "Window not ready");
        }
        readiness
    }

    /// Re-discover the target window. `None` when the app has no usable window.
    #[instrument(skip(self), fields(app = %self.app.name))]
    pub fn refresh_handle(&self) -> Option<WindowHandle> {
        match self.desktop.find_window(&self.app) {
            Ok(Some(handle)) => {
                info!(window_id = handle.id, "Refreshed window handle");
                Some(handle)
            }
            Ok(None) => {
                warn!("Window handle refresh found no window");
                None
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Window handle refresh failed");
                None
            }
        }
    }

    /// Copy the window's live bounds into `handle`. Every anchor and region
    /// resolves against these, so a moved or resized window must be re-read.
    pub fn sync_bounds(&self, handle: &mut WindowHandle) {
        let Some(live) = self.desktop.window_state(handle).bounds else {
            return;
        };
        if live != handle.bounds && !live.is_empty() {
            info!(
                window_id = handle.id,
                from = ?handle.bounds,
                to = ?live,
                "Window moved or resized"
            );
            handle.bounds = live;
        }
    }

    /// Bring a not-ready window back: refresh a dead handle, un-minimize a
    /// minimized one. Returns the handle to continue with, carrying the
    /// window's current bounds.
    pub(crate) fn recover(&self, handle: &WindowHandle) -> Result<WindowHandle> {
        let readiness = self.is_ready(handle);
        let mut current = handle.clone();
        match readiness {
            Readiness::Ready => {
                self.sync_bounds(&mut current);
                return Ok(current);
            }
            Readiness::Invalid => {
                current = self.refresh_handle().ok_or_else(|| {
                    DriverError::failure(ErrorReason::WindowInvalid, "target window disappeared")
                })?;
            }
            Readiness::Minimized | Readiness::NotVisible => {}
        }

        if !self.is_ready(&current).is_ready() {
            self.desktop
                .restore(&current)
                .or_reason(readiness.reason())?;
            self.desktop
                .sleep(Duration::from_millis(self.config.restore_settle_ms));
            // Restoring can re-create the window on some backends
            if self.is_ready(&current) == Readiness::Invalid {
                current = self.refresh_handle().ok_or_else(|| {
                    DriverError::failure(ErrorReason::WindowInvalid, "window lost after restore")
                })?;
            }
        }

        match self.is_ready(&current) {
            Readiness::Ready => {
                self.sync_bounds(&mut current);
                Ok(current)
            }
            still => Err(DriverError::failure(
                still.reason(),
                format!("window still {} after recovery", still.as_str()),
            )),
        }
    }

    /// Make the target the OS foreground window.
    ///
    /// Alternates the primary (activate) and fallback (raise) requests with a
    /// growing wait. Fails with `focus_failed` once attempts are exhausted,
    /// or with the readiness reason when the window cannot be made usable.
    pub fn ensure_foreground(&self, handle: &WindowHandle) -> Result<()> {
        let readiness = self.is_ready(handle);
        if !readiness.is_ready() {
            return Err(DriverError::failure(
                readiness.reason(),
                format!("window is {}", readiness.as_str()),
            ));
        }
        if self.desktop.is_foreground(handle) {
            return Ok(());
        }

        for attempt in 0..self.config.foreground_attempts {
            let request = if attempt % 2 == 0 {
                self.desktop.activate(handle)
            } else {
                self.desktop.raise(handle)
            };
            if let Err(e) = request {
                debug!(attempt, error = %format!("{e:#}"), "Foreground request failed");
            }

            let wait = self.config.foreground_base_delay_ms
                + self.config.foreground_delay_step_ms * attempt as u64;
            self.desktop.sleep(Duration::from_millis(wait));

            if self.desktop.is_foreground(handle) {
                if attempt > 0 {
                    info!(attempt = attempt + 1, "Foreground restored");
                }
                return Ok(());
            }
        }

        warn!(
            window_id = handle.id,
            attempts = self.config.foreground_attempts,
            "Could not bring target window to foreground"
        );
        Err(DriverError::failure(
            ErrorReason::FocusFailed,
            format!(
                "window did not reach foreground after {} attempts",
                self.config.foreground_attempts
            ),
        ))
    }

    /// Run `op` with readiness recovery and foreground before each attempt,
    /// doubling the backoff between attempts. Terminal failures are returned
    /// without retrying; otherwise the last error surfaces after exhaustion.
    pub fn retry_with_recovery<T>(
        &self,
        handle: &mut WindowHandle,
        what: &str,
        mut op: impl FnMut(&WindowHandle) -> Result<T>,
    ) -> Result<T> {
        let mut backoff = Duration::from_millis(self.config.retry_backoff_ms);
        let mut attempt = 1;
        loop {
            let outcome = self
                .recover(handle)
                .and_then(|fresh| {
                    *handle = fresh;
                    self.ensure_foreground(handle)
                })
                .and_then(|()| {
                    // Activation can move a window between spaces or displays
                    self.sync_bounds(handle);
                    op(handle)
                });

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.reason().is_some_and(|r| r.is_terminal()) => return Err(e),
                Err(e) if attempt >= self.config.retry_attempts => {
                    warn!(operation = what, attempt, error = %e, "Retries exhausted");
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        operation = what,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        window_condition = e.reason().is_some_and(|r| r.is_transient()),
                        error = %e,
                        "Guarded operation failed, retrying"
                    );
                    self.desktop.sleep(backoff);
                    backoff *= 2;
                    attempt += 1;
                }
            }
        }
    }

    /// The only way higher layers click: foreground first, then the click.
    pub fn safe_click(&self, handle: &WindowHandle, at: Point, description: &str) -> Result<()> {
        self.ensure_foreground(handle)?;
        self.desktop
            .click(at)
            .or_reason(ErrorReason::FocusFailed)?;
        logging::log_click(at.x, at.y, description);
        Ok(())
    }

    /// Keystroke counterpart of [`safe_click`](Self::safe_click).
    pub fn safe_press(&self, handle: &WindowHandle, chord: KeyChord) -> Result<()> {
        self.ensure_foreground(handle)?;
        self.desktop
            .press(chord)
            .or_reason(ErrorReason::FocusFailed)
    }
}
