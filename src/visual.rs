//! Pixel-threshold classifiers for the target app's UI state.
//!
//! Each classifier captures a small fixed region and counts dark pixels. No
//! OCR and no model: the verdict is a pure function of the count, so the
//! thresholds below are the whole story.
//!
//! - panel open: `dark(luma < panelDarkLuma) > panelOpenMinDark`
//! - generating: `generatingMinDark < dark(luma < generatingDarkLuma) < generatingMaxDark`
//! - highlighted row: rows whose background strip is darker than the list base

use image::{Rgba, RgbaImage};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{DetectionConfig, GeometryConfig, NavigationConfig};
use crate::desktop::{Desktop, WindowHandle};
use crate::error::{DriverError, ErrorReason, ReasonExt, Result, ResultExt};
use crate::geometry::Bounds;
use crate::guard::{Readiness, WindowGuard};
use crate::logging;

/// Width of the background strip sampled for the row highlight.
const HIGHLIGHT_STRIP_WIDTH: u32 = 12;
/// Gap between the strip and the list's right edge (scrollbars live there).
const HIGHLIGHT_STRIP_MARGIN: u32 = 4;
/// Rows of list searched for a highlight around a click.
const HIGHLIGHT_SEARCH_ROWS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    PanelOpen,
    PanelClosed,
    Generating,
    Idle,
}

/// One classification. Produced per poll and dropped; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionSample {
    pub region: Bounds,
    pub dark_pixel_count: u32,
    pub verdict: Verdict,
}

/// Outcome of a successful idle wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleWait {
    /// A generating verdict was observed at least once
    pub saw_generation: bool,
    pub polls: u32,
    pub waited: Duration,
}

/// ITU-R BT.601 luma, integer arithmetic.
pub fn luma(pixel: &Rgba<u8>) -> u8 {
    let [r, g, b, _] = pixel.0;
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
}

pub fn count_dark(image: &RgbaImage, threshold: u8) -> u32 {
    image.pixels().filter(|p| luma(p) < threshold).count() as u32
}

pub fn classify_panel_open(dark_pixels: u32, config: &DetectionConfig) -> bool {
    dark_pixels > config.panel_open_min_dark
}

/// Too few dark pixels means no stop button; too many means a different UI state.
pub fn classify_generating(dark_pixels: u32, config: &DetectionConfig) -> bool {
    dark_pixels > config.generating_min_dark && dark_pixels < config.generating_max_dark
}

/// Longest run of image rows whose right-edge strip is darker than
/// `base - deviation`. Returns the run's center row.
pub fn highlight_center_row(image: &RgbaImage, base: f64, deviation: f64) -> Option<u32> {
    let width = image.width();
    if width == 0 || image.height() == 0 {
        return None;
    }
    let strip_end = width.saturating_sub(HIGHLIGHT_STRIP_MARGIN).max(1);
    let strip_start = strip_end.saturating_sub(HIGHLIGHT_STRIP_WIDTH);

    let mut best: Option<(u32, u32)> = None;
    let mut run_start: Option<u32> = None;
    for y in 0..=image.height() {
        let highlighted = y < image.height() && {
            let sum: u32 = (strip_start..strip_end)
                .map(|x| luma(image.get_pixel(x, y)) as u32)
                .sum();
            let mean = sum as f64 / (strip_end - strip_start) as f64;
            mean < base - deviation
        };
        match (highlighted, run_start) {
            (true, None) => run_start = Some(y),
            (false, Some(start)) => {
                if best.map_or(true, |(s, e)| y - start > e - s) {
                    best = Some((start, y));
                }
                run_start = None;
            }
            _ => {}
        }
    }
    best.map(|(start, end)| start + (end - start) / 2)
}

pub struct VisualStateDetector<'a> {
    desktop: &'a dyn Desktop,
    geometry: &'a GeometryConfig,
    config: &'a DetectionConfig,
    navigation: &'a NavigationConfig,
    debug_dir: Option<PathBuf>,
}

impl<'a> VisualStateDetector<'a> {
    pub fn new(
        desktop: &'a dyn Desktop,
        geometry: &'a GeometryConfig,
        config: &'a DetectionConfig,
        navigation: &'a NavigationConfig,
    ) -> Self {
        Self {
            desktop,
            geometry,
            config,
            navigation,
            debug_dir: None,
        }
    }

    /// Save every capture used for a decision as PNG under `dir`.
    pub fn with_debug_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.debug_dir = dir;
        self
    }

    fn capture(&self, handle: &WindowHandle, region: Bounds, tag: &str) -> Result<RgbaImage> {
        let image = self
            .desktop
            .capture(handle, region)
            .or_reason(ErrorReason::WindowInvalid)?;
        if let Some(dir) = &self.debug_dir {
            let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f");
            let path = dir.join(format!("{tag}-{stamp}.png"));
            std::fs::create_dir_all(dir)
                .map_err(anyhow::Error::from)
                .and_then(|()| image.save(&path).map_err(anyhow::Error::from))
                .warn_on_err();
        }
        Ok(image)
    }

    pub fn sample_panel(&self, handle: &WindowHandle) -> Result<DetectionSample> {
        let region = self.geometry.panel_close_probe.resolve(&handle.bounds);
        let image = self.capture(handle, region, "panel")?;
        let dark = count_dark(&image, self.config.panel_dark_luma);
        let open = classify_panel_open(dark, self.config);
        logging::log_detection("panel_open", dark, open);
        Ok(DetectionSample {
            region,
            dark_pixel_count: dark,
            verdict: if open {
                Verdict::PanelOpen
            } else {
                Verdict::PanelClosed
            },
        })
    }

    pub fn is_panel_open(&self, handle: &WindowHandle) -> Result<bool> {
        Ok(self.sample_panel(handle)?.verdict == Verdict::PanelOpen)
    }

    pub fn sample_generating(&self, handle: &WindowHandle) -> Result<DetectionSample> {
        let region = self.geometry.generating_probe.resolve(&handle.bounds);
        let image = self.capture(handle, region, "generating")?;
        let dark = count_dark(&image, self.config.generating_dark_luma);
        let generating = classify_generating(dark, self.config);
        logging::log_detection("generating", dark, generating);
        Ok(DetectionSample {
            region,
            dark_pixel_count: dark,
            verdict: if generating {
                Verdict::Generating
            } else {
                Verdict::Idle
            },
        })
    }

    pub fn is_generating(&self, handle: &WindowHandle) -> Result<bool> {
        Ok(self.sample_generating(handle)?.verdict == Verdict::Generating)
    }

    /// Screen y of the highlighted row near `around_y` inside `list`, if any.
    pub fn highlight_center(
        &self,
        handle: &WindowHandle,
        list: &Bounds,
        around_y: i32,
    ) -> Result<Option<i32>> {
        let height = self.navigation.row_height * HIGHLIGHT_SEARCH_ROWS;
        let Some(band) = list.band_around(around_y, height) else {
            return Ok(None);
        };
        let image = self.capture(handle, band, "highlight")?;
        let row = highlight_center_row(
            &image,
            self.navigation.highlight_base_luma,
            self.navigation.highlight_deviation,
        );
        let center = row.map(|r| band.y + r as i32);
        debug!(around_y, highlight_y = ?center, "Measured row highlight");
        Ok(center)
    }

    /// Poll until the panel reaches the wanted state. `Ok(false)` on timeout.
    pub fn wait_for_panel(
        &self,
        handle: &WindowHandle,
        open: bool,
        timeout: Duration,
    ) -> Result<bool> {
        let deadline = self.desktop.now() + timeout;
        loop {
            if self.is_panel_open(handle)? == open {
                return Ok(true);
            }
            if self.desktop.now() >= deadline {
                return Ok(false);
            }
            self.desktop
                .sleep(Duration::from_millis(self.config.poll_interval_ms));
        }
    }

    /// Block until the response has stopped streaming.
    ///
    /// Waits `start_delay` first so a just-submitted prompt has time to show
    /// the stop button. Idle must then hold on consecutive polls: fewer once
    /// generation was seen, more when it never was. Fails with
    /// `timeout_waiting_response` at the deadline and with `focus_failed`
    /// after too many consecutive polls without a usable window. A minimized
    /// or hidden window is restored between polls.
    pub fn wait_for_idle(
        &self,
        guard: &WindowGuard<'_>,
        handle: &mut WindowHandle,
        timeout: Duration,
        start_delay: Duration,
    ) -> Result<IdleWait> {
        let start = self.desktop.now();
        let deadline = start + timeout;
        let poll = Duration::from_millis(self.config.poll_interval_ms);

        if !start_delay.is_zero() {
            self.desktop.sleep(start_delay);
        }

        let mut saw_generation = false;
        let mut idle_streak = 0u32;
        let mut foreground_failures = 0u32;
        let mut polls = 0u32;

        loop {
            if self.desktop.now() >= deadline {
                warn!(polls, saw_generation, "Timed out waiting for response");
                return Err(DriverError::failure(
                    ErrorReason::TimeoutWaitingResponse,
                    format!("still generating after {}ms", timeout.as_millis()),
                ));
            }

            let sample = match guard.ensure_foreground(handle) {
                Ok(()) => {
                    guard.sync_bounds(handle);
                    self.sample_generating(handle)
                }
                Err(e) => Err(e),
            };

            match sample {
                Ok(sample) => {
                    foreground_failures = 0;
                    polls += 1;
                    if sample.verdict == Verdict::Generating {
                        saw_generation = true;
                        idle_streak = 0;
                    } else {
                        idle_streak += 1;
                        let required = if saw_generation {
                            self.config.idle_confirmations
                        } else {
                            self.config.idle_confirmations_without_generation
                        };
                        if idle_streak >= required {
                            let waited = self.desktop.now() - start;
                            info!(
                                polls,
                                saw_generation,
                                waited_ms = waited.as_millis() as u64,
                                "Response idle"
                            );
                            return Ok(IdleWait {
                                saw_generation,
                                polls,
                                waited,
                            });
                        }
                    }
                }
                Err(e) => {
                    foreground_failures += 1;
                    debug!(foreground_failures, error = %e, "Idle poll skipped");
                    if foreground_failures >= self.config.max_foreground_failures {
                        return Err(DriverError::failure(
                            ErrorReason::FocusFailed,
                            format!("window unusable for {foreground_failures} consecutive polls: {e}"),
                        ));
                    }
                    match guard.is_ready(handle) {
                        Readiness::Invalid => {
                            if let Some(fresh) = guard.refresh_handle() {
                                *handle = fresh;
                            }
                        }
                        // Restore in place and keep polling
                        Readiness::Minimized | Readiness::NotVisible => {
                            if let Some(fresh) = guard.recover(handle).warn_on_err() {
                                *handle = fresh;
                            }
                        }
                        Readiness::Ready => {}
                    }
                }
            }

            self.desktop.sleep(poll);
        }
    }
}
