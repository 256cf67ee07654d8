//! OCR-driven navigation: find a label in a list region, click it, correct
//! hover misalignment and verify the selection.
//!
//! Every call recognizes text from scratch. Coordinates from an earlier
//! attempt are never reused because scroll position and layout may have
//! changed in between.

use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::NavigationConfig;
use crate::desktop::{Desktop, Key, KeyChord, TextObservation, WindowHandle};
use crate::error::{DriverError, ErrorReason, ReasonExt, Result, ResultExt};
use crate::fuzzy::{self, LabelMatcher};
use crate::geometry::{Bounds, Point, RegionSpec};
use crate::guard::WindowGuard;
use crate::visual::VisualStateDetector;

/// The group and conversation a flow navigates to. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationTarget {
    /// Conversation title
    pub label: String,
    /// Folder/group holding the conversation
    pub container_label: Option<String>,
}

/// A recognized text box in screen coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub text: String,
    pub bounds: Bounds,
    pub score: f64,
}

/// How a label ended up selected.
#[derive(Debug, Clone, PartialEq)]
pub struct Located {
    pub text: String,
    pub score: f64,
    /// Final click point, after any hover correction
    pub click: Point,
    pub corrected: bool,
    pub scrolls: u32,
    pub via_search: bool,
}

pub struct TextLocator<'a> {
    desktop: &'a dyn Desktop,
    guard: &'a WindowGuard<'a>,
    visual: &'a VisualStateDetector<'a>,
    config: &'a NavigationConfig,
}

impl<'a> TextLocator<'a> {
    pub fn new(
        desktop: &'a dyn Desktop,
        guard: &'a WindowGuard<'a>,
        visual: &'a VisualStateDetector<'a>,
        config: &'a NavigationConfig,
    ) -> Self {
        Self {
            desktop,
            guard,
            visual,
            config,
        }
    }

    fn settle(&self, ms: u64) {
        self.desktop.sleep(Duration::from_millis(ms));
    }

    /// Recognize text in `region`, returning boxes in screen coordinates.
    pub fn recognize(&self, handle: &WindowHandle, region: &Bounds) -> Result<Vec<TextObservation>> {
        let image = self
            .desktop
            .capture(handle, *region)
            .or_reason(ErrorReason::WindowInvalid)?;
        let observations = self
            .desktop
            .recognize_text(&image)
            .or_reason(ErrorReason::WindowInvalid)?;
        Ok(observations
            .into_iter()
            .map(|o| TextObservation {
                bounds: region.to_screen(o.bounds),
                ..o
            })
            .collect())
    }

    /// Best candidate for `label` in one scan of `region`.
    pub fn scan(&self, handle: &WindowHandle, region: &Bounds, label: &str) -> Result<Option<Candidate>> {
        let observations = self.recognize(handle, region)?;
        let anchor_y = region.center().y;
        let best = fuzzy::best_match(
            label,
            observations
                .iter()
                .map(|o| (o.text.as_str(), o.bounds.center().y)),
            self.config.match_threshold,
            anchor_y,
        );
        debug!(
            label,
            candidates = observations.len(),
            best = ?best,
            "Scanned region for label"
        );
        Ok(best.map(|m| {
            let observation = &observations[m.index];
            Candidate {
                text: observation.text.clone(),
                bounds: observation.bounds,
                score: m.score,
            }
        }))
    }

    /// Find `label` inside the list `spec`, scrolling and then falling back to
    /// in-app search. A miss, a failed hover correction and a failed
    /// verification all report `miss`.
    #[instrument(skip(self, handle, spec), fields(label = %label))]
    pub fn find_and_click(
        &self,
        handle: &WindowHandle,
        label: &str,
        spec: &RegionSpec,
        miss: ErrorReason,
    ) -> Result<Located> {
        let region = spec.resolve(&handle.bounds);
        if region.is_empty() {
            return Err(DriverError::failure(miss, "list region is empty for this window size"));
        }

        for scrolls in 0..=self.config.max_scrolls {
            if let Some(candidate) = self.scan(handle, &region, label)? {
                let mut located = self.click_and_verify(handle, &region, label, candidate, miss)?;
                located.scrolls = scrolls;
                return Ok(located);
            }
            if scrolls < self.config.max_scrolls {
                self.guard.ensure_foreground(handle)?;
                self.desktop
                    .scroll(region.center(), self.config.scroll_lines)
                    .or_reason(miss)?;
                self.settle(self.config.click_settle_ms);
            }
        }

        info!(label, scrolls = self.config.max_scrolls, "Label not visible, trying search");
        self.search_fallback(handle, &region, label, miss)
    }

    fn click_and_verify(
        &self,
        handle: &WindowHandle,
        region: &Bounds,
        label: &str,
        candidate: Candidate,
        miss: ErrorReason,
    ) -> Result<Located> {
        let click = candidate.bounds.center();
        self.guard.safe_click(handle, click, label)?;
        self.settle(self.config.click_settle_ms);

        let (final_click, highlight_y, corrected) = self.correct_hover(handle, region, click, miss)?;
        self.verify(handle, region, label, highlight_y.unwrap_or(final_click.y), miss)?;

        info!(
            label,
            matched = %candidate.text,
            score = candidate.score,
            corrected,
            "Selected label"
        );
        Ok(Located {
            text: candidate.text,
            score: candidate.score,
            click: final_click,
            corrected,
            scrolls: 0,
            via_search: false,
        })
    }

    /// Compare the highlighted row with the click point. Past the threshold,
    /// click once more a row-step toward the highlight and re-measure.
    fn correct_hover(
        &self,
        handle: &WindowHandle,
        region: &Bounds,
        click: Point,
        miss: ErrorReason,
    ) -> Result<(Point, Option<i32>, bool)> {
        let threshold = self.config.hover_offset_threshold as i32;
        let Some(highlight_y) = self.visual.highlight_center(handle, region, click.y)? else {
            debug!("No row highlight visible, skipping hover correction");
            return Ok((click, None, false));
        };

        let offset = highlight_y - click.y;
        if offset.abs() <= threshold {
            return Ok((click, Some(highlight_y), false));
        }

        let step = self.config.corrective_step as i32 * offset.signum();
        let corrected = click.offset(0, step);
        warn!(offset, step, "Highlight misaligned with click, correcting");
        self.guard.safe_click(handle, corrected, "hover correction")?;
        self.settle(self.config.click_settle_ms);

        match self.visual.highlight_center(handle, region, corrected.y)? {
            Some(y) if (y - corrected.y).abs() <= threshold => Ok((corrected, Some(y), true)),
            remeasured => Err(DriverError::failure(
                miss,
                format!(
                    "highlight still misaligned after correction (click y {}, highlight {:?})",
                    corrected.y, remeasured
                ),
            )),
        }
    }

    /// Re-read a narrow band around the selected row. The window title counts
    /// as confirmation too.
    fn verify(
        &self,
        handle: &WindowHandle,
        region: &Bounds,
        label: &str,
        row_y: i32,
        miss: ErrorReason,
    ) -> Result<()> {
        let mut matcher = LabelMatcher::new(label);
        let seen: Vec<String> = match region.band_around(row_y, self.config.verify_band()) {
            Some(band) => self
                .recognize(handle, &band)?
                .into_iter()
                .map(|o| o.text)
                .collect(),
            None => Vec::new(),
        };
        if seen
            .iter()
            .any(|text| matcher.score(text) >= self.config.match_threshold)
        {
            return Ok(());
        }
        if self.title_matches(handle, label) {
            debug!(label, "Selection confirmed by window title");
            return Ok(());
        }
        Err(DriverError::failure(
            miss,
            format!("selected row reads {seen:?}, expected {label:?}"),
        ))
    }

    fn title_matches(&self, handle: &WindowHandle, label: &str) -> bool {
        self.desktop
            .window_title(handle)
            .is_some_and(|title| fuzzy::fuzzy_contains(&title, label, self.config.match_threshold))
    }

    /// Open the app's search-and-jump palette, paste the label and accept the
    /// top hit. Confirmed by the window title or a fresh scan of the list.
    fn search_fallback(
        &self,
        handle: &WindowHandle,
        region: &Bounds,
        label: &str,
        miss: ErrorReason,
    ) -> Result<Located> {
        let shortcut: KeyChord = self
            .config
            .search_shortcut
            .parse()
            .map_err(|e: String| DriverError::Config(e))?;

        let original_clipboard = self.desktop.clipboard_text().warn_on_err().flatten();

        self.guard.safe_press(handle, shortcut)?;
        self.settle(self.config.search_settle_ms);
        self.desktop.set_clipboard_text(label).or_reason(miss)?;
        self.guard.safe_press(handle, KeyChord::PASTE)?;
        self.settle(self.config.click_settle_ms);
        self.guard.safe_press(handle, KeyChord::plain(Key::Enter))?;
        self.settle(self.config.search_settle_ms);

        if let Some(original) = original_clipboard {
            self.desktop.set_clipboard_text(&original).warn_on_err();
        }

        if self.title_matches(handle, label) {
            info!(label, "Selected label via search");
            return Ok(Located {
                text: label.to_string(),
                score: 1.0,
                click: region.center(),
                corrected: false,
                scrolls: self.config.max_scrolls,
                via_search: true,
            });
        }

        if let Some(candidate) = self.scan(handle, region, label)? {
            let mut located = self.click_and_verify(handle, region, label, candidate, miss)?;
            located.scrolls = self.config.max_scrolls;
            located.via_search = true;
            return Ok(located);
        }

        // Leave no palette open for the next step
        self.guard
            .safe_press(handle, KeyChord::plain(Key::Escape))
            .warn_on_err();
        Err(DriverError::failure(
            miss,
            format!(
                "{label:?} not found after {} scrolls and search",
                self.config.max_scrolls
            ),
        ))
    }
}
