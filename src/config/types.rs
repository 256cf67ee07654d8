//! Configuration type definitions
//!
//! This module contains all the struct definitions for configuration. Every
//! field has a default so a config file only needs the keys it overrides.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::defaults::*;
use crate::desktop::{AppIdentity, KeyChord};
use crate::geometry::{Anchor, Probe, RegionSpec};

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

// ============================================
// TARGET APPLICATION
// ============================================

/// Which desktop app the driver automates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    /// Display name used to launch and match the app (default: "ChatGPT")
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Executable name in the process table (default: "ChatGPT")
    #[serde(default = "default_process_name")]
    pub process_name: String,
    /// Bundle identifier; when set it takes precedence over `appName`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    #[serde(default = "default_launch_timeout_ms")]
    pub launch_timeout_ms: u64,
    #[serde(default = "default_terminate_timeout_ms")]
    pub terminate_timeout_ms: u64,
    /// Wait after the window appears before the UI is trusted (default: 1500)
    #[serde(default = "default_post_launch_settle_ms")]
    pub post_launch_settle_ms: u64,
}

fn default_app_name() -> String {
    DEFAULT_APP_NAME.to_string()
}
fn default_process_name() -> String {
    DEFAULT_PROCESS_NAME.to_string()
}
fn default_launch_timeout_ms() -> u64 {
    DEFAULT_LAUNCH_TIMEOUT_MS
}
fn default_terminate_timeout_ms() -> u64 {
    DEFAULT_TERMINATE_TIMEOUT_MS
}
fn default_post_launch_settle_ms() -> u64 {
    DEFAULT_POST_LAUNCH_SETTLE_MS
}

impl Default for TargetConfig {
    fn default() -> Self {
        TargetConfig {
            app_name: default_app_name(),
            process_name: default_process_name(),
            bundle_id: None,
            launch_timeout_ms: DEFAULT_LAUNCH_TIMEOUT_MS,
            terminate_timeout_ms: DEFAULT_TERMINATE_TIMEOUT_MS,
            post_launch_settle_ms: DEFAULT_POST_LAUNCH_SETTLE_MS,
        }
    }
}

impl TargetConfig {
    pub fn identity(&self) -> AppIdentity {
        AppIdentity {
            name: self.app_name.clone(),
            process_name: self.process_name.clone(),
            bundle_id: self.bundle_id.clone(),
        }
    }
}

// ============================================
// WINDOW GUARD
// ============================================

/// Foreground restoration and step-retry budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuardConfig {
    /// ensureForeground attempts before reporting focus_failed (default: 3)
    pub foreground_attempts: u32,
    /// Wait after the first foreground request (default: 200)
    pub foreground_base_delay_ms: u64,
    /// Added to the wait on each further attempt (default: 100)
    pub foreground_delay_step_ms: u64,
    /// retryWithRecovery attempts per guarded step (default: 3)
    pub retry_attempts: u32,
    /// First backoff between guarded attempts, doubled each time (default: 500)
    pub retry_backoff_ms: u64,
    pub restore_settle_ms: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        GuardConfig {
            foreground_attempts: DEFAULT_FOREGROUND_ATTEMPTS,
            foreground_base_delay_ms: DEFAULT_FOREGROUND_BASE_DELAY_MS,
            foreground_delay_step_ms: DEFAULT_FOREGROUND_DELAY_STEP_MS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            restore_settle_ms: DEFAULT_RESTORE_SETTLE_MS,
        }
    }
}

// ============================================
// UI GEOMETRY
// ============================================

/// Where the target app draws the landmarks the driver looks at
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeometryConfig {
    /// Hamburger button that toggles the navigation panel
    pub panel_toggle: Anchor,
    /// Region where the panel's close affordance renders while it is open
    pub panel_close_probe: Probe,
    /// Region where the stop-generation button renders while streaming
    pub generating_probe: Probe,
    /// A point inside the message composer
    pub input: Anchor,
    /// A point inside the conversation transcript (for scrolling)
    pub conversation: Anchor,
    /// Navigation panel, scanned for groups
    pub sidebar: RegionSpec,
    /// Main content area, scanned for conversations inside a group
    pub content: RegionSpec,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        let (toggle_x, toggle_y) = DEFAULT_PANEL_TOGGLE;
        let (close_x, close_y) = DEFAULT_PANEL_CLOSE_PROBE;
        let (gen_x, gen_y) = DEFAULT_GENERATING_PROBE;
        let (input_x, input_y) = DEFAULT_INPUT_ANCHOR;
        let (conv_x, conv_y) = DEFAULT_CONVERSATION_ANCHOR;
        let (left, right, top, bottom) = DEFAULT_CONTENT_REGION;
        GeometryConfig {
            panel_toggle: Anchor::pixels(toggle_x, toggle_y),
            panel_close_probe: Probe {
                center: Anchor::pixels(close_x, close_y),
                width: DEFAULT_PANEL_CLOSE_PROBE_SIZE,
                height: DEFAULT_PANEL_CLOSE_PROBE_SIZE,
            },
            generating_probe: Probe {
                center: Anchor::fraction(gen_x, gen_y),
                width: DEFAULT_GENERATING_PROBE_SIZE,
                height: DEFAULT_GENERATING_PROBE_SIZE,
            },
            input: Anchor::fraction(input_x, input_y),
            conversation: Anchor::fraction(conv_x, conv_y),
            sidebar: RegionSpec {
                left: 0.0,
                right: DEFAULT_SIDEBAR_RIGHT,
                top: 0.0,
                bottom: 1.0,
                top_inset: DEFAULT_SIDEBAR_TOP_INSET,
                bottom_inset: DEFAULT_SIDEBAR_BOTTOM_INSET,
            },
            content: RegionSpec {
                left,
                right,
                top,
                bottom,
                top_inset: 0,
                bottom_inset: 0,
            },
        }
    }
}

// ============================================
// VISUAL STATE DETECTION
// ============================================

/// Pixel thresholds and polling cadence for the visual classifiers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionConfig {
    /// A panel-probe pixel is dark below this luma (default: 180)
    pub panel_dark_luma: u8,
    /// Panel is open when the dark count exceeds this (default: 50)
    pub panel_open_min_dark: u32,
    /// A generating-probe pixel is dark below this luma (default: 50)
    pub generating_dark_luma: u8,
    /// Generating only when strictly between min and max dark pixels (default: 60..400)
    pub generating_min_dark: u32,
    pub generating_max_dark: u32,
    pub poll_interval_ms: u64,
    /// Consecutive idle polls required once generation was seen (default: 3)
    pub idle_confirmations: u32,
    /// Consecutive idle polls required when generation was never seen (default: 5)
    pub idle_confirmations_without_generation: u32,
    pub generation_start_delay_ms: u64,
    /// Consecutive polls without foreground before waiting gives up (default: 10)
    pub max_foreground_failures: u32,
    pub panel_open_timeout_ms: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            panel_dark_luma: DEFAULT_PANEL_DARK_LUMA,
            panel_open_min_dark: DEFAULT_PANEL_OPEN_MIN_DARK,
            generating_dark_luma: DEFAULT_GENERATING_DARK_LUMA,
            generating_min_dark: DEFAULT_GENERATING_MIN_DARK,
            generating_max_dark: DEFAULT_GENERATING_MAX_DARK,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            idle_confirmations: DEFAULT_IDLE_CONFIRMATIONS,
            idle_confirmations_without_generation: DEFAULT_IDLE_CONFIRMATIONS_WITHOUT_GENERATION,
            generation_start_delay_ms: DEFAULT_GENERATION_START_DELAY_MS,
            max_foreground_failures: DEFAULT_MAX_FOREGROUND_FAILURES,
            panel_open_timeout_ms: DEFAULT_PANEL_OPEN_TIMEOUT_MS,
        }
    }
}

// ============================================
// NAVIGATION (TEXT LOCATOR)
// ============================================

/// OCR navigation, hover correction and search fallback
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NavigationConfig {
    /// Minimum fuzzy score for a candidate to be clicked (default: 0.7)
    pub match_threshold: f64,
    /// Highlight-to-click offset that triggers a corrective click (default: 18)
    pub hover_offset_threshold: u32,
    /// Size of the corrective click shift (default: 28)
    pub corrective_step: u32,
    /// Height of one list row (default: 35)
    pub row_height: u32,
    /// Luma of an unhighlighted list background (default: 249)
    pub highlight_base_luma: f64,
    /// Minimum darkening that counts as a highlighted row (default: 2.0)
    pub highlight_deviation: f64,
    pub max_scrolls: u32,
    pub scroll_lines: i32,
    /// In-app search-and-jump shortcut used when OCR finds nothing (default: "cmd+k")
    pub search_shortcut: String,
    pub search_settle_ms: u64,
    pub click_settle_ms: u64,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        NavigationConfig {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            hover_offset_threshold: DEFAULT_HOVER_OFFSET_THRESHOLD,
            corrective_step: DEFAULT_CORRECTIVE_STEP,
            row_height: DEFAULT_ROW_HEIGHT,
            highlight_base_luma: DEFAULT_HIGHLIGHT_BASE_LUMA,
            highlight_deviation: DEFAULT_HIGHLIGHT_DEVIATION,
            max_scrolls: DEFAULT_MAX_SCROLLS,
            scroll_lines: DEFAULT_SCROLL_LINES,
            search_shortcut: DEFAULT_SEARCH_SHORTCUT.to_string(),
            search_settle_ms: DEFAULT_SEARCH_SETTLE_MS,
            click_settle_ms: DEFAULT_CLICK_SETTLE_MS,
        }
    }
}

impl NavigationConfig {
    /// Height of the band re-scanned by the verification pass.
    pub fn verify_band(&self) -> u32 {
        self.row_height * 2
    }
}

// ============================================
// RESPONSE EXTRACTION
// ============================================

/// How the "copy last message" control is discovered
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractionConfig {
    /// Reverse-focus positions passed over before probing starts (default: 4)
    pub skip_leading: u32,
    /// Positions probed after the skipped ones (default: 7)
    pub max_probes: u32,
    /// Direct "copy last message" shortcut (default: "cmd+shift+c")
    pub copy_shortcut: String,
    pub bottom_scroll_lines: i32,
    pub copy_settle_ms: u64,
    /// Focused controls whose name contains one of these are never invoked
    pub destructive_keywords: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        ExtractionConfig {
            skip_leading: DEFAULT_SKIP_LEADING,
            max_probes: DEFAULT_MAX_PROBES,
            copy_shortcut: DEFAULT_COPY_SHORTCUT.to_string(),
            bottom_scroll_lines: DEFAULT_BOTTOM_SCROLL_LINES,
            copy_settle_ms: DEFAULT_COPY_SETTLE_MS,
            destructive_keywords: strings(DEFAULT_DESTRUCTIVE_KEYWORDS),
        }
    }
}

// ============================================
// PROMPT SUBMISSION
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptConfig {
    /// Paste/copy-back comparisons before input_verify_failed (default: 3)
    pub verify_attempts: u32,
    /// Clicks on the composer before focus_failed (default: 3)
    pub focus_attempts: u32,
    /// Sent once when the answer echoes the template
    pub clarification_message: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        PromptConfig {
            verify_attempts: DEFAULT_VERIFY_ATTEMPTS,
            focus_attempts: DEFAULT_FOCUS_ATTEMPTS,
            clarification_message: DEFAULT_CLARIFICATION_MESSAGE.to_string(),
        }
    }
}

// ============================================
// RESPONSE VALIDATION
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationConfig {
    pub min_response_chars: usize,
    /// Substrings that only appear in an unfilled template (case-insensitive)
    pub placeholder_markers: Vec<String>,
    /// Field names that exist only in the instructional template
    pub template_fields: Vec<String>,
    /// Field names a well-formed answer must contain
    pub required_fields: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig {
            min_response_chars: DEFAULT_MIN_RESPONSE_CHARS,
            placeholder_markers: strings(DEFAULT_PLACEHOLDER_MARKERS),
            template_fields: strings(DEFAULT_TEMPLATE_FIELDS),
            required_fields: Vec::new(),
        }
    }
}

// ============================================
// FLOW
// ============================================

/// Whole-flow retry and single-flight settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowConfig {
    /// Total flow attempts, each with a fresh relaunch (default: 4)
    #[serde(default = "default_flow_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_flow_retry_pause_ms")]
    pub retry_pause_ms: u64,
    /// Response wait when a command carries no timeoutMs (default: 600000)
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_gate_poll_ms")]
    pub gate_poll_ms: u64,
    /// Cross-process lock file (default: ~/.chat-escalation/driver.lock)
    #[serde(default = "default_lock_file")]
    pub lock_file: String,
    /// When set, region captures used for decisions are saved here as PNG
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_capture_dir: Option<String>,
}

fn default_flow_max_attempts() -> u32 {
    DEFAULT_FLOW_MAX_ATTEMPTS
}
fn default_flow_retry_pause_ms() -> u64 {
    DEFAULT_FLOW_RETRY_PAUSE_MS
}
fn default_response_timeout_ms() -> u64 {
    DEFAULT_RESPONSE_TIMEOUT_MS
}
fn default_gate_poll_ms() -> u64 {
    DEFAULT_GATE_POLL_MS
}
fn default_lock_file() -> String {
    DEFAULT_LOCK_FILE.to_string()
}

impl Default for FlowConfig {
    fn default() -> Self {
        FlowConfig {
            max_attempts: DEFAULT_FLOW_MAX_ATTEMPTS,
            retry_pause_ms: DEFAULT_FLOW_RETRY_PAUSE_MS,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            gate_poll_ms: DEFAULT_GATE_POLL_MS,
            lock_file: default_lock_file(),
            debug_capture_dir: None,
        }
    }
}

impl FlowConfig {
    pub fn lock_path(&self) -> PathBuf {
        expand_path(&self.lock_file)
    }

    pub fn debug_capture_path(&self) -> Option<PathBuf> {
        self.debug_capture_dir.as_deref().map(expand_path)
    }
}

// ============================================
// LOGGING
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default = "default_log_file")]
    pub file: String,
    /// EnvFilter directive used when RUST_LOG is unset (default: "info")
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_dir() -> String {
    DEFAULT_LOG_DIR.to_string()
}
fn default_log_file() -> String {
    DEFAULT_LOG_FILE.to_string()
}
fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            dir: default_log_dir(),
            file: default_log_file(),
            filter: default_log_filter(),
        }
    }
}

impl LogConfig {
    pub fn path(&self) -> PathBuf {
        expand_path(&self.dir).join(&self.file)
    }
}

// ============================================
// MAIN CONFIG
// ============================================

/// Complete driver configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub target: TargetConfig,
    pub guard: GuardConfig,
    pub geometry: GeometryConfig,
    pub detection: DetectionConfig,
    pub navigation: NavigationConfig,
    pub extraction: ExtractionConfig,
    pub prompt: PromptConfig,
    pub validation: ValidationConfig,
    pub flow: FlowConfig,
    pub log: LogConfig,
}

impl Config {
    /// Reject settings the driver cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.target.app_name.trim().is_empty() {
            return Err("target.appName must not be empty".into());
        }
        if self.target.process_name.trim().is_empty() {
            return Err("target.processName must not be empty".into());
        }
        let d = &self.detection;
        if d.generating_min_dark + 1 >= d.generating_max_dark {
            return Err(format!(
                "detection generating interval ({}, {}) is empty",
                d.generating_min_dark, d.generating_max_dark
            ));
        }
        if d.poll_interval_ms == 0 {
            return Err("detection.pollIntervalMs must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.navigation.match_threshold) {
            return Err("navigation.matchThreshold must be within 0..=1".into());
        }
        if self.navigation.row_height == 0 {
            return Err("navigation.rowHeight must be positive".into());
        }
        for (name, value) in [
            ("guard.foregroundAttempts", self.guard.foreground_attempts),
            ("guard.retryAttempts", self.guard.retry_attempts),
            ("prompt.verifyAttempts", self.prompt.verify_attempts),
            ("prompt.focusAttempts", self.prompt.focus_attempts),
            ("flow.maxAttempts", self.flow.max_attempts),
        ] {
            if value == 0 {
                return Err(format!("{name} must be at least 1"));
            }
        }
        for (name, shortcut) in [
            ("navigation.searchShortcut", &self.navigation.search_shortcut),
            ("extraction.copyShortcut", &self.extraction.copy_shortcut),
        ] {
            shortcut
                .parse::<KeyChord>()
                .map_err(|e| format!("{name}: {e}"))?;
        }
        Ok(())
    }
}
