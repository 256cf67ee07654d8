//! Default configuration values
//!
//! All constants used throughout the config module are defined here. Pixel
//! values are logical points, calibrated for the desktop ChatGPT client in its
//! light theme at 1x scale.

/// Target application identity
pub const DEFAULT_APP_NAME: &str = "ChatGPT";
pub const DEFAULT_PROCESS_NAME: &str = "ChatGPT";
pub const DEFAULT_LAUNCH_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_TERMINATE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_POST_LAUNCH_SETTLE_MS: u64 = 1_500;

/// WindowGuard
pub const DEFAULT_FOREGROUND_ATTEMPTS: u32 = 3;
pub const DEFAULT_FOREGROUND_BASE_DELAY_MS: u64 = 200;
pub const DEFAULT_FOREGROUND_DELAY_STEP_MS: u64 = 100;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
pub const DEFAULT_RESTORE_SETTLE_MS: u64 = 300;

/// Geometry: fixed pixel anchors from the window's top-left corner
pub const DEFAULT_PANEL_TOGGLE: (i32, i32) = (30, 70);
pub const DEFAULT_PANEL_CLOSE_PROBE: (i32, i32) = (275, 58);
pub const DEFAULT_PANEL_CLOSE_PROBE_SIZE: u32 = 20;

/// Geometry: fractional anchors of the window size
pub const DEFAULT_GENERATING_PROBE: (f64, f64) = (0.83, 0.87);
pub const DEFAULT_GENERATING_PROBE_SIZE: u32 = 30;
pub const DEFAULT_INPUT_ANCHOR: (f64, f64) = (0.5, 0.83);
pub const DEFAULT_CONVERSATION_ANCHOR: (f64, f64) = (0.5, 0.5);
pub const DEFAULT_SIDEBAR_RIGHT: f64 = 0.28;
pub const DEFAULT_SIDEBAR_TOP_INSET: u32 = 35;
pub const DEFAULT_SIDEBAR_BOTTOM_INSET: u32 = 40;
pub const DEFAULT_CONTENT_REGION: (f64, f64, f64, f64) = (0.12, 0.88, 0.30, 0.75);

/// VisualStateDetector
pub const DEFAULT_PANEL_DARK_LUMA: u8 = 180;
pub const DEFAULT_PANEL_OPEN_MIN_DARK: u32 = 50;
pub const DEFAULT_GENERATING_DARK_LUMA: u8 = 50;
pub const DEFAULT_GENERATING_MIN_DARK: u32 = 60;
pub const DEFAULT_GENERATING_MAX_DARK: u32 = 400;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_IDLE_CONFIRMATIONS: u32 = 3;
pub const DEFAULT_IDLE_CONFIRMATIONS_WITHOUT_GENERATION: u32 = 5;
pub const DEFAULT_GENERATION_START_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_FOREGROUND_FAILURES: u32 = 10;
pub const DEFAULT_PANEL_OPEN_TIMEOUT_MS: u64 = 3_000;

/// TextLocator
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.7;
pub const DEFAULT_HOVER_OFFSET_THRESHOLD: u32 = 18;
pub const DEFAULT_CORRECTIVE_STEP: u32 = 28;
pub const DEFAULT_ROW_HEIGHT: u32 = 35;
pub const DEFAULT_HIGHLIGHT_BASE_LUMA: f64 = 249.0;
pub const DEFAULT_HIGHLIGHT_DEVIATION: f64 = 2.0;
pub const DEFAULT_MAX_SCROLLS: u32 = 5;
pub const DEFAULT_SCROLL_LINES: i32 = 3;
pub const DEFAULT_SEARCH_SHORTCUT: &str = "cmd+k";
pub const DEFAULT_SEARCH_SETTLE_MS: u64 = 800;
pub const DEFAULT_CLICK_SETTLE_MS: u64 = 350;

/// ResponseExtractor: the fifth reverse-tab from the composer is the first probe
pub const DEFAULT_SKIP_LEADING: u32 = 4;
pub const DEFAULT_MAX_PROBES: u32 = 7;
pub const DEFAULT_COPY_SHORTCUT: &str = "cmd+shift+c";
pub const DEFAULT_BOTTOM_SCROLL_LINES: i32 = 40;
pub const DEFAULT_COPY_SETTLE_MS: u64 = 300;
pub const DEFAULT_DESTRUCTIVE_KEYWORDS: &[&str] = &[
    "bad response",
    "good response",
    "delete",
    "share",
    "regenerate",
    "try again",
    "read aloud",
    "edit",
];

/// Prompt submission
pub const DEFAULT_VERIFY_ATTEMPTS: u32 = 3;
pub const DEFAULT_FOCUS_ATTEMPTS: u32 = 3;
pub const DEFAULT_CLARIFICATION_MESSAGE: &str = "Your previous reply repeated the answer template \
instead of filling it in. Reply again using the same format, replacing every placeholder with \
your actual answer.";

/// Response validation
pub const DEFAULT_MIN_RESPONSE_CHARS: usize = 10;
pub const DEFAULT_PLACEHOLDER_MARKERS: &[&str] = &[
    "<your answer here>",
    "<answer>",
    "{{",
    "}}",
    "[insert",
    "[your ",
    "<fill in",
];
pub const DEFAULT_TEMPLATE_FIELDS: &[&str] = &["example_field", "field_name"];

/// FlowOrchestrator
pub const DEFAULT_FLOW_MAX_ATTEMPTS: u32 = 4;
pub const DEFAULT_FLOW_RETRY_PAUSE_MS: u64 = 1_500;
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 600_000;
pub const DEFAULT_GATE_POLL_MS: u64 = 250;
pub const DEFAULT_LOCK_FILE: &str = "~/.chat-escalation/driver.lock";

/// Logging
pub const DEFAULT_LOG_DIR: &str = "~/.chat-escalation/logs";
pub const DEFAULT_LOG_FILE: &str = "driver.jsonl";
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Config file discovery
pub const CONFIG_ENV_VAR: &str = "CHAT_ESCALATION_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "~/.chat-escalation/config.json";
