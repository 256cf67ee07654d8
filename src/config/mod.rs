//! Configuration module - every tunable the driver uses
//!
//! This module provides functionality for:
//! - Loading configuration from ~/.chat-escalation/config.json
//! - Default values for all settings (UI geometry, pixel thresholds, timings)
//! - Type definitions for config structures
//!
//! # Module Structure
//!
//! - `defaults` - All default constant values
//! - `types` - Configuration struct definitions (Config, GeometryConfig, etc.)
//! - `loader` - File system loading and parsing

mod defaults;
mod loader;
mod types;

pub use types::{
    Config, DetectionConfig, ExtractionConfig, FlowConfig, GeometryConfig, GuardConfig,
    LogConfig, NavigationConfig, PromptConfig, TargetConfig, ValidationConfig,
};

pub use loader::{config_path, load_config, parse_config};

#[cfg(test)]
pub use defaults::*;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
