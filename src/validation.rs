//! Structural checks on an extracted answer.
//!
//! The driver does not understand answers. It only rejects text that is
//! empty, malformed, or an echo of the instructional template the agent sent.

use regex::Regex;
use tracing::debug;

use crate::config::ValidationConfig;
use crate::error::{DriverError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Empty,
    /// Too short or missing a required field
    InvalidFormat(String),
    /// Looks like the template itself; carries the marker that gave it away
    TemplateEcho(String),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }
}

pub trait ResponseValidator {
    fn validate(&self, text: &str) -> Validation;
}

/// Placeholder markers, template-only field names, length and required fields.
pub struct TemplateValidator {
    markers: Vec<String>,
    template_fields: Vec<(String, Regex)>,
    required_fields: Vec<(String, Regex)>,
    min_chars: usize,
}

impl TemplateValidator {
    pub fn new(config: &ValidationConfig) -> Result<Self> {
        let template_fields = config
            .template_fields
            .iter()
            .map(|field| {
                let pattern = format!(r"(?i)\b{}\b", regex::escape(field));
                compile(field, &pattern)
            })
            .collect::<Result<Vec<_>>>()?;

        // Required fields may be regexes; anything that doesn't compile is literal
        let required_fields = config
            .required_fields
            .iter()
            .map(|field| {
                let pattern = format!("(?i){field}");
                match Regex::new(&pattern) {
                    Ok(regex) => Ok((field.clone(), regex)),
                    Err(_) => compile(field, &format!("(?i){}", regex::escape(field))),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            markers: config
                .placeholder_markers
                .iter()
                .map(|m| m.to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
            template_fields,
            required_fields,
            min_chars: config.min_response_chars,
        })
    }
}

fn compile(field: &str, pattern: &str) -> Result<(String, Regex)> {
    Regex::new(pattern)
        .map(|regex| (field.to_string(), regex))
        .map_err(|e| DriverError::Config(format!("validation field {field:?}: {e}")))
}

impl ResponseValidator for TemplateValidator {
    fn validate(&self, text: &str) -> Validation {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Validation::Empty;
        }

        let lower = trimmed.to_lowercase();
        if let Some(marker) = self.markers.iter().find(|m| lower.contains(m.as_str())) {
            debug!(marker = %marker, "Response contains template placeholder");
            return Validation::TemplateEcho(format!("placeholder {marker:?}"));
        }
        if let Some((field, _)) = self.template_fields.iter().find(|(_, re)| re.is_match(trimmed)) {
            debug!(field = %field, "Response contains template-only field");
            return Validation::TemplateEcho(format!("template field {field:?}"));
        }

        let chars = trimmed.chars().count();
        if chars < self.min_chars {
            return Validation::InvalidFormat(format!(
                "{chars} characters, expected at least {}",
                self.min_chars
            ));
        }
        let missing: Vec<&str> = self
            .required_fields
            .iter()
            .filter(|(_, re)| !re.is_match(trimmed))
            .map(|(field, _)| field.as_str())
            .collect();
        if !missing.is_empty() {
            return Validation::InvalidFormat(format!("missing fields {missing:?}"));
        }

        Validation::Valid
    }
}
