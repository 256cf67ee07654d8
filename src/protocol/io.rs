//! Protocol I/O: parsing commands and writing results
//!
//! This module provides:
//! - `parse_command` with classified failures for logging and error results
//! - `read_command` for one-shot mode (the whole input is one document)
//! - `JsonlReader` for serve mode (one command per line)
//! - `write_result` for one result line on stdout

use std::io::{BufRead, BufReader, Read, Write};
use tracing::{debug, warn};

use super::types::{Command, CommandResult};
use crate::error::{DriverError, Result};

/// Maximum length for raw JSON in logs (prompts can be long)
const MAX_RAW_LOG_PREVIEW: usize = 200;

/// Get a truncated preview of raw JSON for logging
pub fn log_preview(raw: &str) -> (&str, usize) {
    let len = raw.len();
    if len <= MAX_RAW_LOG_PREVIEW {
        return (raw, len);
    }
    let mut end = MAX_RAW_LOG_PREVIEW;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    (&raw[..end], len)
}

/// Outcome of parsing one command document
#[derive(Debug)]
pub enum ParseResult {
    Ok(Command),
    /// Valid JSON without an "action" string
    MissingAction,
    /// An action name this driver does not know
    UnknownAction { action: String },
    /// Known action with params of the wrong shape
    InvalidPayload { action: String, error: String },
    /// Not JSON at all
    ParseError(serde_json::Error),
}

impl ParseResult {
    pub fn into_command(self) -> Result<Command> {
        match self {
            ParseResult::Ok(command) => Ok(command),
            ParseResult::MissingAction => {
                Err(DriverError::Protocol("command has no 'action' field".into()))
            }
            ParseResult::UnknownAction { action } => {
                Err(DriverError::Protocol(format!("unknown action '{action}'")))
            }
            ParseResult::InvalidPayload { action, error } => Err(DriverError::Protocol(format!(
                "invalid params for '{action}': {error}"
            ))),
            ParseResult::ParseError(e) => Err(DriverError::Parse(e)),
        }
    }
}

/// Parse one command, classifying what went wrong.
///
/// Parses to `serde_json::Value` first so the action name is available for
/// the error even when the params don't fit.
pub fn parse_command(raw: &str) -> ParseResult {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => return ParseResult::ParseError(e),
    };

    let action = match value.get("action").and_then(|a| a.as_str()) {
        Some(a) => a.to_string(),
        None => return ParseResult::MissingAction,
    };
    if action.parse::<super::types::Action>().is_err() {
        return ParseResult::UnknownAction { action };
    }

    match serde_json::from_value::<Command>(value) {
        Ok(command) => ParseResult::Ok(command),
        Err(e) => ParseResult::InvalidPayload {
            action,
            error: e.to_string(),
        },
    }
}

fn parse_logged(raw: &str) -> Result<Command> {
    let (preview, raw_len) = log_preview(raw);
    let parsed = parse_command(raw).into_command();
    match &parsed {
        Ok(command) => debug!(action = %command.action, "Parsed command"),
        Err(e) => warn!(error = %e, raw_preview = %preview, raw_len, "Rejected command"),
    }
    parsed
}

/// Read the whole input as one command (one-shot mode).
pub fn read_command(mut input: impl Read) -> Result<Command> {
    let mut raw = String::new();
    input.read_to_string(&mut raw)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DriverError::Protocol("no command on stdin".into()));
    }
    parse_logged(trimmed)
}

/// Write one result as a single JSON line and flush.
pub fn write_result(out: &mut impl Write, result: &CommandResult) -> Result<()> {
    let line = serde_json::to_string(result)?;
    writeln!(out, "{line}")?;
    out.flush()?;
    Ok(())
}

/// JSONL reader for serve mode
///
/// Uses a reusable line buffer; the buffer is cleared and reused between reads.
pub struct JsonlReader<R: Read> {
    reader: BufReader<R>,
    line_buffer: String,
}

impl<R: Read> JsonlReader<R> {
    pub fn new(reader: R) -> Self {
        JsonlReader {
            reader: BufReader::new(reader),
            line_buffer: String::with_capacity(1024),
        }
    }

    /// Read the next command.
    ///
    /// # Returns
    /// * `Ok(Some(Ok(Command)))` - parsed command
    /// * `Ok(Some(Err(e)))` - a line that is not a valid command; the caller answers it
    /// * `Ok(None)` - end of stream
    /// * `Err(e)` - I/O error
    pub fn next_command(&mut self) -> std::io::Result<Option<Result<Command>>> {
        // Loop instead of recursion so runs of blank lines can't overflow the stack
        loop {
            self.line_buffer.clear();
            match self.reader.read_line(&mut self.line_buffer)? {
                0 => {
                    debug!("Reached end of JSONL stream");
                    return Ok(None);
                }
                bytes_read => {
                    let trimmed = self.line_buffer.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    debug!(bytes_read, "Read line from JSONL stream");
                    return Ok(Some(parse_logged(trimmed)));
                }
            }
        }
    }
}
