//! Cross-platform process and clipboard helpers shared by every backend.

use anyhow::{Context, Result};
use arboard::Clipboard;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

fn refreshed_system() -> System {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system
}

/// PIDs of every running process whose executable name matches `process_name`.
pub fn matching_pids(process_name: &str) -> Vec<u32> {
    let system = refreshed_system();
    let mut pids: Vec<u32> = system
        .processes()
        .iter()
        .filter(|(_, process)| {
            process
                .name()
                .to_string_lossy()
                .eq_ignore_ascii_case(process_name)
        })
        .map(|(pid, _)| pid.as_u32())
        .collect();
    pids.sort_unstable();
    pids
}

pub fn is_process_running(pid: u32) -> bool {
    let system = refreshed_system();
    system.process(Pid::from_u32(pid)).is_some()
}

/// Kill every process named `process_name`. Returns the number signalled.
pub fn terminate_processes(process_name: &str) -> Result<usize> {
    let system = refreshed_system();
    let mut killed = 0;
    for (pid, process) in system.processes() {
        if !process
            .name()
            .to_string_lossy()
            .eq_ignore_ascii_case(process_name)
        {
            continue;
        }
        if process.kill() {
            debug!(pid = pid.as_u32(), process_name, "Killed process");
            killed += 1;
        } else {
            warn!(pid = pid.as_u32(), process_name, "Failed to kill process");
        }
    }
    info!(process_name, killed, "Terminated target processes");
    Ok(killed)
}

/// Current clipboard text. `None` when the clipboard holds no text.
pub fn read_clipboard() -> Result<Option<String>> {
    let mut clipboard = Clipboard::new().context("Failed to access clipboard")?;
    match clipboard.get_text() {
        Ok(text) => Ok(Some(text)),
        Err(arboard::Error::ContentNotAvailable) => Ok(None),
        Err(e) => Err(e).context("Failed to read clipboard text"),
    }
}

pub fn write_clipboard(text: &str) -> Result<()> {
    let mut clipboard = Clipboard::new().context("Failed to access clipboard")?;
    clipboard
        .set_text(text)
        .context("Failed to set clipboard text")?;
    Ok(())
}
