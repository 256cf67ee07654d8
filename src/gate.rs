//! Single-flight gate: at most one flow owns the target window at a time.
//!
//! Two layers:
//! - in-process: a registry of held lock paths behind a `parking_lot` mutex,
//!   so threads of one driver queue on a condvar instead of the filesystem
//! - cross-process: a lock file created with `create_new`, holding the
//!   owner's pid, run id and start time as JSON
//!
//! A lock file whose pid is no longer running is stale and gets reclaimed.
//! Waiters poll; nobody is ever preempted. The pass releases both layers on
//! drop, so every exit path (success, failure, panic unwind) frees the gate.

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::desktop::system;
use crate::error::{Result, ResultExt};

/// Unreadable lock files younger than this may still be mid-write.
const PARTIAL_WRITE_GRACE: Duration = Duration::from_secs(5);

/// Lock paths held by this process, plus a condvar for in-process waiters.
static HELD: LazyLock<(Mutex<HashSet<PathBuf>>, Condvar)> =
    LazyLock::new(|| (Mutex::new(HashSet::new()), Condvar::new()));

/// Contents of the lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub pid: u32,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
}

pub struct FlightGate {
    lock_path: PathBuf,
    poll: Duration,
}

/// Proof of gate ownership. Dropping it releases the gate.
#[derive(Debug)]
pub struct GatePass {
    lock_path: PathBuf,
    run_id: String,
}

impl GatePass {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl FlightGate {
    pub fn new(lock_path: PathBuf, poll: Duration) -> Self {
        Self { lock_path, poll }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Block until the gate is free, then take it for `run_id`.
    pub fn acquire(&self, run_id: &str) -> Result<GatePass> {
        {
            let (held, freed) = &*HELD;
            let mut held = held.lock();
            if held.contains(&self.lock_path) {
                info!(run_id, "Another flow in this process holds the gate, waiting");
            }
            while held.contains(&self.lock_path) {
                freed.wait(&mut held);
            }
            held.insert(self.lock_path.clone());
        }

        let mut announced = false;
        loop {
            match self.try_lock_file(run_id) {
                Ok(true) => break,
                Ok(false) => {
                    if !announced {
                        info!(run_id, lock = %self.lock_path.display(), "Gate busy, waiting");
                        announced = true;
                    }
                    std::thread::sleep(self.poll);
                }
                Err(e) => {
                    release_in_process(&self.lock_path);
                    return Err(e);
                }
            }
        }

        debug!(run_id, "Gate acquired");
        Ok(GatePass {
            lock_path: self.lock_path.clone(),
            run_id: run_id.to_string(),
        })
    }

    /// Take the gate only if it is free right now.
    pub fn try_acquire(&self, run_id: &str) -> Result<Option<GatePass>> {
        {
            let mut held = HELD.0.lock();
            if !held.insert(self.lock_path.clone()) {
                return Ok(None);
            }
        }
        match self.try_lock_file(run_id) {
            Ok(true) => Ok(Some(GatePass {
                lock_path: self.lock_path.clone(),
                run_id: run_id.to_string(),
            })),
            Ok(false) => {
                release_in_process(&self.lock_path);
                Ok(None)
            }
            Err(e) => {
                release_in_process(&self.lock_path);
                Err(e)
            }
        }
    }

    /// One attempt at creating the lock file. A stale file is removed and
    /// the creation retried once.
    fn try_lock_file(&self, run_id: &str) -> Result<bool> {
        if let Some(dir) = self.lock_path.parent() {
            fs::create_dir_all(dir)?;
        }
        for _ in 0..2 {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_path)
            {
                Ok(mut file) => {
                    let info = LockInfo {
                        pid: std::process::id(),
                        run_id: run_id.to_string(),
                        started_at: Utc::now(),
                    };
                    fill_or_remove(&self.lock_path, || {
                        file.write_all(serde_json::to_string(&info)?.as_bytes())?;
                        file.sync_all()?;
                        Ok(())
                    })?;
                    return Ok(true);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !self.reclaim_if_stale()? {
                        return Ok(false);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(false)
    }

    /// Remove the lock file when its owner is gone. True if removed.
    fn reclaim_if_stale(&self) -> Result<bool> {
        let stale = match read_lock_info(&self.lock_path) {
            Some(info) => {
                // Our own pid here means a previous process with a recycled pid;
                // flows of this process are tracked in HELD instead
                info.pid == std::process::id() || !system::is_process_running(info.pid)
            }
            None => {
                let age = fs::metadata(&self.lock_path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| SystemTime::now().duration_since(modified).ok());
                age.map_or(true, |age| age > PARTIAL_WRITE_GRACE)
            }
        };
        if !stale {
            return Ok(false);
        }
        warn!(lock = %self.lock_path.display(), "Reclaiming stale lock file");
        match fs::remove_file(&self.lock_path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }
}

/// Run `fill` on a lock file this process just created. On failure the file
/// is removed so an empty lock can't block other flows.
fn fill_or_remove(path: &Path, fill: impl FnOnce() -> Result<()>) -> Result<()> {
    let filled = fill();
    if let Err(e) = &filled {
        warn!(lock = %path.display(), error = %e, "Failed to write lock file, removing it");
        fs::remove_file(path).log_err();
    }
    filled
}

pub fn read_lock_info(path: &Path) -> Option<LockInfo> {
    let raw = fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

fn release_in_process(lock_path: &Path) {
    let (held, freed) = &*HELD;
    held.lock().remove(lock_path);
    freed.notify_all();
}

impl Drop for GatePass {
    fn drop(&mut self) {
        // Only delete a file that is still ours
        match read_lock_info(&self.lock_path) {
            Some(info) if info.run_id == self.run_id => {
                fs::remove_file(&self.lock_path).log_err();
            }
            _ => warn!(run_id = %self.run_id, "Lock file no longer ours at release"),
        }
        release_in_process(&self.lock_path);
        debug!(run_id = %self.run_id, "Gate released");
    }
}
