//! PID file lock for file-backed sessions.
//!
//! Two clients sharing one MTProto session file end up fighting over the same
//! auth key, and Telegram may revoke it. The runner therefore writes its PID
//! next to the session file (`<session>.pid`) and refuses to start while
//! another live process holds it.
//!
//! This is an advisory lock. A PID file left behind by a crashed process is
//! detected through `/proc` where available and removed.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{KeepOnlineError, Result};

/// PID file guard that removes the file on drop.
#[derive(Debug)]
pub struct SessionLockGuard {
    path: PathBuf,
}

impl SessionLockGuard {
    /// Lock the session stored at `session_file`.
    pub fn acquire(session_file: &Path) -> Result<Self> {
        Self::acquire_at(lock_path(session_file))
    }

    fn acquire_at(path: PathBuf) -> Result<Self> {
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => {
                    if let Ok(pid) = content.trim().parse::<u32>() {
                        if pid != std::process::id() && is_process_running(pid) {
                            return Err(KeepOnlineError::Session(format!(
                                "Session is already in use by PID {}. \
                                 If this is incorrect, remove {} and try again.",
                                pid,
                                path.display()
                            )));
                        }
                        warn!(
                            "Found stale session lock for non-running process {}. Cleaning up.",
                            pid
                        );
                    }
                    let _ = fs::remove_file(&path);
                }
                Err(e) => {
                    warn!("Failed to read session lock: {}. Assuming stale and removing.", e);
                    let _ = fs::remove_file(&path);
                }
            }
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                KeepOnlineError::Session(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let pid = std::process::id();
        fs::write(&path, pid.to_string()).map_err(|e| {
            KeepOnlineError::Session(format!(
                "Failed to write session lock {}: {}",
                path.display(),
                e
            ))
        })?;
        debug!("Acquired session lock {}", path.display());

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionLockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(
                "Failed to remove session lock {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

/// `<session file>.pid`, keeping the original extension in the name.
fn lock_path(session_file: &Path) -> PathBuf {
    let mut name = session_file.as_os_str().to_owned();
    name.push(".pid");
    PathBuf::from(name)
}

/// Best-effort liveness check through `/proc`. Without `/proc` every PID is
/// reported dead, so a leftover lock never blocks startup.
fn is_process_running(pid: u32) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
}
