use crate::endpoint::TunnelEndpoint;
use nix::sys::signal;
use nix::unistd::Pid;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Bounded so two instances reclaiming the same stale lock cannot spin forever.
const MAX_ACQUIRE_ATTEMPTS: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("another instance is already running on {endpoint} with PID {pid}")]
    AlreadyRunning { endpoint: TunnelEndpoint, pid: u32 },
    #[error("lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("lock file {} kept changing while it was being reclaimed", path.display())]
    Contended { path: PathBuf },
}

/// What a lock file currently says about its endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    Free,
    Held(u32),
    Stale(u32),
    Unreadable(String),
}

/// Holds the per-endpoint lock file for the lifetime of the supervisor.
///
/// Creation uses `create_new`, so two instances starting against an absent
/// lock cannot both win. Reclaiming a stale lock is still a remove followed by
/// a create: an instance that removes the lock just after a competitor
/// rewrote it can take it over. See DESIGN.md.
#[derive(Debug)]
pub struct SingletonGuard {
    path: PathBuf,
    endpoint: TunnelEndpoint,
    pid: u32,
    released: bool,
}

impl SingletonGuard {
    pub fn acquire(endpoint: &TunnelEndpoint, path: &Path) -> Result<Self, LockError> {
        Self::acquire_as(endpoint, path, std::process::id())
    }

    /// Like [`acquire`](Self::acquire) but records `pid` as the owner.
    pub fn acquire_as(endpoint: &TunnelEndpoint, path: &Path, pid: u32) -> Result<Self, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };

        for _ in 0..MAX_ACQUIRE_ATTEMPTS {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(file) => {
                    write_owner(path, file, pid).map_err(io_err)?;
                    tracing::debug!(path = %path.display(), pid, "lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                        endpoint: endpoint.clone(),
                        pid,
                        released: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(io_err(e)),
            }

            match inspect(path).map_err(io_err)? {
                LockStatus::Free => continue,
                LockStatus::Held(owner) => {
                    return Err(LockError::AlreadyRunning {
                        endpoint: endpoint.clone(),
                        pid: owner,
                    });
                }
                LockStatus::Stale(owner) => {
                    tracing::warn!(path = %path.display(), owner, "removing stale lock");
                }
                LockStatus::Unreadable(content) => {
                    tracing::warn!(
                        path = %path.display(),
                        content = %content,
                        "lock file has no valid PID, treating as stale"
                    );
                }
            }
            release(path).map_err(io_err)?;
        }

        Err(LockError::Contended {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn endpoint(&self) -> &TunnelEndpoint {
        &self.endpoint
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Removes the lock file. Safe to call more than once.
    pub fn release(&mut self) -> io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        release(&self.path)
    }
}

impl Drop for SingletonGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::error!(path = %self.path.display(), error = %e, "failed to remove lock file");
        }
    }
}

/// Writes `pid` into a freshly created lock file. A lock that could not be
/// written is removed again rather than left behind empty.
fn write_owner(path: &Path, mut file: File, pid: u32) -> io::Result<()> {
    let written = file.write_all(pid.to_string().as_bytes());
    if written.is_err() {
        drop(file);
        if let Err(e) = release(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove partial lock file");
        }
    }
    written
}

pub fn read_lock_file(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Reads the lock file and probes its owner without modifying anything.
pub fn inspect(path: &Path) -> io::Result<LockStatus> {
    let Some(content) = read_lock_file(path)? else {
        return Ok(LockStatus::Free);
    };
    let Ok(pid) = content.trim().parse::<u32>() else {
        return Ok(LockStatus::Unreadable(content));
    };
    if is_process_alive(pid) {
        Ok(LockStatus::Held(pid))
    } else {
        Ok(LockStatus::Stale(pid))
    }
}

/// Deletes the lock file; a missing file is not an error.
pub fn release(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Signal-0 liveness probe; nothing is delivered to the target.
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    match signal::kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        // Process exists but we lack permission to signal it
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}
