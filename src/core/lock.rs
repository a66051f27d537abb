//! Host-wide exclusive lock guarding one full pipeline run at a time.
//!
//! OS advisory locking (flock) on a lock file carrying the holder's
//! decimal pid, with stale-holder reclamation: a holder older than the
//! configured kill timeout is forcibly terminated and the lock retaken.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, warn};

const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another collection run holds the lock at {path}")]
    Busy { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Held for the duration of one collection cycle.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
    owner_pid: u32,
}

impl RunLock {
    /// Acquire the lock, retrying with linear backoff (bounded, five
    /// attempts). A holder whose process is older than `kill_timeout` is
    /// sent SIGKILL; once it is gone the acquisition is retried.
    pub fn acquire(
        path: &Path,
        kill_timeout: Duration,
        retry_delay: Duration,
    ) -> Result<Self, LockError> {
        for attempt in 1..=MAX_ATTEMPTS {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)?;

            match file.try_lock_exclusive() {
                Ok(()) => {
                    let pid = std::process::id();
                    file.set_len(0)?;
                    file.seek(SeekFrom::Start(0))?;
                    write!(file, "{pid}")?;
                    file.sync_all()?;
                    debug!(pid, lock = %path.display(), "Lock acquired");
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                        owner_pid: pid,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    let mut contents = String::new();
                    let _ = file.read_to_string(&mut contents);

                    if let Ok(holder) = contents.trim().parse::<i32>() {
                        if let Some(age) = process_age(holder) {
                            if age > kill_timeout {
                                warn!(
                                    holder,
                                    age_secs = age.as_secs(),
                                    "Reclaiming lock from stale holder"
                                );
                                let target = Pid::from_raw(holder);
                                let _ = kill(target, Signal::SIGKILL);
                                // The kernel releases the dead holder's
                                // flock only once teardown finishes.
                                wait_for_exit(target);
                                continue;
                            }
                            debug!(holder, age_secs = age.as_secs(), "Lock held by live run");
                        }
                    }

                    if attempt < MAX_ATTEMPTS {
                        std::thread::sleep(retry_delay * attempt);
                    }
                }
                Err(e) => return Err(LockError::Io(e)),
            }
        }

        Err(LockError::Busy {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // A forked child that inherited the descriptor must not delete a
        // lock it does not own.
        if std::process::id() != self.owner_pid {
            return;
        }
        let _ = FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Bounded wait for a killed process to disappear (signal 0 check). A
/// holder reaped by someone else vanishes quickly; an unreaped zombie
/// exhausts the bound, but its flock is already released by then and the
/// next acquisition attempt takes it.
fn wait_for_exit(pid: Pid) {
    for _ in 0..50 {
        if kill(pid, None).is_err() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Age of a process, from its kernel-exposed start time.
fn process_age(pid: i32) -> Option<Duration> {
    let starttime_ticks = read_proc_start_time(pid)?;
    let uptime = std::fs::read_to_string("/proc/uptime").ok()?;
    let uptime_secs: f64 = uptime.split_whitespace().next()?.parse().ok()?;

    // starttime is in USER_HZ ticks since boot; Linux fixes USER_HZ at 100
    // regardless of the kernel tick rate.
    const USER_HZ: f64 = 100.0;
    let age = uptime_secs - starttime_ticks as f64 / USER_HZ;
    (age >= 0.0).then(|| Duration::from_secs_f64(age))
}

/// Field 22 (starttime) of `/proc/<pid>/stat`.
///
/// Field 2 (comm) may contain spaces and parens, so parsing starts after
/// the last `)` in the line.
fn read_proc_start_time(pid: i32) -> Option<u64> {
    let contents = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let after_comm = contents.rsplit_once(')')?.1;
    let tokens: Vec<&str> = after_comm.split_whitespace().collect();
    // Fields after comm start at field 3; index 19 is field 22.
    tokens.get(19)?.parse().ok()
}
