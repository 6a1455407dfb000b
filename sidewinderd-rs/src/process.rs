/* Process lifecycle: daemonizing, single-instance PID file, privilege drop
 * and the per-user work directory holding the macros. */

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use nix::sys::signal::kill;
use nix::unistd::{Pid, User, getpid, getuid, setgid, setuid};
use tracing::{debug, info, warn};

const WORKDIR_NAME: &str = ".sidewinderd";

/* Detach from the terminal. Must run before any thread is spawned. */
pub fn daemonize() -> Result<()> {
    nix::unistd::daemon(true, false).context("daemon() failed")
}

/* Exclusive PID file, removed again on drop. */
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /* Fails if another live instance holds `path`. A stale file left by a */
    /* dead process is replaced. */
    pub fn create(path: &Path) -> Result<Self> {
        match Self::create_new(path) {
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if let Some(pid) = read_pid(path) {
                    if kill(pid, None).is_ok() {
                        bail!("sidewinderd is already running (pid {pid})");
                    }
                }
                debug!("Removing stale PID file {}", path.display());
                fs::remove_file(path)
                    .with_context(|| format!("Removing stale {}", path.display()))?;
                Self::create_new(path)
            }
            other => other,
        }
        .with_context(|| format!("Creating PID file {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    fn create_new(path: &Path) -> std::io::Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(file, "{}", getpid())
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove PID file {}: {e}", self.path.display());
        }
    }
}

fn read_pid(path: &Path) -> Option<Pid> {
    let text = fs::read_to_string(path).ok()?;
    let raw: i32 = text.trim().parse().ok()?;
    (raw > 0).then(|| Pid::from_raw(raw))
}

/* Switch group and user to `name`. Returns the account the daemon runs as */
/* afterwards; failing to switch is logged and leaves the current one. */
pub fn apply_user(name: &str) -> Result<User> {
    let current = User::from_uid(getuid())
        .context("Looking up current user")?
        .context("Current user has no passwd entry")?;

    let target = match User::from_name(name) {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!("Unknown user {name}, staying {}", current.name);
            return Ok(current);
        }
        Err(e) => {
            warn!("Looking up user {name} failed: {e}, staying {}", current.name);
            return Ok(current);
        }
    };

    if target.uid == current.uid {
        return Ok(current);
    }

    if let Err(e) = setgid(target.gid).and_then(|()| setuid(target.uid)) {
        warn!("Cannot switch to user {name}: {e}, staying {}", current.name);
        return Ok(current);
    }

    info!("Running as user {}", target.name);
    Ok(target)
}

/* `~/.sidewinderd` of `user`, created if missing. */
pub fn create_workdir(user: &User) -> Result<PathBuf> {
    let workdir = user.dir.join(WORKDIR_NAME);
    fs::create_dir_all(&workdir)
        .with_context(|| format!("Creating work directory {}", workdir.display()))?;
    Ok(workdir)
}
