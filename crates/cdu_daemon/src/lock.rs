use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::DaemonError;

/// Advisory exclusive lock on a file under the config directory, held for
/// the lifetime of the process. Grounded in the original program's
/// `portalocker`-based single-instance guard (`main.py::is_already_running_with_lock`);
/// `fs2::FileExt::try_lock_exclusive` is the conventional Rust equivalent.
pub struct InstanceLock {
    path: PathBuf,
    file: File,
}

impl InstanceLock {
    pub fn acquire(config_dir: &Path) -> Result<Self, DaemonError> {
        let path = config_dir.join("cdu_daemon.lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|source| DaemonError::LockIo { path: path.clone(), source })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { path, file }),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                Err(DaemonError::AlreadyRunning { path })
            }
            Err(source) => Err(DaemonError::LockIo { path, source }),
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            log::warn!("failed to release instance lock {:?}: {e}", self.path);
        }
    }
}
