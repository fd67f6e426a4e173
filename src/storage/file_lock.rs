use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use crate::core::error::{Error, ErrorKind, LockFailure, Result};

/// Single writer guarantee
pub struct FileLock {
    pub file: File,
    pub path: PathBuf,
}

impl FileLock {
    /// Take an exclusive, non-blocking advisory lock on `path`.
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) => return Err(lock_error(Self::classify(e.raw_os_error()), &path)),
        };

        Self::try_lock(&file).map_err(|reason| lock_error(reason, &path))?;

        // Holder's pid, for whoever finds the lock taken
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        debug!(path = %path.display(), "acquired writer lock");
        Ok(FileLock { file, path })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> std::result::Result<(), LockFailure> {
        use std::os::unix::io::AsRawFd;
        use libc::{flock, LOCK_EX, LOCK_NB};

        let fd = file.as_raw_fd();
        let rc = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
        if rc != 0 {
            let errno = std::io::Error::last_os_error().raw_os_error();
            return Err(Self::classify(errno));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock(_file: &File) -> std::result::Result<(), LockFailure> {
        Err(LockFailure::Unsupported)
    }

    fn classify(errno: Option<i32>) -> LockFailure {
        match errno {
            #[cfg(unix)]
            Some(libc::EWOULDBLOCK) => LockFailure::InUse,
            #[cfg(unix)]
            Some(libc::ENOLCK) | Some(libc::EOPNOTSUPP) | Some(libc::EINVAL) => LockFailure::Unsupported,
            #[cfg(unix)]
            Some(libc::EMFILE) | Some(libc::ENFILE) => LockFailure::FdLimit,
            _ => LockFailure::Unknown,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn lock_error(reason: LockFailure, path: &Path) -> Error {
    Error::new(
        ErrorKind::DatabaseLock(reason),
        format!("Unable to lock {}: {}", path.display(), reason),
    )
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            use libc::{flock, LOCK_UN};

            let fd = self.file.as_raw_fd();
            unsafe {
                flock(fd, LOCK_UN);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_lock_is_in_use() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.lock");

        let first = FileLock::acquire(&path).unwrap();
        let err = FileLock::acquire(&path).err().unwrap();
        assert_eq!(err.kind, ErrorKind::DatabaseLock(LockFailure::InUse));

        drop(first);
        assert!(FileLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_lock_records_pid() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileLock::acquire(dir.path().join("pid.lock")).unwrap();
        let content = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }
}
