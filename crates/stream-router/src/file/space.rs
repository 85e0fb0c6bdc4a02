//! Free-space probes for the file sink

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Reports how many bytes can still be written under a directory
pub trait DiskSpace: Send + Sync {
    /// Bytes available to an unprivileged writer
    fn available(&self, dir: &Path) -> io::Result<u64>;

    /// Account for bytes the sink just wrote
    fn record_write(&self, _bytes: u64) {}
}

/// Queries the filesystem holding the directory
#[derive(Debug, Default, Clone, Copy)]
pub struct FilesystemSpace;

#[cfg(unix)]
impl DiskSpace for FilesystemSpace {
    fn available(&self, dir: &Path) -> io::Result<u64> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(dir.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        // SAFETY: statvfs is plain old data and c_path is a valid NUL-terminated string
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        #[allow(clippy::unnecessary_cast)]
        Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
    }
}

#[cfg(not(unix))]
impl DiskSpace for FilesystemSpace {
    fn available(&self, _dir: &Path) -> io::Result<u64> {
        Ok(u64::MAX)
    }
}

/// Fixed byte budget, used in place of a real filesystem in tests
#[derive(Debug)]
pub struct FixedBudget {
    remaining: AtomicU64,
}

impl FixedBudget {
    pub fn new(bytes: u64) -> Self {
        Self {
            remaining: AtomicU64::new(bytes),
        }
    }
}

impl DiskSpace for FixedBudget {
    fn available(&self, _dir: &Path) -> io::Result<u64> {
        Ok(self.remaining.load(Ordering::Acquire))
    }

    fn record_write(&self, bytes: u64) {
        let _ = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| {
                Some(r.saturating_sub(bytes))
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_budget_counts_down() {
        let budget = FixedBudget::new(100);
        budget.record_write(60);
        assert_eq!(budget.available(Path::new("/")).unwrap(), 40);
        budget.record_write(60);
        assert_eq!(budget.available(Path::new("/")).unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_filesystem_space_reports_something() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FilesystemSpace.available(dir.path()).unwrap() > 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_directory_is_an_error() {
        assert!(FilesystemSpace
            .available(Path::new("/definitely/not/here"))
            .is_err());
    }
}
