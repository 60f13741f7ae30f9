//! The PID file: a plain decimal process id.

use std::path::Path;

use crate::error::ProcessError;

/// Read the recorded pid. A missing or unparsable file reads as `None`.
pub fn read(path: &Path) -> Option<u32> {
    let contents = std::fs::read_to_string(path).ok()?;
    contents.trim().parse::<u32>().ok()
}

pub fn write(path: &Path, pid: u32) -> Result<(), ProcessError> {
    crate::persistence::atomic_write(path, pid.to_string().as_bytes())
        .map_err(|e| ProcessError::io("write PID file", path, e))
}

/// Delete the PID file. Missing files are fine; other failures are logged.
pub fn remove(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed PID file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove PID file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.pid");
        write(&path, 4242).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "4242");
        assert_eq!(read(&path), Some(4242));
    }

    #[test]
    fn test_garbage_and_missing_read_as_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.pid");
        assert_eq!(read(&path), None);
        std::fs::write(&path, "not-a-pid").unwrap();
        assert_eq!(read(&path), None);
        std::fs::write(&path, " 17\n").unwrap();
        assert_eq!(read(&path), Some(17));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.pid");
        std::fs::write(&path, "1").unwrap();
        remove(&path);
        remove(&path);
        assert!(!path.exists());
    }
}
