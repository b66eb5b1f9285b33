//! Daemon discovery: the published record of a running instance.
//!
//! Hook invocations are independent short-lived processes; they find the
//! daemon through a JSON file at a well-known per-user path. The file is
//! written atomically after the daemon reaches `Ready` and removed on
//! shutdown, so its presence doubles as the readiness signal.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Contents of the discovery file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DaemonInfo {
    pub socket_path: PathBuf,
    pub pid: u32,
}

impl DaemonInfo {
    /// Write the discovery file atomically (temp file + rename) so a
    /// concurrent reader never observes a partial record.
    pub fn publish(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize daemon info")?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to publish {}", path.display()))?;
        tracing::debug!("Published daemon info at {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("No daemon info at {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Malformed daemon info at {}", path.display()))
    }

    /// Remove the discovery file. Missing files are fine, shutdown paths
    /// may race.
    pub fn unpublish(path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!("Removed daemon info at {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {e}", path.display()),
        }
    }
}

/// Default per-user socket path: `/tmp/diagd-{uid}.sock`.
pub fn default_socket_path() -> Result<PathBuf> {
    per_user_path("sock")
}

/// Default per-user discovery file path: `/tmp/diagd-{uid}.json`.
pub fn default_info_path() -> Result<PathBuf> {
    per_user_path("json")
}

fn per_user_path(extension: &str) -> Result<PathBuf> {
    #[cfg(unix)]
    {
        // Per-uid paths keep daemons of different users from colliding.
        #[allow(unsafe_code)]
        let uid = unsafe { libc::getuid() };
        Ok(PathBuf::from("/tmp").join(format!("diagd-{uid}.{extension}")))
    }

    #[cfg(not(unix))]
    {
        let _ = extension;
        anyhow::bail!("diagd is only supported on Unix systems")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_load_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let info_path = dir.path().join("daemon.json");

        let info = DaemonInfo { socket_path: PathBuf::from("/tmp/d.sock"), pid: 4242 };
        info.publish(&info_path).expect("publish");

        let loaded = DaemonInfo::load(&info_path).expect("load");
        assert_eq!(loaded, info);

        // No stray temp file left behind.
        assert!(!info_path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_wire_format_uses_camel_case() {
        let info = DaemonInfo { socket_path: PathBuf::from("/tmp/d.sock"), pid: 1 };
        let json = serde_json::to_string(&info).expect("serialize");
        assert!(json.contains("\"socketPath\""));
        assert!(json.contains("\"pid\""));
    }

    #[test]
    fn test_unpublish_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let info_path = dir.path().join("daemon.json");

        let info = DaemonInfo { socket_path: PathBuf::from("/tmp/d.sock"), pid: 1 };
        info.publish(&info_path).expect("publish");

        DaemonInfo::unpublish(&info_path);
        assert!(!info_path.exists());
        // Second removal must not panic or warn loudly.
        DaemonInfo::unpublish(&info_path);
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(DaemonInfo::load(Path::new("/nonexistent/daemon.json")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_default_paths_contain_uid() {
        #[allow(unsafe_code)]
        let uid = unsafe { libc::getuid() };
        let socket = default_socket_path().expect("socket path");
        assert!(socket.to_string_lossy().contains(&uid.to_string()));
        assert!(socket.to_string_lossy().ends_with(".sock"));
        let info = default_info_path().expect("info path");
        assert!(info.to_string_lossy().ends_with(".json"));
    }
}
