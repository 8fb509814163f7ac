//! Startup requirement validation for mempressure.
//!
//! The memory and CPU counters read every cycle are assumed to exist on any
//! supported kernel; their absence means the platform is unsupported.

use nix::unistd::geteuid;
use std::fs::File;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Pseudo-files every cycle depends on.
pub const REQUIRED_FILES: [&str; 4] = ["/proc/meminfo", "/proc/zoneinfo", "/proc/vmstat", "/proc/stat"];

/// Validate all runtime requirements
pub fn validate_requirements() -> Result<(), ValidationError> {
    info!("🔍 Validating runtime requirements...");

    check_user_privileges();
    for path in REQUIRED_FILES {
        check_readable(Path::new(path))?;
    }

    info!("✅ All runtime requirements validated");
    Ok(())
}

/// Registering cgroup notifications needs write access to cgroup.event_control
fn check_user_privileges() {
    if !geteuid().is_root() {
        warn!("⚠️  Not running as root - cgroup pressure notifications may not register");
    } else {
        debug!("Running as root (uid=0)");
    }
}

fn check_readable(path: &Path) -> Result<(), ValidationError> {
    match File::open(path) {
        Ok(_) => {
            debug!("{} is readable", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            error!("❌ Cannot read {} - insufficient permissions", path.display());
            Err(ValidationError::InsufficientPermissions(format!(
                "{}: {}",
                path.display(),
                e
            )))
        }
        Err(e) => {
            error!("❌ Cannot open {}: {}", path.display(), e);
            Err(ValidationError::MissingFile(path.display().to_string()))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Insufficient permissions: {0}")]
    InsufficientPermissions(String),

    #[error("Required kernel interface not available: {0}")]
    MissingFile(String),
}
