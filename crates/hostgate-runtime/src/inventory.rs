use crate::RuntimeError;
use chrono::{DateTime, Local};
use hostgate_schema::RegistrationRequest;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// `<id>__<hostname>__<address>.txt`
pub fn inventory_file_name(req: &RegistrationRequest) -> String {
    format!("{}__{}__{}.txt", req.id, req.hostname, req.address)
}

/// Ansible INI inventory with a single group holding the target address.
pub fn inventory_contents(group: &str, address: &str) -> String {
    format!("[{group}]\n{address}\n")
}

/// Write the inventory for `req` into `log_dir`, replacing any file left by
/// an earlier attempt. The file is written to a temporary name and renamed
/// into place.
pub fn write_inventory(log_dir: &Path, req: &RegistrationRequest) -> Result<PathBuf, RuntimeError> {
    let path = log_dir.join(inventory_file_name(req));
    let artifact_err = |source| RuntimeError::Artifact {
        path: path.clone(),
        source,
    };

    fs::create_dir_all(log_dir).map_err(artifact_err)?;
    let mut tmp = NamedTempFile::new_in(log_dir).map_err(artifact_err)?;
    tmp.write_all(inventory_contents(&req.group(), &req.address).as_bytes())
        .map_err(artifact_err)?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(0o644))
        .map_err(artifact_err)?;
    tmp.persist(&path).map_err(|e| artifact_err(e.error))?;
    Ok(path)
}

/// Log file for the playbook run: the inventory name without `.txt`, plus a
/// microsecond timestamp.
pub fn playbook_log_path(inventory: &Path, at: DateTime<Local>) -> PathBuf {
    let base = inventory.to_string_lossy();
    let base = base.strip_suffix(".txt").unwrap_or(&base);
    PathBuf::from(format!(
        "{base}__{}.log",
        at.format("%Y-%m-%d_%H:%M:%S%.6f")
    ))
}
