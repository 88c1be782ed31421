use std::path::Path;

use crate::TransferError;

/// Checks that `path` names a readable regular file and returns its size.
///
/// Rejects:
/// - Empty paths
/// - Missing files
/// - Directories and other non-regular files
pub fn validate_source_file(path: &Path) -> Result<u64, TransferError> {
    if path.as_os_str().is_empty() {
        return Err(TransferError::InvalidSource("empty path".into()));
    }

    let metadata = std::fs::metadata(path).map_err(|e| {
        TransferError::InvalidSource(format!("{}: {e}", path.display()))
    })?;

    if !metadata.is_file() {
        return Err(TransferError::InvalidSource(format!(
            "not a regular file: {}",
            path.display()
        )));
    }

    // Opening catches permission problems before any network activity.
    std::fs::File::open(path)?;

    Ok(metadata.len())
}
