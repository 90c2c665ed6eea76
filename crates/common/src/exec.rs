//! Executable lookup.

use std::path::{Path, PathBuf};

/// Resolve an executable the way a shell would.
///
/// Names containing a path separator are checked directly; bare names are
/// searched for in `PATH`.
pub fn find_executable(binary: &str) -> Option<PathBuf> {
    if binary.is_empty() {
        return None;
    }

    if binary.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(binary);
        return is_executable(&path).then_some(path);
    }

    let search_path = std::env::var_os("PATH")?;
    std::env::split_paths(&search_path)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}
