use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Mode for files this tool creates: owner read/write only.
pub const PRIVATE_FILE_MODE: u32 = 0o600;

/// Write `contents` to `path`, replacing what is there.
///
/// An existing file keeps its permission mode; a new file is created with
/// [`PRIVATE_FILE_MODE`].
#[cfg(unix)]
pub fn write_preserving_mode(path: &Path, contents: &[u8]) -> io::Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let existing_mode = fs::metadata(path).ok().map(|m| m.permissions().mode());
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(existing_mode.unwrap_or(PRIVATE_FILE_MODE))
        .open(path)?;
    file.write_all(contents)?;
    file.flush()
}

#[cfg(not(unix))]
pub fn write_preserving_mode(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(contents)?;
    file.flush()
}

/// Create a directory (and parents) readable only by the owner.
#[cfg(unix)]
pub fn create_private_dir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
}

#[cfg(not(unix))]
pub fn create_private_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

/// Remove a file, treating "already gone" as success. Returns whether a file
/// was removed.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}
