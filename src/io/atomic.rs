use std::io::{BufWriter, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{ImageError, Result};

/// Write a file through a temporary sibling that is renamed over `path`.
///
/// Readers that mapped the previous file keep seeing its old contents.
pub fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> std::io::Result<()>,
{
    let display = path.display().to_string();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let temp = NamedTempFile::new_in(dir).map_err(|e| ImageError::io(&display, e))?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        write(&mut writer).map_err(|e| ImageError::io(&display, e))?;
        writer.flush().map_err(|e| ImageError::io(&display, e))?;
    }
    temp.persist(path)
        .map_err(|e| ImageError::io(&display, e.error))?;
    Ok(())
}
