//! Textual directory manifests sent to the model instead of raw content.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

/// Entries listed before the manifest is cut off.
pub const MAX_ENTRIES: usize = 256;

/// List `root` and its subdirectories, one entry per line.
///
/// Each directory's own entries are listed (directories first, then files,
/// each sorted by name) before descending into its subdirectories. Paths
/// are relative to `root`. Unreadable subdirectories are skipped.
pub fn build(root: &Path, max_entries: usize) -> io::Result<String> {
    let mut lines = Vec::new();
    let mut pending: Vec<PathBuf> = vec![PathBuf::new()];

    while let Some(rel_dir) = pending.pop() {
        let (dirs, files) = match list_dir(&root.join(&rel_dir)) {
            Ok(entries) => entries,
            Err(e) if rel_dir.as_os_str().is_empty() => return Err(e),
            Err(e) => {
                debug!("Skipping {:?} in manifest: {}", rel_dir, e);
                continue;
            }
        };

        for name in &dirs {
            if lines.len() >= max_entries {
                break;
            }
            lines.push(format!("[DIR]  {}", rel_dir.join(name).display()));
        }
        for name in &files {
            if lines.len() >= max_entries {
                break;
            }
            lines.push(format!("      {}", rel_dir.join(name).display()));
        }

        if lines.len() >= max_entries {
            lines.push(format!("... (truncated after {} entries)", max_entries));
            break;
        }
        pending.extend(dirs.iter().rev().map(|d| rel_dir.join(d)));
    }

    if lines.is_empty() {
        return Ok("(directory is empty)".to_string());
    }
    Ok(lines.join("\n"))
}

/// Sorted names of the subdirectories and files directly inside `dir`.
fn list_dir(dir: &Path) -> io::Result<(Vec<String>, Vec<String>)> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::from)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().is_dir() {
            dirs.push(name);
        } else {
            files.push(name);
        }
    }
    Ok((dirs, files))
}
