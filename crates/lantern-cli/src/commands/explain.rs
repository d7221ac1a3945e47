//! Explain files and directories.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use lantern_ai::{AIError, LocalAIError, Stage};

use crate::manifest;
use crate::session::{report, Session};

/// Bytes read from a file before it is handed to the prompt builder, which
/// truncates further.
const READ_LIMIT: u64 = 64 * 1024;

/// What gets sent for one path.
enum Input {
    File(String),
    Directory(String),
}

pub(crate) fn run(paths: &[PathBuf]) -> miette::Result<()> {
    let mut session = Session::new()?;
    let mut tickets = Vec::with_capacity(paths.len());

    for path in paths {
        let router = session.router().clone();
        let path = path.clone();
        let target = path.display().to_string();

        let ticket = session.submit(&target, move |reporter| async move {
            let read_path = path.clone();
            let input = tokio::task::spawn_blocking(move || read_input(&read_path))
                .await
                .map_err(|e| AIError::Worker(e.to_string()))?
                .map_err(|e| AIError::Local(LocalAIError::from(e)))?;
            reporter.stage(Stage::Prepared);

            reporter.stage(Stage::Running);
            let text = match input {
                Input::File(content) => router.explain_file(&path, &content).await?,
                Input::Directory(listing) => router.explain_directory(&path, &listing).await?,
            };

            reporter.stage(Stage::Formatting);
            Ok(text.trim().to_string())
        })?;
        tickets.push(ticket);
    }

    let outcomes = session.wait(&tickets);
    report(outcomes, paths.len() > 1)
}

fn read_input(path: &Path) -> std::io::Result<Input> {
    if path.is_dir() {
        return manifest::build(path, manifest::MAX_ENTRIES).map(Input::Directory);
    }

    let mut bytes = Vec::new();
    File::open(path)?.take(READ_LIMIT).read_to_end(&mut bytes)?;
    Ok(Input::File(String::from_utf8_lossy(&bytes).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_directory_becomes_manifest() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("hosts"), "127.0.0.1 localhost").unwrap();

        match read_input(dir.path()).unwrap() {
            Input::Directory(listing) => assert_eq!(listing, "      hosts"),
            Input::File(_) => panic!("expected a directory listing"),
        }
    }

    #[test]
    fn test_binary_file_is_read_lossily() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, [0x66, 0x6f, 0xff, 0x6f]).unwrap();

        match read_input(&path).unwrap() {
            Input::File(content) => assert_eq!(content, "fo\u{fffd}o"),
            Input::Directory(_) => panic!("expected file content"),
        }
    }

    #[test]
    fn test_large_file_is_capped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.log");
        std::fs::write(&path, "a".repeat(READ_LIMIT as usize * 2)).unwrap();

        match read_input(&path).unwrap() {
            Input::File(content) => assert_eq!(content.len(), READ_LIMIT as usize),
            Input::Directory(_) => panic!("expected file content"),
        }
    }

    #[test]
    fn test_missing_path_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(read_input(&dir.path().join("missing")).is_err());
    }
}
