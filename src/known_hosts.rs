use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::Path;
use tracing::info;

use crate::util::fs::write_preserving_mode;

fn read_lines(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("Failed to read {:?}", path)),
    }
}

/// Append `entries` that are not already in the file. Returns the lines
/// actually added, which are the ones cleanup should take out again.
pub fn add_known_hosts(path: &Path, entries: &[String]) -> Result<Vec<String>> {
    let mut contents = read_lines(path)?.unwrap_or_default();
    let mut added = Vec::new();

    for entry in entries.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
        let present = contents.lines().any(|line| line.trim() == entry);
        if present || added.iter().any(|a| a == entry) {
            continue;
        }
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        contents.push_str(entry);
        contents.push('\n');
        added.push(entry.to_string());
    }

    if !added.is_empty() {
        write_preserving_mode(path, contents.as_bytes())
            .with_context(|| format!("Failed to write {:?}", path))?;
        info!("added {} known host(s) to {:?}", added.len(), path);
    }
    Ok(added)
}

/// Remove one occurrence of each of `entries`. Returns how many lines went.
pub fn remove_known_hosts(path: &Path, entries: &[String]) -> Result<usize> {
    let Some(contents) = read_lines(path)? else {
        return Ok(0);
    };

    let mut pending: Vec<&str> = entries.iter().map(|e| e.trim()).collect();
    let mut kept = String::with_capacity(contents.len());
    for line in contents.split_inclusive('\n') {
        match pending.iter().position(|entry| *entry == line.trim()) {
            Some(index) => {
                pending.swap_remove(index);
            }
            None => kept.push_str(line),
        }
    }

    let removed = entries.len() - pending.len();
    if removed > 0 {
        write_preserving_mode(path, kept.as_bytes())
            .with_context(|| format!("Failed to write {:?}", path))?;
    }
    Ok(removed)
}
