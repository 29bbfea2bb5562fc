//! Locating source images and giving them stable, unique names.

use anyhow::{anyhow, Context};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_IMAGE_SUFFIXES: [&str; 3] = [".png", ".tif", ".tiff"];

/// Parent levels tried before giving up on finding unique names.
const MAX_NAME_LEVELS: usize = 10;

/// Image files directly inside `dir` with one of `suffixes`, in natural order.
///
/// Suffix matching is case-insensitive.
pub fn collect_image_files(dir: impl AsRef<Path>, suffixes: &[&str]) -> crate::Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read input directory {}", dir.display()))?;

    let wanted: Vec<String> = suffixes.iter().map(|s| s.to_ascii_lowercase()).collect();
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if wanted.iter().any(|suffix| name.ends_with(suffix.as_str())) {
            files.push(path);
        }
    }

    files.sort_by(|a, b| natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()));
    debug!(dir = %dir.display(), count = files.len(), "Collected image files");
    Ok(files)
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Chunk {
    Number(u128),
    Text(String),
}

/// Split into alternating text and digit runs; text compares case-insensitively.
fn natural_key(text: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut in_digits = false;
    for ch in text.chars() {
        let is_digit = ch.is_ascii_digit();
        if !current.is_empty() && is_digit != in_digits {
            chunks.push(to_chunk(&current, in_digits));
            current.clear();
        }
        in_digits = is_digit;
        current.push(ch);
    }
    if !current.is_empty() {
        chunks.push(to_chunk(&current, in_digits));
    }
    chunks
}

fn to_chunk(run: &str, digits: bool) -> Chunk {
    match (digits, run.parse::<u128>()) {
        (true, Ok(n)) => Chunk::Number(n),
        _ => Chunk::Text(run.to_lowercase()),
    }
}

/// "Human" ordering: `img2` sorts before `img10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_key(a).cmp(&natural_key(b)).then_with(|| a.cmp(b))
}

/// Shortest trailing path components that tell every image apart.
///
/// Starts with bare file names and adds one parent directory at a time.
pub fn unique_names_from_paths(paths: &[PathBuf]) -> crate::Result<Vec<String>> {
    for level in 0..MAX_NAME_LEVELS {
        let names: Vec<String> = paths.iter().map(|p| trailing_components(p, level + 1)).collect();
        let distinct: HashSet<&String> = names.iter().collect();
        if distinct.len() == names.len() {
            return Ok(names);
        }
    }
    Err(anyhow!(
        "failed to find unique names for {} paths within {} parent levels",
        paths.len(),
        MAX_NAME_LEVELS
    ))
}

fn trailing_components(path: &Path, count: usize) -> String {
    let components: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .filter(|c| c != "/")
        .collect();
    let start = components.len().saturating_sub(count);
    components[start..].join("/")
}

/// Filesystem-safe artifact key for an image name.
pub fn artifact_key(name: &str) -> String {
    name.replace(['/', '\\'], "__")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_order() {
        let mut names = vec!["img10.png", "img2.png", "IMG1.png", "img2b.png"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["IMG1.png", "img2.png", "img2b.png", "img10.png"]);
    }

    #[test]
    fn test_unique_names_add_parents_only_when_needed() {
        let plain = vec![PathBuf::from("/data/a/m1.png"), PathBuf::from("/data/b/m2.png")];
        assert_eq!(unique_names_from_paths(&plain).unwrap(), vec!["m1.png", "m2.png"]);

        let clash = vec![
            PathBuf::from("/data/day1/mouse.png"),
            PathBuf::from("/data/day2/mouse.png"),
        ];
        assert_eq!(
            unique_names_from_paths(&clash).unwrap(),
            vec!["day1/mouse.png", "day2/mouse.png"]
        );
        assert_eq!(artifact_key("day1/mouse.png"), "day1__mouse.png");
    }

    #[test]
    fn test_duplicate_paths_cannot_be_named() {
        let dup = vec![PathBuf::from("/x/a.png"), PathBuf::from("/x/a.png")];
        assert!(unique_names_from_paths(&dup).is_err());
    }

    #[test]
    fn test_collect_filters_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b10.png", "b2.TIF", "notes.txt", "a.tiff"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let files = collect_image_files(dir.path(), &DEFAULT_IMAGE_SUFFIXES).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.tiff", "b2.TIF", "b10.png"]);
    }
}
