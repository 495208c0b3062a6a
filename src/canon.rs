//! Path canonicalization for target names.
//!
//! Target names are either filesystem paths, which are resolved to absolute
//! real paths so that every spelling of a file maps to one name, or synthetic
//! names (starting with `!`) that are used verbatim, e.g. for action targets
//! that don't produce a file.

use anyhow::anyhow;
use std::path::{Path, PathBuf};

/// Names starting with this character are not filesystem paths.
pub const SYNTHETIC_PREFIX: char = '!';

pub fn is_synthetic(name: &str) -> bool {
    name.starts_with(SYNTHETIC_PREFIX)
}

fn path_to_string(path: PathBuf) -> anyhow::Result<String> {
    path.into_os_string()
        .into_string()
        .map_err(|path| anyhow!("non-utf8 path {:?}", path))
}

/// Split "foo/bar/baz" into ("foo/bar", "baz").  A bare file name is
/// relative to the current directory.
fn split_dir_file(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        None => (".", path),
        Some(0) => ("/", &path[1..]),
        Some(pos) => (&path[..pos], &path[pos + 1..]),
    }
}

/// Resolve a path to an absolute real path, following symlinks.
///
/// A path that doesn't exist yet (typically an output that hasn't been built)
/// is resolved through its parent directory, which must exist; the file
/// component is then appended as-is.
pub fn canon_path(path: &str) -> anyhow::Result<String> {
    if is_synthetic(path) {
        return Ok(path.to_owned());
    }
    if let Ok(real) = std::fs::canonicalize(path) {
        return path_to_string(real);
    }

    let (dir, file) = split_dir_file(path);
    let real_dir = std::fs::canonicalize(dir)
        .map_err(|err| anyhow!("canonicalize {:?}: {}: {}", path, dir, err))?;
    if file.is_empty() {
        return path_to_string(real_dir);
    }
    path_to_string(Path::new(&real_dir).join(file))
}
