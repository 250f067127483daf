//! Bundle manifests: one file per bundle listing its resolved inputs.

use super::bundle::Bundles;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Write `<dir>/<bundle>.manifest` for every resolved bundle.
///
/// Each manifest holds the bundle's input paths, one per line. Returns the
/// manifests written, in bundle order.
pub fn write_manifests(bundles: &Bundles, dir: &Path) -> io::Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;

    let mut written = Vec::new();
    for bundle in bundles.iter() {
        let path = dir.join(format!("{}.manifest", bundle.name));
        let contents = bundle
            .files
            .iter()
            .map(|f| f.file_path.to_string_lossy())
            .collect::<Vec<_>>()
            .join("\n");
        fs::write(&path, contents)?;
        written.push(path);
    }
    Ok(written)
}
