//! Chart archives (`.tgz`)
//!
//! A chart archive is a gzipped tarball whose entries all live under one
//! top-level directory named after the chart. Archives are read fully into
//! memory; nothing is unpacked to disk.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Component, Path};
use tar::{Archive, Builder, Header};

use crate::error::{CoreError, Result};

/// Files of an archive keyed by chart-relative path (`/` separated)
pub type ArchiveFiles = BTreeMap<String, Vec<u8>>;

/// Whether a path looks like a chart archive
pub fn is_chart_archive(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.ends_with(".tgz") || name.ends_with(".tar.gz")
}

/// Read an archive from disk
pub fn read_archive_file(path: &Path) -> Result<ArchiveFiles> {
    let bytes = std::fs::read(path)?;
    read_archive(&bytes)
}

/// Read all regular files of an archive, stripping the top-level directory
pub fn read_archive(bytes: &[u8]) -> Result<ArchiveFiles> {
    let mut archive = Archive::new(GzDecoder::new(bytes));
    let mut files = BTreeMap::new();
    let mut top_level: Option<String> = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry.path()?.into_owned();
        let mut components = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => components.push(part.to_string_lossy().to_string()),
                Component::CurDir => {}
                _ => {
                    return Err(CoreError::Archive {
                        message: format!("illegal path in archive: {}", path.display()),
                    });
                }
            }
        }

        if components.len() < 2 {
            return Err(CoreError::Archive {
                message: format!(
                    "archive entry '{}' is not inside a chart directory",
                    path.display()
                ),
            });
        }

        let root = components.remove(0);
        match &top_level {
            Some(existing) if *existing != root => {
                return Err(CoreError::Archive {
                    message: format!(
                        "archive has more than one top-level directory ('{}' and '{}')",
                        existing, root
                    ),
                });
            }
            Some(_) => {}
            None => top_level = Some(root),
        }

        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        files.insert(components.join("/"), data);
    }

    if files.is_empty() {
        return Err(CoreError::Archive {
            message: "archive contains no files".to_string(),
        });
    }

    Ok(files)
}

/// Package a chart directory into archive bytes under `<name>/`
pub fn pack_directory(dir: &Path, name: &str) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);

    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| CoreError::Archive {
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| CoreError::Archive {
                message: e.to_string(),
            })?;
        let data = std::fs::read(entry.path())?;

        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, Path::new(name).join(relative), data.as_slice())?;
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}
