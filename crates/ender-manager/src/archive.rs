//! Zip packing and hardened extraction
//!
//! Backups archive a working tree with entry names relative to it; restore
//! and provisioning extract archives with a path-escape check on every entry
//! so a crafted name can never write outside the destination.

use std::fs;
use std::io;
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{ManagerError, Result};
use crate::provision::safe_join;

/// Zip the contents of `src` into `archive_path`. Entry names are relative
/// to `src`; directories get explicit entries. A failed walk removes the
/// partial archive.
pub fn pack_dir(src: &Path, archive_path: &Path) -> Result<()> {
    let file = fs::File::create(archive_path)?;
    let mut writer = ZipWriter::new(file);

    match add_tree(&mut writer, src) {
        Ok(()) => {
            writer.finish()?;
            Ok(())
        }
        Err(e) => {
            drop(writer);
            if let Err(remove_err) = fs::remove_file(archive_path) {
                tracing::warn!(path = %archive_path.display(), error = %remove_err,
                    "failed to remove partial archive");
            }
            Err(e)
        }
    }
}

fn add_tree(writer: &mut ZipWriter<fs::File>, src: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| ManagerError::Internal(e.to_string()))?;
        let path = entry.path();
        if path == src {
            continue;
        }

        let rel = path
            .strip_prefix(src)
            .map_err(|e| ManagerError::Internal(e.to_string()))?
            .to_string_lossy()
            .replace('\\', "/");

        let mut options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            options = options.unix_permissions(entry.metadata().map(|m| m.permissions().mode()).unwrap_or(0o644));
        }

        if entry.file_type().is_dir() {
            writer.add_directory(format!("{rel}/"), options)?;
        } else {
            writer.start_file(rel, options)?;
            let mut file = fs::File::open(path)?;
            io::copy(&mut file, writer)?;
        }
    }
    Ok(())
}

/// Extract `archive_path` into `dest`. Every entry's destination is checked
/// to stay under `dest`; permissions are preserved. Partial writes remain on
/// failure — callers retry or re-provision.
pub fn unpack_into(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = fs::File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();

        let out_path = safe_join(dest, &name)
            .map_err(|_| ManagerError::InvalidInput(format!("invalid file path in zip: {name}")))?;
        if !out_path.starts_with(dest) {
            return Err(ManagerError::InvalidInput(format!(
                "invalid file path in zip: {name}"
            )));
        }

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out_file = fs::File::create(&out_path)?;
        io::copy(&mut entry, &mut out_file)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out_path, fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn build_tree(root: &Path) {
        fs::create_dir_all(root.join("world/region")).unwrap();
        fs::write(root.join("server.jar"), b"jar bytes").unwrap();
        fs::write(root.join("world/level.dat"), b"level data").unwrap();
        fs::write(root.join("world/region/r.0.0.mca"), b"region data").unwrap();
        fs::write(root.join("eula.txt"), b"eula=true\n").unwrap();
    }

    fn read_tree(root: &Path) -> Vec<(String, Vec<u8>)> {
        let mut files: Vec<(String, Vec<u8>)> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = e.path().strip_prefix(root).unwrap().to_string_lossy().into_owned();
                (rel, fs::read(e.path()).unwrap())
            })
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        let src = TempDir::new().unwrap();
        build_tree(src.path());

        let archive_dir = TempDir::new().unwrap();
        let archive = archive_dir.path().join("backup.zip");
        pack_dir(src.path(), &archive).unwrap();

        let dest = TempDir::new().unwrap();
        unpack_into(&archive, dest.path()).unwrap();

        assert_eq!(read_tree(src.path()), read_tree(dest.path()));
    }

    #[test]
    fn test_pack_missing_source_removes_partial() {
        let archive_dir = TempDir::new().unwrap();
        let archive = archive_dir.path().join("backup.zip");

        let result = pack_dir(Path::new("/definitely/not/here"), &archive);
        assert!(result.is_err());
        assert!(!archive.exists());
    }

    #[test]
    fn test_unpack_rejects_zip_slip() {
        let archive_dir = TempDir::new().unwrap();
        let archive = archive_dir.path().join("evil.zip");

        // Hand-craft an archive with an escaping entry name.
        let file = fs::File::create(&archive).unwrap();
        let mut writer = ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        writer.start_file("../evil", options).unwrap();
        use std::io::Write;
        writer.write_all(b"pwned").unwrap();
        writer.finish().unwrap();

        let dest = TempDir::new().unwrap();
        let result = unpack_into(&archive, dest.path());
        assert!(matches!(result, Err(ManagerError::InvalidInput(_))));
        assert!(!dest.path().parent().unwrap().join("evil").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_unpack_preserves_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let src = TempDir::new().unwrap();
        fs::write(src.path().join("start.sh"), b"#!/bin/sh\n").unwrap();
        fs::set_permissions(
            src.path().join("start.sh"),
            fs::Permissions::from_mode(0o755),
        )
        .unwrap();

        let archive_dir = TempDir::new().unwrap();
        let archive = archive_dir.path().join("a.zip");
        pack_dir(src.path(), &archive).unwrap();

        let dest = TempDir::new().unwrap();
        unpack_into(&archive, dest.path()).unwrap();

        let mode = fs::metadata(dest.path().join("start.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o755, 0o755);
    }
}
