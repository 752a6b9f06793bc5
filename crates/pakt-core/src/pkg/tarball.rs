//! Tarball extraction.
//!
//! Archives are streamed: gzip is decoded on the fly and tar entries are
//! processed one by one. Every entry name goes through the strategy's mapper
//! and must land strictly inside the destination directory; anything else
//! aborts the extraction.

use super::error::PkgError;
use super::strategy::InstallationStrategy;
use flate2::read::GzDecoder;
use pakt_util::fs::{is_plain_relative, is_strict_descendant};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::trace;

/// Counts from one extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub dirs: usize,
    /// Entries filtered out, unmapped, or of an unsupported type (links, devices).
    pub skipped: usize,
}

/// Extract a `.tgz` file into `dest` using the strategy's entry mapper.
///
/// # Errors
/// `PKG_ARCHIVE_INVALID` for a corrupt archive or an entry escaping `dest`,
/// `PKG_EXTRACT_FAILED` when the destination cannot be written.
pub fn extract_tarball(
    tarball: &Path,
    dest: &Path,
    strategy: &InstallationStrategy,
) -> Result<ExtractSummary, PkgError> {
    let file = File::open(tarball).map_err(|e| {
        PkgError::extract_failed(format!("Failed to open {}: {e}", tarball.display()))
    })?;
    extract_with(BufReader::new(file), dest, |entry| strategy.map_entry(entry))
}

/// Extract a gzipped tar stream into `dest`.
///
/// `map_entry` turns each raw entry name into a path relative to `dest`;
/// `None` skips the entry.
///
/// # Errors
/// See [`extract_tarball`].
pub fn extract_with<R, F>(reader: R, dest: &Path, map_entry: F) -> Result<ExtractSummary, PkgError>
where
    R: Read,
    F: Fn(&str) -> Option<String>,
{
    fs::create_dir_all(dest).map_err(|e| {
        PkgError::extract_failed(format!("Failed to create {}: {e}", dest.display()))
    })?;

    let mut archive = Archive::new(GzDecoder::new(reader));
    let mut summary = ExtractSummary::default();

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let raw_name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let entry_type = entry.header().entry_type();

        let Some(mapped) = map_entry(&raw_name) else {
            trace!(entry = %raw_name, "skipped by mapper");
            summary.skipped += 1;
            continue;
        };
        let target = safe_target(dest, &raw_name, &mapped)?;

        match entry_type {
            EntryType::Directory => {
                fs::create_dir_all(&target).map_err(|e| write_failed(&target, &e))?;
                summary.dirs += 1;
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| write_failed(parent, &e))?;
                }
                let mut file = File::create(&target).map_err(|e| write_failed(&target, &e))?;
                copy_entry(&mut entry, &mut file, &target)?;

                // Set permissions on Unix
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    if let Ok(mode) = entry.header().mode() {
                        // Keep files owner-writable so reinstalls can overwrite them
                        let perms = fs::Permissions::from_mode((mode & 0o777) | 0o200);
                        let _ = fs::set_permissions(&target, perms);
                    }
                }
                summary.files += 1;
            }
            other => {
                // Links are never recreated, so they cannot point outside dest
                trace!(entry = %raw_name, kind = ?other, "skipped unsupported entry");
                summary.skipped += 1;
            }
        }
    }

    Ok(summary)
}

/// Copy one file out of a `.tgz` stream.
///
/// `wanted` is matched against entry names after the default `package/`
/// stripping, e.g. `dist/vue.js`. Returns `false` if no such file exists.
///
/// # Errors
/// `PKG_ARCHIVE_INVALID` for a corrupt archive, `PKG_EXTRACT_FAILED` if the
/// writer fails.
pub fn read_tarball_entry<R, W>(reader: R, wanted: &str, out: &mut W) -> Result<bool, PkgError>
where
    R: Read,
    W: Write + ?Sized,
{
    let wanted = wanted.trim_start_matches('/');
    let mut archive = Archive::new(GzDecoder::new(reader));

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let raw_name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        if super::strategy::default_entry_mapper(&raw_name).as_deref() == Some(wanted) {
            io::copy(&mut entry, out)
                .map_err(|e| PkgError::extract_failed(format!("Failed to copy {wanted}: {e}")))?;
            return Ok(true);
        }
    }
    Ok(false)
}

/// Copy an entry body, blaming read errors on the archive and write errors on the target.
fn copy_entry<R: Read, W: Write>(entry: &mut R, out: &mut W, target: &Path) -> Result<(), PkgError> {
    let mut buf = [0u8; 16 * 1024];
    loop {
        let n = match entry.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(corrupt(e)),
        };
        out.write_all(&buf[..n])
            .map_err(|e| write_failed(target, &e))?;
    }
}

/// Resolve a mapped entry name under `dest`, rejecting anything that escapes it.
fn safe_target(dest: &Path, raw_name: &str, mapped: &str) -> Result<PathBuf, PkgError> {
    let relative = Path::new(mapped);
    if !is_plain_relative(relative) {
        return Err(PkgError::archive_invalid(format!(
            "Tarball entry escapes destination: {raw_name}"
        )));
    }
    let target = dest.join(relative);
    if !is_strict_descendant(dest, &target) {
        return Err(PkgError::archive_invalid(format!(
            "Tarball entry escapes destination: {raw_name}"
        )));
    }
    Ok(target)
}

#[allow(clippy::needless_pass_by_value)]
fn corrupt(e: io::Error) -> PkgError {
    PkgError::archive_invalid(format!("Corrupt tarball: {e}"))
}

fn write_failed(path: &Path, e: &io::Error) -> PkgError {
    PkgError::extract_failed(format!("Failed to write {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::error::codes;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tar::Builder;
    use tempfile::tempdir;

    fn gzip(tar_bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn file_header(path: &str, len: usize, mode: u32) -> tar::Header {
        let mut header = tar::Header::new_gnu();
        header.set_path(path).unwrap();
        header.set_size(len as u64);
        header.set_mode(mode);
        header.set_cksum();
        header
    }

    fn create_test_tarball() -> Vec<u8> {
        let mut tar_bytes = Vec::new();
        {
            let mut builder = Builder::new(&mut tar_bytes);

            let mut dir = tar::Header::new_gnu();
            dir.set_path("package/lib").unwrap();
            dir.set_entry_type(EntryType::Directory);
            dir.set_mode(0o755);
            dir.set_size(0);
            dir.set_cksum();
            builder.append(&dir, io::empty()).unwrap();

            let pkg_json = br#"{"name":"test","version":"1.0.0"}"#;
            let header = file_header("package/package.json", pkg_json.len(), 0o644);
            builder.append(&header, &pkg_json[..]).unwrap();

            let bin = b"#!/usr/bin/env node\n";
            let header = file_header("package/bin/cli.js", bin.len(), 0o755);
            builder.append(&header, &bin[..]).unwrap();

            let vue = b"/* vue */";
            let header = file_header("package/dist/vue.js", vue.len(), 0o444);
            builder.append(&header, &vue[..]).unwrap();

            builder.finish().unwrap();
        }
        gzip(&tar_bytes)
    }

    #[test]
    fn test_extract_strips_package_prefix() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out");

        let tgz = create_test_tarball();
        let summary = extract_with(&tgz[..], &dest, |e| {
            InstallationStrategy::Npm.map_entry(e)
        })
        .unwrap();

        assert_eq!(summary.files, 3);
        assert_eq!(summary.dirs, 1);
        assert_eq!(summary.skipped, 0);
        assert!(dest.join("lib").is_dir());
        let pkg_json = fs::read_to_string(dest.join("package.json")).unwrap();
        assert!(pkg_json.contains("test"));
        assert!(dest.join("bin").join("cli.js").exists());
        assert!(dest.join("dist").join("vue.js").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_keeps_modes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let tgz = create_test_tarball();
        extract_with(&tgz[..], dir.path(), |e| {
            InstallationStrategy::OneDump.map_entry(e)
        })
        .unwrap();

        let mode = fs::metadata(dir.path().join("bin/cli.js"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);

        // Re-extracting over a read-only file still works
        extract_with(&tgz[..], dir.path(), |e| {
            InstallationStrategy::OneDump.map_entry(e)
        })
        .unwrap();
    }

    #[test]
    fn test_extract_dist_only() {
        let dir = tempdir().unwrap();
        let tgz = create_test_tarball();
        let summary = extract_with(&tgz[..], dir.path(), |e| {
            InstallationStrategy::Dist.map_entry(e)
        })
        .unwrap();

        assert_eq!(summary.files, 1);
        assert!(dir.path().join("vue.js").exists());
        assert!(!dir.path().join("package.json").exists());
    }

    #[test]
    fn test_reject_path_traversal() {
        // set_path refuses "..", so write the raw name bytes directly
        let mut tar_bytes = Vec::new();
        {
            let mut builder = Builder::new(&mut tar_bytes);
            let data = b"root:x:0:0";
            let name = b"package/../../etc/passwd";
            let mut header = tar::Header::new_gnu();
            header.as_old_mut().name[..name.len()].copy_from_slice(name);
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, &data[..]).unwrap();
            builder.finish().unwrap();
        }
        let tgz = gzip(&tar_bytes);

        let dir = tempdir().unwrap();
        let dest = dir.path().join("a").join("b");
        let err = extract_with(&tgz[..], &dest, |e| {
            InstallationStrategy::Npm.map_entry(e)
        })
        .unwrap_err();

        assert_eq!(err.code(), codes::PKG_ARCHIVE_INVALID);
        assert!(!dir.path().join("etc").exists());
        assert!(!dir.path().join("a").join("etc").exists());
    }

    #[test]
    fn test_reject_absolute_mapped_path() {
        let tgz = create_test_tarball();
        let dir = tempdir().unwrap();
        let err = extract_with(&tgz[..], dir.path(), |e| Some(format!("/{e}"))).unwrap_err();
        assert_eq!(err.code(), codes::PKG_ARCHIVE_INVALID);
    }

    #[test]
    fn test_reject_entry_mapped_onto_dest_itself() {
        let tgz = create_test_tarball();
        let dir = tempdir().unwrap();
        let err = extract_with(&tgz[..], dir.path(), |_| Some(".".to_string())).unwrap_err();
        assert_eq!(err.code(), codes::PKG_ARCHIVE_INVALID);
    }

    #[test]
    fn test_symlinks_are_not_recreated() {
        let mut tar_bytes = Vec::new();
        {
            let mut builder = Builder::new(&mut tar_bytes);
            let mut header = tar::Header::new_gnu();
            header.set_path("package/escape").unwrap();
            header.set_entry_type(EntryType::Symlink);
            header.set_link_name("/etc").unwrap();
            header.set_size(0);
            header.set_mode(0o777);
            header.set_cksum();
            builder.append(&header, io::empty()).unwrap();
            builder.finish().unwrap();
        }
        let tgz = gzip(&tar_bytes);

        let dir = tempdir().unwrap();
        let summary = extract_with(&tgz[..], dir.path(), |e| {
            InstallationStrategy::OneDump.map_entry(e)
        })
        .unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(fs::symlink_metadata(dir.path().join("escape")).is_err());
    }

    #[test]
    fn test_corrupt_archive() {
        let dir = tempdir().unwrap();
        let garbage = b"definitely not gzip";
        let err = extract_with(&garbage[..], dir.path(), |e| Some(e.to_string())).unwrap_err();
        assert_eq!(err.code(), codes::PKG_ARCHIVE_INVALID);

        let mut truncated = create_test_tarball();
        truncated.truncate(truncated.len() / 2);
        let err = extract_with(&truncated[..], dir.path(), |e| {
            InstallationStrategy::Npm.map_entry(e)
        })
        .unwrap_err();
        assert_eq!(err.code(), codes::PKG_ARCHIVE_INVALID);
    }

    #[test]
    fn test_extract_tarball_from_file() {
        let dir = tempdir().unwrap();
        let tgz_path = dir.path().join("test-1.0.0.tgz");
        fs::write(&tgz_path, create_test_tarball()).unwrap();

        let dest = dir.path().join("installed");
        let summary =
            extract_tarball(&tgz_path, &dest, &InstallationStrategy::SimpleVersioned).unwrap();
        assert_eq!(summary.files, 3);
        assert!(dest.join("package.json").exists());

        let missing = extract_tarball(&dir.path().join("nope.tgz"), &dest, &InstallationStrategy::Npm);
        assert_eq!(missing.unwrap_err().code(), codes::PKG_EXTRACT_FAILED);
    }

    #[test]
    fn test_read_tarball_entry() {
        let tgz = create_test_tarball();

        let mut out = Vec::new();
        assert!(read_tarball_entry(&tgz[..], "dist/vue.js", &mut out).unwrap());
        assert_eq!(out, b"/* vue */");

        let mut out = Vec::new();
        assert!(read_tarball_entry(&tgz[..], "/package.json", &mut out).unwrap());
        assert!(String::from_utf8(out).unwrap().contains("\"version\":\"1.0.0\""));

        let mut out = Vec::new();
        assert!(!read_tarball_entry(&tgz[..], "missing.js", &mut out).unwrap());
        assert!(out.is_empty());
    }
}
