//! Local tarball cache.
//!
//! Tarballs are stored in a flat download directory keyed by the file name of
//! their URL (`vue-2.6.11.tgz`); scoped packages get a `@scope/` subfolder so
//! equally named packages of different scopes never collide. A file's presence
//! is what marks it as cached.

use super::error::PkgError;
use super::model::PackageVersion;
use super::registry::Registry;
use pakt_util::fs::atomic_write;
use pakt_util::hash::{digest_matches, sha1_hex};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};

/// Downloads tarballs on demand and keeps them on disk.
pub struct TarballCache {
    dir: PathBuf,
    registry: Arc<dyn Registry>,
    use_cache: bool,
    verify_checksums: bool,
    /// One lock per target file so concurrent requests share a download.
    in_flight: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl TarballCache {
    /// Create a cache in `dir` that fetches through `registry`.
    pub fn new(dir: impl Into<PathBuf>, registry: Arc<dyn Registry>) -> Self {
        Self {
            dir: dir.into(),
            registry,
            use_cache: true,
            verify_checksums: true,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// When `false`, every [`ensure`](Self::ensure) downloads again.
    #[must_use]
    pub fn with_use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Check downloads against `dist.shasum` when the registry provides one.
    #[must_use]
    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// The download directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Local path of a version's tarball (whether or not it exists yet).
    ///
    /// # Errors
    /// Fails with `PKG_DOWNLOAD_FAILED` if the version has no usable tarball URL.
    pub fn path_for(&self, version: &PackageVersion) -> Result<PathBuf, PkgError> {
        let file = version.dist.tarball_name().ok_or_else(|| {
            PkgError::download_failed(format!("{version} has no tarball URL"))
        })?;
        let dir = match version.name.split_once('/') {
            Some((scope, _)) if scope.starts_with('@') => self.dir.join(scope),
            _ => self.dir.clone(),
        };
        Ok(dir.join(file))
    }

    /// Whether the tarball of `version` is already on disk.
    #[must_use]
    pub fn is_cached(&self, version: &PackageVersion) -> bool {
        self.path_for(version).is_ok_and(|path| path.is_file())
    }

    /// Make sure the tarball of `version` is on disk and return its path.
    ///
    /// Downloads at most once per file while the cache is enabled.
    ///
    /// # Errors
    /// Transport errors, `PKG_CHECKSUM_MISMATCH`, or `PKG_CACHE_ERROR` when the
    /// file cannot be written.
    pub async fn ensure(&self, version: &PackageVersion) -> Result<PathBuf, PkgError> {
        let path = self.path_for(version)?;

        let lock = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(in_flight.entry(path.clone()).or_default())
        };
        let result = {
            let _guard = lock.lock().await;
            self.fetch_into(version, path.clone()).await
        };
        self.release(&path, &lock);
        result
    }

    /// Drop the per-file lock once nobody else is waiting on it.
    fn release(&self, path: &Path, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map plus ours
        let ours = in_flight.get(path).is_some_and(|held| Arc::ptr_eq(held, lock));
        if ours && Arc::strong_count(lock) <= 2 {
            in_flight.remove(path);
        }
    }

    async fn fetch_into(&self, version: &PackageVersion, path: PathBuf) -> Result<PathBuf, PkgError> {
        if self.use_cache && path.is_file() {
            trace!(path = %path.display(), "tarball cached");
            return Ok(path);
        }

        let url = &version.dist.tarball;
        debug!(package = %version, url = %url, "downloading tarball");
        let bytes = self.registry.fetch_tarball(url).await?;

        if self.verify_checksums {
            if let Some(expected) = version.dist.shasum.as_deref() {
                let actual = sha1_hex(&bytes);
                if !digest_matches(&actual, expected) {
                    return Err(PkgError::checksum_mismatch(url, expected, &actual));
                }
            }
        }

        let target = path.clone();
        tokio::task::spawn_blocking(move || atomic_write(&target, &bytes))
            .await
            .map_err(|e| PkgError::cache_error(format!("Tarball write task failed: {e}")))?
            .map_err(|e| {
                PkgError::cache_error(format!("Failed to write {}: {e}", path.display()))
            })?;

        Ok(path)
    }

    /// File names of every cached tarball, sorted. Scoped ones include their
    /// `@scope/` folder.
    ///
    /// # Errors
    /// Returns an error if the download directory cannot be read.
    pub fn list_cached(&self) -> Result<Vec<String>, PkgError> {
        let mut result = Vec::new();
        if !self.dir.exists() {
            return Ok(result);
        }
        Self::scan(&self.dir, None, &mut result)?;
        result.sort();
        Ok(result)
    }

    fn scan(dir: &Path, scope: Option<&str>, result: &mut Vec<String>) -> Result<(), PkgError> {
        for entry in fs::read_dir(dir)?.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let path = entry.path();

            // Skip temp files from interrupted writes
            if name.starts_with('.') {
                continue;
            }
            if path.is_dir() {
                if scope.is_none() && name.starts_with('@') {
                    Self::scan(&path, Some(&name), result)?;
                }
            } else if name.ends_with(".tgz") {
                result.push(match scope {
                    Some(scope) => format!("{scope}/{name}"),
                    None => name.into_owned(),
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for TarballCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TarballCache")
            .field("dir", &self.dir)
            .field("use_cache", &self.use_cache)
            .field("verify_checksums", &self.verify_checksums)
            .finish_non_exhaustive()
    }
}
