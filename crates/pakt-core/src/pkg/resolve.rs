//! Version resolution against a registry.
//!
//! A [`Resolver`] caches packuments for its lifetime, so one traversal
//! fetches each package name at most once even when many branches ask for it
//! concurrently.

use super::error::PkgError;
use super::model::{PackageInfo, PackageVersion};
use super::registry::Registry;
use super::spec::PackageSpec;
use super::version::{resolve_all_in, resolve_in};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::debug;

/// Cached packument: `None` records that the package does not exist.
type PackageSlot = Arc<OnceCell<Option<Arc<PackageInfo>>>>;

/// Resolves `name@constraint` pairs to published versions.
pub struct Resolver {
    registry: Arc<dyn Registry>,
    packages: Mutex<HashMap<String, PackageSlot>>,
    fetch_count: AtomicUsize,
}

impl Resolver {
    /// Create a resolver over `registry` with an empty cache.
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            packages: Mutex::new(HashMap::new()),
            fetch_count: AtomicUsize::new(0),
        }
    }

    /// The registry this resolver fetches from.
    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    /// Number of packument fetches that reached the registry.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::Relaxed)
    }

    /// Fetch (or reuse) the metadata of a package.
    ///
    /// Returns `Ok(None)` when the registry reports the package as missing.
    /// Transport failures are not cached.
    ///
    /// # Errors
    /// Returns an error if the registry request fails.
    pub async fn package(&self, name: &str) -> Result<Option<Arc<PackageInfo>>, PkgError> {
        let slot = {
            let mut packages = self.packages.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(packages.entry(name.to_string()).or_default())
        };

        let info = slot
            .get_or_try_init(|| async {
                self.fetch_count.fetch_add(1, Ordering::Relaxed);
                debug!(name, "fetching package metadata");
                match self.registry.fetch_package(name).await {
                    Ok(info) => Ok(Some(Arc::new(info))),
                    Err(e) if e.is_not_found() => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await?;

        Ok(info.clone())
    }

    /// Resolve a constraint to the best matching version.
    ///
    /// `None` or an empty constraint means `latest`. A missing package or an
    /// unsatisfiable constraint is `Ok(None)`.
    ///
    /// # Errors
    /// Returns an error if the registry request fails.
    pub async fn resolve(
        &self,
        name: &str,
        constraint: Option<&str>,
    ) -> Result<Option<Arc<PackageVersion>>, PkgError> {
        let Some(info) = self.package(name).await? else {
            return Ok(None);
        };
        Ok(resolve_in(&info, constraint))
    }

    /// Resolve a `name@constraint` expression.
    ///
    /// # Errors
    /// Returns an error if the expression is malformed or the registry request fails.
    pub async fn resolve_spec(&self, spec: &str) -> Result<Option<Arc<PackageVersion>>, PkgError> {
        let spec = PackageSpec::parse(spec)?;
        self.resolve(&spec.name, spec.range.as_deref()).await
    }

    /// Every version satisfying a constraint, ascending.
    ///
    /// # Errors
    /// Returns an error if the registry request fails.
    pub async fn resolve_all(
        &self,
        name: &str,
        constraint: Option<&str>,
    ) -> Result<Vec<Arc<PackageVersion>>, PkgError> {
        let Some(info) = self.package(name).await? else {
            return Ok(Vec::new());
        };
        Ok(resolve_all_in(&info, constraint))
    }

    /// Resolve a spec that must exist: absence becomes an error.
    ///
    /// # Errors
    /// `PKG_NOT_FOUND` for an unknown package, `PKG_VERSION_NOT_FOUND` when
    /// nothing satisfies the constraint, or the registry error.
    pub async fn require(&self, spec: &PackageSpec) -> Result<Arc<PackageVersion>, PkgError> {
        let Some(info) = self.package(&spec.name).await? else {
            return Err(PkgError::not_found(&spec.name));
        };
        resolve_in(&info, spec.range.as_deref())
            .ok_or_else(|| PkgError::version_not_found(&spec.name, spec.constraint()))
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("fetch_count", &self.fetch_count())
            .finish_non_exhaustive()
    }
}
