//! The package manager facade.
//!
//! Bundles configuration, a concurrency-limited registry, a resolver, and the
//! tarball cache behind one handle. Front ends (the CLI, a CDN, a build-tool
//! plugin) talk to this instead of wiring the pieces themselves.

use super::cache::TarballCache;
use super::error::PkgError;
use super::model::PackageVersion;
use super::registry::{LimitedRegistry, Registry, RegistryClient};
use super::resolve::Resolver;
use super::spec::PackageSpec;
use super::strategy::InstallationStrategy;
use super::tarball::{extract_tarball, read_tarball_entry};
use super::traverse::{traverse, Traversal, TraversalOptions};
use super::tree::TraversalNode;
use crate::config::Config;
use futures::stream::{self, StreamExt, TryStreamExt};
use pakt_util::fs::is_strict_descendant;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Entry point for resolving, traversing, downloading, and installing.
#[derive(Debug)]
pub struct PackageManager {
    config: Config,
    resolver: Arc<Resolver>,
    cache: TarballCache,
}

impl PackageManager {
    /// Create a manager talking HTTP to `config.registry_url`.
    ///
    /// # Errors
    /// Returns an error if the registry URL is invalid.
    pub fn new(config: Config) -> Result<Self, PkgError> {
        let mut client = RegistryClient::new(&config.registry_url)?;
        if let Some(username) = &config.username {
            client = client.with_credentials(username.clone(), config.password.clone());
        }
        Ok(Self::with_registry(config, Arc::new(client)))
    }

    /// Create a manager over any registry. Requests are capped at
    /// `config.concurrency` in flight.
    pub fn with_registry(config: Config, registry: Arc<dyn Registry>) -> Self {
        let registry: Arc<dyn Registry> =
            Arc::new(LimitedRegistry::new(registry, config.concurrency));
        let cache = TarballCache::new(config.download_dir(), Arc::clone(&registry))
            .with_use_cache(config.use_cache)
            .with_verify_checksums(config.verify_checksums);
        Self {
            resolver: Arc::new(Resolver::new(registry)),
            cache,
            config,
        }
    }

    /// The configuration this manager was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The shared resolver. Its packument cache lives as long as the manager.
    #[must_use]
    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// The tarball cache.
    #[must_use]
    pub fn cache(&self) -> &TarballCache {
        &self.cache
    }

    /// Best version of `name` for `constraint` (`None` means `latest`).
    ///
    /// # Errors
    /// Returns an error if the registry request fails.
    pub async fn resolve(
        &self,
        name: &str,
        constraint: Option<&str>,
    ) -> Result<Option<Arc<PackageVersion>>, PkgError> {
        self.resolver.resolve(name, constraint).await
    }

    /// Resolve a `name@constraint` expression.
    ///
    /// # Errors
    /// Returns an error if the expression is malformed or the registry request fails.
    pub async fn resolve_spec(&self, spec: &str) -> Result<Option<Arc<PackageVersion>>, PkgError> {
        self.resolver.resolve_spec(spec).await
    }

    /// Every version of `name` satisfying `constraint`, ascending.
    ///
    /// # Errors
    /// Returns an error if the registry request fails.
    pub async fn resolve_all(
        &self,
        name: &str,
        constraint: Option<&str>,
    ) -> Result<Vec<Arc<PackageVersion>>, PkgError> {
        self.resolver.resolve_all(name, constraint).await
    }

    /// Start a traversal of `specs`. The request concurrency comes from the config.
    ///
    /// # Errors
    /// Returns an error if a spec is malformed.
    pub fn traverse<S: AsRef<str>>(
        &self,
        options: TraversalOptions,
        specs: &[S],
    ) -> Result<Traversal, PkgError> {
        let specs = specs
            .iter()
            .map(|s| PackageSpec::parse(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let options = TraversalOptions {
            concurrency: self.config.concurrency,
            ..options
        };
        Ok(traverse(Arc::clone(&self.resolver), options, specs))
    }

    /// Make sure a version's tarball is in the download directory.
    ///
    /// # Errors
    /// Transport, checksum, or cache errors.
    pub async fn download(&self, version: &PackageVersion) -> Result<PathBuf, PkgError> {
        self.cache.ensure(version).await
    }

    /// Download every non-duplicate node's tarball; returns how many were handled.
    ///
    /// # Errors
    /// The first failure, with its dependency chain.
    pub async fn download_all(&self, nodes: &[TraversalNode]) -> Result<usize, PkgError> {
        let count = stream::iter(nodes.iter().filter(|n| !n.is_duplicate()))
            .map(|node| async move {
                self.download(&node.version())
                    .await
                    .map_err(|e| e.in_chain(&node.chain()))
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .try_fold(0usize, |count, _| async move { Ok(count + 1) })
            .await?;
        info!(count, dir = %self.cache.dir().display(), "tarballs ready");
        Ok(count)
    }

    /// Install one node below `root` following `strategy`.
    ///
    /// Returns the directory the node was extracted into.
    ///
    /// # Errors
    /// `PKG_INSTALL_FAILED` when the strategy maps the node outside `root`,
    /// download errors, `PKG_ARCHIVE_INVALID` for a corrupt or malicious
    /// tarball, or `PKG_EXTRACT_FAILED` when the target cannot be written.
    pub async fn install(
        &self,
        node: &TraversalNode,
        root: &Path,
        strategy: &InstallationStrategy,
    ) -> Result<PathBuf, PkgError> {
        let version = node.version();
        let dest = strategy.map_path(root, node);
        // Names and versions come from the registry and may hold `..` or an absolute path
        if dest != root && !is_strict_descendant(root, &dest) {
            return Err(PkgError::install_failed(format!(
                "{} strategy maps {version} to {}, outside {}",
                strategy,
                dest.display(),
                root.display()
            ))
            .in_chain(&node.chain()));
        }
        let tarball = self
            .download(&version)
            .await
            .map_err(|e| e.in_chain(&node.chain()))?;

        let summary = {
            let dest = dest.clone();
            let strategy = strategy.clone();
            tokio::task::spawn_blocking(move || extract_tarball(&tarball, &dest, &strategy))
                .await
                .map_err(|e| PkgError::install_failed(format!("Extraction task failed: {e}")))?
                .map_err(|e| e.in_chain(&node.chain()))?
        };

        debug!(
            package = %version,
            dest = %dest.display(),
            files = summary.files,
            skipped = summary.skipped,
            "installed"
        );
        Ok(dest)
    }

    /// Install every non-duplicate node; returns the number installed.
    ///
    /// # Errors
    /// The first failure.
    pub async fn install_all(
        &self,
        nodes: &[TraversalNode],
        root: &Path,
        strategy: &InstallationStrategy,
    ) -> Result<usize, PkgError> {
        let count = stream::iter(nodes.iter().filter(|n| !n.is_duplicate()))
            .map(|node| self.install(node, root, strategy))
            .buffer_unordered(self.config.concurrency.max(1))
            .try_fold(0usize, |count, _| async move { Ok(count + 1) })
            .await?;
        info!(count, root = %root.display(), strategy = %strategy, "installation complete");
        Ok(count)
    }

    /// Read one file out of a version's tarball, downloading it if needed.
    ///
    /// `path` is relative to the package root (`dist/vue.js`). Returns `None`
    /// if the tarball has no such file.
    ///
    /// # Errors
    /// Download errors or `PKG_ARCHIVE_INVALID` for a corrupt tarball.
    pub async fn read_file(
        &self,
        version: &PackageVersion,
        path: &str,
    ) -> Result<Option<Vec<u8>>, PkgError> {
        let tarball = self.download(version).await?;
        let wanted = path.to_string();
        tokio::task::spawn_blocking(move || {
            let file = File::open(&tarball).map_err(|e| {
                PkgError::cache_error(format!("Failed to open {}: {e}", tarball.display()))
            })?;
            let mut out = Vec::new();
            let found = read_tarball_entry(BufReader::new(file), &wanted, &mut out)?;
            Ok(found.then_some(out))
        })
        .await
        .map_err(|e| PkgError::extract_failed(format!("Read task failed: {e}")))?
    }
}
