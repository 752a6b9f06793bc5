//! Installation strategies: where a traversal node's files land on disk.
//!
//! A strategy maps `(root, node)` to a target directory and rewrites each
//! archive entry name (registry tarballs wrap everything in `package/`).

use super::tree::TraversalNode;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Maps an install root and a node to the node's target directory.
pub type PathMapper = dyn Fn(&Path, &TraversalNode) -> PathBuf + Send + Sync;
/// Decides whether a raw archive entry name is extracted at all.
pub type EntryFilter = dyn Fn(&str) -> bool + Send + Sync;
/// Rewrites a raw archive entry name; `None` skips the entry.
pub type EntryMapper = dyn Fn(&str) -> Option<String> + Send + Sync;

const PACKAGE_PREFIX: &str = "package/";
const DIST_PREFIX: &str = "package/dist/";

/// Layout conventions for installed packages.
#[derive(Clone, Default)]
pub enum InstallationStrategy {
    /// `root/<name>-<version>/...`
    Flat,
    /// `root/node_modules/<a>/node_modules/<b>/...` following the placement path.
    #[default]
    Npm,
    /// `root/<name>/...`
    Simple,
    /// `root/<name>/<version>/...`
    SimpleVersioned,
    /// `root/META-INF/resources/webjars/<name>/<version>/...`
    Webjars,
    /// Everything straight into `root`.
    OneDump,
    /// Only the `dist/` folder of each package, straight into `root`.
    Dist,
    Custom(Arc<CustomStrategy>),
}

/// A strategy assembled from closures.
pub struct CustomStrategy {
    name: String,
    map_path: Box<PathMapper>,
    filter: Option<Box<EntryFilter>>,
    mapper: Option<Box<EntryMapper>>,
}

impl CustomStrategy {
    /// Create a strategy that uses `map_path` and the default entry mapper.
    pub fn new<F>(name: impl Into<String>, map_path: F) -> Self
    where
        F: Fn(&Path, &TraversalNode) -> PathBuf + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            map_path: Box::new(map_path),
            filter: None,
            mapper: None,
        }
    }

    /// Only extract entries whose raw name passes `filter`.
    #[must_use]
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Replace the default entry-name mapper.
    #[must_use]
    pub fn with_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.mapper = Some(Box::new(mapper));
        self
    }

    /// Finish into an [`InstallationStrategy`].
    #[must_use]
    pub fn build(self) -> InstallationStrategy {
        InstallationStrategy::Custom(Arc::new(self))
    }
}

impl InstallationStrategy {
    /// Names accepted by [`FromStr`], in display order.
    pub const NAMES: [&'static str; 7] = [
        "flat",
        "npm",
        "simple",
        "simple-versioned",
        "webjars",
        "one-dump",
        "dist",
    ];

    /// Strategy name as used on the command line.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Flat => "flat",
            Self::Npm => "npm",
            Self::Simple => "simple",
            Self::SimpleVersioned => "simple-versioned",
            Self::Webjars => "webjars",
            Self::OneDump => "one-dump",
            Self::Dist => "dist",
            Self::Custom(custom) => &custom.name,
        }
    }

    /// Target directory of `node` below `root`.
    #[must_use]
    pub fn map_path(&self, root: &Path, node: &TraversalNode) -> PathBuf {
        let version = node.version();
        match self {
            Self::Flat => root.join(format!("{}-{}", version.name, version.version())),
            Self::Npm => node.path().iter().fold(root.to_path_buf(), |dir, step| {
                dir.join("node_modules").join(&step.version().name)
            }),
            Self::Simple => root.join(&version.name),
            Self::SimpleVersioned => root.join(&version.name).join(version.version()),
            Self::Webjars => root
                .join("META-INF")
                .join("resources")
                .join("webjars")
                .join(&version.name)
                .join(version.version()),
            Self::OneDump | Self::Dist => root.to_path_buf(),
            Self::Custom(custom) => (custom.map_path)(root, node),
        }
    }

    /// Relative output path of a raw archive entry, or `None` to skip it.
    #[must_use]
    pub fn map_entry(&self, entry: &str) -> Option<String> {
        match self {
            Self::Dist => entry
                .strip_prefix(DIST_PREFIX)
                .filter(|rest| !rest.is_empty())
                .map(String::from),
            Self::Custom(custom) => {
                if let Some(filter) = &custom.filter {
                    if !filter(entry) {
                        return None;
                    }
                }
                match &custom.mapper {
                    Some(mapper) => mapper(entry),
                    None => default_entry_mapper(entry),
                }
            }
            _ => default_entry_mapper(entry),
        }
    }
}

/// Strip the archive's top-level folder (normally `package/`).
///
/// Some registries wrap contents in a folder named after the package instead,
/// so any single leading folder is stripped. The folder entry itself maps to
/// nothing.
#[must_use]
pub fn default_entry_mapper(entry: &str) -> Option<String> {
    let entry = entry.trim_start_matches("./");
    let rest = match entry.strip_prefix(PACKAGE_PREFIX) {
        Some(rest) => rest,
        None => match entry.split_once('/') {
            Some((_, rest)) => rest,
            None => entry,
        },
    };
    let rest = rest.trim_end_matches('/');
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

impl FromStr for InstallationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "flat" => Ok(Self::Flat),
            "npm" => Ok(Self::Npm),
            "simple" => Ok(Self::Simple),
            "simple-versioned" => Ok(Self::SimpleVersioned),
            "webjars" => Ok(Self::Webjars),
            "one-dump" => Ok(Self::OneDump),
            "dist" => Ok(Self::Dist),
            other => Err(format!(
                "unknown installation strategy '{other}' (expected one of: {})",
                Self::NAMES.join(", ")
            )),
        }
    }
}

impl fmt::Display for InstallationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for InstallationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(custom) => write!(f, "Custom({:?})", custom.name),
            other => f.write_str(other.name()),
        }
    }
}
