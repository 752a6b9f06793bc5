//! Package manager functionality.
//!
//! Provides:
//! - Parsing package specifications (`name@range`)
//! - Fetching package metadata and tarballs from an npm registry
//! - Resolving npm ranges and dist-tags to published versions
//! - Dependency rules selecting which edges a traversal follows
//! - Concurrent dependency traversal with dedup and hoisting placement
//! - Installation strategies and safe tarball extraction
//! - A local tarball cache

pub mod cache;
pub mod error;
pub mod manager;
pub mod model;
pub mod registry;
pub mod resolve;
pub mod rules;
pub mod spec;
pub mod strategy;
pub mod tarball;
pub mod traverse;
pub mod tree;
pub mod version;

pub use cache::TarballCache;
pub use error::{codes as pkg_codes, PkgError};
pub use manager::PackageManager;
pub use model::{DependencyMap, Dist, PackageId, PackageInfo, PackageVersion};
pub use registry::{
    LimitedRegistry, Registry, RegistryClient, DEFAULT_REGISTRY, MAX_TARBALL_SIZE, REGISTRY_ENV,
};
pub use resolve::Resolver;
pub use rules::DependencyRule;
pub use spec::PackageSpec;
pub use strategy::{default_entry_mapper, CustomStrategy, InstallationStrategy};
pub use tarball::{extract_tarball, extract_with, read_tarball_entry, ExtractSummary};
pub use traverse::{traverse, Traversal, TraversalOptions};
pub use tree::{Direction, NodeId, TraversalContext, TraversalNode};
pub use version::{best_match, is_range, parse_range, resolve_all_in, resolve_in};
