//! Command handlers.

pub mod cat;
pub mod download;
pub mod extract;
pub mod version;

use miette::{IntoDiagnostic, Result};
use pakt_core::pkg::{Direction, TraversalNode, TraversalOptions};
use pakt_core::{DependencyRule, PackageManager, PkgError};
use serde::Serialize;

/// Error payload for JSON output.
#[derive(Serialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl From<&PkgError> for ErrorInfo {
    fn from(e: &PkgError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.message().to_string(),
        }
    }
}

/// One traversal node for JSON output.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub name: String,
    pub version: String,
    /// Placement depth below the top of the install tree.
    pub level: usize,
    /// Depth in the dependency graph (roots are 0).
    pub dependency_level: usize,
    pub duplicate: bool,
    /// Placement path from the top, e.g. `["a", "b"]`.
    pub path: Vec<String>,
}

impl From<&TraversalNode> for NodeInfo {
    fn from(node: &TraversalNode) -> Self {
        let version = node.version();
        Self {
            name: version.name.clone(),
            version: version.version().to_string(),
            level: node.level(),
            dependency_level: node.dependency_level(),
            duplicate: node.is_duplicate(),
            path: node
                .path()
                .iter()
                .map(|step| step.version().name.clone())
                .collect(),
        }
    }
}

/// Run a traversal to completion.
pub async fn collect_tree(
    manager: &PackageManager,
    specs: &[String],
    rule: DependencyRule,
    direction: Direction,
) -> Result<Vec<TraversalNode>, PkgError> {
    let options = TraversalOptions {
        direction,
        rule,
        ..TraversalOptions::default()
    };
    manager.traverse(options, specs)?.collect().await
}

/// Print a tree line per node, indented by dependency depth.
pub fn print_tree(nodes: &[TraversalNode]) {
    for node in nodes {
        let indent = "  ".repeat(node.dependency_level());
        if node.is_duplicate() {
            println!("{indent}{node} (deduped)");
        } else {
            println!("{indent}{node}");
        }
    }
}

/// Print a JSON value on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

/// Report a failed command: a JSON error object in `--json` mode (exit 1),
/// otherwise a diagnostic.
pub fn fail(e: PkgError, json: bool) -> Result<()> {
    if json {
        #[derive(Serialize)]
        struct Failure {
            ok: bool,
            error: ErrorInfo,
        }
        print_json(&Failure {
            ok: false,
            error: ErrorInfo::from(&e),
        })?;
        std::process::exit(1);
    }
    Err(e).into_diagnostic()
}
