//! `pakt extract` command implementation.

use super::{collect_tree, fail, print_json, NodeInfo};
use miette::{IntoDiagnostic, Result};
use pakt_core::pkg::Direction;
use pakt_core::{Config, DependencyRule, InstallationStrategy, PackageManager};
use serde::Serialize;
use std::path::PathBuf;

/// Extract command action.
#[derive(Debug, Clone)]
pub struct ExtractAction {
    pub specs: Vec<String>,
    pub rule: DependencyRule,
    pub strategy: InstallationStrategy,
    pub root: PathBuf,
}

#[derive(Serialize)]
struct ExtractResult {
    ok: bool,
    root: String,
    strategy: String,
    installed: Vec<NodeInfo>,
}

pub async fn run(config: Config, action: ExtractAction, json: bool) -> Result<()> {
    let manager = PackageManager::new(config).into_diagnostic()?;

    let nodes =
        match collect_tree(&manager, &action.specs, action.rule, Direction::Wider).await {
            Ok(nodes) => nodes,
            Err(e) => return fail(e, json),
        };

    manager.config().create_dirs().into_diagnostic()?;
    if let Err(e) = manager
        .install_all(&nodes, &action.root, &action.strategy)
        .await
    {
        return fail(e, json);
    }

    let installed: Vec<_> = nodes.iter().filter(|n| !n.is_duplicate()).collect();
    if json {
        return print_json(&ExtractResult {
            ok: true,
            root: action.root.display().to_string(),
            strategy: action.strategy.to_string(),
            installed: installed.into_iter().map(NodeInfo::from).collect(),
        });
    }

    for node in installed {
        println!(
            "+ {node} -> {}",
            action.strategy.map_path(&action.root, node).display()
        );
    }
    Ok(())
}
