//! `pakt download` command implementation.

use super::{collect_tree, fail, print_json, print_tree, NodeInfo};
use miette::{IntoDiagnostic, Result};
use pakt_core::pkg::Direction;
use pakt_core::{Config, DependencyRule, PackageManager};
use serde::Serialize;
use tracing::info;

/// Download command action.
#[derive(Debug, Clone)]
pub struct DownloadAction {
    pub specs: Vec<String>,
    pub rule: DependencyRule,
    pub direction: Direction,
    /// Fetch tarballs; otherwise only report the tree.
    pub fetch: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DownloadResult {
    ok: bool,
    nodes: Vec<NodeInfo>,
    duplicates: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    downloaded: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    download_dir: Option<String>,
}

pub async fn run(config: Config, action: DownloadAction, json: bool) -> Result<()> {
    let manager = PackageManager::new(config).into_diagnostic()?;

    let nodes = match collect_tree(&manager, &action.specs, action.rule, action.direction).await {
        Ok(nodes) => nodes,
        Err(e) => return fail(e, json),
    };
    let duplicates = nodes.iter().filter(|n| n.is_duplicate()).count();

    let downloaded = if action.fetch {
        manager.config().create_dirs().into_diagnostic()?;
        match manager.download_all(&nodes).await {
            Ok(count) => Some(count),
            Err(e) => return fail(e, json),
        }
    } else {
        None
    };

    if json {
        return print_json(&DownloadResult {
            ok: true,
            nodes: nodes.iter().map(NodeInfo::from).collect(),
            duplicates,
            downloaded,
            download_dir: downloaded.map(|_| manager.cache().dir().display().to_string()),
        });
    }

    print_tree(&nodes);
    info!(
        packages = nodes.len() - duplicates,
        duplicates, "dependency tree resolved"
    );
    if let Some(count) = downloaded {
        println!(
            "{count} tarballs in {}",
            manager.cache().dir().display()
        );
    }
    Ok(())
}
