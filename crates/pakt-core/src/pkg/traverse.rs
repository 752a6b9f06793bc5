//! Concurrent dependency traversal.
//!
//! A traversal resolves its root specs, then walks their dependency graphs,
//! committing every discovered version into a [`TraversalContext`] and
//! streaming the committed nodes through a bounded channel. Duplicate nodes
//! are never expanded, which is what breaks dependency cycles.

use super::error::{codes, PkgError};
use super::model::PackageVersion;
use super::resolve::Resolver;
use super::rules::DependencyRule;
use super::spec::PackageSpec;
use super::tree::{Direction, TraversalContext, TraversalNode};
use futures::future::BoxFuture;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the node channel between the walker and its consumer.
const CHANNEL_CAPACITY: usize = 64;

/// Settings for one traversal.
#[derive(Debug, Clone)]
pub struct TraversalOptions {
    pub direction: Direction,
    /// Rule applied to the roots. Deeper nodes always follow `dependencies`.
    pub rule: DependencyRule,
    /// Maximum sibling resolutions or subtree walks in flight per node.
    pub concurrency: usize,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            direction: Direction::Wider,
            rule: DependencyRule::Dependencies,
            concurrency: 5,
        }
    }
}

/// Start a traversal of `specs`.
///
/// All roots are emitted first; `direction` decides how each root's
/// dependencies are walked after that.
///
/// Each call resolves afresh into a new context. Must be called from within a
/// Tokio runtime; the walk runs on a spawned task and dropping the returned
/// [`Traversal`] abandons it at its next emission.
pub fn traverse(
    resolver: Arc<Resolver>,
    options: TraversalOptions,
    specs: Vec<PackageSpec>,
) -> Traversal {
    let context = TraversalContext::new(options.direction);
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    let walker = Walker {
        resolver,
        context: Arc::clone(&context),
        tx,
        concurrency: options.concurrency.max(1),
    };
    let task = tokio::spawn(walker.run(options.rule, specs));

    Traversal { rx, task, context }
}

/// Receiving end of a running traversal.
///
/// Yields committed nodes in emission order. Also usable as a [`Stream`].
pub struct Traversal {
    rx: mpsc::Receiver<TraversalNode>,
    task: JoinHandle<Result<(), PkgError>>,
    context: Arc<TraversalContext>,
}

impl Traversal {
    /// The context being filled by this traversal.
    #[must_use]
    pub fn context(&self) -> &Arc<TraversalContext> {
        &self.context
    }

    /// Next committed node, or `None` once the walk has ended (successfully or not).
    pub async fn next(&mut self) -> Option<TraversalNode> {
        self.rx.recv().await
    }

    /// Drain every node, then report how the walk ended.
    ///
    /// # Errors
    /// Returns the error that aborted the walk.
    pub async fn collect(mut self) -> Result<Vec<TraversalNode>, PkgError> {
        let mut nodes = Vec::new();
        while let Some(node) = self.rx.recv().await {
            nodes.push(node);
        }
        self.join().await?;
        Ok(nodes)
    }

    /// Run the walk to completion, discarding emissions, and return the context.
    ///
    /// # Errors
    /// Returns the error that aborted the walk.
    pub async fn finish(mut self) -> Result<Arc<TraversalContext>, PkgError> {
        while self.rx.recv().await.is_some() {}
        let context = Arc::clone(&self.context);
        self.join().await?;
        Ok(context)
    }

    async fn join(self) -> Result<(), PkgError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(PkgError::traversal_aborted(format!("Traversal task failed: {e}"))),
        }
    }
}

impl Stream for Traversal {
    type Item = TraversalNode;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Drives one traversal on a spawned task.
struct Walker {
    resolver: Arc<Resolver>,
    context: Arc<TraversalContext>,
    tx: mpsc::Sender<TraversalNode>,
    concurrency: usize,
}

impl Walker {
    async fn run(self, rule: DependencyRule, specs: Vec<PackageSpec>) -> Result<(), PkgError> {
        let this = Arc::new(self);
        match Arc::clone(&this).walk(rule, specs).await {
            // The consumer went away; nothing left to report to
            Err(e) if e.code() == codes::PKG_TRAVERSAL_ABORTED => {
                debug!("traversal abandoned by consumer");
                Ok(())
            }
            Err(e) => Err(e),
            Ok(()) => {
                info!(
                    direction = %this.context.direction(),
                    nodes = this.context.len(),
                    duplicates = this.context.duplicate_count(),
                    fetched = this.resolver.fetch_count(),
                    "traversal complete"
                );
                Ok(())
            }
        }
    }

    async fn walk(
        self: Arc<Self>,
        rule: DependencyRule,
        specs: Vec<PackageSpec>,
    ) -> Result<(), PkgError> {
        // A root that does not resolve fails the whole request
        let versions: Vec<Arc<PackageVersion>> = stream::iter(specs)
            .map(|spec| {
                let resolver = Arc::clone(&self.resolver);
                async move { resolver.require(&spec).await }
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        // Roots are committed before any expansion in both directions, so a
        // root reached earlier as someone's dependency still owns its version
        // and expands with the root rule.
        let mut roots = Vec::with_capacity(versions.len());
        for version in versions {
            if let Some(root) = self.commit(None, version).await? {
                roots.push(root);
            }
        }
        for root in roots {
            Arc::clone(&self).expand(root, rule.clone()).await?;
        }
        Ok(())
    }

    /// Commit a version and hand the node to the consumer.
    async fn commit(
        &self,
        depender: Option<&TraversalNode>,
        version: Arc<PackageVersion>,
    ) -> Result<Option<TraversalNode>, PkgError> {
        let Some(node) = self.context.commit(depender, version) else {
            return Ok(None);
        };
        debug!(
            node = %node,
            level = node.level(),
            dependency_level = node.dependency_level(),
            duplicate = node.is_duplicate(),
            "committed"
        );
        self.tx
            .send(node.clone())
            .await
            .map_err(|_| PkgError::traversal_aborted("Traversal consumer dropped"))?;
        Ok(Some(node))
    }

    /// Expand a committed node: resolve its dependencies, commit them, and
    /// descend according to the traversal direction.
    fn expand(
        self: Arc<Self>,
        node: TraversalNode,
        rule: DependencyRule,
    ) -> BoxFuture<'static, Result<(), PkgError>> {
        Box::pin(async move {
            if node.is_duplicate() {
                return Ok(());
            }

            let resolved = self.resolve_dependencies(&node, &rule).await?;

            match self.context.direction() {
                Direction::Wider => {
                    let mut children = Vec::with_capacity(resolved.len());
                    for version in resolved {
                        if let Some(child) = self.commit(Some(&node), version).await? {
                            children.push(child);
                        }
                    }
                    stream::iter(children)
                        .map(|child| {
                            Arc::clone(&self).expand(child, DependencyRule::Dependencies)
                        })
                        .buffer_unordered(self.concurrency)
                        .try_collect::<()>()
                        .await
                }
                Direction::Deeper => {
                    for version in resolved {
                        if let Some(child) = self.commit(Some(&node), version).await? {
                            Arc::clone(&self)
                                .expand(child, DependencyRule::Dependencies)
                                .await?;
                        }
                    }
                    Ok(())
                }
            }
        })
    }

    /// Resolve the dependencies `rule` selects for `node`, concurrently.
    ///
    /// Unresolvable edges are logged and dropped; any other failure aborts
    /// with the dependency chain attached. The result is ordered by name.
    async fn resolve_dependencies(
        &self,
        node: &TraversalNode,
        rule: &DependencyRule,
    ) -> Result<Vec<Arc<PackageVersion>>, PkgError> {
        let wanted = rule.next_dependencies(&node.version());
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let resolved: Vec<(String, String, Option<Arc<PackageVersion>>)> = stream::iter(wanted)
            .map(|(name, constraint)| {
                let resolver = Arc::clone(&self.resolver);
                async move {
                    let found = resolver.resolve(&name, Some(constraint.as_str())).await;
                    found.map(|v| (name, constraint, v))
                }
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await
            .map_err(|e: PkgError| e.in_chain(&node.chain()))?;

        let mut versions: Vec<Arc<PackageVersion>> = resolved
            .into_iter()
            .filter_map(|(name, constraint, version)| {
                if version.is_none() {
                    warn!(
                        dependency = %name,
                        constraint = %constraint,
                        chain = %node.chain(),
                        "dropping unresolvable dependency"
                    );
                }
                version
            })
            .collect();
        versions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(versions)
    }
}
