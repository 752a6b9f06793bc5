//! Traversal tree: one arena per traversal run.
//!
//! Every committed occurrence of a package version is a node in the
//! context's arena. Nodes point at each other by index: `depender` is the
//! node whose dependency map produced this one, `parent` is where placement
//! (hoisting) put it. A parent of `None` means the top of the install tree.

use super::model::{PackageId, PackageVersion};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Index of a node in its context's arena.
pub type NodeId = usize;

/// Order in which a traversal expands and emits nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Emit all immediate dependencies of a node before descending into any of them.
    #[default]
    Wider,
    /// Fully expand each dependency before moving to its next sibling.
    Deeper,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wider" => Ok(Self::Wider),
            "deeper" => Ok(Self::Deeper),
            other => Err(format!("unknown traversal direction '{other}'")),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Wider => "wider",
            Self::Deeper => "deeper",
        })
    }
}

#[derive(Debug)]
struct NodeData {
    version: Arc<PackageVersion>,
    depender: Option<NodeId>,
    parent: Option<NodeId>,
    level: usize,
    dependency_level: usize,
    duplicate: bool,
    /// Raw dependency edges expanded from this node.
    dependencies: BTreeMap<PackageId, NodeId>,
    /// Nodes placed directly under this one.
    children: BTreeMap<PackageId, NodeId>,
}

#[derive(Debug, Default)]
struct Arena {
    nodes: Vec<NodeData>,
    roots: Vec<NodeId>,
    /// Nodes placed at the top of the install tree.
    top: BTreeMap<PackageId, NodeId>,
    /// First committer of each package version.
    claims: HashMap<PackageId, NodeId>,
}

/// What a placement container already holds under a given package name.
enum Slot {
    Free,
    Same,
    Conflict,
}

impl Arena {
    fn children_of(&self, container: Option<NodeId>) -> &BTreeMap<PackageId, NodeId> {
        match container {
            Some(id) => &self.nodes[id].children,
            None => &self.top,
        }
    }

    fn slot(&self, container: Option<NodeId>, id: &PackageId) -> Slot {
        let from = PackageId::new(id.name.clone(), String::new());
        let mut slot = Slot::Free;
        for placed in self
            .children_of(container)
            .range(from..)
            .map(|(k, _)| k)
            .take_while(|k| k.name == id.name)
        {
            if placed.version == id.version {
                return Slot::Same;
            }
            slot = Slot::Conflict;
        }
        slot
    }

    /// Pick the placement container for a dependency of `depender`.
    ///
    /// Climbs from the depender through its placement ancestors to the top,
    /// stopping below the first level that holds a different version of the
    /// same package, or at the level that already holds this exact version.
    fn place(&self, depender: Option<NodeId>, id: &PackageId) -> Option<NodeId> {
        let start = depender?;
        let mut lowest = start;
        let mut candidate = Some(start);
        loop {
            match self.slot(candidate, id) {
                Slot::Same => return candidate,
                Slot::Conflict => return Some(lowest),
                Slot::Free => match candidate {
                    None => return None,
                    Some(c) => {
                        lowest = c;
                        candidate = self.nodes[c].parent;
                    }
                },
            }
        }
    }
}

/// State of one traversal run: direction, roots, and the claim table.
#[derive(Debug)]
pub struct TraversalContext {
    direction: Direction,
    arena: RwLock<Arena>,
}

impl TraversalContext {
    /// Create an empty context.
    #[must_use]
    pub fn new(direction: Direction) -> Arc<Self> {
        Arc::new(Self {
            direction,
            arena: RwLock::new(Arena::default()),
        })
    }

    /// The direction this traversal runs in.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    fn read(&self) -> RwLockReadGuard<'_, Arena> {
        self.arena.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arena> {
        self.arena.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(self: &Arc<Self>, id: NodeId) -> TraversalNode {
        TraversalNode {
            context: Arc::clone(self),
            id,
        }
    }

    /// Commit a resolved version as a dependency of `depender` (or as a root).
    ///
    /// Claims the version in the context, marking the node duplicate if another
    /// node already owns it, and places it in the install tree. Claiming and
    /// placement happen under one lock, so concurrent commits observe each
    /// other completely or not at all.
    ///
    /// Returns `None` if `depender` already has this version as a dependency.
    pub fn commit(
        self: &Arc<Self>,
        depender: Option<&TraversalNode>,
        version: Arc<PackageVersion>,
    ) -> Option<TraversalNode> {
        let depender = depender.map(|d| d.id);
        let key = version.id();
        let mut arena = self.write();

        if let Some(d) = depender {
            if arena.nodes[d].dependencies.contains_key(&key) {
                return None;
            }
        }

        let id = arena.nodes.len();
        let owner = *arena.claims.entry(key.clone()).or_insert(id);
        let container = arena.place(depender, &key);
        let level = container.map_or(0, |c| arena.nodes[c].level + 1);
        let dependency_level = depender.map_or(0, |d| arena.nodes[d].dependency_level + 1);

        arena.nodes.push(NodeData {
            version,
            depender,
            parent: container,
            level,
            dependency_level,
            duplicate: owner != id,
            dependencies: BTreeMap::new(),
            children: BTreeMap::new(),
        });

        // An owner already placed at this level keeps its slot
        match container {
            Some(c) => arena.nodes[c].children.entry(key.clone()).or_insert(id),
            None => arena.top.entry(key.clone()).or_insert(id),
        };
        match depender {
            Some(d) => {
                arena.nodes[d].dependencies.insert(key, id);
            }
            None => arena.roots.push(id),
        }

        drop(arena);
        Some(self.handle(id))
    }

    /// Root nodes in commit order.
    #[must_use]
    pub fn roots(self: &Arc<Self>) -> Vec<TraversalNode> {
        let roots = self.read().roots.clone();
        roots.into_iter().map(|id| self.handle(id)).collect()
    }

    /// Every committed node in commit order.
    #[must_use]
    pub fn nodes(self: &Arc<Self>) -> Vec<TraversalNode> {
        let len = self.len();
        (0..len).map(|id| self.handle(id)).collect()
    }

    /// Nodes placed at the top of the install tree.
    #[must_use]
    pub fn top(self: &Arc<Self>) -> Vec<TraversalNode> {
        let top: Vec<NodeId> = self.read().top.values().copied().collect();
        top.into_iter().map(|id| self.handle(id)).collect()
    }

    /// The node that owns a package version, if it was traversed.
    #[must_use]
    pub fn owner_of(self: &Arc<Self>, id: &PackageId) -> Option<TraversalNode> {
        let owner = self.read().claims.get(id).copied();
        owner.map(|id| self.handle(id))
    }

    /// All distinct package versions seen, sorted.
    #[must_use]
    pub fn traversed(&self) -> Vec<PackageId> {
        let mut ids: Vec<PackageId> = self.read().claims.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of committed nodes, duplicates included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of nodes marked duplicate.
    #[must_use]
    pub fn duplicate_count(&self) -> usize {
        self.read().nodes.iter().filter(|n| n.duplicate).count()
    }
}

/// Handle to one committed node. Cheap to clone.
#[derive(Clone)]
pub struct TraversalNode {
    context: Arc<TraversalContext>,
    id: NodeId,
}

impl TraversalNode {
    fn with<T>(&self, f: impl FnOnce(&NodeData) -> T) -> T {
        f(&self.context.read().nodes[self.id])
    }

    fn handles(&self, ids: Vec<NodeId>) -> Vec<TraversalNode> {
        ids.into_iter().map(|id| self.context.handle(id)).collect()
    }

    /// Arena index of this node.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The context this node belongs to.
    #[must_use]
    pub fn context(&self) -> &Arc<TraversalContext> {
        &self.context
    }

    /// The resolved version.
    #[must_use]
    pub fn version(&self) -> Arc<PackageVersion> {
        self.with(|n| Arc::clone(&n.version))
    }

    /// Depth in the install tree after placement (top is 0).
    #[must_use]
    pub fn level(&self) -> usize {
        self.with(|n| n.level)
    }

    /// Depth in the raw dependency graph (roots are 0).
    #[must_use]
    pub fn dependency_level(&self) -> usize {
        self.with(|n| n.dependency_level)
    }

    /// Whether another node already owned this version when this one was committed.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        self.with(|n| n.duplicate)
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.with(|n| n.depender.is_none())
    }

    /// The node that claimed this version (itself unless duplicate).
    #[must_use]
    pub fn owner(&self) -> TraversalNode {
        let key = self.with(|n| n.version.id());
        self.context
            .owner_of(&key)
            .unwrap_or_else(|| self.clone())
    }

    /// Placement parent, `None` at the top of the install tree.
    #[must_use]
    pub fn parent(&self) -> Option<TraversalNode> {
        self.with(|n| n.parent).map(|id| self.context.handle(id))
    }

    /// The node whose dependency this is, `None` for roots.
    #[must_use]
    pub fn depender(&self) -> Option<TraversalNode> {
        self.with(|n| n.depender).map(|id| self.context.handle(id))
    }

    /// Expanded dependencies, ordered by package id.
    #[must_use]
    pub fn dependencies(&self) -> Vec<TraversalNode> {
        self.handles(self.with(|n| n.dependencies.values().copied().collect()))
    }

    /// Nodes placed directly under this one, ordered by package id.
    #[must_use]
    pub fn children(&self) -> Vec<TraversalNode> {
        self.handles(self.with(|n| n.children.values().copied().collect()))
    }

    /// Placement chain from the top of the install tree down to this node.
    #[must_use]
    pub fn path(&self) -> Vec<TraversalNode> {
        let ids = {
            let arena = self.context.read();
            let mut ids = vec![self.id];
            let mut current = arena.nodes[self.id].parent;
            while let Some(id) = current {
                ids.push(id);
                current = arena.nodes[id].parent;
            }
            ids.reverse();
            ids
        };
        self.handles(ids)
    }

    /// Dependency chain from the root, e.g. `app@1.0.0 > lib@2.1.0`.
    #[must_use]
    pub fn chain(&self) -> String {
        let arena = self.context.read();
        let mut links = Vec::new();
        let mut current = Some(self.id);
        while let Some(id) = current {
            links.push(arena.nodes[id].version.to_string());
            current = arena.nodes[id].depender;
        }
        links.reverse();
        links.join(" > ")
    }
}

impl PartialEq for TraversalNode {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.context, &other.context) && self.id == other.id
    }
}

impl Eq for TraversalNode {}

impl fmt::Debug for TraversalNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with(|n| {
            f.debug_struct("TraversalNode")
                .field("id", &self.id)
                .field("version", &n.version.to_string())
                .field("level", &n.level)
                .field("dependency_level", &n.dependency_level)
                .field("duplicate", &n.duplicate)
                .finish()
        })
    }
}

impl fmt::Display for TraversalNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with(|n| write!(f, "{}", n.version))
    }
}
