//! Apply-time dependency graph
//!
//! Every target and binding in a [`Plan`] is a node. A binding whose
//! `routes_to` references another resource gets an edge to that resource and
//! is applied strictly after it. Nodes are grouped into levels: all nodes in
//! a level are independent of each other and can be reconciled concurrently.
//!
//! ```text
//!  level 0:   vm1      vm2      vm3
//!              │        │        │
//!  level 1:   gip-a    gip-b    gip-c
//!                                │
//!  level 2:                     gip-d  (routes_to = ${gip-c.ip_address})
//! ```

use crate::error::{Error, Result};
use crate::model::Plan;
use std::collections::{BTreeMap, BTreeSet};

/// What a graph node stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A target resource converged by a [`crate::TargetSource`]
    Target,
    /// A global IP binding converged by the [`crate::Reconciler`]
    Binding,
}

/// A node in the apply graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    /// Resource identity (target id or binding name)
    pub id: String,
    /// Node kind
    pub kind: NodeKind,
}

/// Topologically layered apply graph
#[derive(Debug, Clone)]
pub struct ApplyGraph {
    levels: Vec<Vec<GraphNode>>,
    dependencies: BTreeMap<String, BTreeSet<String>>,
}

impl ApplyGraph {
    /// Build the graph for a plan
    ///
    /// # Errors
    ///
    /// - [`Error::Config`]: two nodes share an id
    /// - [`Error::UnresolvedDependency`]: a binding references an unknown resource
    /// - [`Error::DependencyCycle`]: bindings reference each other in a loop
    pub fn build(plan: &Plan) -> Result<Self> {
        let mut kinds: BTreeMap<String, NodeKind> = BTreeMap::new();

        let nodes = plan
            .targets
            .iter()
            .map(|t| (&t.id, NodeKind::Target))
            .chain(plan.bindings.iter().map(|b| (&b.name, NodeKind::Binding)));

        for (id, kind) in nodes {
            if id.is_empty() {
                return Err(Error::config("Resource identity cannot be empty"));
            }
            if kinds.insert(id.clone(), kind).is_some() {
                return Err(Error::config(format!("Duplicate resource identity: {id}")));
            }
        }

        let mut dependencies: BTreeMap<String, BTreeSet<String>> =
            kinds.keys().map(|id| (id.clone(), BTreeSet::new())).collect();

        for binding in &plan.bindings {
            if let Some(reference) = binding.routes_to.dependency() {
                if !kinds.contains_key(reference) {
                    return Err(Error::unresolved(
                        reference,
                        binding.routes_to.to_string(),
                        format!("binding {} references an unknown resource", binding.name),
                    ));
                }
                if let Some(deps) = dependencies.get_mut(&binding.name) {
                    deps.insert(reference.to_string());
                }
            }
        }

        let levels = layer(&kinds, &dependencies)?;
        Ok(Self {
            levels,
            dependencies,
        })
    }

    /// Nodes grouped by apply level, in apply order
    pub fn levels(&self) -> &[Vec<GraphNode>] {
        &self.levels
    }

    /// Direct dependencies of a node
    pub fn dependencies_of(&self, id: &str) -> impl Iterator<Item = &str> {
        self.dependencies
            .get(id)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }

    /// Total number of nodes
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}

/// Kahn's algorithm, one level at a time
fn layer(
    kinds: &BTreeMap<String, NodeKind>,
    dependencies: &BTreeMap<String, BTreeSet<String>>,
) -> Result<Vec<Vec<GraphNode>>> {
    let mut remaining: BTreeMap<&str, usize> = dependencies
        .iter()
        .map(|(id, deps)| (id.as_str(), deps.len()))
        .collect();

    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (id, deps) in dependencies {
        for dep in deps {
            dependents.entry(dep.as_str()).or_default().push(id.as_str());
        }
    }

    let mut levels = Vec::new();
    let mut ready: Vec<&str> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();

    while !ready.is_empty() {
        let mut next = Vec::new();
        for id in &ready {
            remaining.remove(id);
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        next.push(*dependent);
                    }
                }
            }
        }

        levels.push(
            ready
                .iter()
                .map(|id| GraphNode {
                    id: id.to_string(),
                    kind: kinds[*id],
                })
                .collect(),
        );

        next.sort_unstable();
        ready = next;
    }

    if !remaining.is_empty() {
        let stuck: Vec<&str> = remaining.keys().copied().collect();
        return Err(Error::DependencyCycle(stuck.join(", ")));
    }

    Ok(levels)
}
