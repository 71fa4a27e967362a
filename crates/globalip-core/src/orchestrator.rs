//! Apply cycle orchestration
//!
//! One call to [`Orchestrator::apply`] is one apply cycle:
//!
//! 1. Build the [`ApplyGraph`] for the plan (cycles fail before any remote call)
//! 2. Walk the levels in order; nodes within a level run concurrently
//! 3. Record every converged node's outputs into a fresh [`ConvergedState`]
//! 4. Delete stored bindings the plan no longer names
//! 5. Flush the state store
//!
//! A failed node does not stop unrelated nodes. Nodes that depend on it never
//! see its outputs and fail with [`Error::UnresolvedDependency`].

use crate::cancel::CancelToken;
use crate::engine::{ReconcileOutcome, Reconciler};
use crate::error::{Error, Result};
use crate::graph::{ApplyGraph, GraphNode, NodeKind};
use crate::model::{GlobalIpBinding, Plan};
use crate::resolver::ConvergedState;
use crate::traits::TargetSource;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, info, warn};

/// What happened to one graph node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// The target source reported the target's attributes
    TargetConverged {
        /// Attributes available to references
        attributes: HashMap<String, String>,
    },
    /// A binding was reconciled (or deleted as an orphan)
    Binding(ReconcileOutcome),
}

/// Per-node result of an apply cycle
#[derive(Debug)]
pub struct NodeReport {
    /// Target id or binding name
    pub id: String,
    /// Node kind
    pub kind: NodeKind,
    /// Outcome, or the error that stopped the node
    pub result: Result<NodeOutcome>,
}

/// Summary of an apply cycle
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Reports in apply order
    pub nodes: Vec<NodeReport>,
    /// Whether the cycle stopped early because of cancellation
    pub cancelled: bool,
}

impl CycleReport {
    /// No node failed and the cycle ran to completion
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.nodes.iter().all(|n| n.result.is_ok())
    }

    /// Nodes that failed
    pub fn failures(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.nodes
            .iter()
            .filter_map(|n| n.result.as_ref().err().map(|e| (n.id.as_str(), e)))
    }

    /// Outcome of a node, if it succeeded
    pub fn outcome(&self, id: &str) -> Option<&NodeOutcome> {
        self.nodes
            .iter()
            .find(|n| n.id == id)
            .and_then(|n| n.result.as_ref().ok())
    }

    /// Binding state after the cycle, if the binding is bound
    pub fn binding(&self, name: &str) -> Option<&GlobalIpBinding> {
        match self.outcome(name)? {
            NodeOutcome::Binding(outcome) => outcome.binding(),
            NodeOutcome::TargetConverged { .. } => None,
        }
    }

    /// Error of a node, if it failed
    pub fn error(&self, id: &str) -> Option<&Error> {
        self.nodes
            .iter()
            .find(|n| n.id == id)
            .and_then(|n| n.result.as_ref().err())
    }
}

/// Drives apply cycles over a plan
pub struct Orchestrator {
    reconciler: Reconciler,
    targets: Box<dyn TargetSource>,
}

impl Orchestrator {
    /// Create a new orchestrator
    pub fn new(reconciler: Reconciler, targets: Box<dyn TargetSource>) -> Self {
        Self {
            reconciler,
            targets,
        }
    }

    /// The reconciler bindings are applied through
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Run one apply cycle
    ///
    /// # Errors
    ///
    /// Only plan-level failures are returned as `Err`: an invalid graph or a
    /// state store that cannot be listed or flushed. Per-node failures are
    /// reported in the [`CycleReport`].
    pub async fn apply(&self, plan: &Plan, cancel: &CancelToken) -> Result<CycleReport> {
        let graph = ApplyGraph::build(plan)?;
        info!(
            "Applying {} node(s) in {} level(s), targets from {}",
            graph.len(),
            graph.levels().len(),
            self.targets.source_name()
        );

        let mut converged = ConvergedState::new();
        let mut report = CycleReport::default();

        for (depth, level) in graph.levels().iter().enumerate() {
            if cancel.is_cancelled() {
                warn!("Apply cycle cancelled before level {}", depth);
                report.cancelled = true;
                break;
            }

            debug!("Applying level {} ({} node(s))", depth, level.len());
            let results = join_all(
                level
                    .iter()
                    .map(|node| self.apply_node(plan, node, &converged, cancel)),
            )
            .await;

            for (node, result) in level.iter().zip(results) {
                match &result {
                    Ok(outcome) => {
                        if let Some(outputs) = outputs_of(outcome) {
                            converged.record(node.id.clone(), outputs);
                        }
                    }
                    Err(Error::Cancelled) => report.cancelled = true,
                    Err(e) => error!("{} failed: {}", node.id, e),
                }
                report.nodes.push(NodeReport {
                    id: node.id.clone(),
                    kind: node.kind,
                    result,
                });
            }
        }

        if !report.cancelled {
            self.delete_orphans(plan, cancel, &mut report).await?;
        }

        self.reconciler.store().flush().await?;

        info!(
            "Apply cycle finished: {} node(s), {} failure(s){}",
            report.nodes.len(),
            report.failures().count(),
            if report.cancelled { ", cancelled" } else { "" }
        );

        Ok(report)
    }

    async fn apply_node(
        &self,
        plan: &Plan,
        node: &GraphNode,
        converged: &ConvergedState,
        cancel: &CancelToken,
    ) -> Result<NodeOutcome> {
        match node.kind {
            NodeKind::Target => {
                cancel.check()?;
                let spec = plan
                    .targets
                    .iter()
                    .find(|t| t.id == node.id)
                    .ok_or_else(|| Error::Other(format!("target {} missing from plan", node.id)))?;
                let attributes = self.targets.converge(spec).await?;
                Ok(NodeOutcome::TargetConverged { attributes })
            }
            NodeKind::Binding => {
                let spec = plan
                    .binding(&node.id)
                    .ok_or_else(|| Error::Other(format!("binding {} missing from plan", node.id)))?;
                self.reconciler
                    .reconcile(spec, converged, cancel)
                    .await
                    .map(NodeOutcome::Binding)
            }
        }
    }

    /// Destroy stored bindings that are no longer in the plan
    async fn delete_orphans(
        &self,
        plan: &Plan,
        cancel: &CancelToken,
        report: &mut CycleReport,
    ) -> Result<()> {
        let wanted: HashSet<&str> = plan.bindings.iter().map(|b| b.name.as_str()).collect();
        let mut stored = self.reconciler.store().list_bindings().await?;
        stored.sort();

        for name in stored.into_iter().filter(|n| !wanted.contains(n.as_str())) {
            info!("Binding {} is no longer planned, deleting it", name);
            let result = self.reconciler.destroy(&name, cancel).await;
            if matches!(result, Err(Error::Cancelled)) {
                report.cancelled = true;
            }
            report.nodes.push(NodeReport {
                id: name,
                kind: NodeKind::Binding,
                result: result.map(NodeOutcome::Binding),
            });
            if report.cancelled {
                break;
            }
        }

        Ok(())
    }
}

fn outputs_of(outcome: &NodeOutcome) -> Option<HashMap<String, String>> {
    match outcome {
        NodeOutcome::TargetConverged { attributes } => Some(attributes.clone()),
        NodeOutcome::Binding(outcome) => outcome.binding().map(GlobalIpBinding::outputs),
    }
}
