//! Workflow graph management.
//!
//! A workflow is rooted at one CI or external CI node (`parent_id == 0`);
//! CD nodes hang below it. All operations run inside the caller's unit of
//! work.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{ConflictKind, EngineError, EngineResult};
use crate::models::{CiPipeline, NodeKind, WorkflowNodeMapping};
use crate::store::UnitOfWork;

pub type Node = (i64, NodeKind);

fn conflict(msg: impl Into<String>) -> EngineError {
    EngineError::Conflict(ConflictKind::GraphConflict(msg.into()))
}

/// Graph node of a CI pipeline. External pipelines are represented by
/// their webhook endpoint.
pub async fn node_of(uow: &mut dyn UnitOfWork, pipeline: &CiPipeline) -> EngineResult<Node> {
    if !pipeline.is_external() {
        return Ok((pipeline.id, NodeKind::CiPipeline));
    }
    let endpoint = uow
        .find_external_ci_by_pipeline(pipeline.id)
        .await?
        .ok_or_else(|| EngineError::not_found("external ci endpoint", pipeline.id))?;
    Ok((endpoint.id, NodeKind::Webhook))
}

pub async fn attach_ci(
    uow: &mut dyn UnitOfWork,
    workflow_id: i64,
    ci_pipeline_id: i64,
) -> EngineResult<WorkflowNodeMapping> {
    attach_root(uow, workflow_id, ci_pipeline_id, NodeKind::CiPipeline).await
}

pub async fn attach_external_ci(
    uow: &mut dyn UnitOfWork,
    workflow_id: i64,
    external_ci_id: i64,
) -> EngineResult<WorkflowNodeMapping> {
    attach_root(uow, workflow_id, external_ci_id, NodeKind::Webhook).await
}

async fn attach_root(
    uow: &mut dyn UnitOfWork,
    workflow_id: i64,
    child_id: i64,
    child_kind: NodeKind,
) -> EngineResult<WorkflowNodeMapping> {
    let existing = uow.find_mappings_by_workflow(workflow_id).await?;
    if let Some(root) = existing
        .iter()
        .find(|m| m.is_root() && m.child_kind.is_source())
    {
        return Err(conflict(format!(
            "workflow {workflow_id} already rooted at {} {}",
            root.child_kind, root.child_id
        )));
    }

    let mapping = uow
        .insert_mapping(WorkflowNodeMapping::root(workflow_id, child_id, child_kind))
        .await?;
    tracing::debug!(workflow_id, child_id, %child_kind, "attached workflow root");
    Ok(mapping)
}

/// Points every edge leaving `old` at `new`. Returns the rewritten edges.
pub async fn reparent(
    uow: &mut dyn UnitOfWork,
    old: Node,
    new: Node,
) -> EngineResult<Vec<WorkflowNodeMapping>> {
    let mut edges = uow.find_mappings_by_parent(old.0, old.1).await?;
    for edge in &mut edges {
        edge.parent_id = new.0;
        edge.parent_kind = Some(new.1);
        uow.update_mapping(edge).await?;
    }
    tracing::info!(
        old_id = old.0,
        old_kind = %old.1,
        new_id = new.0,
        new_kind = %new.1,
        edges = edges.len(),
        "reparented workflow edges"
    );
    Ok(edges)
}

/// Active CD pipelines reachable below `node`, breadth first.
pub async fn cd_descendants(uow: &mut dyn UnitOfWork, node: Node) -> EngineResult<Vec<i64>> {
    let mut found = Vec::new();
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([node]);

    while let Some((id, kind)) = queue.pop_front() {
        for edge in uow.find_mappings_by_parent(id, kind).await? {
            if edge.child_kind != NodeKind::CdPipeline || !seen.insert(edge.child_id) {
                continue;
            }
            let live = uow
                .find_cd_pipeline(edge.child_id)
                .await?
                .is_some_and(|cd| cd.active);
            if live {
                found.push(edge.child_id);
            }
            queue.push_back(edge.child());
        }
    }
    Ok(found)
}

/// Soft-deletes every edge into or out of `node`.
///
/// Fails with `HasDependents` while active CD pipelines hang below it.
/// Returns the root edge that was removed, if any.
pub async fn detach(
    uow: &mut dyn UnitOfWork,
    node: Node,
) -> EngineResult<Option<WorkflowNodeMapping>> {
    if !cd_descendants(uow, node).await?.is_empty() {
        return Err(EngineError::Conflict(ConflictKind::HasDependents));
    }

    let mut edges = uow.find_mappings_by_child(node.0, node.1).await?;
    edges.extend(uow.find_mappings_by_parent(node.0, node.1).await?);

    let mut root = None;
    for mut edge in edges {
        edge.active = false;
        uow.update_mapping(&edge).await?;
        if edge.is_root() && edge.child() == node {
            root = Some(edge);
        }
    }
    Ok(root)
}

/// Soft-deletes only the root edge of `node`, leaving its descendants in
/// place for a reparent.
pub async fn detach_root(
    uow: &mut dyn UnitOfWork,
    node: Node,
) -> EngineResult<WorkflowNodeMapping> {
    let mut root = uow
        .find_mappings_by_child(node.0, node.1)
        .await?
        .into_iter()
        .find(WorkflowNodeMapping::is_root)
        .ok_or_else(|| conflict(format!("{} {} has no workflow root", node.1, node.0)))?;
    root.active = false;
    uow.update_mapping(&root).await?;
    Ok(root)
}

/// Checks that the active edges of a workflow form a DAG and that every
/// CI or external CI node has exactly one incoming edge, its root.
pub async fn validate_workflow(uow: &mut dyn UnitOfWork, workflow_id: i64) -> EngineResult<()> {
    let edges = uow.find_mappings_by_workflow(workflow_id).await?;
    check_edges(workflow_id, &edges)
}

fn check_edges(workflow_id: i64, edges: &[WorkflowNodeMapping]) -> EngineResult<()> {
    let mut incoming: BTreeMap<Node, Vec<&WorkflowNodeMapping>> = BTreeMap::new();
    for edge in edges.iter().filter(|e| e.active) {
        incoming.entry(edge.child()).or_default().push(edge);
    }

    for (node, into) in &incoming {
        if node.1.is_source() && (into.len() != 1 || !into[0].is_root()) {
            return Err(conflict(format!(
                "{} {} in workflow {workflow_id} must have exactly one root edge",
                node.1, node.0
            )));
        }
    }

    // Kahn's algorithm over non-root edges.
    let mut indegree: BTreeMap<Node, usize> = BTreeMap::new();
    let mut children: BTreeMap<Node, Vec<Node>> = BTreeMap::new();
    for edge in edges.iter().filter(|e| e.active) {
        indegree.entry(edge.child()).or_insert(0);
        if let Some(parent) = edge.parent() {
            indegree.entry(parent).or_insert(0);
            *indegree.entry(edge.child()).or_insert(0) += 1;
            children.entry(parent).or_default().push(edge.child());
        }
    }

    let mut ready: VecDeque<Node> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();
    let mut visited = 0;
    while let Some(node) = ready.pop_front() {
        visited += 1;
        for child in children.get(&node).into_iter().flatten() {
            if let Some(d) = indegree.get_mut(child) {
                *d -= 1;
                if *d == 0 {
                    ready.push_back(*child);
                }
            }
        }
    }

    if visited != indegree.len() {
        return Err(conflict(format!("workflow {workflow_id} contains a cycle")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(id: i64, parent: Option<Node>, child: Node) -> WorkflowNodeMapping {
        WorkflowNodeMapping {
            id,
            workflow_id: 1,
            parent_id: parent.map_or(0, |p| p.0),
            parent_kind: parent.map(|p| p.1),
            child_id: child.0,
            child_kind: child.1,
            active: true,
        }
    }

    const CI: Node = (10, NodeKind::CiPipeline);
    const CD1: Node = (20, NodeKind::CdPipeline);
    const CD2: Node = (21, NodeKind::CdPipeline);

    #[test]
    fn rooted_tree_is_valid() {
        let edges = vec![
            edge(1, None, CI),
            edge(2, Some(CI), CD1),
            edge(3, Some(CD1), CD2),
        ];
        assert!(check_edges(1, &edges).is_ok());
    }

    #[test]
    fn cycle_between_cd_nodes_is_rejected() {
        let edges = vec![
            edge(1, None, CI),
            edge(2, Some(CI), CD1),
            edge(3, Some(CD1), CD2),
            edge(4, Some(CD2), CD1),
        ];
        let err = check_edges(1, &edges).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn ci_node_with_two_incoming_edges_is_rejected() {
        let other = (11, NodeKind::CiPipeline);
        let edges = vec![edge(1, None, CI), edge(2, None, other), edge(3, Some(other), CI)];
        assert!(matches!(
            check_edges(1, &edges),
            Err(EngineError::Conflict(ConflictKind::GraphConflict(_)))
        ));
    }

    #[test]
    fn inactive_edges_are_ignored() {
        let mut stale = edge(2, Some(CD1), CI);
        stale.active = false;
        let edges = vec![edge(1, None, CI), stale];
        assert!(check_edges(1, &edges).is_ok());
    }
}
