//! The full rewrite pipeline: mark, cluster, encapsulate.
//!
//! `rewrite_graph` is the single entry point callers hand a host graph to.
//! After it returns, every viable device region has been replaced by one
//! encapsulation node and registered for dispatch; the rest of the graph is
//! untouched and still runs on the host.

use tracing::info;

use crate::api;
use crate::cluster::{assign_clusters, ClusterId, ClusterOptions};
use crate::encapsulate::encapsulate_clusters;
use crate::error::BridgeResult;
use crate::graph::Graph;
use crate::mark::{mark_graph, MarkOptions};

/// Knobs for one rewrite run. Defaults mirror the runtime settings in
/// [`crate::api`].
#[derive(Debug, Clone, Default)]
pub struct RewriteOptions {
    pub cluster: ClusterOptions,
}

/// What a rewrite run did to the graph.
#[derive(Debug, Clone, Default)]
pub struct RewriteReport {
    /// Nodes that carried the mark after the marking pass.
    pub marked: usize,
    /// One `(node name, reason)` entry per node the marking pass rejected.
    pub reasons: Vec<(String, String)>,
    /// Encapsulation nodes created, in creation order.
    pub clusters: Vec<ClusterId>,
}

/// Rewrites `graph` in place, replacing each assigned cluster with an
/// encapsulation node. Does nothing when the bridge is disabled.
pub fn rewrite_graph(graph: &mut Graph, options: &RewriteOptions) -> BridgeResult<RewriteReport> {
    if !api::is_enabled() {
        return Ok(RewriteReport::default());
    }

    let mark_options = MarkOptions {
        disabled_ops: api::disabled_ops(),
    };
    let mark_report = mark_graph(graph, &mark_options)?;

    let assignment = assign_clusters(graph, &options.cluster)?;

    if api::is_logging_placement() {
        for id in graph.node_ids().collect::<Vec<_>>() {
            let node = graph.node(id)?;
            match assignment.cluster_of.get(&id) {
                Some(local) => {
                    info!(node = %node.name, op = %node.op_type, placement = %local)
                }
                None => info!(node = %node.name, op = %node.op_type, placement = "host"),
            }
        }
    }

    let clusters = encapsulate_clusters(graph, &assignment)?;
    info!(
        marked = mark_report.marked,
        clusters = clusters.len(),
        "rewrite complete"
    );

    Ok(RewriteReport {
        marked: mark_report.marked,
        reasons: mark_report.reasons,
        clusters,
    })
}
