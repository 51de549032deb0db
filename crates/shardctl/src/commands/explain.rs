use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use tracing::debug;

use shardgrid_placement::{AllocationContext, ClusterFilterSettings, Decision, FilterAllocationDecider};
use shardgrid_state::{NodeId, ShardId};

use crate::scenario::Scenario;

/// Filter decisions for one shard copy against every node of a scenario.
#[derive(Debug, Serialize)]
pub struct ExplainReport {
    pub shard: ShardId,
    pub primary: bool,
    /// Nodes a resize target must start on, if its first start is pending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forced_nodes: Option<BTreeSet<NodeId>>,
    pub decisions: Vec<NodeDecision>,
}

#[derive(Debug, Serialize)]
pub struct NodeDecision {
    pub node: NodeId,
    #[serde(flatten)]
    pub decision: Decision,
}

pub fn explain(
    scenario_path: &str,
    index: &str,
    shard: u32,
    replica: bool,
    json: bool,
) -> anyhow::Result<()> {
    let scenario = Scenario::from_file(Path::new(scenario_path))?;
    let report = build_report(&scenario, index, shard, replica)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", format_report(&report));
    }
    Ok(())
}

pub fn build_report(
    scenario: &Scenario,
    index: &str,
    shard: u32,
    replica: bool,
) -> anyhow::Result<ExplainReport> {
    let state = scenario.cluster_state()?;
    let cluster_filters = ClusterFilterSettings::from_settings(&scenario.cluster_settings)
        .context("invalid cluster settings")?;
    let ctx = AllocationContext::new(&state, cluster_filters.snapshot())?.with_explain(true);

    let shard_id = ShardId::new(index, shard);
    let copy = state
        .routing_table
        .copies(index, shard)
        .iter()
        .find(|copy| copy.primary != replica)
        .with_context(|| {
            let kind = if replica { "replica" } else { "primary" };
            format!("no {kind} copy of {shard_id}")
        })?;

    let decider = FilterAllocationDecider::new();
    let decisions: Vec<NodeDecision> = state
        .nodes
        .iter()
        .map(|node| NodeDecision {
            node: node.id.clone(),
            decision: decider.evaluate(copy, node, &ctx),
        })
        .collect();
    debug!(shard = %shard_id, nodes = decisions.len(), "explained shard");

    Ok(ExplainReport {
        shard: shard_id,
        primary: copy.primary,
        forced_nodes: decider.forced_initial_nodes(copy, &ctx),
        decisions,
    })
}

pub fn format_report(report: &ExplainReport) -> String {
    let kind = if report.primary { "primary" } else { "replica" };
    let mut out = format!("{} {kind}\n", report.shard);
    if let Some(nodes) = &report.forced_nodes {
        let nodes: Vec<&str> = nodes.iter().map(String::as_str).collect();
        out.push_str(&format!("  forced initial nodes: [{}]\n", nodes.join(", ")));
    }
    for entry in &report.decisions {
        out.push_str(&format!("  {:<16} {}\n", entry.node, entry.decision));
    }
    out
}
