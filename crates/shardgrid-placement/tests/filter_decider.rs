//! Filter decider integration tests.
//!
//! Drives the decider through whole-cluster scenarios: dynamic cluster
//! filter updates, index filters, forced initial allocation across a
//! shard's lifecycle, and settings validation. Everything runs in-process
//! against hand-built cluster states.

use std::collections::BTreeSet;
use std::sync::Arc;

use shardgrid_placement::decider::PASSES_FILTERS;
use shardgrid_placement::initial_recovery::INITIAL_RECOVERY_ID_SETTING;
use shardgrid_placement::{
    AllocationContext, ClusterFilterSettings, DecisionType, FilterAllocationDecider, FilterError,
    FilterKind, FilterRuleSet, FilterScope, update_index_settings,
};
use shardgrid_state::*;

use DecisionType::{No, Yes};

fn make_node(id: &str, attr: &str) -> DiscoveryNode {
    DiscoveryNode::new(id).with_attribute("attr", attr)
}

/// Three nodes attributed n1, n2, n3 and a single-shard index "test".
fn three_node_state() -> ClusterState {
    let mut state = ClusterState::new();
    state.nodes.add(make_node("node1", "n1"));
    state.nodes.add(make_node("node2", "n2"));
    state.nodes.add(make_node("node3", "n3"));
    state.put_index(IndexMetadata::new("test", 1, 0));
    state
}

fn existing_store_shard() -> ShardRouting {
    ShardRouting::unassigned(ShardId::new("test", 0), true, RecoverySource::ExistingStore)
}

/// Decisions for every node of the cluster, in node order.
fn decide_all(state: &ClusterState, settings: &ClusterFilterSettings) -> Vec<DecisionType> {
    let ctx = AllocationContext::new(state, settings.snapshot()).unwrap();
    let decider = FilterAllocationDecider::new();
    let shard = existing_store_shard();
    state
        .nodes
        .iter()
        .map(|node| decider.evaluate(&shard, node, &ctx).kind())
        .collect()
}

fn put(key: &str, value: &str) -> Settings {
    Settings::builder().put(key, value).build()
}

#[test]
fn cluster_require_filter() {
    let state = three_node_state();
    let settings = ClusterFilterSettings::new();
    let prefix = "cluster.routing.allocation.require.";

    assert_eq!(decide_all(&state, &settings), vec![Yes, Yes, Yes]);

    settings.apply_settings(&put(&format!("{prefix}_name"), "node1")).unwrap();
    assert_eq!(decide_all(&state, &settings), vec![Yes, No, No]);

    settings
        .apply_settings(
            &Settings::builder()
                .put(format!("{prefix}_name"), "node1")
                .put(format!("{prefix}attr"), "n2")
                .build(),
        )
        .unwrap();
    assert_eq!(decide_all(&state, &settings), vec![No, No, No]);

    settings
        .apply_settings(
            &Settings::builder()
                .put(format!("{prefix}_name"), "node1")
                .put(format!("{prefix}attr"), "n1")
                .build(),
        )
        .unwrap();
    assert_eq!(decide_all(&state, &settings), vec![Yes, No, No]);
}

#[test]
fn cluster_include_filter() {
    let state = three_node_state();
    let settings = ClusterFilterSettings::new();
    let key = "cluster.routing.allocation.include.attr";

    settings.apply_settings(&put(key, "n1,n2,n3")).unwrap();
    assert_eq!(decide_all(&state, &settings), vec![Yes, Yes, Yes]);

    settings.apply_settings(&put(key, "n2,n3")).unwrap();
    assert_eq!(decide_all(&state, &settings), vec![No, Yes, Yes]);
}

#[test]
fn cluster_exclude_filter() {
    let state = three_node_state();
    let settings = ClusterFilterSettings::new();
    let prefix = "cluster.routing.allocation.exclude.";

    settings.apply_settings(&put(&format!("{prefix}_name"), "node1")).unwrap();
    assert_eq!(decide_all(&state, &settings), vec![No, Yes, Yes]);

    settings
        .apply_settings(
            &Settings::builder()
                .put(format!("{prefix}_name"), "node1")
                .put(format!("{prefix}attr"), "n2")
                .build(),
        )
        .unwrap();
    assert_eq!(decide_all(&state, &settings), vec![No, No, Yes]);

    settings.apply_settings(&put(&format!("{prefix}attr"), "n1,n2,n3")).unwrap();
    assert_eq!(decide_all(&state, &settings), vec![No, No, No]);

    settings
        .update_settings(
            &Settings::builder()
                .put_null(format!("{prefix}attr"))
                .build(),
        )
        .unwrap();
    assert_eq!(decide_all(&state, &settings), vec![Yes, Yes, Yes]);
}

#[test]
fn require_and_exclude_combined() {
    let state = three_node_state();
    let settings = ClusterFilterSettings::from_settings(
        &Settings::builder()
            .put("cluster.routing.allocation.require._name", "node1")
            .put("cluster.routing.allocation.exclude._name", "node2")
            .build(),
    )
    .unwrap();

    let decisions = decide_all(&state, &settings);
    assert_eq!(decisions[0], Yes);
    assert_eq!(decisions[1], No);
}

#[test]
fn include_keys_are_anded() {
    let mut state = ClusterState::new();
    state.nodes.add(make_node("node1", "n1").with_attribute("zone", "a"));
    state.nodes.add(make_node("node2", "n2").with_attribute("zone", "b"));
    state.nodes.add(make_node("node3", "n3").with_attribute("zone", "a"));
    state.put_index(IndexMetadata::new("test", 1, 0));

    let settings = ClusterFilterSettings::from_settings(
        &Settings::builder()
            .put("cluster.routing.allocation.include.attr", "n1,n2")
            .put("cluster.routing.allocation.include.zone", "a")
            .build(),
    )
    .unwrap();

    assert_eq!(decide_all(&state, &settings), vec![Yes, No, No]);
}

#[test]
fn require_failure_wins_over_include_match() {
    let state = three_node_state();
    let settings = ClusterFilterSettings::from_settings(
        &Settings::builder()
            .put("cluster.routing.allocation.require.attr", "n3")
            .put("cluster.routing.allocation.include.attr", "n1,n2,n3")
            .build(),
    )
    .unwrap();

    assert_eq!(decide_all(&state, &settings), vec![No, No, Yes]);
}

#[test]
fn index_and_cluster_scopes_both_apply() {
    let mut state = three_node_state();
    state.index_mut("test").unwrap().settings =
        put("index.routing.allocation.exclude.attr", "n3");
    let settings =
        ClusterFilterSettings::from_settings(&put("cluster.routing.allocation.exclude._name", "node1"))
            .unwrap();

    assert_eq!(decide_all(&state, &settings), vec![No, Yes, No]);
}

#[test]
fn comma_and_list_values_decide_identically() {
    let mut state = ClusterState::new();
    state
        .nodes
        .add(DiscoveryNode::new("node1").with_host("h1", "192.168.0.10"));
    state
        .nodes
        .add(DiscoveryNode::new("node2").with_host("h2", "192.168.0.11"));
    state
        .nodes
        .add(DiscoveryNode::new("node3").with_host("h3", "192.168.0.12"));
    state.put_index(IndexMetadata::new("test", 1, 0));

    for ip_key in ["_ip", "_host_ip"] {
        for kind in FilterKind::ALL {
            let key = format!("cluster.routing.allocation.{kind}.{ip_key}");
            let comma = ClusterFilterSettings::from_settings(&put(&key, "192.168.0.10,192.168.0.11"))
                .unwrap();
            let list = ClusterFilterSettings::from_settings(
                &Settings::builder()
                    .put_list(key.as_str(), ["192.168.0.10", "192.168.0.11"])
                    .build(),
            )
            .unwrap();

            let expected = match kind {
                FilterKind::Exclude => vec![No, No, Yes],
                FilterKind::Require | FilterKind::Include => vec![Yes, Yes, No],
            };
            assert_eq!(decide_all(&state, &comma), expected, "{key}");
            assert_eq!(decide_all(&state, &list), expected, "{key}");
        }
    }
}

#[test]
fn wildcard_ip_filter_matches_subnet_prefix() {
    let mut state = ClusterState::new();
    state
        .nodes
        .add(DiscoveryNode::new("node1").with_publish_address("192.168.1.5"));
    state
        .nodes
        .add(DiscoveryNode::new("node2").with_publish_address("10.1.1.5"));
    state.put_index(IndexMetadata::new("test", 1, 0));

    let settings =
        ClusterFilterSettings::from_settings(&put("cluster.routing.allocation.require._publish_ip", "192.168.*"))
            .unwrap();
    assert_eq!(decide_all(&state, &settings), vec![Yes, No]);
}

#[test]
fn invalid_ip_filters_are_rejected() {
    for scope in [FilterScope::Cluster, FilterScope::Index] {
        for kind in FilterKind::ALL {
            for ip_key in ["_ip", "_host_ip", "_publish_ip"] {
                for invalid in ["192..168.1.1", "192.300.1.1"] {
                    let key = format!("{}.{kind}.{ip_key}", scope.prefix());
                    let err = FilterRuleSet::validate(scope, &put(&key, invalid)).unwrap_err();
                    assert_eq!(err.to_string(), format!("invalid IP address [{invalid}] for [{key}]"));
                }
            }
        }
    }
}

#[test]
fn wildcard_ip_filters_are_accepted() {
    for kind in FilterKind::ALL {
        for ip_key in ["_ip", "_host_ip", "_publish_ip"] {
            for wildcard in ["192.168.*", "192.*.1.1"] {
                let key = format!("index.routing.allocation.{kind}.{ip_key}");
                FilterRuleSet::validate(FilterScope::Index, &put(&key, wildcard)).unwrap();
            }
        }
    }
}

#[test]
fn null_filter_value_is_accepted_and_ignored() {
    for kind in FilterKind::ALL {
        let key = format!("index.routing.allocation.{kind}.name");
        let rules =
            FilterRuleSet::build(FilterScope::Index, &Settings::builder().put_null(key).build()).unwrap();
        assert!(rules.is_empty());
    }
}

#[test]
fn rejected_cluster_update_keeps_old_rules_active() {
    let state = three_node_state();
    let settings =
        ClusterFilterSettings::from_settings(&put("cluster.routing.allocation.exclude._name", "node1"))
            .unwrap();

    let err = settings
        .apply_settings(
            &Settings::builder()
                .put("cluster.routing.allocation.exclude._name", "node2")
                .put("cluster.routing.allocation.require._ip", "192.300.1.1")
                .build(),
        )
        .unwrap_err();
    assert!(matches!(err, FilterError::InvalidIp { .. }));
    assert_eq!(decide_all(&state, &settings), vec![No, Yes, Yes]);
}

#[test]
fn rejected_index_update_keeps_old_rules_active() {
    let mut state = three_node_state();
    let settings = ClusterFilterSettings::new();

    update_index_settings(&mut state, "test", &put("index.routing.allocation.exclude._name", "node1"))
        .unwrap();
    assert_eq!(decide_all(&state, &settings), vec![No, Yes, Yes]);

    let err = update_index_settings(
        &mut state,
        "test",
        &Settings::builder()
            .put("index.routing.allocation.exclude._name", "node2")
            .put("index.routing.allocation.require._ip", "192.300.1.1")
            .build(),
    )
    .unwrap_err();
    assert!(matches!(err, FilterError::InvalidIp { .. }));
    assert_eq!(decide_all(&state, &settings), vec![No, Yes, Yes]);
}

#[test]
fn invalid_index_filters_do_not_block_other_indices() {
    let mut state = three_node_state();
    state.index_mut("test").unwrap().settings = put("index.routing.allocation.require.attr", "n2");
    // Written straight into metadata, bypassing validation.
    state.put_index(
        IndexMetadata::new("bad", 1, 0)
            .with_settings(put("index.routing.allocation.require._ip", "192.300.1.1")),
    );

    let ctx = AllocationContext::new(&state, Arc::new(FilterRuleSet::empty(FilterScope::Cluster)))
        .unwrap()
        .with_explain(true);
    let decider = FilterAllocationDecider::new();
    let good = existing_store_shard();
    let bad = ShardRouting::unassigned(ShardId::new("bad", 0), true, RecoverySource::ExistingStore);

    let good_decisions: Vec<_> = state
        .nodes
        .iter()
        .map(|node| decider.evaluate(&good, node, &ctx).kind())
        .collect();
    assert_eq!(good_decisions, vec![No, Yes, No]);

    for node in state.nodes.iter() {
        let decision = decider.evaluate(&bad, node, &ctx);
        assert_eq!(decision.kind(), No);
        assert_eq!(
            decision.explanation(),
            Some(
                "index [bad] has invalid allocation filters: invalid IP address [192.300.1.1] \
                 for [index.routing.allocation.require._ip]"
            )
        );
    }
}

// ── Forced initial allocation ─────────────────────────────────────

/// Two nodes, an index "idx" with one shard and one replica whose first
/// copy is restricted to node2, either by pinning (empty store) or because
/// node2 holds every shard of the resize source (local shards).
fn initial_recovery_state(primary_source: &RecoverySource) -> ClusterState {
    let mut state = ClusterState::new();
    state.nodes.add(DiscoveryNode::new("node1"));
    state.nodes.add(DiscoveryNode::new("node2"));

    let mut index = IndexMetadata::new("idx", 1, 1)
        .with_settings(put(INITIAL_RECOVERY_ID_SETTING, "node2"));

    if *primary_source == RecoverySource::LocalShards {
        let mut source = IndexMetadata::new("sourceIndex", 2, 0);
        source.put_in_sync_allocation_id(0, "aid0");
        source.put_in_sync_allocation_id(1, "aid1");
        state.put_index(source);
        for shard in 0..2 {
            state.routing_table.add(ShardRouting::started(
                ShardId::new("sourceIndex", shard),
                true,
                "node2",
                format!("aid{shard}"),
            ));
        }
        index = index.with_resize_source("sourceIndex");
    }

    state.put_index(index);
    state
        .route_new_index("idx", primary_source.clone())
        .unwrap();
    state
}

fn primary(state: &ClusterState) -> ShardRouting {
    state.routing_table.primary("idx", 0).cloned().unwrap()
}

fn explain_on(state: &ClusterState, shard: &ShardRouting, node: &str) -> (DecisionType, String) {
    let ctx = AllocationContext::new(state, Arc::new(FilterRuleSet::empty(FilterScope::Cluster)))
        .unwrap()
        .with_explain(true);
    let node = state.nodes.get(node).unwrap();
    let decision = FilterAllocationDecider::new().evaluate(shard, node, &ctx);
    (decision.kind(), decision.explanation().unwrap_or_default().to_string())
}

#[test]
fn initial_recovery_is_retired_after_first_start() {
    for source in [RecoverySource::EmptyStore, RecoverySource::LocalShards] {
        let mut state = initial_recovery_state(&source);
        let shard_id = ShardId::new("idx", 0);

        // Only node2 is allowed for the very first copy.
        let (kind, text) = explain_on(&state, &primary(&state), "node2");
        assert_eq!(kind, Yes);
        assert_eq!(text, PASSES_FILTERS);

        let (kind, text) = explain_on(&state, &primary(&state), "node1");
        assert_eq!(kind, No);
        if source == RecoverySource::LocalShards {
            assert_eq!(
                text,
                "initial allocation of the shrunken index is only allowed on nodes [_id:\"node2\"] \
                 that hold a copy of every shard in the index"
            );
        } else {
            assert_eq!(
                text,
                "initial allocation of the index is only allowed on nodes [_id:\"node2\"]"
            );
        }

        // Start the primary on node2, then the replica on node1.
        {
            let copies = state.routing_table.copies_mut("idx", 0).unwrap();
            copies.iter_mut().find(|c| c.primary).unwrap().initialize("node2", "p-1");
        }
        state.start_shard(&shard_id, "node2").unwrap();
        {
            let copies = state.routing_table.copies_mut("idx", 0).unwrap();
            copies.iter_mut().find(|c| !c.primary).unwrap().initialize("node1", "r-1");
        }
        state.start_shard(&shard_id, "node1").unwrap();

        // node1 leaves, the primary fails. The failed copy comes back with
        // its initial recovery source: only the in-sync registry retires
        // the gate.
        let node1 = state.nodes.remove("node1").unwrap();
        {
            let copies = state.routing_table.copies_mut("idx", 0).unwrap();
            for copy in copies.iter_mut() {
                if copy.primary {
                    copy.fail(source.clone());
                } else {
                    copy.fail(RecoverySource::Peer);
                }
            }
        }
        state.nodes.add(node1);

        let failed = primary(&state);
        assert!(failed.is_unassigned());
        for node in ["node1", "node2"] {
            let (kind, text) = explain_on(&state, &failed, node);
            assert_eq!(kind, Yes, "{node} after first start ({source:?})");
            assert_eq!(text, PASSES_FILTERS);
        }

        // Reallocated onto node1 and started there; both nodes stay eligible.
        {
            let copies = state.routing_table.copies_mut("idx", 0).unwrap();
            copies.iter_mut().find(|c| c.primary).unwrap().initialize("node1", "p-2");
        }
        state.start_shard(&shard_id, "node1").unwrap();
        let moved = primary(&state);
        for node in ["node1", "node2"] {
            assert_eq!(explain_on(&state, &moved, node).0, Yes);
        }
    }
}

#[test]
fn replicas_are_not_gated_by_initial_recovery() {
    let state = initial_recovery_state(&RecoverySource::EmptyStore);
    let replica = state
        .routing_table
        .copies("idx", 0)
        .iter()
        .find(|c| !c.primary)
        .cloned()
        .unwrap();
    assert_eq!(explain_on(&state, &replica, "node1").0, Yes);
}

#[test]
fn forced_initial_nodes_for_resize_target() {
    let mut state = ClusterState::new();
    for id in ["node-1", "node-2"] {
        state.nodes.add(DiscoveryNode::new(id));
    }
    let mut source = IndexMetadata::new("source", 2, 0);
    source.put_in_sync_allocation_id(0, "s0");
    source.put_in_sync_allocation_id(1, "s1");
    state.put_index(source);
    state
        .routing_table
        .add(ShardRouting::started(ShardId::new("source", 0), true, "node-2", "s0"));
    state
        .routing_table
        .add(ShardRouting::started(ShardId::new("source", 1), true, "node-2", "s1"));
    state
        .routing_table
        .add(ShardRouting::started(ShardId::new("source", 0), false, "node-1", "s0r"));
    state.put_index(IndexMetadata::new("target", 1, 0).with_resize_source("source"));

    let ctx =
        AllocationContext::new(&state, Arc::new(FilterRuleSet::empty(FilterScope::Cluster))).unwrap();
    let shard = ShardRouting::unassigned(ShardId::new("target", 0), true, RecoverySource::LocalShards);
    let decider = FilterAllocationDecider::new();

    assert_eq!(
        decider.forced_initial_nodes(&shard, &ctx),
        Some(BTreeSet::from(["node-2".to_string()]))
    );
    assert!(decider.evaluate(&shard, state.nodes.get("node-2").unwrap(), &ctx).is_yes());
    assert!(decider.evaluate(&shard, state.nodes.get("node-1").unwrap(), &ctx).is_no());
}

#[test]
fn forced_initial_nodes_only_reported_for_local_shards() {
    let mut state = ClusterState::new();
    state.nodes.add(DiscoveryNode::new("node-1"));
    state.nodes.add(DiscoveryNode::new("node-2"));
    state.put_index(
        IndexMetadata::new("index", 1, 0).with_settings(put(INITIAL_RECOVERY_ID_SETTING, "node-1")),
    );
    let ctx =
        AllocationContext::new(&state, Arc::new(FilterRuleSet::empty(FilterScope::Cluster))).unwrap();
    let decider = FilterAllocationDecider::new();

    let local = ShardRouting::unassigned(ShardId::new("index", 0), true, RecoverySource::LocalShards);
    assert_eq!(
        decider.forced_initial_nodes(&local, &ctx),
        Some(BTreeSet::from(["node-1".to_string()]))
    );

    let new_shard = ShardRouting::unassigned(ShardId::new("index", 0), true, RecoverySource::EmptyStore);
    assert_eq!(decider.forced_initial_nodes(&new_shard, &ctx), None);
    // The pin still gates evaluation of the new shard.
    assert!(decider.evaluate(&new_shard, state.nodes.get("node-2").unwrap(), &ctx).is_no());
}

#[test]
fn forced_set_overrides_filters() {
    let mut state = initial_recovery_state(&RecoverySource::EmptyStore);
    state.index_mut("idx").unwrap().settings = Settings::builder()
        .put(INITIAL_RECOVERY_ID_SETTING, "node2")
        .put("index.routing.allocation.exclude._name", "node2")
        .build();

    let (kind, _) = explain_on(&state, &primary(&state), "node2");
    assert_eq!(kind, Yes);
}

// ── Concurrency ───────────────────────────────────────────────────

#[test]
fn readers_never_observe_a_mixed_snapshot() {
    let state = three_node_state();
    let settings = ClusterFilterSettings::new();
    let variant = |n: &str| {
        Settings::builder()
            .put("cluster.routing.allocation.require._name", format!("node{n}"))
            .put("cluster.routing.allocation.include.attr", format!("n{n}"))
            .build()
    };

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for round in 0..200 {
                let n = if round % 2 == 0 { "1" } else { "2" };
                settings.apply_settings(&variant(n)).unwrap();
            }
        });

        for _ in 0..4 {
            scope.spawn(|| {
                let decider = FilterAllocationDecider::new();
                let shard = existing_store_shard();
                for _ in 0..200 {
                    let snapshot = settings.snapshot();
                    if let (Some(name), Some(attr)) = (
                        snapshot.rule(FilterKind::Require, "_name"),
                        snapshot.rule(FilterKind::Include, "attr"),
                    ) {
                        assert_eq!(&name.values[0][4..], &attr.values[0][1..]);
                    }

                    let ctx = AllocationContext::new(&state, snapshot).unwrap();
                    let allowed = state
                        .nodes
                        .iter()
                        .filter(|node| decider.evaluate(&shard, node, &ctx).is_yes())
                        .count();
                    // Either no filters yet (all three) or exactly one node.
                    assert!(allowed == 3 || allowed == 1, "allowed {allowed}");
                }
            });
        }
    });
}
