/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

mod common;

use accessplan::candidate::{CandidateKind, JoinKind};
use accessplan::{AccessPlanner, CandidateId, Environment, InstanceId, JoinType, RelationId};
use common::{candidate_of, create_synthetic_catalog, create_test_catalog, kind_of};
use shared::config::PlannerConfig;

struct TwoTables {
    root: RelationId,
    t0: InstanceId,
    t1: InstanceId,
}

fn create_two_table_join(env: &mut Environment<'_>) -> TwoTables {
    let t1 = env.add_instance("t1", "t1").unwrap();
    let t0 = env.add_instance("t0", "t0").unwrap();
    let x = env.field(t0, "x").unwrap();
    let y = env.field(t1, "y").unwrap();
    let predicate = env.equal(x, y);
    // written with the indexed table first
    let first = env.table_relation(t1);
    let second = env.table_relation(t0);
    let root = env.join(JoinType::Inner, vec![first, second], Some(predicate));
    TwoTables { root, t0, t1 }
}

fn join_sides(env: &Environment<'_>, id: CandidateId) -> (CandidateId, CandidateId) {
    match kind_of(env, id) {
        CandidateKind::Join(join) => {
            assert_eq!(join.kind, JoinKind::Inner);
            (join.outer(), join.inner())
        }
        other => panic!("expected a join, got {:?}", other),
    }
}

#[test]
fn test_indexed_table_is_probed_from_the_small_one() {
    let catalog = create_test_catalog();
    let config = PlannerConfig::default();
    let mut planner = AccessPlanner::new(&catalog, &config);
    let tables = create_two_table_join(planner.env_mut());

    let plan = planner.plan(tables.root).unwrap();
    let env = planner.env();
    let (outer, inner) = join_sides(env, plan);
    assert_eq!(candidate_of(env, outer).base.instances, vec![tables.t0]);
    assert_eq!(candidate_of(env, inner).base.instances, vec![tables.t1]);

    // one index probe per outer tuple
    let outer_cost = &candidate_of(env, outer).base.cost;
    let inner_cost = &candidate_of(env, inner).base.cost;
    let join_cost = &candidate_of(env, plan).base.cost;
    assert!(inner_cost.is_fetch());
    assert_eq!(outer_cost.tuple_count(), 100.0);
    let expected = outer_cost.total_cost().get() + inner_cost.repeat_cost().get() * 100.0;
    let actual = join_cost.total_cost().get();
    assert!((actual - expected).abs() <= expected * 1e-9, "{} != {}", actual, expected);
}

#[test]
fn test_lowered_join_probes_the_index() {
    let catalog = create_test_catalog();
    let config = PlannerConfig::default();
    let mut planner = AccessPlanner::new(&catalog, &config);
    let tables = create_two_table_join(planner.env_mut());

    let plan = planner.plan(tables.root).unwrap();
    let program = planner.lower(plan, &[]).unwrap();
    let text = program.explain();
    assert!(text.contains("scan t0_record"), "{}", text);
    assert!(text.contains("scan t1_y search("), "{}", text);
    assert_eq!(program.count_actions("iterate"), 1);
    assert_eq!(program.count_actions("output"), 1);
}

#[test]
fn test_explain_lists_both_sides() {
    let catalog = create_test_catalog();
    let config = PlannerConfig::default();
    let mut planner = AccessPlanner::new(&catalog, &config);
    let tables = create_two_table_join(planner.env_mut());

    let plan = planner.plan(tables.root).unwrap();
    let node = planner.explain(plan).unwrap();
    assert_eq!(node.children.len(), 2);
    assert_eq!(node.children[0].tables, vec!["t0".to_string()]);
    assert_eq!(node.children[1].tables, vec!["t1".to_string()]);
    let json = serde_json::to_value(&node).unwrap();
    assert_eq!(json["children"].as_array().map(Vec::len), Some(2));
}

#[test]
fn test_losing_candidates_are_released() {
    let catalog = create_synthetic_catalog(&[50.0, 5.0, 500.0, 20.0]);
    let config = PlannerConfig {
        join_max_candidates: 0,
        ..PlannerConfig::default()
    };
    let mut planner = AccessPlanner::new(&catalog, &config);
    let env = planner.env_mut();
    let mut operands = Vec::new();
    for position in 0..4 {
        let name = format!("r{}", position);
        let instance = env.add_instance(&name, &name).unwrap();
        operands.push(env.table_relation(instance));
    }
    let root = env.join(JoinType::Inner, operands, None);

    let plan = planner.plan(root).unwrap();
    let env = planner.env();
    let mut reachable = Default::default();
    env.reachable(plan, &mut reachable).unwrap();
    assert_eq!(env.candidate_count(), reachable.len());
}

#[test]
fn test_semi_join_survives_planning() {
    let catalog = create_test_catalog();
    let config = PlannerConfig::default();
    let mut planner = AccessPlanner::new(&catalog, &config);
    let env = planner.env_mut();
    let t0 = env.add_instance("t0", "t0").unwrap();
    let t1 = env.add_instance("t1", "t1").unwrap();
    let x = env.field(t0, "x").unwrap();
    let y = env.field(t1, "y").unwrap();
    let predicate = env.equal(y, x);
    let outer = env.table_relation(t0);
    let probe = env.table_relation(t1);
    let root = env.join(JoinType::NotExists, vec![outer, probe], Some(predicate));

    let plan = planner.plan(root).unwrap();
    let program = planner.lower(plan, &[]).unwrap();
    assert_eq!(program.count_actions("not-exists"), 1);
}
