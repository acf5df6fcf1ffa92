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

use accessplan::candidate::table::{Put, PutKind, UndoMode};
use accessplan::candidate::{CandidateKind, TableVariant};
use accessplan::{AccessPlanner, CandidateId, Environment, PlanError, RelationId};
use common::{create_distributed_catalog, kind_of};
use shared::catalog::ColumnId;
use shared::config::PlannerConfig;
use shared::program::{Action, ConstraintKind};

fn put_of<'e>(env: &'e Environment<'_>, id: CandidateId) -> &'e Put {
    match kind_of(env, id) {
        CandidateKind::Table(table) => match &table.variant {
            TableVariant::Put(put) => put,
            other => panic!("expected a write, got {:?}", other),
        },
        other => panic!("expected a table candidate, got {:?}", other),
    }
}

/// `insert into <target> select region, amount from staging`
fn create_insert(
    env: &mut Environment<'_>,
    target: &str,
    region: ColumnId,
    amount: ColumnId,
) -> RelationId {
    let staging = env.add_instance("staging", "s").unwrap();
    let target = env.add_instance(target, target).unwrap();
    let staged_region = env.field(staging, "region").unwrap();
    let staged_amount = env.field(staging, "amount").unwrap();
    let operand = env.table_relation(staging);
    env.put(
        PutKind::Insert,
        target,
        operand,
        vec![(region, staged_region), (amount, staged_amount)],
    )
}

#[test]
fn test_insert_writes_the_generator_first() {
    let catalog = create_distributed_catalog();
    let config = PlannerConfig::default();
    let mut planner = AccessPlanner::new(&catalog, &config);
    let root = create_insert(planner.env_mut(), "archive", ColumnId(1), ColumnId(2));

    let plan = planner.plan(root).unwrap();
    let env = planner.env();
    let put = put_of(env, plan);
    assert_eq!(put.targets.len(), 3);
    let generator = put.targets[0].file;
    assert_eq!(env.file(generator).unwrap().name, "archive_record");
    assert!(put.targets[0].depends_on.is_none());
    assert!(put.targets[1..]
        .iter()
        .all(|target| target.depends_on == Some(generator)));
    assert!(put.targets.iter().all(|target| target.undo == UndoMode::File));
    assert!(put.parallel);
    assert_eq!(put.not_null, vec![ColumnId(1)]);

    let program = planner.lower(plan, &[]).unwrap();
    assert_eq!(program.count_actions("insert"), 3);
    assert_eq!(program.count_actions("begin-parallel"), 1);
    assert_eq!(program.count_actions("check-constraint"), 1);
}

#[test]
fn test_thread_ceiling_serializes_the_writes() {
    let catalog = create_distributed_catalog();
    let config = PlannerConfig {
        thread_max: 2,
        ..PlannerConfig::default()
    };
    let mut planner = AccessPlanner::new(&catalog, &config);
    let root = create_insert(planner.env_mut(), "archive", ColumnId(1), ColumnId(2));

    let plan = planner.plan(root).unwrap();
    assert!(!put_of(planner.env(), plan).parallel);
    let program = planner.lower(plan, &[]).unwrap();
    assert_eq!(program.count_actions("begin-parallel"), 0);
}

#[test]
fn test_insert_without_not_null_value_checks_at_run_time() {
    let catalog = create_distributed_catalog();
    let config = PlannerConfig::default();
    let mut planner = AccessPlanner::new(&catalog, &config);
    let env = planner.env_mut();
    let staging = env.add_instance("staging", "s").unwrap();
    let archive = env.add_instance("archive", "a").unwrap();
    let amount = env.field(staging, "amount").unwrap();
    let operand = env.table_relation(staging);
    let root = env.put(PutKind::Insert, archive, operand, vec![(ColumnId(2), amount)]);

    let plan = planner.plan(root).unwrap();
    let put = put_of(planner.env(), plan);
    assert_eq!(put.not_null, vec![ColumnId(1)]);
    assert!(put.value_of(ColumnId(1)).is_some());

    let program = planner.lower(plan, &[]).unwrap();
    let checks: Vec<_> = program
        .all_actions()
        .filter_map(|action| match action {
            Action::CheckConstraint { kind, target, .. } => Some((*kind, target.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(checks, vec![(ConstraintKind::NotNull, "region".to_string())]);
    assert_eq!(program.count_actions("insert"), 3);
}

#[test]
fn test_delete_reads_the_target() {
    let catalog = create_distributed_catalog();
    let config = PlannerConfig::default();
    let mut planner = AccessPlanner::new(&catalog, &config);
    let env = planner.env_mut();
    let archive = env.add_instance("archive", "a").unwrap();
    let region = env.field(archive, "region").unwrap();
    let north = env.text("north");
    let condition = env.equal(region, north);
    let table = env.table_relation(archive);
    let operand = env.selection(table, condition);
    let root = env.put(PutKind::Delete, archive, operand, Vec::new());

    let plan = planner.plan(root).unwrap();
    assert_eq!(put_of(planner.env(), plan).targets.len(), 3);
    let program = planner.lower(plan, &[]).unwrap();
    assert_eq!(program.count_actions("expunge"), 3);
    assert!(program.count_actions("lock") >= 1);
}

#[test]
fn test_delete_from_another_table_is_rejected() {
    let catalog = create_distributed_catalog();
    let config = PlannerConfig::default();
    let mut planner = AccessPlanner::new(&catalog, &config);
    let env = planner.env_mut();
    let staging = env.add_instance("staging", "s").unwrap();
    let archive = env.add_instance("archive", "a").unwrap();
    let operand = env.table_relation(staging);
    let root = env.put(PutKind::Delete, archive, operand, Vec::new());

    assert!(matches!(planner.plan(root), Err(PlanError::NotSupported(_))));
}

#[test]
fn test_distributed_insert_rotates_over_cascades() {
    let catalog = create_distributed_catalog();
    let config = PlannerConfig::default();
    let mut planner = AccessPlanner::new(&catalog, &config);
    let first = create_insert(planner.env_mut(), "sales", ColumnId(0), ColumnId(1));
    let second = create_insert(planner.env_mut(), "sales", ColumnId(0), ColumnId(1));

    let first = planner.plan(first).unwrap();
    let second = planner.plan(second).unwrap();
    let env = planner.env();
    assert_eq!(put_of(env, first).cascades, vec!["shard0".to_string()]);
    assert_eq!(put_of(env, second).cascades, vec!["shard1".to_string()]);
    assert!(put_of(env, first).targets.is_empty());

    let program = planner.lower(first, &[]).unwrap();
    assert_eq!(program.count_actions("server-operation"), 1);
    assert!(program.explain().contains("insert into sales"));
}

#[test]
fn test_replicated_insert_reaches_every_cascade() {
    let catalog = create_distributed_catalog();
    let config = PlannerConfig::default();
    let mut planner = AccessPlanner::new(&catalog, &config);
    let env = planner.env_mut();
    let staging = env.add_instance("staging", "s").unwrap();
    let currency = env.add_instance("currency", "c").unwrap();
    let code = env.field(staging, "region").unwrap();
    let operand = env.table_relation(staging);
    let root = env.put(PutKind::Insert, currency, operand, vec![(ColumnId(0), code)]);

    let plan = planner.plan(root).unwrap();
    assert_eq!(put_of(planner.env(), plan).cascades.len(), 2);
    let program = planner.lower(plan, &[]).unwrap();
    assert_eq!(program.count_actions("server-operation"), 2);
}

#[test]
fn test_distributed_delete_is_not_supported() {
    let catalog = create_distributed_catalog();
    let config = PlannerConfig::default();
    let mut planner = AccessPlanner::new(&catalog, &config);
    let env = planner.env_mut();
    let sales = env.add_instance("sales", "s").unwrap();
    let operand = env.table_relation(sales);
    let root = env.put(PutKind::Delete, sales, operand, Vec::new());

    let error = planner.plan(root).unwrap_err();
    assert!(error.is_not_supported());
}
