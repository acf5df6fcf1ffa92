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

use accessplan::candidate::{self, CandidateKind};
use accessplan::limit::Limit;
use accessplan::scalar::AggregationKind;
use accessplan::AccessPlanner;
use common::{create_distributed_catalog, kind_of};
use shared::config::PlannerConfig;

fn statement(planner: &AccessPlanner<'_>, id: accessplan::CandidateId) -> String {
    candidate::generate_sql(planner.env(), id)
        .unwrap()
        .to_sql_statement()
        .unwrap()
}

#[test]
fn test_grouping_runs_on_every_server() {
    let catalog = create_distributed_catalog();
    let config = PlannerConfig::default();
    let mut planner = AccessPlanner::new(&catalog, &config);
    let env = planner.env_mut();
    let sales = env.add_instance("sales", "s").unwrap();
    let region = env.field(sales, "region").unwrap();
    let amount = env.field(sales, "amount").unwrap();
    let north = env.text("north");
    let condition = env.equal(region, north);
    let total = env.aggregation(AggregationKind::Sum, Some(amount), false);
    let table = env.table_relation(sales);
    let selected = env.selection(table, condition);
    let root = env.grouping(selected, vec![region], vec![total], None);

    let plan = planner.plan(root).unwrap();
    assert!(matches!(kind_of(planner.env(), plan), CandidateKind::Cascade(_)));
    let sql = statement(&planner, plan);
    assert!(sql.contains("from sales where region='north'"), "{}", sql);
    assert!(sql.ends_with("group by region"), "{}", sql);

    let program = planner.lower(plan, &[]).unwrap();
    assert_eq!(program.count_actions("server-query"), 2);
    assert_eq!(program.count_actions("group"), 1);
}

#[test]
fn test_limit_is_sent_to_the_servers() {
    let catalog = create_distributed_catalog();
    let config = PlannerConfig::default();
    let mut planner = AccessPlanner::new(&catalog, &config);
    let env = planner.env_mut();
    let sales = env.add_instance("sales", "s").unwrap();
    let table = env.table_relation(sales);
    let root = env.limit(table, Limit::new(3));

    let plan = planner.plan(root).unwrap();
    assert!(matches!(kind_of(planner.env(), plan), CandidateKind::Cascade(_)));
    assert!(planner.env().candidate(plan).unwrap().is_limited());
    assert_eq!(statement(&planner, plan), "select region,amount from sales limit 3");
}

#[test]
fn test_distinct_is_sent_to_the_servers() {
    let catalog = create_distributed_catalog();
    let config = PlannerConfig::default();
    let mut planner = AccessPlanner::new(&catalog, &config);
    let env = planner.env_mut();
    let sales = env.add_instance("sales", "s").unwrap();
    let table = env.table_relation(sales);
    let root = env.distinct(table, Vec::new());

    let plan = planner.plan(root).unwrap();
    assert_eq!(statement(&planner, plan), "select distinct region,amount from sales");
}

#[test]
fn test_replicated_table_is_read_from_one_server() {
    let catalog = create_distributed_catalog();
    let config = PlannerConfig::default();
    let mut planner = AccessPlanner::new(&catalog, &config);
    let env = planner.env_mut();
    let currency = env.add_instance("currency", "c").unwrap();
    let root = env.table_relation(currency);

    let plan = planner.plan(root).unwrap();
    let program = planner.lower(plan, &[]).unwrap();
    assert_eq!(program.count_actions("server-query"), 1);
    assert_eq!(program.count_actions("begin-parallel"), 0);
}

#[test]
fn test_local_join_over_distributed_operand() {
    let catalog = create_distributed_catalog();
    let config = PlannerConfig::default();
    let mut planner = AccessPlanner::new(&catalog, &config);
    let env = planner.env_mut();
    let sales = env.add_instance("sales", "s").unwrap();
    let staging = env.add_instance("staging", "t").unwrap();
    let sold = env.field(sales, "region").unwrap();
    let staged = env.field(staging, "region").unwrap();
    let predicate = env.equal(sold, staged);
    let left = env.table_relation(sales);
    let right = env.table_relation(staging);
    let root = env.join(accessplan::JoinType::Inner, vec![left, right], Some(predicate));

    let plan = planner.plan(root).unwrap();
    assert!(matches!(kind_of(planner.env(), plan), CandidateKind::Join(_)));
    let program = planner.lower(plan, &[]).unwrap();
    assert!(program.count_actions("server-query") >= 1);
}
