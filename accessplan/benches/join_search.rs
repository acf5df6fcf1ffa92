/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

extern crate accessplan;
extern crate criterion;

use accessplan::{AccessPlanner, JoinType};
use criterion::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::catalog::{Catalog, ColumnId, DataType, FileDef, TableDef};
use shared::config::PlannerConfig;

fn setup_catalog(tables: usize, rng: &mut StdRng) -> Catalog {
    let mut catalog = Catalog::new();
    for position in 0..tables {
        let name = format!("r{}", position);
        let count = rng.gen_range(10..100_000) as f64;
        let table = catalog.add_table(
            TableDef::new(&name, count)
                .row_id("rowid")
                .column("value", DataType::Integer),
        );
        catalog.add_file(FileDef::record(
            &format!("{}_record", name),
            table,
            ColumnId(0),
            &[ColumnId(1)],
        ));
        // every other table can be probed on its join column
        if position % 2 == 1 {
            catalog.add_file(
                FileDef::btree(&format!("{}_value", name), table, &[ColumnId(1)])
                    .distinct_count(count / 10.0),
            );
        }
    }
    catalog
}

/// Plans a chain join r0.value = r1.value = ... over every table
fn plan_chain(catalog: &Catalog, config: &PlannerConfig, tables: usize) {
    let mut planner = AccessPlanner::new(catalog, config);
    let env = planner.env_mut();
    let mut operands = Vec::with_capacity(tables);
    let mut values = Vec::with_capacity(tables);
    for position in 0..tables {
        let name = format!("r{}", position);
        let instance = env.add_instance(&name, &name).unwrap();
        values.push(env.field(instance, "value").unwrap());
        operands.push(env.table_relation(instance));
    }
    let mut conjuncts = Vec::with_capacity(tables);
    for pair in values.windows(2) {
        conjuncts.push(env.equal(pair[0], pair[1]));
    }
    let predicate = env.and(conjuncts);
    let root = env.join(JoinType::Inner, operands, Some(predicate));
    let plan = planner.plan(root).unwrap();
    black_box(plan);
}

fn join_search_benchmark(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let config = PlannerConfig::default();
    let unlimited = PlannerConfig {
        join_max_candidates: 0,
        ..PlannerConfig::default()
    };

    let mut group = c.benchmark_group("join-search");
    group.sample_size(10);
    for tables in [4, 6, 8] {
        let catalog = setup_catalog(tables, &mut rng);
        group.bench_with_input(BenchmarkId::new("bounded", tables), &tables, |b, tables| {
            b.iter(|| plan_chain(&catalog, &config, *tables))
        });
        group.bench_with_input(BenchmarkId::new("exhaustive", tables), &tables, |b, tables| {
            b.iter(|| plan_chain(&catalog, &unlimited, *tables))
        });
    }
    group.finish();
}

criterion_group!(benches, join_search_benchmark);
criterion_main!(benches);
