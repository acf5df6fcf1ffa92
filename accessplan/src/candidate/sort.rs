/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Explicit sort of an operand that cannot deliver the required order.
//!
//! With a known row limit only the first tuples are kept, in a bounded heap.

use super::{materialize, row_scalars, AdoptArgument, Candidate, CandidateBase, CandidateKind};
use crate::cost::{Cost, CostValue};
use crate::environment::{CandidateId, Environment, OrderId, ScalarId};
use crate::error::{PlanError, PlanResult};
use crate::order::Specification;
use crate::row::DelayArgument;
use crate::source::PlanSource;
use log::debug;
use shared::config::TraceTopic;
use shared::program::{Action, CollectionKind, IteratorId, Program};

#[derive(Debug, Clone)]
pub struct SortCandidate {
    pub operand: CandidateId,
    /// Top-N sort bounded by the limit of the source
    pub partial: bool,
}

impl SortCandidate {
    pub fn name(&self) -> &'static str {
        if self.partial {
            "partial-sort"
        } else {
            "sort"
        }
    }

    pub(crate) fn adopt(
        &self,
        env: &Environment<'_>,
        program: &mut Program,
        base: &CandidateBase,
        argument: &AdoptArgument,
    ) -> PlanResult<IteratorId> {
        let order = match base.order {
            Some(order) => env.order(order)?,
            None => return Err(PlanError::unexpected("sort candidate without an order")),
        };
        let operand = super::adopt(env, program, self.operand, &argument.for_operand())?;
        let row = row_scalars(env, self.operand)?;
        let bound = if self.partial { base.limit.bound() } else { None };
        let iterator = sort_iterator(
            env,
            program,
            operand,
            &row,
            order,
            argument.delay.as_ref(),
            bound,
        )?;
        super::add_check_predicate(env, program, iterator, base.predicate)?;
        Ok(iterator)
    }
}

/// Sorts the tuples of an operand iterator and returns the iterator reading
/// them back in order. A bound keeps only that many tuples, in a heap.
pub(crate) fn sort_iterator(
    env: &Environment<'_>,
    program: &mut Program,
    operand: IteratorId,
    row: &[ScalarId],
    order: &Specification,
    delay: Option<&DelayArgument>,
    bound: Option<u64>,
) -> PlanResult<IteratorId> {
    let generated = order.generate(env, program, operand, row, delay)?;
    let phase = generated.expect_generated()?;
    let kind = if bound.is_some() {
        CollectionKind::Heap
    } else {
        CollectionKind::Sort
    };
    let collection = program.add_collection(kind, bound);
    Ok(materialize(
        program,
        operand,
        collection,
        phase.data,
        vec![Action::Sort {
            collection,
            data: phase.data,
            keys: phase.keys.clone(),
            bound,
        }],
    ))
}

/// Cost of sorting what the operand produces; a partial sort only pays for
/// the tuples the limit keeps
pub fn sorted_cost(
    env: &Environment<'_>,
    operand: &Cost,
    estimate_limit: Option<CostValue>,
) -> Cost {
    let mut cost = Cost::new();
    cost.assign_from(operand);
    cost.set_is_set_count();
    let rate = cost.rate();
    match estimate_limit {
        Some(limit) if !limit.is_infinity() => {
            cost.set_rate(CostValue::INFINITY);
            cost.set_limit_count(limit);
            cost.set_rate(rate);
        }
        _ => cost.clear_limit_count(),
    }
    if operand.is_set_rate() {
        cost.set_is_set_rate();
    }
    cost.add_sorting_cost(env.config());
    cost
}

/// Wraps an operand in an explicit sort by `order`.
///
/// The sort is partial when the source carries a limit whose bound is known
/// before execution; a parameter limit sorts everything and cuts afterwards.
pub fn create(
    env: &mut Environment<'_>,
    source: &PlanSource,
    operand: CandidateId,
    order: &Specification,
) -> PlanResult<CandidateId> {
    let operand_base = env.candidate(operand)?.base.clone();
    let partial = source.limit().bound().is_some();
    let estimate = if partial {
        Some(source.get_estimate_limit())
    } else {
        None
    };
    let cost = sorted_cost(env, &operand_base.cost, estimate);

    let base = CandidateBase {
        cost,
        order: Some(raw_order(env, order)),
        row: copy_row(env, operand_base.row)?,
        key: copy_row(env, operand_base.key)?,
        unchecked: operand_base.unchecked.clone(),
        limit: if partial { source.limit() } else { Default::default() },
        instances: operand_base.instances.clone(),
        distribution: operand_base.distribution,
        ..CandidateBase::default()
    };
    let candidate = SortCandidate { operand, partial };
    if env.traced(TraceTopic::Order) {
        debug!("{} over {}: {}", candidate.name(), env.candidate(operand)?.name(), base.cost);
    }
    Ok(env.register_candidate(Candidate::new(base, CandidateKind::Sort(candidate))))
}

/// Registers an unbound copy of an order, owned by a new candidate
pub(crate) fn raw_order(env: &mut Environment<'_>, order: &Specification) -> OrderId {
    let keys = order.keys().to_vec();
    let raw = if order.partition_keys().is_empty() {
        if order.is_grouping() {
            Specification::grouping(&order.key_scalars())
        } else {
            Specification::new(keys)
        }
    } else {
        let partition = order.partition_keys().to_vec();
        Specification::partitioned(&partition, &keys[partition.len().min(keys.len())..])
    };
    env.add_order(raw)
}

/// Private copy of an operand row for a wrapping candidate
pub(crate) fn copy_row(
    env: &mut Environment<'_>,
    row: Option<crate::environment::RowId>,
) -> PlanResult<Option<crate::environment::RowId>> {
    match row {
        Some(row) => {
            let copy = env.row(row)?.clone();
            Ok(Some(env.add_row(copy)))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::table;
    use crate::limit::Limit;
    use crate::order::OrderKey;
    use shared::catalog::{Catalog, ColumnId, DataType, FileDef, TableDef};
    use shared::config::PlannerConfig;

    fn create_test_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        let table = catalog.add_table(
            TableDef::new("track", 10_000.0)
                .row_id("rowid")
                .column("title", DataType::Text)
                .column("plays", DataType::Integer),
        );
        catalog.add_file(FileDef::record(
            "track_record",
            table,
            ColumnId(0),
            &[ColumnId(1), ColumnId(2)],
        ));
        catalog
    }

    #[test]
    fn test_partial_sort_pays_for_the_limit_only() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let track = env.add_instance("track", "t").unwrap();
        let plays = env.field(track, "plays").unwrap();
        env.require_column(track, ColumnId(2));
        let operand = table::create(&mut env, &PlanSource::new(&config), track).unwrap();
        let order = Specification::new(vec![OrderKey::descending(plays)]);

        let mut full_source = PlanSource::new(&config);
        full_source.estimate_limit(&config);
        let full = create(&mut env, &full_source, operand, &order).unwrap();

        let mut limited_source = PlanSource::new(&config);
        limited_source.set_limit(Limit::new(5));
        limited_source.estimate_limit(&config);
        let partial = create(&mut env, &limited_source, operand, &order).unwrap();

        assert_eq!(env.candidate(partial).unwrap().name(), "partial-sort");
        assert_eq!(env.candidate(full).unwrap().name(), "sort");
        let partial_cost = env.candidate(partial).unwrap().base.cost.clone();
        assert_eq!(partial_cost.limit_count(), 5.0);
        assert!(partial_cost < env.candidate(full).unwrap().base.cost);
    }

    #[test]
    fn test_sort_lowering_uses_a_heap_when_bounded() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let track = env.add_instance("track", "t").unwrap();
        let plays = env.field(track, "plays").unwrap();
        env.require_column(track, ColumnId(2));
        let operand = table::create(&mut env, &PlanSource::new(&config), track).unwrap();
        let mut source = PlanSource::new(&config);
        source.set_limit(Limit::new(3));
        source.estimate_limit(&config);
        let sort = create(
            &mut env,
            &source,
            operand,
            &Specification::new(vec![OrderKey::ascending(plays)]),
        )
        .unwrap();

        let mut program = Program::new();
        super::super::adopt(&env, &mut program, sort, &AdoptArgument::default()).unwrap();
        assert_eq!(program.count_actions("sort"), 1);
        assert_eq!(program.collections()[0].kind, CollectionKind::Heap);
        assert_eq!(program.collections()[0].bound, Some(3));
        assert!(program.explain().contains("top 3"));
    }

    #[test]
    fn test_unknown_bound_sorts_everything() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let track = env.add_instance("track", "t").unwrap();
        let plays = env.field(track, "plays").unwrap();
        env.require_column(track, ColumnId(2));
        let operand = table::create(&mut env, &PlanSource::new(&config), track).unwrap();
        let order = Specification::new(vec![OrderKey::descending(plays)]);

        for limit in [Limit::parameter(1), Limit::with_offset(u64::MAX, 1)] {
            let mut source = PlanSource::new(&config);
            source.set_limit(limit);
            source.estimate_limit(&config);
            let sort = create(&mut env, &source, operand, &order).unwrap();
            assert_eq!(env.candidate(sort).unwrap().name(), "sort");

            let mut program = Program::new();
            super::super::adopt(&env, &mut program, sort, &AdoptArgument::default()).unwrap();
            assert_eq!(program.collections()[0].kind, CollectionKind::Sort);
            assert_eq!(program.collections()[0].bound, None);
            assert!(!program.explain().contains("top"));
        }
    }
}
