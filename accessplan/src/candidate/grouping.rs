/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! GROUP BY and aggregation.
//!
//! Tuples of one group arrive together when the operand delivers the key
//! order (`Sorted`) or a bitmap index hands them out key by key (`BitSet`).
//! Otherwise the operand is sorted first (`Sort`). Without keys the whole
//! input is one group (`Simple`).

use super::sort::sort_iterator;
use super::{
    add_check_predicate, copy_order, AdoptArgument, Candidate, CandidateBase, CandidateKind,
};
use crate::cost::{Cost, CostConstants, CostValue};
use crate::environment::{CandidateId, Environment, PredicateId, ScalarId};
use crate::error::{PlanError, PlanResult};
use crate::order::{OrderKey, Specification};
use crate::predicate;
use crate::row::Row;
use crate::scalar::{self, Scalar};
use log::debug;
use shared::config::TraceTopic;
use shared::program::{Action, CollectionKind, DataId, IteratorId, IteratorKind, Program, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupingMode {
    Simple,
    Sorted,
    BitSet,
    Sort,
}

impl GroupingMode {
    pub fn name(&self) -> &'static str {
        match self {
            GroupingMode::Simple => "simple",
            GroupingMode::Sorted => "sorted",
            GroupingMode::BitSet => "bitset",
            GroupingMode::Sort => "sort",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupingCandidate {
    pub operand: CandidateId,
    pub keys: Vec<ScalarId>,
    pub aggregations: Vec<ScalarId>,
    pub mode: GroupingMode,
}

impl GroupingCandidate {
    pub(crate) fn adopt(
        &self,
        env: &Environment<'_>,
        program: &mut Program,
        base: &CandidateBase,
        argument: &AdoptArgument,
    ) -> PlanResult<IteratorId> {
        // aggregation reads every column value, nothing is deferred below
        let operand_argument = AdoptArgument {
            outer: argument.outer,
            ..AdoptArgument::default()
        };
        let mut operand = super::adopt(env, program, self.operand, &operand_argument)?;
        if self.mode == GroupingMode::Sort {
            let mut row = self.keys.clone();
            for aggregation in &self.aggregations {
                aggregation_operands(env, *aggregation, &mut row)?;
            }
            let order = Specification::new(
                self.keys
                    .iter()
                    .map(|key| OrderKey::ascending(*key))
                    .collect(),
            );
            operand = sort_iterator(env, program, operand, &row, &order, None, None)?;
        }

        let mut aggregates = Vec::with_capacity(self.aggregations.len());
        for aggregation in &self.aggregations {
            let (function, argument_scalar) = match env.scalar(*aggregation)? {
                Scalar::Aggregation {
                    kind,
                    operand,
                    distinct,
                } => (
                    if *distinct {
                        format!("{}-distinct", kind.name())
                    } else {
                        kind.name().to_string()
                    },
                    *operand,
                ),
                _ => return Err(PlanError::unexpected("grouping over a non-aggregate expression")),
            };
            let operand_data = match argument_scalar {
                Some(argument_scalar) => {
                    Some(scalar::variable(env, program, operand, argument_scalar)?)
                }
                None => None,
            };
            let result = scalar::variable(env, program, operand, *aggregation)?;
            aggregates.push(Action::Aggregate {
                function,
                operand: operand_data,
                result,
            });
        }
        let key_data = scalar::array_variable(env, program, operand, &self.keys)?;
        let mut tuple = self.keys.clone();
        tuple.extend(self.aggregations.iter().copied());
        let data = scalar::array_variable(env, program, operand, &tuple)?;
        let iterator = group_iterator(
            program,
            operand,
            key_data,
            data,
            self.mode.name(),
            aggregates,
        );
        add_check_predicate(env, program, iterator, base.predicate)?;
        Ok(iterator)
    }
}

/// Feeds the operand tuples into a grouping collection and returns the
/// iterator over the groups.
///
/// `aggregates` run once per input tuple on the aggregation target of the
/// operand. `data` is the group tuple, the keys followed by the results.
pub(crate) fn group_iterator(
    program: &mut Program,
    operand: IteratorId,
    keys: DataId,
    data: DataId,
    mode: &str,
    aggregates: Vec<Action>,
) -> IteratorId {
    let collection = program.add_collection(CollectionKind::Grouping, None);
    program.add_action(
        operand,
        Target::Execution,
        Action::Group {
            collection,
            keys,
            data,
            mode: mode.to_string(),
        },
    );
    for aggregate in aggregates {
        program.add_action(operand, Target::Aggregation, aggregate);
    }

    let iterator = program.add_iterator(IteratorKind::Input);
    program.add_action(iterator, Target::StartUp, Action::Iterate { operand });
    program.copy_node_variables(operand, iterator);
    program.add_action(iterator, Target::Execution, Action::Input { collection, data });
    iterator
}

/// Fields an aggregation reads
fn aggregation_operands(
    env: &Environment<'_>,
    aggregation: ScalarId,
    into: &mut Vec<ScalarId>,
) -> PlanResult<()> {
    if let Scalar::Aggregation {
        operand: Some(operand),
        ..
    } = env.scalar(aggregation)?
    {
        let operand = *operand;
        if !into.contains(&operand) {
            into.push(operand);
        }
    }
    Ok(())
}

/// Cost of grouping what the operand produces.
///
/// The operand is read to the end before the first group is known, so its
/// whole cost is paid at startup.
pub fn grouped_cost(
    env: &Environment<'_>,
    operand: &Cost,
    keys: &[ScalarId],
    aggregations: &[ScalarId],
    having: Option<PredicateId>,
    mode: GroupingMode,
) -> PlanResult<Cost> {
    let mut input = Cost::new();
    input.assign_from(operand);
    input.set_is_set_count();
    input.clear_limit_count();
    if mode == GroupingMode::Sort {
        input.add_sorting_cost(env.config());
    }
    let estimator = env.estimator();
    let mut count = estimator.grouping_count(input.tuple_count(), !keys.is_empty());
    let mut rate = CostValue::ONE;
    if let Some(having) = having {
        for conjunct in predicate::conjuncts(env, having)? {
            rate *= predicate::estimate_rate(env, conjunct)?;
        }
        count *= rate;
    }
    let mut size = 0.0;
    for scalar_id in keys.iter().chain(aggregations.iter()) {
        size += scalar::size(env, *scalar_id)?;
    }

    let mut cost = Cost::new();
    let overhead = match mode {
        GroupingMode::Sorted | GroupingMode::BitSet => input.overhead(),
        GroupingMode::Simple | GroupingMode::Sort => {
            input.overhead() + CostConstants::COLLECTION_OVERHEAD
        }
    };
    cost.set_overhead(overhead);
    cost.set_startup(input.repeat_cost());
    cost.set_total_cost(count.max(CostValue::ONE) * CostConstants::COLLECTION_PROCESS_COST);
    cost.set_tuple_count(count);
    cost.set_tuple_size(size.max(1.0));
    cost.set_table_count(input.table_count());
    cost.set_rate(rate);
    cost.set_is_set_rate();
    cost.set_is_set_count();
    Ok(cost)
}

/// Wraps an operand in a grouping.
///
/// HAVING becomes the residual predicate of the grouping candidate.
pub fn create(
    env: &mut Environment<'_>,
    operand: CandidateId,
    keys: Vec<ScalarId>,
    aggregations: Vec<ScalarId>,
    having: Option<PredicateId>,
    mode: GroupingMode,
) -> PlanResult<CandidateId> {
    let operand_base = env.candidate(operand)?.base.clone();
    let cost = grouped_cost(env, &operand_base.cost, &keys, &aggregations, having, mode)?;

    let order = match mode {
        GroupingMode::Simple => None,
        GroupingMode::Sorted => copy_order(env, operand_base.order)?,
        GroupingMode::BitSet | GroupingMode::Sort => Some(env.add_order(Specification::new(
            keys.iter().map(|key| OrderKey::ascending(*key)).collect(),
        ))),
    };
    let mut row = Row::from_scalars(keys.iter().copied());
    for aggregation in &aggregations {
        row.add(*aggregation);
    }
    let row = env.add_row(row);
    let key = if keys.is_empty() {
        None
    } else {
        Some(env.add_row(Row::from_scalars(keys.iter().copied())))
    };

    if env.traced(TraceTopic::Cost) {
        debug!(
            "{} grouping by {} keys over {}: {}",
            mode.name(),
            keys.len(),
            env.candidate(operand)?.name(),
            cost
        );
    }
    let base = CandidateBase {
        cost,
        order,
        row: Some(row),
        key,
        predicate: having,
        unchecked: operand_base.unchecked.clone(),
        instances: operand_base.instances.clone(),
        ..CandidateBase::default()
    };
    Ok(env.register_candidate(Candidate::new(
        base,
        CandidateKind::Grouping(GroupingCandidate {
            operand,
            keys,
            aggregations,
            mode,
        }),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::table;
    use crate::scalar::AggregationKind;
    use crate::source::PlanSource;
    use shared::catalog::{Catalog, ColumnId, DataType, FileDef, TableDef};
    use shared::config::PlannerConfig;

    fn create_test_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        let table = catalog.add_table(
            TableDef::new("sale", 10_000.0)
                .row_id("rowid")
                .column("region", DataType::Text)
                .column("amount", DataType::Integer),
        );
        catalog.add_file(FileDef::record(
            "sale_record",
            table,
            ColumnId(0),
            &[ColumnId(1), ColumnId(2)],
        ));
        catalog
    }

    #[test]
    fn test_group_count_estimates() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let sale = env.add_instance("sale", "s").unwrap();
        let region = env.field(sale, "region").unwrap();
        let amount = env.field(sale, "amount").unwrap();
        env.require_column(sale, ColumnId(1));
        env.require_column(sale, ColumnId(2));
        let total = env.aggregation(AggregationKind::Sum, Some(amount), false);
        let operand = table::create(&mut env, &PlanSource::new(&config), sale).unwrap();

        let simple = create(
            &mut env,
            operand,
            Vec::new(),
            vec![total],
            None,
            GroupingMode::Simple,
        ).unwrap();
        assert_eq!(env.candidate(simple).unwrap().base.cost.tuple_count(), 1.0);

        let grouped = create(
            &mut env,
            operand,
            vec![region],
            vec![total],
            None,
            GroupingMode::Sort,
        ).unwrap();
        assert_eq!(env.candidate(grouped).unwrap().base.cost.tuple_count(), 100.0);
        assert!(env.candidate(grouped).unwrap().base.order.is_some());
    }

    #[test]
    fn test_grouping_lowering() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let sale = env.add_instance("sale", "s").unwrap();
        let region = env.field(sale, "region").unwrap();
        let amount = env.field(sale, "amount").unwrap();
        env.require_column(sale, ColumnId(1));
        env.require_column(sale, ColumnId(2));
        let total = env.aggregation(AggregationKind::Sum, Some(amount), false);
        let count = env.aggregation(AggregationKind::Count, None, false);
        let limit = env.integer(10);
        let having = env.comparison(crate::predicate::CompareOp::Greater, count, limit);
        let operand = table::create(&mut env, &PlanSource::new(&config), sale).unwrap();
        let grouped = create(
            &mut env,
            operand,
            vec![region],
            vec![total, count],
            Some(having),
            GroupingMode::Sort,
        )
        .unwrap();

        let mut program = Program::new();
        super::super::adopt(&env, &mut program, grouped, &AdoptArgument::default()).unwrap();
        assert_eq!(program.count_actions("sort"), 1);
        assert_eq!(program.count_actions("group"), 1);
        assert_eq!(program.count_actions("aggregate"), 2);
        assert_eq!(program.count_actions("unless"), 1);
        assert!(program.explain().contains("[aggregation] aggregate sum"));
    }
}
