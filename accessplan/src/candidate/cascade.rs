/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Modifiers over a distributed operand.
//!
//! Each cascade server runs the modifier on its own shard as part of the SQL
//! it receives; the local side only merges the partial results. The SQL is
//! assembled from the bottom up by [`super::generate_sql`] and handed down to
//! the retrieval through [`AdoptArgument::sql`], so a stack of cascade
//! modifiers ends up as one statement per server.

use super::sort::copy_row;
use super::{
    add_check_predicate, copy_order, materialize, AdoptArgument, Candidate, CandidateBase,
    CandidateKind,
};
use crate::cost::{Cost, CostConstants, CostValue};
use crate::environment::{CandidateId, Environment, PredicateId, ScalarId};
use crate::error::{PlanError, PlanResult};
use crate::limit::Limit;
use crate::order::Specification;
use crate::row::Row;
use crate::scalar::{self, AggregationKind, Scalar};
use crate::sql::SqlQuery;
use log::debug;
use shared::catalog::Distribution;
use shared::config::TraceTopic;
use shared::program::{Action, CollectionKind, DataId, IteratorId, Program, Target};

/// How one aggregation is split between the servers and the local merge
#[derive(Debug, Clone)]
pub struct PartialAggregate {
    pub aggregation: ScalarId,
    /// Aggregations every server computes on its shard
    pub pushed: Vec<ScalarId>,
    /// Function merging each pushed aggregation locally
    pub merge: Vec<AggregationKind>,
}

impl PartialAggregate {
    /// Splits an aggregation; DISTINCT aggregations cannot be merged
    pub fn split(env: &mut Environment<'_>, aggregation: ScalarId) -> PlanResult<Self> {
        let (kind, operand, distinct) = match env.scalar(aggregation)? {
            Scalar::Aggregation {
                kind,
                operand,
                distinct,
            } => (*kind, *operand, *distinct),
            _ => {
                return Err(PlanError::unexpected(
                    "partial aggregate of a non-aggregate expression",
                ))
            }
        };
        if distinct {
            return Err(PlanError::not_supported(format!(
                "{} cannot be merged across cascades",
                scalar::label(env, aggregation)?
            )));
        }
        let (pushed, merge) = match kind {
            AggregationKind::Count | AggregationKind::Sum => {
                (vec![aggregation], vec![AggregationKind::Sum])
            }
            AggregationKind::Min | AggregationKind::Max => (vec![aggregation], vec![kind]),
            AggregationKind::Avg => {
                let sum = env.aggregation(AggregationKind::Sum, operand, false);
                let count = env.aggregation(AggregationKind::Count, operand, false);
                (vec![sum, count], vec![AggregationKind::Sum, AggregationKind::Sum])
            }
        };
        Ok(Self {
            aggregation,
            pushed,
            merge,
        })
    }

    /// The local result is computed from the merged parts
    pub fn is_derived(&self) -> bool {
        self.pushed.len() > 1
    }
}

#[derive(Debug, Clone)]
pub enum CascadeKind {
    /// ORDER BY on every server, merge sort locally
    Sort { partial: bool },
    /// GROUP BY on every server, regrouping locally
    Grouping {
        keys: Vec<ScalarId>,
        aggregations: Vec<ScalarId>,
        partials: Vec<PartialAggregate>,
    },
    /// LIMIT count+offset on every server, exact limit locally
    Limit,
    Distinct { replicated: bool },
    /// Word extraction on every server, frequencies summed locally
    Word { functions: Vec<ScalarId> },
}

#[derive(Debug, Clone)]
pub struct CascadeCandidate {
    pub operand: CandidateId,
    pub kind: CascadeKind,
}

impl CascadeCandidate {
    pub fn name(&self) -> &'static str {
        match &self.kind {
            CascadeKind::Sort { partial: true } => "cascade-partial-sort",
            CascadeKind::Sort { partial: false } => "cascade-sort",
            CascadeKind::Grouping { .. } => "cascade-grouping",
            CascadeKind::Limit => "cascade-limit",
            CascadeKind::Distinct { .. } => "cascade-distinct",
            CascadeKind::Word { .. } => "cascade-word",
        }
    }

    /// Statement of the operand with this modifier's clause added
    pub(crate) fn generate_sql(
        &self,
        env: &Environment<'_>,
        base: &CandidateBase,
    ) -> PlanResult<SqlQuery> {
        let mut query = super::generate_sql(env, self.operand)?;
        match &self.kind {
            CascadeKind::Sort { partial } => {
                if query.limit().is_specified() {
                    return Err(PlanError::not_supported(
                        "order by over a limited cascade statement",
                    ));
                }
                let order = match base.order {
                    Some(order) => env.order(order)?,
                    None => return Err(PlanError::unexpected("cascade sort without an order")),
                };
                query.set_order_by(&order.to_sql(env)?);
                if *partial {
                    query.set_limit(base.limit.pushed());
                }
            }
            CascadeKind::Grouping { keys, partials, .. } => {
                if query.limit().is_specified()
                    || query.is_distinct()
                    || query.order_by().is_some()
                {
                    return Err(PlanError::not_supported(
                        "group by over a modified cascade statement",
                    ));
                }
                query.clear_columns();
                let mut group_by = Vec::with_capacity(keys.len());
                for key in keys {
                    let text = scalar::to_sql(env, *key)?;
                    query.add_column(text.clone(), *key);
                    group_by.push(text);
                }
                for partial in partials {
                    for pushed in &partial.pushed {
                        query.add_column(scalar::to_sql(env, *pushed)?, *pushed);
                    }
                }
                query.set_group_by(group_by);
            }
            CascadeKind::Limit => {
                if query.limit().is_specified() {
                    return Err(PlanError::not_supported("nested limit in a cascade statement"));
                }
                query.set_limit(base.limit.pushed());
            }
            CascadeKind::Distinct { .. } => {
                if query.limit().is_specified() {
                    return Err(PlanError::not_supported(
                        "distinct over a limited cascade statement",
                    ));
                }
                query.set_distinct(true);
            }
            CascadeKind::Word { functions } => {
                query.clear_columns();
                for function in functions {
                    query.add_column(scalar::to_sql(env, *function)?, *function);
                }
            }
        }
        Ok(query)
    }

    pub(crate) fn adopt(
        &self,
        env: &Environment<'_>,
        program: &mut Program,
        id: CandidateId,
        base: &CandidateBase,
        argument: &AdoptArgument,
    ) -> PlanResult<IteratorId> {
        // the outermost cascade modifier builds the statement for all of them
        let query = match &argument.sql {
            Some(query) => query.clone(),
            None => super::generate_sql(env, id)?,
        };
        let tuple = query.scalars();
        let operand_argument = AdoptArgument {
            outer: argument.outer,
            delay: None,
            sql: Some(query),
        };
        let iterator = super::adopt(env, program, self.operand, &operand_argument)?;

        let iterator = match &self.kind {
            CascadeKind::Sort { partial } => {
                let order = match base.order {
                    Some(order) => env.order(order)?,
                    None => return Err(PlanError::unexpected("cascade sort without an order")),
                };
                let generated = order.generate(env, program, iterator, &tuple, None)?;
                let phase = generated.expect_generated()?;
                let bound = if *partial { base.limit.bound() } else { None };
                let collection = program.add_collection(CollectionKind::Sort, bound);
                let merged = materialize(
                    program,
                    iterator,
                    collection,
                    phase.data,
                    vec![Action::MergeSort {
                        collection,
                        data: phase.data,
                        keys: phase.keys.clone(),
                    }],
                );
                if *partial {
                    add_limit(program, merged, &base.limit);
                }
                merged
            }
            CascadeKind::Grouping {
                keys,
                aggregations,
                partials,
            } => regroup(env, program, iterator, keys, aggregations, partials)?,
            CascadeKind::Limit => {
                add_limit(program, iterator, &base.limit);
                iterator
            }
            CascadeKind::Distinct { replicated } => {
                if !*replicated {
                    let collection = program.add_collection(CollectionKind::Distinct, None);
                    let key = scalar::array_variable(env, program, iterator, &tuple)?;
                    program.add_action(
                        iterator,
                        Target::Execution,
                        Action::Distinct { collection, key },
                    );
                }
                iterator
            }
            CascadeKind::Word { functions } => {
                let key = scalar::array_variable(env, program, iterator, functions)?;
                let mut aggregates = Vec::with_capacity(functions.len());
                for function in functions {
                    let data = scalar::variable(env, program, iterator, *function)?;
                    aggregates.push(Action::Aggregate {
                        function: "sum-frequency".to_string(),
                        operand: Some(data),
                        result: data,
                    });
                }
                super::grouping::group_iterator(program, iterator, key, key, "word", aggregates)
            }
        };
        add_check_predicate(env, program, iterator, base.predicate)?;
        Ok(iterator)
    }
}

fn add_limit(program: &mut Program, iterator: IteratorId, limit: &Limit) {
    if let Some(count) = limit.count {
        program.add_action(
            iterator,
            Target::Execution,
            Action::Limit {
                count: count.to_string(),
                offset: limit.offset.map(|offset| offset.to_string()),
            },
        );
    }
}

/// Merges the per-server groups.
///
/// An average arrives as a sum and a count; both are summed into variables
/// of their own and divided once the group is complete.
fn regroup(
    env: &Environment<'_>,
    program: &mut Program,
    operand: IteratorId,
    keys: &[ScalarId],
    aggregations: &[ScalarId],
    partials: &[PartialAggregate],
) -> PlanResult<IteratorId> {
    let mut elements: Vec<DataId> = keys
        .iter()
        .map(|key| scalar::variable(env, program, operand, *key))
        .collect::<PlanResult<_>>()?;
    let key_data = program.add_array_variable(elements.clone());

    let mut aggregates = Vec::new();
    let mut averages = Vec::new();
    for partial in partials {
        if partial.is_derived() {
            let label = scalar::label(env, partial.aggregation)?;
            let mut parts = Vec::with_capacity(partial.pushed.len());
            for (pushed, merge) in partial.pushed.iter().zip(partial.merge.iter()) {
                let part_label = format!("{}#{}", label, env_aggregation_name(env, *pushed)?);
                let result = program.add_scalar_variable(&part_label);
                program.set_node_variable(operand, &part_label, result);
                aggregates.push(Action::Aggregate {
                    function: merge.name().to_string(),
                    operand: Some(scalar::variable(env, program, operand, *pushed)?),
                    result,
                });
                elements.push(result);
                parts.push(part_label);
            }
            averages.push((partial.aggregation, parts));
        } else {
            let merge = partial.merge.first().copied().unwrap_or(AggregationKind::Sum);
            let pushed = partial.pushed.first().copied().unwrap_or(partial.aggregation);
            let input = scalar::variable(env, program, operand, pushed)?;
            let result = if pushed == partial.aggregation {
                // the server's column and the merged value share a label
                let label = format!("{}#merged", scalar::label(env, partial.aggregation)?);
                let merged = program.add_scalar_variable(&label);
                program.set_node_variable(operand, &label, merged);
                merged
            } else {
                scalar::variable(env, program, operand, partial.aggregation)?
            };
            aggregates.push(Action::Aggregate {
                function: merge.name().to_string(),
                operand: Some(input),
                result,
            });
            elements.push(result);
        }
    }
    debug_assert_eq!(partials.len(), aggregations.len());
    let data = program.add_array_variable(elements);
    let iterator = super::grouping::group_iterator(
        program,
        operand,
        key_data,
        data,
        "cascade",
        aggregates,
    );

    for partial in partials.iter().filter(|partial| !partial.is_derived()) {
        // merged values become the aggregation itself above the regrouping
        let label = format!("{}#merged", scalar::label(env, partial.aggregation)?);
        if let Some(merged) = program.node_variable(iterator, &label) {
            let aggregation_label = scalar::label(env, partial.aggregation)?;
            program.set_node_variable(iterator, &aggregation_label, merged);
        }
    }
    for (aggregation, parts) in averages {
        let result = scalar::variable(env, program, iterator, aggregation)?;
        program.add_action(
            iterator,
            Target::Execution,
            Action::Calculate {
                expression: format!("({}/{})", parts[0], parts[1]),
                result,
            },
        );
    }
    Ok(iterator)
}

fn env_aggregation_name(env: &Environment<'_>, aggregation: ScalarId) -> PlanResult<&'static str> {
    match env.scalar(aggregation)? {
        Scalar::Aggregation { kind, .. } => Ok(kind.name()),
        _ => Err(PlanError::unexpected("partial aggregate of a non-aggregate expression")),
    }
}

// ----- costs -----

/// Merging sorted streams from every server
pub fn merged_sort_cost(operand: &Cost, estimate_limit: Option<CostValue>) -> Cost {
    let mut cost = Cost::new();
    cost.assign_from(operand);
    cost.set_is_set_count();
    cost.set_overhead(cost.overhead() + CostConstants::COLLECTION_OVERHEAD);
    let process = cost.tuple_count().max(CostValue::ONE) * CostConstants::COLLECTION_PROCESS_COST;
    cost.set_total_cost(cost.total_cost() + process);
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
    cost
}

/// Every server returns its groups, the local regrouping reads them all
pub fn regrouped_cost(
    env: &Environment<'_>,
    operand: &Cost,
    keys: &[ScalarId],
    aggregations: &[ScalarId],
    having: Option<PredicateId>,
) -> PlanResult<Cost> {
    let cascades = env.catalog().cascades.len().max(1) as f64;
    let groups = env
        .estimator()
        .grouping_count(operand.tuple_count(), !keys.is_empty());
    let mut remote = Cost::new();
    remote.assign_from(operand);
    remote.set_is_set_count();
    remote.set_tuple_count(groups * cascades);
    super::grouping::grouped_cost(
        env,
        &remote,
        keys,
        aggregations,
        having,
        super::grouping::GroupingMode::Simple,
    )
}

fn merged_cost(operand: &Cost) -> Cost {
    let mut cost = Cost::new();
    cost.assign_from(operand);
    cost.set_is_set_count();
    if operand.is_set_rate() {
        cost.set_is_set_rate();
    }
    cost.set_overhead(cost.overhead() + CostConstants::COLLECTION_OVERHEAD);
    cost
}

// ----- construction -----

/// Whether modifiers above the operand can travel in its SQL
pub fn is_pushable(env: &Environment<'_>, operand: CandidateId) -> PlanResult<bool> {
    let candidate = env.candidate(operand)?;
    if !candidate.is_distributed()
        || candidate.base.predicate.is_some()
        || !candidate.base.unchecked.is_empty()
    {
        return Ok(false);
    }
    match super::generate_sql(env, operand) {
        Ok(_) => Ok(true),
        Err(error) if error.is_not_supported() => Ok(false),
        Err(error) => Err(error),
    }
}

fn register(
    env: &mut Environment<'_>,
    operand: CandidateId,
    base: CandidateBase,
    kind: CascadeKind,
) -> PlanResult<CandidateId> {
    let id = env.register_candidate(Candidate::new(
        base,
        CandidateKind::Cascade(CascadeCandidate { operand, kind }),
    ));
    // a statement the servers cannot run is not a candidate
    if let Err(error) = super::generate_sql(env, id) {
        env.erase_candidate(id)?;
        return Err(error);
    }
    if env.traced(TraceTopic::Cost) {
        let candidate = env.candidate(id)?;
        debug!("{} over {:?}: {}", candidate.name(), operand, candidate.base.cost);
    }
    Ok(id)
}

fn derived_base(
    env: &mut Environment<'_>,
    operand: CandidateId,
    cost: Cost,
) -> PlanResult<CandidateBase> {
    let operand_base = env.candidate(operand)?.base.clone();
    Ok(CandidateBase {
        cost,
        order: copy_order(env, operand_base.order)?,
        row: copy_row(env, operand_base.row)?,
        key: copy_row(env, operand_base.key)?,
        instances: operand_base.instances.clone(),
        distribution: operand_base.distribution,
        ..CandidateBase::default()
    })
}

/// Sorts on every server and merges; `limit` makes the sort partial
pub fn create_sort(
    env: &mut Environment<'_>,
    operand: CandidateId,
    order: &Specification,
    limit: Limit,
) -> PlanResult<CandidateId> {
    let partial = limit.is_specified();
    let estimate = if partial {
        Some(limit.estimate_count(env.config()))
    } else {
        None
    };
    let cost = merged_sort_cost(&env.candidate(operand)?.base.cost, estimate);
    let mut base = derived_base(env, operand, cost)?;
    base.order = Some(super::sort::raw_order(env, order));
    if partial {
        base.limit = limit;
    }
    register(env, operand, base, CascadeKind::Sort { partial })
}

pub fn create_grouping(
    env: &mut Environment<'_>,
    operand: CandidateId,
    keys: Vec<ScalarId>,
    aggregations: Vec<ScalarId>,
    having: Option<PredicateId>,
) -> PlanResult<CandidateId> {
    let mut partials = Vec::with_capacity(aggregations.len());
    for aggregation in &aggregations {
        partials.push(PartialAggregate::split(env, *aggregation)?);
    }
    let operand_base = env.candidate(operand)?.base.clone();
    let cost = regrouped_cost(env, &operand_base.cost, &keys, &aggregations, having)?;
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
    let base = CandidateBase {
        cost,
        row: Some(row),
        key,
        predicate: having,
        instances: operand_base.instances.clone(),
        // the merged groups are local tuples
        distribution: Distribution::Local,
        ..CandidateBase::default()
    };
    register(
        env,
        operand,
        base,
        CascadeKind::Grouping {
            keys,
            aggregations,
            partials,
        },
    )
}

pub fn create_limit(
    env: &mut Environment<'_>,
    operand: CandidateId,
    limit: Limit,
) -> PlanResult<CandidateId> {
    let estimate = limit.estimate_count(env.config());
    let cost = super::limit::limited_cost(&env.candidate(operand)?.base.cost, estimate);
    let mut base = derived_base(env, operand, cost)?;
    base.limit = limit;
    base.is_limited = true;
    register(env, operand, base, CascadeKind::Limit)
}

pub fn create_distinct(env: &mut Environment<'_>, operand: CandidateId) -> PlanResult<CandidateId> {
    let operand_base = env.candidate(operand)?.base.clone();
    let replicated = operand_base.distribution == Distribution::Replicated;
    let cost = if replicated {
        let mut cost = Cost::new();
        cost.assign_from(&operand_base.cost);
        cost.set_is_set_count();
        cost
    } else {
        let mut cost = merged_cost(&operand_base.cost);
        cost.add_distinct_cost();
        cost
    };
    let base = derived_base(env, operand, cost)?;
    register(env, operand, base, CascadeKind::Distinct { replicated })
}

pub fn create_word(
    env: &mut Environment<'_>,
    operand: CandidateId,
    functions: Vec<ScalarId>,
) -> PlanResult<CandidateId> {
    let cost = merged_cost(&env.candidate(operand)?.base.cost);
    let mut base = derived_base(env, operand, cost)?;
    base.row = Some(env.add_row(Row::from_scalars(functions.iter().copied())));
    base.order = None;
    register(env, operand, base, CascadeKind::Word { functions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::table;
    use crate::order::OrderKey;
    use crate::source::PlanSource;
    use shared::catalog::{Catalog, ColumnId, DataType, TableDef};
    use shared::config::PlannerConfig;

    fn create_test_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.add_table(
            TableDef::new("orders", 100_000.0)
                .column("region", DataType::Text)
                .column("amount", DataType::Integer)
                .distribution(Distribution::Distributed),
        );
        catalog.add_cascade("shard0");
        catalog.add_cascade("shard1");
        catalog
    }

    fn create_test_operand(
        env: &mut Environment<'_>,
        config: &PlannerConfig,
    ) -> (CandidateId, ScalarId, ScalarId) {
        let orders = env.add_instance("orders", "o").unwrap();
        let region = env.field(orders, "region").unwrap();
        let amount = env.field(orders, "amount").unwrap();
        env.require_column(orders, ColumnId(0));
        env.require_column(orders, ColumnId(1));
        let operand = table::create(env, &PlanSource::new(config), orders).unwrap();
        (operand, region, amount)
    }

    #[test]
    fn test_sort_statement_pushes_order_and_limit() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let (operand, _, amount) = create_test_operand(&mut env, &config);
        assert!(is_pushable(&env, operand).unwrap());

        let order = Specification::new(vec![OrderKey::descending(amount)]);
        let sorted = create_sort(&mut env, operand, &order, Limit::with_offset(10, 5)).unwrap();
        let sql = crate::candidate::generate_sql(&env, sorted)
            .unwrap()
            .to_sql_statement()
            .unwrap();
        assert_eq!(sql, "select region,amount from orders order by amount desc limit 15");

        let mut program = Program::new();
        crate::candidate::adopt(&env, &mut program, sorted, &AdoptArgument::default()).unwrap();
        assert_eq!(program.count_actions("merge-sort"), 1);
        assert_eq!(program.count_actions("limit"), 1);
        assert_eq!(program.count_actions("server-query"), 2);
    }

    #[test]
    fn test_grouping_statement_splits_average() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let (operand, region, amount) = create_test_operand(&mut env, &config);
        let average = env.aggregation(AggregationKind::Avg, Some(amount), false);
        let count = env.aggregation(AggregationKind::Count, None, false);

        let grouped = create_grouping(
            &mut env,
            operand,
            vec![region],
            vec![average, count],
            None,
        ).unwrap();
        let sql = crate::candidate::generate_sql(&env, grouped)
            .unwrap()
            .to_sql_statement()
            .unwrap();
        assert_eq!(
            sql,
            "select region,sum(amount),count(amount),count(*) from orders group by region"
        );

        let mut program = Program::new();
        crate::candidate::adopt(&env, &mut program, grouped, &AdoptArgument::default()).unwrap();
        assert_eq!(program.count_actions("group"), 1);
        assert_eq!(program.count_actions("aggregate"), 3);
        assert_eq!(program.count_actions("calculate"), 1);
    }

    #[test]
    fn test_distinct_aggregation_is_not_pushed() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let (operand, region, amount) = create_test_operand(&mut env, &config);
        let distinct = env.aggregation(AggregationKind::Count, Some(amount), true);
        let error = create_grouping(
            &mut env,
            operand,
            vec![region],
            vec![distinct],
            None,
        ).unwrap_err();
        assert!(error.is_not_supported());
    }

    #[test]
    fn test_limit_and_distinct_statements() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let (operand, _, _) = create_test_operand(&mut env, &config);

        let distinct = create_distinct(&mut env, operand).unwrap();
        let sql = crate::candidate::generate_sql(&env, distinct)
            .unwrap()
            .to_sql_statement()
            .unwrap();
        assert_eq!(sql, "select distinct region,amount from orders");

        let limited = create_limit(&mut env, distinct, Limit::new(3)).unwrap();
        let sql = crate::candidate::generate_sql(&env, limited)
            .unwrap()
            .to_sql_statement()
            .unwrap();
        assert_eq!(sql, "select distinct region,amount from orders limit 3");
        assert!(env.candidate(limited).unwrap().is_limited());

        // a second limit cannot be stacked into the same statement
        let error = create_limit(&mut env, limited, Limit::new(2)).unwrap_err();
        assert!(error.is_not_supported());
    }
}
