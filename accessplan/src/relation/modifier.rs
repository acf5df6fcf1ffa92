/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Sort, grouping, distinct, limit, partitioning and projection.
//!
//! A modifier first asks its operand to do the work itself, by handing the
//! requirement down in the source. When the operand cannot, an explicit
//! candidate does it on top of a plain operand, and the cheaper of the two
//! is kept. Distributed operands get a cascade variant that runs the
//! modifier on every server.
//!
//! Sort, distinct and projection do not change which tuples pass a condition,
//! so the source predicate travels through them. Above grouping, limit and
//! partitioning it is checked by a filter.

use super::{Distinct, Grouping, LimitNode, Partitioning, Projection, Sort};
use crate::candidate::{
    self, cascade, distinct as distinct_candidate, filter, grouping as grouping_candidate,
};
use crate::candidate::{
    limit as limit_candidate, partitioning as partitioning_candidate, sort as sort_candidate,
};
use crate::candidate::{GroupingMode, PartitionMode};
use crate::environment::{CandidateId, Environment, OrderId, ScalarId};
use crate::error::PlanResult;
use crate::order::{self, Specification};
use crate::predicate;
use crate::relation;
use crate::source::PlanSource;
use log::debug;
use shared::config::TraceTopic;

pub fn sort(
    env: &mut Environment<'_>,
    source: &PlanSource,
    node: &Sort,
) -> PlanResult<CandidateId> {
    let required = Specification::new(node.keys.clone());
    let specification = match source.order() {
        Some(order) => order::get_compatible(&required, env.order(order)?).unwrap_or(required),
        None => required,
    };
    let order = env.add_order(specification.clone());

    let mut pushed_source = source.for_operand();
    pushed_source.set_order(order);
    pushed_source.set_check_partial(source.limit().is_specified());
    let scope = env.scope();
    let ordered = relation::create_access_plan(env, node.operand, &pushed_source)?;
    let pushed = if candidate::satisfies_order(env, ordered, Some(order))? {
        Some(ordered)
    } else if cascade::is_pushable(env, ordered)? {
        let pushed = cascade::create_sort(env, ordered, &specification, source.limit());
        try_cascade(env, pushed)?
    } else {
        None
    };
    if pushed.is_none() {
        scope.release(env);
    }

    let mut explicit_source = source.for_operand();
    explicit_source.erase_order();
    explicit_source.erase_limit();
    let operand = relation::create_access_plan(env, node.operand, &explicit_source)?;
    let explicit = sort_candidate::create(env, source, operand, &specification)?;
    match pushed {
        Some(pushed) => candidate::keep_cheaper(env, pushed, explicit),
        None => Ok(explicit),
    }
}

pub fn grouping(
    env: &mut Environment<'_>,
    source: &PlanSource,
    node: &Grouping,
) -> PlanResult<CandidateId> {
    let mut plain_source = operand_source(source);
    plain_source.erase_order();
    plain_source.erase_limit();
    let plain = relation::create_access_plan(env, node.operand, &plain_source)?;

    if cascade::is_pushable(env, plain)? {
        let pushed = cascade::create_grouping(
            env,
            plain,
            node.keys.clone(),
            node.aggregations.clone(),
            node.having,
        );
        if let Some(id) = try_cascade(env, pushed)? {
            return check_source_predicate(env, source, id);
        }
    }
    if node.keys.is_empty() {
        let id = grouping_candidate::create(
            env,
            plain,
            Vec::new(),
            node.aggregations.clone(),
            node.having,
            GroupingMode::Simple,
        )?;
        return check_source_predicate(env, source, id);
    }

    let explicit = grouping_candidate::create(
        env,
        plain,
        node.keys.clone(),
        node.aggregations.clone(),
        node.having,
        GroupingMode::Sort,
    )?;
    let order = env.add_order(Specification::grouping(&node.keys));
    let mut ordered_source = plain_source.clone();
    ordered_source.set_order(order);
    ordered_source.set_grouping(true);
    let streamed = match ordered_operand(env, node.operand, &ordered_source, order)? {
        Some(ordered) => {
            let mode = if is_bitset_sort(env, ordered)? {
                GroupingMode::BitSet
            } else {
                GroupingMode::Sorted
            };
            Some(grouping_candidate::create(
                env,
                ordered,
                node.keys.clone(),
                node.aggregations.clone(),
                node.having,
                mode,
            )?)
        }
        None => None,
    };
    let id = match streamed {
        Some(streamed) => candidate::keep_cheaper(env, streamed, explicit)?,
        None => explicit,
    };
    check_source_predicate(env, source, id)
}

pub fn distinct(
    env: &mut Environment<'_>,
    source: &PlanSource,
    node: &Distinct,
) -> PlanResult<CandidateId> {
    let mut plain_source = source.for_operand();
    plain_source.erase_limit();
    plain_source.set_distinct_keys(node.keys.clone());
    let plain = relation::create_access_plan(env, node.operand, &plain_source)?;
    let keys = if node.keys.is_empty() {
        candidate::row_scalars(env, plain)?
    } else {
        node.keys.clone()
    };
    if distinct_candidate::is_unique(env, plain, &keys)? {
        if env.traced(TraceTopic::Cost) {
            debug!("{} is already distinct", env.candidate(plain)?.name());
        }
        return Ok(plain);
    }
    if cascade::is_pushable(env, plain)? {
        let pushed = cascade::create_distinct(env, plain);
        if let Some(id) = try_cascade(env, pushed)? {
            return Ok(id);
        }
    }

    let hashed = distinct_candidate::create(env, plain, keys.clone(), false)?;
    let order = env.add_order(Specification::grouping(&keys));
    let mut ordered_source = plain_source.clone();
    ordered_source.set_order(order);
    ordered_source.set_grouping(true);
    match ordered_operand(env, node.operand, &ordered_source, order)? {
        Some(ordered) => {
            let sorted = distinct_candidate::create(env, ordered, keys, true)?;
            candidate::keep_cheaper(env, sorted, hashed)
        }
        None => Ok(hashed),
    }
}

pub fn limit(
    env: &mut Environment<'_>,
    source: &PlanSource,
    node: &LimitNode,
) -> PlanResult<CandidateId> {
    let mut limited_source = operand_source(source);
    limited_source.set_limit(node.limit);
    limited_source.estimate_limit(env.config());
    let operand = relation::create_access_plan(env, node.operand, &limited_source)?;
    let id = if env.candidate(operand)?.is_limited() {
        operand
    } else {
        let pushed = if cascade::is_pushable(env, operand)? {
            let pushed = cascade::create_limit(env, operand, node.limit);
            try_cascade(env, pushed)?
        } else {
            None
        };
        match pushed {
            Some(pushed) => pushed,
            None => limit_candidate::create(env, operand, node.limit)?,
        }
    };
    check_source_predicate(env, source, id)
}

pub fn partitioning(
    env: &mut Environment<'_>,
    source: &PlanSource,
    node: &Partitioning,
) -> PlanResult<CandidateId> {
    let specification = Specification::partitioned(&node.partition_keys, &node.order);
    let order = env.add_order(specification.clone());
    let mut plain_source = operand_source(source);
    plain_source.erase_order();
    plain_source.erase_limit();

    let mut ordered_source = plain_source.clone();
    ordered_source.set_order(order);
    let streaming = match ordered_operand(env, node.operand, &ordered_source, order)? {
        Some(ordered) => Some(partitioning_candidate::create(
            env,
            ordered,
            &specification,
            node.limit,
            PartitionMode::Streaming,
        )?),
        None => None,
    };
    let plain = relation::create_access_plan(env, node.operand, &plain_source)?;
    let sorted = partitioning_candidate::create(
        env,
        plain,
        &specification,
        node.limit,
        PartitionMode::AfterSort,
    )?;
    let id = match streaming {
        Some(streaming) => candidate::keep_cheaper(env, streaming, sorted)?,
        None => sorted,
    };
    check_source_predicate(env, source, id)
}

/// The output list itself is evaluated when the plan is lowered; only word
/// extraction over a distributed table changes the plan.
pub fn projection(
    env: &mut Environment<'_>,
    source: &PlanSource,
    node: &Projection,
) -> PlanResult<CandidateId> {
    let operand = relation::create_access_plan(env, node.operand, &source.for_operand())?;
    if node.output.is_empty()
        || !is_word_list(env, &node.output)?
        || !cascade::is_pushable(env, operand)?
    {
        return Ok(operand);
    }
    let pushed = cascade::create_word(env, operand, node.output.clone());
    let pushed = try_cascade(env, pushed)?;
    Ok(pushed.unwrap_or(operand))
}

/// Source for an operand that cannot take the predicate of `source`
fn operand_source(source: &PlanSource) -> PlanSource {
    let mut operand = source.for_operand();
    operand.erase_predicate();
    operand
}

fn check_source_predicate(
    env: &mut Environment<'_>,
    source: &PlanSource,
    id: CandidateId,
) -> PlanResult<CandidateId> {
    match source.predicate() {
        Some(predicate) => {
            let conditions = predicate::conjuncts(env, predicate)?;
            filter::create(env, source, id, &conditions)
        }
        None => Ok(id),
    }
}

/// Plans the operand under `source` and keeps it only when it delivers
/// `order`
fn ordered_operand(
    env: &mut Environment<'_>,
    operand: super::RelationId,
    source: &PlanSource,
    order: OrderId,
) -> PlanResult<Option<CandidateId>> {
    let scope = env.scope();
    let ordered = relation::create_access_plan(env, operand, source)?;
    if candidate::satisfies_order(env, ordered, Some(order))? {
        return Ok(Some(ordered));
    }
    scope.release(env);
    Ok(None)
}

/// A cascade variant the servers cannot run is no candidate
fn try_cascade(
    env: &Environment<'_>,
    result: PlanResult<CandidateId>,
) -> PlanResult<Option<CandidateId>> {
    match result {
        Ok(id) => Ok(Some(id)),
        Err(error) if error.is_not_supported() => {
            if env.traced(TraceTopic::Cost) {
                debug!("no cascade variant: {}", error);
            }
            Ok(None)
        }
        Err(error) => Err(error),
    }
}

fn is_bitset_sort(env: &Environment<'_>, id: CandidateId) -> PlanResult<bool> {
    Ok(candidate::order_of(env, id)?.map_or(false, |order| order.is_bitset_sort()))
}

fn is_word_list(env: &Environment<'_>, output: &[ScalarId]) -> PlanResult<bool> {
    for scalar in output {
        if !env.scalar(*scalar)?.is_word() {
            return Ok(false);
        }
    }
    Ok(true)
}
