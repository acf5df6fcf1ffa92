/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Join order search.
//!
//! Every join is a nested loop: the outer candidate is read once and the
//! inner candidate is planned again with the outer as a preceding candidate,
//! so the inner side can search its indexes with the outer's values.
//!
//! The conjuncts of the source and of the join predicate are split by the
//! side that can evaluate them first. A side read on its own gets the
//! conjuncts it binds alone; the inner side of a pair gets what the outer
//! left over.

pub mod dyadic;
pub mod exists;
pub mod nadic;
pub mod outer;

use super::{Join, JoinType};
use crate::candidate::{self, split_bound};
use crate::environment::{CandidateId, Environment, InstanceSet, PredicateId, RelationId};
use crate::error::{PlanError, PlanResult};
use crate::predicate;
use crate::source::PlanSource;

pub fn create_access_plan(
    env: &mut Environment<'_>,
    source: &PlanSource,
    join: &Join,
) -> PlanResult<CandidateId> {
    match (join.kind, join.operands.as_slice()) {
        (_, []) => Err(PlanError::unexpected("join without operands")),
        (JoinType::Inner, [operand]) => {
            let mut operand_source = source.for_operand();
            if let Some(predicate) = join.predicate {
                operand_source.add_predicate(env, predicate)?;
            }
            super::create_access_plan(env, *operand, &operand_source)
        }
        (JoinType::Inner, [first, second]) => {
            dyadic::create_access_plan(env, source, *first, *second, join.predicate)
        }
        (JoinType::Inner, operands) => {
            nadic::create_access_plan(env, source, operands, join.predicate)
        }
        (JoinType::LeftOuter | JoinType::RightOuter, [first, second]) => {
            outer::create_access_plan(env, source, join.kind, *first, *second, join.predicate)
        }
        (JoinType::Exists | JoinType::NotExists, [first, second]) => {
            exists::create_access_plan(env, source, join.kind, *first, *second, join.predicate)
        }
        (kind, operands) => Err(PlanError::not_supported(format!(
            "{:?} join of {} operands",
            kind,
            operands.len()
        ))),
    }
}

/// Conjuncts of the source predicate and the join predicate, deduplicated
pub(crate) fn join_conjuncts(
    env: &Environment<'_>,
    source: &PlanSource,
    join_predicate: Option<PredicateId>,
) -> PlanResult<Vec<PredicateId>> {
    let mut result = Vec::new();
    for predicate in [source.predicate(), join_predicate].into_iter().flatten() {
        for conjunct in predicate::conjuncts(env, predicate)? {
            if !result.contains(&conjunct) {
                result.push(conjunct);
            }
        }
    }
    Ok(result)
}

/// Source for an operand read on its own, without a limit
pub(crate) fn standalone_source(
    env: &mut Environment<'_>,
    source: &PlanSource,
    conjuncts: &[PredicateId],
    operand: RelationId,
) -> PlanResult<PlanSource> {
    let mut available = source.preceding_instances(env)?;
    super::used_tables(env, operand, &mut available)?;
    let (bound, _) = split_bound(env, conjuncts, &available)?;
    let mut standalone = source.for_operand();
    standalone.erase_predicate();
    standalone.erase_limit();
    if let Some(predicate) = predicate::combine(env, bound) {
        standalone.add_predicate(env, predicate)?;
    }
    Ok(standalone)
}

/// Source for the inner side of a nested loop over `outer`.
///
/// The conjuncts the outer evaluates alone are dropped, everything else is
/// left to the inner side or stays unchecked.
pub(crate) fn inner_source(
    env: &mut Environment<'_>,
    source: &PlanSource,
    conjuncts: &[PredicateId],
    outer: CandidateId,
) -> PlanResult<PlanSource> {
    let mut outer_bound: InstanceSet = source.preceding_instances(env)?;
    outer_bound.extend(candidate::instance_set(env, outer)?);
    let (_, rest) = split_bound(env, conjuncts, &outer_bound)?;
    let mut inner = source.for_operand();
    inner.erase_predicate();
    inner.erase_order();
    inner.erase_limit();
    inner.add_preceding_candidate(outer);
    if let Some(predicate) = predicate::combine(env, rest) {
        inner.add_predicate(env, predicate)?;
    }
    Ok(inner)
}

/// Plans `inner` once per tuple of `outer` and joins them
pub(crate) fn create_plan(
    env: &mut Environment<'_>,
    source: &PlanSource,
    conjuncts: &[PredicateId],
    outer: CandidateId,
    inner: RelationId,
    join_predicate: Option<PredicateId>,
) -> PlanResult<CandidateId> {
    let inner_source = inner_source(env, source, conjuncts, outer)?;
    let inner = super::create_access_plan(env, inner, &inner_source)?;
    candidate::join::create_nested(
        env,
        source,
        candidate::join::JoinKind::Inner,
        outer,
        inner,
        join_predicate,
    )
}
