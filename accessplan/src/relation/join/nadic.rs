/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Join order search over more than two operands.
//!
//! Dynamic programming over subsets of operand positions: the cheapest
//! left-deep candidate of every subset is kept, and step `k` extends the
//! subsets of size `k` by one operand. Subsets are visited in ascending mask
//! order, so ties go to the first candidate found.
//!
//! Once the join budget of the source is used up the search turns greedy:
//! every step extends only the first subset it can, with the first operand
//! that fits.

use super::{create_plan, join_conjuncts, standalone_source};
use crate::candidate;
use crate::environment::{CandidateId, Environment, PredicateId, RelationId};
use crate::error::{PlanError, PlanResult};
use crate::relation;
use crate::source::PlanSource;
use log::{debug, trace};
use rustc_hash::FxHashSet;
use shared::config::TraceTopic;
use std::collections::BTreeMap;

const MAX_OPERANDS: usize = 32;

type Mask = u64;

fn bit(position: usize) -> Mask {
    1 << position
}

fn size(mask: Mask) -> u32 {
    mask.count_ones()
}

pub fn create_access_plan(
    env: &mut Environment<'_>,
    source: &PlanSource,
    operands: &[RelationId],
    join_predicate: Option<PredicateId>,
) -> PlanResult<CandidateId> {
    if operands.len() > MAX_OPERANDS {
        return Err(PlanError::not_supported(format!(
            "join of {} operands",
            operands.len()
        )));
    }
    let mut search = source.for_operand();
    let conjuncts = join_conjuncts(env, source, join_predicate)?;

    // operands that need values of another operand cannot come first
    let mut requires: Vec<Mask> = Vec::with_capacity(operands.len());
    for (position, operand) in operands.iter().enumerate() {
        let mut mask = 0;
        for (other_position, other) in operands.iter().enumerate() {
            if other_position != position && relation::depends_on(env, *operand, *other)? {
                mask |= bit(other_position);
            }
        }
        requires.push(mask);
    }

    let mut best: BTreeMap<Mask, CandidateId> = BTreeMap::new();
    let mut exhausted = search.is_join_budget_exhausted();
    for (position, operand) in operands.iter().enumerate() {
        if exhausted && !best.is_empty() {
            break;
        }
        if requires[position] != 0 {
            continue;
        }
        let operand_source = standalone_source(env, &search, &conjuncts, *operand)?;
        let candidate = relation::create_access_plan(env, *operand, &operand_source)?;
        best.insert(bit(position), candidate);
        exhausted = search.check_join_max_candidates();
    }
    if best.is_empty() {
        return Err(PlanError::not_supported("every join operand depends on another"));
    }

    for step in 1..operands.len() {
        let outers: Vec<(Mask, CandidateId)> = best
            .iter()
            .filter(|(mask, _)| size(**mask) as usize == step)
            .map(|(mask, id)| (*mask, *id))
            .collect();
        let mut extended = false;
        'outer: for (mask, outer) in outers {
            for (position, operand) in operands.iter().enumerate() {
                if mask & bit(position) != 0 || requires[position] & !mask != 0 {
                    continue;
                }
                let joined = mask | bit(position);
                let candidate = create_plan(
                    env,
                    &search,
                    &conjuncts,
                    outer,
                    *operand,
                    join_predicate,
                )?;
                if env.traced(TraceTopic::Join) {
                    trace!("join subset {:#b}: {}", joined, env.candidate(candidate)?.base.cost);
                }
                match best.get(&joined).copied() {
                    Some(previous) if !candidate::is_cheaper(env, candidate, previous)? => {
                        discard_join(env, candidate)?;
                    }
                    Some(previous) => {
                        discard_join(env, previous)?;
                        best.insert(joined, candidate);
                    }
                    None => {
                        best.insert(joined, candidate);
                    }
                }
                extended = true;
                exhausted = exhausted || search.check_join_max_candidates();
                if exhausted {
                    break 'outer;
                }
            }
        }
        if !extended {
            return Err(PlanError::not_supported("join operands depend on each other"));
        }
    }

    let full = bit(operands.len()) - 1;
    let winner = best
        .get(&full)
        .copied()
        .ok_or_else(|| PlanError::unexpected("join search ended without a full candidate"))?;
    sweep(env, &best, winner)?;
    if env.traced(TraceTopic::Join) {
        debug!(
            "{}-way join: {}",
            operands.len(),
            env.candidate(winner)?.base.cost
        );
    }
    Ok(winner)
}

/// Erases a losing join and the inner side built for it; the outer belongs
/// to a smaller subset and stays.
fn discard_join(env: &mut Environment<'_>, id: CandidateId) -> PlanResult<()> {
    let outer = match &env.candidate(id)?.kind {
        candidate::CandidateKind::Join(join) => join.outer(),
        _ => return Err(PlanError::unexpected("join search produced a non-join candidate")),
    };
    candidate::discard(env, id, outer)
}

/// Erases every subset candidate the winner does not use
fn sweep(
    env: &mut Environment<'_>,
    best: &BTreeMap<Mask, CandidateId>,
    winner: CandidateId,
) -> PlanResult<()> {
    let mut keep = FxHashSet::default();
    env.reachable(winner, &mut keep)?;
    // larger subsets first, they use the smaller ones
    for (_, id) in best.iter().rev() {
        env.erase_tree(*id, &keep)?;
    }
    Ok(())
}
