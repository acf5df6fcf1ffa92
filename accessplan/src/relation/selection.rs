/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! WHERE clauses.
//!
//! The condition travels down in the source so table candidates can search
//! indexes with it. When the condition is a disjunction over one table, a
//! second attempt plans every branch on its own and unions the results by
//! row id; the cheaper of the two wins.

use super::{Relation, Selection};
use crate::candidate::{self, filter, union};
use crate::environment::{CandidateId, Environment, InstanceId, PredicateId};
use crate::error::{PlanError, PlanResult};
use crate::predicate::{self, Predicate};
use crate::source::PlanSource;
use log::debug;
use shared::catalog::Distribution;
use shared::config::TraceTopic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Direct,
    UnionRewrite,
}

/// The disjunction one table is searched with, branch by branch
struct Rewrite {
    instance: InstanceId,
    /// Conjuncts every branch keeps
    common: Vec<PredicateId>,
    branches: Vec<PredicateId>,
}

pub fn create_access_plan(
    env: &mut Environment<'_>,
    source: &PlanSource,
    selection: &Selection,
) -> PlanResult<CandidateId> {
    if !absorbs_predicate(env.relation(selection.operand)?) {
        let operand = super::create_access_plan(env, selection.operand, &source.for_operand())?;
        let conditions = predicate::conjuncts(env, selection.condition)?;
        return filter::create(env, source, operand, &conditions);
    }

    let mut strategy = Strategy::Direct;
    let mut best: Option<CandidateId> = None;
    loop {
        match strategy {
            Strategy::Direct => {
                let mut direct_source = source.for_operand();
                direct_source.add_predicate(env, selection.condition)?;
                let scope = env.scope();
                match super::create_access_plan(env, selection.operand, &direct_source) {
                    Ok(id) => best = Some(id),
                    Err(error) if error.is_not_supported() => {
                        debug!("direct selection failed: {}", error);
                        scope.release(env);
                    }
                    Err(error) => return Err(error),
                }
                if find_rewrite(env, source, selection)?.is_none() {
                    break;
                }
                strategy = Strategy::UnionRewrite;
            }
            Strategy::UnionRewrite => {
                let rewrite = match find_rewrite(env, source, selection)? {
                    Some(rewrite) => rewrite,
                    None => break,
                };
                let scope = env.scope();
                match union_rewrite(env, source, selection, &rewrite) {
                    Ok(union) => {
                        best = Some(match best {
                            Some(direct) => candidate::keep_cheaper(env, direct, union)?,
                            None => union,
                        });
                    }
                    Err(error) if error.is_not_supported() => {
                        debug!("union rewrite failed: {}", error);
                        scope.release(env);
                    }
                    Err(error) => return Err(error),
                }
                break;
            }
        }
    }
    best.ok_or_else(|| PlanError::not_supported("no access path for the selection"))
}

/// Operands that take the condition from the source themselves
fn absorbs_predicate(relation: &Relation) -> bool {
    matches!(
        relation,
        Relation::Table(_) | Relation::Join(_) | Relation::Selection(_)
    )
}

fn find_rewrite(
    env: &Environment<'_>,
    source: &PlanSource,
    selection: &Selection,
) -> PlanResult<Option<Rewrite>> {
    let instance = match env.relation(selection.operand)? {
        Relation::Table(instance) => *instance,
        _ => return Ok(None),
    };
    let table = env.table(instance)?;
    // the union is read back unordered and deduplicated by row id
    if source.order().is_some()
        || table.row_id.is_none()
        || table.distribution != Distribution::Local
    {
        return Ok(None);
    }
    let mut common = Vec::new();
    let mut branches = Vec::new();
    for conjunct in predicate::conjuncts(env, selection.condition)? {
        match env.predicate(conjunct)? {
            Predicate::Or(operands) if branches.is_empty() => branches = operands.clone(),
            _ => common.push(conjunct),
        }
    }
    let union_max = env.config().union_max;
    if branches.len() < 2 || branches.len() > union_max {
        return Ok(None);
    }
    Ok(Some(Rewrite {
        instance,
        common,
        branches,
    }))
}

fn union_rewrite(
    env: &mut Environment<'_>,
    source: &PlanSource,
    selection: &Selection,
    rewrite: &Rewrite,
) -> PlanResult<CandidateId> {
    let row_id = match env.table(rewrite.instance)?.row_id {
        Some(row_id) => env.field_by_id(rewrite.instance, row_id)?,
        None => return Err(PlanError::unexpected("union rewrite without a row id")),
    };
    let mut operands = Vec::with_capacity(rewrite.branches.len());
    for branch in &rewrite.branches {
        let mut conjuncts = rewrite.common.clone();
        conjuncts.push(*branch);
        let condition = match predicate::combine(env, conjuncts) {
            Some(condition) => condition,
            None => continue,
        };
        let mut branch_source = source.for_operand();
        branch_source.erase_limit();
        branch_source.add_predicate(env, condition)?;
        operands.push(super::create_access_plan(env, selection.operand, &branch_source)?);
    }
    let union = union::create(env, operands, vec![row_id])?;
    if env.traced(TraceTopic::Predicate) {
        debug!(
            "union of {} branches for {}",
            rewrite.branches.len(),
            predicate::label(env, selection.condition)?
        );
    }
    Ok(union)
}
