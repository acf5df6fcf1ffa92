/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Nested-loop joins of two candidates.
//!
//! The first operand drives the loop; the second one runs once per outer
//! tuple with the outer values bound. Which operand goes first is decided by
//! the join relations, this module only builds and lowers one order.

pub mod adopt;
pub mod cost;

use crate::candidate::{self, copy_order, Candidate, CandidateBase, CandidateKind};
use crate::cost::CostValue;
use crate::environment::{CandidateId, Environment, PredicateId, ScalarId};
use crate::error::PlanResult;
use crate::order;
use crate::predicate;
use crate::row::Row;
use crate::source::PlanSource;
use log::debug;
use shared::config::TraceTopic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    /// Outer tuples without a match are padded with nulls
    LeftOuter,
    /// Outer tuples with at least one match
    Exists,
    /// Outer tuples without any match
    NotExists,
}

#[derive(Debug, Clone)]
pub struct JoinCandidate {
    pub kind: JoinKind,
    /// Outer, then inner
    pub operands: [CandidateId; 2],
    /// Join predicate as written in the query
    pub predicate: Option<PredicateId>,
}

impl JoinCandidate {
    pub fn name(&self) -> &'static str {
        match self.kind {
            JoinKind::Inner => "nested-loop",
            JoinKind::LeftOuter => "outer-join",
            JoinKind::Exists => "exists",
            JoinKind::NotExists => "not-exists",
        }
    }

    pub fn outer(&self) -> CandidateId {
        self.operands[0]
    }

    pub fn inner(&self) -> CandidateId {
        self.operands[1]
    }

    /// A joined column can be fetched late by the operand producing it, as
    /// long as the join predicate does not read it
    pub(crate) fn is_delayable(
        &self,
        env: &Environment<'_>,
        scalar: ScalarId,
        keys: &[ScalarId],
    ) -> PlanResult<bool> {
        let instance = match env.scalar(scalar)?.as_field() {
            Some(field) => field.instance,
            None => return Ok(false),
        };
        let mut keys = keys.to_vec();
        if let Some(predicate) = self.predicate {
            predicate::used_fields(env, predicate, &mut keys)?;
        }
        for operand in self.operands {
            if env.candidate(operand)?.base.instances.contains(&instance) {
                return candidate::is_delayable(env, operand, scalar, &keys);
            }
        }
        Ok(false)
    }
}

/// Joins two planned candidates in the given order.
///
/// Conjuncts neither operand could evaluate are checked by the join once
/// both sides are bound; those still unbound stay unchecked for an enclosing
/// join.
pub fn create(
    env: &mut Environment<'_>,
    source: &PlanSource,
    kind: JoinKind,
    outer: CandidateId,
    inner: CandidateId,
    join_predicate: Option<PredicateId>,
) -> PlanResult<CandidateId> {
    let mut pending = env.candidate(outer)?.base.unchecked.clone();
    pending.extend(env.candidate(inner)?.base.unchecked.iter().copied());
    build(env, source, kind, outer, inner, join_predicate, pending)
}

/// Joins an outer candidate with an inner one planned against it.
///
/// The inner side received every conjunct the outer left unchecked, so only
/// what the inner leaves unchecked is pending here. Counting the outer's
/// conjuncts again would apply their rates twice.
pub fn create_nested(
    env: &mut Environment<'_>,
    source: &PlanSource,
    kind: JoinKind,
    outer: CandidateId,
    inner: CandidateId,
    join_predicate: Option<PredicateId>,
) -> PlanResult<CandidateId> {
    let pending = env.candidate(inner)?.base.unchecked.clone();
    build(env, source, kind, outer, inner, join_predicate, pending)
}

fn build(
    env: &mut Environment<'_>,
    source: &PlanSource,
    kind: JoinKind,
    outer: CandidateId,
    inner: CandidateId,
    join_predicate: Option<PredicateId>,
    pending: Vec<PredicateId>,
) -> PlanResult<CandidateId> {
    let outer_base = env.candidate(outer)?.base.clone();
    let inner_base = env.candidate(inner)?.base.clone();

    let mut instances = outer_base.instances.clone();
    for instance in &inner_base.instances {
        if !instances.contains(instance) {
            instances.push(*instance);
        }
    }
    let mut available = source.preceding_instances(env)?;
    available.extend(instances.iter().copied());

    let (residual, unchecked) = candidate::split_bound(env, &pending, &available)?;
    let mut residual_rate = CostValue::ONE;
    for conjunct in &residual {
        residual_rate *= predicate::estimate_rate(env, *conjunct)?;
    }
    let join_rate = match join_predicate {
        Some(join_predicate) => {
            let mut rate = CostValue::ONE;
            for conjunct in predicate::conjuncts(env, join_predicate)? {
                rate *= predicate::estimate_rate(env, conjunct)?;
            }
            rate
        }
        None => CostValue::ONE,
    };

    let order_ok = match source.order() {
        Some(required) => order::is_satisfied_by(
            Some(env.order(required)?),
            match outer_base.order {
                Some(provided) => Some(env.order(provided)?),
                None => None,
            },
        ),
        None => true,
    };
    let estimate_limit = source.get_estimate_limit();
    let cost = match kind {
        JoinKind::Inner | JoinKind::LeftOuter => cost::nested_loop(
            &outer_base.cost,
            &inner_base.cost,
            cost::JoinRates {
                join: join_rate,
                residual: residual_rate,
            },
            kind == JoinKind::LeftOuter,
            estimate_limit,
            order_ok,
        ),
        JoinKind::Exists | JoinKind::NotExists => cost::exists(
            &outer_base.cost,
            &inner_base.cost,
            cost::JoinRates {
                join: join_rate,
                residual: residual_rate,
            },
            estimate_limit,
            order_ok,
        ),
    };

    let mut row = match outer_base.row {
        Some(row) => env.row(row)?.clone(),
        None => Row::new(),
    };
    let mut key = match outer_base.key {
        Some(key) => env.row(key)?.clone(),
        None => Row::new(),
    };
    if matches!(kind, JoinKind::Inner | JoinKind::LeftOuter) {
        if let Some(inner_row) = inner_base.row {
            let inner_row = env.row(inner_row)?.clone();
            row.merge(&inner_row);
        }
        if let Some(inner_key) = inner_base.key {
            let inner_key = env.row(inner_key)?.clone();
            key.merge(&inner_key);
        }
    }
    let row = env.add_row(row);
    let key = if key.is_empty() { None } else { Some(env.add_row(key)) };
    let order = copy_order(env, outer_base.order)?;
    let residual = predicate::combine(env, residual);

    if env.traced(TraceTopic::Join) {
        debug!(
            "{:?} join {} x {}: {}",
            kind,
            env.candidate(outer)?.name(),
            env.candidate(inner)?.name(),
            cost
        );
    }

    let base = CandidateBase {
        cost,
        order,
        row: Some(row),
        key,
        predicate: residual,
        unchecked,
        instances,
        ..CandidateBase::default()
    };
    Ok(env.register_candidate(Candidate::new(
        base,
        CandidateKind::Join(JoinCandidate {
            kind,
            operands: [outer, inner],
            predicate: join_predicate,
        }),
    )))
}
