/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Boolean expressions.
//!
//! Predicates are kept in conjunctive form where possible: the table
//! candidates split a predicate into conjuncts and decide, for each one,
//! whether an index searches it, whether it is checked on retrieved tuples,
//! or whether it has to wait for a table that is not available yet.

pub mod check;
pub mod rate;

pub use check::{CheckedPredicate, ChosenPredicate, SearchTerm};
pub use rate::{check_rate, estimate_rate};

use crate::environment::{Environment, InstanceSet, PredicateId, ScalarId};
use crate::error::PlanResult;
use crate::scalar;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Equal => "=",
            CompareOp::NotEqual => "<>",
            CompareOp::Less => "<",
            CompareOp::LessEqual => "<=",
            CompareOp::Greater => ">",
            CompareOp::GreaterEqual => ">=",
        }
    }

    /// Operator with swapped operands, `a < b` is `b > a`
    pub fn reverse(&self) -> Self {
        match self {
            CompareOp::Less => CompareOp::Greater,
            CompareOp::LessEqual => CompareOp::GreaterEqual,
            CompareOp::Greater => CompareOp::Less,
            CompareOp::GreaterEqual => CompareOp::LessEqual,
            other => *other,
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(
            self,
            CompareOp::Less | CompareOp::LessEqual | CompareOp::Greater | CompareOp::GreaterEqual
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum Predicate {
    Comparison {
        op: CompareOp,
        left: ScalarId,
        right: ScalarId,
    },
    IsNull {
        operand: ScalarId,
        negated: bool,
    },
    In {
        operand: ScalarId,
        values: Vec<ScalarId>,
    },
    Like {
        operand: ScalarId,
        pattern: ScalarId,
        negated: bool,
    },
    /// Full-text match
    Contains {
        operand: ScalarId,
        pattern: ScalarId,
    },
    And(Vec<PredicateId>),
    Or(Vec<PredicateId>),
    Not(PredicateId),
}

impl<'a> Environment<'a> {
    pub fn comparison(&mut self, op: CompareOp, left: ScalarId, right: ScalarId) -> PredicateId {
        self.add_predicate(Predicate::Comparison { op, left, right })
    }

    pub fn equal(&mut self, left: ScalarId, right: ScalarId) -> PredicateId {
        self.comparison(CompareOp::Equal, left, right)
    }

    pub fn is_null(&mut self, operand: ScalarId, negated: bool) -> PredicateId {
        self.add_predicate(Predicate::IsNull { operand, negated })
    }

    pub fn in_list(&mut self, operand: ScalarId, values: Vec<ScalarId>) -> PredicateId {
        self.add_predicate(Predicate::In { operand, values })
    }

    pub fn like(&mut self, operand: ScalarId, pattern: ScalarId) -> PredicateId {
        self.add_predicate(Predicate::Like {
            operand,
            pattern,
            negated: false,
        })
    }

    pub fn contains(&mut self, operand: ScalarId, pattern: ScalarId) -> PredicateId {
        self.add_predicate(Predicate::Contains { operand, pattern })
    }

    pub fn and(&mut self, operands: Vec<PredicateId>) -> PredicateId {
        self.add_predicate(Predicate::And(operands))
    }

    pub fn or(&mut self, operands: Vec<PredicateId>) -> PredicateId {
        self.add_predicate(Predicate::Or(operands))
    }

    pub fn not(&mut self, operand: PredicateId) -> PredicateId {
        self.add_predicate(Predicate::Not(operand))
    }
}

/// Top-level conjuncts; nested conjunctions are flattened
pub fn conjuncts(env: &Environment<'_>, id: PredicateId) -> PlanResult<Vec<PredicateId>> {
    let mut result = Vec::new();
    collect_conjuncts(env, id, &mut result)?;
    Ok(result)
}

fn collect_conjuncts(
    env: &Environment<'_>,
    id: PredicateId,
    into: &mut Vec<PredicateId>,
) -> PlanResult<()> {
    match env.predicate(id)? {
        Predicate::And(operands) => {
            for operand in operands.clone() {
                collect_conjuncts(env, operand, into)?;
            }
        }
        _ => {
            if !into.contains(&id) {
                into.push(id);
            }
        }
    }
    Ok(())
}

/// Rebuilds one predicate out of conjuncts
pub fn combine(env: &mut Environment<'_>, mut operands: Vec<PredicateId>) -> Option<PredicateId> {
    match operands.len() {
        0 => None,
        1 => operands.pop(),
        _ => Some(env.and(operands)),
    }
}

/// AND-combines two optional predicates
pub fn merge(
    env: &mut Environment<'_>,
    first: Option<PredicateId>,
    second: Option<PredicateId>,
) -> PlanResult<Option<PredicateId>> {
    let mut operands = Vec::new();
    for predicate in [first, second].into_iter().flatten() {
        for conjunct in conjuncts(env, predicate)? {
            if !operands.contains(&conjunct) {
                operands.push(conjunct);
            }
        }
    }
    Ok(combine(env, operands))
}

fn scalars(predicate: &Predicate) -> Vec<ScalarId> {
    match predicate {
        Predicate::Comparison { left, right, .. } => vec![*left, *right],
        Predicate::IsNull { operand, .. } => vec![*operand],
        Predicate::In { operand, values } => {
            let mut result = vec![*operand];
            result.extend(values.iter().copied());
            result
        }
        Predicate::Like {
            operand, pattern, ..
        }
        | Predicate::Contains { operand, pattern } => vec![*operand, *pattern],
        Predicate::And(_) | Predicate::Or(_) | Predicate::Not(_) => Vec::new(),
    }
}

fn children(predicate: &Predicate) -> Vec<PredicateId> {
    match predicate {
        Predicate::And(operands) | Predicate::Or(operands) => operands.clone(),
        Predicate::Not(operand) => vec![*operand],
        _ => Vec::new(),
    }
}

/// Adds the table instances a predicate refers to
pub fn used_instances(
    env: &Environment<'_>,
    id: PredicateId,
    into: &mut InstanceSet,
) -> PlanResult<()> {
    let predicate = env.predicate(id)?;
    for operand in scalars(predicate) {
        scalar::used_instances(env, operand, into)?;
    }
    for child in children(predicate) {
        used_instances(env, child, into)?;
    }
    Ok(())
}

/// Fields a predicate reads
pub fn used_fields(
    env: &Environment<'_>,
    id: PredicateId,
    into: &mut Vec<ScalarId>,
) -> PlanResult<()> {
    let predicate = env.predicate(id)?;
    for operand in scalars(predicate) {
        scalar::used_fields(env, operand, into)?;
    }
    for child in children(predicate) {
        used_fields(env, child, into)?;
    }
    Ok(())
}

pub fn is_bound_by(
    env: &Environment<'_>,
    id: PredicateId,
    available: &InstanceSet,
) -> PlanResult<bool> {
    let mut instances = InstanceSet::default();
    used_instances(env, id, &mut instances)?;
    Ok(instances.is_subset(available))
}

pub fn require(env: &mut Environment<'_>, id: PredicateId) -> PlanResult<()> {
    let mut fields = Vec::new();
    used_fields(env, id, &mut fields)?;
    for field in fields {
        scalar::require(env, field)?;
    }
    Ok(())
}

/// Qualified text, used for residual checks in the program
pub fn label(env: &Environment<'_>, id: PredicateId) -> PlanResult<String> {
    render(env, id, true)
}

/// Unqualified text sent to a cascade
pub fn to_sql(env: &Environment<'_>, id: PredicateId) -> PlanResult<String> {
    render(env, id, false)
}

/// Text of several conjuncts
pub fn label_all(env: &Environment<'_>, ids: &[PredicateId]) -> PlanResult<String> {
    Ok(ids
        .iter()
        .map(|id| label(env, *id))
        .collect::<PlanResult<Vec<_>>>()?
        .join(" and "))
}

fn render(env: &Environment<'_>, id: PredicateId, qualified: bool) -> PlanResult<String> {
    let text = |scalar_id: ScalarId| -> PlanResult<String> {
        if qualified {
            scalar::label(env, scalar_id)
        } else {
            scalar::to_sql(env, scalar_id)
        }
    };
    Ok(match env.predicate(id)? {
        Predicate::Comparison { op, left, right } => {
            format!("{}{}{}", text(*left)?, op.symbol(), text(*right)?)
        }
        Predicate::IsNull { operand, negated } => format!(
            "{} is {}null",
            text(*operand)?,
            if *negated { "not " } else { "" }
        ),
        Predicate::In { operand, values } => format!(
            "{} in ({})",
            text(*operand)?,
            values
                .iter()
                .map(|value| text(*value))
                .collect::<PlanResult<Vec<_>>>()?
                .join(",")
        ),
        Predicate::Like {
            operand,
            pattern,
            negated,
        } => format!(
            "{} {}like {}",
            text(*operand)?,
            if *negated { "not " } else { "" },
            text(*pattern)?
        ),
        Predicate::Contains { operand, pattern } => {
            format!("{} contains {}", text(*operand)?, text(*pattern)?)
        }
        Predicate::And(operands) => join(env, operands, " and ", qualified)?,
        Predicate::Or(operands) => join(env, operands, " or ", qualified)?,
        Predicate::Not(operand) => format!("not {}", render(env, *operand, qualified)?),
    })
}

fn join(
    env: &Environment<'_>,
    operands: &[PredicateId],
    separator: &str,
    qualified: bool,
) -> PlanResult<String> {
    let parts = operands
        .iter()
        .map(|operand| render(env, *operand, qualified))
        .collect::<PlanResult<Vec<_>>>()?;
    Ok(format!("({})", parts.join(separator)))
}
