/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Direct read of one tuple by row id

use super::{fields, register, TableVariant};
use crate::candidate::{AdoptArgument, CandidateBase};
use crate::environment::{CandidateId, Environment, InstanceId, ScalarId};
use crate::error::{PlanError, PlanResult};
use crate::predicate::{self, CompareOp, Predicate};
use crate::row::Row;
use crate::scalar;
use crate::source::PlanSource;
use shared::catalog::{ColumnId, FileId};
use shared::program::{Action, IteratorId, IteratorKind, Program, Target};

#[derive(Debug, Clone)]
pub struct Simple {
    pub file: FileId,
    /// Value compared with the row id
    pub key: ScalarId,
    pub columns: Vec<ScalarId>,
}

/// The source predicate must hold `rowid = value`; nothing else is planned
pub fn create(
    env: &mut Environment<'_>,
    source: &PlanSource,
    instance: InstanceId,
    columns: &[ColumnId],
) -> PlanResult<CandidateId> {
    let table = env.table(instance)?;
    let file = env.catalog().fetch_file(table.id).ok_or_else(|| {
        PlanError::not_supported(format!("{} cannot be fetched by row id", table.name))
    })?;
    let row_id = table
        .row_id
        .ok_or_else(|| PlanError::not_supported(format!("{} has no row id", table.name)))?;
    let row_id = env.field_by_id(instance, row_id)?;
    let key = match source.predicate() {
        Some(condition) => row_id_value(env, condition, row_id)?,
        None => None,
    }
    .ok_or_else(|| {
        PlanError::not_supported(format!("no row id value to read {} directly", table.name))
    })?;

    let scalars = fields(env, instance, columns)?;
    let cost = env.estimator().fetch_cost(file, table);
    let row = env.add_row(Row::from_scalars(scalars.iter().copied()));
    let key_row = env.add_row(Row::from_scalars([row_id]));
    let base = CandidateBase {
        cost,
        row: Some(row),
        key: Some(key_row),
        instances: vec![instance],
        ..CandidateBase::default()
    };
    register(
        env,
        instance,
        base,
        TableVariant::Simple(Simple {
            file: file.id,
            key,
            columns: scalars,
        }),
    )
}

/// Whether the source asks for exactly one tuple of a local table by a
/// constant row id and nothing else
pub fn is_row_id_lookup(
    env: &mut Environment<'_>,
    source: &PlanSource,
    instance: InstanceId,
) -> PlanResult<bool> {
    let condition = match source.predicate() {
        Some(condition) => condition,
        None => return Ok(false),
    };
    let table = env.table(instance)?;
    let row_id = match table.row_id {
        Some(row_id) if env.catalog().fetch_file(table.id).is_some() => row_id,
        _ => return Ok(false),
    };
    if predicate::conjuncts(env, condition)?.len() != 1 {
        return Ok(false);
    }
    let row_id = env.field_by_id(instance, row_id)?;
    Ok(row_id_value(env, condition, row_id)?.is_some())
}

fn row_id_value(
    env: &Environment<'_>,
    condition: crate::environment::PredicateId,
    row_id: ScalarId,
) -> PlanResult<Option<ScalarId>> {
    for conjunct in predicate::conjuncts(env, condition)? {
        if let Predicate::Comparison {
            op: CompareOp::Equal,
            left,
            right,
        } = env.predicate(conjunct)?
        {
            if *left == row_id && scalar::is_constant(env, *right)? {
                return Ok(Some(*right));
            }
            if *right == row_id && scalar::is_constant(env, *left)? {
                return Ok(Some(*left));
            }
        }
    }
    Ok(None)
}

impl Simple {
    pub(crate) fn adopt(
        &self,
        env: &Environment<'_>,
        program: &mut Program,
        _base: &CandidateBase,
        argument: &AdoptArgument,
    ) -> PlanResult<IteratorId> {
        let file = env.file(self.file)?;
        let iterator = program.add_iterator(IteratorKind::File {
            file: file.name.clone(),
        });
        if let Some(outer) = argument.outer {
            program.copy_node_variables(outer, iterator);
        }
        let key = scalar::variable(env, program, iterator, self.key)?;
        let data = scalar::array_variable(env, program, iterator, &self.columns)?;
        program.add_action(
            iterator,
            Target::Execution,
            Action::Fetch {
                file: file.name.clone(),
                key,
                data,
            },
        );
        Ok(iterator)
    }
}
