/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! System tables materialised on demand.
//!
//! A virtual table has no files. The runtime fills a collection with the
//! requested columns and the plan reads it back; nothing can be searched,
//! ordered or fetched late, so every conjunct is checked on the tuples.

use super::{fields, register, TableVariant};
use crate::candidate::{add_check_predicate, split_bound, AdoptArgument, CandidateBase};
use crate::cost::{Cost, CostValue};
use crate::environment::{CandidateId, Environment, InstanceId, ScalarId};
use crate::error::{PlanError, PlanResult};
use crate::predicate;
use crate::row::Row;
use crate::scalar;
use crate::source::PlanSource;
use log::debug;
use shared::catalog::ColumnId;
use shared::config::TraceTopic;
use shared::program::{Action, IteratorId, IteratorKind, Program, Target};

#[derive(Debug, Clone)]
pub struct VirtualTable {
    pub columns: Vec<ScalarId>,
    /// Position of each column in the table definition
    pub positions: Vec<usize>,
}

pub fn create(
    env: &mut Environment<'_>,
    source: &PlanSource,
    instance: InstanceId,
    columns: &[ColumnId],
) -> PlanResult<CandidateId> {
    let table = env.table(instance)?;
    let scalars = fields(env, instance, columns)?;
    let positions = columns
        .iter()
        .map(|column| {
            table
                .columns
                .iter()
                .position(|definition| definition.id == *column)
                .ok_or_else(|| {
                    PlanError::unexpected(format!("column #{} of {}", column.0, table.name))
                })
        })
        .collect::<PlanResult<Vec<_>>>()?;

    let (residual, unchecked) = match source.predicate() {
        Some(condition) => {
            let mut available = source.preceding_instances(env)?;
            available.insert(instance);
            let conjuncts = predicate::conjuncts(env, condition)?;
            split_bound(env, &conjuncts, &available)?
        }
        None => (Vec::new(), Vec::new()),
    };
    let mut rate = CostValue::ONE;
    for conjunct in &residual {
        rate *= predicate::estimate_rate(env, *conjunct)?;
    }

    // producing the tuples is the runtime's business
    let mut cost = Cost::new();
    cost.reset();
    cost.set_table_count(table.estimate_count);
    cost.set_tuple_count(CostValue::new(table.estimate_count) * rate);
    cost.set_tuple_size(table.tuple_size());
    cost.set_rate(rate);
    cost.set_is_set_rate();
    cost.set_is_set_count();
    if source.order().is_none() {
        let estimate = source.get_estimate_limit();
        if !estimate.is_infinity() {
            cost.set_limit_count(estimate);
        }
    }

    if env.traced(TraceTopic::Cost) {
        debug!(
            "virtual {}: {} columns, {} checked, {} unchecked, {}",
            table.name,
            scalars.len(),
            residual.len(),
            unchecked.len(),
            cost
        );
    }

    let row = env.add_row(Row::from_scalars(scalars.iter().copied()));
    let residual = predicate::combine(env, residual);
    let base = CandidateBase {
        cost,
        row: Some(row),
        predicate: residual,
        unchecked,
        instances: vec![instance],
        ..CandidateBase::default()
    };
    register(
        env,
        instance,
        base,
        TableVariant::Virtual(VirtualTable {
            columns: scalars,
            positions,
        }),
    )
}

impl VirtualTable {
    pub(crate) fn adopt(
        &self,
        env: &Environment<'_>,
        program: &mut Program,
        instance: InstanceId,
        base: &CandidateBase,
        argument: &AdoptArgument,
    ) -> PlanResult<IteratorId> {
        let table = env.table(instance)?;
        if self.columns.is_empty() {
            return Err(PlanError::not_supported(format!(
                "no column of system table {} is read",
                table.name
            )));
        }
        let iterator = program.add_iterator(IteratorKind::Input);
        if let Some(outer) = argument.outer {
            program.copy_node_variables(outer, iterator);
        }
        let data = scalar::array_variable(env, program, iterator, &self.columns)?;
        let collection = program.add_virtual_collection(&table.name, self.positions.clone());
        program.add_action(
            iterator,
            Target::Execution,
            Action::Input { collection, data },
        );
        add_check_predicate(env, program, iterator, base.predicate)?;
        Ok(iterator)
    }
}
