/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Referential-integrity probes run while a table is written

use super::{register, TableVariant};
use crate::candidate::{AdoptArgument, CandidateBase};
use crate::environment::{CandidateId, Environment, ScalarId};
use crate::error::{PlanError, PlanResult};
use shared::catalog::{ColumnId, FileId, TableDef};
use shared::program::{Action, ConstraintKind, IteratorId, Program, Target};

#[derive(Debug, Clone)]
pub struct Refer {
    pub kind: ConstraintKind,
    /// Table probed
    pub table: String,
    pub file: FileId,
    /// Values looked up in the probed file, in key order
    pub values: Vec<ScalarId>,
}

/// Probe of `table` through a file keyed by `columns`.
///
/// With [`ConstraintKind::ForeignKey`] the written tuple needs a parent; with
/// [`ConstraintKind::ReferedKey`] the removed tuple must have no child left.
pub fn create(
    env: &mut Environment<'_>,
    kind: ConstraintKind,
    table: &TableDef,
    columns: &[ColumnId],
    values: Vec<ScalarId>,
) -> PlanResult<CandidateId> {
    let file = probe_file(env, table, columns)?;
    let definition = env.file(file)?;
    let alias = format!("{}#{}", table.name, env.candidate_count());
    let instance = env.add_instance(&table.name, &alias)?;
    let cost = env.estimator().fetch_cost(definition, table);
    let base = CandidateBase {
        cost,
        instances: vec![instance],
        ..CandidateBase::default()
    };
    register(
        env,
        instance,
        base,
        TableVariant::Refer(Refer {
            kind,
            table: table.name.clone(),
            file,
            values,
        }),
    )
}

/// A file whose leading keys are exactly the probed columns
fn probe_file(env: &Environment<'_>, table: &TableDef, columns: &[ColumnId]) -> PlanResult<FileId> {
    let file = env.catalog().files_of(table.id).find(|file| {
        (file.capability.search || file.capability.fetch)
            && file.keys.len() >= columns.len()
            && file
                .key_fields()
                .zip(columns.iter())
                .all(|(key, column)| key == *column)
    });
    file.map(|file| file.id).ok_or_else(|| {
        PlanError::not_supported(format!(
            "{} has no file to check a reference on {} columns",
            table.name,
            columns.len()
        ))
    })
}

impl Refer {
    /// The probe runs inside the writing loop; no iterator of its own
    pub(crate) fn adopt(
        &self,
        env: &Environment<'_>,
        program: &mut Program,
        argument: &AdoptArgument,
    ) -> PlanResult<IteratorId> {
        let outer = argument
            .outer
            .ok_or_else(|| PlanError::unexpected("reference check outside a writing loop"))?;
        let data = crate::scalar::array_variable(env, program, outer, &self.values)?;
        program.add_action(
            outer,
            Target::Execution,
            Action::CheckConstraint {
                kind: self.kind,
                target: env.file(self.file)?.name.clone(),
                data,
            },
        );
        Ok(outer)
    }
}
