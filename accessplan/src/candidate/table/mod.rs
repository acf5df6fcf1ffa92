/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Candidates over one base table: reads, writes and referential probes

pub mod distribute;
pub mod put;
pub mod refer;
pub mod retrieve;
pub mod simple;
pub mod virtual_table;

pub use distribute::Distribute;
pub use put::{Put, PutKind, PutTarget, UndoKind, UndoMode};
pub use refer::Refer;
pub use retrieve::{Driving, Retrieve, RetrievedColumn};
pub use simple::Simple;
pub use virtual_table::VirtualTable;

use super::{AdoptArgument, Candidate, CandidateBase, CandidateKind};
use crate::environment::{CandidateId, Environment, InstanceId, ScalarId};
use crate::error::{PlanError, PlanResult};
use crate::source::PlanSource;
use crate::sql::SqlQuery;
use shared::catalog::{ColumnId, Distribution, FileDef, TableDef, TableId};
use shared::program::{IteratorId, Program};

#[derive(Debug, Clone)]
pub struct TableCandidate {
    pub instance: InstanceId,
    pub table: TableId,
    pub variant: TableVariant,
}

#[derive(Debug, Clone)]
pub enum TableVariant {
    Retrieve(Retrieve),
    Virtual(VirtualTable),
    Simple(Simple),
    Refer(Refer),
    Put(Put),
    Distribute(Distribute),
}

impl TableCandidate {
    pub fn name(&self) -> &'static str {
        match &self.variant {
            TableVariant::Retrieve(_) => "retrieve",
            TableVariant::Virtual(_) => "virtual",
            TableVariant::Simple(_) => "simple",
            TableVariant::Refer(_) => "refer",
            TableVariant::Put(put) => put.kind.name(),
            TableVariant::Distribute(distribute) => {
                if distribute.replicated {
                    "replicated"
                } else {
                    "distribute"
                }
            }
        }
    }

    pub fn operands(&self) -> Vec<CandidateId> {
        match &self.variant {
            TableVariant::Put(put) => put.operands(),
            _ => Vec::new(),
        }
    }

    pub fn retrieve(&self) -> Option<&Retrieve> {
        match &self.variant {
            TableVariant::Retrieve(retrieve) => Some(retrieve),
            _ => None,
        }
    }

    pub(crate) fn adopt(
        &self,
        env: &Environment<'_>,
        program: &mut Program,
        base: &CandidateBase,
        argument: &AdoptArgument,
    ) -> PlanResult<IteratorId> {
        match &self.variant {
            TableVariant::Retrieve(retrieve) => {
                retrieve.adopt(env, program, self.instance, base, argument)
            }
            TableVariant::Virtual(virtual_table) => {
                virtual_table.adopt(env, program, self.instance, base, argument)
            }
            TableVariant::Simple(simple) => simple.adopt(env, program, base, argument),
            TableVariant::Refer(refer) => refer.adopt(env, program, argument),
            TableVariant::Put(put) => put.adopt(env, program, self.instance, argument),
            TableVariant::Distribute(distribute) => {
                distribute.adopt(env, program, self.instance, base, argument)
            }
        }
    }

    pub(crate) fn is_delayable(
        &self,
        env: &Environment<'_>,
        base: &CandidateBase,
        scalar: ScalarId,
    ) -> PlanResult<bool> {
        match &self.variant {
            TableVariant::Retrieve(retrieve) => {
                retrieve.is_delayable(env, self.instance, base, scalar)
            }
            _ => Ok(false),
        }
    }

    pub(crate) fn generate_sql(
        &self,
        env: &Environment<'_>,
        base: &CandidateBase,
    ) -> PlanResult<SqlQuery> {
        match &self.variant {
            TableVariant::Distribute(distribute) => {
                distribute.generate_sql(env, self.instance, base)
            }
            _ => Err(PlanError::not_supported(format!(
                "{} of a local table cannot be pushed to a cascade",
                self.name()
            ))),
        }
    }
}

/// Plans the read of a table instance, picking the variant its definition
/// and the source call for.
pub fn create(
    env: &mut Environment<'_>,
    source: &PlanSource,
    instance: InstanceId,
) -> PlanResult<CandidateId> {
    let table = env.table(instance)?;
    let columns = env.required_columns(instance);
    if table.is_virtual {
        virtual_table::create(env, source, instance, &columns)
    } else if table.distribution != Distribution::Local {
        distribute::create(env, source, instance, &columns)
    } else if source.is_simple() {
        simple::create(env, source, instance, &columns)
    } else {
        retrieve::create(env, source, instance, &columns)
    }
}

pub(crate) fn register(
    env: &mut Environment<'_>,
    instance: InstanceId,
    base: CandidateBase,
    variant: TableVariant,
) -> PlanResult<CandidateId> {
    let table = env.table(instance)?.id;
    Ok(env.register_candidate(Candidate::new(
        base,
        CandidateKind::Table(TableCandidate {
            instance,
            table,
            variant,
        }),
    )))
}

/// Whether reading the file hands back the column; every entry carries the
/// row id of its tuple.
pub(crate) fn provides(file: &FileDef, table: &TableDef, column: ColumnId) -> bool {
    file.stores(column) || table.row_id == Some(column)
}

pub(crate) fn fields(
    env: &mut Environment<'_>,
    instance: InstanceId,
    columns: &[ColumnId],
) -> PlanResult<Vec<ScalarId>> {
    columns
        .iter()
        .map(|column| env.field_by_id(instance, *column))
        .collect()
}

pub(crate) fn column_name(table: &TableDef, column: ColumnId) -> String {
    table
        .column_def(column)
        .map(|definition| definition.name.clone())
        .unwrap_or_else(|| format!("#{}", column.0))
}
