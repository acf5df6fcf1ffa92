/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Writes into a table: insert, delete, update, import and rollback.
//!
//! Tuples come from an operand candidate. Every target file gets one write
//! per tuple; a file whose key is generated by another file is written after
//! it. Constraint checks and undo logging run before the writes.

use super::{column_name, refer, register, TableVariant};
use crate::candidate::{self, AdoptArgument, CandidateBase};
use crate::cost::{CostConstants, CostValue};
use crate::environment::{CandidateId, Environment, InstanceId, ScalarId};
use crate::error::{PlanError, PlanResult};
use crate::scalar::{self, Literal};
use crate::sql::SqlQuery;
use log::debug;
use shared::catalog::{ColumnId, Distribution, FileDef, FileId, TableDef};
use shared::config::TraceTopic;
use shared::program::{Action, ConstraintKind, DataId, IteratorId, Program, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoKind {
    Expunge,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutKind {
    Insert,
    Delete,
    Update,
    /// Bulk load, planned like an insert
    Import,
    /// Rollback of an earlier write
    Undo(UndoKind),
}

impl PutKind {
    pub fn name(&self) -> &'static str {
        match self {
            PutKind::Insert => "insert",
            PutKind::Delete => "delete",
            PutKind::Update => "update",
            PutKind::Import => "import",
            PutKind::Undo(UndoKind::Expunge) => "undo-expunge",
            PutKind::Undo(UndoKind::Update) => "undo-update",
        }
    }

    fn is_insert(&self) -> bool {
        matches!(self, PutKind::Insert | PutKind::Import)
    }
}

/// How a target file's change is recorded for rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoMode {
    None,
    /// The file driver keeps its own undo information
    File,
    /// The old tuple goes to the undo log
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutTarget {
    pub file: FileId,
    /// Generator file that has to be written first
    pub depends_on: Option<FileId>,
    pub undo: UndoMode,
}

#[derive(Debug, Clone)]
pub struct Put {
    pub kind: PutKind,
    pub operand: CandidateId,
    /// New column values
    pub values: Vec<(ColumnId, ScalarId)>,
    pub targets: Vec<PutTarget>,
    pub not_null: Vec<ColumnId>,
    pub refers: Vec<CandidateId>,
    /// Independent targets are written as one parallel group
    pub parallel: bool,
    /// Cascades receiving the tuples of a distributed table
    pub cascades: Vec<String>,
}

impl Put {
    pub fn operands(&self) -> Vec<CandidateId> {
        let mut operands = vec![self.operand];
        operands.extend(self.refers.iter().copied());
        operands
    }

    /// Scalar written into `column`
    pub fn value_of(&self, column: ColumnId) -> Option<ScalarId> {
        self.values
            .iter()
            .find(|(value_column, _)| *value_column == column)
            .map(|(_, scalar)| *scalar)
    }
}

/// Columns a delete or update has to read before writing
pub fn required_columns(table: &TableDef) -> Vec<ColumnId> {
    table.columns.iter().map(|column| column.id).collect()
}

pub fn create(
    env: &mut Environment<'_>,
    instance: InstanceId,
    kind: PutKind,
    operand: CandidateId,
    values: Vec<(ColumnId, ScalarId)>,
) -> PlanResult<CandidateId> {
    let table = env.table(instance)?;
    let updated: Vec<ColumnId> = values.iter().map(|(column, _)| *column).collect();

    let mut cascades = Vec::new();
    let targets = if table.distribution == Distribution::Local {
        targets(env, table, kind, &updated)?
    } else {
        if !kind.is_insert() {
            return Err(PlanError::not_supported(format!(
                "{} on distributed table {}",
                kind.name(),
                table.name
            )));
        }
        let all = &env.catalog().cascades;
        if all.is_empty() {
            return Err(PlanError::not_supported(format!(
                "distributed table {} has no cascade",
                table.name
            )));
        }
        if table.distribution == Distribution::Replicated {
            cascades.extend(all.iter().map(|cascade| cascade.name.clone()));
        } else {
            cascades.push(all[env.next_cascade(all.len())].name.clone());
        }
        Vec::new()
    };
    if targets.is_empty() && cascades.is_empty() {
        return Err(PlanError::not_supported(format!(
            "{} of {} writes no file",
            kind.name(),
            table.name
        )));
    }

    // an inserted column without a value is null, its check fails at run time
    let not_null: Vec<ColumnId> = match kind {
        PutKind::Insert | PutKind::Import | PutKind::Update => table
            .columns
            .iter()
            .filter(|column| !column.nullable && Some(column.id) != table.row_id)
            .filter(|column| kind.is_insert() || updated.contains(&column.id))
            .map(|column| column.id)
            .collect(),
        _ => Vec::new(),
    };

    let refers = create_refers(env, instance, table, kind, &values)?;
    let mut values = values;
    if kind.is_insert() {
        // columns without a value are written as null; the row id comes from
        // the generator file
        for column in &table.columns {
            if Some(column.id) != table.row_id && !updated.contains(&column.id) {
                let null = env.literal(Literal::Null);
                values.push((column.id, null));
            }
        }
        if let Some(row_id) = table.row_id {
            env.field_by_id(instance, row_id)?;
        }
    }

    let independent = targets
        .iter()
        .filter(|target| !is_generator(env, target.file))
        .count();
    let parallel = independent >= 2
        && independent < env.config().thread_max
        && !targets
            .iter()
            .map(|target| env.file(target.file))
            .collect::<PlanResult<Vec<_>>>()?
            .iter()
            .any(|file| file.exclusive_latch);

    // cost
    let estimator = env.estimator();
    let operand_cost = env.candidate(operand)?.base.cost.clone();
    let count = operand_cost.tuple_count().max(CostValue::ONE);
    let mut per_tuple =
        CostValue::new(CostConstants::CHECK_CONSTRAINT_COST) * not_null.len() as f64;
    for target in &targets {
        per_tuple += estimator.put_cost(env.file(target.file)?);
    }
    for refer in &refers {
        per_tuple += env.candidate(*refer)?.base.cost.calculate_value();
    }
    let mut cost = operand_cost.clone();
    if !cascades.is_empty() {
        per_tuple += CostValue::new(CostConstants::SERVER_TRANSFER_COST) * cascades.len() as f64;
        cost.set_overhead(operand_cost.overhead() + CostConstants::SERVER_OVERHEAD);
    }
    cost.set_total_cost(operand_cost.total_cost() + per_tuple * count);
    cost.set_is_set_count();

    if env.traced(TraceTopic::Cost) {
        debug!(
            "{} {}: {} files, {} refers, parallel {}, {}",
            kind.name(),
            table.name,
            targets.len(),
            refers.len(),
            parallel,
            cost
        );
    }

    let base = CandidateBase {
        cost,
        instances: vec![instance],
        distribution: table.distribution,
        ..CandidateBase::default()
    };
    register(
        env,
        instance,
        base,
        TableVariant::Put(Put {
            kind,
            operand,
            values,
            targets,
            not_null,
            refers,
            parallel,
            cascades,
        }),
    )
}

fn is_generator(env: &Environment<'_>, file: FileId) -> bool {
    env.file(file).map_or(false, |file| file.is_key_generated())
}

/// Target files, generators first
fn targets(
    env: &Environment<'_>,
    table: &TableDef,
    kind: PutKind,
    updated: &[ColumnId],
) -> PlanResult<Vec<PutTarget>> {
    let files: Vec<&FileDef> = env
        .catalog()
        .files_of(table.id)
        .filter(|file| match kind {
            PutKind::Insert | PutKind::Import | PutKind::Delete => true,
            PutKind::Update => updated.iter().any(|column| file.covers(*column)),
            PutKind::Undo(_) => file.is_able_to_undo(),
        })
        .collect();
    let generator = files
        .iter()
        .find(|file| file.is_key_generated())
        .map(|file| file.id);

    let mut targets: Vec<PutTarget> = Vec::with_capacity(files.len());
    for file in files.iter().filter(|file| file.is_key_generated()) {
        targets.push(target(file, None, kind));
    }
    for file in files.iter().filter(|file| !file.is_key_generated()) {
        let depends_on = match (generator, table.row_id) {
            (Some(generator), Some(row_id)) if kind.is_insert() && file.covers(row_id) => {
                Some(generator)
            }
            _ => None,
        };
        targets.push(target(file, depends_on, kind));
    }
    Ok(targets)
}

fn target(file: &FileDef, depends_on: Option<FileId>, kind: PutKind) -> PutTarget {
    let undo = match kind {
        PutKind::Undo(_) => UndoMode::None,
        _ if file.is_able_to_undo() => UndoMode::File,
        _ if file.need_log => UndoMode::Log,
        _ => UndoMode::None,
    };
    PutTarget {
        file: file.id,
        depends_on,
        undo,
    }
}

fn create_refers(
    env: &mut Environment<'_>,
    instance: InstanceId,
    table: &TableDef,
    kind: PutKind,
    values: &[(ColumnId, ScalarId)],
) -> PlanResult<Vec<CandidateId>> {
    let mut refers = Vec::new();
    let value_of = |column: &ColumnId| {
        values
            .iter()
            .find(|(value_column, _)| value_column == column)
            .map(|(_, scalar)| *scalar)
    };

    // the written tuple needs its parent
    if matches!(kind, PutKind::Insert | PutKind::Import | PutKind::Update) {
        for key in &table.foreign_keys {
            let scalars: Option<Vec<ScalarId>> = key.columns.iter().map(value_of).collect();
            let scalars = match scalars {
                Some(scalars) => scalars,
                // update leaving the key alone
                None if kind == PutKind::Update => continue,
                None => {
                    return Err(PlanError::not_supported(format!(
                        "foreign key {} of {} has no value",
                        key.name, table.name
                    )))
                }
            };
            let parent = env.catalog().table(key.parent).ok_or_else(|| {
                PlanError::unexpected(format!("parent of {} is not in the catalog", key.name))
            })?;
            refers.push(refer::create(
                env,
                ConstraintKind::ForeignKey,
                parent,
                &key.parent_columns,
                scalars,
            )?);
        }
    }

    // the removed tuple must not be referenced
    if matches!(kind, PutKind::Delete | PutKind::Update) {
        let children: Vec<(&TableDef, &shared::catalog::ForeignKey)> = env
            .catalog()
            .tables
            .iter()
            .flat_map(|child| child.foreign_keys.iter().map(move |key| (child, key)))
            .filter(|(_, key)| key.parent == table.id)
            .collect();
        for (child, key) in children {
            if kind == PutKind::Update
                && !key.parent_columns.iter().any(|column| value_of(column).is_some())
            {
                continue;
            }
            let mut scalars = Vec::with_capacity(key.parent_columns.len());
            for column in &key.parent_columns {
                scalars.push(env.field_id(instance, *column)?);
            }
            refers.push(refer::create(
                env,
                ConstraintKind::ReferedKey,
                child,
                &key.columns,
                scalars,
            )?);
        }
    }
    Ok(refers)
}

impl Put {
    pub(crate) fn adopt(
        &self,
        env: &Environment<'_>,
        program: &mut Program,
        instance: InstanceId,
        argument: &AdoptArgument,
    ) -> PlanResult<IteratorId> {
        let table = env.table(instance)?;
        let operand_argument = AdoptArgument {
            outer: argument.outer,
            ..AdoptArgument::default()
        };
        let iterator = candidate::adopt(env, program, self.operand, &operand_argument)?;

        program.add_action(
            iterator,
            Target::StartUp,
            Action::Lock {
                table: table.name.clone(),
                exclusive: true,
            },
        );
        program.add_action(iterator, Target::Execution, Action::CheckCancel);

        for column in &self.not_null {
            let value = self
                .value_of(*column)
                .ok_or_else(|| PlanError::unexpected("not-null check without a value"))?;
            let data = scalar::variable(env, program, iterator, value)?;
            program.add_action(
                iterator,
                Target::Execution,
                Action::CheckConstraint {
                    kind: ConstraintKind::NotNull,
                    target: column_name(table, *column),
                    data,
                },
            );
        }
        let refer_argument = AdoptArgument::default().with_outer(iterator);
        for refer in &self.refers {
            candidate::adopt(env, program, *refer, &refer_argument)?;
        }

        if !self.cascades.is_empty() {
            return self.adopt_distributed(env, program, instance, iterator);
        }

        for target in self.targets.iter().filter(|target| target.undo == UndoMode::Log) {
            let file = env.file(target.file)?;
            let data = self.logged_tuple(env, program, instance, iterator, file)?;
            program.add_action(
                iterator,
                Target::Execution,
                Action::UndoLog {
                    file: file.name.clone(),
                    data,
                },
            );
        }

        let (first, rest): (Vec<&PutTarget>, Vec<&PutTarget>) = if self.parallel {
            self.targets
                .iter()
                .partition(|target| is_generator(env, target.file))
        } else {
            (self.targets.iter().collect(), Vec::new())
        };
        for target in first {
            let action = self.write(env, program, instance, iterator, target)?;
            program.add_action(iterator, Target::Execution, action);
        }
        if !rest.is_empty() {
            program.add_action(iterator, Target::Execution, Action::BeginParallel);
            for (position, target) in rest.into_iter().enumerate() {
                if position > 0 {
                    program.add_action(iterator, Target::Parallel, Action::ParallelList);
                }
                let action = self.write(env, program, instance, iterator, target)?;
                program.add_action(iterator, Target::Parallel, action);
            }
            program.add_action(iterator, Target::Execution, Action::EndParallel);
        }
        Ok(iterator)
    }

    fn adopt_distributed(
        &self,
        env: &Environment<'_>,
        program: &mut Program,
        instance: InstanceId,
        iterator: IteratorId,
    ) -> PlanResult<IteratorId> {
        let table = env.table(instance)?;
        let mut query = SqlQuery::insert(&table.name);
        for (column, value) in &self.values {
            query.add_column(column_name(table, *column), *value);
        }
        let sql = query.to_sql_statement()?;
        let data = scalar::array_variable(env, program, iterator, &query.scalars())?;
        for cascade in &self.cascades {
            program.add_action(
                iterator,
                Target::Execution,
                Action::ServerOperation {
                    cascade: cascade.clone(),
                    sql: sql.clone(),
                    data,
                },
            );
        }
        Ok(iterator)
    }

    fn write(
        &self,
        env: &Environment<'_>,
        program: &mut Program,
        instance: InstanceId,
        iterator: IteratorId,
        target: &PutTarget,
    ) -> PlanResult<Action> {
        let file = env.file(target.file)?;
        let name = file.name.clone();
        Ok(match self.kind {
            PutKind::Insert | PutKind::Import => {
                let mut scalars = Vec::new();
                for column in file.put_key_fields().chain(file.data_fields()) {
                    scalars.push(self.new_value(env, instance, column)?);
                }
                let data = scalar::array_variable(env, program, iterator, &scalars)?;
                Action::Insert { file: name, data }
            }
            PutKind::Delete => {
                let key = self.old_key(env, program, instance, iterator, file)?;
                Action::Expunge { file: name, key }
            }
            PutKind::Update => {
                let key = self.old_key(env, program, instance, iterator, file)?;
                let mut scalars = Vec::new();
                for column in file.key_fields().chain(file.data_fields()) {
                    scalars.push(self.new_value(env, instance, column)?);
                }
                let data = scalar::array_variable(env, program, iterator, &scalars)?;
                Action::Update {
                    file: name,
                    key,
                    data,
                }
            }
            PutKind::Undo(undo) => {
                let data = self.logged_tuple(env, program, instance, iterator, file)?;
                let operation = match undo {
                    UndoKind::Expunge => "expunge",
                    UndoKind::Update => "update",
                };
                Action::UndoFile {
                    file: name,
                    operation: operation.to_string(),
                    data,
                }
            }
        })
    }

    /// Value written for a column; columns left alone keep the value read
    fn new_value(
        &self,
        env: &Environment<'_>,
        instance: InstanceId,
        column: ColumnId,
    ) -> PlanResult<ScalarId> {
        match self.value_of(column) {
            Some(value) => Ok(value),
            None => env.field_id(instance, column),
        }
    }

    fn old_key(
        &self,
        env: &Environment<'_>,
        program: &mut Program,
        instance: InstanceId,
        iterator: IteratorId,
        file: &FileDef,
    ) -> PlanResult<DataId> {
        let scalars = file
            .key_fields()
            .map(|column| env.field_id(instance, column))
            .collect::<PlanResult<Vec<_>>>()?;
        scalar::array_variable(env, program, iterator, &scalars)
    }

    /// Tuple kept for rollback: the values read for deletes and updates,
    /// the values written otherwise
    fn logged_tuple(
        &self,
        env: &Environment<'_>,
        program: &mut Program,
        instance: InstanceId,
        iterator: IteratorId,
        file: &FileDef,
    ) -> PlanResult<DataId> {
        let scalars = file
            .key_fields()
            .chain(file.data_fields())
            .map(|column| match self.kind {
                PutKind::Delete | PutKind::Update => env.field_id(instance, column),
                _ => self.new_value(env, instance, column),
            })
            .collect::<PlanResult<Vec<_>>>()?;
        scalar::array_variable(env, program, iterator, &scalars)
    }
}
