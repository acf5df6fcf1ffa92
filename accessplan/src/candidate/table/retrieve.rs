/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Reading a local table through its files.
//!
//! One file drives the iteration: the index chosen for the predicate, the
//! file delivering the order, or a plain scan file. Columns the driving file
//! does not return are fetched by row id from the table's fetch file.

use super::{column_name, provides, register, TableVariant};
use crate::candidate::{add_check_predicate, AdoptArgument, CandidateBase};
use crate::cost::{Cost, CostConstants, CostValue};
use crate::environment::{CandidateId, Environment, InstanceId, ScalarId};
use crate::error::{PlanError, PlanResult};
use crate::limit::Limit;
use crate::order::Specification;
use crate::predicate::{self, ChosenPredicate};
use crate::row::Row;
use crate::scalar;
use crate::source::PlanSource;
use log::debug;
use shared::catalog::{ColumnId, FileId, TableDef};
use shared::config::TraceTopic;
use shared::program::{Action, IteratorId, IteratorKind, Program, Target};

/// How the driving file is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driving {
    /// Every entry, in file order
    Scan(FileId),
    /// Entries matching the searched conjuncts
    Search(FileId),
    /// Row ids collected from a bitmap
    BitSet(FileId),
}

impl Driving {
    pub fn file(&self) -> FileId {
        match self {
            Driving::Scan(file) | Driving::Search(file) | Driving::BitSet(file) => *file,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievedColumn {
    pub column: ColumnId,
    pub scalar: ScalarId,
    pub file: FileId,
}

#[derive(Debug, Clone)]
pub struct Retrieve {
    pub driving: Driving,
    pub columns: Vec<RetrievedColumn>,
    pub predicate: Option<ChosenPredicate>,
    /// Files read by row id after the driving one
    pub fetched: Vec<FileId>,
    pub row_id: Option<ScalarId>,
    pub fetch_file: Option<FileId>,
}

pub fn create(
    env: &mut Environment<'_>,
    source: &PlanSource,
    instance: InstanceId,
    columns: &[ColumnId],
) -> PlanResult<CandidateId> {
    let table = env.table(instance)?;
    let mut columns = columns.to_vec();
    if let Some(row_id) = table.row_id {
        columns.push(row_id);
    }
    columns.sort();
    columns.dedup();

    let preceding = source.preceding_instances(env)?;
    let repeat = source.repeat_count(env)?;
    let mut limit = source.limit();
    let mut estimate_limit = source.get_estimate_limit();

    // enumerate
    let checked_predicate = match source.predicate() {
        Some(predicate) => Some(predicate::check::check(env, predicate, instance, &preceding)?),
        None => None,
    };
    let required_order = match source.order() {
        Some(order) => Some(env.order(order)?.clone()),
        None => None,
    };
    let checked_order = match &required_order {
        Some(required) => required.check(
            env,
            instance,
            &preceding,
            source.check_partial(),
            source.is_grouping(),
        )?,
        None => None,
    };

    // choose the predicate against a full scan
    let estimator = env.estimator();
    let scan_cost = cheapest_scan_cost(env, table)?;
    let mut chosen_predicate = match &checked_predicate {
        Some(checked) => Some(predicate::check::choose(
            env,
            instance,
            checked,
            &scan_cost,
            estimate_limit,
            repeat,
            None,
        )?),
        None => None,
    };

    // choose the order; its file drives the iteration
    let mut order: Option<Specification> = None;
    if let Some(checked) = &checked_order {
        if let Some(chosen) = checked.choose(env, chosen_predicate.as_ref(), &limit)? {
            let file = chosen
                .chosen()
                .map(|phase| phase.file)
                .ok_or_else(|| PlanError::unexpected("chosen order without a file"))?;
            if let (Some(checked), Some(current)) = (&checked_predicate, &chosen_predicate) {
                if current.file != Some(file) {
                    let restricted = estimator.scan_cost(env.file(file)?, table);
                    chosen_predicate = Some(predicate::check::choose(
                        env,
                        instance,
                        checked,
                        &restricted,
                        estimate_limit,
                        repeat,
                        Some(file),
                    )?);
                }
            }
            order = Some(chosen);
        }
    }
    let is_full_order = match (&order, &required_order) {
        (Some(order), Some(required)) => {
            order.len() == required.len()
                && order.chosen().map_or(false, |phase| phase.skipped == 0)
        }
        _ => false,
    };
    if !is_full_order {
        limit = Limit::default();
        estimate_limit = CostValue::INFINITY;
    }

    let driving = choose_driving(env, table, &columns, order.as_ref(), chosen_predicate.as_ref())?;
    let residual = chosen_predicate
        .as_ref()
        .map(|chosen| chosen.residual.clone())
        .unwrap_or_default();
    let unchecked = chosen_predicate
        .as_ref()
        .map(|chosen| chosen.unchecked.clone())
        .unwrap_or_default();
    let is_limited = limit.is_specified()
        && residual.is_empty()
        && unchecked.is_empty()
        && !matches!(driving, Driving::BitSet(_))
        && env.file(driving.file())?.capability.limit;

    // columns
    let fetch_file = env.catalog().fetch_file(table.id).map(|file| file.id);
    let mut retrieved = Vec::with_capacity(columns.len());
    let mut fetched: Vec<FileId> = Vec::new();
    let mut row_id = None;
    for column in &columns {
        let file = choose_file(env, table, *column, driving, fetch_file, &fetched)?;
        if file != driving.file() && !fetched.contains(&file) {
            fetched.push(file);
        }
        let scalar = env.field_by_id(instance, *column)?;
        if table.row_id == Some(*column) {
            row_id = Some(scalar);
        }
        retrieved.push(RetrievedColumn {
            column: *column,
            scalar,
            file,
        });
    }

    // cost
    let mut cost = match (driving, &chosen_predicate) {
        (Driving::Search(file), Some(chosen)) | (Driving::BitSet(file), Some(chosen))
            if chosen.file == Some(file) =>
        {
            chosen.cost.clone()
        }
        _ => estimator.scan_cost(env.file(driving.file())?, table),
    };
    let mut residual_rate = CostValue::ONE;
    for conjunct in &residual {
        residual_rate *= predicate::estimate_rate(env, *conjunct)?;
    }
    cost.set_tuple_count(cost.tuple_count() * residual_rate);
    for file in &fetched {
        let retrieve_cost = estimator.retrieve_cost(env.file(*file)?, table);
        match driving {
            Driving::BitSet(_) => cost.add_startup(
                retrieve_cost
                    * cost
                        .tuple_count()
                        .min(CostValue::new(CostConstants::BITSET_TUPLE_LIMIT)),
            ),
            _ => cost.add_retrieve_cost(retrieve_cost),
        }
    }
    if !estimate_limit.is_infinity() {
        cost.set_rate(CostValue::INFINITY);
        cost.set_limit_count(estimate_limit);
    }
    if let Some(chosen) = &chosen_predicate {
        cost.set_rate(chosen.rate);
        cost.set_is_set_rate();
    }
    let is_fetch = match (driving, &chosen_predicate) {
        (Driving::Search(file), Some(chosen)) => chosen.file == Some(file) && chosen.is_fetch,
        _ => false,
    };
    cost.set_is_fetch(is_fetch);
    cost.set_is_set_count();

    if env.traced(TraceTopic::Cost) {
        debug!(
            "retrieve {}: {:?}, {} fetched files, {}",
            env.instance(instance)?.alias,
            driving,
            fetched.len(),
            cost
        );
    }

    let row = env.add_row(Row::from_scalars(retrieved.iter().map(|column| column.scalar)));
    let key = row_id.map(|row_id| env.add_row(Row::from_scalars([row_id])));
    let order = order.map(|order| env.add_order(order));
    let residual_predicate = predicate::combine(env, residual);
    let base = CandidateBase {
        cost,
        order,
        row: Some(row),
        key,
        predicate: residual_predicate,
        unchecked,
        limit,
        is_limited,
        instances: vec![instance],
        ..CandidateBase::default()
    };
    register(
        env,
        instance,
        base,
        TableVariant::Retrieve(Retrieve {
            driving,
            columns: retrieved,
            predicate: chosen_predicate,
            fetched,
            row_id,
            fetch_file,
        }),
    )
}

fn cheapest_scan_cost(env: &Environment<'_>, table: &TableDef) -> PlanResult<Cost> {
    let estimator = env.estimator();
    let mut best: Option<Cost> = None;
    for file in env.catalog().scan_files(table.id) {
        let cost = estimator.scan_cost(env.file(file)?, table);
        if best.as_ref().map_or(true, |best| cost < *best) {
            best = Some(cost);
        }
    }
    Ok(best.unwrap_or_default())
}

fn choose_driving(
    env: &Environment<'_>,
    table: &TableDef,
    columns: &[ColumnId],
    order: Option<&Specification>,
    chosen: Option<&ChosenPredicate>,
) -> PlanResult<Driving> {
    if let Some(phase) = order.and_then(|order| order.chosen()) {
        return Ok(if phase.is_bitset_sort {
            Driving::BitSet(phase.file)
        } else if chosen.and_then(|chosen| chosen.file) == Some(phase.file) {
            Driving::Search(phase.file)
        } else {
            Driving::Scan(phase.file)
        });
    }
    if let Some(chosen) = chosen {
        if let Some(file) = chosen.file {
            return Ok(if chosen.is_bitset {
                Driving::BitSet(file)
            } else {
                Driving::Search(file)
            });
        }
    }
    match choose_scan(env, table, columns)? {
        Some(file) => Ok(Driving::Scan(file)),
        None => Err(PlanError::not_supported(format!(
            "{} has no file to drive a retrieval",
            table.name
        ))),
    }
}

/// Scan file for a retrieval no index drives: the last file returning every
/// column, or the cheapest one to scan.
fn choose_scan(
    env: &Environment<'_>,
    table: &TableDef,
    columns: &[ColumnId],
) -> PlanResult<Option<FileId>> {
    let files = env.catalog().scan_files(table.id);
    let mut covering = None;
    for file in &files {
        let definition = env.file(*file)?;
        if columns.iter().all(|column| provides(definition, table, *column)) {
            covering = Some(*file);
        }
    }
    if covering.is_some() {
        return Ok(covering);
    }
    let estimator = env.estimator();
    let mut best: Option<(FileId, Cost)> = None;
    for file in files {
        let cost = estimator.scan_cost(env.file(file)?, table);
        if best.as_ref().map_or(true, |(_, best)| cost < *best) {
            best = Some((file, cost));
        }
    }
    Ok(best.map(|(file, _)| file))
}

/// File a column is read from: the driving file, a file already fetched, or
/// the fetch file keyed by row id.
fn choose_file(
    env: &Environment<'_>,
    table: &TableDef,
    column: ColumnId,
    driving: Driving,
    fetch_file: Option<FileId>,
    fetched: &[FileId],
) -> PlanResult<FileId> {
    let driving_file = env.file(driving.file())?;
    let from_driving = match driving {
        // a bitmap hands back row ids only
        Driving::BitSet(_) => table.row_id == Some(column),
        _ => provides(driving_file, table, column),
    };
    if from_driving {
        return Ok(driving.file());
    }
    for file in fetched {
        if env.file(*file)?.stores(column) {
            return Ok(*file);
        }
    }
    if let Some(file) = fetch_file {
        if env.file(file)?.stores(column) {
            return Ok(file);
        }
    }
    Err(PlanError::not_supported(format!(
        "column {} of {} cannot be retrieved",
        column_name(table, column),
        table.name
    )))
}

impl Retrieve {
    pub(crate) fn adopt(
        &self,
        env: &Environment<'_>,
        program: &mut Program,
        instance: InstanceId,
        base: &CandidateBase,
        argument: &AdoptArgument,
    ) -> PlanResult<IteratorId> {
        let driving = env.file(self.driving.file())?;
        let iterator = program.add_iterator(IteratorKind::File {
            file: driving.name.clone(),
        });
        if let Some(outer) = argument.outer {
            program.copy_node_variables(outer, iterator);
        }

        let eager: Vec<ScalarId> = self
            .columns
            .iter()
            .filter(|column| {
                column.file == self.driving.file() && !argument.is_deferred(column.scalar)
            })
            .map(|column| column.scalar)
            .collect();
        let data = scalar::array_variable(env, program, iterator, &eager)?;
        let action = match self.driving {
            Driving::BitSet(_) => Action::GetByBitSet {
                file: driving.name.clone(),
                data,
            },
            Driving::Scan(_) | Driving::Search(_) => {
                let search = match (&self.predicate, self.driving) {
                    (Some(chosen), Driving::Search(_)) if !chosen.searched.is_empty() => {
                        Some(predicate::label_all(env, &chosen.searched)?)
                    }
                    _ => None,
                };
                let order = match base.order {
                    Some(order) => Some(env.order(order)?.label(env)?),
                    None => None,
                };
                Action::Scan {
                    file: driving.name.clone(),
                    data,
                    search,
                    order,
                    limited: base.is_limited,
                }
            }
        };
        program.add_action(iterator, Target::Execution, action);

        for file_id in &self.fetched {
            let scalars: Vec<ScalarId> = self
                .columns
                .iter()
                .filter(|column| column.file == *file_id && !argument.is_deferred(column.scalar))
                .map(|column| column.scalar)
                .collect();
            if scalars.is_empty() {
                continue;
            }
            let row_id = self.row_id.ok_or_else(|| {
                PlanError::unexpected(format!(
                    "instance {} fetches columns without a row id",
                    instance.0
                ))
            })?;
            let key = scalar::variable(env, program, iterator, row_id)?;
            let data = scalar::array_variable(env, program, iterator, &scalars)?;
            program.add_action(
                iterator,
                Target::Execution,
                Action::Fetch {
                    file: env.file(*file_id)?.name.clone(),
                    key,
                    data,
                },
            );
        }
        add_check_predicate(env, program, iterator, base.predicate)?;
        Ok(iterator)
    }

    /// A column can wait for the final fetch when it is neither the row id,
    /// an order key, nor read by the search.
    pub(crate) fn is_delayable(
        &self,
        env: &Environment<'_>,
        instance: InstanceId,
        base: &CandidateBase,
        scalar: ScalarId,
    ) -> PlanResult<bool> {
        let column = match env.scalar(scalar)?.as_field() {
            Some(field) if field.instance == instance => field.column,
            _ => return Ok(false),
        };
        if self.row_id.is_none() || self.row_id == Some(scalar) {
            return Ok(false);
        }
        match self.fetch_file {
            Some(file) if env.file(file)?.stores(column) => {}
            _ => return Ok(false),
        }
        if let Some(order) = base.order {
            if env.order(order)?.contains(scalar) {
                return Ok(false);
            }
        }
        if let Some(chosen) = &self.predicate {
            let mut used = Vec::new();
            for searched in &chosen.searched {
                predicate::used_fields(env, *searched, &mut used)?;
            }
            if used.contains(&scalar) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn file_of(&self, scalar: ScalarId) -> Option<FileId> {
        self.columns
            .iter()
            .find(|column| column.scalar == scalar)
            .map(|column| column.file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{CandidateKind, TableCandidate};
    use shared::catalog::{Catalog, DataType, FileDef};
    use shared::config::PlannerConfig;

    fn create_test_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        let person = catalog.add_table(
            TableDef::new("person", 10000.0)
                .row_id("rowid")
                .column("name", DataType::Text)
                .column("age", DataType::Integer),
        );
        catalog.add_file(FileDef::record(
            "person_record",
            person,
            ColumnId(0),
            &[ColumnId(1), ColumnId(2)],
        ));
        catalog.add_file(
            FileDef::btree("person_age", person, &[ColumnId(2)])
                .distinct_count(100.0)
                .cost(2.0, 0.5),
        );
        catalog
    }

    fn retrieve_of(env: &Environment<'_>, id: CandidateId) -> Retrieve {
        match &env.candidate(id).unwrap().kind {
            CandidateKind::Table(TableCandidate {
                variant: TableVariant::Retrieve(retrieve),
                ..
            }) => retrieve.clone(),
            other => panic!("not a retrieve: {:?}", other),
        }
    }

    #[test]
    fn test_plain_read_scans_the_covering_file() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let person = env.add_instance("person", "p").unwrap();
        let source = PlanSource::new(&config);
        let id = create(&mut env, &source, person, &[ColumnId(1), ColumnId(2)]).unwrap();
        let retrieve = retrieve_of(&env, id);
        assert_eq!(retrieve.driving, Driving::Scan(FileId(0)));
        assert!(retrieve.fetched.is_empty());
    }

    #[test]
    fn test_selective_search_fetches_other_columns() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let person = env.add_instance("person", "p").unwrap();
        let age = env.field(person, "age").unwrap();
        let value = env.integer(30);
        let condition = env.equal(age, value);
        let mut source = PlanSource::new(&config);
        source.add_predicate(&mut env, condition).unwrap();

        let id = create(&mut env, &source, person, &[ColumnId(1), ColumnId(2)]).unwrap();
        let retrieve = retrieve_of(&env, id);
        assert_eq!(retrieve.driving, Driving::Search(FileId(1)));
        assert_eq!(retrieve.fetched, vec![FileId(0)]);
        assert!(env.candidate(id).unwrap().base.predicate.is_none());
    }

    #[test]
    fn test_search_lowers_to_scan_and_fetch() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let person = env.add_instance("person", "p").unwrap();
        let age = env.field(person, "age").unwrap();
        let value = env.integer(30);
        let condition = env.equal(age, value);
        let mut source = PlanSource::new(&config);
        source.add_predicate(&mut env, condition).unwrap();
        let id = create(&mut env, &source, person, &[ColumnId(1), ColumnId(2)]).unwrap();

        let mut program = Program::new();
        crate::candidate::adopt(&env, &mut program, id, &AdoptArgument::default()).unwrap();
        assert_eq!(program.count_actions("scan"), 1);
        assert_eq!(program.count_actions("fetch"), 1);
        assert_eq!(program.count_actions("unless"), 0);
    }
}
