/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! One planning pass.
//!
//! The [`Environment`] owns every object created while planning a query and
//! carries the read-only context: the catalog, the configuration and the
//! trace topics. Objects are referred to by generation-checked ids, so erasing
//! a losing candidate can never leave a dangling reference behind.

use crate::arena::{Id, Registry};
use crate::candidate::Candidate;
use crate::cost::CostEstimator;
use crate::error::{PlanError, PlanResult};
use crate::order::Specification;
use crate::predicate::Predicate;
use crate::relation::Relation;
use crate::row::Row;
use crate::scalar::{Field, Scalar};
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use shared::catalog::{Catalog, ColumnId, FileDef, FileId, TableDef, TableId};
use shared::config::{PlannerConfig, TraceTopic};
use std::cell::Cell;

pub type ScalarId = Id<Scalar>;
pub type PredicateId = Id<Predicate>;
pub type OrderId = Id<Specification>;
pub type RowId = Id<Row>;
pub type CandidateId = Id<Candidate>;
pub type RelationId = Id<Relation>;

/// One occurrence of a table in a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InstanceId(pub u32);

#[derive(Debug, Clone)]
pub struct TableInstance {
    pub id: InstanceId,
    pub table: TableId,
    pub alias: String,
}

pub type InstanceSet = FxHashSet<InstanceId>;

pub struct Environment<'a> {
    catalog: &'a Catalog,
    config: &'a PlannerConfig,
    pub(crate) scalars: Registry<Scalar>,
    pub(crate) predicates: Registry<Predicate>,
    pub(crate) orders: Registry<Specification>,
    pub(crate) rows: Registry<Row>,
    pub(crate) candidates: Registry<Candidate>,
    pub(crate) relations: Registry<Relation>,
    instances: Vec<TableInstance>,
    fields: FxHashMap<(InstanceId, ColumnId), ScalarId>,
    required: FxHashMap<InstanceId, Vec<ColumnId>>,
    created: Vec<CandidateId>,
    round_robin: Cell<usize>,
}

impl<'a> Environment<'a> {
    pub fn new(catalog: &'a Catalog, config: &'a PlannerConfig) -> Self {
        Self {
            catalog,
            config,
            scalars: Registry::new("scalar"),
            predicates: Registry::new("predicate"),
            orders: Registry::new("order specification"),
            rows: Registry::new("row"),
            candidates: Registry::new("candidate"),
            relations: Registry::new("relation"),
            instances: Vec::new(),
            fields: FxHashMap::default(),
            required: FxHashMap::default(),
            created: Vec::new(),
            round_robin: Cell::new(0),
        }
    }

    pub fn catalog(&self) -> &'a Catalog {
        self.catalog
    }

    pub fn config(&self) -> &'a PlannerConfig {
        self.config
    }

    pub fn estimator(&self) -> CostEstimator<'a> {
        CostEstimator::new(self.config)
    }

    /// Whether decisions about the topic are logged
    pub fn traced(&self, topic: TraceTopic) -> bool {
        self.config.is_traced(topic) && log::log_enabled!(log::Level::Debug)
    }

    // ----- catalog -----

    pub fn add_instance(&mut self, table: &str, alias: &str) -> PlanResult<InstanceId> {
        let table = self
            .catalog
            .table_by_name(table)
            .ok_or_else(|| PlanError::not_supported(format!("unknown table {}", table)))?;
        let id = InstanceId(self.instances.len() as u32);
        self.instances.push(TableInstance {
            id,
            table: table.id,
            alias: alias.to_string(),
        });
        Ok(id)
    }

    pub fn instance(&self, id: InstanceId) -> PlanResult<&TableInstance> {
        self.instances
            .get(id.0 as usize)
            .ok_or_else(|| PlanError::unexpected(format!("unknown table instance {}", id.0)))
    }

    pub fn table(&self, id: InstanceId) -> PlanResult<&'a TableDef> {
        let table = self.instance(id)?.table;
        self.catalog.table(table).ok_or_else(|| {
            PlanError::unexpected(format!("table {} is not in the catalog", table.0))
        })
    }

    pub fn file(&self, id: FileId) -> PlanResult<&'a FileDef> {
        self.catalog
            .file(id)
            .ok_or_else(|| PlanError::unexpected(format!("file {} is not in the catalog", id.0)))
    }

    // ----- scalars -----

    /// Field of a table instance; the same column always yields the same id
    pub fn field(&mut self, instance: InstanceId, column: &str) -> PlanResult<ScalarId> {
        let table = self.table(instance)?;
        let column = table.column_id(column).ok_or_else(|| {
            PlanError::not_supported(format!("unknown column {}.{}", table.name, column))
        })?;
        self.field_by_id(instance, column)
    }

    pub fn field_by_id(&mut self, instance: InstanceId, column: ColumnId) -> PlanResult<ScalarId> {
        if let Some(id) = self.fields.get(&(instance, column)) {
            return Ok(*id);
        }
        let table = self.table(instance)?;
        let definition = table.column_def(column).ok_or_else(|| {
            PlanError::unexpected(format!("column {} of {}", column.0, table.name))
        })?;
        let alias = self.instance(instance)?.alias.clone();
        let id = self.scalars.register(Scalar::Field(Field {
            instance,
            column,
            name: format!("{}.{}", alias, definition.name),
            column_name: definition.name.clone(),
            data_type: definition.data_type,
            size: definition.size,
            nullable: definition.nullable,
        }));
        self.fields.insert((instance, column), id);
        Ok(id)
    }

    /// Field created earlier; lowering never creates scalars
    pub fn field_id(&self, instance: InstanceId, column: ColumnId) -> PlanResult<ScalarId> {
        self.fields.get(&(instance, column)).copied().ok_or_else(|| {
            PlanError::unexpected(format!(
                "column {} of instance {} was never planned",
                column.0, instance.0
            ))
        })
    }

    pub fn scalar(&self, id: ScalarId) -> PlanResult<&Scalar> {
        self.scalars.get(id)
    }

    pub fn add_scalar(&mut self, scalar: Scalar) -> ScalarId {
        self.scalars.register(scalar)
    }

    // ----- predicates and orders -----

    pub fn predicate(&self, id: PredicateId) -> PlanResult<&Predicate> {
        self.predicates.get(id)
    }

    pub fn add_predicate(&mut self, predicate: Predicate) -> PredicateId {
        self.predicates.register(predicate)
    }

    pub fn order(&self, id: OrderId) -> PlanResult<&Specification> {
        self.orders.get(id)
    }

    pub fn add_order(&mut self, specification: Specification) -> OrderId {
        self.orders.register(specification)
    }

    // ----- rows -----

    pub fn row(&self, id: RowId) -> PlanResult<&Row> {
        self.rows.get(id)
    }

    pub fn add_row(&mut self, row: Row) -> RowId {
        self.rows.register(row)
    }

    // ----- candidates -----

    pub fn candidate(&self, id: CandidateId) -> PlanResult<&Candidate> {
        self.candidates.get(id)
    }

    pub fn candidate_mut(&mut self, id: CandidateId) -> PlanResult<&mut Candidate> {
        self.candidates.get_mut(id)
    }

    pub fn register_candidate(&mut self, candidate: Candidate) -> CandidateId {
        let id = self.candidates.register(candidate);
        self.created.push(id);
        id
    }

    pub fn contains_candidate(&self, id: CandidateId) -> bool {
        self.candidates.contains(id)
    }

    /// Live candidates
    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    /// Erases one candidate together with the rows and order it owns.
    /// Operands are left alone.
    pub fn erase_candidate(&mut self, id: CandidateId) -> PlanResult<()> {
        let candidate = self.candidates.erase(id)?;
        for row in [candidate.base.row, candidate.base.key].into_iter().flatten() {
            if self.rows.contains(row) {
                self.rows.erase(row)?;
            }
        }
        if let Some(order) = candidate.base.order {
            if self.orders.contains(order) {
                self.orders.erase(order)?;
            }
        }
        Ok(())
    }

    /// Erases a candidate and every operand below it, except those in `keep`
    pub fn erase_tree(&mut self, id: CandidateId, keep: &FxHashSet<CandidateId>) -> PlanResult<()> {
        if keep.contains(&id) || !self.candidates.contains(id) {
            return Ok(());
        }
        let operands = self.candidate(id)?.operands();
        self.erase_candidate(id)?;
        for operand in operands {
            self.erase_tree(operand, keep)?;
        }
        Ok(())
    }

    /// Collects a candidate and everything below it
    pub fn reachable(&self, id: CandidateId, into: &mut FxHashSet<CandidateId>) -> PlanResult<()> {
        if !into.insert(id) {
            return Ok(());
        }
        for operand in self.candidate(id)?.operands() {
            self.reachable(operand, into)?;
        }
        Ok(())
    }

    /// Starts recording the candidates registered from now on
    pub fn scope(&self) -> Scope {
        Scope {
            mark: self.created.len(),
        }
    }

    // ----- relations -----

    pub fn relation(&self, id: RelationId) -> PlanResult<&Relation> {
        self.relations.get(id)
    }

    pub fn add_relation(&mut self, relation: Relation) -> RelationId {
        self.relations.register(relation)
    }

    // ----- required columns -----

    /// Marks a column as needed by some part of the query
    pub fn require_column(&mut self, instance: InstanceId, column: ColumnId) {
        let columns = self.required.entry(instance).or_default();
        if !columns.contains(&column) {
            columns.push(column);
        }
    }

    pub fn required_columns(&self, instance: InstanceId) -> Vec<ColumnId> {
        let mut columns = self.required.get(&instance).cloned().unwrap_or_default();
        columns.sort();
        columns
    }

    // ----- distribution -----

    /// Next cascade for a tuple of a distributed table, rotating over `count`
    /// servers
    pub fn next_cascade(&self, count: usize) -> usize {
        let next = self.round_robin.get();
        self.round_robin.set(next.wrapping_add(1));
        if count == 0 {
            0
        } else {
            next % count
        }
    }
}

/// Candidates registered since a point of the planning pass.
///
/// A partially built alternative that fails is released as a whole, so no
/// orphan stays in the arena.
#[derive(Debug, Clone, Copy)]
pub struct Scope {
    mark: usize,
}

impl Scope {
    /// Live candidates registered since the scope was opened
    pub fn created(&self, env: &Environment<'_>) -> Vec<CandidateId> {
        env.created
            .get(self.mark..)
            .unwrap_or(&[])
            .iter()
            .copied()
            .filter(|id| env.candidates.contains(*id))
            .collect()
    }

    pub fn release(self, env: &mut Environment<'_>) {
        let created = self.created(env);
        let count = created.len();
        for id in created.into_iter().rev() {
            // already checked to be live
            let _ = env.erase_candidate(id);
        }
        if count > 0 {
            debug!("released {} candidates", count);
        }
        env.created.truncate(self.mark);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{Candidate, CandidateBase, CandidateKind, UnionCandidate};
    use shared::catalog::{ColumnId, DataType, FileDef, TableDef};

    fn create_test_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        let table = catalog.add_table(
            TableDef::new("item", 10.0)
                .row_id("rowid")
                .column("name", DataType::Text),
        );
        catalog.add_file(FileDef::record("item_record", table, ColumnId(0), &[ColumnId(1)]));
        catalog
    }

    fn create_test_candidate() -> Candidate {
        Candidate::new(
            CandidateBase::default(),
            CandidateKind::Union(UnionCandidate::default()),
        )
    }

    #[test]
    fn test_fields_are_shared() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let item = env.add_instance("item", "i").unwrap();
        let first = env.field(item, "name").unwrap();
        let second = env.field(item, "name").unwrap();
        assert_eq!(first, second);
        assert!(env.field(item, "missing").is_err());
    }

    #[test]
    fn test_unknown_table_is_not_supported() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        assert!(env.add_instance("nope", "n").unwrap_err().is_not_supported());
    }

    #[test]
    fn test_scope_release_erases_new_candidates_only() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let kept = env.register_candidate(create_test_candidate());
        let scope = env.scope();
        let dropped = env.register_candidate(create_test_candidate());
        assert_eq!(scope.created(&env), vec![dropped]);
        scope.release(&mut env);
        assert!(env.contains_candidate(kept));
        assert!(!env.contains_candidate(dropped));
        assert!(env.candidate(dropped).is_err());
    }

    #[test]
    fn test_round_robin_rotates() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let env = Environment::new(&catalog, &config);
        let picks: Vec<_> = (0..4).map(|_| env.next_cascade(3)).collect();
        assert_eq!(picks, vec![0, 1, 2, 0]);
    }
}
