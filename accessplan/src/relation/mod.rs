/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Logical relation tree
//!
//! Relations describe what a query computes; [`create_access_plan`] turns a
//! relation into the cheapest candidate it can find under a [`PlanSource`].
//! Each node asks its operands for candidates, compares alternatives and
//! hands one candidate id back to its caller.
//!
//! - `table`: base table access
//! - `selection`: WHERE, with the OR-to-union retry
//! - `join`: pairwise, n-way, exists and outer join search
//! - `modifier`: sort, grouping, distinct, limit, partitioning, projection
//! - `put`: insert, delete, update, import and undo

pub mod join;
pub mod modifier;
pub mod put;
pub mod selection;
pub mod table;

use crate::candidate::PutKind;
use crate::environment::{
    CandidateId, Environment, InstanceId, InstanceSet, PredicateId, RelationId, ScalarId,
};
use crate::error::PlanResult;
use crate::limit::Limit;
use crate::order::OrderKey;
use crate::predicate;
use crate::scalar;
use crate::source::PlanSource;
use log::trace;
use shared::catalog::ColumnId;
use std::ops::BitOr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    /// Semi-join: the left tuples with a match on the right
    Exists,
    /// Anti-join: the left tuples without a match on the right
    NotExists,
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub operand: RelationId,
    pub condition: PredicateId,
}

#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinType,
    pub operands: Vec<RelationId>,
    pub predicate: Option<PredicateId>,
}

#[derive(Debug, Clone)]
pub struct Sort {
    pub operand: RelationId,
    pub keys: Vec<OrderKey>,
}

#[derive(Debug, Clone)]
pub struct Grouping {
    pub operand: RelationId,
    pub keys: Vec<ScalarId>,
    pub aggregations: Vec<ScalarId>,
    pub having: Option<PredicateId>,
}

#[derive(Debug, Clone)]
pub struct Distinct {
    pub operand: RelationId,
    pub keys: Vec<ScalarId>,
}

#[derive(Debug, Clone)]
pub struct LimitNode {
    pub operand: RelationId,
    pub limit: Limit,
}

/// `limit` tuples of every partition, in `order` within a partition
#[derive(Debug, Clone)]
pub struct Partitioning {
    pub operand: RelationId,
    pub partition_keys: Vec<ScalarId>,
    pub order: Vec<OrderKey>,
    pub limit: Limit,
}

#[derive(Debug, Clone)]
pub struct Projection {
    pub operand: RelationId,
    pub output: Vec<ScalarId>,
}

#[derive(Debug, Clone)]
pub struct PutNode {
    pub kind: PutKind,
    pub instance: InstanceId,
    /// Relation supplying the tuples; deletes and updates read the target
    pub operand: RelationId,
    pub values: Vec<(ColumnId, ScalarId)>,
}

#[derive(Debug, Clone)]
pub enum Relation {
    Table(InstanceId),
    Selection(Selection),
    Join(Join),
    Sort(Sort),
    Grouping(Grouping),
    Distinct(Distinct),
    Limit(LimitNode),
    Partitioning(Partitioning),
    Projection(Projection),
    Put(PutNode),
}

impl Relation {
    pub fn name(&self) -> &'static str {
        match self {
            Relation::Table(_) => "table",
            Relation::Selection(_) => "selection",
            Relation::Join(_) => "join",
            Relation::Sort(_) => "sort",
            Relation::Grouping(_) => "grouping",
            Relation::Distinct(_) => "distinct",
            Relation::Limit(_) => "limit",
            Relation::Partitioning(_) => "partitioning",
            Relation::Projection(_) => "projection",
            Relation::Put(_) => "put",
        }
    }

    pub fn operands(&self) -> Vec<RelationId> {
        match self {
            Relation::Table(_) => Vec::new(),
            Relation::Selection(selection) => vec![selection.operand],
            Relation::Join(join) => join.operands.clone(),
            Relation::Sort(sort) => vec![sort.operand],
            Relation::Grouping(grouping) => vec![grouping.operand],
            Relation::Distinct(distinct) => vec![distinct.operand],
            Relation::Limit(limit) => vec![limit.operand],
            Relation::Partitioning(partitioning) => vec![partitioning.operand],
            Relation::Projection(projection) => vec![projection.operand],
            Relation::Put(put) => vec![put.operand],
        }
    }
}

impl<'a> Environment<'a> {
    pub fn table_relation(&mut self, instance: InstanceId) -> RelationId {
        self.add_relation(Relation::Table(instance))
    }

    pub fn selection(&mut self, operand: RelationId, condition: PredicateId) -> RelationId {
        self.add_relation(Relation::Selection(Selection { operand, condition }))
    }

    pub fn join(
        &mut self,
        kind: JoinType,
        operands: Vec<RelationId>,
        predicate: Option<PredicateId>,
    ) -> RelationId {
        self.add_relation(Relation::Join(Join {
            kind,
            operands,
            predicate,
        }))
    }

    pub fn sort(&mut self, operand: RelationId, keys: Vec<OrderKey>) -> RelationId {
        self.add_relation(Relation::Sort(Sort { operand, keys }))
    }

    pub fn grouping(
        &mut self,
        operand: RelationId,
        keys: Vec<ScalarId>,
        aggregations: Vec<ScalarId>,
        having: Option<PredicateId>,
    ) -> RelationId {
        self.add_relation(Relation::Grouping(Grouping {
            operand,
            keys,
            aggregations,
            having,
        }))
    }

    pub fn distinct(&mut self, operand: RelationId, keys: Vec<ScalarId>) -> RelationId {
        self.add_relation(Relation::Distinct(Distinct { operand, keys }))
    }

    pub fn limit(&mut self, operand: RelationId, limit: Limit) -> RelationId {
        self.add_relation(Relation::Limit(LimitNode { operand, limit }))
    }

    pub fn partitioning(
        &mut self,
        operand: RelationId,
        partition_keys: Vec<ScalarId>,
        order: Vec<OrderKey>,
        limit: Limit,
    ) -> RelationId {
        self.add_relation(Relation::Partitioning(Partitioning {
            operand,
            partition_keys,
            order,
            limit,
        }))
    }

    pub fn projection(&mut self, operand: RelationId, output: Vec<ScalarId>) -> RelationId {
        self.add_relation(Relation::Projection(Projection { operand, output }))
    }

    pub fn put(
        &mut self,
        kind: PutKind,
        instance: InstanceId,
        operand: RelationId,
        values: Vec<(ColumnId, ScalarId)>,
    ) -> RelationId {
        self.add_relation(Relation::Put(PutNode {
            kind,
            instance,
            operand,
            values,
        }))
    }
}

/// Plans a relation under `source` and returns the chosen candidate
pub fn create_access_plan(
    env: &mut Environment<'_>,
    id: RelationId,
    source: &PlanSource,
) -> PlanResult<CandidateId> {
    let relation = env.relation(id)?.clone();
    trace!("plan {} {:?}", relation.name(), id);
    match relation {
        Relation::Table(instance) => table::create_access_plan(env, source, instance),
        Relation::Selection(selection) => selection::create_access_plan(env, source, &selection),
        Relation::Join(join) => join::create_access_plan(env, source, &join),
        Relation::Sort(sort) => modifier::sort(env, source, &sort),
        Relation::Grouping(grouping) => modifier::grouping(env, source, &grouping),
        Relation::Distinct(distinct) => modifier::distinct(env, source, &distinct),
        Relation::Limit(limit) => modifier::limit(env, source, &limit),
        Relation::Partitioning(partitioning) => modifier::partitioning(env, source, &partitioning),
        Relation::Projection(projection) => modifier::projection(env, source, &projection),
        Relation::Put(put) => put::create_access_plan(env, source, &put),
    }
}

/// Answers to [`inquiry`], as a bit set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Inquiry(u8);

impl Inquiry {
    pub const NONE: Inquiry = Inquiry(0);
    /// The relation reads values of the given instances without producing them
    pub const DEPENDING: Inquiry = Inquiry(1);
    /// The relation produces some of the given instances
    pub const REFER_TABLE: Inquiry = Inquiry(1 << 1);
    /// No two output tuples are equal
    pub const DISTINCT: Inquiry = Inquiry(1 << 2);

    pub fn contains(&self, other: Inquiry) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Inquiry {
    type Output = Inquiry;

    fn bitor(self, rhs: Inquiry) -> Inquiry {
        Inquiry(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InquiryArgument<'s> {
    /// Questions to answer
    pub target: Inquiry,
    pub instances: &'s InstanceSet,
}

/// Answers the questions in `argument.target` about a relation
pub fn inquiry(
    env: &Environment<'_>,
    id: RelationId,
    argument: &InquiryArgument<'_>,
) -> PlanResult<Inquiry> {
    let mut result = Inquiry::NONE;
    let mut produced = InstanceSet::default();
    used_tables(env, id, &mut produced)?;
    if argument.target.contains(Inquiry::REFER_TABLE) && !produced.is_disjoint(argument.instances) {
        result = result | Inquiry::REFER_TABLE;
    }
    if argument.target.contains(Inquiry::DEPENDING) {
        let mut read = InstanceSet::default();
        referenced_instances(env, id, &mut read)?;
        if read
            .iter()
            .any(|instance| argument.instances.contains(instance) && !produced.contains(instance))
        {
            result = result | Inquiry::DEPENDING;
        }
    }
    if argument.target.contains(Inquiry::DISTINCT) && is_distinct(env, id)? {
        result = result | Inquiry::DISTINCT;
    }
    Ok(result)
}

/// Whether `id` needs values of the instances produced by `other`
pub fn depends_on(env: &Environment<'_>, id: RelationId, other: RelationId) -> PlanResult<bool> {
    let mut instances = InstanceSet::default();
    used_tables(env, other, &mut instances)?;
    let answer = inquiry(
        env,
        id,
        &InquiryArgument {
            target: Inquiry::DEPENDING,
            instances: &instances,
        },
    )?;
    Ok(answer.contains(Inquiry::DEPENDING))
}

fn is_distinct(env: &Environment<'_>, id: RelationId) -> PlanResult<bool> {
    Ok(match env.relation(id)? {
        Relation::Distinct(_) | Relation::Grouping(_) => true,
        Relation::Table(instance) => env.table(*instance)?.row_id.is_some(),
        Relation::Selection(Selection { operand, .. })
        | Relation::Sort(Sort { operand, .. })
        | Relation::Limit(LimitNode { operand, .. }) => is_distinct(env, *operand)?,
        _ => false,
    })
}

/// Instances whose tuples the relation produces
pub fn used_tables(
    env: &Environment<'_>,
    id: RelationId,
    into: &mut InstanceSet,
) -> PlanResult<()> {
    match env.relation(id)? {
        Relation::Table(instance) => {
            into.insert(*instance);
        }
        Relation::Put(put) => {
            into.insert(put.instance);
            used_tables(env, put.operand, into)?;
        }
        Relation::Join(Join {
            kind: JoinType::Exists | JoinType::NotExists,
            operands,
            ..
        }) => {
            // the subquery side only filters
            if let Some(first) = operands.first() {
                used_tables(env, *first, into)?;
            }
        }
        relation => {
            for operand in relation.operands() {
                used_tables(env, operand, into)?;
            }
        }
    }
    Ok(())
}

/// Instances any expression of the subtree reads
fn referenced_instances(
    env: &Environment<'_>,
    id: RelationId,
    into: &mut InstanceSet,
) -> PlanResult<()> {
    let relation = env.relation(id)?;
    let mut predicates: Vec<PredicateId> = Vec::new();
    let mut scalars: Vec<ScalarId> = Vec::new();
    match relation {
        Relation::Table(_) => {}
        Relation::Selection(selection) => predicates.push(selection.condition),
        Relation::Join(join) => predicates.extend(join.predicate),
        Relation::Sort(sort) => scalars.extend(sort.keys.iter().map(|key| key.scalar)),
        Relation::Grouping(grouping) => {
            scalars.extend(grouping.keys.iter().copied());
            scalars.extend(grouping.aggregations.iter().copied());
            predicates.extend(grouping.having);
        }
        Relation::Distinct(distinct) => scalars.extend(distinct.keys.iter().copied()),
        Relation::Limit(_) => {}
        Relation::Partitioning(partitioning) => {
            scalars.extend(partitioning.partition_keys.iter().copied());
            scalars.extend(partitioning.order.iter().map(|key| key.scalar));
        }
        Relation::Projection(projection) => scalars.extend(projection.output.iter().copied()),
        Relation::Put(put) => scalars.extend(put.values.iter().map(|(_, value)| *value)),
    }
    for predicate in predicates {
        predicate::used_instances(env, predicate, into)?;
    }
    for scalar in scalars {
        scalar::used_instances(env, scalar, into)?;
    }
    for operand in relation.operands() {
        referenced_instances(env, operand, into)?;
    }
    Ok(())
}

/// Marks every column the relation reads or outputs as required, so table
/// candidates retrieve them.
///
/// Without a projection the whole tuple of every table is output.
pub fn require(env: &mut Environment<'_>, id: RelationId) -> PlanResult<()> {
    let relation = env.relation(id)?.clone();
    match &relation {
        Relation::Table(_) => {}
        Relation::Selection(selection) => predicate::require(env, selection.condition)?,
        Relation::Join(join) => {
            if let Some(predicate) = join.predicate {
                predicate::require(env, predicate)?;
            }
        }
        Relation::Sort(sort) => {
            for key in &sort.keys {
                scalar::require(env, key.scalar)?;
            }
        }
        Relation::Grouping(grouping) => {
            for scalar in grouping.keys.iter().chain(grouping.aggregations.iter()) {
                scalar::require(env, *scalar)?;
            }
            if let Some(having) = grouping.having {
                predicate::require(env, having)?;
            }
        }
        Relation::Distinct(distinct) => {
            for key in &distinct.keys {
                scalar::require(env, *key)?;
            }
        }
        Relation::Limit(_) => {}
        Relation::Partitioning(partitioning) => {
            for scalar in partitioning
                .partition_keys
                .iter()
                .chain(partitioning.order.iter().map(|key| &key.scalar))
            {
                scalar::require(env, *scalar)?;
            }
        }
        Relation::Projection(projection) => {
            for scalar in &projection.output {
                scalar::require(env, *scalar)?;
            }
        }
        Relation::Put(put) => put::require(env, put)?,
    }
    for operand in relation.operands() {
        require(env, operand)?;
    }
    Ok(())
}

/// Requires every column of the tables a relation produces
pub fn require_all(env: &mut Environment<'_>, id: RelationId) -> PlanResult<()> {
    let mut instances = InstanceSet::default();
    used_tables(env, id, &mut instances)?;
    let mut instances: Vec<InstanceId> = instances.into_iter().collect();
    instances.sort();
    for instance in instances {
        let columns: Vec<ColumnId> = env
            .table(instance)?
            .columns
            .iter()
            .map(|column| column.id)
            .collect();
        for column in columns {
            env.require_column(instance, column);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::catalog::{Catalog, DataType, TableDef};
    use shared::config::PlannerConfig;

    fn create_test_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.add_table(
            TableDef::new("author", 100.0)
                .row_id("rowid")
                .column("name", DataType::Text),
        );
        catalog.add_table(
            TableDef::new("book", 1000.0)
                .column("author", DataType::Integer)
                .column("title", DataType::Text),
        );
        catalog
    }

    #[test]
    fn test_dependency_through_correlated_selection() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let author = env.add_instance("author", "a").unwrap();
        let book = env.add_instance("book", "b").unwrap();
        let author_id = env.field(author, "rowid").unwrap();
        let book_author = env.field(book, "author").unwrap();
        let authors = env.table_relation(author);
        let books = env.table_relation(book);
        let correlated = env.equal(book_author, author_id);
        let filtered = env.selection(books, correlated);

        assert!(depends_on(&env, filtered, authors).unwrap());
        assert!(!depends_on(&env, authors, filtered).unwrap());
        assert!(!depends_on(&env, books, authors).unwrap());
    }

    #[test]
    fn test_inquiry_flags() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let author = env.add_instance("author", "a").unwrap();
        let book = env.add_instance("book", "b").unwrap();
        let authors = env.table_relation(author);
        let books = env.table_relation(book);

        let mut instances = InstanceSet::default();
        instances.insert(author);
        let argument = InquiryArgument {
            target: Inquiry::REFER_TABLE | Inquiry::DISTINCT,
            instances: &instances,
        };
        let answer = inquiry(&env, authors, &argument).unwrap();
        assert!(answer.contains(Inquiry::REFER_TABLE));
        assert!(answer.contains(Inquiry::DISTINCT));
        assert!(inquiry(&env, books, &argument).unwrap().is_empty());
    }

    #[test]
    fn test_require_all_marks_every_column() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let book = env.add_instance("book", "b").unwrap();
        let books = env.table_relation(book);
        require_all(&mut env, books).unwrap();
        assert_eq!(env.required_columns(book).len(), 2);
    }
}
