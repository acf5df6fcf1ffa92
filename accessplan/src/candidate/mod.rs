/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Physical plan candidates
//!
//! A candidate is one physical realization of a logical relation subtree.
//! Relations create candidates while planning, compare their costs and erase
//! the losers; the winner is lowered into a [`Program`] by [`adopt`].
//!
//! ## Architecture
//!
//! - [`CandidateBase`]: what every candidate has (cost, row, order, residual
//!   predicate, limit)
//! - [`CandidateKind`]: closed set of kinds with their own payloads
//! - `table`: base table access, writes and distributed retrieval
//! - `join`: nested-loop, outer and exists joins
//! - `sort`, `grouping`, `distinct`, `limit`, `partitioning`: modifiers
//! - `union`, `filter`: selection helpers
//! - `cascade`: modifiers pushed to cascade servers as SQL
//!
//! Lowering functions only read the environment; everything they need was
//! registered while planning.

pub mod cascade;
pub mod distinct;
pub mod filter;
pub mod grouping;
pub mod join;
pub mod limit;
pub mod partitioning;
pub mod sort;
pub mod table;
pub mod union;

pub use cascade::{CascadeCandidate, CascadeKind, PartialAggregate};
pub use distinct::DistinctCandidate;
pub use filter::FilterCandidate;
pub use grouping::{GroupingCandidate, GroupingMode};
pub use join::{JoinCandidate, JoinKind};
pub use limit::LimitCandidate;
pub use partitioning::{PartitionMode, PartitioningCandidate};
pub use sort::SortCandidate;
pub use table::{PutKind, TableCandidate, TableVariant};
pub use union::UnionCandidate;

use crate::cost::Cost;
use crate::environment::{
    CandidateId, Environment, InstanceId, InstanceSet, OrderId, PredicateId, RowId, ScalarId,
};
use crate::error::{PlanError, PlanResult};
use crate::limit::Limit;
use crate::order::{self, Specification};
use crate::predicate;
use crate::row::{self, DelayArgument};
use crate::scalar::{self, Scalar};
use crate::sql::SqlQuery;
use log::debug;
use rustc_hash::FxHashSet;
use shared::catalog::Distribution;
use shared::config::TraceTopic;
use shared::program::{Action, CollectionKind, IteratorId, Program, Target};

/// State shared by every kind of candidate
#[derive(Debug, Clone, Default)]
pub struct CandidateBase {
    pub cost: Cost,
    /// Order the candidate delivers, owned by the candidate
    pub order: Option<OrderId>,
    pub row: Option<RowId>,
    pub key: Option<RowId>,
    /// Residual predicate the candidate checks itself
    pub predicate: Option<PredicateId>,
    /// Conjuncts left to an enclosing candidate
    pub unchecked: Vec<PredicateId>,
    pub limit: Limit,
    /// The limit is processed by a file, no explicit limit is needed
    pub is_limited: bool,
    /// Table instances whose values the candidate produces
    pub instances: Vec<InstanceId>,
    pub distribution: Distribution,
}

#[derive(Debug, Clone)]
pub enum CandidateKind {
    Table(TableCandidate),
    Join(JoinCandidate),
    Sort(SortCandidate),
    Grouping(GroupingCandidate),
    Distinct(DistinctCandidate),
    Limit(LimitCandidate),
    Partitioning(PartitioningCandidate),
    Union(UnionCandidate),
    Filter(FilterCandidate),
    Cascade(CascadeCandidate),
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub base: CandidateBase,
    pub kind: CandidateKind,
}

impl Candidate {
    pub fn new(base: CandidateBase, kind: CandidateKind) -> Self {
        Self { base, kind }
    }

    /// Short name used in traces and plan explanations
    pub fn name(&self) -> &'static str {
        match &self.kind {
            CandidateKind::Table(table) => table.name(),
            CandidateKind::Join(join) => join.name(),
            CandidateKind::Sort(sort) => sort.name(),
            CandidateKind::Grouping(_) => "grouping",
            CandidateKind::Distinct(_) => "distinct",
            CandidateKind::Limit(_) => "limit",
            CandidateKind::Partitioning(_) => "partitioning",
            CandidateKind::Union(_) => "union",
            CandidateKind::Filter(_) => "filter",
            CandidateKind::Cascade(cascade) => cascade.name(),
        }
    }

    pub fn operands(&self) -> Vec<CandidateId> {
        match &self.kind {
            CandidateKind::Table(table) => table.operands(),
            CandidateKind::Join(join) => join.operands.to_vec(),
            CandidateKind::Sort(sort) => vec![sort.operand],
            CandidateKind::Grouping(grouping) => vec![grouping.operand],
            CandidateKind::Distinct(distinct) => vec![distinct.operand],
            CandidateKind::Limit(limit) => vec![limit.operand],
            CandidateKind::Partitioning(partitioning) => vec![partitioning.operand],
            CandidateKind::Union(union) => union.operands.clone(),
            CandidateKind::Filter(filter) => vec![filter.operand],
            CandidateKind::Cascade(cascade) => vec![cascade.operand],
        }
    }

    pub fn cost(&self) -> &Cost {
        &self.base.cost
    }

    pub fn order(&self) -> Option<OrderId> {
        self.base.order
    }

    pub fn is_limited(&self) -> bool {
        self.base.is_limited
    }

    /// Rows come from cascade servers
    pub fn is_distributed(&self) -> bool {
        self.base.distribution != Distribution::Local
    }

    pub fn table(&self) -> Option<&TableCandidate> {
        match &self.kind {
            CandidateKind::Table(table) => Some(table),
            _ => None,
        }
    }
}

/// What lowering passes from a candidate to its operands
#[derive(Debug, Clone, Default)]
pub struct AdoptArgument {
    /// Iterator of the enclosing loop, whose values the operand may read
    pub outer: Option<IteratorId>,
    pub delay: Option<DelayArgument>,
    /// Statement prepared by a cascade modifier for the retrieval below it
    pub sql: Option<SqlQuery>,
}

impl AdoptArgument {
    pub fn is_deferred(&self, scalar: ScalarId) -> bool {
        self.delay
            .as_ref()
            .map_or(false, |delay| delay.is_deferred(scalar))
    }

    pub fn with_outer(&self, outer: IteratorId) -> Self {
        let mut argument = self.clone();
        argument.outer = Some(outer);
        argument
    }

    /// Argument for an operand that starts a new loop
    pub fn for_operand(&self) -> Self {
        let mut argument = self.clone();
        argument.sql = None;
        argument
    }
}

// ----- shared behaviour over the base -----

/// Scalars of a candidate's row; empty for candidates without one
pub fn row_scalars(env: &Environment<'_>, id: CandidateId) -> PlanResult<Vec<ScalarId>> {
    match env.candidate(id)?.base.row {
        Some(row) => Ok(env.row(row)?.iter().collect()),
        None => Ok(Vec::new()),
    }
}

pub fn key_scalars(env: &Environment<'_>, id: CandidateId) -> PlanResult<Vec<ScalarId>> {
    match env.candidate(id)?.base.key {
        Some(key) => Ok(env.row(key)?.iter().collect()),
        None => Ok(Vec::new()),
    }
}

/// Order delivered by a candidate
pub fn order_of<'e>(
    env: &'e Environment<'_>,
    id: CandidateId,
) -> PlanResult<Option<&'e Specification>> {
    match env.candidate(id)?.base.order {
        Some(order) => Ok(Some(env.order(order)?)),
        None => Ok(None),
    }
}

/// Whether the candidate's own order satisfies the required one
pub fn satisfies_order(
    env: &Environment<'_>,
    id: CandidateId,
    required: Option<OrderId>,
) -> PlanResult<bool> {
    let required = match required {
        Some(required) => env.order(required)?,
        None => return Ok(true),
    };
    Ok(order::is_satisfied_by(Some(required), order_of(env, id)?))
}

/// Registers a private copy of an order so that erasing the new owner never
/// touches the original
pub fn copy_order(
    env: &mut Environment<'_>,
    order: Option<OrderId>,
) -> PlanResult<Option<OrderId>> {
    match order {
        Some(order) => {
            let copy = env.order(order)?.clone();
            Ok(Some(env.add_order(copy)))
        }
        None => Ok(None),
    }
}

pub fn instance_set(env: &Environment<'_>, id: CandidateId) -> PlanResult<InstanceSet> {
    Ok(env.candidate(id)?.base.instances.iter().copied().collect())
}

/// Splits conjuncts into those evaluable with `available` bound and the rest
pub fn split_bound(
    env: &Environment<'_>,
    conjuncts: &[PredicateId],
    available: &InstanceSet,
) -> PlanResult<(Vec<PredicateId>, Vec<PredicateId>)> {
    let mut bound = Vec::new();
    let mut unbound = Vec::new();
    for conjunct in conjuncts {
        if bound.contains(conjunct) || unbound.contains(conjunct) {
            continue;
        }
        if predicate::is_bound_by(env, *conjunct, available)? {
            bound.push(*conjunct);
        } else {
            unbound.push(*conjunct);
        }
    }
    Ok((bound, unbound))
}

/// Whether the first candidate is strictly cheaper than the second
pub fn is_cheaper(
    env: &Environment<'_>,
    first: CandidateId,
    second: CandidateId,
) -> PlanResult<bool> {
    Ok(env.candidate(first)?.base.cost < env.candidate(second)?.base.cost)
}

/// Erases a losing candidate and everything below it that the winner does
/// not use
pub fn discard(
    env: &mut Environment<'_>,
    loser: CandidateId,
    winner: CandidateId,
) -> PlanResult<()> {
    if loser == winner {
        return Ok(());
    }
    let mut keep = FxHashSet::default();
    env.reachable(winner, &mut keep)?;
    env.erase_tree(loser, &keep)
}

/// Keeps the cheaper of two candidates and erases the other
pub fn keep_cheaper(
    env: &mut Environment<'_>,
    first: CandidateId,
    second: CandidateId,
) -> PlanResult<CandidateId> {
    let (winner, loser) = if is_cheaper(env, second, first)? {
        (second, first)
    } else {
        (first, second)
    };
    if env.traced(TraceTopic::Cost) {
        debug!(
            "keep {} {} over {} {}",
            env.candidate(winner)?.name(),
            env.candidate(winner)?.base.cost,
            env.candidate(loser)?.name(),
            env.candidate(loser)?.base.cost
        );
    }
    discard(env, loser, winner)?;
    Ok(winner)
}

/// Emits Unless/Continue/EndIf around a residual predicate
pub fn add_check_predicate(
    env: &Environment<'_>,
    program: &mut Program,
    iterator: IteratorId,
    predicate: Option<PredicateId>,
) -> PlanResult<()> {
    let predicate = match predicate {
        Some(predicate) => predicate,
        None => return Ok(()),
    };
    let mut used = Vec::new();
    predicate::used_fields(env, predicate, &mut used)?;
    for field in used {
        scalar::variable(env, program, iterator, field)?;
    }
    program.add_action(
        iterator,
        Target::Execution,
        Action::Unless {
            condition: predicate::label(env, predicate)?,
        },
    );
    program.add_action(iterator, Target::Execution, Action::Continue);
    program.add_action(iterator, Target::Execution, Action::EndIf);
    Ok(())
}

// ----- dispatch -----

/// Lowers a candidate into the program and returns its iterator
pub fn adopt(
    env: &Environment<'_>,
    program: &mut Program,
    id: CandidateId,
    argument: &AdoptArgument,
) -> PlanResult<IteratorId> {
    let candidate = env.candidate(id)?;
    if env.traced(TraceTopic::Adopt) {
        debug!("adopt {} {:?}", candidate.name(), id);
    }
    let base = &candidate.base;
    match &candidate.kind {
        CandidateKind::Table(table) => table.adopt(env, program, base, argument),
        CandidateKind::Join(join) => join.adopt(env, program, base, argument),
        CandidateKind::Sort(sort) => sort.adopt(env, program, base, argument),
        CandidateKind::Grouping(grouping) => grouping.adopt(env, program, base, argument),
        CandidateKind::Distinct(distinct) => distinct.adopt(env, program, base, argument),
        CandidateKind::Limit(limit) => limit.adopt(env, program, argument),
        CandidateKind::Partitioning(partitioning) => {
            partitioning.adopt(env, program, base, argument)
        }
        CandidateKind::Union(union) => union.adopt(env, program, base, argument),
        CandidateKind::Filter(filter) => filter.adopt(env, program, base, argument),
        CandidateKind::Cascade(cascade) => cascade.adopt(env, program, id, base, argument),
    }
}

/// Whether a column of the candidate's row can be read after the candidate
/// has produced its tuple, by fetching it through the row id.
pub fn is_delayable(
    env: &Environment<'_>,
    id: CandidateId,
    scalar: ScalarId,
    keys: &[ScalarId],
) -> PlanResult<bool> {
    if keys.contains(&scalar) {
        return Ok(false);
    }
    let candidate = env.candidate(id)?;
    let base = &candidate.base;
    if let Some(predicate) = base.predicate {
        let mut used = Vec::new();
        predicate::used_fields(env, predicate, &mut used)?;
        if used.contains(&scalar) {
            return Ok(false);
        }
    }
    match &candidate.kind {
        CandidateKind::Table(table) => table.is_delayable(env, base, scalar),
        CandidateKind::Join(join) => join.is_delayable(env, scalar, keys),
        CandidateKind::Sort(sort) => {
            let mut keys = keys.to_vec();
            if let Some(order) = order_of(env, id)? {
                keys.extend(order.key_scalars());
            }
            is_delayable(env, sort.operand, scalar, &keys)
        }
        CandidateKind::Limit(limit) => is_delayable(env, limit.operand, scalar, keys),
        CandidateKind::Filter(filter) => is_delayable(env, filter.operand, scalar, keys),
        CandidateKind::Partitioning(partitioning) => {
            let mut keys = keys.to_vec();
            if let Some(order) = order_of(env, id)? {
                keys.extend(order.key_scalars());
            }
            is_delayable(env, partitioning.operand, scalar, &keys)
        }
        // tuples are rebuilt or come from remote servers
        CandidateKind::Grouping(_)
        | CandidateKind::Distinct(_)
        | CandidateKind::Union(_)
        | CandidateKind::Cascade(_) => Ok(false),
    }
}

/// Statement a cascade server runs for a distributed candidate
pub fn generate_sql(env: &Environment<'_>, id: CandidateId) -> PlanResult<SqlQuery> {
    let candidate = env.candidate(id)?;
    match &candidate.kind {
        CandidateKind::Table(table) => table.generate_sql(env, &candidate.base),
        CandidateKind::Cascade(cascade) => cascade.generate_sql(env, &candidate.base),
        _ => Err(PlanError::not_supported(format!(
            "{} cannot be pushed to a cascade",
            candidate.name()
        ))),
    }
}

/// Lowers the root candidate and sends its rows to the client.
///
/// `output` lists the scalars the client receives; the candidate row is used
/// when it is empty. Columns the candidate could defer are fetched here, once
/// per produced tuple.
pub fn generate_top(
    env: &Environment<'_>,
    program: &mut Program,
    id: CandidateId,
    output: &[ScalarId],
) -> PlanResult<IteratorId> {
    let candidate = env.candidate(id)?;
    if !candidate.base.unchecked.is_empty() {
        return Err(PlanError::not_supported(format!(
            "predicate cannot be evaluated: {}",
            predicate::label_all(env, &candidate.base.unchecked)?
        )));
    }

    let mut delay = DelayArgument::default();
    if let Some(row) = candidate.base.row {
        row::delay(env, row, id, &mut delay)?;
    }
    let argument = AdoptArgument {
        delay: Some(delay.clone()),
        ..AdoptArgument::default()
    };
    let iterator = adopt(env, program, id, &argument)?;

    generate_delayed(env, program, iterator, &delay)?;
    if !matches!(
        candidate.table().map(|table| &table.variant),
        Some(TableVariant::Put(_))
    ) {
        generate_locks(env, program, iterator, &candidate.base.instances)?;
    }

    let output = if output.is_empty() {
        row_scalars(env, id)?
    } else {
        output.to_vec()
    };
    if output.is_empty() {
        return Ok(iterator);
    }
    for scalar_id in &output {
        if let Scalar::Function { .. } = env.scalar(*scalar_id)? {
            let label = scalar::label(env, *scalar_id)?;
            if program.node_variable(iterator, &label).is_none() {
                let mut used = Vec::new();
                scalar::used_fields(env, *scalar_id, &mut used)?;
                for field in used {
                    scalar::variable(env, program, iterator, field)?;
                }
                let result = scalar::variable(env, program, iterator, *scalar_id)?;
                program.add_action(
                    iterator,
                    Target::Execution,
                    Action::Calculate {
                        expression: label,
                        result,
                    },
                );
            }
        }
    }
    let client = program.add_collection(CollectionKind::Client, None);
    let data = scalar::array_variable(env, program, iterator, &output)?;
    program.add_action(
        iterator,
        Target::Execution,
        Action::Output {
            collection: client,
            data,
        },
    );
    Ok(iterator)
}

/// Fetches deferred columns by row id, one fetch per table instance
fn generate_delayed(
    env: &Environment<'_>,
    program: &mut Program,
    iterator: IteratorId,
    delay: &DelayArgument,
) -> PlanResult<()> {
    let mut instances: Vec<(InstanceId, Vec<ScalarId>)> = Vec::new();
    for scalar in &delay.deferred {
        let field = env
            .scalar(*scalar)?
            .as_field()
            .ok_or_else(|| PlanError::unexpected("only fields can be deferred"))?;
        match instances.iter_mut().find(|(instance, _)| *instance == field.instance) {
            Some((_, scalars)) => scalars.push(*scalar),
            None => instances.push((field.instance, vec![*scalar])),
        }
    }
    for (instance, scalars) in instances {
        let table = env.table(instance)?;
        let file = env.catalog().fetch_file(table.id).ok_or_else(|| {
            PlanError::unexpected(format!(
                "deferred columns of {} without a fetch file",
                table.name
            ))
        })?;
        let row_id = table
            .row_id
            .ok_or_else(|| PlanError::unexpected(format!("{} has no row id", table.name)))?;
        let key = scalar::variable(env, program, iterator, env.field_id(instance, row_id)?)?;
        let data = scalar::array_variable(env, program, iterator, &scalars)?;
        program.add_action(
            iterator,
            Target::Execution,
            Action::Fetch {
                file: file.name.clone(),
                key,
                data,
            },
        );
    }
    Ok(())
}

fn generate_locks(
    env: &Environment<'_>,
    program: &mut Program,
    iterator: IteratorId,
    instances: &[InstanceId],
) -> PlanResult<()> {
    let mut locked = Vec::new();
    for instance in instances {
        let table = env.table(*instance)?;
        if table.need_lock && !locked.contains(&table.id) {
            locked.push(table.id);
            program.add_action(
                iterator,
                Target::StartUp,
                Action::Lock {
                    table: table.name.clone(),
                    exclusive: false,
                },
            );
        }
    }
    Ok(())
}

/// Lowers an operand whose tuples go through a collection, and returns the
/// iterator reading them back.
///
/// The operand iterator writes `data` into the collection; the returned
/// iterator runs the operand at startup, then reads the collection.
pub(crate) fn materialize(
    program: &mut Program,
    operand: IteratorId,
    collection: shared::program::CollectionId,
    data: shared::program::DataId,
    startup: Vec<Action>,
) -> IteratorId {
    program.add_action(
        operand,
        Target::Execution,
        Action::Output { collection, data },
    );
    let iterator = program.add_iterator(shared::program::IteratorKind::Input);
    program.add_action(iterator, Target::StartUp, Action::Iterate { operand });
    for action in startup {
        program.add_action(iterator, Target::StartUp, action);
    }
    program.add_action(iterator, Target::Execution, Action::Input { collection, data });
    program.copy_node_variables(operand, iterator);
    iterator
}
