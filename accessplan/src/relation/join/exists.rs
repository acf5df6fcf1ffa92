/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Semi-joins and anti-joins.
//!
//! The subquery side is probed once per outer tuple and stops at its first
//! match. A semi-join may also run the other way round: the subquery side is
//! read first, the outer side is joined to it and the duplicates an outer
//! tuple gets from several matches are removed on its key.

use super::{inner_source, join_conjuncts, standalone_source};
use crate::candidate::{self, distinct, JoinKind};
use crate::cost::CostValue;
use crate::environment::{CandidateId, Environment, PredicateId, RelationId};
use crate::error::PlanResult;
use crate::relation::{self, JoinType};
use crate::source::PlanSource;
use log::debug;
use shared::config::TraceTopic;

pub fn create_access_plan(
    env: &mut Environment<'_>,
    source: &PlanSource,
    kind: JoinType,
    outer: RelationId,
    inner: RelationId,
    join_predicate: Option<PredicateId>,
) -> PlanResult<CandidateId> {
    if kind == JoinType::Exists && source.is_exists() {
        // an enclosing probe stops at the first tuple anyway
        let mut probe = source.for_operand();
        probe.set_estimate_limit(CostValue::ONE);
        return super::dyadic::create_access_plan(env, &probe, outer, inner, join_predicate);
    }

    let mut search = source.for_operand();
    let conjuncts = join_conjuncts(env, source, join_predicate)?;
    let exhausted = search.check_join_max_candidates();
    let fixed =
        kind == JoinType::NotExists || exhausted || relation::depends_on(env, inner, outer)?;

    let outer_source = standalone_source(env, &search, &conjuncts, outer)?;
    let outer_candidate = relation::create_access_plan(env, outer, &outer_source)?;
    let mut probe_source = inner_source(env, &search, &conjuncts, outer_candidate)?;
    probe_source.set_exists(true);
    probe_source.set_estimate_limit(CostValue::ONE);
    let probe = relation::create_access_plan(env, inner, &probe_source)?;
    let join_kind = if kind == JoinType::Exists {
        JoinKind::Exists
    } else {
        JoinKind::NotExists
    };
    let exists = candidate::join::create_nested(
        env,
        &search,
        join_kind,
        outer_candidate,
        probe,
        join_predicate,
    )?;
    if fixed {
        return Ok(exists);
    }

    let reversed = match create_reversed(env, &search, &conjuncts, outer, inner, join_predicate)? {
        Some(reversed) => reversed,
        None => return Ok(exists),
    };
    if env.traced(TraceTopic::Join) {
        debug!(
            "exists {} against join and distinct {}",
            env.candidate(exists)?.base.cost,
            env.candidate(reversed)?.base.cost
        );
    }
    candidate::keep_cheaper(env, exists, reversed)
}

/// The subquery side first, then the outer side, deduplicated on the outer
/// side's key. `None` when the outer side has no key or this order cannot be
/// planned.
fn create_reversed(
    env: &mut Environment<'_>,
    source: &PlanSource,
    conjuncts: &[PredicateId],
    outer: RelationId,
    inner: RelationId,
    join_predicate: Option<PredicateId>,
) -> PlanResult<Option<CandidateId>> {
    let scope = env.scope();
    match build_reversed(env, source, conjuncts, outer, inner, join_predicate) {
        Ok(Some(reversed)) => Ok(Some(reversed)),
        Ok(None) => {
            scope.release(env);
            Ok(None)
        }
        Err(error) if error.is_not_supported() => {
            debug!("reversed semi-join failed: {}", error);
            scope.release(env);
            Ok(None)
        }
        Err(error) => Err(error),
    }
}

fn build_reversed(
    env: &mut Environment<'_>,
    source: &PlanSource,
    conjuncts: &[PredicateId],
    outer: RelationId,
    inner: RelationId,
    join_predicate: Option<PredicateId>,
) -> PlanResult<Option<CandidateId>> {
    let mut first_source = standalone_source(env, source, conjuncts, inner)?;
    first_source.erase_order();
    let first = relation::create_access_plan(env, inner, &first_source)?;

    let mut second_source = inner_source(env, source, conjuncts, first)?;
    let estimate = source.get_estimate_limit();
    if !estimate.is_infinity() {
        // several subquery tuples lead to the same outer tuple
        let first_count = env.candidate(first)?.base.cost.tuple_count();
        second_source.set_estimate_limit(estimate * first_count.max(CostValue::ONE));
    }
    let second = relation::create_access_plan(env, outer, &second_source)?;
    let keys = candidate::key_scalars(env, second)?;
    if keys.is_empty() {
        return Ok(None);
    }
    let joined = candidate::join::create_nested(
        env,
        source,
        JoinKind::Inner,
        first,
        second,
        join_predicate,
    )?;
    let t0 = env.candidate(first)?.base.cost.tuple_count();
    let t1 = env.candidate(second)?.base.cost.tuple_count();
    let deduplicated = distinct::create(env, joined, keys, false)?;
    if !estimate.is_infinity() && t0.is_positive() {
        let cost = &mut env.candidate_mut(deduplicated)?.base.cost;
        cost.set_limit_count(estimate * t1 / t0);
    }
    Ok(Some(deduplicated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::CandidateKind;
    use shared::catalog::{Catalog, ColumnId, DataType, FileDef, TableDef};
    use shared::config::PlannerConfig;

    fn create_test_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        let author = catalog.add_table(
            TableDef::new("author", 1_000.0)
                .row_id("rowid")
                .column("name", DataType::Text),
        );
        catalog.add_file(FileDef::record("author_record", author, ColumnId(0), &[ColumnId(1)]));
        let book = catalog.add_table(
            TableDef::new("book", 50_000.0)
                .row_id("rowid")
                .column("author", DataType::Integer),
        );
        catalog.add_file(FileDef::record("book_record", book, ColumnId(0), &[ColumnId(1)]));
        catalog.add_file(
            FileDef::btree("book_author", book, &[ColumnId(1)]).distinct_count(1_000.0),
        );
        catalog
    }

    fn create_test_join(env: &mut Environment<'_>, kind: JoinType) -> RelationId {
        let author = env.add_instance("author", "a").unwrap();
        let book = env.add_instance("book", "b").unwrap();
        let author_id = env.field(author, "rowid").unwrap();
        let book_author = env.field(book, "author").unwrap();
        let predicate = env.equal(book_author, author_id);
        let authors = env.table_relation(author);
        let books = env.table_relation(book);
        let join = env.join(kind, vec![authors, books], Some(predicate));
        relation::require_all(env, join).unwrap();
        relation::require(env, join).unwrap();
        join
    }

    #[test]
    fn test_not_exists_is_an_anti_join() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let join = create_test_join(&mut env, JoinType::NotExists);
        let plan = relation::create_access_plan(&mut env, join, &PlanSource::top(&config)).unwrap();
        match &env.candidate(plan).unwrap().kind {
            CandidateKind::Join(join) => assert_eq!(join.kind, JoinKind::NotExists),
            other => panic!("expected an anti-join, got {:?}", other),
        }
    }

    #[test]
    fn test_exists_keeps_a_single_alternative() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let join = create_test_join(&mut env, JoinType::Exists);
        let plan = relation::create_access_plan(&mut env, join, &PlanSource::top(&config)).unwrap();
        let candidate = env.candidate(plan).unwrap();
        assert!(matches!(
            candidate.kind,
            CandidateKind::Join(_) | CandidateKind::Distinct(_)
        ));
        let mut reachable = Default::default();
        env.reachable(plan, &mut reachable).unwrap();
        assert_eq!(env.candidate_count(), reachable.len());
    }
}
