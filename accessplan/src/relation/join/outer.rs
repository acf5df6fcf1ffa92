/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::standalone_source;
use crate::candidate::{self, filter, split_bound, JoinKind};
use crate::environment::{CandidateId, Environment, PredicateId, RelationId};
use crate::error::{PlanError, PlanResult};
use crate::predicate;
use crate::relation::{self, JoinType};
use crate::source::PlanSource;

/// Plans a left or right outer join.
///
/// The preserved side always drives the loop. The join predicate only decides
/// whether an inner tuple matches, so it goes to the inner side alone; source
/// conjuncts on the inner side are checked after the null padding.
pub fn create_access_plan(
    env: &mut Environment<'_>,
    source: &PlanSource,
    kind: JoinType,
    first: RelationId,
    second: RelationId,
    join_predicate: Option<PredicateId>,
) -> PlanResult<CandidateId> {
    let (preserved, optional) = match kind {
        JoinType::RightOuter => (second, first),
        _ => (first, second),
    };
    if relation::depends_on(env, preserved, optional)? {
        return Err(PlanError::not_supported(
            "the preserved side of an outer join reads the optional side",
        ));
    }

    let source_conjuncts = match source.predicate() {
        Some(predicate) => predicate::conjuncts(env, predicate)?,
        None => Vec::new(),
    };
    let preserved_source = standalone_source(env, source, &source_conjuncts, preserved)?;
    let outer = relation::create_access_plan(env, preserved, &preserved_source)?;

    let mut outer_bound = source.preceding_instances(env)?;
    outer_bound.extend(candidate::instance_set(env, outer)?);
    let (_, after_padding) = split_bound(env, &source_conjuncts, &outer_bound)?;

    let mut inner_source = source.for_operand();
    inner_source.erase_predicate();
    inner_source.erase_order();
    inner_source.erase_limit();
    inner_source.add_preceding_candidate(outer);
    if let Some(predicate) = join_predicate {
        inner_source.add_predicate(env, predicate)?;
    }
    let inner = relation::create_access_plan(env, optional, &inner_source)?;

    let mut join_source = source.for_operand();
    join_source.erase_predicate();
    let joined = candidate::join::create(
        env,
        &join_source,
        JoinKind::LeftOuter,
        outer,
        inner,
        join_predicate,
    )?;
    if after_padding.is_empty() {
        return Ok(joined);
    }
    filter::create(env, &join_source, joined, &after_padding)
}
