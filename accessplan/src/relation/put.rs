/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Writes: insert, import, delete, update and undo.
//!
//! Inserts and imports take their tuples from any relation. Deletes, updates
//! and undos read the target table itself, usually through a selection, and
//! need the whole old tuple to maintain every file and the undo log.

use super::PutNode;
use crate::candidate::table::put::{self as put_candidate, PutKind};
use crate::environment::{CandidateId, Environment, InstanceSet};
use crate::error::{PlanError, PlanResult};
use crate::relation;
use crate::scalar;
use crate::source::PlanSource;
use log::debug;
use shared::config::TraceTopic;

pub fn create_access_plan(
    env: &mut Environment<'_>,
    source: &PlanSource,
    node: &PutNode,
) -> PlanResult<CandidateId> {
    if reads_target(node.kind) {
        let mut produced = InstanceSet::default();
        relation::used_tables(env, node.operand, &mut produced)?;
        if !produced.contains(&node.instance) {
            return Err(PlanError::not_supported(format!(
                "{} of {} does not read the target table",
                node.kind.name(),
                env.table(node.instance)?.name
            )));
        }
    }
    let mut operand_source = source.for_operand();
    operand_source.erase_order();
    operand_source.erase_limit();
    let operand = relation::create_access_plan(env, node.operand, &operand_source)?;
    let id = put_candidate::create(env, node.instance, node.kind, operand, node.values.clone())?;
    if env.traced(TraceTopic::Cost) {
        debug!(
            "{} {}: {}",
            node.kind.name(),
            env.instance(node.instance)?.alias,
            env.candidate(id)?.base.cost
        );
    }
    Ok(id)
}

/// Marks what the write reads: the new values, and for writes over existing
/// tuples every column of the target
pub fn require(env: &mut Environment<'_>, node: &PutNode) -> PlanResult<()> {
    for (_, value) in &node.values {
        scalar::require(env, *value)?;
    }
    if reads_target(node.kind) {
        for column in put_candidate::required_columns(env.table(node.instance)?) {
            env.require_column(node.instance, column);
        }
    }
    Ok(())
}

fn reads_target(kind: PutKind) -> bool {
    matches!(kind, PutKind::Delete | PutKind::Update | PutKind::Undo(_))
}
