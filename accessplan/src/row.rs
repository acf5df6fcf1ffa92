/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Tuple shapes and deferred retrieval.
//!
//! A [`Row`] lists the expressions a candidate produces. [`delay`] splits a
//! row into the columns that must be read while iterating and the ones that
//! can be fetched by row id once a tuple is known to survive, which saves
//! reading wide columns of tuples that are filtered, sorted away or limited.

use crate::candidate;
use crate::environment::{CandidateId, Environment, RowId, ScalarId};
use crate::error::PlanResult;
use log::trace;
use shared::config::TraceTopic;

/// Ordered, duplicate-free list of expressions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    scalars: Vec<ScalarId>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_scalars(scalars: impl IntoIterator<Item = ScalarId>) -> Self {
        let mut row = Self::new();
        for scalar in scalars {
            row.add(scalar);
        }
        row
    }

    /// Appends the expression unless it is already there
    pub fn add(&mut self, scalar: ScalarId) -> bool {
        if self.contains(scalar) {
            return false;
        }
        self.scalars.push(scalar);
        true
    }

    pub fn contains(&self, scalar: ScalarId) -> bool {
        self.scalars.contains(&scalar)
    }

    pub fn iter(&self) -> impl Iterator<Item = ScalarId> + '_ {
        self.scalars.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.scalars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scalars.is_empty()
    }

    pub fn merge(&mut self, other: &Row) {
        for scalar in other.iter() {
            self.add(scalar);
        }
    }

    pub fn as_slice(&self) -> &[ScalarId] {
        &self.scalars
    }
}

/// Split of a row into eagerly read and deferred columns
#[derive(Debug, Clone, Default)]
pub struct DelayArgument {
    pub eager: Vec<ScalarId>,
    pub deferred: Vec<ScalarId>,
    /// Columns the caller needs while iterating, e.g. join or lock keys
    pub keys: Vec<ScalarId>,
    /// Read only what predicates and orders need now
    pub minimum: bool,
}

impl DelayArgument {
    pub fn with_keys(keys: Vec<ScalarId>) -> Self {
        Self {
            keys,
            ..Self::default()
        }
    }

    pub fn is_deferred(&self, scalar: ScalarId) -> bool {
        self.deferred.contains(&scalar)
    }

    pub fn is_delayed(&self) -> bool {
        !self.deferred.is_empty()
    }
}

/// Splits the row of a candidate; returns whether anything was deferred.
///
/// Key columns of the caller are always eager. Every other column is
/// deferred when the candidate can fetch it later by row id.
pub fn delay(
    env: &Environment<'_>,
    row: RowId,
    candidate: CandidateId,
    argument: &mut DelayArgument,
) -> PlanResult<bool> {
    argument.eager.clear();
    argument.deferred.clear();
    let scalars: Vec<ScalarId> = env.row(row)?.iter().collect();
    for scalar in scalars {
        if argument.keys.contains(&scalar) {
            argument.eager.push(scalar);
        } else if candidate::is_delayable(env, candidate, scalar, &argument.keys)? {
            argument.deferred.push(scalar);
        } else {
            argument.eager.push(scalar);
        }
    }
    if env.traced(TraceTopic::Adopt) {
        trace!(
            "delay for candidate {:?}: {} eager, {} deferred",
            candidate,
            argument.eager.len(),
            argument.deferred.len()
        );
    }
    Ok(argument.is_delayed())
}
