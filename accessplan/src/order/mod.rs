/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Order specifications.
//!
//! An ORDER BY, GROUP BY or PARTITION BY key list moves through phases:
//! it is written by the user (`Raw`), proven to be delivered by some files of
//! a table (`Checked`), bound to one of them (`Chosen`) and finally bound to
//! data positions of the execution program (`Generated`). Each phase payload
//! holds only what is known at that point.

pub mod check;
pub mod compare;
pub mod generate;

pub use compare::{
    get_compatible, has_same_partition_key, is_compatible, is_satisfied_by, KeyComparison,
};

use crate::environment::{Environment, InstanceId, ScalarId};
use crate::error::{PlanError, PlanResult};
use crate::scalar;
use serde::Serialize;
use shared::catalog::{FileId, SortDirection};
use shared::program::{DataId, SortKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    Ascending,
    Descending,
    /// Either direction will do, e.g. for grouping
    Unknown,
}

impl Direction {
    pub fn is_compatible(&self, other: Direction) -> bool {
        *self == other || *self == Direction::Unknown || other == Direction::Unknown
    }

    fn sql(&self) -> &'static str {
        match self {
            Direction::Ascending => " asc",
            Direction::Descending => " desc",
            Direction::Unknown => "",
        }
    }
}

impl From<SortDirection> for Direction {
    fn from(direction: SortDirection) -> Self {
        match direction {
            SortDirection::Ascending => Direction::Ascending,
            SortDirection::Descending => Direction::Descending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderKey {
    pub scalar: ScalarId,
    pub direction: Direction,
}

impl OrderKey {
    pub fn new(scalar: ScalarId, direction: Direction) -> Self {
        Self { scalar, direction }
    }

    pub fn ascending(scalar: ScalarId) -> Self {
        Self::new(scalar, Direction::Ascending)
    }

    pub fn descending(scalar: ScalarId) -> Self {
        Self::new(scalar, Direction::Descending)
    }
}

/// Keys proven to be delivered by some files of one table
#[derive(Debug, Clone, PartialEq)]
pub struct CheckedPhase {
    pub instance: InstanceId,
    /// Files delivering every checked key, never empty
    pub files: Vec<FileId>,
    /// Leading keys bound by preceding candidates
    pub skipped: usize,
    pub is_bitset_sort: bool,
}

/// Keys bound to one file
#[derive(Debug, Clone, PartialEq)]
pub struct ChosenPhase {
    pub instance: InstanceId,
    pub file: FileId,
    pub skipped: usize,
    pub is_bitset_sort: bool,
}

/// Keys bound to data positions of the program
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedPhase {
    /// Array variable holding every element
    pub data: DataId,
    pub elements: Vec<ScalarId>,
    pub keys: Vec<SortKey>,
    /// Positions of partition keys inside `elements`
    pub partition: Vec<usize>,
}

impl GeneratedPhase {
    pub fn position(&self, scalar: ScalarId) -> Option<usize> {
        self.elements.iter().position(|element| *element == scalar)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Raw,
    Checked(CheckedPhase),
    Chosen(ChosenPhase),
    Generated(GeneratedPhase),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Specification {
    keys: Vec<OrderKey>,
    partition_keys: Vec<ScalarId>,
    is_grouping: bool,
    phase: Phase,
}

impl Specification {
    pub fn new(keys: Vec<OrderKey>) -> Self {
        Self {
            keys,
            partition_keys: Vec::new(),
            is_grouping: false,
            phase: Phase::Raw,
        }
    }

    /// Group-by keys: no direction is required
    pub fn grouping(keys: &[ScalarId]) -> Self {
        Self {
            keys: keys
                .iter()
                .map(|key| OrderKey::new(*key, Direction::Unknown))
                .collect(),
            partition_keys: Vec::new(),
            is_grouping: true,
            phase: Phase::Raw,
        }
    }

    /// Partition keys lead, then the order keys inside each partition
    pub fn partitioned(partition_keys: &[ScalarId], order: &[OrderKey]) -> Self {
        let mut keys: Vec<OrderKey> = partition_keys
            .iter()
            .map(|key| OrderKey::new(*key, Direction::Unknown))
            .collect();
        keys.extend(order.iter().copied());
        Self {
            keys,
            partition_keys: partition_keys.to_vec(),
            is_grouping: false,
            phase: Phase::Raw,
        }
    }

    pub(crate) fn with_phase(&self, keys: Vec<OrderKey>, phase: Phase) -> Self {
        Self {
            keys,
            partition_keys: self.partition_keys.clone(),
            is_grouping: self.is_grouping,
            phase,
        }
    }

    pub fn keys(&self) -> &[OrderKey] {
        &self.keys
    }

    pub fn key_scalars(&self) -> Vec<ScalarId> {
        self.keys.iter().map(|key| key.scalar).collect()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn partition_keys(&self) -> &[ScalarId] {
        &self.partition_keys
    }

    pub fn is_grouping(&self) -> bool {
        self.is_grouping
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn checked(&self) -> Option<&CheckedPhase> {
        match &self.phase {
            Phase::Checked(phase) => Some(phase),
            _ => None,
        }
    }

    pub fn chosen(&self) -> Option<&ChosenPhase> {
        match &self.phase {
            Phase::Chosen(phase) => Some(phase),
            _ => None,
        }
    }

    pub fn generated(&self) -> Option<&GeneratedPhase> {
        match &self.phase {
            Phase::Generated(phase) => Some(phase),
            _ => None,
        }
    }

    pub fn expect_generated(&self) -> PlanResult<&GeneratedPhase> {
        self.generated()
            .ok_or_else(|| PlanError::unexpected("order specification is not generated"))
    }

    /// Files able to deliver the order, once checked or chosen
    pub fn files(&self) -> Vec<FileId> {
        match &self.phase {
            Phase::Checked(phase) => phase.files.clone(),
            Phase::Chosen(phase) => vec![phase.file],
            _ => Vec::new(),
        }
    }

    pub fn is_bitset_sort(&self) -> bool {
        match &self.phase {
            Phase::Checked(phase) => phase.is_bitset_sort,
            Phase::Chosen(phase) => phase.is_bitset_sort,
            _ => false,
        }
    }

    pub fn contains(&self, scalar: ScalarId) -> bool {
        self.keys.iter().any(|key| key.scalar == scalar)
    }

    /// ORDER BY text for a cascade, ` a asc, b desc`
    pub fn to_sql(&self, env: &Environment<'_>) -> PlanResult<String> {
        let parts = self
            .keys
            .iter()
            .map(|key| Ok(format!(" {}{}", scalar::to_sql(env, key.scalar)?, key.direction.sql())))
            .collect::<PlanResult<Vec<_>>>()?;
        Ok(parts.join(","))
    }

    /// Qualified text used in traces and scan actions
    pub fn label(&self, env: &Environment<'_>) -> PlanResult<String> {
        let parts = self
            .keys
            .iter()
            .map(|key| Ok(format!("{}{}", scalar::label(env, key.scalar)?, key.direction.sql())))
            .collect::<PlanResult<Vec<_>>>()?;
        Ok(parts.join(","))
    }
}
