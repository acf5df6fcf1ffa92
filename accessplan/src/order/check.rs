/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{CheckedPhase, ChosenPhase, Direction, OrderKey, Phase, Specification};
use crate::environment::{Environment, InstanceId, InstanceSet};
use crate::error::{PlanError, PlanResult};
use crate::limit::Limit;
use crate::predicate::ChosenPredicate;
use log::debug;
use shared::catalog::{FileDef, FileId, FileKind};
use shared::config::TraceTopic;

impl Specification {
    /// Proves which files of the instance deliver the keys.
    ///
    /// Leading keys on tables of preceding candidates are satisfied by the
    /// enclosing loop and skipped. When only a prefix of the keys can be
    /// delivered the result is `None`, unless `check_partial` allows the
    /// prefix to feed a partial sort.
    pub fn check(
        &self,
        env: &Environment<'_>,
        instance: InstanceId,
        preceding: &InstanceSet,
        check_partial: bool,
        grouping: bool,
    ) -> PlanResult<Option<Specification>> {
        if !matches!(self.phase(), Phase::Raw) {
            return Err(PlanError::unexpected("order specification checked twice"));
        }
        let grouping = grouping || self.is_grouping();
        let table = env.table(instance)?;
        let files: Vec<&FileDef> = env.catalog().files_of(table.id).collect();

        let mut skipped = 0;
        let mut matched: Vec<OrderKey> = Vec::new();
        let mut current: Option<Vec<FileId>> = None;
        let mut is_bitset_sort = false;

        for key in self.keys() {
            let field = env.scalar(key.scalar)?.as_field();
            let field = match field {
                Some(field) => field,
                None => break,
            };
            if matched.is_empty() && preceding.contains(&field.instance) {
                skipped += 1;
                continue;
            }
            if field.instance != instance {
                break;
            }
            let position = matched.len();
            let mut covering: Vec<FileId> = files
                .iter()
                .filter(|file| covers_key(file, position, field.column, key.direction, grouping))
                .map(|file| file.id)
                .collect();
            if covering.is_empty() && grouping && position == 0 && self.len() - skipped == 1 {
                covering = files
                    .iter()
                    .filter(|file| is_bitset_grouping(file, field.column))
                    .map(|file| file.id)
                    .collect();
                is_bitset_sort = !covering.is_empty();
            }
            let intersection: Vec<FileId> = match &current {
                Some(current) => covering.into_iter().filter(|f| current.contains(f)).collect(),
                None => covering,
            };
            if intersection.is_empty() {
                break;
            }
            let direction = match key.direction {
                Direction::Unknown if !is_bitset_sort => {
                    file_direction(env, intersection[0], position)?
                }
                direction => direction,
            };
            matched.push(OrderKey::new(key.scalar, direction));
            current = Some(intersection);
        }

        let files = match current {
            Some(files) if !matched.is_empty() => files,
            _ => return Ok(None),
        };
        if skipped + matched.len() < self.len() && !check_partial {
            if env.traced(TraceTopic::Order) {
                debug!(
                    "order on instance {}: only {} of {} keys delivered",
                    instance.0,
                    matched.len(),
                    self.len()
                );
            }
            return Ok(None);
        }

        let mut keys: Vec<OrderKey> = self.keys()[..skipped].to_vec();
        keys.extend(matched);
        if env.traced(TraceTopic::Order) {
            debug!("order on instance {}: {} keys by {:?}", instance.0, keys.len(), files);
        }
        Ok(Some(self.with_phase(
            keys,
            Phase::Checked(CheckedPhase {
                instance,
                files,
                skipped,
                is_bitset_sort,
            }),
        )))
    }

    /// Binds a checked order to one file, see [`CheckedPhase::choose`]
    pub fn choose(
        &self,
        env: &Environment<'_>,
        predicate: Option<&ChosenPredicate>,
        limit: &Limit,
    ) -> PlanResult<Option<Specification>> {
        let checked = match self.checked() {
            Some(checked) => checked,
            None => return Err(PlanError::unexpected("choosing an unchecked order")),
        };
        Ok(checked
            .choose(env, predicate, limit)?
            .map(|chosen| self.with_phase(self.keys().to_vec(), Phase::Chosen(chosen))))
    }
}

impl CheckedPhase {
    /// Picks the file that delivers the order.
    ///
    /// The predicate's file wins when it is a candidate, so one file both
    /// searches and orders. Otherwise a file able to process the limit is
    /// preferred, then the cheapest one to scan.
    pub fn choose(
        &self,
        env: &Environment<'_>,
        predicate: Option<&ChosenPredicate>,
        limit: &Limit,
    ) -> PlanResult<Option<ChosenPhase>> {
        let chosen = |file: FileId| ChosenPhase {
            instance: self.instance,
            file,
            skipped: self.skipped,
            is_bitset_sort: self.is_bitset_sort,
        };
        if let Some(file) = predicate.and_then(|p| p.file) {
            if self.files.contains(&file) {
                return Ok(Some(chosen(file)));
            }
        }
        if limit.is_specified() {
            for file in &self.files {
                if env.file(*file)?.capability.limit {
                    return Ok(Some(chosen(*file)));
                }
            }
        }
        let table = env.table(self.instance)?;
        let estimator = env.estimator();
        let mut best: Option<(FileId, crate::cost::Cost)> = None;
        for file in &self.files {
            let cost = estimator.scan_cost(env.file(*file)?, table);
            let better = match &best {
                Some((_, best)) => cost < *best,
                None => true,
            };
            if better {
                best = Some((*file, cost));
            }
        }
        Ok(best.map(|(file, _)| chosen(file)))
    }
}

fn covers_key(
    file: &FileDef,
    position: usize,
    column: shared::catalog::ColumnId,
    direction: Direction,
    grouping: bool,
) -> bool {
    if !file.capability.order {
        return false;
    }
    match file.keys.get(position) {
        Some(key) if key.column == column => {
            grouping || direction.is_compatible(Direction::from(key.direction))
        }
        _ => false,
    }
}

fn is_bitset_grouping(file: &FileDef, column: shared::catalog::ColumnId) -> bool {
    file.kind == FileKind::Bitmap
        && file.capability.bitset
        && file.capability.grouping
        && file.leading_key() == Some(column)
}

fn file_direction(env: &Environment<'_>, file: FileId, position: usize) -> PlanResult<Direction> {
    Ok(env
        .file(file)?
        .keys
        .get(position)
        .map(|key| Direction::from(key.direction))
        .unwrap_or(Direction::Ascending))
}
