/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Checking a predicate against the files of one table, then choosing the
//! file that searches it.

use super::{conjuncts, estimate_rate, used_instances, CompareOp, Predicate};
use crate::cost::{Cost, CostValue};
use crate::environment::{Environment, InstanceId, InstanceSet, PredicateId, ScalarId};
use crate::error::PlanResult;
use crate::scalar::{self, Literal, Scalar};
use log::debug;
use shared::catalog::{ColumnId, FileDef, FileId, FileKind};
use shared::config::TraceTopic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Equal,
    Range,
    Null,
    Prefix,
    Word,
}

/// A conjunct some file can search
#[derive(Debug, Clone)]
pub struct SearchTerm {
    pub predicate: PredicateId,
    pub column: ColumnId,
    pub kind: SearchKind,
    /// The searched value comes from a preceding candidate
    pub is_fetch: bool,
    pub files: Vec<FileId>,
    pub rate: CostValue,
}

#[derive(Debug, Clone, Default)]
pub struct CheckedPredicate {
    pub terms: Vec<SearchTerm>,
    /// Evaluable on retrieved tuples
    pub residual: Vec<PredicateId>,
    /// Refers to tables that are not available yet
    pub unchecked: Vec<PredicateId>,
}

impl CheckedPredicate {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.residual.is_empty() && self.unchecked.is_empty()
    }

    /// Files able to search at least one conjunct
    pub fn files(&self) -> Vec<FileId> {
        let mut files = Vec::new();
        for term in &self.terms {
            for file in &term.files {
                if !files.contains(file) {
                    files.push(*file);
                }
            }
        }
        files
    }
}

#[derive(Debug, Clone)]
pub struct ChosenPredicate {
    pub file: Option<FileId>,
    pub searched: Vec<PredicateId>,
    pub residual: Vec<PredicateId>,
    pub unchecked: Vec<PredicateId>,
    pub is_fetch: bool,
    pub is_bitset: bool,
    /// Selectivity of every conjunct checked at this table
    pub rate: CostValue,
    /// Cost of the access through `file`
    pub cost: Cost,
}

impl ChosenPredicate {
    /// No file searches the predicate, tuples have to be scanned
    pub fn need_scan(&self) -> bool {
        self.file.is_none()
    }

    pub fn checked(&self) -> impl Iterator<Item = PredicateId> + '_ {
        self.searched.iter().chain(self.residual.iter()).copied()
    }
}

/// Sorts the conjuncts of a predicate by how the table can handle them.
///
/// `available` holds the instances of preceding candidates whose values are
/// bound while this table is read.
pub fn check(
    env: &Environment<'_>,
    predicate: PredicateId,
    instance: InstanceId,
    available: &InstanceSet,
) -> PlanResult<CheckedPredicate> {
    let mut reachable = available.clone();
    reachable.insert(instance);

    let mut checked = CheckedPredicate::default();
    for conjunct in conjuncts(env, predicate)? {
        let mut used = InstanceSet::default();
        used_instances(env, conjunct, &mut used)?;
        if !used.is_subset(&reachable) {
            checked.unchecked.push(conjunct);
            continue;
        }
        if !used.contains(&instance) {
            checked.residual.push(conjunct);
            continue;
        }
        match search_term(env, conjunct, instance, available)? {
            Some(term) => checked.terms.push(term),
            None => checked.residual.push(conjunct),
        }
    }
    if env.traced(TraceTopic::Predicate) {
        debug!(
            "predicate on instance {}: {} searchable, {} residual, {} unchecked",
            instance.0,
            checked.terms.len(),
            checked.residual.len(),
            checked.unchecked.len()
        );
    }
    Ok(checked)
}

/// Column and search kind of a conjunct when one side is a field of the
/// instance and the other side is bound.
fn search_term(
    env: &Environment<'_>,
    conjunct: PredicateId,
    instance: InstanceId,
    available: &InstanceSet,
) -> PlanResult<Option<SearchTerm>> {
    let (column, kind, values) = match env.predicate(conjunct)? {
        Predicate::Comparison { op, left, right } => {
            let (column, value) = match (
                scalar::field_of(env, *left, instance)?,
                scalar::field_of(env, *right, instance)?,
            ) {
                (Some(column), None) => (column, *right),
                (None, Some(column)) => (column, *left),
                _ => return Ok(None),
            };
            let kind = match op {
                CompareOp::Equal => SearchKind::Equal,
                CompareOp::NotEqual => return Ok(None),
                _ => SearchKind::Range,
            };
            (column, kind, vec![value])
        }
        Predicate::IsNull { operand, negated } => {
            if *negated {
                return Ok(None);
            }
            match scalar::field_of(env, *operand, instance)? {
                Some(column) => (column, SearchKind::Null, Vec::new()),
                None => return Ok(None),
            }
        }
        Predicate::In { operand, values } => match scalar::field_of(env, *operand, instance)? {
            Some(column) => (column, SearchKind::Equal, values.clone()),
            None => return Ok(None),
        },
        Predicate::Like {
            operand,
            pattern,
            negated,
        } => {
            if *negated || !is_prefix_pattern(env, *pattern)? {
                return Ok(None);
            }
            match scalar::field_of(env, *operand, instance)? {
                Some(column) => (column, SearchKind::Prefix, vec![*pattern]),
                None => return Ok(None),
            }
        }
        Predicate::Contains { operand, pattern } => {
            match scalar::field_of(env, *operand, instance)? {
                Some(column) => (column, SearchKind::Word, vec![*pattern]),
                None => return Ok(None),
            }
        }
        Predicate::And(_) | Predicate::Or(_) | Predicate::Not(_) => return Ok(None),
    };

    let mut is_fetch = false;
    for value in &values {
        let mut used = InstanceSet::default();
        scalar::used_instances(env, *value, &mut used)?;
        if used.contains(&instance) || !used.is_subset(available) {
            return Ok(None);
        }
        is_fetch |= !used.is_empty() || is_parameter(env, *value)?;
    }

    let table = env.table(instance)?;
    let files: Vec<FileId> = env
        .catalog()
        .files_of(table.id)
        .filter(|file| can_search(file, column, kind))
        .map(|file| file.id)
        .collect();
    if files.is_empty() {
        return Ok(None);
    }
    Ok(Some(SearchTerm {
        predicate: conjunct,
        column,
        kind,
        is_fetch,
        files,
        rate: estimate_rate(env, conjunct)?,
    }))
}

fn is_parameter(env: &Environment<'_>, id: ScalarId) -> PlanResult<bool> {
    Ok(matches!(env.scalar(id)?, Scalar::Value(Literal::Parameter(_))))
}

fn is_prefix_pattern(env: &Environment<'_>, id: ScalarId) -> PlanResult<bool> {
    Ok(match env.scalar(id)? {
        Scalar::Value(Literal::Text(text)) => {
            !text.is_empty() && !text.starts_with('%') && !text.starts_with('_')
        }
        _ => false,
    })
}

fn can_search(file: &FileDef, column: ColumnId, kind: SearchKind) -> bool {
    if !file.capability.search || file.key_position(column).is_none() {
        return false;
    }
    match file.kind {
        FileKind::BTree | FileKind::Record => kind != SearchKind::Word,
        FileKind::Bitmap => matches!(kind, SearchKind::Equal | SearchKind::Null),
        FileKind::FullText => kind == SearchKind::Word && file.capability.word,
        FileKind::Array => kind == SearchKind::Equal,
        FileKind::Vector => kind == SearchKind::Equal && file.key_position(column) == Some(0),
    }
}

/// Terms a file serves: key positions are consumed left to right, and only
/// an equality on a position lets the next one be searched too.
fn served_terms<'t>(file: &FileDef, terms: &'t [SearchTerm]) -> Vec<&'t SearchTerm> {
    let mut served = Vec::new();
    if file.kind == FileKind::FullText {
        served.extend(terms.iter().filter(|t| t.files.contains(&file.id)));
        return served;
    }
    for key in &file.keys {
        let at_key: Vec<&SearchTerm> = terms
            .iter()
            .filter(|t| t.column == key.column && t.files.contains(&file.id))
            .collect();
        if at_key.is_empty() {
            break;
        }
        let equal = at_key.iter().any(|t| t.kind == SearchKind::Equal);
        served.extend(at_key);
        if !equal {
            break;
        }
    }
    served
}

/// Chooses the file that searches the checked predicate.
///
/// The index access competes against `scan_cost`, the cost of reading the
/// table sequentially and checking every conjunct on the way. `repeat` is the
/// number of times the access runs; the file overhead is paid only once.
/// With `restrict`, only that file may be used.
pub fn choose(
    env: &Environment<'_>,
    instance: InstanceId,
    checked: &CheckedPredicate,
    scan_cost: &Cost,
    estimate_limit: CostValue,
    repeat: CostValue,
    restrict: Option<FileId>,
) -> PlanResult<ChosenPredicate> {
    let table = env.table(instance)?;
    let estimator = env.estimator();
    let repeat = repeat.max(CostValue::ONE);
    let evaluate = |cost: &Cost| cost.overhead() + cost.repeat_cost() * repeat;

    let mut scan = scan_cost.clone();
    if !estimate_limit.is_infinity() {
        scan.set_limit_count(estimate_limit);
    }
    let mut best: Option<(FileId, Vec<&SearchTerm>, Cost, CostValue)> = None;
    let mut best_value = evaluate(&scan);

    for file_id in checked.files() {
        if restrict.map_or(false, |only| only != file_id) {
            continue;
        }
        let file = env.file(file_id)?;
        let served = served_terms(file, &checked.terms);
        if served.is_empty() {
            continue;
        }
        let rate = served.iter().fold(CostValue::ONE, |rate, t| rate * t.rate);
        let is_fetch = served.iter().any(|t| t.is_fetch);
        let mut cost = estimator.file_cost(file, table, Some(rate), is_fetch);
        if !estimate_limit.is_infinity() {
            cost.set_limit_count(estimate_limit);
        }
        let value = evaluate(&cost);
        if env.traced(TraceTopic::Predicate) {
            debug!("search through {}: {} against {}", file.name, value, best_value);
        }
        if value < best_value || (restrict.is_some() && best.is_none()) {
            best_value = value;
            best = Some((file_id, served, cost, rate));
        }
    }

    let mut chosen = ChosenPredicate {
        file: None,
        searched: Vec::new(),
        residual: Vec::new(),
        unchecked: checked.unchecked.clone(),
        is_fetch: false,
        is_bitset: false,
        rate: CostValue::ONE,
        cost: Cost::new(),
    };
    match best {
        Some((file_id, served, cost, _)) => {
            chosen.file = Some(file_id);
            chosen.searched = served.iter().map(|t| t.predicate).collect();
            chosen.is_fetch = served.iter().any(|t| t.is_fetch);
            chosen.is_bitset = env.file(file_id)?.kind == FileKind::Bitmap;
            chosen.cost = cost;
            for term in &checked.terms {
                if !chosen.searched.contains(&term.predicate) {
                    chosen.residual.push(term.predicate);
                }
            }
        }
        None => {
            chosen.residual.extend(checked.terms.iter().map(|t| t.predicate));
        }
    }
    chosen.residual.extend(checked.residual.iter().copied());

    let mut rate = CostValue::ONE;
    for conjunct in chosen.checked().collect::<Vec<_>>() {
        rate *= estimate_rate(env, conjunct)?;
    }
    chosen.rate = rate;
    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostValue;
    use shared::catalog::{Catalog, DataType, FileDef, TableDef};
    use shared::config::PlannerConfig;

    fn create_test_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        let account = catalog.add_table(
            TableDef::new("account", 10000.0)
                .row_id("rowid")
                .column("owner", DataType::Integer)
                .column("branch", DataType::Integer)
                .column("balance", DataType::Integer),
        );
        catalog.add_file(FileDef::record(
            "account_record",
            account,
            ColumnId(0),
            &[ColumnId(1), ColumnId(2), ColumnId(3)],
        ));
        catalog.add_file(
            FileDef::btree("account_owner_branch", account, &[ColumnId(1), ColumnId(2)])
                .distinct_count(5000.0)
                .cost(3.0, 1.0),
        );
        let bank = catalog.add_table(
            TableDef::new("bank", 10.0)
                .row_id("rowid")
                .column("id", DataType::Integer),
        );
        catalog.add_file(FileDef::record("bank_record", bank, ColumnId(0), &[ColumnId(1)]));
        catalog
    }

    fn scan_cost(env: &Environment<'_>, instance: InstanceId) -> Cost {
        let table = env.table(instance).unwrap();
        env.estimator().scan_cost(env.file(FileId(0)).unwrap(), table)
    }

    #[test]
    fn test_check_sorts_conjuncts() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let account = env.add_instance("account", "a").unwrap();
        let bank = env.add_instance("bank", "b").unwrap();
        let owner = env.field(account, "owner").unwrap();
        let balance = env.field(account, "balance").unwrap();
        let bank_id = env.field(bank, "id").unwrap();
        let value = env.integer(7);
        let searchable = env.equal(owner, value);
        let residual = env.comparison(CompareOp::Greater, balance, value);
        let join = env.equal(balance, bank_id);
        let all = env.and(vec![searchable, residual, join]);

        let checked = check(&env, all, account, &InstanceSet::default()).unwrap();
        assert_eq!(checked.terms.len(), 1);
        assert_eq!(checked.residual, vec![residual]);
        assert_eq!(checked.unchecked, vec![join]);

        let mut available = InstanceSet::default();
        available.insert(bank);
        let checked = check(&env, all, account, &available).unwrap();
        assert_eq!(checked.unchecked.len(), 0);
        assert_eq!(checked.residual, vec![residual, join]);
    }

    #[test]
    fn test_choose_prefers_selective_index() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let account = env.add_instance("account", "a").unwrap();
        let owner = env.field(account, "owner").unwrap();
        let value = env.integer(7);
        let searchable = env.equal(owner, value);
        let checked = check(&env, searchable, account, &InstanceSet::default()).unwrap();
        let scan = scan_cost(&env, account);
        let chosen = choose(
            &env,
            account,
            &checked,
            &scan,
            CostValue::INFINITY,
            CostValue::ONE,
            None,
        )
        .unwrap();
        assert_eq!(chosen.file, Some(FileId(1)));
        assert_eq!(chosen.searched, vec![searchable]);
        assert!(!chosen.need_scan());
        assert!(chosen.cost < scan);
    }

    #[test]
    fn test_composite_key_needs_leading_equality() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let account = env.add_instance("account", "a").unwrap();
        let owner = env.field(account, "owner").unwrap();
        let branch = env.field(account, "branch").unwrap();
        let value = env.integer(7);
        let on_owner = env.comparison(CompareOp::Less, owner, value);
        let on_branch = env.equal(branch, value);
        let both = env.and(vec![on_owner, on_branch]);
        let checked = check(&env, both, account, &InstanceSet::default()).unwrap();
        let file = env.file(FileId(1)).unwrap();
        let served = served_terms(file, &checked.terms);
        assert_eq!(served.len(), 1);
        assert_eq!(served[0].predicate, on_owner);
    }

    #[test]
    fn test_bound_value_makes_a_fetch() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let account = env.add_instance("account", "a").unwrap();
        let bank = env.add_instance("bank", "b").unwrap();
        let owner = env.field(account, "owner").unwrap();
        let bank_id = env.field(bank, "id").unwrap();
        let join = env.equal(owner, bank_id);
        let mut available = InstanceSet::default();
        available.insert(bank);
        let checked = check(&env, join, account, &available).unwrap();
        assert!(checked.terms[0].is_fetch);
        let scan = scan_cost(&env, account);
        let chosen = choose(
            &env,
            account,
            &checked,
            &scan,
            CostValue::INFINITY,
            CostValue::new(10.0),
            None,
        )
        .unwrap();
        assert!(chosen.is_fetch);
        assert!(chosen.cost.is_fetch());
    }

    #[test]
    fn test_unsearchable_predicate_needs_scan() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let account = env.add_instance("account", "a").unwrap();
        let balance = env.field(account, "balance").unwrap();
        let value = env.integer(7);
        let residual = env.equal(balance, value);
        let checked = check(&env, residual, account, &InstanceSet::default()).unwrap();
        let scan = scan_cost(&env, account);
        let chosen = choose(
            &env,
            account,
            &checked,
            &scan,
            CostValue::INFINITY,
            CostValue::ONE,
            None,
        )
        .unwrap();
        assert!(chosen.need_scan());
        assert_eq!(chosen.residual, vec![residual]);
        assert_eq!(chosen.rate, CostValue::new(0.05));
    }
}
