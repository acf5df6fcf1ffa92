/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{Direction, OrderKey, Specification};

/// Result of comparing two keys position by position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyComparison {
    /// Different expressions or opposite directions
    Incompatible,
    Same,
    /// The second key leaves the direction open, the first one fits it
    FirstUsable,
    /// The first key leaves the direction open, the second one fits it
    SecondUsable,
}

impl OrderKey {
    pub fn compare(&self, other: &OrderKey) -> KeyComparison {
        if self.scalar != other.scalar {
            return KeyComparison::Incompatible;
        }
        match (self.direction, other.direction) {
            (first, second) if first == second => KeyComparison::Same,
            (_, Direction::Unknown) => KeyComparison::FirstUsable,
            (Direction::Unknown, _) => KeyComparison::SecondUsable,
            _ => KeyComparison::Incompatible,
        }
    }
}

/// Whether the order `first` can stand in for `second`.
///
/// Keys are compared up to the shorter specification; at least one key must
/// be compared. Bound specifications must also share a file.
pub fn is_compatible(first: Option<&Specification>, second: Option<&Specification>) -> bool {
    let (first, second) = match (first, second) {
        (Some(first), Some(second)) => (first, second),
        _ => return false,
    };
    let first_files = first.files();
    let second_files = second.files();
    if !first_files.is_empty()
        && !second_files.is_empty()
        && !first_files.iter().any(|file| second_files.contains(file))
    {
        return false;
    }
    let count = first.keys().len().min(second.keys().len());
    for (a, b) in first.keys().iter().zip(second.keys().iter()).take(count) {
        match a.compare(b) {
            KeyComparison::Incompatible | KeyComparison::SecondUsable => return false,
            KeyComparison::Same | KeyComparison::FirstUsable => {}
        }
    }
    count > 0
}

/// Whether `provided` delivers everything `required` asks for
pub fn is_satisfied_by(required: Option<&Specification>, provided: Option<&Specification>) -> bool {
    match (required, provided) {
        (Some(required_spec), Some(provided_spec)) => {
            provided_spec.len() >= required_spec.len() && is_compatible(provided, required)
        }
        _ => false,
    }
}

pub fn has_same_partition_key(first: &Specification, second: &Specification) -> bool {
    first.partition_keys() == second.partition_keys()
}

/// The most specific order satisfying both specifications.
///
/// The longer key list wins past the common prefix. Returns `None` when the
/// two disagree on some key.
pub fn get_compatible(first: &Specification, second: &Specification) -> Option<Specification> {
    let partition = if first.partition_keys().is_empty() {
        second.partition_keys()
    } else if second.partition_keys().is_empty() || has_same_partition_key(first, second) {
        first.partition_keys()
    } else {
        return None;
    };

    let mut keys = Vec::with_capacity(first.len().max(second.len()));
    for (a, b) in first.keys().iter().zip(second.keys().iter()) {
        match a.compare(b) {
            KeyComparison::Incompatible => return None,
            KeyComparison::Same | KeyComparison::FirstUsable => keys.push(*a),
            KeyComparison::SecondUsable => keys.push(*b),
        }
    }
    let longer = if first.len() > second.len() { first } else { second };
    keys.extend(longer.keys().iter().skip(keys.len()).copied());

    let mut merged = Specification::new(keys);
    merged.partition_keys = partition.to_vec();
    merged.is_grouping = first.is_grouping() && second.is_grouping();
    Some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use crate::order::{CheckedPhase, Phase};
    use crate::environment::InstanceId;
    use shared::catalog::{Catalog, ColumnId, DataType, FileDef, FileId, TableDef};
    use shared::config::PlannerConfig;

    fn create_test_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        let table = catalog.add_table(
            TableDef::new("sale", 10.0)
                .row_id("rowid")
                .column("region", DataType::Integer)
                .column("amount", DataType::Integer),
        );
        catalog.add_file(FileDef::record(
            "sale_record",
            table,
            ColumnId(0),
            &[ColumnId(1), ColumnId(2)],
        ));
        catalog
    }

    #[test]
    fn test_key_comparison() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let sale = env.add_instance("sale", "s").unwrap();
        let region = env.field(sale, "region").unwrap();
        let amount = env.field(sale, "amount").unwrap();
        let asc = OrderKey::ascending(region);
        let desc = OrderKey::descending(region);
        let open = OrderKey::new(region, Direction::Unknown);
        assert_eq!(asc.compare(&asc), KeyComparison::Same);
        assert_eq!(asc.compare(&desc), KeyComparison::Incompatible);
        assert_eq!(asc.compare(&open), KeyComparison::FirstUsable);
        assert_eq!(open.compare(&asc), KeyComparison::SecondUsable);
        assert_eq!(asc.compare(&OrderKey::ascending(amount)), KeyComparison::Incompatible);
    }

    #[test]
    fn test_compatibility() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let sale = env.add_instance("sale", "s").unwrap();
        let region = env.field(sale, "region").unwrap();
        let amount = env.field(sale, "amount").unwrap();
        let short = Specification::new(vec![OrderKey::ascending(region)]);
        let long = Specification::new(vec![
            OrderKey::ascending(region),
            OrderKey::ascending(amount),
        ]);
        let open = Specification::grouping(&[region]);

        assert!(is_compatible(Some(&short), Some(&long)));
        assert!(is_compatible(Some(&short), Some(&open)));
        assert!(!is_compatible(Some(&open), Some(&short)));
        assert!(!is_compatible(Some(&short), None));
        assert!(!is_compatible(Some(&Specification::new(Vec::new())), Some(&short)));

        assert!(is_satisfied_by(Some(&short), Some(&long)));
        assert!(!is_satisfied_by(Some(&long), Some(&short)));
    }

    #[test]
    fn test_disjoint_files_are_incompatible() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let sale = env.add_instance("sale", "s").unwrap();
        let region = env.field(sale, "region").unwrap();
        let raw = Specification::new(vec![OrderKey::ascending(region)]);
        let checked = |file: u32| {
            raw.with_phase(
                raw.keys().to_vec(),
                Phase::Checked(CheckedPhase {
                    instance: InstanceId(0),
                    files: vec![FileId(file)],
                    skipped: 0,
                    is_bitset_sort: false,
                }),
            )
        };
        assert!(is_compatible(Some(&checked(1)), Some(&checked(1))));
        assert!(!is_compatible(Some(&checked(1)), Some(&checked(2))));
    }

    #[test]
    fn test_get_compatible_merges() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let sale = env.add_instance("sale", "s").unwrap();
        let region = env.field(sale, "region").unwrap();
        let amount = env.field(sale, "amount").unwrap();
        let open = Specification::grouping(&[region]);
        let long = Specification::new(vec![
            OrderKey::descending(region),
            OrderKey::ascending(amount),
        ]);
        let merged = get_compatible(&open, &long).unwrap();
        assert_eq!(merged.keys(), long.keys());

        let opposite = Specification::new(vec![OrderKey::ascending(region)]);
        assert!(get_compatible(&opposite, &long).is_none());
    }
}
