/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{conjuncts, used_instances, CompareOp, Predicate};
use crate::cost::{CostConstants, CostValue};
use crate::environment::{Environment, InstanceSet, PredicateId, ScalarId};
use crate::error::PlanResult;

/// Fraction of tuples expected to satisfy a predicate
pub fn estimate_rate(env: &Environment<'_>, id: PredicateId) -> PlanResult<CostValue> {
    let rate = match env.predicate(id)? {
        Predicate::Comparison { op, left, right } => match op {
            CompareOp::Equal => {
                let left = key_rate(env, *left)?;
                let right = key_rate(env, *right)?;
                match (left, right) {
                    (Some(left), Some(right)) => left.min(right),
                    (Some(rate), None) | (None, Some(rate)) => rate,
                    (None, None) => CostValue::new(CostConstants::EQUAL_RATE),
                }
            }
            CompareOp::NotEqual => CostValue::new(CostConstants::NOT_EQUAL_RATE),
            _ => CostValue::new(CostConstants::RANGE_RATE),
        },
        Predicate::IsNull { negated, .. } => {
            if *negated {
                CostValue::new(1.0 - CostConstants::NULL_RATE)
            } else {
                CostValue::new(CostConstants::NULL_RATE)
            }
        }
        Predicate::In { operand, values } => {
            let single = key_rate(env, *operand)?
                .unwrap_or_else(|| CostValue::new(CostConstants::EQUAL_RATE));
            (single * values.len() as f64).min(CostValue::ONE)
        }
        Predicate::Like { negated, .. } => {
            if *negated {
                CostValue::new(1.0 - CostConstants::LIKE_RATE)
            } else {
                CostValue::new(CostConstants::LIKE_RATE)
            }
        }
        Predicate::Contains { .. } => CostValue::new(CostConstants::CONTAINS_RATE),
        Predicate::And(operands) => {
            let mut rate = CostValue::ONE;
            for operand in operands.clone() {
                rate *= estimate_rate(env, operand)?;
            }
            rate
        }
        Predicate::Or(operands) => {
            let mut miss = 1.0;
            for operand in operands.clone() {
                miss *= 1.0 - estimate_rate(env, operand)?.get().min(1.0);
            }
            CostValue::new(1.0 - miss)
        }
        Predicate::Not(operand) => {
            CostValue::new(1.0 - estimate_rate(env, *operand)?.get().min(1.0))
        }
    };
    Ok(rate.min(CostValue::ONE))
}

/// Rate of the conjuncts that refer to any of the instances.
///
/// Returns `None` when no conjunct refers to them, so the predicate does not
/// reduce that side at all.
pub fn check_rate(
    env: &Environment<'_>,
    id: PredicateId,
    instances: &InstanceSet,
) -> PlanResult<Option<CostValue>> {
    let mut rate: Option<CostValue> = None;
    for conjunct in conjuncts(env, id)? {
        let mut used = InstanceSet::default();
        used_instances(env, conjunct, &mut used)?;
        if used.is_disjoint(instances) {
            continue;
        }
        let conjunct_rate = estimate_rate(env, conjunct)?;
        rate = Some(match rate {
            Some(rate) => rate * conjunct_rate,
            None => conjunct_rate,
        });
    }
    Ok(rate)
}

/// Selectivity of one value of a field, taken from the best index on it
fn key_rate(env: &Environment<'_>, id: ScalarId) -> PlanResult<Option<CostValue>> {
    let field = match env.scalar(id)?.as_field() {
        Some(field) => field,
        None => return Ok(None),
    };
    let table = env.table(field.instance)?;
    let estimator = env.estimator();
    let mut best: Option<CostValue> = None;
    for file in env.catalog().files_of(table.id) {
        if file.leading_key() != Some(field.column) {
            continue;
        }
        let rate = if file.unique && file.keys.len() == 1 {
            Some(CostValue::ONE / CostValue::new(table.estimate_count.max(1.0)))
        } else {
            estimator.key_rate(file)
        };
        if let Some(rate) = rate {
            best = Some(best.map_or(rate, |best| best.min(rate)));
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::catalog::{Catalog, ColumnId, DataType, FileDef, TableDef};
    use shared::config::PlannerConfig;

    fn create_test_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        let person = catalog.add_table(
            TableDef::new("person", 1000.0)
                .row_id("rowid")
                .column("city", DataType::Integer)
                .column("age", DataType::Integer),
        );
        catalog.add_file(FileDef::record(
            "person_record",
            person,
            ColumnId(0),
            &[ColumnId(1), ColumnId(2)],
        ));
        catalog.add_file(
            FileDef::btree("person_city", person, &[ColumnId(1)]).distinct_count(50.0),
        );
        let city = catalog.add_table(
            TableDef::new("city", 50.0)
                .row_id("rowid")
                .column("id", DataType::Integer),
        );
        catalog.add_file(FileDef::record("city_record", city, ColumnId(0), &[ColumnId(1)]));
        catalog
    }

    #[test]
    fn test_equal_uses_distinct_count() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let person = env.add_instance("person", "p").unwrap();
        let city = env.field(person, "city").unwrap();
        let age = env.field(person, "age").unwrap();
        let value = env.integer(3);
        let indexed = env.equal(city, value);
        let plain = env.equal(age, value);
        assert_eq!(estimate_rate(&env, indexed).unwrap(), 0.02);
        assert_eq!(estimate_rate(&env, plain).unwrap(), CostConstants::EQUAL_RATE);
    }

    #[test]
    fn test_or_and_not() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let person = env.add_instance("person", "p").unwrap();
        let age = env.field(person, "age").unwrap();
        let value = env.integer(3);
        let first = env.comparison(CompareOp::Less, age, value);
        let second = env.comparison(CompareOp::Greater, age, value);
        let either = env.or(vec![first, second]);
        let expected = 1.0 - (1.0 - CostConstants::RANGE_RATE).powi(2);
        assert!((estimate_rate(&env, either).unwrap().get() - expected).abs() < 1e-9);
        let negated = env.not(first);
        assert!((estimate_rate(&env, negated).unwrap().get() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_check_rate_only_counts_related_conjuncts() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let person = env.add_instance("person", "p").unwrap();
        let city = env.add_instance("city", "c").unwrap();
        let person_city = env.field(person, "city").unwrap();
        let city_id = env.field(city, "id").unwrap();
        let join = env.equal(person_city, city_id);

        let mut only_city = InstanceSet::default();
        only_city.insert(city);
        assert_eq!(check_rate(&env, join, &only_city).unwrap(), Some(CostValue::new(0.02)));

        let age = env.field(person, "age").unwrap();
        let value = env.integer(1);
        let local = env.equal(age, value);
        assert_eq!(check_rate(&env, local, &only_city).unwrap(), None);
    }
}
