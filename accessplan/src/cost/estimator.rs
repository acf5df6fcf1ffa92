/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{Cost, CostValue};
use shared::catalog::{FileDef, FileKind, TableDef};
use shared::config::PlannerConfig;

/// Cost estimation constants for access paths and predicates
pub struct CostConstants;

impl CostConstants {
    pub const EQUAL_RATE: f64 = 0.05;
    pub const NOT_EQUAL_RATE: f64 = 0.9;
    pub const RANGE_RATE: f64 = 0.3;
    pub const LIKE_RATE: f64 = 0.1;
    pub const NULL_RATE: f64 = 0.05;
    pub const CONTAINS_RATE: f64 = 0.01;
    pub const DEFAULT_RATE: f64 = 0.5;

    /// A fetch never expects fewer candidates than this per probe
    pub const FETCH_MIN_COUNT: f64 = 10.0;
    pub const FETCH_COUNT_DIVISOR: f64 = 100.0;
    /// Upper bound of tuples read back through a bitset
    pub const BITSET_TUPLE_LIMIT: f64 = 100.0;
    pub const DISTINCT_LIMIT_FACTOR: f64 = 100.0;
    pub const DEFAULT_TUPLE_SIZE: f64 = 32.0;

    pub const COLLECTION_OVERHEAD: f64 = 1.0;
    pub const COLLECTION_PROCESS_COST: f64 = 0.1;
    pub const SERVER_OVERHEAD: f64 = 100.0;
    pub const SERVER_TRANSFER_COST: f64 = 0.5;
    pub const CHECK_CONSTRAINT_COST: f64 = 1.0;
}

/// Builds access-path costs from catalog statistics
pub struct CostEstimator<'a> {
    config: &'a PlannerConfig,
}

impl<'a> CostEstimator<'a> {
    pub fn new(config: &'a PlannerConfig) -> Self {
        Self { config }
    }

    /// Bytes a file returns per tuple
    pub fn file_tuple_size(&self, file: &FileDef, table: &TableDef) -> f64 {
        let size: f64 = file
            .key_fields()
            .chain(file.data_fields())
            .filter_map(|column| table.column_def(column))
            .map(|column| column.size)
            .sum();
        if size > 0.0 {
            size
        } else {
            CostConstants::DEFAULT_TUPLE_SIZE
        }
    }

    /// Cost of reading every tuple of a file
    pub fn scan_cost(&self, file: &FileDef, table: &TableDef) -> Cost {
        self.file_cost(file, table, None, false)
    }

    /// Cost of one access through a file.
    ///
    /// `rate` is the selectivity of the conditions the file evaluates. A fetch
    /// is a probe bound by an outer loop: its per-probe count is damped, since
    /// estimates on a single key value tend to be pessimistic.
    pub fn file_cost(
        &self,
        file: &FileDef,
        table: &TableDef,
        rate: Option<CostValue>,
        is_fetch: bool,
    ) -> Cost {
        let table_count = CostValue::new(table.estimate_count);
        let mut count = match rate {
            Some(rate) => table_count * rate,
            None => table_count,
        };

        let mut cost = Cost::new();
        cost.set_overhead(file.cost.overhead);
        cost.set_table_count(table_count);
        cost.set_tuple_size(self.file_tuple_size(file, table));
        if is_fetch {
            cost.set_is_fetch(true);
            cost.set_rate(1.0);
            let damped = (count / CostConstants::FETCH_COUNT_DIVISOR)
                .max(CostValue::new(CostConstants::FETCH_MIN_COUNT));
            count = count.min(damped);
        } else if let Some(rate) = rate {
            cost.set_rate(rate);
            cost.set_is_set_rate();
        }
        cost.set_tuple_count(count);
        cost.set_total_cost(CostValue::new(file.cost.process_cost) * count.max(CostValue::ONE));
        cost.set_is_set_count();
        cost
    }

    /// Cost of reading one tuple of a file by its unique key
    pub fn fetch_cost(&self, file: &FileDef, table: &TableDef) -> Cost {
        let mut cost = Cost::new();
        cost.set_overhead(file.cost.overhead);
        cost.set_table_count(table.estimate_count);
        cost.set_tuple_size(self.file_tuple_size(file, table));
        cost.set_tuple_count(1.0);
        cost.set_total_cost(file.cost.process_cost);
        cost.set_rate(1.0);
        cost.set_is_fetch(true);
        cost.set_is_set_count();
        cost
    }

    /// Per-tuple cost of reading additional columns through another file
    pub fn retrieve_cost(&self, file: &FileDef, table: &TableDef) -> CostValue {
        let scan = self.scan_cost(file, table);
        scan.total_cost() / scan.tuple_count().max(CostValue::ONE)
    }

    /// Selectivity of one key value of a file's leading key
    pub fn key_rate(&self, file: &FileDef) -> Option<CostValue> {
        file.cost
            .distinct_count
            .filter(|count| *count >= 1.0)
            .map(|count| CostValue::new(1.0 / count))
    }

    /// Cost of putting one tuple into a file
    pub fn put_cost(&self, file: &FileDef) -> CostValue {
        let base = CostValue::new(file.cost.process_cost);
        match file.kind {
            // inverted files update one entry per word
            FileKind::FullText => base * 10.0,
            _ => base,
        }
    }

    /// Cost of shipping a query to one cascade and reading its tuples back
    pub fn server_cost(&self, operand: &Cost) -> Cost {
        let mut cost = Cost::new();
        cost.assign_from(operand);
        cost.set_overhead(operand.overhead() + CostConstants::SERVER_OVERHEAD);
        let transfer = CostValue::new(CostConstants::SERVER_TRANSFER_COST) * operand.tuple_count();
        cost.set_total_cost(operand.total_cost() + transfer);
        cost.set_is_set_count();
        cost
    }

    /// Output tuple count of a grouping
    pub fn grouping_count(&self, tuple_count: CostValue, has_keys: bool) -> CostValue {
        if !has_keys {
            return CostValue::ONE;
        }
        if tuple_count.is_infinity() {
            return tuple_count;
        }
        CostValue::new(tuple_count.get().sqrt())
    }

    pub fn config(&self) -> &PlannerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::catalog::{Catalog, ColumnId, DataType, FileDef, TableDef};

    fn create_test_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        let table = catalog.add_table(
            TableDef::new("orders", 1000.0)
                .row_id("rowid")
                .column("customer", DataType::Integer)
                .column("note", DataType::Text),
        );
        catalog.add_file(
            FileDef::record("orders_record", table, ColumnId(0), &[ColumnId(1), ColumnId(2)])
                .cost(1.0, 1.0),
        );
        catalog.add_file(
            FileDef::btree("orders_customer", table, &[ColumnId(1)])
                .data(&[ColumnId(0)])
                .cost(3.0, 0.5)
                .distinct_count(200.0),
        );
        catalog
    }

    #[test]
    fn test_scan_cost_reads_every_tuple() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let estimator = CostEstimator::new(&config);
        let table = &catalog.tables[0];
        let cost = estimator.scan_cost(&catalog.files[0], table);
        assert_eq!(cost.tuple_count(), 1000.0);
        assert_eq!(cost.total_cost(), 1000.0);
        assert_eq!(cost.calculate_value(), 1001.0);
        assert!(!cost.is_fetch());
    }

    #[test]
    fn test_search_cost_applies_rate() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let estimator = CostEstimator::new(&config);
        let file = &catalog.files[1];
        let rate = estimator.key_rate(file).unwrap();
        let cost = estimator.file_cost(file, &catalog.tables[0], Some(rate), false);
        assert_eq!(cost.tuple_count(), 5.0);
        assert!(cost.is_set_rate());
        assert_eq!(cost.rate(), rate);
    }

    #[test]
    fn test_fetch_cost_is_damped() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let estimator = CostEstimator::new(&config);
        let cost = estimator.file_cost(
            &catalog.files[1],
            &catalog.tables[0],
            Some(CostValue::new(0.5)),
            true,
        );
        assert!(cost.is_fetch());
        assert_eq!(cost.rate(), 1.0);
        assert_eq!(cost.tuple_count(), 10.0);
    }

    #[test]
    fn test_grouping_count() {
        let config = PlannerConfig::default();
        let estimator = CostEstimator::new(&config);
        assert_eq!(estimator.grouping_count(CostValue::new(100.0), false), 1.0);
        assert_eq!(estimator.grouping_count(CostValue::new(100.0), true), 10.0);
    }
}
