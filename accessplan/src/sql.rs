/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! SQL text pushed to cascade servers.
//!
//! A [`SqlQuery`] is assembled clause by clause while a distributed plan is
//! lowered: the retrieval contributes the select list and the predicate, and
//! every cascade modifier above it adds its own clause. Each select item keeps
//! the scalar it delivers so the local side knows the shape of the tuples the
//! servers send back.

use crate::environment::ScalarId;
use crate::error::{PlanError, PlanResult};
use crate::limit::Limit;
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlKind {
    Select,
    Insert,
    Update,
    Delete,
}

/// One item of the select list, or one target column of an insert
#[derive(Debug, Clone, PartialEq)]
pub struct SqlColumn {
    pub text: String,
    pub scalar: ScalarId,
}

#[derive(Debug, Clone)]
pub struct SqlQuery {
    kind: SqlKind,
    table: String,
    distinct: bool,
    columns: Vec<SqlColumn>,
    predicate: Vec<String>,
    group_by: Vec<String>,
    having: Option<String>,
    order_by: Option<String>,
    limit: Limit,
}

impl SqlQuery {
    fn new(kind: SqlKind, table: &str) -> Self {
        Self {
            kind,
            table: table.to_string(),
            distinct: false,
            columns: Vec::new(),
            predicate: Vec::new(),
            group_by: Vec::new(),
            having: None,
            order_by: None,
            limit: Limit::default(),
        }
    }

    pub fn select(table: &str) -> Self {
        Self::new(SqlKind::Select, table)
    }

    pub fn insert(table: &str) -> Self {
        Self::new(SqlKind::Insert, table)
    }

    pub fn update(table: &str) -> Self {
        Self::new(SqlKind::Update, table)
    }

    pub fn delete(table: &str) -> Self {
        Self::new(SqlKind::Delete, table)
    }

    pub fn kind(&self) -> SqlKind {
        self.kind
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn add_column(&mut self, text: impl Into<String>, scalar: ScalarId) {
        let text = text.into();
        if !self.columns.iter().any(|column| column.text == text) {
            self.columns.push(SqlColumn { text, scalar });
        }
    }

    pub fn columns(&self) -> &[SqlColumn] {
        &self.columns
    }

    /// Scalars of the select list, in order
    pub fn scalars(&self) -> Vec<ScalarId> {
        self.columns.iter().map(|column| column.scalar).collect()
    }

    pub fn clear_columns(&mut self) {
        self.columns.clear();
    }

    pub fn set_distinct(&mut self, distinct: bool) {
        self.distinct = distinct;
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// AND-combines a condition with the WHERE clause
    pub fn add_predicate(&mut self, text: impl Into<String>) {
        self.predicate.push(text.into());
    }

    pub fn has_predicate(&self) -> bool {
        !self.predicate.is_empty()
    }

    pub fn set_group_by(&mut self, keys: Vec<String>) {
        self.group_by = keys;
    }

    pub fn set_having(&mut self, text: impl Into<String>) {
        self.having = Some(text.into());
    }

    /// ORDER BY keys, as rendered by the order specification
    pub fn set_order_by(&mut self, text: &str) {
        let text = text.trim();
        self.order_by = if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        };
    }

    pub fn order_by(&self) -> Option<&str> {
        self.order_by.as_deref()
    }

    pub fn set_limit(&mut self, limit: Limit) {
        self.limit = limit;
    }

    pub fn limit(&self) -> Limit {
        self.limit
    }

    /// Statement text sent to a cascade.
    ///
    /// Updates and deletes are sent as parameterised operations and have no
    /// text form.
    pub fn to_sql_statement(&self) -> PlanResult<String> {
        match self.kind {
            SqlKind::Select => self.select_statement(),
            SqlKind::Insert => self.insert_statement(),
            SqlKind::Update | SqlKind::Delete => Err(PlanError::not_supported(format!(
                "{:?} on {} has no statement text",
                self.kind, self.table
            ))),
        }
    }

    fn select_statement(&self) -> PlanResult<String> {
        if self.columns.is_empty() {
            return Err(PlanError::unexpected(format!(
                "select from {} without columns",
                self.table
            )));
        }
        let mut sql = String::from("select ");
        if self.distinct {
            sql.push_str("distinct ");
        }
        sql.push_str(&self.column_list());
        let _ = write!(sql, " from {}", self.table);
        if !self.predicate.is_empty() {
            let _ = write!(sql, " where {}", self.predicate.join(" and "));
        }
        if !self.group_by.is_empty() {
            let _ = write!(sql, " group by {}", self.group_by.join(","));
            if let Some(having) = &self.having {
                let _ = write!(sql, " having {}", having);
            }
        }
        if let Some(order_by) = &self.order_by {
            let _ = write!(sql, " order by {}", order_by);
        }
        sql.push_str(&self.limit.to_sql());
        Ok(sql)
    }

    fn insert_statement(&self) -> PlanResult<String> {
        if self.columns.is_empty() {
            return Err(PlanError::unexpected(format!(
                "insert into {} without columns",
                self.table
            )));
        }
        let placeholders = vec!["?"; self.columns.len()].join(",");
        Ok(format!(
            "insert into {}({}) values ({})",
            self.table,
            self.column_list(),
            placeholders
        ))
    }

    fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|column| column.text.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use shared::catalog::{Catalog, DataType, TableDef};
    use shared::config::PlannerConfig;

    fn create_test_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.add_table(
            TableDef::new("orders", 100.0)
                .column("customer", DataType::Integer)
                .column("amount", DataType::Float),
        );
        catalog
    }

    #[test]
    fn test_select_clauses_in_order() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let orders = env.add_instance("orders", "o").unwrap();
        let customer = env.field(orders, "customer").unwrap();
        let amount = env.field(orders, "amount").unwrap();

        let mut query = SqlQuery::select("orders");
        query.add_column("customer", customer);
        query.add_column("sum(amount)", amount);
        query.add_predicate("amount>10");
        query.set_group_by(vec!["customer".to_string()]);
        query.set_having("sum(amount)>100");
        query.set_order_by(" customer asc");
        query.set_limit(Limit::with_offset(5, 2));
        assert_eq!(
            query.to_sql_statement().unwrap(),
            "select customer,sum(amount) from orders where amount>10 group by customer \
             having sum(amount)>100 order by customer asc limit 5 offset 2"
        );
    }

    #[test]
    fn test_distinct_and_duplicate_columns() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let orders = env.add_instance("orders", "o").unwrap();
        let customer = env.field(orders, "customer").unwrap();

        let mut query = SqlQuery::select("orders");
        query.add_column("customer", customer);
        query.add_column("customer", customer);
        query.set_distinct(true);
        assert_eq!(query.to_sql_statement().unwrap(), "select distinct customer from orders");
        assert_eq!(query.scalars(), vec![customer]);
    }

    #[test]
    fn test_insert_and_update_text() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let orders = env.add_instance("orders", "o").unwrap();
        let customer = env.field(orders, "customer").unwrap();
        let amount = env.field(orders, "amount").unwrap();

        let mut insert = SqlQuery::insert("orders");
        insert.add_column("customer", customer);
        insert.add_column("amount", amount);
        assert_eq!(
            insert.to_sql_statement().unwrap(),
            "insert into orders(customer,amount) values (?,?)"
        );
        assert!(SqlQuery::update("orders")
            .to_sql_statement()
            .unwrap_err()
            .is_not_supported());
    }
}
