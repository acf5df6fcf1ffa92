/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::candidate;
use crate::cost::Cost;
use crate::environment::{CandidateId, Environment, RelationId, ScalarId};
use crate::error::{PlanError, PlanResult};
use crate::predicate;
use crate::relation::{self, Relation};
use crate::source::PlanSource;
use log::{debug, info};
use serde::Serialize;
use shared::catalog::Catalog;
use shared::config::PlannerConfig;
use shared::program::Program;

/// One planning pass over one query.
///
/// Build the relation tree through [`AccessPlanner::env_mut`], call
/// [`AccessPlanner::plan`] on its root, then [`AccessPlanner::lower`] the
/// chosen candidate into an execution program.
pub struct AccessPlanner<'a> {
    env: Environment<'a>,
}

/// Diagnostic view of a chosen candidate tree
#[derive(Debug, Clone, Serialize)]
pub struct PlanNode {
    pub kind: String,
    /// Aliases of the tables the node produces
    pub tables: Vec<String>,
    pub cost: Cost,
    pub children: Vec<PlanNode>,
}

impl<'a> AccessPlanner<'a> {
    pub fn new(catalog: &'a Catalog, config: &'a PlannerConfig) -> Self {
        Self {
            env: Environment::new(catalog, config),
        }
    }

    pub fn env(&self) -> &Environment<'a> {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment<'a> {
        &mut self.env
    }

    /// Finds the cheapest candidate for a query root.
    ///
    /// A root that is neither a projection nor a write outputs whole tuples,
    /// so every column of its tables is retrieved.
    pub fn plan(&mut self, root: RelationId) -> PlanResult<CandidateId> {
        relation::require(&mut self.env, root)?;
        if !matches!(self.env.relation(root)?, Relation::Projection(_) | Relation::Put(_)) {
            relation::require_all(&mut self.env, root)?;
        }
        let source = PlanSource::top(self.env.config());
        let id = relation::create_access_plan(&mut self.env, root, &source)?;

        let chosen = self.env.candidate(id)?;
        if !chosen.base.unchecked.is_empty() {
            return Err(PlanError::not_supported(format!(
                "no table binds {}",
                predicate::label_all(&self.env, &chosen.base.unchecked)?
            )));
        }
        info!("plan {}: {}", chosen.name(), chosen.base.cost);
        debug!("{} live candidates", self.env.candidate_count());
        Ok(id)
    }

    /// Turns a chosen candidate into the program that executes it
    pub fn lower(&self, id: CandidateId, output: &[ScalarId]) -> PlanResult<Program> {
        let mut program = Program::new();
        candidate::generate_top(&self.env, &mut program, id, output)?;
        debug!("lowered plan:\n{}", program.explain());
        Ok(program)
    }

    pub fn explain(&self, id: CandidateId) -> PlanResult<PlanNode> {
        let candidate = self.env.candidate(id)?;
        let mut tables = Vec::with_capacity(candidate.base.instances.len());
        for instance in &candidate.base.instances {
            tables.push(self.env.instance(*instance)?.alias.clone());
        }
        let mut children = Vec::new();
        for operand in candidate.operands() {
            children.push(self.explain(operand)?);
        }
        Ok(PlanNode {
            kind: candidate.name().to_string(),
            tables,
            cost: candidate.base.cost.clone(),
            children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::catalog::{ColumnId, DataType, FileDef, TableDef};

    fn create_test_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        let table = catalog.add_table(
            TableDef::new("sensor", 500.0)
                .row_id("rowid")
                .column("site", DataType::Text)
                .column("reading", DataType::Float),
        );
        catalog.add_file(FileDef::record(
            "sensor_record",
            table,
            ColumnId(0),
            &[ColumnId(1), ColumnId(2)],
        ));
        catalog
    }

    #[test]
    fn test_plan_lower_and_explain() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut planner = AccessPlanner::new(&catalog, &config);
        let env = planner.env_mut();
        let sensor = env.add_instance("sensor", "s").unwrap();
        let site = env.field(sensor, "site").unwrap();
        let value = env.text("north");
        let condition = env.equal(site, value);
        let table = env.table_relation(sensor);
        let root = env.selection(table, condition);

        let plan = planner.plan(root).unwrap();
        let program = planner.lower(plan, &[]).unwrap();
        assert_eq!(program.count_actions("output"), 1);

        let node = planner.explain(plan).unwrap();
        assert_eq!(node.tables, vec!["s".to_string()]);
        let json = serde_json::to_value(&node).unwrap();
        assert!(json.get("cost").is_some());
    }

    #[test]
    fn test_unbound_predicate_is_rejected() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut planner = AccessPlanner::new(&catalog, &config);
        let env = planner.env_mut();
        let outer = env.add_instance("sensor", "o").unwrap();
        let inner = env.add_instance("sensor", "i").unwrap();
        let outer_site = env.field(outer, "site").unwrap();
        let inner_site = env.field(inner, "site").unwrap();
        let correlated = env.equal(inner_site, outer_site);
        let table = env.table_relation(inner);
        let root = env.selection(table, correlated);

        let error = planner.plan(root).unwrap_err();
        assert!(error.is_not_supported());
    }
}
