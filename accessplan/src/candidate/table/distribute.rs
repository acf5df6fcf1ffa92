/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Retrieval of a table stored on cascade servers.
//!
//! A distributed table is read from every cascade in parallel and the
//! results are merged; a replicated one is read from a single cascade picked
//! round-robin. Conjuncts on the table alone travel in the SQL text, and a
//! read that reaches a single server also takes the requested order with it.

use super::{fields, register, TableVariant};
use crate::candidate::{
    add_check_predicate, copy_order, split_bound, AdoptArgument, CandidateBase,
};
use crate::cost::{Cost, CostValue};
use crate::environment::{
    CandidateId, Environment, InstanceId, InstanceSet, OrderId, PredicateId, ScalarId,
};
use crate::error::{PlanError, PlanResult};
use crate::predicate;
use crate::row::Row;
use crate::scalar;
use crate::source::PlanSource;
use crate::sql::SqlQuery;
use log::debug;
use shared::catalog::{ColumnId, Distribution};
use shared::config::TraceTopic;
use shared::program::{Action, IteratorId, IteratorKind, Program, Target};

#[derive(Debug, Clone)]
pub struct Distribute {
    pub columns: Vec<ScalarId>,
    pub cascades: Vec<String>,
    pub replicated: bool,
    /// Conjuncts evaluated by the servers
    pub pushed: Vec<PredicateId>,
}

impl Distribute {
    /// Read served by one cascade, so its tuples arrive in server order
    pub fn is_single(&self) -> bool {
        self.replicated || self.cascades.len() == 1
    }
}

/// Whether every key of `order` is a column of `instance`
fn is_own_order(env: &Environment<'_>, instance: InstanceId, order: OrderId) -> PlanResult<bool> {
    for key in env.order(order)?.keys() {
        match env.scalar(key.scalar)?.as_field() {
            Some(field) if field.instance == instance => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

pub fn create(
    env: &mut Environment<'_>,
    source: &PlanSource,
    instance: InstanceId,
    columns: &[ColumnId],
) -> PlanResult<CandidateId> {
    let table = env.table(instance)?;
    let all = &env.catalog().cascades;
    if all.is_empty() {
        return Err(PlanError::not_supported(format!(
            "{} is distributed but no cascade is defined",
            table.name
        )));
    }
    let replicated = table.distribution == Distribution::Replicated;
    let cascades: Vec<String> = if replicated {
        vec![all[env.next_cascade(all.len())].name.clone()]
    } else {
        all.iter().map(|cascade| cascade.name.clone()).collect()
    };

    let mut columns = columns.to_vec();
    if columns.is_empty() {
        // a count(*) still needs one column per tuple
        if let Some(first) = table.columns.first() {
            columns.push(first.id);
        }
    }
    let scalars = fields(env, instance, &columns)?;

    let (pushed, residual, unchecked) = match source.predicate() {
        Some(condition) => {
            let conjuncts = predicate::conjuncts(env, condition)?;
            let mut own = InstanceSet::default();
            own.insert(instance);
            let (pushed, rest) = split_bound(env, &conjuncts, &own)?;
            let mut available = source.preceding_instances(env)?;
            available.insert(instance);
            let (residual, unchecked) = split_bound(env, &rest, &available)?;
            (pushed, residual, unchecked)
        }
        None => (Vec::new(), Vec::new(), Vec::new()),
    };
    let mut pushed_rate = CostValue::ONE;
    for conjunct in &pushed {
        pushed_rate *= predicate::estimate_rate(env, *conjunct)?;
    }
    let mut residual_rate = CostValue::ONE;
    for conjunct in &residual {
        residual_rate *= predicate::estimate_rate(env, *conjunct)?;
    }

    let mut remote = Cost::new();
    remote.reset();
    let count = CostValue::new(table.estimate_count) * pushed_rate;
    remote.set_table_count(table.estimate_count);
    remote.set_tuple_count(count);
    remote.set_total_cost(count.max(CostValue::ONE));
    remote.set_tuple_size(table.tuple_size());
    // merging parallel streams loses the server order
    let single = replicated || cascades.len() == 1;
    let order = match source.order() {
        Some(order) if single && is_own_order(env, instance, order)? => {
            remote.add_sorting_cost(env.config());
            copy_order(env, Some(order))?
        }
        _ => None,
    };
    let mut cost = env.estimator().server_cost(&remote);
    cost.set_tuple_count(count * residual_rate);
    cost.set_rate(pushed_rate * residual_rate);
    cost.set_is_set_rate();
    cost.set_is_set_count();
    if source.order().is_none() || order.is_some() {
        let estimate = source.get_estimate_limit();
        if !estimate.is_infinity() {
            cost.set_limit_count(estimate);
        }
    }

    if env.traced(TraceTopic::Cost) {
        debug!(
            "{} {} over {} cascades, {} pushed conjuncts, {}ordered, {}",
            if replicated { "replicated" } else { "distributed" },
            table.name,
            cascades.len(),
            pushed.len(),
            if order.is_some() { "" } else { "not " },
            cost
        );
    }

    let row = env.add_row(Row::from_scalars(scalars.iter().copied()));
    let residual = predicate::combine(env, residual);
    let base = CandidateBase {
        cost,
        row: Some(row),
        predicate: residual,
        unchecked,
        order,
        instances: vec![instance],
        distribution: table.distribution,
        ..CandidateBase::default()
    };
    register(
        env,
        instance,
        base,
        TableVariant::Distribute(Distribute {
            columns: scalars,
            cascades,
            replicated,
            pushed,
        }),
    )
}

impl Distribute {
    pub(crate) fn generate_sql(
        &self,
        env: &Environment<'_>,
        instance: InstanceId,
        base: &CandidateBase,
    ) -> PlanResult<SqlQuery> {
        let table = env.table(instance)?;
        let mut query = SqlQuery::select(&table.name);
        for column in &self.columns {
            query.add_column(scalar::to_sql(env, *column)?, *column);
        }
        for conjunct in &self.pushed {
            query.add_predicate(predicate::to_sql(env, *conjunct)?);
        }
        if let Some(order) = base.order {
            query.set_order_by(&env.order(order)?.to_sql(env)?);
        }
        Ok(query)
    }

    pub(crate) fn adopt(
        &self,
        env: &Environment<'_>,
        program: &mut Program,
        instance: InstanceId,
        base: &CandidateBase,
        argument: &AdoptArgument,
    ) -> PlanResult<IteratorId> {
        let query = match &argument.sql {
            Some(query) => query.clone(),
            None => self.generate_sql(env, instance, base)?,
        };
        let sql = query.to_sql_statement()?;
        let scalars = query.scalars();

        let iterator = if self.is_single() {
            let cascade = self.cascades.first().cloned().unwrap_or_default();
            let server = program.add_iterator(IteratorKind::Server {
                cascade: cascade.clone(),
            });
            if let Some(outer) = argument.outer {
                program.copy_node_variables(outer, server);
            }
            let data = scalar::array_variable(env, program, server, &scalars)?;
            program.add_action(
                server,
                Target::Execution,
                Action::ServerQuery { cascade, sql, data },
            );
            server
        } else {
            let parallel = program.add_iterator(IteratorKind::Parallel);
            if let Some(outer) = argument.outer {
                program.copy_node_variables(outer, parallel);
            }
            let data = scalar::array_variable(env, program, parallel, &scalars)?;
            program.add_action(parallel, Target::Execution, Action::BeginParallel);
            for (position, cascade) in self.cascades.iter().enumerate() {
                if position > 0 {
                    program.add_action(parallel, Target::Parallel, Action::ParallelList);
                }
                let server = program.add_iterator(IteratorKind::Server {
                    cascade: cascade.clone(),
                });
                program.add_action(
                    server,
                    Target::Execution,
                    Action::ServerQuery {
                        cascade: cascade.clone(),
                        sql: sql.clone(),
                        data,
                    },
                );
                program.add_action(
                    parallel,
                    Target::Parallel,
                    Action::Iterate { operand: server },
                );
            }
            program.add_action(parallel, Target::Execution, Action::EndParallel);
            parallel
        };
        add_check_predicate(env, program, iterator, base.predicate)?;
        Ok(iterator)
    }
}
