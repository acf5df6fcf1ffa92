/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Cost-based access plan optimizer.
//!
//! A query arrives as a tree of [`Relation`]s. Every relation produces
//! candidates, physical alternatives with an estimated [`cost::Cost`], and
//! the cheapest one is lowered into a [`shared::program::Program`].

pub mod arena;
pub mod candidate;
pub mod cost;
pub mod environment;
pub mod error;
pub mod limit;
pub mod optimizer;
pub mod order;
pub mod predicate;
pub mod relation;
pub mod row;
pub mod scalar;
pub mod source;
pub mod sql;

pub use environment::{CandidateId, Environment, InstanceId, PredicateId, RelationId, ScalarId};
pub use error::{PlanError, PlanResult};
pub use optimizer::{AccessPlanner, PlanNode};
pub use relation::{JoinType, Relation};
pub use source::PlanSource;
