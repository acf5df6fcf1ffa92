/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Planner configuration.
//!
//! Values are read-only for the duration of a planning pass. They are usually
//! built with [`PlannerConfig::default`] and adjusted, or loaded from a JSON
//! document where missing fields keep their defaults.

use serde::{Deserialize, Serialize};

/// Areas of the planner whose decisions can be traced through the `log` facade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceTopic {
    Cost,
    Join,
    Order,
    Predicate,
    Adopt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlannerConfig {
    /// Join-order candidates examined per join node before the order is fixed; 0 means unlimited
    pub join_max_candidates: u32,
    /// Ceiling on independent file writes run as one parallel group
    pub thread_max: usize,
    /// Maximum number of OR branches rewritten into a union of index scans
    pub union_max: usize,
    /// Bytes above which sorting is costed at file speed
    pub collection_threshold: f64,
    pub memory_transfer_speed: f64,
    pub file_transfer_speed: f64,
    /// Row estimate used for a `LIMIT ?` placeholder
    pub limit_parameter_estimate: f64,
    pub trace: Vec<TraceTopic>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            join_max_candidates: 100,
            thread_max: 4,
            union_max: 8,
            collection_threshold: 4.0 * 1024.0 * 1024.0,
            memory_transfer_speed: 1024.0 * 1024.0,
            file_transfer_speed: 64.0 * 1024.0,
            limit_parameter_estimate: 10.0,
            trace: Vec::new(),
        }
    }
}

impl PlannerConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn is_traced(&self, topic: TraceTopic) -> bool {
        self.trace.contains(&topic)
    }

    /// Join budget handed to a fresh plan source, `None` when unlimited
    pub fn join_budget(&self) -> Option<u32> {
        if self.join_max_candidates == 0 {
            None
        } else {
            Some(self.join_max_candidates)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_keep_defaults() {
        let config = PlannerConfig::from_json(r#"{ "thread_max": 8 }"#).unwrap();
        assert_eq!(config.thread_max, 8);
        assert_eq!(config.join_max_candidates, 100);
        assert_eq!(config.union_max, 8);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        assert!(PlannerConfig::from_json(r#"{ "threads": 8 }"#).is_err());
    }

    #[test]
    fn test_trace_topics() {
        let config = PlannerConfig::from_json(r#"{ "trace": ["join", "cost"] }"#).unwrap();
        assert!(config.is_traced(TraceTopic::Join));
        assert!(!config.is_traced(TraceTopic::Order));
    }

    #[test]
    fn test_zero_join_budget_is_unlimited() {
        let config = PlannerConfig {
            join_max_candidates: 0,
            ..PlannerConfig::default()
        };
        assert_eq!(config.join_budget(), None);
    }
}
